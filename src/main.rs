use clap::Parser;
use futures::future::join_all;
use imageloader::{
    utils::cli::{Cli, Command},
    DefaultCoordinator, LoaderError, LoaderResult,
};
use log::{error, info};
use std::collections::BTreeMap;

#[tokio::main]
async fn main() -> LoaderResult<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config = cli.command.loader_config()?;
    match cli.command {
        Command::Load { ids, repeat, .. } => {
            let coordinator = DefaultCoordinator::from_config(&config)?;
            info!(
                "Loading {} images x{} (capacity: {:?}, max concurrent fetches: {})",
                ids.len(),
                repeat,
                config.capacity,
                config.max_concurrent_fetches
            );

            let requests = ids.iter().flat_map(|id| {
                let coordinator = coordinator.clone();
                (0..repeat.max(1)).map(move |_| {
                    let coordinator = coordinator.clone();
                    let id = id.clone();
                    async move {
                        let result = coordinator.request(&id).await;
                        (id, result)
                    }
                })
            });

            let mut outcomes = BTreeMap::new();
            for (id, result) in join_all(requests).await {
                outcomes.entry(id).or_insert(result);
            }

            let mut first_failure = None;
            for (id, result) in outcomes {
                match result {
                    Ok(bitmap) => println!("{id}\t{}x{}", bitmap.width(), bitmap.height()),
                    Err(e) => {
                        println!("{id}\terror ({})", e.kind());
                        error!("{}", e);
                        first_failure.get_or_insert(e);
                    }
                }
            }

            coordinator.log_stats();

            if let Some(e) = first_failure {
                return Err(LoaderError::Load(e));
            }
        }
    }

    Ok(())
}
