use crate::{
    image::transform::ScalingMode,
    utils::{config::LoaderConfig, error::LoaderResult},
};
use clap::Parser;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Parser)]
pub enum Command {
    /// Load images through one shared cache and report the outcome
    #[command(name = "load")]
    Load {
        /// Image URLs or paths
        #[arg(required = true)]
        ids: Vec<String>,

        /// Concurrent requests issued per identifier
        #[arg(short, long, default_value_t = 1)]
        repeat: usize,

        /// Maximum cached images (0 for unbounded)
        #[arg(short, long, default_value_t = crate::utils::config::DEFAULT_CAPACITY)]
        capacity: usize,

        /// Seconds a cached image stays valid
        #[arg(long)]
        ttl: Option<u64>,

        /// Maximum fetches running at once
        #[arg(long)]
        max_concurrent: Option<usize>,

        /// HTTP timeout in seconds
        #[arg(short, long, default_value_t = 30)]
        timeout: u64,

        /// Downscale images wider than this
        #[arg(long, requires = "max_height")]
        max_width: Option<u32>,

        /// Downscale images taller than this
        #[arg(long, requires = "max_width")]
        max_height: Option<u32>,

        /// Scaling mode (fill, fit, stretch)
        #[arg(short, long, default_value = "fit")]
        scaling: String,
    },
}

impl Command {
    pub fn loader_config(&self) -> LoaderResult<LoaderConfig> {
        let Command::Load {
            capacity,
            ttl,
            max_concurrent,
            timeout,
            max_width,
            max_height,
            scaling,
            ..
        } = self;

        let mut builder = LoaderConfig::builder()
            .capacity((*capacity > 0).then_some(*capacity))
            .time_to_live(ttl.map(Duration::from_secs))
            .request_timeout(Duration::from_secs(*timeout))
            .scaling(scaling.parse::<ScalingMode>()?);

        if let Some(max) = max_concurrent {
            builder = builder.max_concurrent_fetches(*max);
        }
        if let (Some(width), Some(height)) = (max_width, max_height) {
            builder = builder.max_dimension(*width, *height);
        }

        builder.build()
    }
}
