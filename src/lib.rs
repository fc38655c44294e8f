pub mod core {
    pub mod binding;
    pub mod bitmap;
    pub mod cache;
    pub mod coordinator;
    pub mod pending;
}

pub mod fetch {
    pub mod fetcher;
    pub mod file;
    pub mod http;
    pub mod limiter;
    pub mod source;
}

pub mod image {
    pub mod loader;
    pub mod transform;
}

pub mod utils {
    pub mod cli;
    pub mod config;
    pub mod error;
}

pub use core::{
    binding::ImageBinding,
    bitmap::Bitmap,
    cache::CachePolicy,
    coordinator::{Coordinator, CoordinatorStats, DefaultCoordinator},
};
pub use fetch::fetcher::{DecodingFetcher, Fetcher};
pub use utils::{
    config::LoaderConfig,
    error::{LoadError, LoadResult, LoaderError, LoaderResult},
};
