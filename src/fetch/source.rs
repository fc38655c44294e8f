use crate::{
    fetch::{file::FileSource, http::HttpSource},
    utils::{
        config::LoaderConfig,
        error::{LoadError, LoadResult, LoaderResult},
    },
};
use std::future::Future;

/// Resolves an identifier to the raw encoded bytes behind it.
pub trait ByteSource: Send + Sync + 'static {
    fn bytes(&self, id: &str) -> impl Future<Output = LoadResult<Vec<u8>>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    File,
    Unsupported,
}

impl Scheme {
    pub fn of(id: &str) -> Self {
        match id.split_once("://") {
            Some((scheme, _)) if scheme.eq_ignore_ascii_case("http") => Self::Http,
            Some((scheme, _)) if scheme.eq_ignore_ascii_case("https") => Self::Http,
            Some((scheme, _)) if scheme.eq_ignore_ascii_case("file") => Self::File,
            Some(_) => Self::Unsupported,
            None => Self::File,
        }
    }
}

/// Dispatches by identifier scheme: `http(s)://` to the network, `file://`
/// and bare paths to the filesystem.
#[derive(Clone)]
pub struct RoutedSource {
    http: HttpSource,
    file: FileSource,
}

impl RoutedSource {
    pub fn new(http: HttpSource, file: FileSource) -> Self {
        Self { http, file }
    }

    pub fn from_config(config: &LoaderConfig) -> LoaderResult<Self> {
        Ok(Self::new(
            HttpSource::new(config.request_timeout, &config.user_agent)?,
            FileSource::new(),
        ))
    }
}

impl ByteSource for RoutedSource {
    async fn bytes(&self, id: &str) -> LoadResult<Vec<u8>> {
        match Scheme::of(id) {
            Scheme::Http => self.http.bytes(id).await,
            Scheme::File => self.file.bytes(id).await,
            Scheme::Unsupported => Err(LoadError::not_found(id)),
        }
    }
}
