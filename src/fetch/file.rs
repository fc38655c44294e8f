use crate::{
    fetch::source::ByteSource,
    utils::error::{LoadError, LoadResult},
};
use log::trace;
use std::{io::ErrorKind, path::Path};

/// Reads image bytes from the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct FileSource;

impl FileSource {
    pub fn new() -> Self {
        Self
    }

    pub fn path_of(id: &str) -> &Path {
        Path::new(id.strip_prefix("file://").unwrap_or(id))
    }
}

impl ByteSource for FileSource {
    async fn bytes(&self, id: &str) -> LoadResult<Vec<u8>> {
        let path = Self::path_of(id);
        trace!("Reading {}", path.display());

        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(LoadError::not_found(id)),
            Err(e) => Err(LoadError::fetch(id, e.to_string())),
        }
    }
}
