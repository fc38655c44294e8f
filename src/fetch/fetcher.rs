use crate::{
    core::bitmap::Bitmap,
    fetch::{limiter::FetchLimiter, source::ByteSource, source::RoutedSource},
    image::loader::{DecodeOptions, ImageLoader},
    utils::{
        config::LoaderConfig,
        error::{LoadError, LoadResult, LoaderResult},
    },
};
use log::debug;
use std::{future::Future, sync::Arc};

/// Turns an identifier into a decoded bitmap. No caching happens here.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(&self, id: &str) -> impl Future<Output = LoadResult<Bitmap>> + Send;
}

impl<F: Fetcher> Fetcher for Arc<F> {
    fn fetch(&self, id: &str) -> impl Future<Output = LoadResult<Bitmap>> + Send {
        (**self).fetch(id)
    }
}

/// Pulls bytes from a [`ByteSource`] under a concurrency limit, then decodes
/// them on the blocking pool.
pub struct DecodingFetcher<S> {
    source: S,
    limiter: FetchLimiter,
    options: DecodeOptions,
}

impl<S: ByteSource> DecodingFetcher<S> {
    pub fn new(source: S, limiter: FetchLimiter, options: DecodeOptions) -> Self {
        Self {
            source,
            limiter,
            options,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn limiter(&self) -> &FetchLimiter {
        &self.limiter
    }
}

impl DecodingFetcher<RoutedSource> {
    pub fn from_config(config: &LoaderConfig) -> LoaderResult<Self> {
        config.validate()?;
        Ok(Self::new(
            RoutedSource::from_config(config)?,
            FetchLimiter::new(config.max_concurrent_fetches)?,
            config.decode_options(),
        ))
    }
}

impl<S: ByteSource> Fetcher for DecodingFetcher<S> {
    async fn fetch(&self, id: &str) -> LoadResult<Bitmap> {
        let bytes = {
            let _permit = self.limiter.acquire(id).await?;
            self.source.bytes(id).await?
        };
        debug!("Fetched {} bytes for {}", bytes.len(), id);

        let owned_id = id.to_string();
        let options = self.options;
        tokio::task::spawn_blocking(move || ImageLoader::decode(&owned_id, &bytes, &options))
            .await
            .map_err(|e| LoadError::decode(id, format!("decoder task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::loader::tests::encoded_png;
    use std::collections::HashMap;

    struct MapSource(HashMap<&'static str, Vec<u8>>);

    impl ByteSource for MapSource {
        async fn bytes(&self, id: &str) -> LoadResult<Vec<u8>> {
            self.0
                .get(id)
                .cloned()
                .ok_or_else(|| LoadError::not_found(id))
        }
    }

    fn fetcher() -> DecodingFetcher<MapSource> {
        let mut map = HashMap::new();
        map.insert("good", encoded_png(6, 6));
        map.insert("bad", b"nope".to_vec());
        DecodingFetcher::new(
            MapSource(map),
            FetchLimiter::new(2).unwrap(),
            DecodeOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_fetch_decodes_source_bytes() {
        let bitmap = fetcher().fetch("good").await.unwrap();
        assert_eq!(bitmap.size(), (6, 6));
    }

    #[tokio::test]
    async fn test_source_errors_propagate() {
        let err = fetcher().fetch("absent").await.unwrap_err();
        assert_eq!(err, LoadError::not_found("absent"));
    }

    #[tokio::test]
    async fn test_decode_errors_propagate() {
        let err = fetcher().fetch("bad").await.unwrap_err();
        assert!(matches!(err, LoadError::Decode { ref id, .. } if id == "bad"));
    }

    #[tokio::test]
    async fn test_permit_released_after_fetch() {
        let fetcher = fetcher();
        fetcher.fetch("good").await.unwrap();
        let _ = fetcher.fetch("absent").await;
        assert_eq!(fetcher.limiter().in_flight(), 0);
        assert_eq!(fetcher.limiter().peak_in_flight(), 1);
    }
}
