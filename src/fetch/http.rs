use crate::{
    fetch::source::ByteSource,
    utils::error::{LoadError, LoadResult, LoaderResult},
};
use log::{debug, trace, warn};
use reqwest::StatusCode;
use std::time::Duration;

/// Fetches image bytes over HTTP(S).
#[derive(Clone)]
pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(timeout: Duration, user_agent: &str) -> LoaderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()?;

        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl ByteSource for HttpSource {
    async fn bytes(&self, id: &str) -> LoadResult<Vec<u8>> {
        trace!("HTTP GET {}", id);

        let response = self.client.get(id).send().await.map_err(|e| {
            warn!(
                "HTTP request for {} failed (connect: {}, timeout: {}): {}",
                id,
                e.is_connect(),
                e.is_timeout(),
                e
            );
            LoadError::fetch(id, format!("request failed: {e}"))
        })?;

        let status = response.status();
        debug!("HTTP {} from {}", status.as_u16(), id);

        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(LoadError::not_found(id));
        }
        if !status.is_success() {
            return Err(LoadError::fetch(id, format!("HTTP {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| LoadError::fetch(id, format!("failed to read body: {e}")))?;
        trace!("Read {} bytes from {}", body.len(), id);

        Ok(body.to_vec())
    }
}
