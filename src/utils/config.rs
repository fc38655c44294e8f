use crate::{
    image::{loader::DecodeOptions, transform::ScalingMode},
    utils::error::{LoaderError, LoaderResult},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_CAPACITY: usize = 256;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_USER_AGENT: &str = concat!("imageloader/", env!("CARGO_PKG_VERSION"));

/// Settings for one coordinator and the fetcher behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Maximum number of cached bitmaps; `None` keeps everything.
    pub capacity: Option<usize>,
    #[serde(with = "opt_secs")]
    pub time_to_live: Option<Duration>,
    pub max_concurrent_fetches: usize,
    #[serde(with = "secs")]
    pub request_timeout: Duration,
    pub user_agent: String,
    pub max_dimension: Option<(u32, u32)>,
    pub scaling: ScalingMode,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            capacity: Some(DEFAULT_CAPACITY),
            time_to_live: None,
            max_concurrent_fetches: num_cpus::get() * 4,
            request_timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_dimension: None,
            scaling: ScalingMode::default(),
        }
    }
}

impl LoaderConfig {
    pub fn builder() -> LoaderConfigBuilder {
        LoaderConfigBuilder::new()
    }

    pub fn validate(&self) -> LoaderResult<()> {
        if self.capacity == Some(0) {
            return Err(LoaderError::InvalidConfig(
                "capacity must be greater than zero".into(),
            ));
        }
        if self.time_to_live == Some(Duration::ZERO) {
            return Err(LoaderError::InvalidConfig(
                "time_to_live must be greater than zero".into(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(LoaderError::InvalidConfig(
                "request_timeout must be greater than zero".into(),
            ));
        }
        if self.max_concurrent_fetches == 0 {
            return Err(LoaderError::InvalidConfig(
                "max_concurrent_fetches must be greater than zero".into(),
            ));
        }
        if let Some((w, h)) = self.max_dimension {
            if w == 0 || h == 0 {
                return Err(LoaderError::InvalidConfig(format!(
                    "max_dimension {w}x{h} must be non-zero"
                )));
            }
        }
        Ok(())
    }

    pub fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            max_size: self.max_dimension,
            scaling: self.scaling,
        }
    }
}

pub struct LoaderConfigBuilder {
    config: LoaderConfig,
}

impl LoaderConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: LoaderConfig::default(),
        }
    }

    pub fn capacity(mut self, capacity: Option<usize>) -> Self {
        self.config.capacity = capacity;
        self
    }

    pub fn time_to_live(mut self, ttl: Option<Duration>) -> Self {
        self.config.time_to_live = ttl;
        self
    }

    pub fn max_concurrent_fetches(mut self, max: usize) -> Self {
        self.config.max_concurrent_fetches = max;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn max_dimension(mut self, width: u32, height: u32) -> Self {
        self.config.max_dimension = Some((width, height));
        self
    }

    pub fn scaling(mut self, scaling: ScalingMode) -> Self {
        self.config.scaling = scaling;
        self
    }

    pub fn build(self) -> LoaderResult<LoaderConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for LoaderConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// Durations are written as fractional seconds so sub-second values survive.
mod secs {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

mod opt_secs {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(d)?
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(D::Error::custom))
            .transpose()
    }
}
