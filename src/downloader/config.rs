// Service and sweeper configuration

use std::path::PathBuf;
use std::time::Duration;

use super::errors::{DownloadError, Result};

/// Settings for the request path, the artifact cache and the sweeper
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Managed storage root; every artifact lands under it
    pub download_dir: PathBuf,
    /// Lifetime of a cache entry, measured from the first fetch
    pub cache_ttl: Duration,
    /// Time an artifact is assumed to still be in transfer after a fetch
    pub grace_period: Duration,
    /// Delay between deletion attempts while the artifact is in use
    pub retry_delay: Duration,
    /// Deletion attempts before giving up on an artifact
    pub max_delete_attempts: u32,
    /// How often the full directory sweep runs
    pub sweep_interval: Duration,
    /// Files older than this are removed by the directory sweep
    pub max_artifact_age: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            download_dir: dirs::download_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("media-fetch"),
            cache_ttl: Duration::from_secs(300),
            grace_period: Duration::from_secs(120),
            retry_delay: Duration::from_secs(60),
            max_delete_attempts: 10,
            sweep_interval: Duration::from_secs(600),
            max_artifact_age: Duration::from_secs(3600),
        }
    }
}

impl ServiceConfig {
    /// Defaults overlaid with `MEDIA_FETCH_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("MEDIA_FETCH_DOWNLOAD_DIR") {
            config.download_dir = PathBuf::from(dir);
        }
        if let Some(secs) = env_u64("MEDIA_FETCH_CACHE_TTL_SECS")? {
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("MEDIA_FETCH_GRACE_SECS")? {
            config.grace_period = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("MEDIA_FETCH_RETRY_DELAY_SECS")? {
            config.retry_delay = Duration::from_secs(secs);
        }
        if let Some(attempts) = env_u64("MEDIA_FETCH_MAX_DELETE_ATTEMPTS")? {
            config.max_delete_attempts = u32::try_from(attempts).map_err(|_| {
                DownloadError::Config(format!("MEDIA_FETCH_MAX_DELETE_ATTEMPTS out of range: {}", attempts))
            })?;
        }
        if let Some(secs) = env_u64("MEDIA_FETCH_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("MEDIA_FETCH_MAX_AGE_SECS")? {
            config.max_artifact_age = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    pub fn with_retry(mut self, delay: Duration, max_attempts: u32) -> Self {
        self.retry_delay = delay;
        self.max_delete_attempts = max_attempts;
        self
    }

    pub fn with_sweep(mut self, interval: Duration, max_age: Duration) -> Self {
        self.sweep_interval = interval;
        self.max_artifact_age = max_age;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_delete_attempts == 0 {
            return Err(DownloadError::Config(
                "max_delete_attempts must be at least 1".to_string(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(DownloadError::Config(
                "sweep_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn sweeper_config(&self) -> SweeperConfig {
        SweeperConfig {
            storage_root: self.download_dir.clone(),
            retry_delay: self.retry_delay,
            max_attempts: self.max_delete_attempts,
            sweep_interval: self.sweep_interval,
            max_age: self.max_artifact_age,
        }
    }
}

/// Settings for the lifecycle sweeper
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub storage_root: PathBuf,
    pub retry_delay: Duration,
    pub max_attempts: u32,
    pub sweep_interval: Duration,
    pub max_age: Duration,
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| DownloadError::Config(format!("{}={:?}: {}", name, raw, e))),
        Err(_) => Ok(None),
    }
}
