// Request-path glue: catalog listing and cached fetches

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use url::Url;

use super::cache::{ArtifactCache, ArtifactLease};
use super::config::ServiceConfig;
use super::errors::{DownloadError, Result};
use super::format_selector::FormatSelector;
use super::models::{FetchKey, FormatDescriptor};
use super::ranking::rank;
use super::sweeper::SweeperHandle;
use super::traits::Resolver;
use super::utils::output_template;

/// Ranked formats for one source URL
#[derive(Debug, Clone, Serialize)]
pub struct Catalog {
    pub title: String,
    pub formats: Vec<FormatDescriptor>,
    /// Set when inspection failed and `formats` holds only the generic entry
    pub fallback: bool,
}

impl Catalog {
    fn fallback(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            formats: vec![FormatDescriptor::fallback()],
            fallback: true,
        }
    }
}

/// Only absolute http(s) URLs are handed to resolvers
pub fn validate_url(raw: &str) -> Result<Url> {
    let parsed =
        Url::parse(raw.trim()).map_err(|e| DownloadError::InvalidUrl(format!("{}: {}", raw, e)))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        _ => Err(DownloadError::InvalidUrl(raw.to_string())),
    }
}

pub struct MediaService {
    resolver: Arc<dyn Resolver>,
    cache: ArtifactCache,
    sweeper: SweeperHandle,
    config: ServiceConfig,
}

impl MediaService {
    pub fn new(
        resolver: Arc<dyn Resolver>,
        cache: ArtifactCache,
        sweeper: SweeperHandle,
        config: ServiceConfig,
    ) -> Self {
        Self {
            resolver,
            cache,
            sweeper,
            config,
        }
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Inspect `url` and build its ranked catalog.
    ///
    /// Resolver failures and empty inspections degrade to the single
    /// fallback entry; only a malformed URL is an error.
    pub async fn catalog(&self, url: &str) -> Result<Catalog> {
        validate_url(url)?;
        let url = url.trim();

        let inspection = match self.resolver.inspect(url).await {
            Ok(inspection) => inspection,
            Err(e @ DownloadError::InvalidUrl(_)) => return Err(e),
            Err(e) => {
                tracing::warn!("[Service] inspect failed for {}: {}", url, e);
                return Ok(Catalog::fallback("Video"));
            }
        };

        if inspection.encodings.is_empty() {
            tracing::warn!("[Service] {} listed no formats", url);
            return Ok(Catalog::fallback(inspection.title));
        }

        let formats = rank(FormatSelector::normalize(&inspection.encodings));
        if formats.is_empty() {
            tracing::warn!("[Service] {} listed no usable formats", url);
            return Ok(Catalog::fallback(inspection.title));
        }
        tracing::info!(
            "[Service] {} formats for \"{}\"",
            formats.len(),
            inspection.title
        );

        Ok(Catalog {
            title: inspection.title,
            formats,
            fallback: false,
        })
    }

    /// Return the artifact for `(url, selector)`, fetching it on a cache miss.
    ///
    /// The returned lease keeps the sweeper away from the file until it is
    /// dropped.
    pub async fn fetch(&self, url: &str, selector: &str, title: Option<&str>) -> Result<ArtifactLease> {
        validate_url(url)?;
        let url = url.trim();
        let key = FetchKey::new(url, selector);
        let ttl = self.config.cache_ttl;
        let now = OffsetDateTime::now_utc();

        if let Some(lease) = self.cache.checkout(&key, now, ttl) {
            tracing::info!("[Service] cache hit: {}", lease.path().display());
            return Ok(lease);
        }
        if let Some(stale) = self.cache.remove_if_stale(&key, now, ttl) {
            tracing::debug!(
                "[Service] dropped stale entry for {}",
                stale.artifact_path.display()
            );
        }

        tokio::fs::create_dir_all(&self.config.download_dir).await?;
        let template = output_template(&self.config.download_dir, title, now);

        let path: PathBuf = self.resolver.fetch(url, selector, &template).await?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(DownloadError::ArtifactMissing(path));
        }

        let fetched_at = OffsetDateTime::now_utc();
        let lease = self.cache.lease(&path, fetched_at);
        let pruned = self.cache.prune_expired(fetched_at, ttl);
        if pruned > 0 {
            tracing::debug!("[Service] pruned {} expired cache entries", pruned);
        }
        self.cache.insert(key, &path, fetched_at);
        self.sweeper.schedule_deletion(&path, self.config.grace_period);

        tracing::info!("[Service] fetched {}", path.display());
        Ok(lease)
    }
}
