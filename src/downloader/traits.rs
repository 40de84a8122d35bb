// Resolver capability definition

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::errors::DownloadError;
use super::models::Inspection;

/// Anything that can list a source's encodings and materialize one of them
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Name of the resolver (for logging)
    fn name(&self) -> &'static str;

    /// List the raw encodings and title for `url`
    async fn inspect(&self, url: &str) -> Result<Inspection, DownloadError>;

    /// Fetch `url` with `selector` into `destination`.
    ///
    /// `destination` is a path template whose file name may contain
    /// resolver placeholders such as `%(ext)s`. Returns the path of the
    /// materialized artifact.
    async fn fetch(
        &self,
        url: &str,
        selector: &str,
        destination: &Path,
    ) -> Result<PathBuf, DownloadError>;
}
