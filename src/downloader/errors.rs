// Error types for the fetch pipeline

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across the downloader module
pub type Result<T> = std::result::Result<T, DownloadError>;

#[derive(Debug, Error)]
pub enum DownloadError {
    /// Inspection or fetch failed, or returned nothing usable
    #[error("Resolver unavailable: {0}")]
    ResolverUnavailable(String),

    /// A cache entry or fetch result points at a file that is not on disk
    #[error("Artifact missing: {}", .0.display())]
    ArtifactMissing(PathBuf),

    /// The artifact stayed in use for every deletion attempt
    #[error("Deletion of {} blocked after {attempts} attempts", path.display())]
    DeletionBlocked { path: PathBuf, attempts: u32 },

    /// The selector no longer resolves against the remote catalog
    #[error("Format selector no longer available: {0}")]
    InvalidSelector(String),

    /// yt-dlp, ffmpeg or another external tool could not be located
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Source URL is not something a resolver can work with
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to parse resolver output
    #[error("Parse error: {0}")]
    ParseError(String),

    /// External command could not be run to completion
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// Malformed configuration value
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// Classify resolver stderr into an error variant.
    ///
    /// `selector` is the format selector that was requested, if the failing
    /// call was a fetch.
    pub fn from_resolver_output(stderr: &str, selector: Option<&str>) -> Self {
        let lower = stderr.to_lowercase();

        if let Some(selector) = selector {
            if lower.contains("requested format is not available")
                || lower.contains("format is not available")
                || lower.contains("no video formats found")
            {
                return Self::InvalidSelector(selector.to_string());
            }
        }

        if lower.contains("unsupported url") || lower.contains("is not a valid url") {
            return Self::InvalidUrl(stderr.trim().to_string());
        }

        if lower.contains("command not found") || lower.contains("no such file or directory") {
            return Self::ToolNotFound(stderr.trim().to_string());
        }

        let cause = if lower.contains("429") || lower.contains("too many requests") {
            "rate limited"
        } else if lower.contains("sign in to confirm")
            || lower.contains("not a bot")
            || lower.contains("403") {
            "blocked by remote service"
        } else if lower.contains("timed out") || lower.contains("timeout") {
            "network timeout"
        } else if lower.contains("unable to extract") || lower.contains("json") {
            "malformed page"
        } else {
            "resolver failed"
        };

        let detail = stderr.trim();
        if detail.is_empty() {
            Self::ResolverUnavailable(cause.to_string())
        } else {
            Self::ResolverUnavailable(format!("{}: {}", cause, detail))
        }
    }

    /// Whether another resolver in a fallback chain might still succeed.
    pub fn is_retryable_with_other_resolver(&self) -> bool {
        !matches!(self, Self::InvalidUrl(_))
    }

    /// I/O errors that mean "someone else still has this file open".
    pub fn is_in_use(err: &std::io::Error) -> bool {
        matches!(
            err.kind(),
            std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::ResourceBusy
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_format_is_invalid_selector() {
        let err = DownloadError::from_resolver_output(
            "ERROR: [youtube] abc: Requested format is not available. Use --list-formats",
            Some("137+140"),
        );
        assert!(matches!(err, DownloadError::InvalidSelector(ref s) if s == "137+140"));
    }

    #[test]
    fn test_unavailable_format_without_selector_is_resolver_failure() {
        let err = DownloadError::from_resolver_output("Requested format is not available", None);
        assert!(matches!(err, DownloadError::ResolverUnavailable(_)));
    }

    #[test]
    fn test_rate_limit_classification() {
        let err = DownloadError::from_resolver_output("HTTP Error 429: Too Many Requests", None);
        match err {
            DownloadError::ResolverUnavailable(msg) => assert!(msg.starts_with("rate limited")),
            other => panic!("unexpected variant: {:?}", other),
        }
    }

    #[test]
    fn test_bot_check_needs_the_full_phrase() {
        let blocked = DownloadError::from_resolver_output(
            "ERROR: [youtube] abc: Please confirm you're not a bot",
            None,
        );
        assert!(matches!(blocked, DownloadError::ResolverUnavailable(ref m) if m.starts_with("blocked")));

        let other = DownloadError::from_resolver_output("fetching robots.txt failed for both hosts", None);
        assert!(matches!(other, DownloadError::ResolverUnavailable(ref m) if m.starts_with("resolver failed")));
    }

    #[test]
    fn test_invalid_url_is_not_retried() {
        let err = DownloadError::from_resolver_output("ERROR: Unsupported URL: ftp://x", None);
        assert!(matches!(err, DownloadError::InvalidUrl(_)));
        assert!(!err.is_retryable_with_other_resolver());
    }

    #[test]
    fn test_in_use_kinds() {
        let busy = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        let gone = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(DownloadError::is_in_use(&busy));
        assert!(!DownloadError::is_in_use(&gone));
    }
}
