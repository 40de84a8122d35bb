// Resolver chain with fallback logic

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::errors::DownloadError;
use super::models::Inspection;
use super::traits::Resolver;

/// Ordered list of resolvers, tried in sequence until one succeeds
pub struct ResolverChain {
    resolvers: Vec<Box<dyn Resolver>>,
}

impl ResolverChain {
    pub fn new() -> Self {
        Self {
            resolvers: Vec::new(),
        }
    }

    pub fn add_resolver(&mut self, resolver: Box<dyn Resolver>) {
        self.resolvers.push(resolver);
    }

    pub fn with_resolver(mut self, resolver: Box<dyn Resolver>) -> Self {
        self.add_resolver(resolver);
        self
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

impl Default for ResolverChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resolver for ResolverChain {
    fn name(&self) -> &'static str {
        "chain"
    }

    async fn inspect(&self, url: &str) -> Result<Inspection, DownloadError> {
        let mut failures = Vec::new();

        for resolver in &self.resolvers {
            tracing::debug!("[ResolverChain] inspecting with {}", resolver.name());

            match resolver.inspect(url).await {
                Ok(inspection) if !inspection.encodings.is_empty() => {
                    tracing::info!(
                        "[ResolverChain] {} listed {} encodings",
                        resolver.name(),
                        inspection.encodings.len()
                    );
                    return Ok(inspection);
                }
                Ok(_) => {
                    tracing::warn!("[ResolverChain] {} returned no formats", resolver.name());
                    failures.push(format!("{}: no formats", resolver.name()));
                }
                Err(e) if !e.is_retryable_with_other_resolver() => return Err(e),
                Err(e) => {
                    tracing::warn!("[ResolverChain] {} inspect failed: {}", resolver.name(), e);
                    failures.push(format!("{}: {}", resolver.name(), e));
                }
            }
        }

        Err(unavailable(failures))
    }

    async fn fetch(
        &self,
        url: &str,
        selector: &str,
        destination: &Path,
    ) -> Result<PathBuf, DownloadError> {
        let mut failures = Vec::new();
        let mut invalid_selector = false;

        for resolver in &self.resolvers {
            tracing::debug!("[ResolverChain] fetching {} with {}", selector, resolver.name());

            match resolver.fetch(url, selector, destination).await {
                Ok(path) => {
                    tracing::info!(
                        "[ResolverChain] {} fetched {}",
                        resolver.name(),
                        path.display()
                    );
                    return Ok(path);
                }
                Err(e) if !e.is_retryable_with_other_resolver() => return Err(e),
                Err(e) => {
                    tracing::warn!("[ResolverChain] {} fetch failed: {}", resolver.name(), e);
                    invalid_selector |= matches!(e, DownloadError::InvalidSelector(_));
                    failures.push(format!("{}: {}", resolver.name(), e));
                }
            }
        }

        if invalid_selector {
            Err(DownloadError::InvalidSelector(selector.to_string()))
        } else {
            Err(unavailable(failures))
        }
    }
}

fn unavailable(failures: Vec<String>) -> DownloadError {
    if failures.is_empty() {
        DownloadError::ResolverUnavailable("no resolvers configured".to_string())
    } else {
        DownloadError::ResolverUnavailable(format!("all resolvers failed: {}", failures.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::models::RawEncoding;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    enum Behavior {
        Succeed,
        Empty,
        Unavailable,
        BadSelector,
        BadUrl,
    }

    struct StubResolver {
        name: &'static str,
        behavior: Behavior,
        calls: Arc<AtomicUsize>,
    }

    impl StubResolver {
        fn boxed(name: &'static str, behavior: Behavior, calls: &Arc<AtomicUsize>) -> Box<dyn Resolver> {
            Box::new(Self {
                name,
                behavior,
                calls: Arc::clone(calls),
            })
        }

        fn outcome<T>(&self, ok: T) -> Result<T, DownloadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Succeed | Behavior::Empty => Ok(ok),
                Behavior::Unavailable => Err(DownloadError::ResolverUnavailable("blocked".into())),
                Behavior::BadSelector => Err(DownloadError::InvalidSelector("137+140".into())),
                Behavior::BadUrl => Err(DownloadError::InvalidUrl("nope".into())),
            }
        }
    }

    #[async_trait]
    impl Resolver for StubResolver {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn inspect(&self, _url: &str) -> Result<Inspection, DownloadError> {
            let encodings = match self.behavior {
                Behavior::Empty => Vec::new(),
                _ => vec![RawEncoding {
                    selector: "18".to_string(),
                    ..Default::default()
                }],
            };
            self.outcome(Inspection {
                title: self.name.to_string(),
                encodings,
            })
        }

        async fn fetch(
            &self,
            _url: &str,
            _selector: &str,
            destination: &Path,
        ) -> Result<PathBuf, DownloadError> {
            self.outcome(destination.with_file_name(format!("{}.mp4", self.name)))
        }
    }

    #[tokio::test]
    async fn test_inspect_falls_back_past_failures_and_empty_lists() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = ResolverChain::new()
            .with_resolver(StubResolver::boxed("proxy", Behavior::Unavailable, &calls))
            .with_resolver(StubResolver::boxed("primary", Behavior::Empty, &calls))
            .with_resolver(StubResolver::boxed("secondary", Behavior::Succeed, &calls));

        let inspection = chain.inspect("https://youtu.be/abc").await.unwrap();
        assert_eq!(inspection.title, "secondary");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fetch_stops_at_first_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = ResolverChain::new()
            .with_resolver(StubResolver::boxed("primary", Behavior::Succeed, &calls))
            .with_resolver(StubResolver::boxed("secondary", Behavior::Succeed, &calls));

        let path = chain
            .fetch("https://youtu.be/abc", "22", Path::new("/tmp/out.%(ext)s"))
            .await
            .unwrap();
        assert_eq!(path, PathBuf::from("/tmp/primary.mp4"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_selector_surfaces_when_all_fail() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = ResolverChain::new()
            .with_resolver(StubResolver::boxed("primary", Behavior::BadSelector, &calls))
            .with_resolver(StubResolver::boxed("secondary", Behavior::Unavailable, &calls));

        let err = chain
            .fetch("https://youtu.be/abc", "137+140", Path::new("/tmp/out.%(ext)s"))
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::InvalidSelector(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalid_url_short_circuits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = ResolverChain::new()
            .with_resolver(StubResolver::boxed("primary", Behavior::BadUrl, &calls))
            .with_resolver(StubResolver::boxed("secondary", Behavior::Succeed, &calls));

        let err = chain.inspect("ftp://example").await.unwrap_err();
        assert!(matches!(err, DownloadError::InvalidUrl(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_chain_is_unavailable() {
        let err = ResolverChain::new().inspect("https://youtu.be/abc").await.unwrap_err();
        assert!(matches!(err, DownloadError::ResolverUnavailable(_)));
    }
}
