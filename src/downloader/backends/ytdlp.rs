// yt-dlp Resolver - drives the native `yt-dlp` binary
//
// inspect: `--dump-json`, parsed into raw encodings
// fetch:   `-f <selector> -o <template> --print after_move:filepath`

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::downloader::errors::DownloadError;
use crate::downloader::format_selector::{FormatSelector, MERGED_CONTAINER};
use crate::downloader::models::{Inspection, RawEncoding};
use crate::downloader::tools::{ToolManager, ToolType};
use crate::downloader::traits::Resolver;
use crate::downloader::utils::{
    get_proxy_args, get_timeout_args, probe_artifact, run_output_with_timeout,
};

/// Options passed to every yt-dlp invocation
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverConfig {
    /// SOCKS5/HTTP proxy URL
    pub proxy: Option<String>,
    /// Path to cookies.txt file
    pub cookies_path: Option<PathBuf>,
    /// Browser to borrow cookies from (chrome, firefox, ...)
    pub cookies_from_browser: Option<String>,
    /// yt-dlp `--socket-timeout` in seconds
    pub socket_timeout_secs: u64,
    /// Wall-clock limit for an inspect call
    pub inspect_timeout_secs: u64,
    /// Wall-clock limit for a fetch call
    pub fetch_timeout_secs: u64,
    /// Container for merged video+audio output
    pub merge_container: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            cookies_path: None,
            cookies_from_browser: None,
            socket_timeout_secs: 30,
            inspect_timeout_secs: 60,
            fetch_timeout_secs: 1800,
            merge_container: MERGED_CONTAINER.to_string(),
        }
    }
}

impl ResolverConfig {
    /// Defaults overridden by `MEDIA_FETCH_PROXY`, `MEDIA_FETCH_COOKIES`
    /// and `MEDIA_FETCH_COOKIES_BROWSER`
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        Self::default()
            .with_proxy(var("MEDIA_FETCH_PROXY"))
            .with_cookies_path(var("MEDIA_FETCH_COOKIES").map(PathBuf::from))
            .with_cookies_from_browser(var("MEDIA_FETCH_COOKIES_BROWSER"))
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_cookies_path(mut self, path: Option<PathBuf>) -> Self {
        self.cookies_path = path;
        self
    }

    pub fn with_cookies_from_browser(mut self, browser: Option<String>) -> Self {
        self.cookies_from_browser = browser;
        self
    }

    pub fn with_socket_timeout(mut self, seconds: u64) -> Self {
        self.socket_timeout_secs = seconds;
        self
    }

    pub fn with_timeouts(mut self, inspect_secs: u64, fetch_secs: u64) -> Self {
        self.inspect_timeout_secs = inspect_secs;
        self.fetch_timeout_secs = fetch_secs;
        self
    }
}

/// Resolver backed by the yt-dlp binary
pub struct YtDlpResolver {
    config: ResolverConfig,
    tools: ToolManager,
}

impl YtDlpResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            tools: ToolManager::new(),
        }
    }

    pub fn with_tools(mut self, tools: ToolManager) -> Self {
        self.tools = tools;
        self
    }

    fn is_youtube(url: &str) -> bool {
        let lower = url.to_lowercase();
        lower.contains("youtube.com") || lower.contains("youtu.be")
    }

    /// YouTube player clients to try, in order
    fn player_clients(&self, url: &str) -> Vec<Option<&'static str>> {
        if !Self::is_youtube(url) {
            return vec![None];
        }
        if self.config.cookies_path.is_some() || self.config.cookies_from_browser.is_some() {
            // With cookies, prefer web client
            vec![Some("web"), Some("android")]
        } else {
            vec![Some("android"), Some("tv"), Some("web")]
        }
    }

    /// Arguments shared by inspect and fetch
    fn common_args(&self) -> Vec<String> {
        let mut args = vec!["--no-playlist".to_string(), "--no-warnings".to_string()];
        args.extend(get_timeout_args(Some(self.config.socket_timeout_secs)));

        if let Some(path) = &self.config.cookies_path {
            args.push("--cookies".to_string());
            args.push(path.to_string_lossy().into_owned());
        } else if let Some(browser) = &self.config.cookies_from_browser {
            args.push("--cookies-from-browser".to_string());
            args.push(browser.clone());
        }

        args.extend(get_proxy_args(self.config.proxy.as_deref()));
        args
    }

    fn build_inspect_args(&self, url: &str, client: Option<&str>) -> Vec<String> {
        let mut args = vec!["--dump-json".to_string()];
        args.extend(self.common_args());

        if let Some(client) = client {
            args.push("--extractor-args".to_string());
            args.push(format!("youtube:player_client={}", client));
        }

        args.push(url.to_string());
        args
    }

    fn build_fetch_args(
        &self,
        url: &str,
        selector: &str,
        destination: &Path,
        ffmpeg: Option<&Path>,
    ) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            selector.to_string(),
            "-o".to_string(),
            destination.to_string_lossy().into_owned(),
            "--print".to_string(),
            "after_move:filepath".to_string(),
            "--no-progress".to_string(),
        ];
        args.extend(self.common_args());

        if let Some(ffmpeg) = ffmpeg {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg.to_string_lossy().into_owned());
            args.push("--merge-output-format".to_string());
            args.push(self.config.merge_container.clone());
        }

        args.push(url.to_string());
        args
    }

    /// Parse a `--dump-json` document
    fn parse_json(stdout: &[u8]) -> Result<Inspection, DownloadError> {
        let json_str = String::from_utf8_lossy(stdout);
        let json: serde_json::Value = serde_json::from_str(&json_str)
            .map_err(|e| DownloadError::ParseError(format!("Invalid JSON: {}", e)))?;

        let formats_array = json["formats"]
            .as_array()
            .ok_or_else(|| DownloadError::ParseError("No formats array in JSON".to_string()))?;

        let encodings = formats_array
            .iter()
            .filter_map(|f| {
                let selector = f["format_id"].as_str()?.to_string();
                Some(RawEncoding {
                    selector,
                    container: f["ext"].as_str().unwrap_or("").to_string(),
                    video_codec: f["vcodec"].as_str().map(|s| s.to_string()),
                    audio_codec: f["acodec"].as_str().map(|s| s.to_string()),
                    height: f["height"].as_u64().map(|h| h as u32),
                    width: f["width"].as_u64().map(|w| w as u32),
                    bitrate_kbps: f["tbr"].as_f64().or_else(|| f["abr"].as_f64()),
                    approx_size: as_size(&f["filesize"]).or_else(|| as_size(&f["filesize_approx"])),
                })
            })
            .collect();

        Ok(Inspection {
            title: json["title"].as_str().unwrap_or("video").to_string(),
            encodings,
        })
    }

    /// Path of the produced artifact.
    ///
    /// Uses the path yt-dlp printed when it exists, otherwise probes the
    /// known extensions around it (or around `destination`).
    fn resolve_artifact(stdout: &[u8], destination: &Path, selector: &str) -> Result<PathBuf, DownloadError> {
        let printed = String::from_utf8_lossy(stdout)
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(PathBuf::from);

        if let Some(path) = &printed {
            if path.is_file() {
                return Ok(path.clone());
            }
        }

        let template = match &printed {
            Some(path) => path.with_extension("%(ext)s"),
            None => PathBuf::from(
                destination
                    .to_string_lossy()
                    .replace("%(format_id)s", selector),
            ),
        };

        probe_artifact(&template).ok_or_else(|| {
            DownloadError::ArtifactMissing(printed.unwrap_or_else(|| destination.to_path_buf()))
        })
    }
}

fn as_size(value: &serde_json::Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|v| *v >= 0.0).map(|v| v.round() as u64))
}

impl Default for YtDlpResolver {
    fn default() -> Self {
        Self::new(ResolverConfig::default())
    }
}

#[async_trait]
impl Resolver for YtDlpResolver {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn inspect(&self, url: &str) -> Result<Inspection, DownloadError> {
        let ytdlp = self.tools.locate(ToolType::YtDlp)?;
        let ytdlp = ytdlp.to_string_lossy();
        let mut last_error = DownloadError::ResolverUnavailable("no player clients to try".to_string());

        for client in self.player_clients(url) {
            let args = self.build_inspect_args(url, client);
            tracing::debug!("[YtDlp] inspect: {} {}", ytdlp, args.join(" "));

            match run_output_with_timeout(&ytdlp, args, self.config.inspect_timeout_secs).await {
                Ok(out) if out.status.success() => {
                    tracing::info!("[YtDlp] inspect succeeded (client {:?})", client);
                    return Self::parse_json(&out.stdout);
                }
                Ok(out) => {
                    let stderr = String::from_utf8_lossy(&out.stderr);
                    tracing::warn!("[YtDlp] client {:?} failed: {}", client, stderr.trim());
                    last_error = DownloadError::from_resolver_output(&stderr, None);
                    if !last_error.is_retryable_with_other_resolver() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("[YtDlp] client {:?} error: {}", client, e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    async fn fetch(
        &self,
        url: &str,
        selector: &str,
        destination: &Path,
    ) -> Result<PathBuf, DownloadError> {
        let ffmpeg = if FormatSelector::requires_merge(selector) {
            Some(self.tools.locate(ToolType::Ffmpeg)?)
        } else {
            None
        };
        let ytdlp = self.tools.locate(ToolType::YtDlp)?;
        let ytdlp = ytdlp.to_string_lossy();

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let args = self.build_fetch_args(url, selector, destination, ffmpeg.as_deref());
        tracing::info!("[YtDlp] fetching {} with selector {}", url, selector);
        tracing::debug!("[YtDlp] fetch: {} {}", ytdlp, args.join(" "));

        let out = run_output_with_timeout(&ytdlp, args, self.config.fetch_timeout_secs).await?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            tracing::warn!("[YtDlp] fetch failed: {}", stderr.trim());
            return Err(DownloadError::from_resolver_output(&stderr, Some(selector)));
        }

        Self::resolve_artifact(&out.stdout, destination, selector)
    }
}
