// Helper functions for resolver implementations

use std::path::{Path, PathBuf};
use std::process::Stdio;

use lazy_static::lazy_static;
use regex::Regex;
use time::macros::format_description;
use time::OffsetDateTime;
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::time::{timeout, Duration as TokioDuration};

use super::errors::DownloadError;

lazy_static! {
    static ref UNSAFE_FILENAME_CHARS: Regex = Regex::new(r#"[\\/*?:"<>|]"#).unwrap();
}

/// Extensions probed when the resolver does not report the final file name
pub const PROBE_EXTENSIONS: [&str; 5] = ["mp4", "webm", "mkv", "m4a", "mp3"];

/// Run command with timeout (shared utility)
pub async fn run_output_with_timeout(
    program: &str,
    args: Vec<String>,
    timeout_secs: u64,
) -> Result<std::process::Output, DownloadError> {
    let mut child = TokioCommand::new(program)
        .args(&args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => DownloadError::ToolNotFound(program.to_string()),
            _ => DownloadError::ExecutionError(format!("Failed to start {}: {}", program, e)),
        })?;

    let mut stdout_pipe = child.stdout.take().ok_or_else(|| {
        DownloadError::ExecutionError(format!("Failed to capture stdout from {}", program))
    })?;
    let mut stderr_pipe = child.stderr.take().ok_or_else(|| {
        DownloadError::ExecutionError(format!("Failed to capture stderr from {}", program))
    })?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe.read_to_end(&mut buf).await?;
        Ok::<Vec<u8>, std::io::Error>(buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe.read_to_end(&mut buf).await?;
        Ok::<Vec<u8>, std::io::Error>(buf)
    });

    let waited = timeout(TokioDuration::from_secs(timeout_secs), child.wait()).await;
    match waited {
        Ok(status_res) => {
            let status = status_res?;
            let stdout = stdout_task
                .await
                .map_err(|e| DownloadError::ExecutionError(format!("stdout task failed: {}", e)))??;
            let stderr = stderr_task
                .await
                .map_err(|e| DownloadError::ExecutionError(format!("stderr task failed: {}", e)))??;
            Ok(std::process::Output { status, stdout, stderr })
        }
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(DownloadError::ResolverUnavailable(format!(
                "network timeout: {} timed out after {}s",
                program, timeout_secs
            )))
        }
    }
}

/// Strip characters that are not allowed in file names on common platforms
pub fn sanitize_filename(name: &str) -> String {
    let cleaned = UNSAFE_FILENAME_CHARS.replace_all(name, "");
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "video".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Build the resolver output template for a fetch.
///
/// `<dir>/<title>_<YYYYmmdd_HHMMSS>_%(format_id)s.%(ext)s`, where `<title>`
/// is the sanitized title or the resolver's own `%(title)s` placeholder.
pub fn output_template(dir: &Path, title: Option<&str>, now: OffsetDateTime) -> PathBuf {
    let stamp = now
        .format(format_description!("[year][month][day]_[hour][minute][second]"))
        .unwrap_or_else(|_| now.unix_timestamp().to_string());
    let title = match title {
        Some(title) => sanitize_filename(title),
        None => "%(title)s".to_string(),
    };
    dir.join(format!("{}_{}_%(format_id)s.%(ext)s", title, stamp))
}

/// Find a file produced from `template` when the resolver did not report it.
///
/// Replaces `%(ext)s` with each of [`PROBE_EXTENSIONS`] and returns the first
/// that exists.
pub fn probe_artifact(template: &Path) -> Option<PathBuf> {
    let template = template.to_string_lossy();
    PROBE_EXTENSIONS
        .iter()
        .map(|ext| PathBuf::from(template.replace("%(ext)s", ext)))
        .find(|candidate| candidate.is_file())
}

/// Build proxy arguments for yt-dlp
pub fn get_proxy_args(proxy: Option<&str>) -> Vec<String> {
    let mut args = Vec::new();

    if let Some(proxy) = proxy {
        args.push("--proxy".to_string());
        args.push(proxy.to_string());
    }

    args
}

/// Build timeout arguments for yt-dlp
pub fn get_timeout_args(socket_timeout: Option<u64>) -> Vec<String> {
    let mut args = Vec::new();

    if let Some(timeout) = socket_timeout {
        args.push("--socket-timeout".to_string());
        args.push(timeout.to_string());
    }

    args
}
