// Lifecycle sweeper - delayed artifact deletion and periodic directory sweeps
//
// One background task owns every pending deletion. Jobs sit in a DelayQueue
// until their grace period elapses; a job whose artifact is still in use goes
// back into the queue with the retry delay until the attempt budget runs out.
// The same task sweeps the storage root for files older than the maximum age,
// skipping paths that have a deletion job pending.
//
// Every deletion goes through `ArtifactCache::retire_artifact`, so the file
// and its cache entries disappear together.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::future::poll_fn;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::time::{delay_queue, DelayQueue};

use super::cache::{ArtifactCache, Retirement};
use super::config::SweeperConfig;
use super::errors::{DownloadError, Result};

#[derive(Debug)]
enum SweeperCommand {
    Schedule { path: PathBuf, grace: Duration },
}

/// Cheap, cloneable entry point used by the request path
#[derive(Debug, Clone)]
pub struct SweeperHandle {
    tx: mpsc::UnboundedSender<SweeperCommand>,
}

impl SweeperHandle {
    /// Schedule one deletion of `path` once `grace_period` has elapsed.
    ///
    /// Scheduling a path that already has a pending job pushes that job's
    /// deadline out instead of adding a second one.
    pub fn schedule_deletion(&self, path: impl Into<PathBuf>, grace_period: Duration) {
        let path = path.into();
        let command = SweeperCommand::Schedule {
            path,
            grace: grace_period,
        };
        if let Err(mpsc::error::SendError(SweeperCommand::Schedule { path, .. })) = self.tx.send(command) {
            tracing::warn!(
                "[Sweeper] not running; {} is left to the directory sweep",
                path.display()
            );
        }
    }
}

/// Running sweeper task
pub struct Sweeper {
    handle: SweeperHandle,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn the sweeper on the current Tokio runtime.
    pub fn start(cache: ArtifactCache, config: SweeperConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let worker = SweeperWorker {
            cache,
            config,
            queue: DelayQueue::new(),
            pending: HashMap::new(),
        };
        let task = tokio::spawn(worker.run(rx, cancel.clone()));

        Self {
            handle: SweeperHandle { tx },
            cancel,
            task,
        }
    }

    pub fn handle(&self) -> SweeperHandle {
        self.handle.clone()
    }

    /// Stop the task. Pending deletions are abandoned; the next process's
    /// directory sweep picks the files up once they are old enough.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!("[Sweeper] task ended abnormally: {}", e);
        }
    }
}

#[derive(Debug)]
struct DeletionJob {
    path: PathBuf,
    /// Attempts already made
    attempts: u32,
}

struct SweeperWorker {
    cache: ArtifactCache,
    config: SweeperConfig,
    queue: DelayQueue<DeletionJob>,
    pending: HashMap<PathBuf, delay_queue::Key>,
}

impl SweeperWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SweeperCommand>, cancel: CancellationToken) {
        let period = self.config.sweep_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut accepting = true;

        tracing::info!(
            "[Sweeper] started for {} (max age {:?}, sweep every {:?})",
            self.config.storage_root.display(),
            self.config.max_age,
            self.config.sweep_interval
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                command = rx.recv(), if accepting => match command {
                    Some(SweeperCommand::Schedule { path, grace }) => self.schedule(path, grace),
                    None => accepting = false,
                },
                Some(expired) = poll_fn(|cx| self.queue.poll_expired(cx)) => {
                    let job = expired.into_inner();
                    self.pending.remove(&job.path);
                    self.attempt_deletion(job);
                }
                _ = ticker.tick() => self.sweep().await,
            }

            // every handle is gone: finish what is queued, then stop
            if !accepting && self.queue.is_empty() {
                break;
            }
        }

        tracing::info!("[Sweeper] stopped with {} pending deletions", self.pending.len());
    }

    fn schedule(&mut self, path: PathBuf, grace: Duration) {
        if let Some(key) = self.pending.get(&path) {
            self.queue.reset(key, grace);
            tracing::debug!("[Sweeper] rescheduled {} in {:?}", path.display(), grace);
            return;
        }
        tracing::debug!("[Sweeper] scheduled {} in {:?}", path.display(), grace);
        self.enqueue(DeletionJob { path, attempts: 0 }, grace);
    }

    fn enqueue(&mut self, job: DeletionJob, delay: Duration) {
        let path = job.path.clone();
        let key = self.queue.insert(job, delay);
        self.pending.insert(path, key);
    }

    fn attempt_deletion(&mut self, job: DeletionJob) {
        let attempts = job.attempts + 1;

        let blocked_by = match self.cache.retire_artifact(&job.path, remove_if_present) {
            Ok(Retirement::Retired(keys)) => {
                tracing::info!(
                    "[Sweeper] deleted {} ({} cache entries dropped)",
                    job.path.display(),
                    keys.len()
                );
                return;
            }
            Ok(Retirement::InUse(count)) => format!("{} open leases", count),
            Err(e) if DownloadError::is_in_use(&e) => format!("file locked: {}", e),
            Err(e) => format!("delete failed: {}", e),
        };

        if attempts < self.config.max_attempts {
            tracing::warn!(
                "[Sweeper] {} still in use ({}), retry {}/{} in {:?}",
                job.path.display(),
                blocked_by,
                attempts,
                self.config.max_attempts,
                self.config.retry_delay
            );
            let delay = self.config.retry_delay;
            self.enqueue(
                DeletionJob {
                    path: job.path,
                    attempts,
                },
                delay,
            );
        } else {
            let err = DownloadError::DeletionBlocked {
                path: job.path,
                attempts,
            };
            tracing::error!("[Sweeper] giving up: {} ({})", err, blocked_by);
        }
    }

    async fn sweep(&mut self) {
        let skip: HashSet<PathBuf> = self.pending.keys().cloned().collect();
        let cache = self.cache.clone();
        let root = self.config.storage_root.clone();
        let max_age = self.config.max_age;

        let result = tokio::task::spawn_blocking(move || {
            sweep_directory(&root, max_age, SystemTime::now(), &cache, &skip)
        })
        .await;

        match result {
            Ok(Ok(report)) if report.removed > 0 || report.failed > 0 => {
                tracing::info!(
                    "[Sweeper] sweep removed {} files, skipped {}, failed {}",
                    report.removed,
                    report.skipped,
                    report.failed
                );
            }
            Ok(Ok(_)) => tracing::debug!("[Sweeper] sweep found nothing to remove"),
            Ok(Err(e)) => tracing::warn!("[Sweeper] sweep failed: {}", e),
            Err(e) => tracing::error!("[Sweeper] sweep task panicked: {}", e),
        }
    }
}

/// Counters from one directory sweep
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub removed: usize,
    /// Files left alone because a job is pending or a lease is open
    pub skipped: usize,
    pub failed: usize,
    pub cache_entries_dropped: usize,
}

/// Remove every file under `root` older than `max_age`, except paths in `skip`
/// and artifacts with open leases.
///
/// Errors on individual files are counted and logged; only failing to read
/// `root` itself is returned as an error.
pub fn sweep_directory(
    root: &Path,
    max_age: Duration,
    now: SystemTime,
    cache: &ArtifactCache,
    skip: &HashSet<PathBuf>,
) -> Result<SweepReport> {
    let mut report = SweepReport::default();
    if !root.exists() {
        return Ok(report);
    }

    let mut dirs = vec![root.to_path_buf()];
    let mut first = true;
    while let Some(dir) = dirs.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if first => return Err(DownloadError::Io(e)),
            Err(e) => {
                tracing::warn!("[Sweeper] cannot read {}: {}", dir.display(), e);
                report.failed += 1;
                continue;
            }
        };
        first = false;

        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                report.failed += 1;
                continue;
            };
            if file_type.is_dir() {
                dirs.push(path);
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            if skip.contains(&path) {
                report.skipped += 1;
                continue;
            }

            match file_age(&path, now) {
                Ok(age) if age > max_age => {}
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!("[Sweeper] cannot stat {}: {}", path.display(), e);
                    report.failed += 1;
                    continue;
                }
            }

            match cache.retire_artifact(&path, remove_if_present) {
                Ok(Retirement::Retired(keys)) => {
                    tracing::debug!("[Sweeper] expired {}", path.display());
                    report.removed += 1;
                    report.cache_entries_dropped += keys.len();
                }
                Ok(Retirement::InUse(_)) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!("[Sweeper] cannot remove {}: {}", path.display(), e);
                    report.failed += 1;
                }
            }
        }
    }

    Ok(report)
}

/// Age from creation time, falling back to modification time on
/// filesystems that do not record creation.
fn file_age(path: &Path, now: SystemTime) -> io::Result<Duration> {
    let metadata = fs::metadata(path)?;
    let born = metadata.created().or_else(|_| metadata.modified())?;
    Ok(now.duration_since(born).unwrap_or(Duration::ZERO))
}

/// An artifact that is already gone counts as deleted.
fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!("[Sweeper] {} already removed", path.display());
            Ok(())
        }
        other => other,
    }
}
