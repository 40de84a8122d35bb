// Downloader module - format catalog, fetch cache and artifact lifecycle

pub mod backends;
pub mod cache;
pub mod config;
pub mod errors;
pub mod format_selector;
pub mod models;
pub mod orchestrator;
pub mod ranking;
pub mod service;
pub mod sweeper;
pub mod tools;
pub mod traits;
pub mod utils;

pub use backends::{ResolverConfig, YtDlpResolver};
pub use cache::{ArtifactCache, ArtifactLease, CacheEntry};
pub use config::{ServiceConfig, SweeperConfig};
pub use errors::{DownloadError, Result};
pub use format_selector::FormatSelector;
pub use models::{FetchKey, FormatDescriptor, FormatKind, Inspection, RawEncoding};
pub use orchestrator::ResolverChain;
pub use ranking::rank;
pub use service::{Catalog, MediaService};
pub use sweeper::{sweep_directory, SweepReport, Sweeper, SweeperHandle};
pub use traits::Resolver;
