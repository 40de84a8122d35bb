pub mod downloader;

pub use downloader::{
    ArtifactCache, Catalog, DownloadError, MediaService, Resolver, ResolverChain, ServiceConfig,
    Sweeper, YtDlpResolver,
};
