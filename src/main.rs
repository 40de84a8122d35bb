use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use media_fetch_lib::downloader::{
    sweep_directory, ArtifactCache, MediaService, ResolverChain, ResolverConfig, ServiceConfig,
    Sweeper, YtDlpResolver,
};

/// List formats of remote videos and fetch them into a managed directory
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Storage root for fetched artifacts
    #[arg(long, env = "MEDIA_FETCH_DOWNLOAD_DIR", global = true)]
    download_dir: Option<PathBuf>,

    /// Proxy URL tried before a direct connection
    #[arg(long, env = "MEDIA_FETCH_PROXY", global = true)]
    proxy: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the ranked format catalog as JSON
    Formats { url: String },
    /// Fetch one format and print the artifact path
    Fetch {
        url: String,
        /// Selector from the catalog
        #[arg(short, long, default_value = "best")]
        format: String,
        /// Title used in the file name
        #[arg(long)]
        title: Option<String>,
    },
    /// Remove artifacts older than the configured maximum age
    Sweep,
    /// Read `formats <url>` / `fetch <url> <selector>` / `quit` lines from stdin
    Session,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = ServiceConfig::from_env()?;
    if let Some(dir) = cli.download_dir.clone() {
        config = config.with_download_dir(dir);
    }
    config.validate()?;

    match cli.command {
        Command::Sweep => cmd_sweep(&config).await?,
        Command::Formats { url } => {
            with_service(config, cli.proxy, |service| async move {
                let catalog = service.catalog(&url).await?;
                println!("{}", serde_json::to_string_pretty(&catalog)?);
                Ok::<(), Box<dyn std::error::Error>>(())
            })
            .await?
        }
        Command::Fetch { url, format, title } => {
            with_service(config, cli.proxy, |service| async move {
                let lease = service.fetch(&url, &format, title.as_deref()).await?;
                println!("{}", lease.path().display());
                Ok::<(), Box<dyn std::error::Error>>(())
            })
            .await?
        }
        Command::Session => {
            with_service(config, cli.proxy, |service| async move { run_session(&service).await }).await?
        }
    }

    Ok(())
}

/// Proxied yt-dlp first when a proxy is configured, then a direct one
fn build_resolver(proxy: Option<String>) -> ResolverChain {
    let base = ResolverConfig::from_env();
    let proxy = proxy.or_else(|| base.proxy.clone());

    let mut chain = ResolverChain::new();
    if proxy.is_some() {
        chain.add_resolver(Box::new(YtDlpResolver::new(base.clone().with_proxy(proxy))));
    }
    chain.add_resolver(Box::new(YtDlpResolver::new(base.with_proxy(None))));
    chain
}

async fn with_service<F, Fut>(
    config: ServiceConfig,
    proxy: Option<String>,
    body: F,
) -> Result<(), Box<dyn std::error::Error>>
where
    F: FnOnce(Arc<MediaService>) -> Fut,
    Fut: std::future::Future<Output = Result<(), Box<dyn std::error::Error>>>,
{
    let cache = ArtifactCache::new();
    let sweeper = Sweeper::start(cache.clone(), config.sweeper_config());
    let service = Arc::new(MediaService::new(
        Arc::new(build_resolver(proxy)),
        cache,
        sweeper.handle(),
        config,
    ));

    let result = body(service).await;
    sweeper.shutdown().await;
    result
}

async fn cmd_sweep(config: &ServiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let root = config.download_dir.clone();
    let max_age = config.max_artifact_age;
    let report = tokio::task::spawn_blocking(move || {
        sweep_directory(
            &root,
            max_age,
            SystemTime::now(),
            &ArtifactCache::new(),
            &HashSet::new(),
        )
    })
    .await??;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_session(service: &MediaService) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (None, ..) => continue,
            (Some("quit"), None, ..) => break,
            (Some("formats"), Some(url), None, _) => match service.catalog(url).await {
                Ok(catalog) => println!("{}", serde_json::to_string(&catalog)?),
                Err(e) => println!("error: {}", e),
            },
            (Some("fetch"), Some(url), Some(selector), None) => {
                match service.fetch(url, selector, None).await {
                    Ok(lease) => println!("{}", lease.path().display()),
                    Err(e) => println!("error: {}", e),
                }
            }
            _ => println!("error: expected `formats <url>`, `fetch <url> <selector>` or `quit`"),
        }
    }

    Ok(())
}
