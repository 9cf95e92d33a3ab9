//! mealcache - drive the offline cache layer from the command line.
//!
//! Install and activate the current build's static manifest, fetch URLs
//! through the caching strategies, replay deferred sync tags and inspect the
//! tiers on disk.

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Method, Url};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mealcache_core::sync::DEFAULT_TAGS;
use mealcache_core::{
    CacheConfig, CacheLayer, FsBackend, HttpFetcher, Request, SyncHandler, SyncQueue, SyncTaskDispatcher,
};

// ============================================================================
// Constants
// ============================================================================

/// Subdirectory of the cache directory holding tier data
const TIERS_DIR: &str = "tiers";

/// Subdirectory of the cache directory holding rotated log files
const LOG_DIR: &str = "logs";

/// Backend path deferred sync tags are replayed to, relative to the origin
const SYNC_ENDPOINT: &str = "/api/sync/";

const USAGE: &str = "\
Usage: mealcache <command> [args]

Commands:
  install               Fetch the static manifest for the configured version
  activate              Install if needed, then remove other versions and trim tiers
  fetch <url> [accept]  Serve a GET request through the cache layer
  sync [tag...]         Queue sync tags and deliver everything pending
  status                Show tier sizes and freshness

Environment:
  MEALCACHE_ORIGIN      Origin the static manifest is resolved against
  MEALCACHE_VERSION     Version tag of this build
  RUST_LOG              Log filter (default: warn)";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr, filtered by `RUST_LOG` (default `warn`), and to a daily
/// rotated file under `log_dir` when one is available. The returned guard
/// must be held until exit so buffered file output is flushed.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mealcache.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprintln!("{}", USAGE);
        return Ok(());
    };
    if matches!(command, "-h" | "--help" | "help") {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = CacheConfig::load()?;
    let cache_dir = config.cache_dir()?;
    let _guard = init_tracing(Some(&cache_dir.join(LOG_DIR)));
    info!(command, version = %config.version, "mealcache starting");

    match command {
        "install" => install(config, &cache_dir).await,
        "activate" => activate(config, &cache_dir).await,
        "fetch" => {
            let url = args.get(1).context("fetch requires a URL")?;
            fetch(config, &cache_dir, url, args.get(2).map(String::as_str)).await
        }
        "sync" => sync(config, &args[1..]).await,
        "status" => status(config, &cache_dir).await,
        other => {
            eprintln!("{}", USAGE);
            bail!("Unknown command: {}", other)
        }
    }
}

fn open_layer(config: CacheConfig, cache_dir: &Path) -> Result<CacheLayer> {
    let backend = FsBackend::new(cache_dir.join(TIERS_DIR))
        .with_context(|| format!("Failed to open cache at {}", cache_dir.display()))?;
    let fetcher = HttpFetcher::with_timeout(config.request_timeout())?;
    Ok(CacheLayer::new(config, Arc::new(backend), Arc::new(fetcher))?)
}

async fn install(config: CacheConfig, cache_dir: &Path) -> Result<()> {
    let layer = open_layer(config, cache_dir)?;
    if layer.lifecycle().is_installed().await? {
        println!("Version {} is already installed", layer.store().version());
        return Ok(());
    }
    let count = layer.lifecycle().install().await?;
    println!("Installed {} resources for version {}", count, layer.store().version());
    Ok(())
}

async fn activate(config: CacheConfig, cache_dir: &Path) -> Result<()> {
    let layer = open_layer(config, cache_dir)?;
    let report = layer.lifecycle().startup().await?;

    println!("Version {} is active", layer.store().version());
    for name in &report.deleted_namespaces {
        println!("  removed {}", name);
    }
    if report.evicted_entries > 0 {
        println!("  evicted {} entries over tier limits", report.evicted_entries);
    }
    Ok(())
}

async fn fetch(config: CacheConfig, cache_dir: &Path, url: &str, accept: Option<&str>) -> Result<()> {
    let layer = open_layer(config, cache_dir)?;
    let url = Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;

    let mut request = Request::get(url);
    if let Some(accept) = accept {
        request = request.with_accept(accept);
    }

    let response = layer.handle(&request).await;
    // Let background revalidation and trims finish before the process exits
    layer.settle().await;

    eprintln!(
        "{} ({}, {} bytes)",
        response.status,
        response.source,
        response.body.len()
    );
    println!("{}", response.body_text());
    Ok(())
}

async fn status(config: CacheConfig, cache_dir: &Path) -> Result<()> {
    let layer = open_layer(config, cache_dir)?;
    let status = layer.status().await?;

    println!("Version: {}", status.version);
    println!("{:<10} {:>9}  {}", "TIER", "ENTRIES", "NEWEST");
    for tier in &status.tiers {
        println!(
            "{:<10} {:>4}/{:<4}  {}",
            tier.tier,
            tier.entries,
            tier.max_entries,
            tier.newest_age()
        );
    }
    if !status.stale_namespaces.is_empty() {
        println!();
        println!("Awaiting cleanup on next activation:");
        for name in &status.stale_namespaces {
            println!("  {}", name);
        }
    }
    Ok(())
}

// ============================================================================
// Deferred sync
// ============================================================================

/// Replays a sync tag to the backend. The backend owns the queued changes;
/// the tag only tells it which kind to flush, so repeated delivery is safe.
struct ReplayHandler {
    client: reqwest::Client,
    endpoint: Url,
}

#[async_trait]
impl SyncHandler for ReplayHandler {
    async fn run(&self, tag: &str) -> Result<()> {
        debug!(tag, endpoint = %self.endpoint, "Replaying sync tag");
        let response = self
            .client
            .request(Method::POST, self.endpoint.clone())
            .json(&serde_json::json!({ "tag": tag }))
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            bail!("{} returned {}", self.endpoint, status);
        }
        Ok(())
    }
}

fn build_dispatcher(config: &CacheConfig) -> Result<SyncTaskDispatcher> {
    let origin = config
        .origin
        .as_deref()
        .context("No origin configured; set MEALCACHE_ORIGIN")?;
    let base = Url::parse(origin).with_context(|| format!("Invalid origin: {}", origin))?;
    let client = HttpFetcher::with_timeout(config.request_timeout())?.client().clone();

    let mut builder = SyncTaskDispatcher::builder();
    for tag in DEFAULT_TAGS {
        let endpoint = base
            .join(&format!("{}{}", SYNC_ENDPOINT, tag))
            .with_context(|| format!("Invalid sync endpoint for {}", tag))?;
        builder = builder.register(
            tag,
            ReplayHandler {
                client: client.clone(),
                endpoint,
            },
        );
    }
    Ok(builder.build())
}

async fn sync(config: CacheConfig, tags: &[String]) -> Result<()> {
    let dispatcher = Arc::new(build_dispatcher(&config)?);
    let queue = SyncQueue::persistent(dispatcher, config.sync.retry(), &config.sync_queue_path()?)?;

    for tag in tags {
        if !queue.signal(tag) {
            println!("{} already pending", tag);
        }
    }

    let report = queue.drain().await;
    for tag in &report.completed {
        println!("synced   {}", tag);
    }
    for tag in &report.ignored {
        println!("ignored  {} (no handler)", tag);
    }
    for tag in &report.deferred {
        println!("deferred {} (retries exhausted, kept for next sync)", tag);
    }
    if report.is_empty() {
        println!("Nothing to sync");
    }
    Ok(())
}
