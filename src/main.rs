//! endpoint-cache - keep HTTP endpoints cached and print them
//!
//! Registers each `--path` with a self-refreshing cache and prints the cached
//! JSON as one line per path on every poll, until interrupted.

use clap::Parser;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use endpoint_cache::cli::{Cli, StartupConfig};
use endpoint_cache::{CachedClient, Client};

/// Installs the log subscriber; `RUST_LOG` overrides the default filter.
fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "endpoint_cache=debug"
    } else {
        "endpoint_cache=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Prints the cached value for `path` as a single JSON line
fn print_snapshot(cache: &CachedClient, path: &str) {
    match cache.read_cached::<Value>(path) {
        Ok(snapshot) => {
            let line = json!({
                "path": path,
                "updated_at": snapshot.updated_at,
                "expired": snapshot.is_expired,
                "data": snapshot.data.as_deref(),
            });
            println!("{}", line);
        }
        Err(err) => tracing::warn!(path = %path, error = %err, "failed to read cache"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Validate everything before touching the network
    let config = StartupConfig::from_cli(&cli)?;

    let mut builder = Client::builder(config.base_url.clone()).timeout(config.timeout);
    for (name, value) in &config.headers {
        builder = builder.header(name.clone(), value.clone());
    }
    let cache = CachedClient::with_fetcher(builder.build()?);

    for endpoint in &config.endpoints {
        cache.register::<Value>(endpoint.clone()).await?;
        tracing::info!(path = %endpoint.path, schedule = %endpoint.schedule, "watching endpoint");
    }

    let mut interval = tokio::time::interval(config.poll);
    let mut polls = 0u32;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                for endpoint in &config.endpoints {
                    print_snapshot(&cache, &endpoint.path);
                }
                polls += 1;
                if config.count.is_some_and(|count| polls >= count) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, shutting down");
                break;
            }
        }
    }

    cache.stop();
    Ok(())
}
