#![warn(clippy::pedantic)]

use core::time::Duration;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use randomnumbers_http_server::{load_settings, RandomNumbersServer};
use tokio::{select, signal};
use tracing::{info, warn};

mod logging;

/// How long in-flight requests get to finish after Ctrl-C
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Serve distinct random numbers over HTTP
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Load settings from a json or toml file
    #[clap(long = "config", env = "RANDOMNUMBERS_CONFIG")]
    config_file: Option<PathBuf>,

    /// Settings as a raw json string, applied after --config
    #[clap(long = "config-json", env = "RANDOMNUMBERS_CONFIG_JSON")]
    config_json: Option<String>,

    /// Address to listen on, defaults to 127.0.0.1:8000
    #[clap(long = "address", env = "RANDOMNUMBERS_ADDRESS")]
    address: Option<SocketAddr>,

    /// Localhost port to listen on, overrides --address
    #[clap(short = 'p', long = "port", env = "RANDOMNUMBERS_PORT")]
    port: Option<u16>,

    /// Serve /randomnumbers/{count} in addition to /randomnumbers
    #[clap(long = "accept-count", env = "RANDOMNUMBERS_ACCEPT_COUNT")]
    accept_count: Option<bool>,

    /// Allow cross-origin requests from any origin
    #[clap(long = "cors", env = "RANDOMNUMBERS_CORS")]
    cors: Option<bool>,

    /// Serve an OpenAPI document at /openapi.json
    #[clap(long = "openapi", env = "RANDOMNUMBERS_OPENAPI")]
    openapi: Option<bool>,

    /// Answer with 408 if sampling takes longer than this many milliseconds
    #[clap(long = "timeout-ms", env = "RANDOMNUMBERS_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    /// Cache-Control header value to send with every sample
    #[clap(long = "cache-control", env = "RANDOMNUMBERS_CACHE_CONTROL")]
    cache_control: Option<String>,

    /// Seed the random number generator for reproducible output
    #[clap(long = "seed", env = "RANDOMNUMBERS_SEED")]
    seed: Option<u64>,

    /// Log level, RUST_LOG directives take precedence
    #[clap(long = "log-level", default_value = "info", env = "RANDOMNUMBERS_LOG_LEVEL")]
    log_level: tracing::Level,

    /// Emit logs as JSON
    #[clap(long = "structured-logging", env = "RANDOMNUMBERS_STRUCTURED_LOGGING")]
    structured_logging: bool,
}

impl Args {
    /// Settings values understood by [`load_settings`]
    fn settings_values(&self) -> HashMap<String, String> {
        let mut values = HashMap::new();
        let mut put = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                values.insert(key.to_string(), value);
            }
        };
        put(
            "config_file",
            self.config_file
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        );
        put("config_json", self.config_json.clone());
        put("address", self.address.map(|a| a.to_string()));
        put("port", self.port.map(|p| p.to_string()));
        put("accept_count", self.accept_count.map(|v| v.to_string()));
        put("cors", self.cors.map(|v| v.to_string()));
        put("openapi", self.openapi.map(|v| v.to_string()));
        put("timeout_ms", self.timeout_ms.map(|v| v.to_string()));
        put("cache_control", self.cache_control.clone());
        put("seed", self.seed.map(|v| v.to_string()));
        values
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _guard = logging::configure_tracing(args.structured_logging, args.log_level)
        .context("failed to configure logging")?;

    let settings = load_settings(&args.settings_values()).context("failed to load settings")?;
    for key in settings.unknown_keys() {
        warn!(key, "ignoring unknown setting");
    }
    let mut server = RandomNumbersServer::new(Arc::new(settings))
        .await
        .context("failed to start server")?;

    let interrupted = select! {
        sig = signal::ctrl_c() => {
            sig.context("failed to wait for Ctrl-C")?;
            true
        },
        res = server.stopped() => {
            res?;
            false
        },
    };
    if interrupted {
        info!("shutting down");
        server.shutdown(Some(SHUTDOWN_GRACE));
        server.stopped().await?;
    }
    Ok(())
}
