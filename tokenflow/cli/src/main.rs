//! Tokenflow CLI - Stream tokens from an endpoint to stdout
//!
//! Opens one streaming session, prints token batches as they are delivered,
//! and exits when the stream completes, fails, or is interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Stream with defaults
//! tokenflow https://api.example.com/v1/stream
//!
//! # With credentials and a tighter retry budget
//! tokenflow -H "Authorization: Bearer $TOKEN" --max-reconnect-attempts 3 URL
//!
//! # With config file, print connection stats at the end
//! tokenflow --config ./tokenflow.toml --stats URL
//!
//! # Verbose logging
//! RUST_LOG=tokenflow_core=debug tokenflow URL
//! ```
//!
//! # Signals
//!
//! - `SIGINT`: Stop the session, flushing any buffered tokens first

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use tokenflow_core::{
    default_config_path, load_config_from_path, ConfigOverrides, HttpTransport, SessionOptions,
    StreamSession, TracingTelemetry,
};

/// Tokenflow - resilient token stream consumer
#[derive(Parser, Debug)]
#[command(name = "tokenflow")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Streaming endpoint
    #[arg(value_name = "URL")]
    url: String,

    /// Request header, as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header", value_name = "HEADER", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Reconnect attempts per outage
    #[arg(long, value_name = "N")]
    max_reconnect_attempts: Option<u32>,

    /// Fail on the first drop instead of reconnecting
    #[arg(long)]
    no_reconnect: bool,

    /// Maximum tokens per delivered batch
    #[arg(long, value_name = "N")]
    batch_size: Option<usize>,

    /// Base flush interval in milliseconds
    #[arg(long, value_name = "MS")]
    flush_interval_ms: Option<u64>,

    /// Give up if no terminal event arrives within this many seconds
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "TOKENFLOW_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print connection statistics as JSON when the session ends
    #[arg(long)]
    stats: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "TOKENFLOW_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if self.no_reconnect {
            overrides = overrides.with_reconnect(false);
        }
        if let Some(attempts) = self.max_reconnect_attempts {
            overrides = overrides.with_max_reconnect_attempts(attempts);
        }
        if let Some(size) = self.batch_size {
            overrides = overrides.with_max_batch_size(size);
        }
        if let Some(ms) = self.flush_interval_ms {
            overrides = overrides.with_flush_interval_ms(ms);
        }
        if let Some(secs) = self.timeout_secs {
            overrides = overrides.with_timeout_secs(secs);
        }
        overrides
    }
}

/// Parse `"Name: value"` into a header pair
fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected \"Name: value\", got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in {raw:?}"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Print one delivered batch without a trailing newline
fn write_tokens(text: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

/// Initialize logging with the specified level
///
/// Logs go to stderr so stdout carries only stream output.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("tokenflow={level},tokenflow_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config_path = args.config.clone().or_else(default_config_path);
    let mut config =
        load_config_from_path(config_path.as_deref()).context("Failed to load configuration")?;
    args.overrides()
        .apply(&mut config)
        .context("Invalid command line overrides")?;
    info!(source = %config.source(), "Configuration loaded");

    let transport = HttpTransport::new(Duration::from_secs(10))
        .context("Failed to build HTTP transport")?;
    let session = StreamSession::builder(Arc::new(transport))
        .defaults(config.defaults)
        .telemetry(Arc::new(TracingTelemetry))
        .build();

    let mut options = SessionOptions::new(&args.url)
        .on_token(write_tokens)
        .on_complete(|_| println!())
        .on_error(|e| error!(error = %e, "Stream failed"));
    for (name, value) in &args.headers {
        options = options.with_header(name, value);
    }

    let session_id = session.start(options);
    info!(session_id = %session_id, url = %args.url, "Streaming");

    let mut state = session.subscribe();
    tokio::select! {
        result = state.wait_for(|s| !s.is_streaming) => {
            result.context("Session state channel closed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, stopping session");
            session.stop();
        }
    }

    let final_state = session.state();
    if args.stats {
        let stats = serde_json::to_string_pretty(&session.get_stats())?;
        eprintln!("{stats}");
    }

    match final_state.error {
        Some(e) => Err(anyhow::Error::new(e).context("Streaming session failed")),
        None => {
            info!(tokens = final_state.tokens_processed, "Session finished");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("Authorization: Bearer abc:def"),
            Ok(("Authorization".to_string(), "Bearer abc:def".to_string()))
        );
        assert_eq!(
            parse_header("X-Trace:1"),
            Ok(("X-Trace".to_string(), "1".to_string()))
        );
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(" : value").is_err());
    }

    #[test]
    fn test_args_to_overrides() {
        let args = Args::parse_from([
            "tokenflow",
            "--no-reconnect",
            "--batch-size",
            "8",
            "-H",
            "Authorization: Bearer t",
            "http://localhost/stream",
        ]);
        let overrides = args.overrides();

        assert_eq!(overrides.reconnect, Some(false));
        assert_eq!(overrides.max_batch_size, Some(8));
        assert_eq!(overrides.flush_interval_ms, None);
        assert_eq!(
            args.headers,
            vec![("Authorization".to_string(), "Bearer t".to_string())]
        );
    }
}
