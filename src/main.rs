//! linewire: a line-oriented TCP request/response server
//!
//! Every received chunk is handed to a protocol adapter and answered with
//! the adapter's response plus a newline. Two connection strategies serve
//! the same contract:
//! - Reactive: mio event loops (epoll on Linux, kqueue on macOS)
//! - Threaded: one blocking thread per connection
//!
//! Built-in adapters: key/value store, ping, echo.
//! Configuration via CLI arguments or TOML file.

mod config;
mod protocols;
mod runtime;
mod storage;

use config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        strategy = ?config.strategy,
        protocol = ?config.protocol,
        buffer_size = config.buffer_size,
        "Starting linewire server"
    );

    runtime::run(config)?;
    Ok(())
}
