//! Embedded container launcher.
//!
//! Loads a configuration file (or the defaults), starts the container under
//! the base directory and runs until SIGINT or SIGTERM.
//!
//! ```text
//! embedded-container --config conf/server.toml --base-dir /srv/app
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use embedded_container::config::{load_config, ServerConfig};
use embedded_container::container::NoopBinder;
use embedded_container::lifecycle::shutdown_signal;
use embedded_container::observability::{logging, metrics};
use embedded_container::EmbeddedServer;

#[derive(Parser)]
#[command(name = "embedded-container")]
#[command(about = "Embedded HTTP container serving a static web application", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory every configured path is resolved against
    #[arg(short, long, default_value = ".")]
    base_dir: PathBuf,

    /// Log level used when RUST_LOG is not set
    #[arg(short, long)]
    log_level: Option<String>,

    /// Serve Prometheus metrics on this address
    #[arg(short, long)]
    metrics_address: Option<SocketAddr>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.log_level.as_deref()) {
        eprintln!("logging already initialized: {}", e);
    }

    tracing::info!("embedded-container v{} starting", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };

    tracing::info!(
        port = config.general.port,
        context_path = %config.general.context_path,
        max_threads = config.executor.max_threads,
        tls = config.tls.enabled,
        "Configuration loaded"
    );

    let signals = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    if let Some(addr) = cli.metrics_address {
        let _guard = signals.enter();
        if let Err(e) = metrics::init_metrics(addr) {
            tracing::error!(metrics_address = %addr, error = %e, "Failed to start metrics endpoint");
        }
    }

    let server = EmbeddedServer::new(config, Arc::new(NoopBinder));
    server.start(&cli.base_dir)?;

    signals.block_on(shutdown_signal());

    server.stop();
    tracing::info!("Shutdown complete");
    Ok(())
}
