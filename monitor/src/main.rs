use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio::signal;

use lib_ltnm::monitor::{MonitorConfig, NetworkMonitor};

mod logger;

#[derive(Parser, Debug, Clone)]
#[command(name = "ltnm", about = "Live transport network monitor")]
struct Cli {
    #[clap(long, env = "LTNM_SERVER_URL", default_value = "ltnm.learncppthroughprojects.com")]
    url: String,

    #[clap(long, env = "LTNM_SERVER_PORT", default_value = "443")]
    port: u16,

    #[clap(long, env = "LTNM_USERNAME")]
    username: String,

    #[clap(long, env = "LTNM_PASSWORD")]
    password: String,

    #[clap(long, env = "LTNM_CA_CERT_FILE", default_value = "cacert.pem")]
    ca_cert_file: PathBuf,

    #[clap(long, env = "LTNM_NETWORK_LAYOUT_FILE_PATH")]
    network_layout_file: Option<PathBuf>,

    #[clap(long, env = "LTNM_LOG_DIR", default_value = "./logs")]
    log_dir: PathBuf,

    #[clap(long, env = "LTNM_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();
    logger::setup_logging(&cli.log_dir, &cli.log_level)?;

    let config = MonitorConfig {
        url: cli.url,
        port: cli.port,
        username: cli.username,
        password: cli.password,
        ca_cert_file: cli.ca_cert_file,
        network_layout_file: cli.network_layout_file,
    };

    let mut monitor = NetworkMonitor::new();
    if let Err(e) = monitor.configure(&config).await {
        log::error!("Could not configure the monitor: {}", e);
        std::process::exit(e.exit_code());
    }

    tokio::select! {
        _ = monitor.run() => {}
        _ = shutdown_signal() => {
            log::info!("Shutdown signal received, stopping the monitor.");
        }
    }

    match monitor.last_error() {
        None => {
            log::info!("Monitor terminated cleanly.");
            Ok(())
        }
        Some(e) => {
            log::error!("Monitor terminated with an error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

async fn shutdown_signal() {
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut term_signal = signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("could not install the SIGTERM handler");
                term_signal.recv().await;
                log::info!("SIGTERM received, initiating shutdown.");
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }
}
