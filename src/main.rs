//! Pylon CLI

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pylon::config::Config;
use pylon::server::{wait_for_signal, Server};
use pylon::handlers;

#[derive(Parser)]
#[command(name = "pylon", about = "Concurrent HTTP/1.x server", version)]
struct Cli {
    /// IPv4 or IPv6 address to bind
    address: IpAddr,

    /// Port to bind
    port: u16,

    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Document root for the default static file route
    #[arg(long, value_name = "DIR", default_value = ".")]
    root: PathBuf,

    /// Append-only log persisting the default key-value store
    #[arg(long, value_name = "FILE")]
    data_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    config.listen.address = cli.address;
    config.listen.port = cli.port;

    let router = handlers::build_router(&config, &cli.root, cli.data_file.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting runtime")?;

    runtime.block_on(async move {
        let server = Server::bind(config, router).await?;

        let handle = server.shutdown_handle();
        tokio::spawn(async move {
            if let Err(e) = wait_for_signal().await {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
            handle.shutdown();
        });

        let report = server.run().await?;
        info!(
            "Served {} requests on {} connections",
            report.requests_served, report.accepted
        );

        Ok(())
    })
}
