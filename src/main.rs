mod coingecko;
mod config;
mod dashboard;
mod market;
mod server;
mod watch;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::Settings;

#[derive(Debug, Parser)]
#[command(name = "coinpulse", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the market API server (default)
    Serve {
        /// Override PORT
        #[arg(long)]
        port: Option<u16>,
        /// Open the browser dashboard once the server is up
        #[arg(long)]
        open: bool,
    },
    /// Poll a running server and show the market table in the terminal
    Watch {
        /// Override BACKEND_URL
        #[arg(long)]
        backend: Option<String>,
        /// Override POLL_INTERVAL_SECS
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load()?;
    env_logger::init();

    match cli.command.unwrap_or(Command::Serve {
        port: None,
        open: false,
    }) {
        Command::Serve { port, open } => {
            if let Some(p) = port {
                settings.port = p;
            }
            log::info!(
                "app.start mode=serve listen={} origin={} api_key={}",
                settings.listen_addr(),
                settings.allowed_origin,
                if settings.coingecko_api_key.is_some() { "set" } else { "unset" }
            );

            if open {
                let url = format!("http://127.0.0.1:{}/dashboard", settings.port);
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(650)).await;
                    let _ = std::process::Command::new("xdg-open").arg(&url).spawn();
                });
            }

            let client = coingecko::Client::new(
                settings.coingecko_base_url.clone(),
                settings.coingecko_api_key.clone(),
            )
            .context("build coingecko client")?;
            server::serve(settings, client).await
        }
        Command::Watch { backend, interval } => {
            if let Some(b) = backend {
                settings.backend_url = b.trim_end_matches('/').to_string();
            }
            if let Some(i) = interval {
                settings.poll_interval_secs = i;
            }
            settings.validate()?;
            log::info!("app.start mode=watch backend={}", settings.backend_url);
            watch::run(settings).await
        }
    }
}
