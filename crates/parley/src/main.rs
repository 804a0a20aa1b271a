// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use parley::client::ChatClient;
use parley::config::{Cli, ClientConfig, Command};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let validated = match &cli.command {
        Command::Server(config) => config.validate(),
        Command::Client(config) => config.validate(),
    };
    if let Err(e) = validated {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&cli);

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let result = match cli.command {
        Command::Server(config) => parley::run(config, shutdown).await,
        Command::Client(config) => run_client(config, shutdown).await,
    };
    if let Err(e) = result {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

/// Logs go to stderr so they never interleave with chat output.
fn init_tracing(cli: &Cli) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match cli.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        }
    }
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async {
                match sigterm.as_mut() {
                    Some(s) => s.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                info!("received SIGTERM");
            }
            _ = async {
                match sigint.as_mut() {
                    Some(s) => s.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                info!("received SIGINT");
            }
        }
        shutdown.cancel();
    });
}

async fn run_client(config: ClientConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let mut client = ChatClient::new(config)?;
    let input = tokio::io::BufReader::new(tokio::io::stdin());
    let mut output = tokio::io::stdout();
    client.run(input, &mut output, shutdown).await
}
