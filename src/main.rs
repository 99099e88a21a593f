use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use commit_watchbot::config;
use commit_watchbot::discord::DiscordClient;
use commit_watchbot::github::GitHubClient;
use commit_watchbot::supervisor::{Settings, Supervisor};
use commit_watchbot::watermark::SystemClock;

#[derive(Debug, Parser)]
#[command(author, version, about = "Post new commits of watched repositories to Discord webhooks")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log payloads and every poll (same as `tuning.verbose: true`)
    #[arg(long)]
    verbose: bool,

    /// Print an example config file and exit
    #[arg(long)]
    print_example: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    if args.print_example {
        print!("{}", config::example());
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("failed to load {}", args.config.display()))?;

    let default_level = if args.verbose || cfg.tuning.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .compact()
        .init();

    let credentials = cfg.credentials();
    if credentials.is_none() {
        info!("no GitHub credentials configured; using the anonymous rate limit");
    }
    let timeout = cfg.tuning.request_timeout();
    let github = GitHubClient::new(&cfg.github.api_base, credentials, timeout)?;
    let discord = DiscordClient::new(timeout)?;

    let supervisor = Supervisor::new(
        cfg.targets(),
        Arc::new(github),
        Arc::new(discord),
        Arc::new(SystemClock),
        Settings::from_config(&cfg),
    );

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown requested");
        trigger.cancel();
    });

    info!(targets = cfg.watch.len(), "starting commit watcher");
    supervisor.run(shutdown).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(?err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(?err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
