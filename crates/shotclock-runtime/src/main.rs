//! shotclock: live shot clock server binary.
//! Runs the WebSocket push gateway and the HTTP pull surfaces in-process,
//! and offers small one-shot clients against a running daemon.

use clap::Parser;
use tokio_util::sync::CancellationToken;

mod cli;
mod client;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    match args.command.unwrap_or(cli::Command::Serve) {
        cli::Command::Serve => {
            let filter = std::env::var("SHOTCLOCK_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .init();

            run_daemon(args.serve.to_config()).await?;
        }
        cli::Command::State { game_id } => {
            client::cmd_state(args.serve.http_addr, &game_id).await?;
        }
        cli::Command::List => {
            client::cmd_list(args.serve.http_addr).await?;
        }
    }

    Ok(())
}

/// Run the daemon until ctrl-c or SIGTERM, then wait for drivers to stop.
async fn run_daemon(config: shotclock_daemon::DaemonConfig) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let mut daemon = tokio::spawn(shotclock_daemon::run(config, cancel.clone()));

    tokio::select! {
        () = shutdown_signal() => {}
        res = &mut daemon => {
            // Exited on its own: a bind failure or a fatal server error.
            return Ok(res??);
        }
    }

    cancel.cancel();
    daemon.await??;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot register SIGTERM handler; ctrl-c only");
                ctrl_c.await.ok();
                tracing::info!("received ctrl-c, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        tracing::info!("received ctrl-c, shutting down");
    }
}
