use std::process::ExitCode;
use std::sync::Arc;

use hotel_autoresponder::channels::{ImapMailbox, MailTransport, Mailbox, SmtpMailer};
use anyhow::Context;
use hotel_autoresponder::config::AppConfig;
use hotel_autoresponder::error::Error;
use hotel_autoresponder::pipeline::{CycleOrchestrator, spawn_poller};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> ExitCode {
    // Install rustls crypto provider before any TLS usage
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("Error: failed to install rustls crypto provider");
        return ExitCode::FAILURE;
    }

    dotenvy::dotenv().ok();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = init_logging(&config);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to start email autoresponder: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    info!("Starting email autoresponder");

    let transport = Arc::new(
        SmtpMailer::new(&config.transport, &config.hotel.name)
            .map_err(Error::from)
            .context("building SMTP transport")?,
    );
    if !transport.verify_connectivity().await {
        anyhow::bail!("SMTP connection verification failed");
    }

    let mut mailbox = ImapMailbox::new(Arc::clone(&config.mailbox));
    mailbox
        .connect()
        .await
        .map_err(Error::from)
        .context("connecting to IMAP mailbox")?;

    let orchestrator = CycleOrchestrator::from_config(&config, Box::new(mailbox), transport);
    let poller = spawn_poller(orchestrator, config.poll_interval);

    info!(
        "Email autoresponder started, checking every {} minutes",
        config.poll_interval.as_secs() / 60
    );

    shutdown_signal().await;
    info!("Shutting down email autoresponder");

    if let Err(e) = poller.shutdown().await {
        error!("Email poller task failed: {e}");
    }
    info!("Email autoresponder stopped");
    Ok(())
}

/// Console logging plus an optional daily-rolling file under `LOG_DIR`.
/// `RUST_LOG` overrides `LOG_LEVEL`.
fn init_logging(config: &AppConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "autoresponder.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
