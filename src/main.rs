use eyre::WrapErr;
use std::sync::Arc;
use std::time::Duration;

use lbtc_operator::config::{self, LogFormat, RunConfig};
use lbtc_operator::metrics;
use lbtc_operator::orchestrator::{LiveServices, Orchestrator, Schedules};
use lbtc_operator::store::{JsonFileStore, PgStore, StateStore};
use lbtc_operator::vaults::VaultRegistry;

fn main() -> eyre::Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    let config = RunConfig::load()?;
    init_logging(config.log_format);

    tracing::info!("Starting LBTC operator");
    tracing::debug!(config = ?config, "Configuration loaded");

    let vaults = VaultRegistry::with_defaults();
    let accounts = config::load_accounts(&config.accounts_file, &vaults)?;
    config::require_captcha(&accounts, &config)?;

    let store: Arc<dyn StateStore> = match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url.expose()).await?;
            tracing::info!("Using PostgreSQL state store");
            Arc::new(store)
        }
        None => {
            let store = JsonFileStore::open(&config.state_file).await?;
            tracing::info!(path = %store.path().display(), "Using JSON state store");
            Arc::new(store)
        }
    };

    let schedules = Schedules {
        gas_gate: lbtc_operator::gas::GasGate::new(Duration::from_secs(60), config.gas_gate_max_wait),
        ..Schedules::default()
    };
    let metrics_file = config.metrics_file.clone();
    let thresholds = config.thresholds.clone();
    let services = Arc::new(LiveServices::new(config)?);
    let orchestrator = Orchestrator::new(store, services, vaults)
        .with_thresholds(thresholds)
        .with_schedules(schedules);

    // Create shutdown channel
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(()).await;
    });

    let result = orchestrator.run(accounts, &mut shutdown_rx).await;

    if let Some(path) = metrics_file {
        match metrics::write_textfile(&path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "Metrics written"),
            Err(e) => tracing::warn!(error = %e, "Failed to write metrics file"),
        }
    }

    let summary = result.wrap_err("Run aborted")?;
    tracing::info!(
        completed = summary.completed,
        waiting = summary.waiting,
        failed = summary.failed,
        "LBTC operator stopped"
    );
    Ok(())
}

/// Initialize tracing/logging with structured output
fn init_logging(format: LogFormat) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lbtc_operator=debug"));

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(fmt::layer().json().with_target(true)).init(),
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).init(),
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, finishing current account");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, finishing current account");
        }
    }
}
