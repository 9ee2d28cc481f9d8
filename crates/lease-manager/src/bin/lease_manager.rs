//! Lease manager binary.
//!
//! Serves the lease API over HTTP, or runs a single event or sweep from the
//! command line.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lease_manager::{
    server, KubeLeaseStore, LeaseConfig, LeaseDispatcher, LeaseManager, LeaseMetrics,
    LeaseReaper, LeaseStore, MemoryLeaseStore,
};

/// Distributed concurrency-limiting lease manager
#[derive(Parser)]
#[command(name = "lease-manager")]
#[command(about = "Distributed concurrency-limiting lease manager")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log output format
    #[arg(long, env = "LEASE_LOG_FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Store holding the lease records
    #[arg(long, env = "LEASE_STORE_BACKEND", default_value = "kubernetes", global = true)]
    backend: Backend,

    /// Maximum records returned per store page
    #[arg(long, env = "LEASE_QUERY_PAGE_SIZE", default_value = "100", global = true)]
    page_size: u32,
}

#[derive(Clone, Copy, Default, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
enum Backend {
    #[default]
    Kubernetes,
    Memory,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the lease API over HTTP
    Serve {
        /// Port to listen on
        #[arg(long, env = "LEASE_PORT", default_value = "8080")]
        port: u16,

        /// Seconds between expired-lease sweeps (0 disables the reaper)
        #[arg(long, env = "LEASE_REAP_INTERVAL_SECONDS", default_value = "30")]
        reap_interval_seconds: u64,
    },
    /// Dispatch a single event and print the response
    Invoke {
        /// Event JSON, e.g. {"action": "acquire", "reference_id": "job-123"}
        #[arg(long)]
        event: String,
    },
    /// Delete expired leases once and print a report
    Reap,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    let config = Arc::new(LeaseConfig::from_env().context("Failed to load lease configuration")?);
    info!(
        table = %config.table_name,
        domain = %config.domain,
        max_concurrent = config.max_concurrent,
        ttl_seconds = config.ttl_seconds,
        "Lease configuration loaded"
    );

    let store = build_store(cli.backend, cli.page_size, &config).await?;
    let metrics = LeaseMetrics::new();

    match cli.command {
        Commands::Serve {
            port,
            reap_interval_seconds,
        } => serve(config, store, metrics, port, reap_interval_seconds).await,
        Commands::Invoke { event } => {
            let value: Value = serde_json::from_str(&event).context("Event is not valid JSON")?;
            let manager = LeaseManager::new(config, store).with_metrics(metrics);
            let response = LeaseDispatcher::new(manager).dispatch_value(value).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Commands::Reap => {
            let reaper = LeaseReaper::new(store, config.domain.clone(), Duration::ZERO)
                .with_metrics(metrics);
            let report = reaper.sweep().await.context("Lease sweep failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("lease_manager=info".parse()?);
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }

    Ok(())
}

async fn build_store(
    backend: Backend,
    page_size: u32,
    config: &LeaseConfig,
) -> Result<Arc<dyn LeaseStore>> {
    match backend {
        Backend::Kubernetes => {
            let client = kube::Client::try_default()
                .await
                .context("Failed to create Kubernetes client")?;
            info!(namespace = %config.table_name, "Connected to Kubernetes");
            Ok(Arc::new(
                KubeLeaseStore::new(client, &config.table_name).with_page_size(page_size),
            ))
        }
        Backend::Memory => {
            warn!("Using in-memory lease store; leases are not shared between processes");
            let page_size = usize::try_from(page_size).context("Page size out of range")?;
            Ok(Arc::new(MemoryLeaseStore::with_page_size(page_size)))
        }
    }
}

async fn serve(
    config: Arc<LeaseConfig>,
    store: Arc<dyn LeaseStore>,
    metrics: LeaseMetrics,
    port: u16,
    reap_interval_seconds: u64,
) -> Result<()> {
    let cancel = CancellationToken::new();

    let reaper_handle = if reap_interval_seconds > 0 {
        let reaper = LeaseReaper::new(
            store.clone(),
            config.domain.clone(),
            Duration::from_secs(reap_interval_seconds),
        )
        .with_metrics(metrics.clone());
        Some(tokio::spawn(reaper.run(cancel.clone())))
    } else {
        info!("Lease reaper disabled");
        None
    };

    let manager = LeaseManager::new(config, store).with_metrics(metrics);
    let state = server::AppState::new(LeaseDispatcher::new(manager));
    let app = server::build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(port = port, "Lease manager listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cancel.cancel();
    if let Some(handle) = reaper_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "Lease reaper task failed");
        }
    }
    info!("Lease manager stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
