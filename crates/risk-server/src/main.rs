mod routes;

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use risk_core::{config::Config, pipeline::AppCore};
use std::{path::PathBuf, sync::Arc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::routes::{router, AppState};

#[derive(Parser, Debug)]
#[command(name = "bcsc-risk-server", about = "Serve BCSC risk scores over HTTP")]
struct Args {
    /// JSON config file; environment variables still override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model directory (xgb_model.json + threshold.json)
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:8080
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut cfg = Config::load(args.config.as_deref())?;
    if let Some(dir) = args.model_dir {
        cfg.model_dir = dir;
    }
    if let Some(bind) = args.bind {
        cfg.bind_addr = bind;
    }

    // metrics
    let prom = PrometheusBuilder::new()
        .install_recorder()
        .context("install prometheus recorder")?;

    // loaded once; any failure aborts startup
    let core = AppCore::load(&cfg)
        .with_context(|| format!("load model artifacts from {}", cfg.model_dir.display()))?;
    tracing::info!(
        model_dir = %cfg.model_dir.display(),
        policy = ?cfg.missing_policy,
        threshold = core.threshold(),
        "model ready"
    );

    let app = router(AppState {
        core: Arc::new(core),
        prom,
    });

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("bind {}", cfg.bind_addr))?;
    tracing::info!("bcsc-risk-server listening on http://{}", cfg.bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "ctrl-c handler failed");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
