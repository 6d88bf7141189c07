//! Vigil — Binary Entrypoint
//! Loads config, wires the pipeline, and runs the engine loop until ctrl-c.
//!
//! See `README.md` for quickstart.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vigil::config::Config;
use vigil::orchestrator::Orchestrator;

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vigil=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op where the file is absent. Channel
    // secrets (webhook URLs, SMTP credentials) come from here.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = Config::load_default()?;
    tracing::info!(
        tick_secs = cfg.engine.tick_secs,
        sources = cfg.sources.len(),
        "starting engine"
    );

    let mut orchestrator = Orchestrator::build(&cfg).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    orchestrator.run(shutdown_rx).await;
    tracing::info!("engine stopped");
    Ok(())
}
