use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use async_ops::config::EngineConfig;
use async_ops::console::Console;
use async_ops::engine::{Engine, spawn_retention_sweep};
use async_ops::store::{LibSqlBackend, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = EngineConfig::from_env().context("invalid configuration")?;

    eprintln!("async-ops v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Default timeout: {}ms", config.default_timeout.as_millis());
    eprintln!("   Cancel grace: {}ms", config.cancel_grace.as_millis());

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn Store> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    let retention = config.retention;
    let sweep_interval = config.sweep_interval;
    let engine = Arc::new(Engine::new(Arc::clone(&store), config));

    // ── Startup Recovery: records a previous process left running ───────
    let reconciled = engine.reconcile_orphans().await?;
    if reconciled > 0 {
        eprintln!("   Reconciled {reconciled} interrupted operations");
    }

    let sweep = spawn_retention_sweep(Arc::clone(&store), retention, sweep_interval);
    eprintln!("   Type 'help' for commands, 'quit' to exit.\n");

    Console::new(Arc::clone(&engine)).run().await?;

    sweep.abort();
    let unsettled = engine.shutdown(Duration::from_secs(10)).await;
    if unsettled > 0 {
        eprintln!("{unsettled} operations did not settle before exit");
    }
    Ok(())
}
