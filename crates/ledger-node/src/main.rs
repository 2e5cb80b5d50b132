mod api;
mod config;
mod constants;
mod reconcile;

use anyhow::Result;
use clap::Parser;
use config::Args;
use ledger_core::store::{Checkpoint, CheckpointStore};
use ledger_core::Chain;
use ledger_storage::SledStore;
use reconcile::Reconciler;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let addr = args.listen_addr()?;
    let chain_config = args.chain_config()?;

    // Genesis is mined here; keep the nonce search off the async workers.
    let chain = Arc::new(tokio::task::spawn_blocking(move || Chain::new(chain_config)).await??);

    let store = Arc::new(SledStore::open(&args.data_dir)?);
    if store.checkpoint()?.is_none() {
        info!("creating initial checkpoint");
        store.put_checkpoint(&Checkpoint::default())?;
    }

    let reconciler = Reconciler::new(chain.clone(), store.clone(), args.reconciler_config());
    let handle = reconciler.spawn();

    let state = api::AppState {
        chain,
        store: store.clone(),
        trigger: handle.trigger(),
    };
    let app = api::router(state);

    info!("ledger-node listening on http://{addr}");
    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    handle.close().await?;
    store.flush()?;
    info!("ledger-node stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
