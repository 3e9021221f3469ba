use anyhow::{Context, Result};
use rollcall_core::FaceMatcher;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod store;

use config::{BusKind, Config};
use dbus_interface::{MatcherService, BUS_NAME, OBJECT_PATH};
use engine::EngineHandle;
use store::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::load()?;
    tracing::info!(
        metric = %config.metric,
        threshold = config.match_threshold,
        dimension = ?config.embedding_dim,
        db = %config.db_path.display(),
        "configuration loaded"
    );

    let store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("opening gallery at {}", config.db_path.display()))?;
    let (matcher, report) =
        FaceMatcher::open(config.policy(), config.embedding_dim, Box::new(store))
            .context("restoring gallery")?;
    if !report.skipped.is_empty() {
        tracing::warn!(
            skipped = report.skipped.len(),
            "some stored references could not be restored"
        );
    }
    tracing::info!(
        restored = report.restored,
        dimension = ?report.dimension,
        "gallery restored"
    );

    let engine = EngineHandle::new(matcher, config.request_timeout());
    let service = MatcherService::new(engine, config.model_name.clone());

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("registering {BUS_NAME} on the {:?} bus", config.bus))?;

    tracing::info!(bus = ?config.bus, "rollcalld ready on {BUS_NAME}");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
