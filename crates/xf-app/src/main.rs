//! Headless crossfilter runner
//!
//! Loads a CSV into an in-memory engine, opens a session over headless
//! surfaces and replays a short brush and cause-toggle sequence, logging
//! what each surface ends up showing.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use xf_core::SessionConfig;
use xf_data::sources::load_csv;
use xf_data::{LoadConfig, SqliteEngine};
use xf_views::session::HeadlessSurfaces;
use xf_views::Session;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let data_path = match args.next() {
        Some(path) => PathBuf::from(path),
        None => bail!("usage: xfilter <data.csv> [config.json]"),
    };
    let config = match args.next() {
        Some(path) => SessionConfig::from_json_file(&path)?,
        None => SessionConfig::default(),
    };

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    runtime.block_on(run(data_path, config))
}

async fn run(data_path: PathBuf, config: SessionConfig) -> Result<()> {
    let engine = SqliteEngine::in_memory(config.dataset.table.as_str())?;
    let rows = load_csv(&engine, &data_path, &LoadConfig::default())
        .await
        .with_context(|| format!("Failed to load {}", data_path.display()))?;
    info!("Loaded {} rows from {}", rows, data_path.display());

    let surfaces = HeadlessSurfaces::new();
    let session = Session::open(
        config,
        Arc::new(engine),
        tokio::runtime::Handle::current(),
        surfaces.surfaces(),
    );
    session.load().await;
    report("initial", &surfaces);

    let center = surfaces.map.buffer().and_then(|buffer| buffer.position(0));
    if let Some((lon, lat)) = center {
        let brush = session.brush();
        brush.enter();
        brush.hover(lon, lat);
        tokio::time::sleep(Duration::from_millis(session.config().brush.min_interval_ms * 2)).await;
        session.refresh().await;
        report(&format!("brush at ({lon:.3}, {lat:.3}) r={} m", brush.radius()), &surfaces);

        brush.exit()?;
        session.refresh().await;
        report("brush off", &surfaces);
    }

    if let Some(first) = session.config().dataset.categories.first().cloned() {
        session.cause().toggle(&first)?;
        session.refresh().await;
        report(&format!("cause = {first}"), &surfaces);
    }

    Ok(())
}

fn report(step: &str, surfaces: &HeadlessSurfaces) {
    info!(
        "[{}] map={} month={} year={} cause={}",
        step,
        surfaces.map.rows(),
        surfaces.month.total(),
        surfaces.year.total(),
        surfaces.cause.total()
    );
}
