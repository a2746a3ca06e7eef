use anyhow::Result;
use tracing::{info, warn};

use crate::catalog::{Catalog, ConquestCatalog};
use crate::cli::StatusArgs;
use crate::config::AppConfig;
use crate::store::{ReportSink, ReportStore};

pub fn run(args: StatusArgs) -> Result<()> {
    let config = AppConfig::load(&args.config)?;
    config.validate()?;

    info!(config = %args.config.display(), "status requested");

    let catalog = ConquestCatalog::open(&config.dicom_db, config.series_filter.clone())?;
    let store = ReportStore::open(&config.data_db)?;

    let series = catalog.list_series()?;
    let known = store.known_series()?;
    let pending = series
        .iter()
        .filter(|entry| !known.contains(&entry.series_instance_uid))
        .count();
    let recorded_in_catalog = series.len() - pending;

    info!(
        catalog = series.len(),
        recorded = known.len(),
        pending,
        "series status"
    );
    if known.len() > recorded_in_catalog {
        warn!(
            orphaned = known.len() - recorded_in_catalog,
            "recorded series no longer listed in the catalog"
        );
    }

    for (table, rows) in store.table_counts()? {
        info!(table, rows, "table status");
    }

    Ok(())
}
