//! Static JSON export of the persisted windows and archives.
//!
//! Layout under the output directory, per market:
//! `<market>/{last,current,next}.json`, `<market>/archive/index.json` and
//! `<market>/archive/<YYYY-WW>.json`.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::db::WindowStore;
use crate::errors::AppError;
use crate::models::{Market, Slot};

/// Files written for one market.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub slots: usize,
    pub archived: usize,
}

/// Write `market`'s window and archive below `out_dir`.
pub async fn export_market(
    store: &WindowStore,
    market: Market,
    out_dir: &Path,
) -> Result<ExportSummary, AppError> {
    let market_dir = out_dir.join(market.as_str());
    let archive_dir = market_dir.join("archive");
    tokio::fs::create_dir_all(&archive_dir).await?;

    let mut summary = ExportSummary::default();

    let window = store.load(market).await?;
    for slot in Slot::ALL {
        let path = market_dir.join(format!("{}.json", slot));
        match window.get(slot) {
            Some(dataset) => {
                write_json(&path, dataset).await?;
                summary.slots += 1;
            }
            None => remove_stale_file(&path).await?,
        }
    }

    let entries = store.list_archive(market).await?;
    write_json(&archive_dir.join("index.json"), &entries).await?;
    for entry in &entries {
        let Some(dataset) = store.read_archive_entry(market, entry.id).await? else {
            continue;
        };
        write_json(&archive_dir.join(format!("{}.json", entry.id)), &dataset).await?;
        summary.archived += 1;
    }

    tracing::info!(
        market = %market,
        dir = %market_dir.display(),
        slots = summary.slots,
        archived = summary.archived,
        "Exported market"
    );
    Ok(summary)
}

/// Export every market into `out_dir`.
pub async fn export_all(
    store: &WindowStore,
    out_dir: &Path,
) -> Result<Vec<(Market, ExportSummary)>, AppError> {
    let mut summaries = Vec::with_capacity(Market::ALL.len());
    for market in Market::ALL {
        summaries.push((market, export_market(store, market, out_dir).await?));
    }
    Ok(summaries)
}

/// Write through a temporary file so readers never see a partial document.
async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), AppError> {
    let body = serde_json::to_string_pretty(value)?;
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn remove_stale_file(path: &Path) -> Result<(), AppError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
