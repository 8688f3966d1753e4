//! Per-market window slots and the bounded archive.
//!
//! Every multi-row change runs in one transaction, so readers see either the
//! old window or the new one, never a mix.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::{bump_revision, parse_timestamp};
use crate::calendar;
use crate::errors::AppError;
use crate::models::{
    ArchiveEntry, Market, ReleaseDataset, Slot, ThreeWindow, WeekDataset, WeekIdentifier,
};

/// Maximum number of archived weeks kept per market.
pub const ARCHIVE_LIMIT: i64 = 52;

/// Storage for one `ThreeWindow` and one archive per market.
#[derive(Clone)]
pub struct WindowStore {
    pool: SqlitePool,
}

impl WindowStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the current revision ID.
    pub async fn revision_id(&self) -> Result<i64, AppError> {
        super::get_revision_id(&self.pool).await
    }

    // ==================== WINDOW OPERATIONS ====================

    /// Load the stored window. Missing or unreadable slots come back as `None`.
    pub async fn load(&self, market: Market) -> Result<ThreeWindow, AppError> {
        let rows = sqlx::query(
            "SELECT slot, week_id, generated_at, payload FROM window_slots WHERE market = ?",
        )
        .bind(market.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut window = ThreeWindow::default();
        for row in &rows {
            if let Some((slot, dataset)) = slot_from_row(market, row) {
                window.set(slot, dataset);
            }
        }
        Ok(window)
    }

    /// Persist all three slots in one transaction. `None` slots are removed.
    pub async fn save(&self, market: Market, window: &ThreeWindow) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        write_window(&mut tx, market, window).await?;
        bump_revision(&mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Replace a single slot wholesale.
    pub async fn save_slot(
        &self,
        market: Market,
        slot: Slot,
        dataset: &WeekDataset,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        write_slot(&mut tx, market, slot, dataset).await?;
        bump_revision(&mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Fill missing slots with dated placeholders around `reference`.
    ///
    /// Stored weeks are kept wherever their id lands in the new window. Displaced
    /// populated weeks older than the new `current` are archived (an existing
    /// archive entry wins). A consecutive window is returned untouched.
    pub async fn initialize(
        &self,
        market: Market,
        reference: DateTime<Utc>,
    ) -> Result<ThreeWindow, AppError> {
        let stored = self.load(market).await?;
        if stored.is_adjacent() {
            return Ok(stored);
        }
        if stored.is_complete() {
            tracing::warn!(market = %market, "Stored window is not consecutive, rebuilding");
        }

        let current_id = calendar::week_identifier(reference);
        let targets = [
            (Slot::Last, current_id.pred()),
            (Slot::Current, current_id),
            (Slot::Next, current_id.succ()),
        ];
        let existing: Vec<&WeekDataset> = Slot::ALL.iter().filter_map(|s| stored.get(*s)).collect();

        let mut window = ThreeWindow::default();
        for (slot, id) in targets {
            let dataset = match existing.iter().find(|d| d.id == id) {
                Some(kept) => (*kept).clone(),
                None => WeekDataset::placeholder(market, id),
            };
            window.set(slot, dataset);
        }

        let displaced: Vec<&WeekDataset> = existing
            .into_iter()
            .filter(|d| d.is_populated() && !targets.iter().any(|(_, id)| *id == d.id))
            .collect();

        let mut tx = self.pool.begin().await?;
        let mut archived = 0;
        for dataset in &displaced {
            if dataset.id < current_id {
                if insert_archive(&mut tx, market, dataset, false).await? {
                    archived += 1;
                }
            } else {
                tracing::warn!(
                    market = %market,
                    week = %dataset.id,
                    "Dropping stored week ahead of the new window"
                );
            }
        }
        write_window(&mut tx, market, &window).await?;
        if archived > 0 {
            truncate_archive(&mut tx, market).await?;
        }
        bump_revision(&mut tx).await?;
        tx.commit().await?;

        tracing::info!(
            market = %market,
            current = %current_id,
            archived,
            "Initialized release window"
        );
        Ok(window)
    }

    /// Archive `outgoing` (only if not archived before) and save `window`, atomically.
    ///
    /// Returns whether a new archive entry was written.
    pub async fn commit_rotation(
        &self,
        market: Market,
        outgoing: Option<&WeekDataset>,
        window: &ThreeWindow,
    ) -> Result<bool, AppError> {
        let mut tx = self.pool.begin().await?;
        let archived = match outgoing {
            Some(dataset) => insert_archive(&mut tx, market, dataset, false).await?,
            None => false,
        };
        write_window(&mut tx, market, window).await?;
        if archived {
            truncate_archive(&mut tx, market).await?;
        }
        bump_revision(&mut tx).await?;
        tx.commit().await?;
        Ok(archived)
    }

    // ==================== ARCHIVE OPERATIONS ====================

    /// Insert or replace an archived week, keeping only the newest `ARCHIVE_LIMIT`.
    pub async fn upsert_archive_entry(
        &self,
        market: Market,
        dataset: &WeekDataset,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        insert_archive(&mut tx, market, dataset, true).await?;
        truncate_archive(&mut tx, market).await?;
        bump_revision(&mut tx).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Archive index, newest week first.
    pub async fn list_archive(&self, market: Market) -> Result<Vec<ArchiveEntry>, AppError> {
        let rows = sqlx::query(
            "SELECT week_id, title, generated_at FROM archive_entries WHERE market = ? ORDER BY week_id DESC",
        )
        .bind(market.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().filter_map(archive_entry_from_row).collect())
    }

    pub async fn read_archive_entry(
        &self,
        market: Market,
        id: WeekIdentifier,
    ) -> Result<Option<WeekDataset>, AppError> {
        let row = sqlx::query(
            "SELECT generated_at, payload FROM archive_entries WHERE market = ? AND week_id = ?",
        )
        .bind(market.as_str())
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|row| {
            let generated_at = parse_timestamp(row.try_get("generated_at").ok()?)?;
            let payload: ReleaseDataset =
                serde_json::from_str(row.try_get("payload").ok()?).ok()?;
            Some(WeekDataset::populated(market, id, payload, generated_at))
        }))
    }
}

// Helper functions shared by the transactional operations

async fn write_window(
    conn: &mut SqliteConnection,
    market: Market,
    window: &ThreeWindow,
) -> Result<(), AppError> {
    for slot in Slot::ALL {
        match window.get(slot) {
            Some(dataset) => write_slot(conn, market, slot, dataset).await?,
            None => {
                sqlx::query("DELETE FROM window_slots WHERE market = ? AND slot = ?")
                    .bind(market.as_str())
                    .bind(slot.as_str())
                    .execute(&mut *conn)
                    .await?;
            }
        }
    }
    Ok(())
}

async fn write_slot(
    conn: &mut SqliteConnection,
    market: Market,
    slot: Slot,
    dataset: &WeekDataset,
) -> Result<(), AppError> {
    let payload_json = dataset
        .payload
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        "INSERT OR REPLACE INTO window_slots (market, slot, week_id, generated_at, payload, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(market.as_str())
    .bind(slot.as_str())
    .bind(dataset.id.to_string())
    .bind(dataset.generated_at.map(|t| t.to_rfc3339()))
    .bind(&payload_json)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Returns whether a row was written. With `replace == false` an existing entry wins.
async fn insert_archive(
    conn: &mut SqliteConnection,
    market: Market,
    dataset: &WeekDataset,
    replace: bool,
) -> Result<bool, AppError> {
    let Some(payload) = dataset.payload.as_ref() else {
        return Ok(false);
    };
    let entry = dataset.archive_entry();
    let payload_json = serde_json::to_string(payload)?;

    let sql = if replace {
        "INSERT INTO archive_entries (market, week_id, title, generated_at, payload) VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT (market, week_id) DO UPDATE SET title = excluded.title, generated_at = excluded.generated_at, payload = excluded.payload"
    } else {
        "INSERT INTO archive_entries (market, week_id, title, generated_at, payload) VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT (market, week_id) DO NOTHING"
    };

    let result = sqlx::query(sql)
        .bind(market.as_str())
        .bind(entry.id.to_string())
        .bind(&entry.title)
        .bind(entry.generated_at.to_rfc3339())
        .bind(&payload_json)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

async fn truncate_archive(conn: &mut SqliteConnection, market: Market) -> Result<u64, AppError> {
    let result = sqlx::query(
        r#"DELETE FROM archive_entries
           WHERE market = ?
             AND week_id NOT IN (
                 SELECT week_id FROM archive_entries
                 WHERE market = ? ORDER BY week_id DESC LIMIT ?
             )"#,
    )
    .bind(market.as_str())
    .bind(market.as_str())
    .bind(ARCHIVE_LIMIT)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() > 0 {
        tracing::debug!(
            market = %market,
            dropped = result.rows_affected(),
            "Dropped archive entries beyond limit"
        );
    }
    Ok(result.rows_affected())
}

fn slot_from_row(market: Market, row: &sqlx::sqlite::SqliteRow) -> Option<(Slot, WeekDataset)> {
    let slot: Slot = row.try_get::<String, _>("slot").ok()?.parse().ok()?;
    let parsed = (|| {
        let id: WeekIdentifier = row.try_get::<String, _>("week_id").ok()?.parse().ok()?;
        let generated_at: Option<String> = row.try_get("generated_at").ok()?;
        let payload: Option<String> = row.try_get("payload").ok()?;
        let mut dataset = WeekDataset::placeholder(market, id);
        if let (Some(generated_at), Some(payload)) = (generated_at, payload) {
            dataset.generated_at = Some(parse_timestamp(&generated_at)?);
            dataset.payload = Some(serde_json::from_str(&payload).ok()?);
        }
        Some(dataset)
    })();

    match parsed {
        Some(dataset) => Some((slot, dataset)),
        None => {
            tracing::warn!(market = %market, slot = %slot, "Ignoring unreadable window slot");
            None
        }
    }
}

fn archive_entry_from_row(row: &sqlx::sqlite::SqliteRow) -> Option<ArchiveEntry> {
    let id: WeekIdentifier = row.try_get::<String, _>("week_id").ok()?.parse().ok()?;
    Some(ArchiveEntry {
        id,
        title: row.try_get("title").ok()?,
        range: calendar::week_range_of_id(&id),
        generated_at: parse_timestamp(row.try_get("generated_at").ok()?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use chrono::TimeZone;
    use serde_json::json;

    fn week(year: i32, n: u32) -> WeekIdentifier {
        WeekIdentifier::new(year, n).unwrap()
    }

    fn filled(market: Market, id: WeekIdentifier, marker: &str) -> WeekDataset {
        WeekDataset::populated(
            market,
            id,
            ReleaseDataset(json!({ "ott": [{ "title": marker }], "theatrical": [] })),
            Utc.with_ymd_and_hms(2024, 12, 1, 8, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_load_empty_window_reports_missing_slots() {
        let (pool, _dir) = test_pool().await;
        let store = WindowStore::new(pool);
        let window = store.load(Market::Us).await.unwrap();
        assert_eq!(window, ThreeWindow::default());
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip_per_market() {
        let (pool, _dir) = test_pool().await;
        let store = WindowStore::new(pool);
        let window = ThreeWindow {
            last: Some(filled(Market::Us, week(2024, 49), "a")),
            current: Some(filled(Market::Us, week(2024, 50), "b")),
            next: Some(WeekDataset::placeholder(Market::Us, week(2024, 51))),
        };
        let before = store.revision_id().await.unwrap();
        store.save(Market::Us, &window).await.unwrap();

        assert_eq!(store.load(Market::Us).await.unwrap(), window);
        assert_eq!(store.load(Market::India).await.unwrap(), ThreeWindow::default());
        assert!(store.revision_id().await.unwrap() > before);
    }

    #[tokio::test]
    async fn test_initialize_creates_dated_placeholders() {
        let (pool, _dir) = test_pool().await;
        let store = WindowStore::new(pool);
        let reference = Utc.with_ymd_and_hms(2024, 12, 11, 9, 0, 0).unwrap();

        let window = store.initialize(Market::India, reference).await.unwrap();
        assert_eq!(window.last.as_ref().unwrap().id, week(2024, 49));
        assert_eq!(window.current.as_ref().unwrap().id, week(2024, 50));
        assert_eq!(window.next.as_ref().unwrap().id, week(2024, 51));
        assert!(window.is_adjacent());
        assert!(!window.current.as_ref().unwrap().is_populated());
        assert_eq!(store.load(Market::India).await.unwrap(), window);
    }

    #[tokio::test]
    async fn test_initialize_keeps_matching_slots() {
        let (pool, _dir) = test_pool().await;
        let store = WindowStore::new(pool);
        let current = filled(Market::Us, week(2024, 50), "kept");
        store
            .save_slot(Market::Us, Slot::Current, &current)
            .await
            .unwrap();

        let reference = Utc.with_ymd_and_hms(2024, 12, 12, 0, 0, 0).unwrap();
        let window = store.initialize(Market::Us, reference).await.unwrap();
        assert_eq!(window.current, Some(current));
        assert!(window.is_complete());
    }

    #[tokio::test]
    async fn test_unreadable_slot_is_treated_as_missing() {
        let (pool, _dir) = test_pool().await;
        let store = WindowStore::new(pool.clone());
        store
            .save_slot(Market::Us, Slot::Next, &filled(Market::Us, week(2024, 51), "x"))
            .await
            .unwrap();
        sqlx::query("UPDATE window_slots SET payload = '{not json' WHERE slot = 'next'")
            .execute(&pool)
            .await
            .unwrap();

        let window = store.load(Market::Us).await.unwrap();
        assert!(window.next.is_none());
    }

    #[tokio::test]
    async fn test_archive_upsert_replaces_and_sorts() {
        let (pool, _dir) = test_pool().await;
        let store = WindowStore::new(pool);
        store
            .upsert_archive_entry(Market::Us, &filled(Market::Us, week(2024, 48), "old"))
            .await
            .unwrap();
        store
            .upsert_archive_entry(Market::Us, &filled(Market::Us, week(2024, 50), "x"))
            .await
            .unwrap();
        store
            .upsert_archive_entry(Market::Us, &filled(Market::Us, week(2024, 48), "new"))
            .await
            .unwrap();

        let entries = store.list_archive(Market::Us).await.unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![week(2024, 50), week(2024, 48)]);
        assert_eq!(entries[1].title, "United States releases, November 25 - December 1, 2024");

        let replaced = store
            .read_archive_entry(Market::Us, week(2024, 48))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(replaced.payload.unwrap().0["ott"][0]["title"], "new");
        assert!(store
            .read_archive_entry(Market::Us, week(2024, 47))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_archive_is_bounded() {
        let (pool, _dir) = test_pool().await;
        let store = WindowStore::new(pool);
        let first = week(2023, 40);
        for n in 0..53 {
            store
                .upsert_archive_entry(
                    Market::India,
                    &filled(Market::India, first.plus_weeks(n), "w"),
                )
                .await
                .unwrap();
        }

        let entries = store.list_archive(Market::India).await.unwrap();
        assert_eq!(entries.len(), ARCHIVE_LIMIT as usize);
        assert_eq!(entries[0].id, first.plus_weeks(52));
        assert!(entries.iter().all(|e| e.id != first));
        assert!(store.list_archive(Market::Us).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_commit_rotation_does_not_overwrite_archive() {
        let (pool, _dir) = test_pool().await;
        let store = WindowStore::new(pool);
        let original = filled(Market::Us, week(2024, 49), "original");
        store.upsert_archive_entry(Market::Us, &original).await.unwrap();

        let window = ThreeWindow {
            last: Some(filled(Market::Us, week(2024, 50), "b")),
            current: Some(WeekDataset::placeholder(Market::Us, week(2024, 51))),
            next: Some(WeekDataset::placeholder(Market::Us, week(2024, 52))),
        };
        let rewritten = filled(Market::Us, week(2024, 49), "rewritten");
        let archived = store
            .commit_rotation(Market::Us, Some(&rewritten), &window)
            .await
            .unwrap();

        assert!(!archived);
        let stored = store
            .read_archive_entry(Market::Us, week(2024, 49))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.payload.unwrap().0["ott"][0]["title"], "original");
        assert_eq!(store.load(Market::Us).await.unwrap(), window);
    }

    #[tokio::test]
    async fn test_initialize_realigns_stored_weeks_by_id() {
        let (pool, _dir) = test_pool().await;
        let store = WindowStore::new(pool.clone());
        let w50 = filled(Market::Us, week(2024, 50), "w50");
        let w51 = filled(Market::Us, week(2024, 51), "w51");
        let window = ThreeWindow {
            last: Some(filled(Market::Us, week(2024, 49), "w49")),
            current: Some(w50.clone()),
            next: Some(w51.clone()),
        };
        store.save(Market::Us, &window).await.unwrap();
        sqlx::query("UPDATE window_slots SET generated_at = 'garbage' WHERE slot = 'last'")
            .execute(&pool)
            .await
            .unwrap();

        // Week 51: the stored weeks shift one slot back instead of being dropped.
        let reference = Utc.with_ymd_and_hms(2024, 12, 18, 9, 0, 0).unwrap();
        let rebuilt = store.initialize(Market::Us, reference).await.unwrap();
        assert_eq!(rebuilt.last, Some(w50));
        assert_eq!(rebuilt.current, Some(w51));
        assert_eq!(rebuilt.next.as_ref().unwrap().id, week(2024, 52));
        assert!(!rebuilt.next.as_ref().unwrap().is_populated());
        assert_eq!(store.load(Market::Us).await.unwrap(), rebuilt);
    }

    #[tokio::test]
    async fn test_initialize_archives_displaced_weeks() {
        let (pool, _dir) = test_pool().await;
        let store = WindowStore::new(pool);
        let kept = filled(Market::India, week(2024, 47), "already archived");
        store.upsert_archive_entry(Market::India, &kept).await.unwrap();
        store
            .save_slot(Market::India, Slot::Last, &filled(Market::India, week(2024, 47), "slot"))
            .await
            .unwrap();
        store
            .save_slot(Market::India, Slot::Current, &filled(Market::India, week(2024, 48), "w48"))
            .await
            .unwrap();

        let reference = Utc.with_ymd_and_hms(2024, 12, 18, 9, 0, 0).unwrap();
        let window = store.initialize(Market::India, reference).await.unwrap();
        assert_eq!(window.current.as_ref().unwrap().id, week(2024, 51));
        assert!(!window.last.as_ref().unwrap().is_populated());

        let ids: Vec<_> = store
            .list_archive(Market::India)
            .await
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![week(2024, 48), week(2024, 47)]);
        let w47 = store
            .read_archive_entry(Market::India, week(2024, 47))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(w47.payload.unwrap().0["ott"][0]["title"], "already archived");
    }
}
