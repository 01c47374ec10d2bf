use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite};
use tracing::info;

use crate::error::CacheError;
use crate::models::AggregateRow;

/// The most recently saved aggregate table
#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    pub generated_at: DateTime<Utc>,
    pub min_sample_size: u64,
    pub rows: Vec<AggregateRow>,
}

/// Flat SQLite snapshot of the aggregate table for the dashboard.
///
/// Each save replaces the previous table wholesale inside one transaction.
pub struct SnapshotStore {
    pool: Pool<Sqlite>,
}

impl SnapshotStore {
    pub async fn new(database_url: &str) -> Result<Self, CacheError> {
        let pool = super::connect(database_url).await?;
        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: Pool<Sqlite>) -> Result<Self, CacheError> {
        let store = Self { pool };
        store.init_schema().await?;

        info!("Snapshot store initialized");
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), CacheError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS aggregate_rows (
                champion_id INTEGER NOT NULL,
                patch TEXT NOT NULL,
                league TEXT NOT NULL,
                games_played INTEGER NOT NULL,
                wins INTEGER NOT NULL,
                win_rate REAL NOT NULL,
                pick_rate REAL NOT NULL,
                win_rate_low REAL NOT NULL,
                win_rate_high REAL NOT NULL,
                PRIMARY KEY (champion_id, patch, league)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS aggregate_meta (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                generated_at TEXT NOT NULL,
                min_sample_size INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Replace the stored table with `rows`
    pub async fn save(&self, rows: &[AggregateRow], min_sample_size: u64) -> Result<(), CacheError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM aggregate_rows")
            .execute(&mut *tx)
            .await?;

        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO aggregate_rows (
                    champion_id,
                    patch,
                    league,
                    games_played,
                    wins,
                    win_rate,
                    pick_rate,
                    win_rate_low,
                    win_rate_high
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(row.champion_id)
            .bind(&row.patch)
            .bind(&row.league)
            .bind(row.games_played as i64)
            .bind(row.wins as i64)
            .bind(row.win_rate)
            .bind(row.pick_rate_within_patch_league)
            .bind(row.win_rate_low)
            .bind(row.win_rate_high)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO aggregate_meta (id, generated_at, min_sample_size)
            VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                generated_at = excluded.generated_at,
                min_sample_size = excluded.min_sample_size
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(min_sample_size as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!("Saved aggregate snapshot with {} rows", rows.len());
        Ok(())
    }

    /// Load the last saved table, in its stored order
    pub async fn load(&self) -> Result<Option<StoredSnapshot>, CacheError> {
        let meta: Option<(String, i64)> =
            sqlx::query_as("SELECT generated_at, min_sample_size FROM aggregate_meta WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;

        let (generated_at, min_sample_size) = match meta {
            Some(meta) => meta,
            None => return Ok(None),
        };

        let generated_at = DateTime::parse_from_rfc3339(&generated_at)
            .map_err(|e| CacheError::Corrupt {
                key: "aggregate_meta".to_string(),
                reason: e.to_string(),
            })?
            .with_timezone(&Utc);

        let mut rows: Vec<AggregateRow> = sqlx::query_as::<_, AggregateRowRecord>(
            "SELECT * FROM aggregate_rows",
        )
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();
        rows.sort_by(|a, b| a.sort_order(b));

        Ok(Some(StoredSnapshot {
            generated_at,
            min_sample_size: min_sample_size.max(0) as u64,
            rows,
        }))
    }
}

/// Database row representation
#[derive(sqlx::FromRow)]
struct AggregateRowRecord {
    champion_id: i64,
    patch: String,
    league: String,
    games_played: i64,
    wins: i64,
    win_rate: f64,
    pick_rate: f64,
    win_rate_low: f64,
    win_rate_high: f64,
}

impl From<AggregateRowRecord> for AggregateRow {
    fn from(row: AggregateRowRecord) -> Self {
        AggregateRow {
            champion_id: row.champion_id,
            patch: row.patch,
            league: row.league,
            games_played: row.games_played.max(0) as u64,
            wins: row.wins.max(0) as u64,
            win_rate: row.win_rate,
            pick_rate_within_patch_league: row.pick_rate,
            win_rate_low: row.win_rate_low,
            win_rate_high: row.win_rate_high,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(champion_id: i64, patch: &str, games: u64, wins: u64) -> AggregateRow {
        AggregateRow {
            champion_id,
            patch: patch.to_string(),
            league: "LCK".to_string(),
            games_played: games,
            wins,
            win_rate: wins as f64 / games as f64,
            pick_rate_within_patch_league: 0.5,
            win_rate_low: 0.1,
            win_rate_high: 0.9,
        }
    }

    #[tokio::test]
    async fn test_save_replaces_previous_table() {
        let store = SnapshotStore::new("sqlite::memory:").await.unwrap();
        assert!(store.load().await.unwrap().is_none());

        store
            .save(&[row(103, "14.1", 3, 2), row(1, "14.1", 4, 1)], 1)
            .await
            .unwrap();
        store.save(&[row(7, "14.10", 5, 5)], 2).await.unwrap();

        let snapshot = store.load().await.unwrap().unwrap();
        assert_eq!(snapshot.min_sample_size, 2);
        assert_eq!(snapshot.rows, vec![row(7, "14.10", 5, 5)]);
    }

    #[tokio::test]
    async fn test_load_returns_sorted_rows() {
        let store = SnapshotStore::new("sqlite::memory:").await.unwrap();
        store
            .save(&[row(2, "14.10", 1, 1), row(5, "14.9", 1, 0), row(1, "14.10", 1, 1)], 0)
            .await
            .unwrap();

        let rows = store.load().await.unwrap().unwrap().rows;
        let keys: Vec<(String, i64)> = rows.into_iter().map(|r| (r.patch, r.champion_id)).collect();
        assert_eq!(
            keys,
            vec![
                ("14.9".to_string(), 5),
                ("14.10".to_string(), 1),
                ("14.10".to_string(), 2)
            ]
        );
    }
}
