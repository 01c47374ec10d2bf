pub mod cache;
pub mod snapshots;

use std::str::FromStr;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Sqlite,
};

pub use cache::{CacheStats, CacheStore, MemoryCacheStore, ResponseCache, SqliteCacheStore};
pub use snapshots::{SnapshotStore, StoredSnapshot};

/// Open (and create if needed) a SQLite database
pub async fn connect(database_url: &str) -> Result<Pool<Sqlite>, sqlx::Error> {
    // Create data directory if needed
    if let Some(path) = database_url.strip_prefix("sqlite:") {
        if !path.contains(":memory:") {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }
    }

    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    // Every connection to `:memory:` is a separate database, so keep exactly one alive
    let pool_options = if database_url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    };

    pool_options.connect_with(options).await
}
