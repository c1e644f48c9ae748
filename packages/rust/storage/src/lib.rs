//! Turso Embedded / libSQL storage layer.
//!
//! The [`Storage`] struct wraps a libSQL database holding the seen-fingerprint
//! table and run history. [`SeenStore`] layers the fail-open policy and write
//! serialization on top of it; the pipeline only talks to [`SeenStore`].

mod migrations;
pub mod seen;

use std::path::Path;

use chrono::{DateTime, Utc};
use feeddigest_shared::{FeedDigestError, Fingerprint, Result, SeenRecord};
use libsql::{Connection, Database, params};
use uuid::Uuid;

pub use seen::SeenStore;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

fn store_err(e: impl std::fmt::Display) -> FeedDigestError {
    FeedDigestError::StoreUnavailable(e.to_string())
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| FeedDigestError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(store_err)?;

        let conn = db.connect().map_err(store_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` for inspection only.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FeedDigestError::StoreUnavailable(format!(
                "no database at {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(store_err)?;

        let conn = db.connect().map_err(store_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        FeedDigestError::StoreUnavailable(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(FeedDigestError::StoreUnavailable(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Seen operations
    // -----------------------------------------------------------------------

    /// Whether `fingerprint` has a seen record.
    pub async fn seen_contains(&self, fingerprint: &Fingerprint) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM seen WHERE fingerprint = ?1",
                params![fingerprint.to_hex()],
            )
            .await
            .map_err(store_err)?;

        match rows.next().await {
            Ok(row) => Ok(row.is_some()),
            Err(e) => Err(store_err(e)),
        }
    }

    /// Insert a seen record unless one already exists for its fingerprint.
    ///
    /// Returns `true` only for the caller whose insert created the record.
    pub async fn seen_insert(&self, record: &SeenRecord) -> Result<bool> {
        self.check_writable()?;
        let affected = self
            .conn
            .execute(
                "INSERT INTO seen (fingerprint, first_seen_ms, feed, title)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(fingerprint) DO NOTHING",
                params![
                    record.fingerprint.to_hex(),
                    record.first_seen.timestamp_millis(),
                    record.feed.as_deref(),
                    record.title.as_deref(),
                ],
            )
            .await
            .map_err(store_err)?;
        Ok(affected == 1)
    }

    /// Delete seen records first seen before `older_than`. Returns the number removed.
    pub async fn seen_prune(&self, older_than: DateTime<Utc>) -> Result<u64> {
        self.check_writable()?;
        self.conn
            .execute(
                "DELETE FROM seen WHERE first_seen_ms < ?1",
                params![older_than.timestamp_millis()],
            )
            .await
            .map_err(store_err)
    }

    /// Number of seen records.
    pub async fn seen_count(&self) -> Result<u64> {
        let mut rows = self
            .conn
            .query("SELECT COUNT(*) FROM seen", params![])
            .await
            .map_err(store_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).map_err(store_err)? as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(store_err(e)),
        }
    }

    // -----------------------------------------------------------------------
    // Run history
    // -----------------------------------------------------------------------

    /// Record the start of a run. Returns the generated run ID.
    pub async fn insert_run(&self) -> Result<String> {
        self.check_writable()?;
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO runs (id, started_at) VALUES (?1, ?2)",
                params![id.as_str(), now.as_str()],
            )
            .await
            .map_err(store_err)?;
        Ok(id)
    }

    /// Mark a run finished with its stats.
    pub async fn finish_run(&self, run_id: &str, stats_json: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "UPDATE runs SET finished_at = ?1, stats_json = ?2 WHERE id = ?3",
                params![now.as_str(), stats_json, run_id],
            )
            .await
            .map_err(store_err)?;
        Ok(())
    }

    /// Most recent runs, newest first.
    pub async fn recent_runs(&self, limit: u32) -> Result<Vec<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, started_at, finished_at, stats_json
                 FROM runs ORDER BY started_at DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(store_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(RunRecord {
                id: row.get::<String>(0).map_err(store_err)?,
                started_at: row.get::<String>(1).map_err(store_err)?,
                finished_at: row.get::<String>(2).ok(),
                stats_json: row.get::<String>(3).ok(),
            });
        }
        Ok(results)
    }
}

/// One row of run history.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: String,
    pub started_at: String,
    /// `None` for a run that never finished (crash or kill).
    pub finished_at: Option<String>,
    pub stats_json: Option<String>,
}
