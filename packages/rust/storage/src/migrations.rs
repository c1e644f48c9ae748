//! SQL migration definitions for the feeddigest database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed as one batch.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: seen fingerprints",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Fingerprints of articles already processed by a run
CREATE TABLE IF NOT EXISTS seen (
    fingerprint   TEXT PRIMARY KEY,
    first_seen_ms INTEGER NOT NULL,
    feed          TEXT,
    title         TEXT
);

CREATE INDEX IF NOT EXISTS idx_seen_first_seen ON seen(first_seen_ms);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Run history",
            sql: r#"
CREATE TABLE IF NOT EXISTS runs (
    id          TEXT PRIMARY KEY,
    started_at  TEXT NOT NULL,
    finished_at TEXT,
    stats_json  TEXT
);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_ascending_and_unique() {
        let versions: Vec<u32> = all_migrations().iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 2]);
        for m in all_migrations() {
            assert!(m.sql.contains(&format!("VALUES ({})", m.version)));
        }
    }
}
