use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

const MIGRATION_V1_SQL: &str = r#"
CREATE TABLE canonical_documents (
    script_id       TEXT PRIMARY KEY,
    content         TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE drafts (
    script_id       TEXT NOT NULL,
    author_id       TEXT NOT NULL,
    content         TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    PRIMARY KEY (script_id, author_id)
);

CREATE TABLE suggestions (
    id                  TEXT PRIMARY KEY,
    script_id           TEXT NOT NULL,
    author_id           TEXT NOT NULL,
    diff_operations     TEXT NOT NULL,
    status              TEXT NOT NULL
        CHECK (status IN ('draft', 'pending', 'approved', 'rejected')),
    rejection_reason    TEXT NULL,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE INDEX suggestions_script_status_idx
    ON suggestions (script_id, status, created_at);
"#;

const MIGRATION_V2_SQL: &str = r#"
CREATE TABLE version_snapshots (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,
    id              TEXT NOT NULL UNIQUE,
    script_id       TEXT NOT NULL,
    content         TEXT NOT NULL,
    version_name    TEXT NULL,
    content_hash    TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE INDEX version_snapshots_script_idx
    ON version_snapshots (script_id, seq);
"#;

const MIGRATIONS: &[(i64, &str)] = &[(1, MIGRATION_V1_SQL), (2, MIGRATION_V2_SQL)];

#[derive(Debug)]
pub struct MetaDb {
    conn: Connection,
}

impl MetaDb {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database parent directory `{}`", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at `{}`", path.display()))?;
        Self::initialize(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        Self::initialize(conn)
    }

    fn initialize(mut conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            ",
        )
        .context("failed to configure sqlite pragmas")?;

        ensure_migration_table(&conn)?;
        apply_pending_migrations(&mut conn)?;

        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn schema_version(&self) -> Result<i64> {
        current_schema_version(&self.conn)
    }
}

fn ensure_migration_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL
        );
        ",
    )
    .context("failed to ensure schema_migrations table exists")
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| row.get(0))
        .context("failed to read current schema version")
}

fn apply_pending_migrations(conn: &mut Connection) -> Result<()> {
    let mut current_version = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current_version {
            continue;
        }

        let tx = conn.transaction().context("failed to start migration transaction")?;
        tx.execute_batch(sql).with_context(|| format!("failed to apply migration v{version}"))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, datetime('now'))",
            params![version],
        )
        .with_context(|| format!("failed to record migration v{version}"))?;
        tx.commit().with_context(|| format!("failed to commit migration v{version}"))?;
        current_version = *version;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;
    use tempfile::TempDir;

    use super::{MetaDb, MIGRATION_V1_SQL};

    const EXPECTED_TABLES: &[&str] =
        &["schema_migrations", "canonical_documents", "drafts", "suggestions", "version_snapshots"];

    fn table_exists(conn: &Connection, table: &str) -> bool {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(1) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get(0),
            )
            .expect("table existence query should succeed");
        count == 1
    }

    #[test]
    fn open_creates_schema_and_records_latest_migration() {
        let dir = TempDir::new().unwrap();
        let db = MetaDb::open(dir.path().join("nested/scriptdesk.db")).expect("db should open");

        for table in EXPECTED_TABLES {
            assert!(table_exists(db.connection(), table), "expected `{table}` table to exist");
        }
        assert_eq!(db.schema_version().expect("schema version should be readable"), 2);
    }

    #[test]
    fn opening_twice_is_idempotent_for_all_migrations() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scriptdesk.db");
        drop(MetaDb::open(&path).expect("first open should succeed"));

        let second = MetaDb::open(&path).expect("second open should succeed");
        let migration_rows: i64 = second
            .connection()
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .expect("schema migration count query should succeed");
        assert_eq!(migration_rows, 2);
    }

    #[test]
    fn existing_v1_schema_is_migrated_to_v2() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scriptdesk.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE schema_migrations (version INTEGER PRIMARY KEY, applied_at TEXT NOT NULL);",
            )
            .unwrap();
            conn.execute_batch(MIGRATION_V1_SQL).unwrap();
            conn.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (1, datetime('now'))",
                [],
            )
            .unwrap();
        }

        let db = MetaDb::open(&path).expect("db should upgrade from v1 to v2");
        assert_eq!(db.schema_version().unwrap(), 2);
        assert!(table_exists(db.connection(), "version_snapshots"));
    }
}
