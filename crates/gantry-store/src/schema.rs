//! Database schema management.

use rusqlite::Connection;

/// Initialize the database schema.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}

const SCHEMA: &str = r#"
-- Job records. Timestamps are epoch milliseconds.
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    tag TEXT,
    requires_charging INTEGER NOT NULL DEFAULT 0,
    requires_device_idle INTEGER NOT NULL DEFAULT 0,
    requires_battery_not_low INTEGER NOT NULL DEFAULT 0,
    requires_storage_not_low INTEGER NOT NULL DEFAULT 0,
    required_network TEXT NOT NULL DEFAULT 'none',
    initial_delay_ms INTEGER NOT NULL DEFAULT 0,
    backoff_policy TEXT NOT NULL,
    backoff_base_delay_ms INTEGER NOT NULL,
    period_ms INTEGER,
    max_retries INTEGER NOT NULL,
    run_attempt_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    arguments TEXT NOT NULL DEFAULT '[]',
    enqueued_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    next_eligible_at INTEGER
);

-- Dependency edges: the dependent must not run until the prerequisite
-- succeeds. Immutable once created.
CREATE TABLE IF NOT EXISTS dependencies (
    prerequisite_id TEXT NOT NULL,
    dependent_id TEXT NOT NULL,
    PRIMARY KEY (prerequisite_id, dependent_id),
    FOREIGN KEY (prerequisite_id) REFERENCES jobs(id) ON DELETE CASCADE,
    FOREIGN KEY (dependent_id) REFERENCES jobs(id) ON DELETE CASCADE
);

-- Indexes for the scheduler's scan and graph queries
CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
CREATE INDEX IF NOT EXISTS idx_jobs_tag ON jobs(tag);
CREATE INDEX IF NOT EXISTS idx_jobs_updated ON jobs(updated_at);
CREATE INDEX IF NOT EXISTS idx_dependencies_dependent ON dependencies(dependent_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_creation() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        for table in ["jobs", "dependencies"] {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' AND name=?1")
                .unwrap();
            assert!(stmt.exists([table]).unwrap(), "missing table {table}");
        }
    }

    #[test]
    fn test_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
    }
}
