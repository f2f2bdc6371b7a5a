//! v002 -- Safety tables.
//!
//! Adds `blocks` and `reports`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 1 to version 2.
const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS blocks (
    id          TEXT PRIMARY KEY NOT NULL,
    blocker_id  TEXT NOT NULL,
    blocked_id  TEXT NOT NULL,
    created_at  TEXT NOT NULL,

    CHECK (blocker_id <> blocked_id),
    UNIQUE (blocker_id, blocked_id)
);

CREATE INDEX IF NOT EXISTS idx_blocks_blocked ON blocks(blocked_id);

CREATE TABLE IF NOT EXISTS reports (
    id               TEXT PRIMARY KEY NOT NULL,
    reporter_id      TEXT NOT NULL,
    reported_user_id TEXT NOT NULL,
    moment_id        TEXT,                    -- nullable FK -> moments(id)
    category         TEXT NOT NULL,
    description      TEXT,
    status           TEXT NOT NULL DEFAULT 'pending',
    created_at       TEXT NOT NULL,

    FOREIGN KEY (moment_id) REFERENCES moments(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_reports_reporter ON reports(reporter_id, created_at DESC);
"#;

/// Apply the safety migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
