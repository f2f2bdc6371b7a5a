//! v001 -- Initial schema creation.
//!
//! Creates the core tables: `users`, `moments`, `connections`, `feedback`,
//! and `eat_again_matches`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (profile data; ids come from the identity provider)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id          TEXT PRIMARY KEY NOT NULL,    -- UUID
    first_name  TEXT NOT NULL,
    push_token  TEXT,
    created_at  TEXT NOT NULL,                -- RFC-3339
    updated_at  TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Moments
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS moments (
    id          TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    host_id     TEXT,                         -- NULL only for legacy rows
    host_name   TEXT NOT NULL,
    starts_at   TEXT NOT NULL,
    duration    TEXT NOT NULL CHECK (duration IN ('quick', 'normal', 'long')),
    expires_at  TEXT NOT NULL,
    lat         REAL NOT NULL,
    lng         REAL NOT NULL,
    place_name  TEXT,
    area_name   TEXT,
    seats_total INTEGER NOT NULL CHECK (seats_total BETWEEN 1 AND 4),
    seats_taken INTEGER NOT NULL DEFAULT 0,
    note        TEXT,
    status      TEXT NOT NULL DEFAULT 'active'
                CHECK (status IN ('active', 'full', 'completed', 'cancelled')),
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,

    CHECK (seats_taken >= 0 AND seats_taken <= seats_total),
    CHECK (expires_at > starts_at)
);

CREATE INDEX IF NOT EXISTS idx_moments_status_expires
    ON moments(status, expires_at);
CREATE INDEX IF NOT EXISTS idx_moments_host ON moments(host_id);

-- ----------------------------------------------------------------
-- Connections (participation records)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS connections (
    id              TEXT PRIMARY KEY NOT NULL,
    moment_id       TEXT NOT NULL,
    user_id         TEXT NOT NULL,
    status          TEXT NOT NULL DEFAULT 'confirmed'
                    CHECK (status IN ('confirmed', 'cancelled', 'no_show', 'completed', 'arrived')),
    joined_at       TEXT NOT NULL,
    arrived_at      TEXT,
    cancelled_at    TEXT,
    running_late    INTEGER NOT NULL DEFAULT 0,   -- boolean 0/1
    running_late_at TEXT,

    FOREIGN KEY (moment_id) REFERENCES moments(id) ON DELETE CASCADE
);

-- At most one seat-holding connection per (moment, user).
CREATE UNIQUE INDEX IF NOT EXISTS idx_connections_active_pair
    ON connections(moment_id, user_id)
    WHERE status IN ('confirmed', 'arrived');

CREATE INDEX IF NOT EXISTS idx_connections_user ON connections(user_id, status);

-- ----------------------------------------------------------------
-- Feedback
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS feedback (
    id          TEXT PRIMARY KEY NOT NULL,
    moment_id   TEXT NOT NULL,
    from_user   TEXT NOT NULL,
    about_user  TEXT NOT NULL,
    rating      TEXT NOT NULL CHECK (rating IN ('great', 'okay', 'nope')),
    eat_again   INTEGER,                      -- nullable boolean
    note        TEXT,
    created_at  TEXT NOT NULL,

    UNIQUE (moment_id, from_user, about_user),
    FOREIGN KEY (moment_id) REFERENCES moments(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Eat-again matches (user_a_id < user_b_id)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS eat_again_matches (
    id          TEXT PRIMARY KEY NOT NULL,
    user_a_id   TEXT NOT NULL,
    user_b_id   TEXT NOT NULL,
    moment_id   TEXT NOT NULL,
    matched_at  TEXT NOT NULL,

    CHECK (user_a_id < user_b_id),
    UNIQUE (user_a_id, user_b_id, moment_id),
    FOREIGN KEY (moment_id) REFERENCES moments(id) ON DELETE CASCADE
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
