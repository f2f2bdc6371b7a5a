//! Connection ledger: who joined which moment, and what became of it.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection as SqlConnection, OptionalExtension};
use tracing::{debug, info};

use ginmai_shared::constants::FALLBACK_DISPLAY_NAME;
use ginmai_shared::types::{ConnectionStatus, MomentId, UserId};

use crate::changes::{ChangeKind, RowChange};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Connection, Guest};
use crate::moments::load_moment;
use crate::rows::{get_enum, get_id, get_opt_ts, get_ts, opt_ts, ts};

const CONNECTION_COLUMNS: &str = "id, moment_id, user_id, status, joined_at, arrived_at, \
     cancelled_at, running_late, running_late_at";

impl Database {
    /// Whether `user` holds, or has completed, a seat at `moment`.
    pub fn has_active_connection(&self, user: UserId, moment: MomentId) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM connections
                 WHERE user_id = ?1 AND moment_id = ?2
                   AND status IN ('confirmed', 'completed', 'arrived')
                 LIMIT 1",
                params![user.to_string(), moment.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// The user's most recent non-cancelled connection to a moment.
    pub fn get_connection(&self, moment: MomentId, user: UserId) -> Result<Connection> {
        latest_connection(self.conn(), moment, user)?.ok_or(StoreError::NotFound("connection"))
    }

    /// All non-cancelled connections of a user, newest first.
    pub fn list_user_connections(&self, user: UserId) -> Result<Vec<Connection>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CONNECTION_COLUMNS}
             FROM connections
             WHERE user_id = ?1 AND status <> 'cancelled'
             ORDER BY joined_at DESC"
        ))?;

        let rows = stmt.query_map(params![user.to_string()], row_to_connection)?;

        let mut connections = Vec::new();
        for row in rows {
            connections.push(row?);
        }
        Ok(connections)
    }

    /// Guests of a moment, with display names, in join order.
    ///
    /// Cancelled connections are left out.
    pub fn list_moment_guests(&self, moment: MomentId) -> Result<Vec<Guest>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id, c.user_id, u.first_name, c.joined_at, c.status, c.running_late
             FROM connections c
             LEFT JOIN users u ON u.id = c.user_id
             WHERE c.moment_id = ?1 AND c.status <> 'cancelled'
             ORDER BY c.joined_at ASC",
        )?;

        let rows = stmt.query_map(params![moment.to_string()], |row| {
            let name: Option<String> = row.get(2)?;
            Ok(Guest {
                connection_id: get_id(row, 0)?,
                user_id: get_id(row, 1)?,
                display_name: name
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_string()),
                joined_at: get_ts(row, 3)?,
                status: get_enum(row, 4)?,
                running_late: row.get(5)?,
            })
        })?;

        let mut guests = Vec::new();
        for row in rows {
            guests.push(row?);
        }
        Ok(guests)
    }

    /// Flag the user's seat as running late.
    ///
    /// Returns the connection and whether this call set the flag, so the
    /// host is only told once.
    pub fn mark_running_late(
        &mut self,
        moment: MomentId,
        user: UserId,
        now: DateTime<Utc>,
    ) -> Result<(Connection, bool)> {
        let tx = self.write_tx()?;

        let connection =
            active_connection(&tx, moment, user)?.ok_or(StoreError::NotFound("active connection"))?;
        if connection.running_late {
            return Ok((connection, false));
        }

        tx.execute(
            "UPDATE connections SET running_late = 1, running_late_at = ?2 WHERE id = ?1",
            params![connection.id.to_string(), ts(&now)],
        )?;
        tx.commit()?;

        let connection = Connection {
            running_late: true,
            running_late_at: Some(now),
            ..connection
        };

        info!(moment = %moment, user = %user, "guest running late");
        self.changes()
            .publish(RowChange::connection(ChangeKind::Update, connection.clone()));

        Ok((connection, true))
    }

    /// Record that the guest reached the venue. Repeat calls are no-ops.
    pub fn mark_arrived(
        &mut self,
        moment: MomentId,
        user: UserId,
        now: DateTime<Utc>,
    ) -> Result<(Connection, bool)> {
        let tx = self.write_tx()?;

        let connection =
            active_connection(&tx, moment, user)?.ok_or(StoreError::NotFound("active connection"))?;
        if connection.status == ConnectionStatus::Arrived {
            return Ok((connection, false));
        }

        tx.execute(
            "UPDATE connections SET status = 'arrived', arrived_at = ?2 WHERE id = ?1",
            params![connection.id.to_string(), ts(&now)],
        )?;
        tx.commit()?;

        let connection = Connection {
            status: ConnectionStatus::Arrived,
            arrived_at: Some(now),
            ..connection
        };

        info!(moment = %moment, user = %user, "guest arrived");
        self.changes()
            .publish(RowChange::connection(ChangeKind::Update, connection.clone()));

        Ok((connection, true))
    }

    /// Mark the user's own participation as completed.
    ///
    /// Idempotent; a `no_show` record is left as it is.
    pub fn complete_connection(&mut self, moment: MomentId, user: UserId) -> Result<Connection> {
        let tx = self.write_tx()?;

        let connection =
            latest_connection(&tx, moment, user)?.ok_or(StoreError::NotFound("connection"))?;
        if !connection.status.holds_seat() {
            return Ok(connection);
        }

        tx.execute(
            "UPDATE connections SET status = 'completed' WHERE id = ?1",
            params![connection.id.to_string()],
        )?;
        tx.commit()?;

        let connection = Connection {
            status: ConnectionStatus::Completed,
            ..connection
        };

        debug!(moment = %moment, user = %user, "connection completed");
        self.changes()
            .publish(RowChange::connection(ChangeKind::Update, connection.clone()));

        Ok(connection)
    }

    /// Host records that a confirmed guest never turned up.
    ///
    /// Only allowed once the moment has started. The seat stays counted.
    pub fn mark_no_show(
        &mut self,
        moment_id: MomentId,
        guest: UserId,
        by_host: UserId,
        now: DateTime<Utc>,
    ) -> Result<Connection> {
        let tx = self.write_tx()?;

        let moment = load_moment(&tx, moment_id)?;
        if !moment.is_hosted_by(by_host) {
            return Err(StoreError::unauthorized("only the host can mark a no-show"));
        }
        if moment.starts_at > now {
            return Err(StoreError::validation("the moment has not started yet"));
        }

        let connection = active_connection(&tx, moment_id, guest)?
            .ok_or(StoreError::NotFound("active connection"))?;
        if connection.status != ConnectionStatus::Confirmed {
            return Err(StoreError::validation("the guest has already arrived"));
        }

        tx.execute(
            "UPDATE connections SET status = 'no_show' WHERE id = ?1",
            params![connection.id.to_string()],
        )?;
        tx.commit()?;

        let connection = Connection {
            status: ConnectionStatus::NoShow,
            ..connection
        };

        info!(moment = %moment_id, guest = %guest, "guest marked as no-show");
        self.changes()
            .publish(RowChange::connection(ChangeKind::Update, connection.clone()));

        Ok(connection)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// The seat-holding (`confirmed` or `arrived`) connection for a pair, if any.
pub(crate) fn active_connection(
    conn: &SqlConnection,
    moment: MomentId,
    user: UserId,
) -> Result<Option<Connection>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {CONNECTION_COLUMNS} FROM connections
                 WHERE moment_id = ?1 AND user_id = ?2 AND status IN ('confirmed', 'arrived')"
            ),
            params![moment.to_string(), user.to_string()],
            row_to_connection,
        )
        .optional()?)
}

fn latest_connection(conn: &SqlConnection, moment: MomentId, user: UserId) -> Result<Option<Connection>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {CONNECTION_COLUMNS} FROM connections
                 WHERE moment_id = ?1 AND user_id = ?2 AND status <> 'cancelled'
                 ORDER BY joined_at DESC
                 LIMIT 1"
            ),
            params![moment.to_string(), user.to_string()],
            row_to_connection,
        )
        .optional()?)
}

/// Every seat-holding connection of a moment.
pub(crate) fn connections_holding_seats(conn: &SqlConnection, moment: MomentId) -> Result<Vec<Connection>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CONNECTION_COLUMNS} FROM connections
         WHERE moment_id = ?1 AND status IN ('confirmed', 'arrived')
         ORDER BY joined_at ASC"
    ))?;
    let rows = stmt.query_map(params![moment.to_string()], row_to_connection)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

pub(crate) fn insert_connection(conn: &SqlConnection, c: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO connections ({CONNECTION_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
        ),
        params![
            c.id.to_string(),
            c.moment_id.to_string(),
            c.user_id.to_string(),
            c.status.as_str(),
            ts(&c.joined_at),
            opt_ts(&c.arrived_at),
            opt_ts(&c.cancelled_at),
            c.running_late,
            opt_ts(&c.running_late_at),
        ],
    )?;
    Ok(())
}

fn row_to_connection(row: &rusqlite::Row<'_>) -> rusqlite::Result<Connection> {
    Ok(Connection {
        id: get_id(row, 0)?,
        moment_id: get_id(row, 1)?,
        user_id: get_id(row, 2)?,
        status: get_enum(row, 3)?,
        joined_at: get_ts(row, 4)?,
        arrived_at: get_opt_ts(row, 5)?,
        cancelled_at: get_opt_ts(row, 6)?,
        running_late: row.get(7)?,
        running_late_at: get_opt_ts(row, 8)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::moments::tests::{new_moment, now};

    fn joined() -> (Database, UserId, MomentId, UserId) {
        let mut db = Database::open_in_memory().unwrap();
        let host = UserId::new();
        let moment = db.create_moment(&new_moment(host, 3), now()).unwrap();
        let guest = UserId::new();
        db.join(moment.id, guest, now()).unwrap();
        (db, host, moment.id, guest)
    }

    #[test]
    fn has_active_connection_tracks_lifecycle() {
        let (mut db, _, moment, guest) = joined();
        assert!(db.has_active_connection(guest, moment).unwrap());
        assert!(!db.has_active_connection(UserId::new(), moment).unwrap());

        db.leave(moment, guest, now()).unwrap();
        assert!(!db.has_active_connection(guest, moment).unwrap());
        assert!(db.list_user_connections(guest).unwrap().is_empty());
    }

    #[test]
    fn user_connections_are_newest_first() {
        let mut db = Database::open_in_memory().unwrap();
        let host = UserId::new();
        let guest = UserId::new();
        let first = db.create_moment(&new_moment(host, 2), now()).unwrap();
        let second = db.create_moment(&new_moment(host, 2), now()).unwrap();

        db.join(first.id, guest, now()).unwrap();
        db.join(second.id, guest, now() + Duration::minutes(1)).unwrap();

        let list = db.list_user_connections(guest).unwrap();
        let moments: Vec<_> = list.iter().map(|c| c.moment_id).collect();
        assert_eq!(moments, vec![second.id, first.id]);
    }

    #[test]
    fn running_late_reports_first_time_only() {
        let (mut db, _, moment, guest) = joined();

        let (conn, first) = db.mark_running_late(moment, guest, now()).unwrap();
        assert!(first);
        assert!(conn.running_late);
        assert_eq!(conn.running_late_at, Some(now()));

        let (_, again) = db.mark_running_late(moment, guest, now()).unwrap();
        assert!(!again);
    }

    #[test]
    fn running_late_without_seat_is_not_found() {
        let (mut db, _, moment, _) = joined();
        let err = db.mark_running_late(moment, UserId::new(), now()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn arrival_keeps_the_seat() {
        let (mut db, _, moment, guest) = joined();
        let (conn, changed) = db.mark_arrived(moment, guest, now()).unwrap();
        assert!(changed);
        assert_eq!(conn.status, ConnectionStatus::Arrived);
        assert!(db.has_active_connection(guest, moment).unwrap());
        assert_eq!(db.get_moment(moment).unwrap().seats_taken, 1);

        let (_, changed) = db.mark_arrived(moment, guest, now()).unwrap();
        assert!(!changed);
    }

    #[test]
    fn complete_connection_is_idempotent() {
        let (mut db, _, moment, guest) = joined();
        let done = db.complete_connection(moment, guest).unwrap();
        assert_eq!(done.status, ConnectionStatus::Completed);
        let again = db.complete_connection(moment, guest).unwrap();
        assert_eq!(again.status, ConnectionStatus::Completed);
        assert!(db.has_active_connection(guest, moment).unwrap());
    }

    #[test]
    fn complete_connection_requires_a_record() {
        let (mut db, _, moment, _) = joined();
        let err = db.complete_connection(moment, UserId::new()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound("connection")));
    }

    #[test]
    fn no_show_only_after_start_and_by_host() {
        let (mut db, host, moment, guest) = joined();
        let started = db.get_moment(moment).unwrap().starts_at + Duration::minutes(15);

        let err = db.mark_no_show(moment, guest, host, now()).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        let err = db.mark_no_show(moment, guest, guest, started).unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized(_)));

        let conn = db.mark_no_show(moment, guest, host, started).unwrap();
        assert_eq!(conn.status, ConnectionStatus::NoShow);

        // The ledger keeps the record; it just no longer holds a seat.
        assert!(!db.has_active_connection(guest, moment).unwrap());
        assert_eq!(
            db.complete_connection(moment, guest).unwrap().status,
            ConnectionStatus::NoShow
        );
    }

    #[test]
    fn guests_fall_back_to_default_name() {
        let (mut db, _, moment, guest) = joined();
        let named = UserId::new();
        db.upsert_user(named, "Ploy", None, now()).unwrap();
        db.join(moment, named, now() + Duration::seconds(5)).unwrap();

        let guests = db.list_moment_guests(moment).unwrap();
        assert_eq!(guests.len(), 2);
        assert_eq!(guests[0].user_id, guest);
        assert_eq!(guests[0].display_name, FALLBACK_DISPLAY_NAME);
        assert_eq!(guests[1].display_name, "Ploy");
    }
}
