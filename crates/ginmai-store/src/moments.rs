//! Moment records and seat accounting.
//!
//! Seat counts are only ever changed inside a write transaction that also
//! inserts or cancels the matching connection row, and the `UPDATE` itself
//! re-checks capacity, so concurrent joiners can never overbook a moment.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection as SqlConnection, OptionalExtension};
use tracing::{debug, info};

use ginmai_shared::types::{ConnectionId, ConnectionStatus, MomentId, MomentStatus, UserId};
use ginmai_shared::{Conflict, GeoPoint};

use crate::changes::{ChangeKind, RowChange};
use crate::connections::{active_connection, connections_holding_seats, insert_connection};
use crate::database::Database;
use crate::error::{is_unique_violation, Result, StoreError};
use crate::models::{ActiveQuery, Connection, Moment, NewMoment};
use crate::rows::{get_enum, get_id, get_opt_id, get_ts, ts};
use crate::safety::is_blocked_pair;

pub(crate) const MOMENT_COLUMNS: &str = "id, host_id, host_name, starts_at, duration, expires_at, \
     lat, lng, place_name, area_name, seats_total, seats_taken, note, status, created_at, updated_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Publish a new moment. A host identity is mandatory.
    pub fn create_moment(&self, new: &NewMoment, now: DateTime<Utc>) -> Result<Moment> {
        let host = new.validate()?;

        let moment = Moment {
            id: MomentId::new(),
            host_id: Some(host),
            host_name: new.host_name.trim().to_string(),
            starts_at: new.starts_at,
            duration: new.duration,
            expires_at: new.expires_at(),
            location: new.location,
            place_name: non_blank(new.place_name.as_deref()),
            area_name: non_blank(new.area_name.as_deref()),
            seats_total: new.seats_total,
            seats_taken: 0,
            note: non_blank(new.note.as_deref()),
            status: MomentStatus::Active,
            created_at: now,
            updated_at: now,
        };

        self.conn().execute(
            &format!(
                "INSERT INTO moments ({MOMENT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
            ),
            params![
                moment.id.to_string(),
                moment.host_id.map(|h| h.to_string()),
                moment.host_name,
                ts(&moment.starts_at),
                moment.duration.as_str(),
                ts(&moment.expires_at),
                moment.location.lat,
                moment.location.lng,
                moment.place_name,
                moment.area_name,
                moment.seats_total,
                moment.seats_taken,
                moment.note,
                moment.status.as_str(),
                ts(&moment.created_at),
                ts(&moment.updated_at),
            ],
        )?;

        info!(
            moment = %moment.id,
            host = %host,
            seats_total = moment.seats_total,
            starts_at = %moment.starts_at,
            "moment created"
        );

        self.changes()
            .publish(RowChange::moment(ChangeKind::Insert, moment.clone()));

        Ok(moment)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single moment by id.
    pub fn get_moment(&self, id: MomentId) -> Result<Moment> {
        load_moment(self.conn(), id)
    }

    /// List moments that are open and unexpired at `now`, soonest first.
    ///
    /// Expiry is applied here regardless of the stored status.
    pub fn list_active(&self, query: &ActiveQuery, now: DateTime<Utc>) -> Result<Vec<Moment>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MOMENT_COLUMNS}
             FROM moments m
             WHERE (m.status = 'active' OR (?2 AND m.status = 'full'))
               AND m.expires_at > ?1
               AND (
                    ?3 IS NULL OR m.host_id IS NULL OR NOT EXISTS (
                        SELECT 1 FROM blocks b
                        WHERE (b.blocker_id = ?3 AND b.blocked_id = m.host_id)
                           OR (b.blocker_id = m.host_id AND b.blocked_id = ?3)
                    )
               )
             ORDER BY m.starts_at ASC"
        ))?;

        let rows = stmt.query_map(
            params![
                ts(&now),
                query.include_full,
                query.viewer.map(|v| v.to_string()),
            ],
            row_to_moment,
        )?;

        let mut moments = Vec::new();
        for row in rows {
            let moment = row?;
            if query.center.distance_km(&moment.location) <= query.radius_km {
                moments.push(moment);
            }
        }
        Ok(moments)
    }

    /// Moments a user hosts that have not been cancelled, soonest first.
    pub fn list_hosted_moments(&self, host: UserId) -> Result<Vec<Moment>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MOMENT_COLUMNS}
             FROM moments
             WHERE host_id = ?1 AND status <> 'cancelled'
             ORDER BY starts_at ASC"
        ))?;

        let rows = stmt.query_map(params![host.to_string()], row_to_moment)?;

        let mut moments = Vec::new();
        for row in rows {
            moments.push(row?);
        }
        Ok(moments)
    }

    // ------------------------------------------------------------------
    // Seat accounting
    // ------------------------------------------------------------------

    /// Take a seat. Either the seat increment and the new connection both
    /// commit, or neither does.
    pub fn join(&mut self, moment_id: MomentId, user: UserId, now: DateTime<Utc>) -> Result<Connection> {
        let tx = self.write_tx()?;

        let moment = load_moment(&tx, moment_id)?;

        if moment.is_hosted_by(user) {
            return Err(Conflict::AlreadyHost.into());
        }
        if let Some(host) = moment.host_id {
            if is_blocked_pair(&tx, host, user)? {
                return Err(Conflict::Blocked.into());
            }
        }
        if !moment.status.is_open() || moment.is_expired_at(now) {
            return Err(Conflict::MomentClosed.into());
        }
        if active_connection(&tx, moment_id, user)?.is_some() {
            return Err(Conflict::AlreadyJoined.into());
        }
        if moment.seats_taken >= moment.seats_total {
            return Err(Conflict::Full.into());
        }

        // Capacity is re-checked by the UPDATE itself.
        let claimed = tx.execute(
            "UPDATE moments
             SET seats_taken = seats_taken + 1,
                 status = CASE WHEN seats_taken + 1 >= seats_total THEN 'full' ELSE status END,
                 updated_at = ?2
             WHERE id = ?1 AND status = 'active' AND seats_taken < seats_total",
            params![moment_id.to_string(), ts(&now)],
        )?;
        if claimed == 0 {
            return Err(Conflict::Full.into());
        }

        let connection = Connection {
            id: ConnectionId::new(),
            moment_id,
            user_id: user,
            status: ConnectionStatus::Confirmed,
            joined_at: now,
            arrived_at: None,
            cancelled_at: None,
            running_late: false,
            running_late_at: None,
        };
        insert_connection(&tx, &connection).map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(Conflict::AlreadyJoined)
            } else {
                StoreError::Sqlite(e)
            }
        })?;

        let moment = load_moment(&tx, moment_id)?;
        tx.commit()?;

        info!(
            moment = %moment_id,
            user = %user,
            seats_taken = moment.seats_taken,
            seats_total = moment.seats_total,
            status = %moment.status,
            "guest joined moment"
        );

        self.changes().publish_all(vec![
            RowChange::moment(ChangeKind::Update, moment),
            RowChange::connection(ChangeKind::Insert, connection.clone()),
        ]);

        Ok(connection)
    }

    /// Give a seat back: cancel the user's seat-holding connection and
    /// decrement the count, reopening a full moment.
    pub fn leave(&mut self, moment_id: MomentId, user: UserId, now: DateTime<Utc>) -> Result<Moment> {
        let tx = self.write_tx()?;

        let moment = load_moment(&tx, moment_id)?;
        if !moment.status.is_open() {
            return Err(Conflict::MomentClosed.into());
        }

        let connection =
            active_connection(&tx, moment_id, user)?.ok_or(StoreError::NotFound("active connection"))?;

        tx.execute(
            "UPDATE connections
             SET status = 'cancelled', cancelled_at = ?2
             WHERE id = ?1 AND status IN ('confirmed', 'arrived')",
            params![connection.id.to_string(), ts(&now)],
        )?;

        tx.execute(
            "UPDATE moments
             SET seats_taken = MAX(seats_taken - 1, 0),
                 status = CASE WHEN status = 'full' THEN 'active' ELSE status END,
                 updated_at = ?2
             WHERE id = ?1",
            params![moment_id.to_string(), ts(&now)],
        )?;

        let moment = load_moment(&tx, moment_id)?;
        tx.commit()?;

        let connection = Connection {
            status: ConnectionStatus::Cancelled,
            cancelled_at: Some(now),
            ..connection
        };

        info!(
            moment = %moment_id,
            user = %user,
            seats_taken = moment.seats_taken,
            "guest left moment"
        );

        self.changes().publish_all(vec![
            RowChange::connection(ChangeKind::Update, connection),
            RowChange::moment(ChangeKind::Update, moment.clone()),
        ]);

        Ok(moment)
    }

    /// Host cancellation. Terminal; existing connections keep their status.
    pub fn cancel_moment(&mut self, moment_id: MomentId, by_host: UserId, now: DateTime<Utc>) -> Result<Moment> {
        let tx = self.write_tx()?;

        let moment = load_moment(&tx, moment_id)?;
        if !moment.is_hosted_by(by_host) {
            return Err(StoreError::unauthorized("only the host can cancel this moment"));
        }
        match moment.status {
            MomentStatus::Cancelled => return Ok(moment),
            MomentStatus::Completed => return Err(Conflict::MomentClosed.into()),
            MomentStatus::Active | MomentStatus::Full => {}
        }

        set_status(&tx, moment_id, MomentStatus::Cancelled, now)?;
        let moment = load_moment(&tx, moment_id)?;
        tx.commit()?;

        info!(moment = %moment_id, host = %by_host, "moment cancelled");

        self.changes()
            .publish(RowChange::moment(ChangeKind::Update, moment.clone()));

        Ok(moment)
    }

    /// Host marks the meal as done. Every seat-holding connection completes
    /// with it. Idempotent once completed.
    pub fn complete_moment(&mut self, moment_id: MomentId, by_host: UserId, now: DateTime<Utc>) -> Result<Moment> {
        let tx = self.write_tx()?;

        let moment = load_moment(&tx, moment_id)?;
        if !moment.is_hosted_by(by_host) {
            return Err(StoreError::unauthorized("only the host can complete this moment"));
        }
        match moment.status {
            MomentStatus::Completed => return Ok(moment),
            MomentStatus::Cancelled => return Err(Conflict::MomentClosed.into()),
            MomentStatus::Active | MomentStatus::Full => {}
        }

        let guests = connections_holding_seats(&tx, moment_id)?;
        tx.execute(
            "UPDATE connections SET status = 'completed'
             WHERE moment_id = ?1 AND status IN ('confirmed', 'arrived')",
            params![moment_id.to_string()],
        )?;
        set_status(&tx, moment_id, MomentStatus::Completed, now)?;

        let moment = load_moment(&tx, moment_id)?;
        tx.commit()?;

        info!(moment = %moment_id, guests = guests.len(), "moment completed");

        let mut changes = vec![RowChange::moment(ChangeKind::Update, moment.clone())];
        changes.extend(guests.into_iter().map(|c| {
            RowChange::connection(
                ChangeKind::Update,
                Connection {
                    status: ConnectionStatus::Completed,
                    ..c
                },
            )
        }));
        self.changes().publish_all(changes);

        Ok(moment)
    }

    // ------------------------------------------------------------------
    // Expiry
    // ------------------------------------------------------------------

    /// Rewrite open moments past their expiry to `completed`.
    ///
    /// Optional housekeeping: listings already filter on `expires_at`.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> Result<Vec<MomentId>> {
        let tx = self.write_tx()?;

        let expired: Vec<MomentId> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM moments
                 WHERE status IN ('active', 'full') AND expires_at <= ?1",
            )?;
            let rows = stmt.query_map(params![ts(&now)], |row| get_id::<MomentId>(row, 0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut swept = Vec::with_capacity(expired.len());
        for id in &expired {
            set_status(&tx, *id, MomentStatus::Completed, now)?;
            swept.push(load_moment(&tx, *id)?);
        }
        tx.commit()?;

        if !expired.is_empty() {
            debug!(count = expired.len(), "swept expired moments");
        }

        self.changes().publish_all(
            swept
                .into_iter()
                .map(|m| RowChange::moment(ChangeKind::Update, m))
                .collect(),
        );

        Ok(expired)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn set_status(conn: &SqlConnection, id: MomentId, status: MomentStatus, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE moments SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![id.to_string(), status.as_str(), ts(&now)],
    )?;
    Ok(())
}

pub(crate) fn load_moment(conn: &SqlConnection, id: MomentId) -> Result<Moment> {
    conn.query_row(
        &format!("SELECT {MOMENT_COLUMNS} FROM moments WHERE id = ?1"),
        params![id.to_string()],
        row_to_moment,
    )
    .optional()?
    .ok_or(StoreError::NotFound("moment"))
}

/// Map a `rusqlite::Row` selected with [`MOMENT_COLUMNS`] to a [`Moment`].
pub(crate) fn row_to_moment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Moment> {
    Ok(Moment {
        id: get_id(row, 0)?,
        host_id: get_opt_id(row, 1)?,
        host_name: row.get(2)?,
        starts_at: get_ts(row, 3)?,
        duration: get_enum(row, 4)?,
        expires_at: get_ts(row, 5)?,
        location: GeoPoint::new(row.get(6)?, row.get(7)?),
        place_name: row.get(8)?,
        area_name: row.get(9)?,
        seats_total: row.get(10)?,
        seats_taken: row.get(11)?,
        note: row.get(12)?,
        status: get_enum(row, 13)?,
        created_at: get_ts(row, 14)?,
        updated_at: get_ts(row, 15)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Barrier};

    use chrono::{Duration, TimeZone};
    use ginmai_shared::types::DurationClass;

    use super::*;

    pub(crate) fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 11, 0, 0).unwrap()
    }

    pub(crate) fn bangkok() -> GeoPoint {
        GeoPoint::new(13.7563, 100.5018)
    }

    pub(crate) fn new_moment(host: UserId, seats: u8) -> NewMoment {
        NewMoment {
            host_id: Some(host),
            host_name: "Nok".into(),
            starts_at: now() + Duration::hours(1),
            duration: DurationClass::Normal,
            location: bangkok(),
            place_name: Some("Jay Fai".into()),
            area_name: None,
            seats_total: seats,
            note: Some("Crab omelette, come hungry".into()),
        }
    }

    fn db_with_moment(seats: u8) -> (Database, UserId, Moment) {
        let db = Database::open_in_memory().unwrap();
        let host = UserId::new();
        let moment = db.create_moment(&new_moment(host, seats), now()).unwrap();
        (db, host, moment)
    }

    #[test]
    fn create_sets_initial_state() {
        let (db, host, moment) = db_with_moment(3);
        assert_eq!(moment.seats_taken, 0);
        assert_eq!(moment.status, MomentStatus::Active);
        assert_eq!(moment.host_id, Some(host));
        assert!(moment.expires_at > moment.starts_at);
        assert_eq!(db.get_moment(moment.id).unwrap(), moment);
    }

    #[test]
    fn create_without_host_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        let mut new = new_moment(UserId::new(), 2);
        new.host_id = None;
        assert!(matches!(db.create_moment(&new, now()), Err(StoreError::Validation(_))));
    }

    #[test]
    fn fills_up_then_rejects() {
        let (mut db, _, moment) = db_with_moment(3);
        for _ in 0..3 {
            db.join(moment.id, UserId::new(), now()).unwrap();
        }
        let full = db.get_moment(moment.id).unwrap();
        assert_eq!(full.seats_taken, 3);
        assert_eq!(full.status, MomentStatus::Full);

        let err = db.join(moment.id, UserId::new(), now()).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(Conflict::Full)));
        assert_eq!(db.get_moment(moment.id).unwrap().seats_taken, 3);
    }

    #[test]
    fn host_cannot_join_own_moment() {
        let (mut db, host, moment) = db_with_moment(2);
        let err = db.join(moment.id, host, now()).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(Conflict::AlreadyHost)));

        // Still rejected as host (not as full) once the moment fills up.
        db.join(moment.id, UserId::new(), now()).unwrap();
        db.join(moment.id, UserId::new(), now()).unwrap();
        let err = db.join(moment.id, host, now()).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(Conflict::AlreadyHost)));
    }

    #[test]
    fn duplicate_join_fails_without_side_effects() {
        let (mut db, _, moment) = db_with_moment(3);
        let guest = UserId::new();
        db.join(moment.id, guest, now()).unwrap();

        let err = db.join(moment.id, guest, now()).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(Conflict::AlreadyJoined)));
        assert_eq!(db.get_moment(moment.id).unwrap().seats_taken, 1);
        assert_eq!(db.list_user_connections(guest).unwrap().len(), 1);
    }

    #[test]
    fn join_unknown_moment_is_not_found() {
        let mut db = Database::open_in_memory().unwrap();
        let err = db.join(MomentId::new(), UserId::new(), now()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound("moment")));
    }

    #[test]
    fn leave_reverts_full_status() {
        let (mut db, _, moment) = db_with_moment(2);
        let guest = UserId::new();
        db.join(moment.id, guest, now()).unwrap();
        db.join(moment.id, UserId::new(), now()).unwrap();
        assert_eq!(db.get_moment(moment.id).unwrap().status, MomentStatus::Full);

        let after = db.leave(moment.id, guest, now()).unwrap();
        assert_eq!(after.seats_taken, 1);
        assert_eq!(after.status, MomentStatus::Active);
        assert!(!db.has_active_connection(guest, moment.id).unwrap());
    }

    #[test]
    fn leave_without_connection_is_not_found() {
        let (mut db, _, moment) = db_with_moment(2);
        let err = db.leave(moment.id, UserId::new(), now()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert_eq!(db.get_moment(moment.id).unwrap().seats_taken, 0);
    }

    #[test]
    fn rejoin_after_leaving_is_allowed() {
        let (mut db, _, moment) = db_with_moment(2);
        let guest = UserId::new();
        db.join(moment.id, guest, now()).unwrap();
        db.leave(moment.id, guest, now()).unwrap();
        db.join(moment.id, guest, now()).unwrap();
        assert_eq!(db.get_moment(moment.id).unwrap().seats_taken, 1);
    }

    #[test]
    fn seat_invariant_holds_over_mixed_sequence() {
        let (mut db, _, moment) = db_with_moment(2);
        let guests: Vec<UserId> = (0..4).map(|_| UserId::new()).collect();

        // Interleave joins and leaves, including ones that must fail.
        let script: &[(usize, bool)] = &[
            (0, true), (1, true), (2, true), (0, false), (0, false),
            (2, true), (3, true), (1, false), (1, false), (3, false),
            (2, false), (2, false), (0, true),
        ];
        for &(who, joining) in script {
            let _ = if joining {
                db.join(moment.id, guests[who], now()).map(|_| ())
            } else {
                db.leave(moment.id, guests[who], now()).map(|_| ())
            };
            let m = db.get_moment(moment.id).unwrap();
            assert!(m.seats_taken <= m.seats_total);
            assert_eq!(m.status == MomentStatus::Full, m.seats_taken == m.seats_total);
            let holders = connections_holding_seats(db.conn(), moment.id).unwrap();
            assert_eq!(holders.len(), usize::from(m.seats_taken));
        }
    }

    #[test]
    fn cancel_is_host_only_and_terminal() {
        let (mut db, host, moment) = db_with_moment(2);
        let guest = UserId::new();
        db.join(moment.id, guest, now()).unwrap();

        let err = db.cancel_moment(moment.id, guest, now()).unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized(_)));

        let cancelled = db.cancel_moment(moment.id, host, now()).unwrap();
        assert_eq!(cancelled.status, MomentStatus::Cancelled);

        // Existing connections keep their historical status.
        assert!(db.has_active_connection(guest, moment.id).unwrap());

        let err = db.join(moment.id, UserId::new(), now()).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(Conflict::MomentClosed)));
        let err = db.leave(moment.id, guest, now()).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(Conflict::MomentClosed)));

        // Cancelling twice is harmless.
        db.cancel_moment(moment.id, host, now()).unwrap();
    }

    #[test]
    fn cancel_while_full_lands_in_cancelled() {
        let (mut db, host, moment) = db_with_moment(1);
        db.join(moment.id, UserId::new(), now()).unwrap();
        let cancelled = db.cancel_moment(moment.id, host, now()).unwrap();
        assert_eq!(cancelled.status, MomentStatus::Cancelled);
        assert_eq!(cancelled.seats_taken, 1);
    }

    #[test]
    fn list_active_filters_expired_even_if_status_is_active() {
        let (db, _, moment) = db_with_moment(2);
        let query = ActiveQuery::near(bangkok());

        assert_eq!(db.list_active(&query, now()).unwrap().len(), 1);

        let later = moment.expires_at + Duration::seconds(1);
        assert!(db.list_active(&query, later).unwrap().is_empty());
        assert_eq!(db.get_moment(moment.id).unwrap().status, MomentStatus::Active);
    }

    #[test]
    fn list_active_orders_by_start_and_respects_radius() {
        let db = Database::open_in_memory().unwrap();
        let host = UserId::new();

        let mut late = new_moment(host, 2);
        late.starts_at = now() + Duration::hours(3);
        let mut soon = new_moment(host, 2);
        soon.starts_at = now() + Duration::minutes(20);
        let mut far = new_moment(host, 2);
        far.location = GeoPoint::new(18.7883, 98.9853);

        let late = db.create_moment(&late, now()).unwrap();
        let soon = db.create_moment(&soon, now()).unwrap();
        db.create_moment(&far, now()).unwrap();

        let ids: Vec<_> = db
            .list_active(&ActiveQuery::near(bangkok()), now())
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![soon.id, late.id]);
    }

    #[test]
    fn list_active_hides_full_unless_requested() {
        let (mut db, _, moment) = db_with_moment(1);
        db.join(moment.id, UserId::new(), now()).unwrap();

        let mut query = ActiveQuery::near(bangkok());
        assert!(db.list_active(&query, now()).unwrap().is_empty());
        query.include_full = true;
        assert_eq!(db.list_active(&query, now()).unwrap().len(), 1);
    }

    #[test]
    fn complete_moment_completes_guests() {
        let (mut db, host, moment) = db_with_moment(2);
        let guest = UserId::new();
        db.join(moment.id, guest, now()).unwrap();

        let done = db.complete_moment(moment.id, host, now()).unwrap();
        assert_eq!(done.status, MomentStatus::Completed);

        let connections = db.list_user_connections(guest).unwrap();
        assert_eq!(connections[0].status, ConnectionStatus::Completed);

        // Idempotent.
        db.complete_moment(moment.id, host, now()).unwrap();
    }

    #[test]
    fn sweep_rewrites_only_expired_open_moments() {
        let (mut db, host, moment) = db_with_moment(2);
        let mut later = new_moment(host, 2);
        later.starts_at = now() + Duration::days(1);
        let later = db.create_moment(&later, now()).unwrap();

        let swept = db.sweep_expired(moment.expires_at).unwrap();
        assert_eq!(swept, vec![moment.id]);
        assert_eq!(db.get_moment(moment.id).unwrap().status, MomentStatus::Completed);
        assert_eq!(db.get_moment(later.id).unwrap().status, MomentStatus::Active);
    }

    #[test]
    fn mutations_are_published_on_the_change_feed() {
        let (mut db, _, moment) = db_with_moment(2);
        let mut rx = db.changes().subscribe();

        let guest = UserId::new();
        db.join(moment.id, guest, now()).unwrap();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.kind, ChangeKind::Update);
        assert!(first.is_moment());
        let second = rx.try_recv().unwrap();
        assert_eq!(second.kind, ChangeKind::Insert);
        assert_eq!(second.moment_id(), moment.id);

        // Failed joins publish nothing.
        let _ = db.join(moment.id, guest, now());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn concurrent_joins_for_last_seat_never_overbook() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("race.db");

        let db = Database::open_at(&path).unwrap();
        let moment = db.create_moment(&new_moment(UserId::new(), 1), now()).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let path = path.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    let mut handle = Database::open_at(&path).unwrap();
                    barrier.wait();
                    handle.join(moment.id, UserId::new(), now())
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let joined = results.iter().filter(|r| r.is_ok()).count();
        let full = results
            .iter()
            .filter(|r| matches!(r, Err(StoreError::Conflict(Conflict::Full))))
            .count();
        assert_eq!((joined, full), (1, 1));

        let m = db.get_moment(moment.id).unwrap();
        assert_eq!(m.seats_taken, 1);
        assert_eq!(m.status, MomentStatus::Full);
    }

    #[test]
    fn concurrent_leaves_never_go_negative() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leave.db");

        let mut db = Database::open_at(&path).unwrap();
        let moment = db.create_moment(&new_moment(UserId::new(), 4), now()).unwrap();
        let guests: Vec<UserId> = (0..4).map(|_| UserId::new()).collect();
        for g in &guests {
            db.join(moment.id, *g, now()).unwrap();
        }

        let barrier = Arc::new(Barrier::new(guests.len() * 2));
        let handles: Vec<_> = guests
            .iter()
            .chain(guests.iter())
            .map(|guest| {
                let (path, barrier, guest) = (path.clone(), barrier.clone(), *guest);
                std::thread::spawn(move || {
                    let mut handle = Database::open_at(&path).unwrap();
                    barrier.wait();
                    handle.leave(moment.id, guest, now()).is_ok()
                })
            })
            .collect();

        let left = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(left, guests.len());
        assert_eq!(db.get_moment(moment.id).unwrap().seats_taken, 0);
    }
}
