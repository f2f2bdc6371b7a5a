//! Client-side views kept current by realtime change events.
//!
//! Delivery is at-least-once and may arrive out of order, so both views
//! de-duplicate by row id and drop changes older than what they already hold.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use ginmai_shared::constants::FALLBACK_DISPLAY_NAME;
use ginmai_shared::types::{ConnectionId, ConnectionStatus, MomentId, UserId};
use ginmai_shared::GeoPoint;
use ginmai_store::{ChangeKind, ChangedRow, Connection, Guest, Moment, RowChange};

use crate::events::SessionEvent;

// ---------------------------------------------------------------------------
// Nearby moments
// ---------------------------------------------------------------------------

/// What applying one change did to a [`MomentView`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewChange {
    Added(MomentId),
    Updated(MomentId),
    Removed(MomentId),
    Ignored,
}

impl ViewChange {
    pub fn to_event(self) -> Option<SessionEvent> {
        match self {
            ViewChange::Added(moment_id) => Some(SessionEvent::MomentAdded { moment_id }),
            ViewChange::Updated(moment_id) => Some(SessionEvent::MomentUpdated { moment_id }),
            ViewChange::Removed(moment_id) => Some(SessionEvent::MomentRemoved { moment_id }),
            ViewChange::Ignored => None,
        }
    }
}

/// The "moments near me" list.
#[derive(Debug, Clone, Default)]
pub struct MomentView {
    moments: HashMap<MomentId, Moment>,
    /// Newest `updated_at` seen per id, kept after a row leaves the view.
    seen: HashMap<MomentId, DateTime<Utc>>,
    area: Option<(GeoPoint, f64)>,
    blocked: HashSet<UserId>,
    include_full: bool,
}

impl MomentView {
    pub fn new(include_full: bool) -> Self {
        Self {
            include_full,
            ..Self::default()
        }
    }

    /// Restrict inserts to moments within `radius_km` of `center`.
    pub fn with_area(mut self, center: GeoPoint, radius_km: f64) -> Self {
        self.area = Some((center, radius_km));
        self
    }

    /// Hide moments hosted by these users.
    pub fn with_blocked(mut self, blocked: impl IntoIterator<Item = UserId>) -> Self {
        self.blocked = blocked.into_iter().collect();
        self
    }

    /// Start or stop hiding one host's moments. Returns the ids removed.
    pub fn set_blocked(&mut self, user: UserId, blocked: bool) -> Vec<MomentId> {
        if !blocked {
            self.blocked.remove(&user);
            return Vec::new();
        }
        self.blocked.insert(user);
        let gone: Vec<MomentId> = self
            .moments
            .values()
            .filter(|m| m.host_id == Some(user))
            .map(|m| m.id)
            .collect();
        for id in &gone {
            self.moments.remove(id);
        }
        gone
    }

    /// Replace everything with a fresh snapshot.
    pub fn replace_all(&mut self, snapshot: Vec<Moment>) {
        self.seen = snapshot.iter().map(|m| (m.id, m.updated_at)).collect();
        self.moments = snapshot
            .into_iter()
            .filter(|m| !self.is_blocked_host(m))
            .map(|m| (m.id, m))
            .collect();
    }

    pub fn apply(&mut self, change: &RowChange, now: DateTime<Utc>) -> ViewChange {
        let ChangedRow::Moment(incoming) = &change.row else {
            return ViewChange::Ignored;
        };
        let id = incoming.id;

        if let Some(seen) = self.seen.get(&id) {
            if incoming.updated_at < *seen {
                return ViewChange::Ignored;
            }
        }
        self.seen.insert(id, incoming.updated_at);

        if change.kind == ChangeKind::Delete {
            return match self.moments.remove(&id) {
                Some(_) => ViewChange::Removed(id),
                None => ViewChange::Ignored,
            };
        }

        if self.moments.get(&id) == Some(incoming) {
            return ViewChange::Ignored;
        }

        if self.wants(incoming, now) {
            match self.moments.insert(id, incoming.clone()) {
                Some(_) => ViewChange::Updated(id),
                None => ViewChange::Added(id),
            }
        } else {
            match self.moments.remove(&id) {
                Some(_) => ViewChange::Removed(id),
                None => ViewChange::Ignored,
            }
        }
    }

    fn wants(&self, moment: &Moment, now: DateTime<Utc>) -> bool {
        if !moment.is_listable_at(now, self.include_full) || self.is_blocked_host(moment) {
            return false;
        }
        match &self.area {
            Some((center, radius_km)) => center.distance_km(&moment.location) <= *radius_km,
            None => true,
        }
    }

    fn is_blocked_host(&self, moment: &Moment) -> bool {
        moment.host_id.is_some_and(|host| self.blocked.contains(&host))
    }

    /// Listable moments at `now`, soonest first.
    pub fn visible(&self, now: DateTime<Utc>) -> Vec<Moment> {
        let mut out: Vec<Moment> = self
            .moments
            .values()
            .filter(|m| m.is_listable_at(now, self.include_full))
            .cloned()
            .collect();
        out.sort_by_key(|m| m.starts_at);
        out
    }

    pub fn get(&self, id: MomentId) -> Option<&Moment> {
        self.moments.get(&id)
    }

    pub fn len(&self) -> usize {
        self.moments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moments.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Host's guest list
// ---------------------------------------------------------------------------

/// Resolves a user's display name for "guest joined" messages.
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn display_name(&self, user: UserId) -> Option<String>;
}

#[derive(Debug, Clone)]
struct RosterEntry {
    connection: Connection,
    version: DateTime<Utc>,
}

/// A host's live guest list for one moment.
#[derive(Debug, Clone)]
pub struct GuestRoster {
    moment_id: MomentId,
    entries: HashMap<ConnectionId, RosterEntry>,
    names: HashMap<UserId, String>,
}

/// Latest timestamp a connection row carries; stands in for a row version.
fn row_version(c: &Connection) -> DateTime<Utc> {
    [c.arrived_at, c.cancelled_at, c.running_late_at]
        .into_iter()
        .flatten()
        .fold(c.joined_at, |a, b| a.max(b))
}

impl GuestRoster {
    pub fn new(moment_id: MomentId) -> Self {
        Self {
            moment_id,
            entries: HashMap::new(),
            names: HashMap::new(),
        }
    }

    pub fn moment_id(&self) -> MomentId {
        self.moment_id
    }

    /// Replace the roster with a snapshot from the guest listing. Names
    /// learned earlier are kept for users no longer listed.
    pub fn seed(&mut self, guests: Vec<Guest>) {
        self.entries.clear();
        for g in guests {
            self.names.insert(g.user_id, g.display_name.clone());
            let connection = Connection {
                id: g.connection_id,
                moment_id: self.moment_id,
                user_id: g.user_id,
                status: g.status,
                joined_at: g.joined_at,
                arrived_at: None,
                cancelled_at: None,
                running_late: g.running_late,
                running_late_at: None,
            };
            self.entries.insert(
                g.connection_id,
                RosterEntry {
                    connection,
                    version: g.joined_at,
                },
            );
        }
    }

    /// Apply one change. Returns the event the host should see, if any.
    pub async fn apply<R>(&mut self, change: &RowChange, resolver: &R) -> Option<SessionEvent>
    where
        R: NameResolver + ?Sized,
    {
        let ChangedRow::Connection(incoming) = &change.row else {
            return None;
        };
        if incoming.moment_id != self.moment_id {
            return None;
        }

        if change.kind == ChangeKind::Delete {
            let entry = self.entries.remove(&incoming.id)?;
            return entry
                .connection
                .status
                .holds_seat()
                .then(|| self.cancelled_event(incoming.user_id));
        }

        let version = row_version(incoming);
        let previous = match self.entries.get(&incoming.id) {
            Some(held) if version < held.version || held.connection == *incoming => return None,
            Some(held) => Some(held.connection.clone()),
            None => None,
        };

        self.entries.insert(
            incoming.id,
            RosterEntry {
                connection: incoming.clone(),
                version,
            },
        );

        let user_id = incoming.user_id;
        let moment_id = self.moment_id;
        match previous {
            None if incoming.status.holds_seat() => {
                let name = self.resolve(user_id, resolver).await;
                Some(SessionEvent::GuestJoined { moment_id, user_id, name })
            }
            None => None,
            Some(prev) => {
                if prev.status.holds_seat() && incoming.status == ConnectionStatus::Cancelled {
                    Some(self.cancelled_event(user_id))
                } else if incoming.status == ConnectionStatus::Arrived
                    && prev.status != ConnectionStatus::Arrived
                {
                    let name = self.cached_name(user_id);
                    Some(SessionEvent::GuestArrived { moment_id, user_id, name })
                } else if incoming.running_late && !prev.running_late {
                    let name = self.cached_name(user_id);
                    Some(SessionEvent::GuestRunningLate { moment_id, user_id, name })
                } else {
                    None
                }
            }
        }
    }

    async fn resolve<R>(&mut self, user: UserId, resolver: &R) -> String
    where
        R: NameResolver + ?Sized,
    {
        if let Some(name) = self.names.get(&user) {
            return name.clone();
        }
        let name = resolver
            .display_name(user)
            .await
            .unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_string());
        self.names.insert(user, name.clone());
        name
    }

    fn cached_name(&self, user: UserId) -> String {
        self.names
            .get(&user)
            .cloned()
            .unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_string())
    }

    fn cancelled_event(&self, user_id: UserId) -> SessionEvent {
        SessionEvent::GuestCancelled {
            moment_id: self.moment_id,
            user_id,
            name: self.cached_name(user_id),
        }
    }

    /// Guests currently holding a seat, earliest first.
    pub fn seated(&self) -> Vec<Guest> {
        let mut out: Vec<Guest> = self
            .entries
            .values()
            .filter(|e| e.connection.status.holds_seat())
            .map(|e| Guest {
                connection_id: e.connection.id,
                user_id: e.connection.user_id,
                display_name: self.cached_name(e.connection.user_id),
                joined_at: e.connection.joined_at,
                status: e.connection.status,
                running_late: e.connection.running_late,
            })
            .collect();
        out.sort_by_key(|g| g.joined_at);
        out
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use ginmai_shared::types::{DurationClass, MomentStatus};

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 11, 0, 0).unwrap()
    }

    fn bangkok() -> GeoPoint {
        GeoPoint::new(13.7563, 100.5018)
    }

    fn moment(seats_taken: u8, status: MomentStatus, updated_at: DateTime<Utc>) -> Moment {
        let starts_at = now() + Duration::hours(1);
        Moment {
            id: MomentId::new(),
            host_id: Some(UserId::new()),
            host_name: "Nok".into(),
            starts_at,
            duration: DurationClass::Normal,
            expires_at: starts_at + Duration::minutes(75),
            location: bangkok(),
            place_name: None,
            area_name: Some("Sathorn".into()),
            seats_total: 2,
            seats_taken,
            note: None,
            status,
            created_at: now(),
            updated_at,
        }
    }

    fn connection(moment_id: MomentId, status: ConnectionStatus) -> Connection {
        Connection {
            id: ConnectionId::new(),
            moment_id,
            user_id: UserId::new(),
            status,
            joined_at: now(),
            arrived_at: None,
            cancelled_at: None,
            running_late: false,
            running_late_at: None,
        }
    }

    struct Names(HashMap<UserId, String>);

    #[async_trait]
    impl NameResolver for Names {
        async fn display_name(&self, user: UserId) -> Option<String> {
            self.0.get(&user).cloned()
        }
    }

    #[test]
    fn test_duplicate_insert_is_ignored() {
        let mut view = MomentView::new(false);
        let m = moment(0, MomentStatus::Active, now());
        let insert = RowChange::moment(ChangeKind::Insert, m.clone());

        assert_eq!(view.apply(&insert, now()), ViewChange::Added(m.id));
        assert_eq!(view.apply(&insert, now()), ViewChange::Ignored);
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn test_update_to_full_removes_from_view() {
        let mut view = MomentView::new(false);
        let m = moment(1, MomentStatus::Active, now());
        view.replace_all(vec![m.clone()]);

        let mut full = m.clone();
        full.seats_taken = 2;
        full.status = MomentStatus::Full;
        full.updated_at = now() + Duration::seconds(5);

        let change = RowChange::moment(ChangeKind::Update, full);
        assert_eq!(view.apply(&change, now()), ViewChange::Removed(m.id));
        assert!(view.is_empty());
    }

    #[test]
    fn test_full_moments_kept_when_requested() {
        let mut view = MomentView::new(true);
        let m = moment(2, MomentStatus::Full, now());
        let change = RowChange::moment(ChangeKind::Update, m.clone());
        assert_eq!(view.apply(&change, now()), ViewChange::Added(m.id));
    }

    #[test]
    fn test_stale_update_loses_to_newer_row() {
        let mut view = MomentView::new(false);
        let original = moment(0, MomentStatus::Active, now());

        let mut newer = original.clone();
        newer.seats_taken = 1;
        newer.updated_at = now() + Duration::seconds(10);
        let mut older = original.clone();
        older.status = MomentStatus::Cancelled;
        older.updated_at = now() + Duration::seconds(5);

        view.apply(&RowChange::moment(ChangeKind::Update, newer), now());
        let late = view.apply(&RowChange::moment(ChangeKind::Update, older), now());

        assert_eq!(late, ViewChange::Ignored);
        assert_eq!(view.get(original.id).map(|m| m.seats_taken), Some(1));
    }

    #[test]
    fn test_area_filter_and_ordering() {
        let mut view = MomentView::new(false).with_area(bangkok(), 5.0);
        let mut later = moment(0, MomentStatus::Active, now());
        later.starts_at = now() + Duration::hours(3);
        later.expires_at = later.starts_at + Duration::minutes(75);
        let sooner = moment(0, MomentStatus::Active, now());
        let mut far = moment(0, MomentStatus::Active, now());
        far.location = GeoPoint::new(18.7883, 98.9853);

        for m in [later.clone(), sooner.clone(), far] {
            view.apply(&RowChange::moment(ChangeKind::Insert, m), now());
        }

        let ids: Vec<MomentId> = view.visible(now()).iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![sooner.id, later.id]);
    }

    #[test]
    fn test_older_image_after_removal_stays_out() {
        let mut view = MomentView::new(false);
        let open = moment(1, MomentStatus::Active, now());
        view.replace_all(vec![open.clone()]);

        let mut full = open.clone();
        full.seats_taken = 2;
        full.status = MomentStatus::Full;
        full.updated_at = now() + Duration::seconds(5);
        assert_eq!(
            view.apply(&RowChange::moment(ChangeKind::Update, full), now()),
            ViewChange::Removed(open.id)
        );

        // The pre-join image shows up late.
        let late = view.apply(&RowChange::moment(ChangeKind::Update, open.clone()), now());
        assert_eq!(late, ViewChange::Ignored);
        assert!(view.is_empty());

        // A genuinely newer image (someone left) brings it back.
        let mut reopened = open.clone();
        reopened.updated_at = now() + Duration::seconds(9);
        assert_eq!(
            view.apply(&RowChange::moment(ChangeKind::Update, reopened), now()),
            ViewChange::Added(open.id)
        );
    }

    #[test]
    fn test_snapshot_resets_seen_versions() {
        let mut view = MomentView::new(false);
        let mut m = moment(0, MomentStatus::Active, now());
        m.updated_at = now() + Duration::seconds(30);
        view.apply(&RowChange::moment(ChangeKind::Insert, m.clone()), now());

        view.replace_all(Vec::new());
        m.updated_at = now();
        assert_eq!(
            view.apply(&RowChange::moment(ChangeKind::Insert, m.clone()), now()),
            ViewChange::Added(m.id)
        );
    }

    #[test]
    fn test_blocked_hosts_are_hidden() {
        let blocked_host = UserId::new();
        let mut view = MomentView::new(false).with_blocked([blocked_host]);

        let mut theirs = moment(0, MomentStatus::Active, now());
        theirs.host_id = Some(blocked_host);
        let other = moment(0, MomentStatus::Active, now());

        assert_eq!(
            view.apply(&RowChange::moment(ChangeKind::Insert, theirs.clone()), now()),
            ViewChange::Ignored
        );
        view.replace_all(vec![theirs.clone(), other.clone()]);
        assert_eq!(view.len(), 1);
        assert!(view.get(theirs.id).is_none());

        let other_host = other.host_id.unwrap();
        assert_eq!(view.set_blocked(other_host, true), vec![other.id]);
        assert!(view.is_empty());

        view.set_blocked(blocked_host, false);
        let mut newer = theirs.clone();
        newer.updated_at = now() + Duration::seconds(1);
        assert_eq!(
            view.apply(&RowChange::moment(ChangeKind::Update, newer), now()),
            ViewChange::Added(theirs.id)
        );
    }

    #[test]
    fn test_expired_moments_drop_out_of_visible() {
        let mut view = MomentView::new(false);
        let m = moment(0, MomentStatus::Active, now());
        view.replace_all(vec![m.clone()]);
        assert!(view.visible(m.expires_at).is_empty());
    }

    #[tokio::test]
    async fn test_guest_join_resolves_name_once() {
        let moment_id = MomentId::new();
        let mut roster = GuestRoster::new(moment_id);
        let c = connection(moment_id, ConnectionStatus::Confirmed);
        let names = Names(HashMap::from([(c.user_id, "Ploy".to_string())]));

        let insert = RowChange::connection(ChangeKind::Insert, c.clone());
        assert_eq!(
            roster.apply(&insert, &names).await,
            Some(SessionEvent::GuestJoined {
                moment_id,
                user_id: c.user_id,
                name: "Ploy".into()
            })
        );
        // Redelivery of the same insert produces nothing.
        assert_eq!(roster.apply(&insert, &names).await, None);
        assert_eq!(roster.seated().len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_uses_cached_name() {
        let moment_id = MomentId::new();
        let mut roster = GuestRoster::new(moment_id);
        let c = connection(moment_id, ConnectionStatus::Confirmed);
        roster.seed(vec![Guest {
            connection_id: c.id,
            user_id: c.user_id,
            display_name: "Ploy".into(),
            joined_at: c.joined_at,
            status: c.status,
            running_late: false,
        }]);

        let mut cancelled = c.clone();
        cancelled.status = ConnectionStatus::Cancelled;
        cancelled.cancelled_at = Some(now() + Duration::minutes(3));

        let event = roster
            .apply(&RowChange::connection(ChangeKind::Update, cancelled), &Names(HashMap::new()))
            .await;
        assert_eq!(
            event,
            Some(SessionEvent::GuestCancelled {
                moment_id,
                user_id: c.user_id,
                name: "Ploy".into()
            })
        );
        assert!(roster.seated().is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_name_falls_back() {
        let moment_id = MomentId::new();
        let mut roster = GuestRoster::new(moment_id);
        let c = connection(moment_id, ConnectionStatus::Confirmed);

        let event = roster
            .apply(&RowChange::connection(ChangeKind::Insert, c), &Names(HashMap::new()))
            .await;
        assert!(matches!(event, Some(SessionEvent::GuestJoined { name, .. }) if name == "Guest"));
    }

    #[tokio::test]
    async fn test_arrival_and_late_flags_emit_once() {
        let moment_id = MomentId::new();
        let mut roster = GuestRoster::new(moment_id);
        let names = Names(HashMap::new());
        let c = connection(moment_id, ConnectionStatus::Confirmed);
        roster.apply(&RowChange::connection(ChangeKind::Insert, c.clone()), &names).await;

        let mut late = c.clone();
        late.running_late = true;
        late.running_late_at = Some(now() + Duration::minutes(50));
        let event = roster.apply(&RowChange::connection(ChangeKind::Update, late.clone()), &names).await;
        assert!(matches!(event, Some(SessionEvent::GuestRunningLate { .. })));

        let mut arrived = late.clone();
        arrived.status = ConnectionStatus::Arrived;
        arrived.arrived_at = Some(now() + Duration::minutes(65));
        let event = roster.apply(&RowChange::connection(ChangeKind::Update, arrived), &names).await;
        assert!(matches!(event, Some(SessionEvent::GuestArrived { .. })));

        // An older image arriving late is dropped.
        let event = roster.apply(&RowChange::connection(ChangeKind::Update, late), &names).await;
        assert_eq!(event, None);
    }

    #[tokio::test]
    async fn test_other_moments_are_ignored() {
        let mut roster = GuestRoster::new(MomentId::new());
        let c = connection(MomentId::new(), ConnectionStatus::Confirmed);
        let event = roster
            .apply(&RowChange::connection(ChangeKind::Insert, c), &Names(HashMap::new()))
            .await;
        assert_eq!(event, None);
        assert!(roster.seated().is_empty());
    }
}
