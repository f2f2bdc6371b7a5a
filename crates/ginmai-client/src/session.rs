//! A signed-in user's view of GinMai.
//!
//! [`Session`] owns the realtime subscriptions, the live views they feed and
//! the reminder bookkeeping. Every subscription is tied to the session:
//! opening a view again replaces the previous subscription, and
//! [`Session::close`] tears everything down on logout.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ginmai_shared::protocol::{
    CreateMomentRequest, FeedbackRequest, NearbyQuery, ProfileRequest, ReportRequest,
};
use ginmai_shared::reliability::ReliabilityStats;
use ginmai_shared::types::{MomentId, UserId};
use ginmai_shared::{Conflict, GeoPoint, GinmaiError};
use ginmai_store::{
    Block, Connection, EatAgainMatch, FeedbackOutcome, Guest, MatchedUser, Moment, Report, User,
};

use crate::backend::{FeedEvent, FeedStream, MomentBackend, Result};
use crate::config::{BackendMode, ClientConfig};
use crate::events::{EventBus, SessionEvent};
use crate::geocode::{area_label, Geocoder, NoGeocoder};
use crate::identity::IdentityProvider;
use crate::realtime::{GuestRoster, MomentView, NameResolver};
use crate::reminders::{LocalScheduler, ReminderOutcome, ReminderScheduler};

/// How a join request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    Joined(Connection),
    /// The backend says this user already holds a seat.
    AlreadyJoined,
    /// The reply was lost, but the backend shows the seat as ours.
    Reconciled,
}

impl JoinOutcome {
    pub fn connection(&self) -> Option<&Connection> {
        match self {
            JoinOutcome::Joined(c) => Some(c),
            _ => None,
        }
    }
}

struct GuestFeed {
    roster: Arc<AsyncMutex<GuestRoster>>,
    task: JoinHandle<()>,
}

pub struct Session {
    user: UserId,
    backend: Arc<dyn MomentBackend>,
    config: ClientConfig,
    geocoder: Arc<dyn Geocoder>,
    events: EventBus,
    view: Arc<Mutex<MomentView>>,
    reminders: Arc<Mutex<ReminderScheduler>>,
    nearby_task: Option<JoinHandle<()>>,
    guest_feeds: HashMap<MomentId, GuestFeed>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    /// Start a session for whoever `identity` says is signed in.
    pub fn start(
        identity: &dyn IdentityProvider,
        backend: Arc<dyn MomentBackend>,
        scheduler: Arc<dyn LocalScheduler>,
        config: ClientConfig,
    ) -> Result<Self> {
        let user = identity
            .current_user_id()
            .ok_or_else(|| GinmaiError::unauthorized("sign in first"))?;

        if backend.mode() == BackendMode::LocalOnly {
            warn!("session running without a server, seat counts are device-local");
        }
        info!(user = %user, mode = ?backend.mode(), "session started");

        let reminders = ReminderScheduler::new(scheduler, &config);
        Ok(Self {
            user,
            backend,
            config,
            geocoder: Arc::new(NoGeocoder),
            events: EventBus::new(),
            view: Arc::new(Mutex::new(MomentView::default())),
            reminders: Arc::new(Mutex::new(reminders)),
            nearby_task: None,
            guest_feeds: HashMap::new(),
        })
    }

    pub fn with_geocoder(mut self, geocoder: Arc<dyn Geocoder>) -> Self {
        self.geocoder = geocoder;
        self
    }

    pub fn user_id(&self) -> UserId {
        self.user
    }

    pub fn mode(&self) -> BackendMode {
        self.backend.mode()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    // ------------------------------------------------------------------
    // Moments
    // ------------------------------------------------------------------

    /// Publish a new moment hosted by the session user.
    pub async fn publish_moment(&self, mut req: CreateMomentRequest) -> Result<Moment> {
        if req.area_name.as_deref().map_or(true, |a| a.trim().is_empty()) {
            req.area_name = Some(area_label(self.geocoder.as_ref(), req.location).await);
        }
        let moment = self.backend.create_moment(self.user, req).await?;
        self.sync_reminder(&moment);
        Ok(moment)
    }

    /// One-shot listing without a live subscription.
    pub async fn nearby(&self, center: GeoPoint, radius_km: Option<f64>, include_full: bool) -> Result<Vec<Moment>> {
        let query = NearbyQuery {
            lat: center.lat,
            lng: center.lng,
            radius_km,
            include_full,
        };
        self.backend.list_active(Some(self.user), query).await
    }

    /// Start (or restart) the live "near me" list around `center`.
    pub async fn open_nearby(&mut self, center: GeoPoint, radius_km: Option<f64>, include_full: bool) -> Result<()> {
        self.close_nearby();

        let query = NearbyQuery {
            lat: center.lat,
            lng: center.lng,
            radius_km,
            include_full,
        };
        let radius = radius_km.unwrap_or(ginmai_shared::constants::DEFAULT_RADIUS_KM);

        // Subscribe before the snapshot so nothing committed in between is lost.
        let stream = self.backend.subscribe_moments().await?;
        let snapshot = self.backend.list_active(Some(self.user), query).await?;
        let blocked = self.backend.list_blocks(self.user).await?;
        let count = snapshot.len();
        {
            let mut view = lock(&self.view);
            *view = MomentView::new(include_full)
                .with_area(center, radius)
                .with_blocked(blocked.into_iter().map(|b| b.blocked_id));
            view.replace_all(snapshot);
        }
        self.events.emit(SessionEvent::MomentsResynced { count });

        let feed = NearbyFeed {
            backend: self.backend.clone(),
            user: self.user,
            query,
            view: self.view.clone(),
            reminders: self.reminders.clone(),
            events: self.events.clone(),
        };
        self.nearby_task = Some(tokio::spawn(feed.run(stream)));
        debug!(lat = center.lat, lng = center.lng, radius, "nearby feed opened");
        Ok(())
    }

    pub fn close_nearby(&mut self) {
        if let Some(task) = self.nearby_task.take() {
            task.abort();
            debug!("nearby feed closed");
        }
    }

    /// The live list, soonest first.
    pub fn visible_moments(&self) -> Vec<Moment> {
        lock(&self.view).visible(Utc::now())
    }

    pub async fn moment(&self, moment: MomentId) -> Result<Moment> {
        self.backend.get_moment(moment).await
    }

    pub async fn hosted_moments(&self) -> Result<Vec<Moment>> {
        self.backend.list_hosted_moments(self.user).await
    }

    /// Take a seat. A reply that never arrives is reconciled against the
    /// backend before anything is retried, so a slow network cannot book
    /// the same user twice or report a failure for a seat we actually hold.
    pub async fn join(&self, moment: MomentId) -> Result<JoinOutcome> {
        let attempt = tokio::time::timeout(self.config.request_timeout, self.backend.join(self.user, moment)).await;

        let outcome = match attempt {
            Ok(Ok(connection)) => JoinOutcome::Joined(connection),
            Ok(Err(GinmaiError::Conflict(Conflict::AlreadyJoined))) => JoinOutcome::AlreadyJoined,
            Ok(Err(e)) if e.is_retryable() => self.reconcile_join(moment, &e.to_string()).await?,
            Ok(Err(e)) => return Err(e),
            Err(_) => self.reconcile_join(moment, "timed out").await?,
        };

        match self.backend.get_moment(moment).await {
            Ok(m) => self.sync_reminder(&m),
            Err(e) => debug!(moment = %moment, error = %e, "joined, but could not load moment for reminder"),
        }
        Ok(outcome)
    }

    async fn reconcile_join(&self, moment: MomentId, cause: &str) -> Result<JoinOutcome> {
        warn!(moment = %moment, cause, "join outcome unknown, reconciling");
        if self.backend.has_active_connection(self.user, moment).await? {
            return Ok(JoinOutcome::Reconciled);
        }
        match self.backend.join(self.user, moment).await {
            Ok(connection) => Ok(JoinOutcome::Joined(connection)),
            Err(GinmaiError::Conflict(Conflict::AlreadyJoined)) => Ok(JoinOutcome::AlreadyJoined),
            Err(e) => Err(e),
        }
    }

    pub async fn leave(&self, moment: MomentId) -> Result<Moment> {
        let m = self.backend.leave(self.user, moment).await?;
        lock(&self.reminders).cancel(moment);
        Ok(m)
    }

    pub async fn cancel_moment(&self, moment: MomentId) -> Result<Moment> {
        let m = self.backend.cancel_moment(self.user, moment).await?;
        lock(&self.reminders).cancel(moment);
        Ok(m)
    }

    pub async fn complete_moment(&self, moment: MomentId) -> Result<Moment> {
        let m = self.backend.complete_moment(self.user, moment).await?;
        lock(&self.reminders).cancel(moment);
        Ok(m)
    }

    // ------------------------------------------------------------------
    // Guests
    // ------------------------------------------------------------------

    /// Start (or restart) the live guest list for `moment`.
    pub async fn open_guests(&mut self, moment: MomentId) -> Result<()> {
        self.close_guests(moment);

        let stream = self.backend.subscribe_connections(self.user, moment).await?;
        let snapshot = self.backend.list_moment_guests(self.user, moment).await?;
        let count = snapshot.len();

        let mut roster = GuestRoster::new(moment);
        roster.seed(snapshot);
        let roster = Arc::new(AsyncMutex::new(roster));
        self.events.emit(SessionEvent::GuestsResynced { moment_id: moment, count });

        let feed = GuestFeedTask {
            names: BackendNames {
                backend: self.backend.clone(),
                viewer: self.user,
                moment,
            },
            roster: roster.clone(),
            events: self.events.clone(),
        };
        let task = tokio::spawn(feed.run(stream));
        self.guest_feeds.insert(moment, GuestFeed { roster, task });
        debug!(moment = %moment, "guest feed opened");
        Ok(())
    }

    pub fn close_guests(&mut self, moment: MomentId) {
        if let Some(feed) = self.guest_feeds.remove(&moment) {
            feed.task.abort();
            debug!(moment = %moment, "guest feed closed");
        }
    }

    /// Seated guests from the live roster, or an empty list if the roster
    /// is not open.
    pub async fn guests(&self, moment: MomentId) -> Vec<Guest> {
        match self.guest_feeds.get(&moment) {
            Some(feed) => feed.roster.lock().await.seated(),
            None => Vec::new(),
        }
    }

    pub async fn list_guests(&self, moment: MomentId) -> Result<Vec<Guest>> {
        self.backend.list_moment_guests(self.user, moment).await
    }

    pub async fn running_late(&self, moment: MomentId) -> Result<Connection> {
        self.backend.mark_running_late(self.user, moment).await
    }

    pub async fn arrived(&self, moment: MomentId) -> Result<Connection> {
        self.backend.mark_arrived(self.user, moment).await
    }

    pub async fn finish_meal(&self, moment: MomentId) -> Result<Connection> {
        let c = self.backend.complete_connection(self.user, moment).await?;
        lock(&self.reminders).cancel(moment);
        Ok(c)
    }

    pub async fn mark_no_show(&self, moment: MomentId, guest: UserId) -> Result<Connection> {
        self.backend.mark_no_show(self.user, moment, guest).await
    }

    pub async fn my_connections(&self) -> Result<Vec<Connection>> {
        self.backend.list_user_connections(self.user).await
    }

    // ------------------------------------------------------------------
    // Feedback, profile, safety
    // ------------------------------------------------------------------

    pub async fn submit_feedback(&self, moment: MomentId, req: FeedbackRequest) -> Result<FeedbackOutcome> {
        self.backend.submit_feedback(self.user, moment, req).await
    }

    pub async fn matches(&self) -> Result<Vec<EatAgainMatch>> {
        self.backend.list_user_matches(self.user).await
    }

    pub async fn matched_users(&self) -> Result<Vec<MatchedUser>> {
        self.backend.matched_users(self.user).await
    }

    pub async fn profile(&self) -> Result<User> {
        self.backend.get_profile(self.user).await
    }

    pub async fn update_profile(&self, req: ProfileRequest) -> Result<User> {
        self.backend.upsert_profile(self.user, req).await
    }

    pub async fn reliability(&self, user: UserId) -> Result<ReliabilityStats> {
        self.backend.reliability(user).await
    }

    /// Block `user`; their moments leave the live list immediately.
    pub async fn block(&self, user: UserId) -> Result<Block> {
        let block = self.backend.block_user(self.user, user).await?;
        let removed = lock(&self.view).set_blocked(user, true);
        for moment_id in removed {
            self.events.emit(SessionEvent::MomentRemoved { moment_id });
        }
        Ok(block)
    }

    pub async fn unblock(&self, user: UserId) -> Result<bool> {
        let removed = self.backend.unblock_user(self.user, user).await?;
        lock(&self.view).set_blocked(user, false);
        Ok(removed)
    }

    pub async fn blocks(&self) -> Result<Vec<Block>> {
        self.backend.list_blocks(self.user).await
    }

    pub async fn report(&self, req: ReportRequest) -> Result<Report> {
        self.backend.submit_report(self.user, req).await
    }

    pub async fn my_reports(&self) -> Result<Vec<Report>> {
        self.backend.list_user_reports(self.user).await
    }

    // ------------------------------------------------------------------
    // Reminders
    // ------------------------------------------------------------------

    fn sync_reminder(&self, moment: &Moment) {
        let outcome = lock(&self.reminders).sync_moment(moment, true, Utc::now());
        if let ReminderOutcome::Scheduled(_) = outcome {
            self.events.emit(SessionEvent::ReminderScheduled { moment_id: moment.id });
        }
    }

    /// Rebuild reminders from the backend: one per open moment the user
    /// hosts or holds a seat in. Returns how many are pending.
    pub async fn refresh_reminders(&self) -> Result<usize> {
        let mut moments: Vec<Moment> = self
            .backend
            .list_hosted_moments(self.user)
            .await?
            .into_iter()
            .filter(|m| m.status.is_open())
            .collect();

        let connections = self.backend.list_user_connections(self.user).await?;
        for c in connections.iter().filter(|c| c.status.holds_seat()) {
            if moments.iter().any(|m| m.id == c.moment_id) {
                continue;
            }
            match self.backend.get_moment(c.moment_id).await {
                Ok(m) => moments.push(m),
                Err(e) => debug!(moment = %c.moment_id, error = %e, "skipping reminder"),
            }
        }

        let mut reminders = lock(&self.reminders);
        reminders.reconcile(&moments, |m| m.status.is_open(), Utc::now());
        Ok(reminders.pending())
    }

    pub fn has_reminder(&self, moment: MomentId) -> bool {
        lock(&self.reminders).is_scheduled(moment)
    }

    /// Sign out: stop every feed and drop every pending reminder.
    pub fn close(&mut self) {
        self.abort_feeds();
        lock(&self.reminders).cancel_all();
        *lock(&self.view) = MomentView::default();
        info!(user = %self.user, "session closed");
    }

    fn abort_feeds(&mut self) {
        self.close_nearby();
        for (_, feed) in self.guest_feeds.drain() {
            feed.task.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.abort_feeds();
    }
}

// ---------------------------------------------------------------------------
// Feed tasks
// ---------------------------------------------------------------------------

struct NearbyFeed {
    backend: Arc<dyn MomentBackend>,
    user: UserId,
    query: NearbyQuery,
    view: Arc<Mutex<MomentView>>,
    reminders: Arc<Mutex<ReminderScheduler>>,
    events: EventBus,
}

impl NearbyFeed {
    async fn run(self, mut stream: FeedStream) {
        while let Some(event) = stream.next().await {
            match event {
                FeedEvent::Change(change) => {
                    let applied = lock(&self.view).apply(&change, Utc::now());
                    if let ginmai_store::ChangedRow::Moment(m) = &change.row {
                        // Moments we hold a reminder for follow cancellations
                        // and time changes.
                        let mut reminders = lock(&self.reminders);
                        if reminders.is_scheduled(m.id) {
                            reminders.sync_moment(m, true, Utc::now());
                        }
                    }
                    if let Some(e) = applied.to_event() {
                        self.events.emit(e);
                    }
                }
                FeedEvent::Resync => match self.backend.list_active(Some(self.user), self.query).await {
                    Ok(snapshot) => {
                        let count = snapshot.len();
                        lock(&self.view).replace_all(snapshot);
                        self.events.emit(SessionEvent::MomentsResynced { count });
                    }
                    Err(e) => warn!(error = %e, "nearby resync failed"),
                },
            }
        }
        debug!("nearby feed ended");
    }
}

struct GuestFeedTask {
    names: BackendNames,
    roster: Arc<AsyncMutex<GuestRoster>>,
    events: EventBus,
}

impl GuestFeedTask {
    async fn run(self, mut stream: FeedStream) {
        let moment = self.names.moment;
        while let Some(event) = stream.next().await {
            match event {
                FeedEvent::Change(change) => {
                    let mut roster = self.roster.lock().await;
                    if let Some(e) = roster.apply(&change, &self.names).await {
                        self.events.emit(e);
                    }
                }
                FeedEvent::Resync => {
                    match self.names.backend.list_moment_guests(self.names.viewer, moment).await {
                        Ok(guests) => {
                            let count = guests.len();
                            self.roster.lock().await.seed(guests);
                            self.events.emit(SessionEvent::GuestsResynced { moment_id: moment, count });
                        }
                        Err(e) => warn!(moment = %moment, error = %e, "guest resync failed"),
                    }
                }
            }
        }
        debug!(moment = %moment, "guest feed ended");
    }
}

/// Looks names up through the moment's guest listing.
struct BackendNames {
    backend: Arc<dyn MomentBackend>,
    viewer: UserId,
    moment: MomentId,
}

#[async_trait]
impl NameResolver for BackendNames {
    async fn display_name(&self, user: UserId) -> Option<String> {
        match self.backend.list_moment_guests(self.viewer, self.moment).await {
            Ok(guests) => guests
                .into_iter()
                .find(|g| g.user_id == user)
                .map(|g| g.display_name),
            Err(e) => {
                debug!(user = %user, error = %e, "could not resolve guest name");
                None
            }
        }
    }
}
