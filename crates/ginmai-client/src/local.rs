//! [`MomentBackend`] over an on-device store.
//!
//! Seat accounting is still transactional within the device, but nothing
//! arbitrates between devices. Use it for offline demos and tests, never as
//! the production source of truth.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use ginmai_shared::constants::DEFAULT_RADIUS_KM;
use ginmai_shared::protocol::{
    CreateMomentRequest, FeedbackRequest, NearbyQuery, ProfileRequest, ReportRequest,
};
use ginmai_shared::reliability::ReliabilityStats;
use ginmai_shared::types::{MomentId, UserId};
use ginmai_shared::{GeoPoint, GinmaiError};
use ginmai_store::{
    ActiveQuery, Block, Connection, Database, EatAgainMatch, FeedbackOutcome, Guest, LogNotifier,
    MatchedUser, Moment, MomentEngine, NewMoment, Notifier, Report, RowChange, User,
};

use crate::backend::{FeedEvent, FeedStream, MomentBackend, Result};
use crate::config::BackendMode;

#[derive(Clone)]
pub struct LocalBackend {
    engine: MomentEngine,
}

impl LocalBackend {
    pub fn new(engine: MomentEngine) -> Self {
        warn!("local-only backend: seat limits are not enforced across devices");
        Self { engine }
    }

    pub fn open_default() -> Result<Self> {
        Ok(Self::with_database(Database::open_default()?, Arc::new(LogNotifier)))
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        Ok(Self::with_database(Database::open_at(path)?, Arc::new(LogNotifier)))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::with_database(Database::open_in_memory()?, Arc::new(LogNotifier)))
    }

    pub fn with_database(db: Database, notifier: Arc<dyn Notifier>) -> Self {
        Self::new(MomentEngine::new(db, notifier))
    }

    pub fn engine(&self) -> &MomentEngine {
        &self.engine
    }

    fn feed<F>(&self, keep: F) -> FeedStream
    where
        F: Fn(&RowChange) -> bool + Send + 'static,
    {
        let rx = self.engine.changes().subscribe();
        futures::stream::unfold((rx, keep), |(mut rx, keep)| async move {
            loop {
                match rx.recv().await {
                    Ok(change) if keep(&change) => return Some((FeedEvent::Change(change), (rx, keep))),
                    Ok(_) => continue,
                    Err(RecvError::Lagged(missed)) => {
                        debug!(missed, "local feed lagged");
                        return Some((FeedEvent::Resync, (rx, keep)));
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}

#[async_trait]
impl MomentBackend for LocalBackend {
    fn mode(&self) -> BackendMode {
        BackendMode::LocalOnly
    }

    async fn create_moment(&self, host: UserId, req: CreateMomentRequest) -> Result<Moment> {
        self.engine
            .create_moment(NewMoment {
                host_id: Some(host),
                host_name: req.host_name,
                starts_at: req.starts_at,
                duration: req.duration,
                location: req.location,
                place_name: req.place_name,
                area_name: req.area_name,
                seats_total: req.seats_total,
                note: req.note,
            })
            .await
    }

    async fn get_moment(&self, moment: MomentId) -> Result<Moment> {
        self.engine.get_moment(moment).await
    }

    async fn list_active(&self, viewer: Option<UserId>, query: NearbyQuery) -> Result<Vec<Moment>> {
        let center = GeoPoint::new(query.lat, query.lng);
        if !center.is_valid() {
            return Err(GinmaiError::validation("lat/lng is not a valid coordinate"));
        }
        self.engine
            .list_active(ActiveQuery {
                center,
                radius_km: query.radius_km.unwrap_or(DEFAULT_RADIUS_KM),
                viewer,
                include_full: query.include_full,
            })
            .await
    }

    async fn list_hosted_moments(&self, host: UserId) -> Result<Vec<Moment>> {
        self.engine.list_hosted_moments(host).await
    }

    async fn join(&self, user: UserId, moment: MomentId) -> Result<Connection> {
        self.engine.join(moment, user).await
    }

    async fn leave(&self, user: UserId, moment: MomentId) -> Result<Moment> {
        self.engine.leave(moment, user).await
    }

    async fn cancel_moment(&self, host: UserId, moment: MomentId) -> Result<Moment> {
        self.engine.cancel_moment(moment, host).await
    }

    async fn complete_moment(&self, host: UserId, moment: MomentId) -> Result<Moment> {
        self.engine.complete_moment(moment, host).await
    }

    async fn list_user_connections(&self, user: UserId) -> Result<Vec<Connection>> {
        self.engine.list_user_connections(user).await
    }

    async fn list_moment_guests(&self, viewer: UserId, moment: MomentId) -> Result<Vec<Guest>> {
        self.engine.list_moment_guests(moment, viewer).await
    }

    async fn mark_running_late(&self, user: UserId, moment: MomentId) -> Result<Connection> {
        self.engine.mark_running_late(moment, user).await
    }

    async fn mark_arrived(&self, user: UserId, moment: MomentId) -> Result<Connection> {
        self.engine.mark_arrived(moment, user).await
    }

    async fn complete_connection(&self, user: UserId, moment: MomentId) -> Result<Connection> {
        self.engine.complete_connection(moment, user).await
    }

    async fn mark_no_show(&self, host: UserId, moment: MomentId, guest: UserId) -> Result<Connection> {
        self.engine.mark_no_show(moment, guest, host).await
    }

    async fn has_active_connection(&self, user: UserId, moment: MomentId) -> Result<bool> {
        self.engine.has_active_connection(user, moment).await
    }

    async fn submit_feedback(
        &self,
        from: UserId,
        moment: MomentId,
        req: FeedbackRequest,
    ) -> Result<FeedbackOutcome> {
        self.engine.submit_feedback(moment, from, req).await
    }

    async fn list_user_matches(&self, user: UserId) -> Result<Vec<EatAgainMatch>> {
        self.engine.list_user_matches(user).await
    }

    async fn matched_users(&self, user: UserId) -> Result<Vec<MatchedUser>> {
        self.engine.matched_users(user).await
    }

    async fn get_profile(&self, user: UserId) -> Result<User> {
        self.engine.get_user(user).await
    }

    async fn upsert_profile(&self, user: UserId, req: ProfileRequest) -> Result<User> {
        self.engine.upsert_profile(user, req).await
    }

    async fn reliability(&self, user: UserId) -> Result<ReliabilityStats> {
        self.engine.reliability(user).await
    }

    async fn block_user(&self, blocker: UserId, blocked: UserId) -> Result<Block> {
        self.engine.block_user(blocker, blocked).await
    }

    async fn unblock_user(&self, blocker: UserId, blocked: UserId) -> Result<bool> {
        self.engine.unblock_user(blocker, blocked).await
    }

    async fn list_blocks(&self, blocker: UserId) -> Result<Vec<Block>> {
        self.engine.list_blocks(blocker).await
    }

    async fn submit_report(&self, reporter: UserId, req: ReportRequest) -> Result<Report> {
        self.engine.submit_report(reporter, req).await
    }

    async fn list_user_reports(&self, reporter: UserId) -> Result<Vec<Report>> {
        self.engine.list_user_reports(reporter).await
    }

    async fn subscribe_moments(&self) -> Result<FeedStream> {
        Ok(self.feed(RowChange::is_moment))
    }

    async fn subscribe_connections(&self, viewer: UserId, moment: MomentId) -> Result<FeedStream> {
        let m = self.engine.get_moment(moment).await?;
        if !m.is_hosted_by(viewer) && !self.engine.has_active_connection(viewer, moment).await? {
            return Err(GinmaiError::unauthorized(
                "only the host and guests can follow this table",
            ));
        }
        Ok(self.feed(move |c: &RowChange| !c.is_moment() && c.moment_id() == moment))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::{Duration, Utc};
    use ginmai_shared::types::DurationClass;
    use ginmai_shared::Conflict;
    use ginmai_store::ChangedRow;

    use super::*;

    pub(crate) fn lunch_request(seats: u8) -> CreateMomentRequest {
        CreateMomentRequest {
            host_name: "Nok".into(),
            starts_at: Utc::now() + Duration::hours(1),
            duration: DurationClass::Normal,
            location: GeoPoint::new(13.7563, 100.5018),
            place_name: Some("Jay Fai".into()),
            area_name: None,
            seats_total: seats,
            note: None,
        }
    }

    #[tokio::test]
    async fn test_local_join_enforces_capacity() {
        let backend = LocalBackend::in_memory().unwrap();
        let moment = backend.create_moment(UserId::new(), lunch_request(1)).await.unwrap();

        backend.join(UserId::new(), moment.id).await.unwrap();
        let err = backend.join(UserId::new(), moment.id).await.unwrap_err();
        assert_eq!(err.conflict(), Some(Conflict::Full));
    }

    #[tokio::test]
    async fn test_handles_on_one_file_share_seats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ginmai.db");
        let first = LocalBackend::open_at(&path).unwrap();
        let second = LocalBackend::open_at(&path).unwrap();

        let moment = first.create_moment(UserId::new(), lunch_request(1)).await.unwrap();
        first.join(UserId::new(), moment.id).await.unwrap();

        let err = second.join(UserId::new(), moment.id).await.unwrap_err();
        assert_eq!(err.conflict(), Some(Conflict::Full));
    }

    #[tokio::test]
    async fn test_local_listing_uses_default_radius() {
        let backend = LocalBackend::in_memory().unwrap();
        backend.create_moment(UserId::new(), lunch_request(2)).await.unwrap();

        let near = NearbyQuery {
            lat: 13.7563,
            lng: 100.5018,
            radius_km: None,
            include_full: false,
        };
        assert_eq!(backend.list_active(None, near).await.unwrap().len(), 1);

        let far = NearbyQuery { lat: 18.7883, lng: 98.9853, ..near };
        assert!(backend.list_active(None, far).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connection_feed_requires_participation() {
        let backend = LocalBackend::in_memory().unwrap();
        let host = UserId::new();
        let moment = backend.create_moment(host, lunch_request(2)).await.unwrap();

        let stranger = backend.subscribe_connections(UserId::new(), moment.id).await;
        assert!(matches!(stranger, Err(GinmaiError::Unauthorized(_))));

        let mut feed = backend.subscribe_connections(host, moment.id).await.unwrap();
        let guest = UserId::new();
        backend.join(guest, moment.id).await.unwrap();

        match feed.next().await {
            Some(FeedEvent::Change(RowChange { row: ChangedRow::Connection(c), .. })) => {
                assert_eq!(c.user_id, guest)
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
