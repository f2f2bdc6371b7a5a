//! The seam between the session and whatever arbitrates seats.
//!
//! [`HttpBackend`](crate::http::HttpBackend) talks to the GinMai server;
//! [`LocalBackend`](crate::local::LocalBackend) drives an on-device store.
//! Calls are made on behalf of an explicit user so a backend never has to
//! know who is signed in.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::mpsc;

use ginmai_shared::protocol::{
    CreateMomentRequest, FeedbackRequest, NearbyQuery, ProfileRequest, ReportRequest,
};
use ginmai_shared::reliability::ReliabilityStats;
use ginmai_shared::types::{MomentId, UserId};
use ginmai_shared::GinmaiError;
use ginmai_store::{
    Block, Connection, EatAgainMatch, FeedbackOutcome, Guest, MatchedUser, Moment, Report,
    RowChange, User,
};

use crate::config::{BackendMode, ClientConfig};
use crate::http::HttpBackend;
use crate::local::LocalBackend;

pub type Result<T> = std::result::Result<T, GinmaiError>;

/// One item of a realtime subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Change(RowChange),
    /// Events were missed; the subscriber must refetch a full snapshot.
    Resync,
}

pub type FeedStream = BoxStream<'static, FeedEvent>;

#[async_trait]
pub trait MomentBackend: Send + Sync {
    fn mode(&self) -> BackendMode;

    // Moments
    async fn create_moment(&self, host: UserId, req: CreateMomentRequest) -> Result<Moment>;
    async fn get_moment(&self, moment: MomentId) -> Result<Moment>;
    async fn list_active(&self, viewer: Option<UserId>, query: NearbyQuery) -> Result<Vec<Moment>>;
    async fn list_hosted_moments(&self, host: UserId) -> Result<Vec<Moment>>;
    async fn join(&self, user: UserId, moment: MomentId) -> Result<Connection>;
    async fn leave(&self, user: UserId, moment: MomentId) -> Result<Moment>;
    async fn cancel_moment(&self, host: UserId, moment: MomentId) -> Result<Moment>;
    async fn complete_moment(&self, host: UserId, moment: MomentId) -> Result<Moment>;

    // Connections
    async fn list_user_connections(&self, user: UserId) -> Result<Vec<Connection>>;
    async fn list_moment_guests(&self, viewer: UserId, moment: MomentId) -> Result<Vec<Guest>>;
    async fn mark_running_late(&self, user: UserId, moment: MomentId) -> Result<Connection>;
    async fn mark_arrived(&self, user: UserId, moment: MomentId) -> Result<Connection>;
    async fn complete_connection(&self, user: UserId, moment: MomentId) -> Result<Connection>;
    async fn mark_no_show(&self, host: UserId, moment: MomentId, guest: UserId) -> Result<Connection>;

    /// Whether `user` holds a confirmed, arrived or completed connection.
    async fn has_active_connection(&self, user: UserId, moment: MomentId) -> Result<bool> {
        let connections = self.list_user_connections(user).await?;
        Ok(connections
            .iter()
            .any(|c| c.moment_id == moment && c.status.counts_as_joined()))
    }

    // Feedback
    async fn submit_feedback(
        &self,
        from: UserId,
        moment: MomentId,
        req: FeedbackRequest,
    ) -> Result<FeedbackOutcome>;
    async fn list_user_matches(&self, user: UserId) -> Result<Vec<EatAgainMatch>>;
    async fn matched_users(&self, user: UserId) -> Result<Vec<MatchedUser>>;

    // Profile
    async fn get_profile(&self, user: UserId) -> Result<User>;
    async fn upsert_profile(&self, user: UserId, req: ProfileRequest) -> Result<User>;
    async fn reliability(&self, user: UserId) -> Result<ReliabilityStats>;

    // Safety
    async fn block_user(&self, blocker: UserId, blocked: UserId) -> Result<Block>;
    async fn unblock_user(&self, blocker: UserId, blocked: UserId) -> Result<bool>;
    async fn list_blocks(&self, blocker: UserId) -> Result<Vec<Block>>;
    async fn submit_report(&self, reporter: UserId, req: ReportRequest) -> Result<Report>;
    async fn list_user_reports(&self, reporter: UserId) -> Result<Vec<Report>>;

    // Realtime
    async fn subscribe_moments(&self) -> Result<FeedStream>;
    /// Connection changes for one moment. Only its host and seat holders may
    /// subscribe.
    async fn subscribe_connections(&self, viewer: UserId, moment: MomentId) -> Result<FeedStream>;
}

/// Build the backend selected by `config.mode`.
pub fn connect(config: &ClientConfig) -> Result<Arc<dyn MomentBackend>> {
    match config.mode {
        BackendMode::Server => Ok(Arc::new(HttpBackend::new(config)?)),
        BackendMode::LocalOnly => Ok(Arc::new(LocalBackend::open_default()?)),
    }
}

/// Adapt an mpsc receiver fed by a background task into a [`FeedStream`].
pub(crate) fn receiver_stream(rx: mpsc::Receiver<FeedEvent>) -> FeedStream {
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (event, rx))
    })
    .boxed()
}
