//! Async front door to the store.
//!
//! [`MomentEngine`] owns a [`Database`] behind a mutex and runs each call on
//! the blocking pool, stamping it with the current time. It is shared by the
//! HTTP server and the client's local-only backend, and is where host/guest
//! notifications are fanned out after a mutation commits.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::warn;

use ginmai_shared::notify::Notification;
use ginmai_shared::protocol::{FeedbackRequest, ProfileRequest, ReportRequest};
use ginmai_shared::reliability::ReliabilityStats;
use ginmai_shared::types::{MomentId, UserId};
use ginmai_shared::GinmaiError;

use crate::changes::ChangeFeed;
use crate::database::Database;
use crate::error::{Result as StoreResult, StoreError};
use crate::models::{
    ActiveQuery, Block, Connection, EatAgainMatch, FeedbackOutcome, Guest, MatchOutcome,
    MatchedUser, Moment, NewFeedback, NewMoment, Report, User,
};
use crate::notifier::{Notifier, Recipient};
use crate::safety::NewReport;

type Result<T> = std::result::Result<T, GinmaiError>;

/// A notification waiting to be handed to the [`Notifier`].
type Outbound = (Recipient, Notification);

#[derive(Clone)]
pub struct MomentEngine {
    db: Arc<Mutex<Database>>,
    changes: ChangeFeed,
    notifier: Arc<dyn Notifier>,
}

impl MomentEngine {
    pub fn new(db: Database, notifier: Arc<dyn Notifier>) -> Self {
        let changes = db.changes().clone();
        Self {
            db: Arc::new(Mutex::new(db)),
            changes,
            notifier,
        }
    }

    /// Feed of committed moment and connection changes.
    pub fn changes(&self) -> &ChangeFeed {
        &self.changes
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Database) -> StoreResult<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = db.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| GinmaiError::unavailable(format!("store task failed: {e}")))?
        .map_err(GinmaiError::from)
    }

    async fn deliver(&self, outbound: Vec<Outbound>) {
        for (to, notification) in outbound {
            if let Err(e) = self.notifier.send(&to, &notification).await {
                warn!(user = %to.user_id, kind = ?notification.kind, error = %e, "notification failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Moments
    // ------------------------------------------------------------------

    pub async fn create_moment(&self, new: NewMoment) -> Result<Moment> {
        self.run(move |db| db.create_moment(&new, Utc::now())).await
    }

    pub async fn get_moment(&self, id: MomentId) -> Result<Moment> {
        self.run(move |db| db.get_moment(id)).await
    }

    pub async fn list_active(&self, query: ActiveQuery) -> Result<Vec<Moment>> {
        self.run(move |db| db.list_active(&query, Utc::now())).await
    }

    pub async fn list_hosted_moments(&self, host: UserId) -> Result<Vec<Moment>> {
        self.run(move |db| db.list_hosted_moments(host)).await
    }

    /// Take a seat and tell the host.
    pub async fn join(&self, moment: MomentId, user: UserId) -> Result<Connection> {
        let (connection, outbound) = self
            .run(move |db| {
                let connection = db.join(moment, user, Utc::now())?;
                let notice = host_notice(db, moment, user, |name| {
                    Notification::guest_joined(moment, name)
                });
                Ok((connection, notice))
            })
            .await?;
        self.deliver(outbound.into_iter().collect()).await;
        Ok(connection)
    }

    /// Give the seat back and tell the host.
    pub async fn leave(&self, moment: MomentId, user: UserId) -> Result<Moment> {
        let (updated, outbound) = self
            .run(move |db| {
                let updated = db.leave(moment, user, Utc::now())?;
                let notice = host_notice(db, moment, user, |name| {
                    Notification::guest_cancelled(moment, name)
                });
                Ok((updated, notice))
            })
            .await?;
        self.deliver(outbound.into_iter().collect()).await;
        Ok(updated)
    }

    pub async fn cancel_moment(&self, moment: MomentId, host: UserId) -> Result<Moment> {
        self.run(move |db| db.cancel_moment(moment, host, Utc::now()))
            .await
    }

    pub async fn complete_moment(&self, moment: MomentId, host: UserId) -> Result<Moment> {
        self.run(move |db| db.complete_moment(moment, host, Utc::now()))
            .await
    }

    pub async fn sweep_expired(&self) -> Result<Vec<MomentId>> {
        self.run(|db| db.sweep_expired(Utc::now())).await
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    pub async fn has_active_connection(&self, user: UserId, moment: MomentId) -> Result<bool> {
        self.run(move |db| db.has_active_connection(user, moment))
            .await
    }

    pub async fn list_user_connections(&self, user: UserId) -> Result<Vec<Connection>> {
        self.run(move |db| db.list_user_connections(user)).await
    }

    /// Guest list, visible to the host and to people holding a seat.
    pub async fn list_moment_guests(&self, moment: MomentId, viewer: UserId) -> Result<Vec<Guest>> {
        self.run(move |db| {
            let m = db.get_moment(moment)?;
            if !m.is_hosted_by(viewer) && !db.has_active_connection(viewer, moment)? {
                return Err(StoreError::unauthorized(
                    "only the host and guests can see who is coming",
                ));
            }
            db.list_moment_guests(moment)
        })
        .await
    }

    /// Flag running late; the host hears about it once.
    pub async fn mark_running_late(&self, moment: MomentId, user: UserId) -> Result<Connection> {
        let (connection, outbound) = self
            .run(move |db| {
                let (connection, first) = db.mark_running_late(moment, user, Utc::now())?;
                let notice = if first {
                    host_notice(db, moment, user, |name| {
                        Notification::guest_running_late(moment, name)
                    })
                } else {
                    None
                };
                Ok((connection, notice))
            })
            .await?;
        self.deliver(outbound.into_iter().collect()).await;
        Ok(connection)
    }

    pub async fn mark_arrived(&self, moment: MomentId, user: UserId) -> Result<Connection> {
        let (connection, outbound) = self
            .run(move |db| {
                let (connection, first) = db.mark_arrived(moment, user, Utc::now())?;
                let notice = if first {
                    host_notice(db, moment, user, |name| {
                        Notification::guest_arrived(moment, name)
                    })
                } else {
                    None
                };
                Ok((connection, notice))
            })
            .await?;
        self.deliver(outbound.into_iter().collect()).await;
        Ok(connection)
    }

    pub async fn complete_connection(&self, moment: MomentId, user: UserId) -> Result<Connection> {
        self.run(move |db| db.complete_connection(moment, user)).await
    }

    pub async fn mark_no_show(&self, moment: MomentId, guest: UserId, host: UserId) -> Result<Connection> {
        self.run(move |db| db.mark_no_show(moment, guest, host, Utc::now()))
            .await
    }

    // ------------------------------------------------------------------
    // Feedback
    // ------------------------------------------------------------------

    /// Record feedback and check for a mutual "eat again" atomically.
    ///
    /// A new match notifies both people.
    pub async fn submit_feedback(
        &self,
        moment: MomentId,
        from: UserId,
        req: FeedbackRequest,
    ) -> Result<FeedbackOutcome> {
        let (outcome, outbound) = self
            .run(move |db| {
                let new = NewFeedback {
                    moment_id: moment,
                    from_user: from,
                    about_user: req.about_user,
                    rating: req.rating,
                    eat_again: req.eat_again,
                    note: req.note,
                };
                let (feedback, outcome) = db.submit_feedback(&new, Utc::now())?;
                let matched = outcome.is_match();
                let outbound = match outcome {
                    MatchOutcome::Created { matched } => match_notices(db, &matched),
                    _ => Vec::new(),
                };
                Ok((FeedbackOutcome { feedback, matched }, outbound))
            })
            .await?;
        self.deliver(outbound).await;
        Ok(outcome)
    }

    pub async fn list_user_matches(&self, user: UserId) -> Result<Vec<EatAgainMatch>> {
        self.run(move |db| db.list_user_matches(user)).await
    }

    pub async fn matched_users(&self, user: UserId) -> Result<Vec<MatchedUser>> {
        self.run(move |db| db.matched_users(user)).await
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    pub async fn upsert_profile(&self, user: UserId, req: ProfileRequest) -> Result<User> {
        self.run(move |db| {
            db.upsert_user(user, &req.first_name, req.push_token.as_deref(), Utc::now())
        })
        .await
    }

    pub async fn get_user(&self, user: UserId) -> Result<User> {
        self.run(move |db| db.get_user(user)).await
    }

    pub async fn reliability(&self, user: UserId) -> Result<ReliabilityStats> {
        self.run(move |db| db.reliability(user)).await
    }

    // ------------------------------------------------------------------
    // Safety
    // ------------------------------------------------------------------

    pub async fn block_user(&self, blocker: UserId, blocked: UserId) -> Result<Block> {
        self.run(move |db| db.block_user(blocker, blocked, Utc::now()))
            .await
    }

    pub async fn unblock_user(&self, blocker: UserId, blocked: UserId) -> Result<bool> {
        self.run(move |db| db.unblock_user(blocker, blocked)).await
    }

    pub async fn list_blocks(&self, blocker: UserId) -> Result<Vec<Block>> {
        self.run(move |db| db.list_blocks(blocker)).await
    }

    pub async fn submit_report(&self, reporter: UserId, req: ReportRequest) -> Result<Report> {
        self.run(move |db| {
            db.submit_report(
                &NewReport {
                    reporter_id: reporter,
                    reported_user_id: req.reported_user_id,
                    moment_id: req.moment_id,
                    category: req.category,
                    description: req.description,
                },
                Utc::now(),
            )
        })
        .await
    }

    pub async fn list_user_reports(&self, reporter: UserId) -> Result<Vec<Report>> {
        self.run(move |db| db.list_user_reports(reporter)).await
    }
}

fn recipient(db: &Database, user: UserId) -> StoreResult<Recipient> {
    Ok(Recipient {
        user_id: user,
        push_token: db.push_token(user)?,
    })
}

/// Notification for the host of `moment` about something `actor` did.
///
/// Runs after the mutation has committed, so a failed lookup only costs
/// the notice. Legacy moments without a host id have nobody to notify.
fn host_notice(
    db: &Database,
    moment: MomentId,
    actor: UserId,
    build: impl FnOnce(&str) -> Notification,
) -> Option<Outbound> {
    let lookup = || -> StoreResult<Option<Outbound>> {
        let Some(host) = db.get_moment(moment)?.host_id else {
            return Ok(None);
        };
        let name = db.display_name(actor)?;
        Ok(Some((recipient(db, host)?, build(&name))))
    };
    lookup().unwrap_or_else(|e| {
        warn!(moment = %moment, user = %actor, error = %e, "could not build host notice");
        None
    })
}

fn match_notices(db: &Database, m: &EatAgainMatch) -> Vec<Outbound> {
    let build = || -> StoreResult<Vec<Outbound>> {
        let name_a = db.display_name(m.user_a)?;
        let name_b = db.display_name(m.user_b)?;
        Ok(vec![
            (
                recipient(db, m.user_a)?,
                Notification::eat_again_match(m.user_b, &name_b),
            ),
            (
                recipient(db, m.user_b)?,
                Notification::eat_again_match(m.user_a, &name_a),
            ),
        ])
    };
    build().unwrap_or_else(|e| {
        warn!(moment = %m.moment_id, error = %e, "could not build match notices");
        Vec::new()
    })
}
