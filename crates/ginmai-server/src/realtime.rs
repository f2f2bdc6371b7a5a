//! Server-sent-event change streams.
//!
//! `/realtime/moments` carries every moment change; the per-moment
//! connections stream carries only connection changes for that moment. A
//! subscriber that falls behind the change feed gets a `resync` event and is
//! expected to refetch a snapshot.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use ginmai_shared::protocol::{SSE_EVENT_CHANGE, SSE_EVENT_RESYNC};
use ginmai_shared::types::MomentId;
use ginmai_shared::GinmaiError;
use ginmai_store::RowChange;

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::error::ServerError;

/// What a subscriber sees, before SSE framing.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedItem {
    Change(RowChange),
    /// The subscriber missed this many changes.
    Resync(u64),
}

pub async fn moments_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.engine.changes().subscribe();
    debug!("moment stream opened");
    Sse::new(feed(rx, RowChange::is_moment).map(to_event)).keep_alive(KeepAlive::default())
}

pub async fn connections_stream(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(moment): Path<MomentId>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServerError> {
    let m = state.engine.get_moment(moment).await?;
    if !m.is_hosted_by(user) && !state.engine.has_active_connection(user, moment).await? {
        return Err(GinmaiError::unauthorized("only the host and guests can follow this table").into());
    }

    let rx = state.engine.changes().subscribe();
    debug!(moment = %moment, user = %user, "connection stream opened");

    let keep = move |c: &RowChange| !c.is_moment() && c.moment_id() == moment;
    Ok(Sse::new(feed(rx, keep).map(to_event)).keep_alive(KeepAlive::default()))
}

/// Filtered view over a change-feed receiver. Ends when the feed closes.
pub fn feed<F>(rx: broadcast::Receiver<RowChange>, keep: F) -> impl Stream<Item = FeedItem>
where
    F: Fn(&RowChange) -> bool + Send + 'static,
{
    futures::stream::unfold((rx, keep), |(mut rx, keep)| async move {
        loop {
            match rx.recv().await {
                Ok(change) if keep(&change) => return Some((FeedItem::Change(change), (rx, keep))),
                Ok(_) => continue,
                Err(RecvError::Lagged(missed)) => {
                    debug!(missed, "subscriber lagged, asking for resync");
                    return Some((FeedItem::Resync(missed), (rx, keep)));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

fn to_event(item: FeedItem) -> Result<Event, Infallible> {
    let event = match item {
        FeedItem::Change(change) => match Event::default().event(SSE_EVENT_CHANGE).json_data(&change) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "could not encode change, asking for resync");
                Event::default().event(SSE_EVENT_RESYNC).data("0")
            }
        },
        FeedItem::Resync(missed) => Event::default().event(SSE_EVENT_RESYNC).data(missed.to_string()),
    };
    Ok(event)
}
