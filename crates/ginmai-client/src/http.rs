//! [`MomentBackend`] over the GinMai HTTP API.
//!
//! Every call carries the acting user as a bearer token. Error bodies are
//! mapped back onto [`GinmaiError`] so callers can match on the same
//! conflicts the store raises. Realtime subscriptions are server-sent event
//! streams that reconnect on their own and emit [`FeedEvent::Resync`] after
//! every reconnect.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use ginmai_shared::protocol::{
    CreateMomentRequest, ErrorBody, FeedbackRequest, NearbyQuery, ProfileRequest, ReportRequest,
    SSE_EVENT_CHANGE, SSE_EVENT_RESYNC,
};
use ginmai_shared::reliability::ReliabilityStats;
use ginmai_shared::types::{MomentId, UserId};
use ginmai_shared::GinmaiError;
use ginmai_store::{
    Block, Connection, EatAgainMatch, FeedbackOutcome, Guest, MatchedUser, Moment, Report,
    RowChange, User,
};

use crate::backend::{receiver_stream, FeedEvent, FeedStream, MomentBackend, Result};
use crate::config::{BackendMode, ClientConfig};
use crate::sse::{SseDecoder, SseFrame};

const FEED_BUFFER: usize = 64;
const RECONNECT_INITIAL: Duration = Duration::from_millis(500);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    /// Separate client without a total timeout, for long-lived streams.
    stream_client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct UnblockResponse {
    removed: bool,
}

impl HttpBackend {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GinmaiError::unavailable(format!("http client: {e}")))?;
        let stream_client = Client::builder()
            .connect_timeout(config.request_timeout)
            .build()
            .map_err(|e| GinmaiError::unavailable(format!("http client: {e}")))?;

        Ok(Self {
            client,
            stream_client,
            base_url: config.server_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, user: Option<UserId>, path: &str) -> RequestBuilder {
        authorize(self.client.get(self.url(path)), user)
    }

    fn post(&self, user: UserId, path: &str) -> RequestBuilder {
        authorize(self.client.post(self.url(path)), Some(user))
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let response = req.send().await.map_err(transport_error)?;
        decode(response).await
    }

    async fn open_stream(&self, user: Option<UserId>, path: &str) -> Result<Response> {
        let req = authorize(self.stream_client.get(self.url(path)), user)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        let response = req.send().await.map_err(transport_error)?;
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(error_from_body(status, &body))
        }
    }

    async fn subscribe(&self, user: Option<UserId>, path: String) -> Result<FeedStream> {
        let response = self.open_stream(user, &path).await?;
        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        tokio::spawn(pump(self.clone(), user, path, response, tx));
        Ok(receiver_stream(rx))
    }
}

fn authorize(req: RequestBuilder, user: Option<UserId>) -> RequestBuilder {
    match user {
        Some(user) => req.bearer_auth(user),
        None => req,
    }
}

fn transport_error(e: reqwest::Error) -> GinmaiError {
    if e.is_timeout() {
        GinmaiError::unavailable("request timed out")
    } else {
        GinmaiError::unavailable(format!("network error: {e}"))
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| GinmaiError::unavailable(format!("malformed response: {e}")));
    }
    let body = response.text().await.unwrap_or_default();
    Err(error_from_body(status, &body))
}

/// Rebuild the domain error from a non-2xx response.
pub(crate) fn error_from_body(status: StatusCode, body: &str) -> GinmaiError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(err) => GinmaiError::from_wire(&err.code, err.error),
        Err(_) if status == StatusCode::NOT_FOUND => GinmaiError::not_found(status.to_string()),
        Err(_) => GinmaiError::unavailable(format!("server returned {status}")),
    }
}

fn frame_to_event(frame: SseFrame) -> Option<FeedEvent> {
    match frame.event.as_deref() {
        Some(SSE_EVENT_CHANGE) => match serde_json::from_str::<RowChange>(&frame.data) {
            Ok(change) => Some(FeedEvent::Change(change)),
            Err(e) => {
                warn!(error = %e, "undecodable change event, resyncing");
                Some(FeedEvent::Resync)
            }
        },
        Some(SSE_EVENT_RESYNC) => Some(FeedEvent::Resync),
        _ => None,
    }
}

/// Forward one SSE response into `tx`, then keep reconnecting until the
/// subscriber goes away or the server refuses us.
async fn pump(
    backend: HttpBackend,
    user: Option<UserId>,
    path: String,
    mut response: Response,
    tx: mpsc::Sender<FeedEvent>,
) {
    loop {
        let mut decoder = SseDecoder::default();
        let mut bytes = Box::pin(response.bytes_stream());

        loop {
            tokio::select! {
                _ = tx.closed() => return,
                chunk = bytes.next() => match chunk {
                    Some(Ok(chunk)) => {
                        for event in decoder.push(&chunk).into_iter().filter_map(frame_to_event) {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(path = %path, error = %e, "realtime stream broke");
                        break;
                    }
                    None => {
                        debug!(path = %path, "realtime stream closed by server");
                        break;
                    }
                },
            }
        }

        let mut backoff = RECONNECT_INITIAL;
        response = loop {
            tokio::select! {
                _ = tx.closed() => return,
                _ = tokio::time::sleep(backoff) => {}
            }
            match backend.open_stream(user, &path).await {
                Ok(response) => break response,
                Err(e) if e.is_retryable() => {
                    debug!(path = %path, error = %e, "reconnect failed, retrying");
                    backoff = (backoff * 2).min(RECONNECT_MAX);
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "realtime subscription rejected");
                    return;
                }
            }
        };

        info!(path = %path, "realtime stream reconnected");
        if tx.send(FeedEvent::Resync).await.is_err() {
            return;
        }
    }
}

#[async_trait]
impl MomentBackend for HttpBackend {
    fn mode(&self) -> BackendMode {
        BackendMode::Server
    }

    async fn create_moment(&self, host: UserId, req: CreateMomentRequest) -> Result<Moment> {
        self.send(self.post(host, "/moments").json(&req)).await
    }

    async fn get_moment(&self, moment: MomentId) -> Result<Moment> {
        self.send(self.get(None, &format!("/moments/{moment}"))).await
    }

    async fn list_active(&self, viewer: Option<UserId>, query: NearbyQuery) -> Result<Vec<Moment>> {
        let mut params = vec![
            ("lat", query.lat.to_string()),
            ("lng", query.lng.to_string()),
            ("include_full", query.include_full.to_string()),
        ];
        if let Some(radius) = query.radius_km {
            params.push(("radius_km", radius.to_string()));
        }
        self.send(self.get(viewer, "/moments").query(&params)).await
    }

    async fn list_hosted_moments(&self, host: UserId) -> Result<Vec<Moment>> {
        self.send(self.get(Some(host), "/me/moments")).await
    }

    async fn join(&self, user: UserId, moment: MomentId) -> Result<Connection> {
        self.send(self.post(user, &format!("/moments/{moment}/join"))).await
    }

    async fn leave(&self, user: UserId, moment: MomentId) -> Result<Moment> {
        self.send(self.post(user, &format!("/moments/{moment}/leave"))).await
    }

    async fn cancel_moment(&self, host: UserId, moment: MomentId) -> Result<Moment> {
        self.send(self.post(host, &format!("/moments/{moment}/cancel"))).await
    }

    async fn complete_moment(&self, host: UserId, moment: MomentId) -> Result<Moment> {
        self.send(self.post(host, &format!("/moments/{moment}/complete"))).await
    }

    async fn list_user_connections(&self, user: UserId) -> Result<Vec<Connection>> {
        self.send(self.get(Some(user), "/me/connections")).await
    }

    async fn list_moment_guests(&self, viewer: UserId, moment: MomentId) -> Result<Vec<Guest>> {
        self.send(self.get(Some(viewer), &format!("/moments/{moment}/guests"))).await
    }

    async fn mark_running_late(&self, user: UserId, moment: MomentId) -> Result<Connection> {
        self.send(self.post(user, &format!("/moments/{moment}/running-late"))).await
    }

    async fn mark_arrived(&self, user: UserId, moment: MomentId) -> Result<Connection> {
        self.send(self.post(user, &format!("/moments/{moment}/arrived"))).await
    }

    async fn complete_connection(&self, user: UserId, moment: MomentId) -> Result<Connection> {
        self.send(self.post(user, &format!("/moments/{moment}/done"))).await
    }

    async fn mark_no_show(&self, host: UserId, moment: MomentId, guest: UserId) -> Result<Connection> {
        self.send(self.post(host, &format!("/moments/{moment}/no-show/{guest}"))).await
    }

    async fn submit_feedback(
        &self,
        from: UserId,
        moment: MomentId,
        req: FeedbackRequest,
    ) -> Result<FeedbackOutcome> {
        self.send(self.post(from, &format!("/moments/{moment}/feedback")).json(&req))
            .await
    }

    async fn list_user_matches(&self, user: UserId) -> Result<Vec<EatAgainMatch>> {
        self.send(self.get(Some(user), "/me/matches")).await
    }

    async fn matched_users(&self, user: UserId) -> Result<Vec<MatchedUser>> {
        self.send(self.get(Some(user), "/me/matched-users")).await
    }

    async fn get_profile(&self, user: UserId) -> Result<User> {
        self.send(self.get(Some(user), "/me/profile")).await
    }

    async fn upsert_profile(&self, user: UserId, req: ProfileRequest) -> Result<User> {
        let req = authorize(self.client.put(self.url("/me/profile")), Some(user)).json(&req);
        self.send(req).await
    }

    async fn reliability(&self, user: UserId) -> Result<ReliabilityStats> {
        self.send(self.get(None, &format!("/users/{user}/reliability"))).await
    }

    async fn block_user(&self, blocker: UserId, blocked: UserId) -> Result<Block> {
        self.send(self.post(blocker, &format!("/blocks/{blocked}"))).await
    }

    async fn unblock_user(&self, blocker: UserId, blocked: UserId) -> Result<bool> {
        let req = authorize(
            self.client.delete(self.url(&format!("/blocks/{blocked}"))),
            Some(blocker),
        );
        let body: UnblockResponse = self.send(req).await?;
        Ok(body.removed)
    }

    async fn list_blocks(&self, blocker: UserId) -> Result<Vec<Block>> {
        self.send(self.get(Some(blocker), "/blocks")).await
    }

    async fn submit_report(&self, reporter: UserId, req: ReportRequest) -> Result<Report> {
        self.send(self.post(reporter, "/reports").json(&req)).await
    }

    async fn list_user_reports(&self, reporter: UserId) -> Result<Vec<Report>> {
        self.send(self.get(Some(reporter), "/reports")).await
    }

    async fn subscribe_moments(&self) -> Result<FeedStream> {
        self.subscribe(None, "/realtime/moments".to_string()).await
    }

    async fn subscribe_connections(&self, viewer: UserId, moment: MomentId) -> Result<FeedStream> {
        self.subscribe(Some(viewer), format!("/realtime/moments/{moment}/connections"))
            .await
    }
}
