use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use ginmai_shared::constants::DEFAULT_RADIUS_KM;
use ginmai_shared::protocol::{
    CreateMomentRequest, FeedbackRequest, NearbyQuery, ProfileRequest, ReportRequest,
};
use ginmai_shared::reliability::ReliabilityStats;
use ginmai_shared::types::{MomentId, UserId};
use ginmai_shared::{GeoPoint, GinmaiError};
use ginmai_store::{
    ActiveQuery, Block, Connection, EatAgainMatch, FeedbackOutcome, Guest, MatchedUser, Moment,
    MomentEngine, NewMoment, Report, User,
};

use crate::auth::AuthUser;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::realtime;

type ApiResult<T> = Result<Json<T>, ServerError>;

#[derive(Clone)]
pub struct AppState {
    pub engine: MomentEngine,
    pub rate_limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
    pub started: Instant,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        // Moments
        .route("/moments", post(create_moment).get(list_moments))
        .route("/moments/:id", get(get_moment))
        .route("/moments/:id/join", post(join_moment))
        .route("/moments/:id/leave", post(leave_moment))
        .route("/moments/:id/cancel", post(cancel_moment))
        .route("/moments/:id/complete", post(complete_moment))
        // Connections
        .route("/moments/:id/done", post(complete_connection))
        .route("/moments/:id/running-late", post(running_late))
        .route("/moments/:id/arrived", post(arrived))
        .route("/moments/:id/no-show/:user", post(no_show))
        .route("/moments/:id/guests", get(list_guests))
        // Feedback
        .route("/moments/:id/feedback", post(submit_feedback))
        // Me
        .route("/me/connections", get(my_connections))
        .route("/me/moments", get(my_moments))
        .route("/me/matches", get(my_matches))
        .route("/me/matched-users", get(my_matched_users))
        .route("/me/profile", get(my_profile).put(update_profile))
        .route("/users/:id/reliability", get(user_reliability))
        // Safety
        .route("/blocks", get(list_blocks))
        .route("/blocks/:user", post(block_user).delete(unblock_user))
        .route("/reports", post(submit_report).get(list_reports))
        // Realtime
        .route("/realtime/moments", get(realtime::moments_stream))
        .route(
            "/realtime/moments/:id/connections",
            get(realtime::connections_stream),
        )
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    uptime_secs: u64,
    realtime_subscribers: usize,
}

#[derive(Serialize)]
struct UnblockResponse {
    removed: bool,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started.elapsed().as_secs(),
        realtime_subscribers: state.engine.changes().subscriber_count(),
    })
}

// ─── Moments ───

async fn create_moment(
    State(state): State<AppState>,
    AuthUser(host): AuthUser,
    Json(req): Json<CreateMomentRequest>,
) -> Result<(StatusCode, Json<Moment>), ServerError> {
    let moment = state
        .engine
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
        .await?;

    info!(moment = %moment.id, host = %host, "moment published via API");
    Ok((StatusCode::CREATED, Json(moment)))
}

async fn list_moments(
    State(state): State<AppState>,
    viewer: Option<AuthUser>,
    Query(q): Query<NearbyQuery>,
) -> ApiResult<Vec<Moment>> {
    let center = GeoPoint::new(q.lat, q.lng);
    if !center.is_valid() {
        return Err(GinmaiError::validation("lat/lng is not a valid coordinate").into());
    }
    let radius_km = q.radius_km.unwrap_or(DEFAULT_RADIUS_KM);
    if !radius_km.is_finite() || radius_km <= 0.0 {
        return Err(GinmaiError::validation("radius_km must be positive").into());
    }

    let query = ActiveQuery {
        center,
        radius_km,
        viewer: viewer.map(|AuthUser(u)| u),
        include_full: q.include_full,
    };
    Ok(Json(state.engine.list_active(query).await?))
}

async fn get_moment(State(state): State<AppState>, Path(id): Path<MomentId>) -> ApiResult<Moment> {
    Ok(Json(state.engine.get_moment(id).await?))
}

async fn join_moment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<MomentId>,
) -> ApiResult<Connection> {
    Ok(Json(state.engine.join(id, user).await?))
}

async fn leave_moment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<MomentId>,
) -> ApiResult<Moment> {
    Ok(Json(state.engine.leave(id, user).await?))
}

async fn cancel_moment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<MomentId>,
) -> ApiResult<Moment> {
    Ok(Json(state.engine.cancel_moment(id, user).await?))
}

async fn complete_moment(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<MomentId>,
) -> ApiResult<Moment> {
    Ok(Json(state.engine.complete_moment(id, user).await?))
}

// ─── Connections ───

async fn complete_connection(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<MomentId>,
) -> ApiResult<Connection> {
    Ok(Json(state.engine.complete_connection(id, user).await?))
}

async fn running_late(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<MomentId>,
) -> ApiResult<Connection> {
    Ok(Json(state.engine.mark_running_late(id, user).await?))
}

async fn arrived(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<MomentId>,
) -> ApiResult<Connection> {
    Ok(Json(state.engine.mark_arrived(id, user).await?))
}

async fn no_show(
    State(state): State<AppState>,
    AuthUser(host): AuthUser,
    Path((id, guest)): Path<(MomentId, UserId)>,
) -> ApiResult<Connection> {
    Ok(Json(state.engine.mark_no_show(id, guest, host).await?))
}

async fn list_guests(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<MomentId>,
) -> ApiResult<Vec<Guest>> {
    Ok(Json(state.engine.list_moment_guests(id, user).await?))
}

async fn submit_feedback(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<MomentId>,
    Json(req): Json<FeedbackRequest>,
) -> ApiResult<FeedbackOutcome> {
    Ok(Json(state.engine.submit_feedback(id, user, req).await?))
}

// ─── Me ───

async fn my_connections(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<Vec<Connection>> {
    Ok(Json(state.engine.list_user_connections(user).await?))
}

async fn my_moments(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<Vec<Moment>> {
    Ok(Json(state.engine.list_hosted_moments(user).await?))
}

async fn my_matches(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<Vec<EatAgainMatch>> {
    Ok(Json(state.engine.list_user_matches(user).await?))
}

async fn my_matched_users(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<Vec<MatchedUser>> {
    Ok(Json(state.engine.matched_users(user).await?))
}

async fn my_profile(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<User> {
    Ok(Json(state.engine.get_user(user).await?))
}

async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<ProfileRequest>,
) -> ApiResult<User> {
    Ok(Json(state.engine.upsert_profile(user, req).await?))
}

async fn user_reliability(State(state): State<AppState>, Path(id): Path<UserId>) -> ApiResult<ReliabilityStats> {
    Ok(Json(state.engine.reliability(id).await?))
}

// ─── Safety ───

async fn list_blocks(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<Vec<Block>> {
    Ok(Json(state.engine.list_blocks(user).await?))
}

async fn block_user(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(blocked): Path<UserId>,
) -> ApiResult<Block> {
    Ok(Json(state.engine.block_user(user, blocked).await?))
}

async fn unblock_user(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(blocked): Path<UserId>,
) -> ApiResult<UnblockResponse> {
    let removed = state.engine.unblock_user(user, blocked).await?;
    Ok(Json(UnblockResponse { removed }))
}

async fn submit_report(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<ReportRequest>,
) -> Result<(StatusCode, Json<Report>), ServerError> {
    let report = state.engine.submit_report(user, req).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

async fn list_reports(State(state): State<AppState>, AuthUser(user): AuthUser) -> ApiResult<Vec<Report>> {
    Ok(Json(state.engine.list_user_reports(user).await?))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
