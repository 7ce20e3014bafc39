//! HTTP host for flow sessions: one live flow per session id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use nearbux_core::backend::AvailabilityQuery;
use nearbux_core::domain::{Audience, OwnerId, PhoneNumber, ShopContext, ShopId, Username};
use nearbux_core::errors::{
    ApplicationError, DomainError, InterfaceError, SequencerError, ValidationError,
};
use nearbux_core::flows::{
    definition_for, navigate_after, FlowContext, FlowKind, FlowRuntime, FlowSession, FlowSignal,
    FlowSnapshot, FlowState, FlowView, Navigator, StepInput,
};
use nearbux_db::repositories::FlowSnapshotRepository;

const CORRELATION_HEADER: &str = "x-correlation-id";
const SWEEP_CORRELATION: &str = "session-sweep";

/// A live session and the last time a request reached it.
struct HostedSession {
    session: Arc<FlowSession>,
    last_seen: Mutex<Instant>,
}

impl HostedSession {
    fn new(session: Arc<FlowSession>) -> Self {
        Self { session, last_seen: Mutex::new(Instant::now()) }
    }

    fn touch(&self) {
        match self.last_seen.lock() {
            Ok(mut last_seen) => *last_seen = Instant::now(),
            Err(poisoned) => *poisoned.into_inner() = Instant::now(),
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        let last_seen = match self.last_seen.lock() {
            Ok(last_seen) => *last_seen,
            Err(poisoned) => *poisoned.into_inner(),
        };
        now.saturating_duration_since(last_seen)
    }
}

#[derive(Clone)]
pub struct FlowHost {
    runtime: FlowRuntime,
    sessions: Arc<RwLock<HashMap<String, Arc<HostedSession>>>>,
    snapshots: Arc<dyn FlowSnapshotRepository>,
    session_idle: Duration,
}

/// What the sweep removed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub idle_sessions: usize,
    pub expired_snapshots: u64,
}

/// Releases a completed session once its redirect has been followed.
struct CompletedSession {
    host: FlowHost,
    session: Arc<FlowSession>,
    correlation_id: String,
}

#[async_trait]
impl Navigator for CompletedSession {
    async fn navigate(&self, target: &str) {
        let session_id = self.session.session_id();
        if self.host.evict(session_id, &self.session).await {
            self.session.close(&self.correlation_id);
            info!(
                event_name = "flow.session.released",
                correlation_id = %self.correlation_id,
                session_id,
                redirect = target,
                "completed flow session released"
            );
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StartFlowRequest {
    pub kind: FlowKind,
    pub shop_id: Option<i64>,
    pub owner_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub input: StepInput,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    #[serde(flatten)]
    pub view: FlowView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<FlowSignal>,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityRequest {
    pub audience: Audience,
    pub username: String,
    pub phone_number: String,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub available: bool,
    pub username_exists: bool,
    pub phone_exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
}

pub struct ApiError(InterfaceError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(ErrorBody { message: self.0.message().to_string() })).into_response()
    }
}

impl ApiError {
    fn from_app(error: ApplicationError, correlation_id: &str) -> Self {
        Self(error.into_interface(correlation_id))
    }

    fn sequencer(error: SequencerError, correlation_id: &str) -> Self {
        Self::from_app(ApplicationError::Domain(DomainError::Sequencer(error)), correlation_id)
    }

    fn invalid(error: ValidationError, correlation_id: &str) -> Self {
        Self::from_app(ApplicationError::Domain(DomainError::Validation(error)), correlation_id)
    }

    fn bad_request(message: impl Into<String>, correlation_id: &str) -> Self {
        Self(InterfaceError::BadRequest {
            message: message.into(),
            correlation_id: correlation_id.to_string(),
        })
    }
}

impl FlowHost {
    pub fn new(
        runtime: FlowRuntime,
        snapshots: Arc<dyn FlowSnapshotRepository>,
        session_idle: Duration,
    ) -> Self {
        Self {
            runtime,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            snapshots,
            session_idle,
        }
    }

    pub async fn session(&self, session_id: &str) -> Option<Arc<FlowSession>> {
        self.sessions.read().await.get(session_id).map(|hosted| Arc::clone(&hosted.session))
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn require(
        &self,
        session_id: &str,
        correlation_id: &str,
    ) -> Result<Arc<FlowSession>, ApiError> {
        let sessions = self.sessions.read().await;
        let Some(hosted) = sessions.get(session_id) else {
            let error = ApplicationError::UnknownSession(session_id.to_string());
            return Err(ApiError::from_app(error, correlation_id));
        };
        hosted.touch();
        Ok(Arc::clone(&hosted.session))
    }

    /// Removes the session only if it is still the one registered under its
    /// id; a newer flow for the same id is left alone.
    async fn evict(&self, session_id: &str, session: &Arc<FlowSession>) -> bool {
        let mut sessions = self.sessions.write().await;
        let current = sessions.get(session_id).map(|hosted| Arc::ptr_eq(&hosted.session, session));
        if current == Some(true) {
            sessions.remove(session_id);
            return true;
        }
        false
    }

    /// Drops sessions nobody has touched within the idle limit and purges
    /// snapshots too old to resume. A session with a call in flight is kept
    /// until the call settles.
    pub async fn sweep(&self) -> SweepReport {
        let now = Instant::now();
        let idle: Vec<Arc<FlowSession>> = {
            let mut sessions = self.sessions.write().await;
            let expired: Vec<String> = sessions
                .iter()
                .filter(|(_, hosted)| {
                    hosted.idle_for(now) >= self.session_idle && !hosted.session.is_in_flight()
                })
                .map(|(session_id, _)| session_id.clone())
                .collect();
            expired
                .iter()
                .filter_map(|session_id| sessions.remove(session_id))
                .map(|hosted| Arc::clone(&hosted.session))
                .collect()
        };
        for session in &idle {
            session.close(SWEEP_CORRELATION);
        }

        let expired_snapshots = match chrono::Duration::from_std(self.runtime.snapshot_ttl) {
            Ok(ttl) => match self.snapshots.purge_older_than(Utc::now() - ttl).await {
                Ok(purged) => purged,
                Err(error) => {
                    warn!(
                        event_name = "flow.snapshot.purge_failed",
                        correlation_id = SWEEP_CORRELATION,
                        error = %error,
                        "expired flow snapshots could not be purged"
                    );
                    0
                }
            },
            Err(_) => 0,
        };

        let report = SweepReport { idle_sessions: idle.len(), expired_snapshots };
        if report != SweepReport::default() {
            info!(
                event_name = "flow.session.swept",
                correlation_id = SWEEP_CORRELATION,
                idle_sessions = report.idle_sessions,
                expired_snapshots = report.expired_snapshots,
                "idle sessions and expired snapshots removed"
            );
        }
        report
    }

    /// Runs [`FlowHost::sweep`] on a fixed period until the task is dropped.
    pub async fn sweep_every(self, period: Duration) {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            self.sweep().await;
        }
    }

    /// Keeps the stored resume point in step with the session. Failures are
    /// logged; the flow itself has already moved.
    async fn persist(&self, session_id: &str, state: &FlowState, correlation_id: &str) {
        let result = if state.is_complete() {
            self.snapshots.delete(session_id).await
        } else {
            self.snapshots.save(FlowSnapshot::capture(session_id, state)).await
        };
        if let Err(error) = result {
            warn!(
                event_name = "flow.snapshot.persist_failed",
                correlation_id,
                session_id,
                error = %error,
                "flow snapshot could not be persisted"
            );
        }
    }

    async fn forget(&self, session_id: &str, correlation_id: &str) {
        if let Err(error) = self.snapshots.delete(session_id).await {
            warn!(
                event_name = "flow.snapshot.delete_failed",
                correlation_id,
                session_id,
                error = %error,
                "flow snapshot could not be deleted"
            );
        }
    }
}

pub fn router(host: FlowHost) -> Router {
    Router::new()
        .route("/sessions/{session}/flow", get(current_view).post(start_flow).delete(close_flow))
        .route("/sessions/{session}/flow/submit", post(submit_step))
        .route("/sessions/{session}/flow/restart", post(restart_flow))
        .route("/availability", post(check_availability))
        .with_state(host)
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn view_of(state: &FlowState) -> FlowView {
    FlowView::new(&*definition_for(state.flow), state)
}

async fn start_flow(
    State(host): State<FlowHost>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<StartFlowRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<FlowView>), ApiError> {
    let correlation_id = correlation_id(&headers);
    let Json(request) =
        payload.map_err(|rejection| ApiError::bad_request(rejection.body_text(), &correlation_id))?;

    let shop = match (request.shop_id, request.owner_id) {
        (Some(shop_id), Some(owner_id)) => {
            Some(ShopContext { shop_id: ShopId(shop_id), owner_id: OwnerId(owner_id) })
        }
        (None, None) => None,
        _ => {
            return Err(ApiError::bad_request(
                "shop_id and owner_id must be given together",
                &correlation_id,
            ))
        }
    };
    let context = FlowContext { shop };

    let stored = match host.snapshots.load(&session_id).await {
        Ok(Some(snapshot)) if host.runtime.is_expired(&snapshot) => {
            debug!(
                event_name = "flow.snapshot.expired",
                correlation_id = %correlation_id,
                session_id = %session_id,
                updated_at = %snapshot.updated_at,
                "stored snapshot is past its resume window"
            );
            None
        }
        Ok(stored) => stored,
        Err(error) => {
            let error = ApplicationError::Persistence(error.to_string());
            warn!(
                event_name = "flow.snapshot.load_failed",
                correlation_id = %correlation_id,
                session_id = %session_id,
                error = %error,
                "flow snapshot could not be loaded; starting fresh"
            );
            None
        }
    };
    let session = Arc::new(match &stored {
        Some(snapshot) => host.runtime.resume(&session_id, request.kind, context, snapshot),
        None => host.runtime.start(&session_id, request.kind, context),
    });
    let state = session.state();

    let hosted = Arc::new(HostedSession::new(Arc::clone(&session)));
    let replaced = host.sessions.write().await.insert(session_id.clone(), hosted);
    if let Some(previous) = replaced {
        previous.session.close(&correlation_id);
    }
    host.persist(&session_id, &state, &correlation_id).await;

    info!(
        event_name = "flow.session.started",
        correlation_id = %correlation_id,
        session_id = %session_id,
        flow = %request.kind,
        step = %state.step,
        resumed = stored.is_some(),
        "flow session started"
    );
    Ok((StatusCode::CREATED, Json(view_of(&state))))
}

async fn current_view(
    State(host): State<FlowHost>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<FlowView>, ApiError> {
    let correlation_id = correlation_id(&headers);
    let session = host.require(&session_id, &correlation_id).await?;
    Ok(Json(session.view()))
}

async fn submit_step(
    State(host): State<FlowHost>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<SubmitRequest>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let correlation_id = correlation_id(&headers);
    let Json(request) =
        payload.map_err(|rejection| ApiError::bad_request(rejection.body_text(), &correlation_id))?;
    let session = host.require(&session_id, &correlation_id).await?;

    let report = session
        .submit(request.input, &correlation_id)
        .await
        .map_err(|error| ApiError::sequencer(error, &correlation_id))?;
    host.persist(&session_id, &report.state, &correlation_id).await;

    if let Some(signal) = report.signal.clone() {
        let completed =
            CompletedSession { host: host.clone(), session, correlation_id: correlation_id.clone() };
        tokio::spawn(async move { navigate_after(&completed, &signal).await });
    }

    Ok(Json(SubmitResponse { view: view_of(&report.state), signal: report.signal }))
}

async fn restart_flow(
    State(host): State<FlowHost>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<FlowView>, ApiError> {
    let correlation_id = correlation_id(&headers);
    let session = host.require(&session_id, &correlation_id).await?;

    let state = session
        .restart(&correlation_id)
        .map_err(|error| ApiError::sequencer(error, &correlation_id))?;
    host.forget(&session_id, &correlation_id).await;
    Ok(Json(view_of(&state)))
}

async fn close_flow(
    State(host): State<FlowHost>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let correlation_id = correlation_id(&headers);
    let removed = host.sessions.write().await.remove(&session_id);
    let Some(hosted) = removed else {
        return Err(ApiError::from_app(
            ApplicationError::UnknownSession(session_id),
            &correlation_id,
        ));
    };

    hosted.session.close(&correlation_id);
    host.forget(&session_id, &correlation_id).await;
    Ok(StatusCode::NO_CONTENT)
}

/// Pre-check a signup form runs before asking for a code. Not part of any
/// flow, so it never touches session state.
async fn check_availability(
    State(host): State<FlowHost>,
    headers: HeaderMap,
    payload: Result<Json<AvailabilityRequest>, JsonRejection>,
) -> Result<Json<AvailabilityResponse>, ApiError> {
    let correlation_id = correlation_id(&headers);
    let Json(request) =
        payload.map_err(|rejection| ApiError::bad_request(rejection.body_text(), &correlation_id))?;
    let username = Username::parse(&request.username)
        .map_err(|error| ApiError::invalid(error, &correlation_id))?;
    let phone = PhoneNumber::parse(&request.phone_number)
        .map_err(|error| ApiError::invalid(error, &correlation_id))?;

    let query = AvailabilityQuery::new(&username, &phone);
    let availability = host
        .runtime
        .collaborators
        .backend
        .check_availability(request.audience, &query)
        .await
        .map_err(|error| {
            warn!(
                event_name = "backend.availability.failed",
                correlation_id = %correlation_id,
                error = %error,
                "availability check failed"
            );
            ApiError::from_app(ApplicationError::Integration(error.to_string()), &correlation_id)
        })?;

    Ok(Json(AvailabilityResponse {
        available: availability.is_available(),
        username_exists: availability.username_exists,
        phone_exists: availability.phone_exists,
        message: availability.conflict_message(),
    }))
}
