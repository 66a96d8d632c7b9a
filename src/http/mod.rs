/*!
Thin HTTP seam over the core.

A read-only JSON API plus SSE progress streams out of the broadcaster, and
the mutation entry points into the probe engine, supervisor and agent pool.
Sessions, OIDC, TLS and CORS live outside the core and are not handled
here.
*/

use crate::config::Config;
use crate::core::agent::AgentPool;
use crate::core::broadcast::Broadcaster;
use crate::core::packetloss::Supervisor;
use crate::core::probe::types::{TestOptions, TestType};
use crate::core::probe::ProbeEngine;
use crate::core::store::models::{
    NewMonitorAgent, NewPacketLossMonitor, NewSchedule, Page,
};
use crate::core::store::{Store, TimeRange};
use crate::error::Error;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::watch;

/// Shared service handles behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Store,
    pub broadcaster: Arc<Broadcaster>,
    pub engine: Arc<ProbeEngine>,
    pub supervisor: Arc<Supervisor>,
    pub pool: Arc<AgentPool>,
}

/// Bind and serve until the shutdown flag flips.
pub async fn serve(
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> crate::error::Result<()> {
    let addr = format!(
        "{}:{}",
        state.config.server.host, state.config.server.port
    );
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Internal(format!("bind {addr}: {e}")))?;
    tracing::info!(%addr, "http seam listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stopped| *stopped).await;
        })
        .await
        .map_err(|e| Error::Internal(format!("http server: {e}")))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        // Speed tests
        .route("/api/speedtest/run", post(run_speedtest))
        .route("/api/speedtest/status", get(speedtest_stream))
        .route("/api/speedtest/results", get(list_results))
        .route("/api/speedtest/latest", get(latest_result))
        .route("/api/speedtest/servers", get(list_servers))
        .route("/api/speedtest/iperf-servers", get(list_iperf_servers))
        .route("/api/speedtest/iperf-servers", post(create_iperf_server))
        .route("/api/speedtest/iperf-servers/:id", delete(delete_iperf_server))
        // Schedules
        .route("/api/schedules", get(list_schedules))
        .route("/api/schedules", post(create_schedule))
        .route("/api/schedules/:id/enabled", put(set_schedule_enabled))
        .route("/api/schedules/:id", delete(delete_schedule))
        // Packet loss
        .route("/api/packetloss/monitors", get(list_monitors))
        .route("/api/packetloss/monitors", post(create_monitor))
        .route("/api/packetloss/monitors/:id", get(get_monitor))
        .route("/api/packetloss/monitors/:id", put(update_monitor))
        .route("/api/packetloss/monitors/:id", delete(delete_monitor))
        .route("/api/packetloss/monitors/:id/start", post(start_monitor))
        .route("/api/packetloss/monitors/:id/stop", post(stop_monitor))
        .route("/api/packetloss/monitors/:id/status", get(monitor_status))
        .route("/api/packetloss/monitors/:id/results", get(monitor_results))
        .route("/api/packetloss/status", get(packetloss_stream))
        // Agents
        .route("/api/agents", get(list_agents))
        .route("/api/agents", post(create_agent))
        .route("/api/agents/:id", put(update_agent))
        .route("/api/agents/:id", delete(delete_agent))
        .route("/api/agents/:id/status", get(agent_status))
        .route("/api/agents/:id/system", get(agent_system))
        .route("/api/agents/:id/peaks", get(agent_peaks))
        .route("/api/agents/:id/resources", get(agent_resources))
        .route("/api/agents/:id/bandwidth", get(agent_bandwidth))
        .route("/api/agents/:id/snapshots", get(agent_snapshots))
        .route("/api/agents/:id/import", post(start_import))
        .route("/api/agents/:id/import", get(import_status))
        .route("/api/agents/status", get(agent_stream))
        // Notifications
        .route("/api/notifications/channels", get(list_channels))
        .route("/api/notifications/channels", post(create_channel))
        .route("/api/notifications/channels/:id", put(update_channel))
        .route("/api/notifications/channels/:id", delete(delete_channel))
        .route("/api/notifications/channels/:id/history", get(channel_history))
        .route("/api/notifications/events", get(list_events))
        .route("/api/notifications/rules", post(create_rule))
        .route("/api/notifications/rules/:id", delete(delete_rule))
        .with_state(state)
}

/// Error-to-status mapping at the seam.
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::Busy | Error::AlreadyRunning(_) | Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Capacity(_) => StatusCode::TOO_MANY_REQUESTS,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Cancelled | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "time": Utc::now().to_rfc3339() }))
}

/// Sample-on-change SSE stream over a watch channel. Readers get the latest
/// value only; there is no replay.
fn watch_stream<T>(
    rx: watch::Receiver<Option<T>>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>
where
    T: serde::Serialize + Clone + Send + Sync + 'static,
{
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            if rx.changed().await.is_err() {
                return None;
            }
            let value = rx.borrow_and_update().clone();
            if let Some(value) = value {
                match Event::default().json_data(&value) {
                    Ok(event) => return Some((Ok(event), rx)),
                    Err(_) => continue,
                }
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// --- speed tests ---

async fn run_speedtest(
    State(state): State<AppState>,
    Json(options): Json<TestOptions>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    if state.engine.is_busy() {
        return Err(Error::Busy.into());
    }
    let engine = state.engine.clone();
    tokio::spawn(async move {
        let _ = engine.run_test(options).await;
    });
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "started": true })),
    ))
}

async fn speedtest_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    watch_stream(state.broadcaster.subscribe_speedtest())
}

#[derive(Deserialize)]
struct ListQuery {
    page: Option<u32>,
    page_size: Option<u32>,
    time_range: Option<String>,
}

impl ListQuery {
    fn page(&self, config: &Config) -> Page {
        Page::new(
            self.page.unwrap_or(config.pagination.default_page),
            self.page_size.unwrap_or(config.pagination.default_page_size),
            config.pagination.max_page_size,
        )
    }

    fn range(&self) -> Option<TimeRange> {
        self.time_range.as_deref().and_then(TimeRange::parse)
    }
}

async fn list_results(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<impl serde::Serialize>> {
    let page = query.page(&state.config);
    let results = state
        .store
        .list_speedtest_results(page, query.range())
        .await?;
    Ok(Json(results))
}

async fn latest_result(State(state): State<AppState>) -> ApiResult<Json<impl serde::Serialize>> {
    Ok(Json(state.store.latest_speedtest_result().await?))
}

#[derive(Deserialize)]
struct ServersQuery {
    test_type: Option<String>,
}

async fn list_servers(
    State(state): State<AppState>,
    Query(query): Query<ServersQuery>,
) -> ApiResult<Json<impl serde::Serialize>> {
    let test_type = query
        .test_type
        .as_deref()
        .map(|raw| {
            TestType::parse(raw)
                .ok_or_else(|| Error::InvalidInput(format!("unknown test type {raw:?}")))
        })
        .transpose()?
        .unwrap_or(TestType::Speedtest);
    Ok(Json(state.engine.servers(test_type).await?))
}

#[derive(Deserialize)]
struct CreateIperfServerRequest {
    name: String,
    host: String,
    port: u16,
}

async fn list_iperf_servers(
    State(state): State<AppState>,
) -> ApiResult<Json<impl serde::Serialize>> {
    Ok(Json(state.store.list_iperf_servers().await?))
}

async fn create_iperf_server(
    State(state): State<AppState>,
    Json(request): Json<CreateIperfServerRequest>,
) -> ApiResult<(StatusCode, Json<impl serde::Serialize>)> {
    let server = state
        .store
        .save_iperf_server(&request.name, &request.host, request.port)
        .await?;
    Ok((StatusCode::CREATED, Json(server)))
}

async fn delete_iperf_server(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.store.delete_iperf_server(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- schedules ---

#[derive(Deserialize)]
struct CreateScheduleRequest {
    server_ids: Vec<String>,
    interval: String,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    options: Option<TestOptions>,
}

async fn list_schedules(State(state): State<AppState>) -> ApiResult<Json<impl serde::Serialize>> {
    Ok(Json(state.store.list_schedules().await?))
}

async fn create_schedule(
    State(state): State<AppState>,
    Json(request): Json<CreateScheduleRequest>,
) -> ApiResult<(StatusCode, Json<impl serde::Serialize>)> {
    let expr = crate::core::scheduler::interval::IntervalExpr::parse(&request.interval)?;
    let schedule = state
        .store
        .create_schedule(&NewSchedule {
            server_ids: request.server_ids,
            interval_expr: request.interval.clone(),
            next_run: expr.next_run(Utc::now()),
            enabled: request.enabled.unwrap_or(true),
            options: request
                .options
                .unwrap_or_else(|| TestOptions::full(TestType::Speedtest)),
        })
        .await?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

#[derive(Deserialize)]
struct EnabledRequest {
    enabled: bool,
}

async fn set_schedule_enabled(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<EnabledRequest>,
) -> ApiResult<StatusCode> {
    state.store.set_schedule_enabled(id, request.enabled).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_schedule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.store.delete_schedule(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- packet loss ---

#[derive(Deserialize)]
struct MonitorRequest {
    host: String,
    #[serde(default)]
    name: String,
    interval: String,
    #[serde(default = "default_packet_count")]
    packet_count: u32,
    #[serde(default = "default_threshold")]
    threshold: f64,
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_packet_count() -> u32 {
    10
}

fn default_threshold() -> f64 {
    5.0
}

fn default_true() -> bool {
    true
}

impl MonitorRequest {
    fn validate(&self) -> Result<NewPacketLossMonitor, Error> {
        crate::core::scheduler::interval::IntervalExpr::parse(&self.interval)?;
        Ok(NewPacketLossMonitor {
            host: self.host.clone(),
            name: self.name.clone(),
            interval_expr: self.interval.clone(),
            packet_count: self.packet_count,
            threshold: self.threshold,
            enabled: self.enabled,
        })
    }
}

async fn list_monitors(State(state): State<AppState>) -> ApiResult<Json<impl serde::Serialize>> {
    Ok(Json(state.store.list_packetloss_monitors().await?))
}

async fn create_monitor(
    State(state): State<AppState>,
    Json(request): Json<MonitorRequest>,
) -> ApiResult<(StatusCode, Json<impl serde::Serialize>)> {
    let new_monitor = request.validate()?;
    let monitor = state.store.create_packetloss_monitor(&new_monitor).await?;
    if monitor.enabled {
        let expr =
            crate::core::scheduler::interval::IntervalExpr::parse(&monitor.interval_expr)?;
        state
            .store
            .reset_monitor_next_run(monitor.id, expr.next_run(Utc::now()))
            .await?;
    }
    Ok((StatusCode::CREATED, Json(monitor)))
}

async fn get_monitor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<impl serde::Serialize>> {
    Ok(Json(state.store.packetloss_monitor(id).await?))
}

async fn update_monitor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<MonitorRequest>,
) -> ApiResult<Json<impl serde::Serialize>> {
    let new_monitor = request.validate()?;
    Ok(Json(
        state
            .store
            .update_packetloss_monitor(id, &new_monitor)
            .await?,
    ))
}

async fn delete_monitor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.supervisor.stop_monitor(id).await;
    state.store.delete_packetloss_monitor(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn start_monitor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.supervisor.start_monitor(id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn stop_monitor(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    state.supervisor.stop_monitor(id).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn monitor_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<impl serde::Serialize>> {
    let status = state.supervisor.status(id).await?;
    let activity = state.supervisor.activity(id).await?;
    Ok(Json(serde_json::json!({
        "status": status,
        "activity": activity,
    })))
}

async fn monitor_results(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<impl serde::Serialize>> {
    let page = query.page(&state.config);
    Ok(Json(
        state
            .store
            .list_packetloss_results(id, page, query.range())
            .await?,
    ))
}

async fn packetloss_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    watch_stream(state.broadcaster.subscribe_packetloss())
}

// --- agents ---

#[derive(Deserialize)]
struct AgentRequest {
    name: String,
    base_url: String,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    interface: Option<String>,
}

impl AgentRequest {
    fn into_new_agent(self) -> NewMonitorAgent {
        NewMonitorAgent {
            name: self.name,
            base_url: self.base_url,
            api_key: self.api_key,
            enabled: self.enabled,
            interface: self.interface,
        }
    }
}

async fn list_agents(State(state): State<AppState>) -> ApiResult<Json<impl serde::Serialize>> {
    Ok(Json(state.store.list_monitor_agents().await?))
}

async fn create_agent(
    State(state): State<AppState>,
    Json(request): Json<AgentRequest>,
) -> ApiResult<(StatusCode, Json<impl serde::Serialize>)> {
    let agent = state
        .store
        .create_monitor_agent(&request.into_new_agent())
        .await?;
    state.pool.restart_agent(agent.id).await?;
    Ok((StatusCode::CREATED, Json(agent)))
}

async fn update_agent(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<AgentRequest>,
) -> ApiResult<Json<impl serde::Serialize>> {
    let agent = state
        .store
        .update_monitor_agent(id, &request.into_new_agent())
        .await?;
    state.pool.restart_agent(id).await?;
    Ok(Json(agent))
}

async fn delete_agent(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    state.pool.remove_agent(id).await;
    state.store.delete_monitor_agent(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn agent_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<impl serde::Serialize>> {
    // Absent from the pool means not enabled: report disconnected rather
    // than 404 so the UI can render a stable row.
    let agent = state.store.monitor_agent(id).await?;
    let status = state
        .pool
        .status(id)
        .await
        .unwrap_or_else(|| crate::core::agent::types::AgentStatus::disconnected(id, &agent.name));
    Ok(Json(status))
}

async fn agent_system(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<impl serde::Serialize>> {
    Ok(Json(serde_json::json!({
        "system": state.store.monitor_system_info(id).await?,
        "interfaces": state.store.monitor_interfaces(id).await?,
    })))
}

async fn agent_peaks(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<impl serde::Serialize>> {
    Ok(Json(state.store.monitor_peaks(id).await?))
}

async fn agent_resources(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<impl serde::Serialize>> {
    let limit = i64::from(state.config.pagination.default_limit);
    Ok(Json(
        state.store.list_monitor_resource_stats(id, limit).await?,
    ))
}

async fn agent_bandwidth(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<impl serde::Serialize>> {
    let limit = i64::from(state.config.pagination.default_limit);
    Ok(Json(state.store.list_monitor_bandwidth(id, limit).await?))
}

async fn agent_snapshots(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<impl serde::Serialize>> {
    Ok(Json(state.store.historical_snapshots(id).await?))
}

async fn start_import(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    state.pool.start_import(id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn import_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<impl serde::Serialize>> {
    Ok(Json(state.pool.import_status(id).await))
}

async fn agent_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    watch_stream(state.broadcaster.subscribe_agents())
}

// --- notifications ---

#[derive(Deserialize)]
struct ChannelRequest {
    name: String,
    url: String,
    #[serde(default = "default_true")]
    enabled: bool,
}

async fn list_channels(State(state): State<AppState>) -> ApiResult<Json<impl serde::Serialize>> {
    Ok(Json(state.store.list_notification_channels().await?))
}

async fn create_channel(
    State(state): State<AppState>,
    Json(request): Json<ChannelRequest>,
) -> ApiResult<(StatusCode, Json<impl serde::Serialize>)> {
    let channel = state
        .store
        .create_notification_channel(&request.name, &request.url, request.enabled)
        .await?;
    Ok((StatusCode::CREATED, Json(channel)))
}

async fn update_channel(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<ChannelRequest>,
) -> ApiResult<Json<impl serde::Serialize>> {
    Ok(Json(
        state
            .store
            .update_notification_channel(id, &request.name, &request.url, request.enabled)
            .await?,
    ))
}

async fn delete_channel(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    state.store.delete_notification_channel(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn channel_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<impl serde::Serialize>> {
    let limit = i64::from(state.config.pagination.default_limit);
    Ok(Json(
        state.store.list_notification_history(id, limit).await?,
    ))
}

async fn list_events(State(state): State<AppState>) -> ApiResult<Json<impl serde::Serialize>> {
    Ok(Json(state.store.list_notification_events().await?))
}

#[derive(Deserialize)]
struct RuleRequest {
    channel_id: i64,
    event_id: i64,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    threshold_value: Option<f64>,
    #[serde(default)]
    threshold_operator: Option<String>,
}

async fn create_rule(
    State(state): State<AppState>,
    Json(request): Json<RuleRequest>,
) -> ApiResult<(StatusCode, Json<impl serde::Serialize>)> {
    if let Some(op) = request.threshold_operator.as_deref() {
        if !matches!(op, "gt" | "lt" | "eq" | "gte" | "lte") {
            return Err(Error::InvalidInput(format!(
                "unknown threshold operator {op:?}"
            ))
            .into());
        }
    }
    let rule = state
        .store
        .create_notification_rule(
            request.channel_id,
            request.event_id,
            request.enabled,
            request.threshold_value,
            request.threshold_operator.as_deref(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn delete_rule(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    state.store.delete_notification_rule(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
