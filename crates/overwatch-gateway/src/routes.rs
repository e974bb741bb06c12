use crate::error::ApiResult;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Duration, Utc};
use overwatch_audit::{AuditRecord, AuditScope, AuditType, Finding, FindingStatus};
use overwatch_core::{
    AgentProfile, AgentSpec, HeartbeatRecord, IngestOutcome, Metrics, ReportedStatus,
    TaskOutcome, TaskRequest,
};
use overwatch_orchestrator::{AgentCluster, CapacityForecast, SubmitOutcome, TaskRecord};
use overwatch_runtime::ControlPlane;
use overwatch_security::Principal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub type AppState = Arc<ControlPlane>;

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "overwatch" }))
}

// --- Agents ---

pub async fn register_agent(
    State(plane): State<AppState>,
    Json(spec): Json<AgentSpec>,
) -> ApiResult<(StatusCode, Json<AgentProfile>)> {
    let profile = plane.register(spec)?;
    Ok((StatusCode::CREATED, Json(profile)))
}

pub async fn list_agents(State(plane): State<AppState>) -> Json<Vec<AgentProfile>> {
    Json(plane.lifecycle().snapshot())
}

pub async fn get_agent(
    State(plane): State<AppState>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<AgentProfile>> {
    Ok(Json(plane.lifecycle().get(&agent_id)?))
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatBody {
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub status: Option<ReportedStatus>,
    #[serde(default)]
    pub metrics: Metrics,
}

pub async fn heartbeat(
    State(plane): State<AppState>,
    Path(agent_id): Path<String>,
    Json(body): Json<HeartbeatBody>,
) -> ApiResult<Json<Value>> {
    let mut record = HeartbeatRecord::new(agent_id, body.timestamp, body.metrics);
    if let Some(status) = body.status {
        record = record.with_status(status);
    }
    let result = match plane.heartbeat(&record).await? {
        IngestOutcome::Accepted => "accepted",
        IngestOutcome::Dropped => "dropped",
    };
    Ok(Json(json!({ "result": result })))
}

// --- Tasks ---

#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    #[serde(flatten)]
    pub request: TaskRequest,
    /// Wait up to this long for capacity instead of queueing.
    #[serde(default)]
    pub wait_ms: Option<u64>,
}

pub async fn submit_task(
    State(plane): State<AppState>,
    Json(body): Json<SubmitBody>,
) -> ApiResult<Json<SubmitOutcome>> {
    let outcome = match body.wait_ms {
        Some(wait) => {
            let deadline = Utc::now() + Duration::milliseconds(i64::try_from(wait).unwrap_or(i64::MAX));
            let assignment = plane.orchestrator().assign_before(body.request, deadline).await?;
            SubmitOutcome::Assigned(assignment)
        }
        None => plane.submit(body.request).await?,
    };
    Ok(Json(outcome))
}

pub async fn get_task(
    State(plane): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> ApiResult<Json<TaskRecord>> {
    Ok(Json(plane.orchestrator().task(task_id)?))
}

pub async fn start_task(
    State(plane): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> ApiResult<Json<TaskRecord>> {
    Ok(Json(plane.orchestrator().start_task(task_id)?))
}

#[derive(Debug, Deserialize)]
pub struct CompleteBody {
    pub outcome: TaskOutcome,
    #[serde(default)]
    pub duration_secs: Option<f64>,
}

pub async fn complete_task(
    State(plane): State<AppState>,
    Path(task_id): Path<Uuid>,
    Json(body): Json<CompleteBody>,
) -> ApiResult<Json<TaskRecord>> {
    let record = plane
        .orchestrator()
        .complete_task(task_id, body.outcome, body.duration_secs)
        .await?;
    Ok(Json(record))
}

// --- Reports ---

pub async fn capacity_forecast(State(plane): State<AppState>) -> Json<CapacityForecast> {
    Json(plane.orchestrator().forecast(Utc::now()))
}

pub async fn clusters(State(plane): State<AppState>) -> Json<Vec<AgentCluster>> {
    Json(plane.orchestrator().clusters())
}

// --- Audits ---

#[derive(Debug, Deserialize)]
pub struct AuditBody {
    #[serde(rename = "type")]
    pub audit_type: AuditType,
    pub scope: AuditScope,
    #[serde(default)]
    pub target_id: Option<String>,
}

pub async fn launch_audit(
    State(plane): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<AuditBody>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let audit_id = plane
        .audit()
        .launch(body.audit_type, body.scope, body.target_id)?;
    info!(audit_id = %audit_id, requested_by = %principal.name, "Audit launched");
    Ok((StatusCode::ACCEPTED, Json(json!({ "audit_id": audit_id }))))
}

pub async fn list_audits(State(plane): State<AppState>) -> Json<Vec<AuditRecord>> {
    Json(plane.audit().records())
}

pub async fn get_audit(
    State(plane): State<AppState>,
    Path(audit_id): Path<Uuid>,
) -> ApiResult<Json<AuditRecord>> {
    Ok(Json(plane.audit().get(audit_id).await?))
}

pub async fn cancel_audit(
    State(plane): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(audit_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    plane.audit().cancel(audit_id, &principal.name)?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
pub struct FindingStatusBody {
    pub status: FindingStatus,
}

pub async fn update_finding(
    State(plane): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((audit_id, finding_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<FindingStatusBody>,
) -> ApiResult<Json<Finding>> {
    let finding = plane
        .audit()
        .update_finding_status(audit_id, finding_id, body.status, &principal.name)
        .await?;
    Ok(Json(finding))
}

// --- Admin ---

pub async fn unsuspend(
    State(plane): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<AgentProfile>> {
    Ok(Json(plane.unsuspend(&principal, &agent_id).await?))
}

pub async fn approve_deletion(
    State(plane): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<AgentProfile>> {
    Ok(Json(plane.approve_deletion(&principal, &agent_id)?))
}

#[derive(Debug, Deserialize)]
pub struct ThresholdBody {
    pub name: String,
    pub value: f64,
}

pub async fn override_threshold(
    State(plane): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<ThresholdBody>,
) -> ApiResult<Json<Value>> {
    plane.override_threshold(&principal, &body.name, body.value)?;
    Ok(Json(json!({ "name": body.name, "value": body.value })))
}
