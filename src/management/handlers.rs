use super::manager::{IndexManager, IndexStatusView, StatusReport, UpdateOutcome};
use super::protocol::*;
use crate::error::LifecycleError;
use crate::executor::protocol::ErrorResponse;
use crate::membership::types::{InstanceId, InstanceRecord};
use crate::schema::types::IndexStatus;

use axum::{
    Extension, Json,
    extract::{Path, Query},
    http::StatusCode,
};
use std::sync::Arc;
use std::time::Duration;

type ApiResult<T> = Result<(StatusCode, Json<T>), (StatusCode, Json<ErrorResponse>)>;

const DEFAULT_AWAIT_POLL_MS: u64 = 500;
const DEFAULT_AWAIT_TIMEOUT_MS: u64 = 30_000;

/// Maps a lifecycle error to the status code an operator sees.
pub fn status_code(err: &LifecycleError) -> StatusCode {
    match err {
        LifecycleError::InvalidTransition { .. }
        | LifecycleError::NotRegistered { .. }
        | LifecycleError::TerminalState { .. }
        | LifecycleError::Conflict { .. }
        | LifecycleError::StatusRegression { .. }
        | LifecycleError::IndexExists(_)
        | LifecycleError::JobNotFinished(_) => StatusCode::CONFLICT,
        LifecycleError::AcknowledgmentTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        LifecycleError::UnknownIndex(_)
        | LifecycleError::UnknownKey { .. }
        | LifecycleError::UnknownJob(_)
        | LifecycleError::UnknownInstance(_) => StatusCode::NOT_FOUND,
        LifecycleError::InvalidDefinition { .. }
        | LifecycleError::UnknownBackend(_)
        | LifecycleError::Config(_) => StatusCode::BAD_REQUEST,
        LifecycleError::JobPartitionFailure { .. }
        | LifecycleError::JobFailed { .. }
        | LifecycleError::JobCancelled(_)
        | LifecycleError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: LifecycleError) -> (StatusCode, Json<ErrorResponse>) {
    let status = status_code(&err);
    if status.is_server_error() {
        tracing::error!("Admin request failed: {}", err);
    } else {
        tracing::debug!("Admin request rejected: {}", err);
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

pub async fn handle_build_index(
    Extension(manager): Extension<Arc<IndexManager>>,
    Json(req): Json<BuildIndexRequest>,
) -> ApiResult<BuildIndexResponse> {
    let definition = manager
        .build_index(req.definition)
        .map_err(error_response)?;

    Ok((
        StatusCode::CREATED,
        Json(BuildIndexResponse {
            index: definition.index,
            status: IndexStatus::Installed,
        }),
    ))
}

pub async fn handle_update_index(
    Extension(manager): Extension<Arc<IndexManager>>,
    Path(name): Path<String>,
    Json(req): Json<UpdateIndexRequest>,
) -> ApiResult<UpdateIndexResponse> {
    let index = IndexQuery {
        relation_type: req.relation_type.clone(),
    }
    .index_ref(name);

    tracing::info!("Admin request: {} on index {}", req.action, index);

    let outcome = manager
        .update_index(&index, req.action)
        .await
        .map_err(error_response)?;

    let mut response = UpdateIndexResponse {
        index: Some(index.clone()),
        ..Default::default()
    };
    let mut code = StatusCode::OK;

    match outcome {
        UpdateOutcome::Acknowledged { status, reports } => {
            response.status = Some(status);
            response.acks = reports;
        }
        UpdateOutcome::Enabled => {
            response.status = Some(IndexStatus::Enabled);
        }
        UpdateOutcome::Job(handle) => {
            response.job_id = Some(handle.id().clone());
            if req.wait {
                let job = handle.wait().await.map_err(error_response)?;
                response.job = Some(job);
                response.status = manager.aggregate_status(&index).ok();
            } else {
                response.job = handle.poll().ok();
                code = StatusCode::ACCEPTED;
            }
        }
        UpdateOutcome::Removed { cleanup } => {
            response.status = Some(IndexStatus::Removed);
            response.manual_cleanup = Some(cleanup.to_string());
        }
    }

    Ok((code, Json(response)))
}

pub async fn handle_index_status(
    Extension(manager): Extension<Arc<IndexManager>>,
    Path(name): Path<String>,
    Query(query): Query<IndexQuery>,
) -> ApiResult<IndexStatusView> {
    let index = query.index_ref(name);
    let view = manager.index_status(&index).map_err(error_response)?;
    Ok((StatusCode::OK, Json(view)))
}

pub async fn handle_await_status(
    Extension(manager): Extension<Arc<IndexManager>>,
    Path(name): Path<String>,
    Query(query): Query<AwaitQuery>,
) -> ApiResult<StatusReport> {
    let index = IndexQuery {
        relation_type: query.relation_type.clone(),
    }
    .index_ref(name);

    let mut targets = Vec::new();
    for raw in query.targets.split(',').filter(|s| !s.trim().is_empty()) {
        let status: IndexStatus = raw.parse().map_err(|reason: String| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse { error: reason }),
            )
        })?;
        targets.push(status);
    }

    let report = manager
        .await_status(
            &index,
            &targets,
            Duration::from_millis(query.poll_ms.unwrap_or(DEFAULT_AWAIT_POLL_MS)),
            Duration::from_millis(query.timeout_ms.unwrap_or(DEFAULT_AWAIT_TIMEOUT_MS)),
        )
        .await
        .map_err(error_response)?;

    let code = if report.reached {
        StatusCode::OK
    } else {
        StatusCode::REQUEST_TIMEOUT
    };
    Ok((code, Json(report)))
}

pub async fn handle_list_instances(
    Extension(manager): Extension<Arc<IndexManager>>,
) -> (StatusCode, Json<InstancesResponse>) {
    let registry = manager.registry();
    let instances = registry
        .liveness()
        .into_iter()
        .map(|(record, liveness)| InstanceView { record, liveness })
        .collect();

    (
        StatusCode::OK,
        Json(InstancesResponse {
            instances,
            evictions: registry.eviction_log(),
            active_rounds: manager.acks().active_rounds(),
        }),
    )
}

pub async fn handle_register_instance(
    Extension(manager): Extension<Arc<IndexManager>>,
    Json(req): Json<RegisterInstanceRequest>,
) -> (StatusCode, Json<InstanceRecord>) {
    let record = manager.register_instance(req.id, req.http_addr);
    (StatusCode::OK, Json(record))
}

pub async fn handle_evict_instance(
    Extension(manager): Extension<Arc<IndexManager>>,
    Path(id): Path<String>,
    Json(req): Json<EvictRequest>,
) -> ApiResult<InstanceRecord> {
    let record = manager
        .evict_instance(&InstanceId(id), &req.reason)
        .map_err(error_response)?;
    Ok((StatusCode::OK, Json(record)))
}

pub async fn handle_heartbeat(
    Extension(manager): Extension<Arc<IndexManager>>,
    Path(id): Path<String>,
    Json(req): Json<HeartbeatRequest>,
) -> ApiResult<HeartbeatResponse> {
    let accepted = manager
        .registry()
        .heartbeat(&InstanceId(id), req.lease_token)
        .map_err(error_response)?;
    Ok((StatusCode::OK, Json(HeartbeatResponse { accepted })))
}
