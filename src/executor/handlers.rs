use super::protocol::*;
use super::tracker::JobStatusTracker;
use super::types::*;
use crate::error::LifecycleError;

use axum::{Extension, Json, extract::Path, http::StatusCode};
use std::sync::Arc;

type ApiResult<T> = Result<(StatusCode, Json<T>), (StatusCode, Json<ErrorResponse>)>;

fn error_response(err: LifecycleError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match err {
        LifecycleError::UnknownJob(_) => StatusCode::NOT_FOUND,
        LifecycleError::JobNotFinished(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

pub async fn handle_list_jobs(
    Extension(tracker): Extension<Arc<JobStatusTracker>>,
) -> (StatusCode, Json<JobListResponse>) {
    (
        StatusCode::OK,
        Json(JobListResponse {
            jobs: tracker.list(),
        }),
    )
}

pub async fn handle_get_job(
    Extension(tracker): Extension<Arc<JobStatusTracker>>,
    Path(job_id): Path<String>,
) -> ApiResult<JobStatusResponse> {
    let job_id = JobId(job_id);

    match tracker.poll(&job_id) {
        Ok(job) => {
            tracing::debug!("Job status query: {} -> {:?}", job_id, job.status);
            Ok((StatusCode::OK, Json(JobStatusResponse { job })))
        }
        Err(e) => Err(error_response(e)),
    }
}

pub async fn handle_cancel_job(
    Extension(tracker): Extension<Arc<JobStatusTracker>>,
    Path(job_id): Path<String>,
) -> ApiResult<CancelJobResponse> {
    let job_id = JobId(job_id);

    let cancelled = tracker.cancel(&job_id).map_err(error_response)?;
    Ok((StatusCode::OK, Json(CancelJobResponse { job_id, cancelled })))
}

/// Acknowledges a finished job and removes its record.
pub async fn handle_clear_job(
    Extension(tracker): Extension<Arc<JobStatusTracker>>,
    Path(job_id): Path<String>,
) -> ApiResult<JobStatusResponse> {
    let job_id = JobId(job_id);

    let job = tracker.acknowledge(&job_id).map_err(error_response)?;
    tracing::info!("Job {} acknowledged and cleared", job_id);
    Ok((StatusCode::OK, Json(JobStatusResponse { job })))
}
