//! Network Protocol Definitions
//!
//! Data Transfer Objects for the job endpoints of the admin API.

use super::types::*;
use serde::{Deserialize, Serialize};

pub const ENDPOINT_JOBS: &str = "/jobs";
pub const ENDPOINT_JOB: &str = "/jobs/:id";
pub const ENDPOINT_JOB_CANCEL: &str = "/jobs/:id/cancel";

#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job: JobRecord,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelJobResponse {
    pub job_id: JobId,
    /// False when the job had already finished.
    pub cancelled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
