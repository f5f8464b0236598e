use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::JobId;

/// Code recorded when the transport could not reach the recipient.
pub const CODE_TRANSPORT_ERROR: i32 = -1;
/// Code recorded when the attempt exceeded the dispatch timeout.
pub const CODE_TIMEOUT: i32 = -2;
/// Code recorded when no transport handles the recipient kind.
pub const CODE_UNSUPPORTED: i32 = -3;
/// Code recorded when the request could not be built from the recipient.
pub const CODE_INVALID_REQUEST: i32 = -4;

/// Outcome record of one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobExecutionResponse {
    pub job_id: JobId,
    /// HTTP status for delivered requests, negative for local failures.
    pub code: i32,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl JobExecutionResponse {
    pub fn new(job_id: impl Into<JobId>, code: i32, message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            job_id: job_id.into(),
            code,
            message: message.into(),
            timestamp,
        }
    }

    pub fn is_success_code(&self) -> bool {
        (200..300).contains(&self.code)
    }
}
