//! Command types for the snapschedd protocol

use serde::{Deserialize, Serialize};
use snapsched_util::{FsName, SnapError};

use crate::{FsStatus, ScheduleDetails, ScheduleInfo, API_VERSION};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// The command
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            command,
        }
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// Response payload or error
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<&SnapError> for ErrorInfo {
    fn from(err: &SnapError) -> Self {
        let code = match err {
            SnapError::Validation(_) => ErrorCode::ValidationError,
            SnapError::DuplicateRule(_) => ErrorCode::DuplicateRule,
            SnapError::NotFound(_) => ErrorCode::NotFound,
            SnapError::StorageUnavailable(_) => ErrorCode::StorageUnavailable,
            SnapError::FatalCorruption { .. } => ErrorCode::FatalCorruption,
            SnapError::Config(_) => ErrorCode::ConfigError,
            SnapError::Internal(_) => ErrorCode::InternalError,
        };
        Self::new(code, err.to_string())
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    ValidationError,
    DuplicateRule,
    NotFound,
    StorageUnavailable,
    FatalCorruption,
    ConfigError,
    InternalError,
}

/// All possible commands from clients
///
/// Interval and retention fields carry the textual grammar so that parse
/// errors are reported by the daemon as validation errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Add a rule, creating the path if needed
    AddSchedule {
        path: String,
        schedule: String,
        #[serde(default)]
        retention: Option<String>,
        #[serde(default)]
        start: Option<String>,
        #[serde(default)]
        fs: Option<FsName>,
        #[serde(default)]
        subvol: Option<String>,
    },

    /// Remove matching rules, or the whole path when no schedule is given
    RemoveSchedule {
        path: String,
        #[serde(default)]
        schedule: Option<String>,
        #[serde(default)]
        start: Option<String>,
        #[serde(default)]
        fs: Option<FsName>,
    },

    /// List rules at a path, or below it when recursive
    ListSchedules {
        path: String,
        #[serde(default)]
        recursive: bool,
        #[serde(default)]
        fs: Option<FsName>,
    },

    /// Full rule details for one path
    GetSchedule {
        path: String,
        #[serde(default)]
        fs: Option<FsName>,
    },

    Activate {
        path: String,
        #[serde(default)]
        fs: Option<FsName>,
    },

    Deactivate {
        path: String,
        #[serde(default)]
        fs: Option<FsName>,
    },

    /// Next wakeup of every loaded filesystem
    GetStatus,

    /// Ping for keepalive
    Ping,
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    ScheduleAdded,
    ScheduleRemoved { removed: usize },
    Schedules { schedules: Vec<ScheduleInfo> },
    Details { details: Vec<ScheduleDetails> },
    Activated,
    Deactivated,
    Status { filesystems: Vec<FsStatus> },
    Pong,
}
