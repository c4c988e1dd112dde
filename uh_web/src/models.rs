//! ABOUTME: Data models for web API with validation and OpenAPI schemas
//! ABOUTME: Defines request/response structures with serde and validation

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uh_db::{LogEntry, User};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

/// RFC 7807 problem details body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(flatten)]
    pub extensions: HashMap<String, serde_json::Value>,
}

impl ProblemDetails {
    pub fn new(problem_type: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            problem_type: problem_type.into(),
            title: title.into(),
            status: None,
            detail: None,
            extensions: HashMap::new(),
        }
    }

    /// 400 with the given detail
    pub fn validation_error(detail: impl Into<String>) -> Self {
        Self::new(
            "https://datatracker.ietf.org/rfc/rfc7231.html#section-6.5.1",
            "Bad Request",
        )
        .with_status(400)
        .with_detail(detail)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_extension(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }
}

/// Error body as documented in the OpenAPI schema; the wire form is [`ProblemDetails`]
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    #[serde(rename = "type")]
    pub problem_type: String,
    pub title: String,
    pub status: Option<u16>,
    pub detail: Option<String>,
}

/// One failed field in a validation problem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

/// Request body for adding a user
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct AddUserRequest {
    #[validate(length(min = 1, max = 255))]
    pub name: String,

    #[validate(email)]
    pub email: String,
}

/// Request body for updating a user; empty or missing fields are left alone
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateUserRequest {
    #[validate(length(min = 1))]
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Request body for soft deleting a user
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct DeleteUserRequest {
    #[validate(length(min = 1))]
    pub id: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct EmailQuery {
    pub email: String,
}

/// Outcome of a write on the user service
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
        }
    }
}

/// User as returned by the API
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserInfo {
    pub id: String,
    pub name: String,
    pub email: String,
    pub deleted: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<User> for UserInfo {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            deleted: user.deleted,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Request body for recording a log line
#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
pub struct AddLogRequest {
    #[validate(length(min = 1, max = 100))]
    pub service: String,
    #[validate(length(min = 1))]
    pub message: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ServiceQuery {
    /// Only entries from this service; empty means all
    pub service: Option<String>,
}

/// Stored log line
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LogEntryInfo {
    pub id: String,
    pub service: String,
    pub message: String,
    pub timestamp: String,
}

impl From<LogEntry> for LogEntryInfo {
    fn from(entry: LogEntry) -> Self {
        Self {
            id: entry.id,
            service: entry.service,
            message: entry.message,
            timestamp: entry.timestamp,
        }
    }
}
