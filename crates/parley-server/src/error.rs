//! Error bodies for the HTTP adapter.

use chrono::Utc;
use log::warn;
use parley_core::{CoreError, PersistenceError};
use parley_protocol::ProviderError;
use rocket::http::Status;
use rocket::response::{self, Responder, status};
use rocket::serde::json::Json;
use rocket::{Request, catch};
use serde_json::{Value, json};

/// Client-facing error: `{ error, message, timestamp }` with a mapped status.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status: Status,
    pub kind: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: Status, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(kind: &'static str, message: impl Into<String>) -> Self {
        Self::new(Status::BadRequest, kind, message)
    }

    fn body(&self) -> Value {
        error_body(self.kind, &self.message)
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let status = status_for(&err);
        if status.code >= 500 {
            warn!(
                "request failed (status={}, kind={}, err={})",
                status.code,
                err.kind(),
                err
            );
        }
        Self::new(status, err.kind(), err.to_string())
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        status::Custom(self.status, Json(self.body())).respond_to(request)
    }
}

/// HTTP status for an engine error.
pub fn status_for(err: &CoreError) -> Status {
    match err {
        CoreError::SessionNotFound(_) => Status::NotFound,
        CoreError::CapacityExceeded { .. } => Status::Conflict,
        CoreError::EmptyQuery => Status::BadRequest,
        CoreError::Provider(ProviderError::NotFound(_)) => Status::NotFound,
        CoreError::Provider(ProviderError::Ambiguous(_)) => Status::Conflict,
        CoreError::Provider(ProviderError::InvalidArguments(_)) => Status::BadRequest,
        CoreError::Provider(ProviderError::Timeout { .. }) => Status::GatewayTimeout,
        CoreError::Provider(_) | CoreError::Completion(_) => Status::BadGateway,
        CoreError::Persistence(PersistenceError::Disabled) => Status::Conflict,
        CoreError::Persistence(_) | CoreError::Io(_) => Status::InternalServerError,
    }
}

pub(crate) fn error_body(kind: &str, message: &str) -> Value {
    json!({
        "error": kind,
        "message": message,
        "timestamp": Utc::now().to_rfc3339(),
    })
}

#[catch(400)]
pub(crate) fn bad_request(request: &Request<'_>) -> Json<Value> {
    Json(error_body(
        "bad_request",
        &format!("malformed request to {}", request.uri()),
    ))
}

#[catch(404)]
pub(crate) fn not_found(request: &Request<'_>) -> Json<Value> {
    Json(error_body(
        "not_found",
        &format!("no route for {} {}", request.method(), request.uri()),
    ))
}

#[catch(422)]
pub(crate) fn unprocessable(request: &Request<'_>) -> Json<Value> {
    Json(error_body(
        "invalid_body",
        &format!("request body for {} could not be decoded", request.uri()),
    ))
}

#[catch(500)]
pub(crate) fn internal(_request: &Request<'_>) -> Json<Value> {
    Json(error_body("internal_error", "internal server error"))
}
