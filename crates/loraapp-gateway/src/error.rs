//! Gateway errors and their JSON representation.
//!
//! Every failure is answered with `{"error": <message>, "code": <grpc code>}`.
//! RPC failures keep their status code and message; the HTTP status is
//! derived from the gRPC code. Request decoding failures (body, query,
//! path) are `InvalidArgument` / 400.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tonic::{Code, Status};

/// Error returned by gateway handlers.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The RPC call failed.
    #[error("{}", .0.message())]
    Rpc(Status),

    /// The REST request could not be decoded.
    #[error("{0}")]
    BadRequest(String),

    /// No REST endpoint matches the path.
    #[error("no api endpoint at {0}")]
    NoEndpoint(String),
}

/// JSON error body.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: i32,
}

impl GatewayError {
    /// gRPC code reported in the body.
    pub fn code(&self) -> Code {
        match self {
            Self::Rpc(status) => status.code(),
            Self::BadRequest(_) => Code::InvalidArgument,
            Self::NoEndpoint(_) => Code::NotFound,
        }
    }
}

/// HTTP status for a gRPC code, as used by grpc-gateway.
pub fn http_status(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        // Client closed request.
        Code::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        Code::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        Code::InvalidArgument => StatusCode::BAD_REQUEST,
        Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists => StatusCode::CONFLICT,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        Code::FailedPrecondition => StatusCode::BAD_REQUEST,
        Code::Aborted => StatusCode::CONFLICT,
        Code::OutOfRange => StatusCode::BAD_REQUEST,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<Status> for GatewayError {
    fn from(status: Status) -> Self {
        Self::Rpc(status)
    }
}

impl From<JsonRejection> for GatewayError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for GatewayError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for GatewayError {
    fn from(rejection: PathRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let code = self.code();
        if matches!(self, Self::Rpc(_)) && http_status(code).is_server_error() {
            tracing::warn!(?code, error = %self, "rpc call failed");
        } else {
            tracing::debug!(?code, error = %self, "api request rejected");
        }

        let body = ErrorBody {
            error: self.to_string(),
            code: code as i32,
        };
        (http_status(code), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_codes_map_to_http() {
        assert_eq!(http_status(Code::InvalidArgument), StatusCode::BAD_REQUEST);
        assert_eq!(http_status(Code::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(http_status(Code::AlreadyExists), StatusCode::CONFLICT);
        assert_eq!(http_status(Code::Unauthenticated), StatusCode::UNAUTHORIZED);
        assert_eq!(http_status(Code::Unavailable), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(http_status(Code::Cancelled).as_u16(), 499);
    }

    #[test]
    fn rpc_error_keeps_message_and_code() {
        let err = GatewayError::from(Status::not_found("node 0102030405060708 does not exist"));
        assert_eq!(err.code(), Code::NotFound);
        assert_eq!(err.to_string(), "node 0102030405060708 does not exist");
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }
}
