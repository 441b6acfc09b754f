use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use identity_sdk::{IdentityError, MeetingError};

use crate::api::rest::dto::{DischargeRequiredBody, ErrorBody};
use crate::domain::error::{AuthorizeError, DomainError};
use crate::domain::minter::DischargeRequiredResponse;

pub const CODE_UNAUTHORIZED: &str = "unauthorized";
pub const CODE_NOT_FOUND: &str = "not found";
pub const CODE_BAD_REQUEST: &str = "bad request";
pub const CODE_ALREADY_COMPLETED: &str = "already completed";
pub const CODE_TIMEOUT: &str = "timeout";
pub const CODE_EXPIRED: &str = "expired";
pub const CODE_UNAVAILABLE: &str = "unavailable";
pub const CODE_INTERNAL: &str = "internal";

/// Error half of every handler result.
#[derive(Debug)]
pub enum ApiError {
    DischargeRequired(Box<DischargeRequiredResponse>),
    Problem {
        status: StatusCode,
        code: &'static str,
        message: String,
    },
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self::Problem {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, CODE_BAD_REQUEST, message)
    }

    /// A 500 whose cause is logged and withheld from the client.
    pub fn internal(cause: &dyn std::fmt::Display) -> Self {
        tracing::error!(error = %cause, "internal error");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, CODE_INTERNAL, "internal error")
    }
}

impl From<IdentityError> for ApiError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, CODE_NOT_FOUND, e.to_string()),
            IdentityError::Unauthorized(_) => {
                Self::new(StatusCode::FORBIDDEN, CODE_UNAUTHORIZED, e.to_string())
            }
            IdentityError::NoAdminCredsProvided => {
                Self::new(StatusCode::UNAUTHORIZED, CODE_UNAUTHORIZED, e.to_string())
            }
            IdentityError::InvalidCaveat(_) | IdentityError::BadRequest(_) => {
                Self::bad_request(e.to_string())
            }
            IdentityError::Meeting(m) => m.into(),
            IdentityError::Internal(_) => Self::internal(&e),
        }
    }
}

impl From<MeetingError> for ApiError {
    fn from(e: MeetingError) -> Self {
        let (status, code) = match &e {
            MeetingError::NotFound(_) => (StatusCode::NOT_FOUND, CODE_NOT_FOUND),
            MeetingError::AlreadyCompleted(_) => (StatusCode::CONFLICT, CODE_ALREADY_COMPLETED),
            MeetingError::Timeout(_) => (StatusCode::REQUEST_TIMEOUT, CODE_TIMEOUT),
            MeetingError::Expired(_) => (StatusCode::GONE, CODE_EXPIRED),
            MeetingError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, CODE_UNAVAILABLE),
            MeetingError::Store(_) => return Self::internal(&e),
        };
        Self::new(status, code, e.to_string())
    }
}

impl From<AuthorizeError> for ApiError {
    fn from(e: AuthorizeError) -> Self {
        match e {
            AuthorizeError::DischargeRequired(resp) => Self::DischargeRequired(resp),
            AuthorizeError::Unauthorized(_) => {
                Self::new(StatusCode::FORBIDDEN, CODE_UNAUTHORIZED, e.to_string())
            }
            AuthorizeError::Internal(_) | AuthorizeError::Mint(_) => Self::internal(&e),
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::Authorize(e) => e.into(),
            DomainError::Identity(e) => e.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::DischargeRequired(resp) => match DischargeRequiredBody::from_response(&resp) {
                Ok(body) => (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, HeaderValue::from_static("Macaroon"))],
                    Json(body),
                )
                    .into_response(),
                Err(e) => Self::internal(&e).into_response(),
            },
            Self::Problem {
                status,
                code,
                message,
            } => (
                status,
                Json(ErrorBody {
                    code: code.to_owned(),
                    message,
                }),
            )
                .into_response(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn status_of(e: impl Into<ApiError>) -> (StatusCode, &'static str) {
        match e.into() {
            ApiError::Problem { status, code, .. } => (status, code),
            ApiError::DischargeRequired(_) => (StatusCode::UNAUTHORIZED, "discharge-required"),
        }
    }

    #[test]
    fn identity_errors_map_to_stable_codes() {
        assert_eq!(
            status_of(IdentityError::NotFound("identity \"x\"".to_owned())),
            (StatusCode::NOT_FOUND, CODE_NOT_FOUND)
        );
        assert_eq!(
            status_of(IdentityError::Unauthorized("nope".to_owned())),
            (StatusCode::FORBIDDEN, CODE_UNAUTHORIZED)
        );
        assert_eq!(
            status_of(IdentityError::InvalidCaveat("bad".to_owned())),
            (StatusCode::BAD_REQUEST, CODE_BAD_REQUEST)
        );
        assert_eq!(
            status_of(IdentityError::Meeting(MeetingError::AlreadyCompleted("w".to_owned()))),
            (StatusCode::CONFLICT, CODE_ALREADY_COMPLETED)
        );
        assert_eq!(
            status_of(MeetingError::Timeout("w".to_owned())),
            (StatusCode::REQUEST_TIMEOUT, CODE_TIMEOUT)
        );
        assert_eq!(
            status_of(MeetingError::Expired("w".to_owned())),
            (StatusCode::GONE, CODE_EXPIRED)
        );
    }

    #[test]
    fn internal_causes_are_not_exposed() {
        let ApiError::Problem { status, message, .. } =
            ApiError::from(IdentityError::Internal("db password rejected".to_owned()))
        else {
            panic!("expected a problem");
        };
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(message, "internal error");
    }
}
