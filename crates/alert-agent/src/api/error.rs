//! Defines the `ApiError` type that can be returned from an API handler, which
//! specifies an HTTP status code and wraps an `anyhow::Error`. It implements
//! `IntoResponse`, allowing handlers to return a `Result<Json<T>, ApiError>`.
//! Errors from the engine and store become 500s, and `Rejection`s become 400s.
use axum::http::StatusCode;

use super::Rejection;

/// An error response
#[derive(Debug, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[error("status: {status}, error: {error}")]
pub struct ApiError {
    /// The HTTP status code
    #[serde(with = "status_serde")]
    pub status: StatusCode,

    /// The error message
    #[serde(with = "error_serde")]
    #[source]
    pub error: anyhow::Error,
}

mod status_serde {
    use serde::{
        de::{self, Deserialize, Deserializer},
        ser::{Serialize, Serializer},
    };

    pub fn serialize<S: Serializer>(
        status: &axum::http::StatusCode,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        status.as_u16().serialize(s)
    }
    pub fn deserialize<'a, D: Deserializer<'a>>(
        deserializer: D,
    ) -> Result<axum::http::StatusCode, D::Error> {
        let int_val = <u16 as Deserialize>::deserialize(deserializer)?;
        axum::http::StatusCode::from_u16(int_val).map_err(de::Error::custom)
    }
}

mod error_serde {
    use serde::{
        de::{Deserialize, Deserializer},
        ser::Serializer,
    };

    pub fn serialize<S: Serializer>(error: &anyhow::Error, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("{error:#}"))
    }
    pub fn deserialize<'a, D: Deserializer<'a>>(
        deserializer: D,
    ) -> Result<anyhow::Error, D::Error> {
        let str_val = <String as Deserialize>::deserialize(deserializer)?;
        Ok(anyhow::anyhow!(str_val))
    }
}

impl ApiError {
    pub fn new(status: StatusCode, error: anyhow::Error) -> ApiError {
        ApiError { status, error }
    }

    pub fn not_found(what: impl std::fmt::Display) -> ApiError {
        ApiError::new(StatusCode::NOT_FOUND, anyhow::anyhow!("{what} was not found"))
    }

    fn status_for(err: &anyhow::Error) -> StatusCode {
        if err.downcast_ref::<Rejection>().is_some() {
            return StatusCode::BAD_REQUEST;
        }
        if let Some(api_error) = err.downcast_ref::<ApiError>() {
            return api_error.status;
        }
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        let status = Self::status_for(&error);
        if status.is_server_error() {
            tracing::error!(error = %format!("{error:#}"), "API responding with internal error");
        }
        ApiError { status, error }
    }
}

impl From<Rejection> for ApiError {
    fn from(value: Rejection) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            error: anyhow::Error::from(value).context("Input validation error"),
        }
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status;
        (status, axum::Json(self)).into_response()
    }
}
