//! JSON request decoding and response encoding.
//!
//! Every failure becomes the `{"Success": false, "Message": ...}` envelope
//! with a short fixed message; the detail only goes to the log.

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Request},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Display;
use thiserror::Error;
use tracing::{error, warn};

use crate::protocol::Envelope;

/// A failed request
#[derive(Debug, Error)]
pub enum ApiError {
    /// The body was not the expected JSON
    #[error("failed decoding request: {0}")]
    Decode(String),

    /// Caused by the request or the state of the target path
    #[error("{message}: {detail}")]
    BadRequest {
        message: &'static str,
        detail: String,
    },

    /// Server-side failure
    #[error("{message}: {detail}")]
    Internal {
        message: &'static str,
        detail: String,
    },
}

impl ApiError {
    pub fn bad_request(message: &'static str, detail: impl Display) -> Self {
        Self::BadRequest {
            message,
            detail: detail.to_string(),
        }
    }

    pub fn internal(message: &'static str, detail: impl Display) -> Self {
        Self::Internal {
            message,
            detail: detail.to_string(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Decode(_) | Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The message sent to the client
    pub fn message(&self) -> &'static str {
        match self {
            Self::Decode(_) => "failed decoding request",
            Self::BadRequest { message, .. } | Self::Internal { message, .. } => message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!("{}", self);
        Reply::with_status(self.status(), Envelope::fail(self.message())).into_response()
    }
}

/// JSON body extractor that rejects with [`ApiError::Decode`].
///
/// The `Content-Type` header is not checked.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRequest<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonRequest<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::Decode(e.body_text()))?;
        serde_json::from_slice(&bytes)
            .map(JsonRequest)
            .map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// JSON response body.
///
/// If the value cannot be encoded the client gets a generic 500 envelope.
#[derive(Debug, Clone)]
pub struct Reply<T> {
    status: StatusCode,
    body: T,
}

impl<T> Reply<T> {
    pub fn ok(body: T) -> Self {
        Self::with_status(StatusCode::OK, body)
    }

    pub fn with_status(status: StatusCode, body: T) -> Self {
        Self { status, body }
    }
}

impl<T: Serialize> IntoResponse for Reply<T> {
    fn into_response(self) -> Response {
        let (status, body) = match serde_json::to_vec(&self.body) {
            Ok(body) => (self.status, body),
            Err(e) => {
                error!("Failed encoding response: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    br#"{"Success":false,"Message":"failed encoding response"}"#.to_vec(),
                )
            }
        };
        (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
    }
}
