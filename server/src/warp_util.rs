use {
    crate::catalog::NotFound,
    anyhow::Error,
    hyper::StatusCode,
    serde_derive::Serialize,
    std::{borrow::Cow, convert::Infallible},
    warp::{
        body::BodyDeserializeError,
        reject::{InvalidQuery, MethodNotAllowed, PayloadTooLarge, Reject},
        reply, Rejection, Reply,
    },
};

#[derive(Serialize)]
#[serde(remote = "StatusCode")]
struct StatusCodeU16(#[serde(getter = "StatusCode::as_u16")] u16);

/// Error rendered to HTTP clients as `{"message": ..., "status": ...}`
#[derive(Clone, Serialize, Debug, thiserror::Error)]
#[error("HTTP {}: {}", status, message)]
pub struct HttpError {
    pub message: Cow<'static, str>,
    #[serde(with = "StatusCodeU16")]
    pub status: StatusCode,
}

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal_server_error() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    }

    /// Recover the [HttpError] at the root of `error`, if any, or else report an internal server error.
    ///
    /// A [NotFound] from the catalog is reported as 404.
    pub fn from(error: Error) -> Self {
        let root = error.root_cause();

        if let Some(e) = root.downcast_ref::<HttpError>() {
            e.clone()
        } else if let Some(e) = root.downcast_ref::<NotFound>() {
            Self::not_found(e.to_string())
        } else {
            Self::internal_server_error()
        }
    }

    pub fn as_reply(&self) -> impl Reply {
        reply::with_status(reply::json(&self), self.status)
    }
}

impl Reject for HttpError {}

pub async fn handle_rejection(rejection: Rejection) -> Result<impl Reply, Infallible> {
    let error = if rejection.is_not_found() {
        HttpError::not_found("not found")
    } else if let Some(error) = rejection.find::<HttpError>() {
        error.clone()
    } else if rejection.find::<InvalidQuery>().is_some() {
        HttpError::new(StatusCode::BAD_REQUEST, "invalid query")
    } else if rejection.find::<BodyDeserializeError>().is_some() {
        HttpError::new(StatusCode::BAD_REQUEST, "invalid body")
    } else if rejection.find::<PayloadTooLarge>().is_some() {
        HttpError::new(StatusCode::PAYLOAD_TOO_LARGE, "upload too large")
    } else if rejection.find::<MethodNotAllowed>().is_some() {
        HttpError::new(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
    } else {
        HttpError::internal_server_error()
    };

    Ok(error.as_reply())
}
