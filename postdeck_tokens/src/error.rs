//! Errors surfaced by identity and API calls

use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;

/// The broad category of a [`SessionError`]
///
/// Callers that only need to branch on the kind of failure (for example to
/// redirect to the login page) can match on this rather than on the error
/// itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The input was rejected before or by the backend
    Validation,
    /// The request was not authorized
    Unauthorized,
    /// The requested resource or account does not exist
    NotFound,
    /// The resource or account already exists
    Conflict,
    /// The request could not be delivered
    Network,
    /// The backend failed while handling the request
    Server,
    /// The credential could not be refreshed and the session has ended
    RefreshFailed,
    /// The backend answered in a way the client does not understand
    UnexpectedResponse,
}

/// An error while performing an identity or API call
#[derive(Debug, Error)]
pub enum SessionError {
    /// The input was rejected
    #[error("invalid input: {message}")]
    Validation {
        /// Why the input was rejected
        message: String,
    },
    /// The request was not authorized
    #[error("unauthorized: {message}")]
    Unauthorized {
        /// The message reported for the failure
        message: String,
    },
    /// The resource does not exist
    #[error("not found: {message}")]
    NotFound {
        /// The message reported for the failure
        message: String,
    },
    /// The resource already exists
    #[error("conflict: {message}")]
    Conflict {
        /// The message reported for the failure
        message: String,
    },
    /// Unable to send the request or read the response
    #[error("error communicating with the backend")]
    Network(#[source] reqwest_middleware::Error),
    /// The backend reported an internal failure
    #[error("backend error ({status}): {message}")]
    Server {
        /// The status code returned
        status: StatusCode,
        /// The message reported for the failure
        message: String,
    },
    /// The credential could not be refreshed; the session is over
    #[error("session expired; authentication is required")]
    RefreshFailed,
    /// The backend returned a status the client does not handle
    #[error("unexpected response from backend ({status}): {message}")]
    UnexpectedResponse {
        /// The status code returned
        status: StatusCode,
        /// The message or body returned
        message: String,
    },
    /// A success response body did not have the expected shape
    #[error("error deserializing response body")]
    MalformedBody(#[from] serde_json::Error),
    /// The request path could not be resolved against the API base
    #[error("invalid request URL")]
    InvalidUrl(#[from] url::ParseError),
}

impl SessionError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub(crate) fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Classifies a non-success status code and the message the backend
    /// attached to it
    pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                Self::Validation { message }
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Unauthorized { message },
            StatusCode::NOT_FOUND => Self::NotFound { message },
            StatusCode::CONFLICT => Self::Conflict { message },
            s if s.is_server_error() => Self::Server { status, message },
            _ => Self::UnexpectedResponse { status, message },
        }
    }

    /// The category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } | Self::InvalidUrl(_) => ErrorKind::Validation,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Network(_) => ErrorKind::Network,
            Self::Server { .. } => ErrorKind::Server,
            Self::RefreshFailed => ErrorKind::RefreshFailed,
            Self::UnexpectedResponse { .. } | Self::MalformedBody(_) => {
                ErrorKind::UnexpectedResponse
            }
        }
    }

    /// Whether the user must authenticate again before continuing
    pub fn requires_login(&self) -> bool {
        matches!(self.kind(), ErrorKind::Unauthorized | ErrorKind::RefreshFailed)
    }
}

impl From<reqwest_middleware::Error> for SessionError {
    fn from(error: reqwest_middleware::Error) -> Self {
        Self::Network(error)
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(error: reqwest::Error) -> Self {
        Self::Network(error.into())
    }
}
