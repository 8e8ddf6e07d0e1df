//! The uniform result shape returned to callers

use serde::Serialize;

use crate::{ErrorKind, SessionError};

/// The result of an identity or API call
pub type SessionResult<T> = Result<Reply<T>, SessionError>;

/// A successful reply along with the message the backend attached to it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply<T> {
    /// A human readable message describing the result
    pub message: String,
    /// The payload of the reply
    pub data: T,
}

impl<T> Reply<T> {
    /// Constructs a new reply
    pub fn new(message: impl Into<String>, data: T) -> Self {
        Self {
            message: message.into(),
            data,
        }
    }

    /// Transforms the payload of the reply, keeping the message
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Reply<U> {
        Reply {
            message: self.message,
            data: f(self.data),
        }
    }
}

/// The `{ success, message, data? }` shape handed to the UI layer
///
/// ```
/// use postdeck_tokens::{Outcome, Reply, SessionError, SessionResult};
///
/// let ok: SessionResult<u32> = Ok(Reply::new("done", 7));
/// let outcome = Outcome::from(ok);
/// assert!(outcome.success);
/// assert_eq!(outcome.data, Some(7));
///
/// let failed: SessionResult<u32> = Err(SessionError::RefreshFailed);
/// let outcome = Outcome::from(failed);
/// assert!(!outcome.success);
/// assert_eq!(outcome.data, None);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Outcome<T> {
    /// Whether the call succeeded
    pub success: bool,
    /// A human readable message describing the result
    pub message: String,
    /// The payload, present only on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// The failure category, present only on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl<T> From<SessionResult<T>> for Outcome<T> {
    fn from(result: SessionResult<T>) -> Self {
        match result {
            Ok(reply) => Self {
                success: true,
                message: reply.message,
                data: Some(reply.data),
                error: None,
            },
            Err(error) => Self {
                success: false,
                message: error.to_string(),
                data: None,
                error: Some(error.kind()),
            },
        }
    }
}
