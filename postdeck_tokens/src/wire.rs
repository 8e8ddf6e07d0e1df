//! The response envelope used by the postdeck backend
//!
//! Successful responses wrap their payload as
//! `{ "data": …, "statusCode": 200, "message": "…" }`. Error responses carry
//! `message` either as a plain string or as a nested
//! `{ "message": …, "error": …, "statusCode": … }` object, where the inner
//! message may itself be a list of validation messages.

use reqwest::{Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};

use crate::{Reply, SessionError, SessionResult};

/// A successful response envelope
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    /// The payload, if any
    pub data: Option<T>,
    /// The status code echoed by the backend
    #[serde(default)]
    pub status_code: Option<u16>,
    /// The message attached to the response
    #[serde(default)]
    pub message: Option<Message>,
}

/// A message as reported by the backend
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Message {
    /// A single message
    Text(String),
    /// A list of messages, usually one per rejected field
    Lines(Vec<String>),
    /// A message wrapped in a detailed error object
    Nested {
        /// The wrapped message
        message: Box<Message>,
    },
}

impl Message {
    /// Flattens the message into a single line
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Lines(lines) => lines.join("; "),
            Self::Nested { message } => message.into_text(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<Message>,
}

/// Reads a response into the uniform result shape
///
/// Success statuses are decoded as an [`Envelope`]; an empty success body is
/// accepted as a reply without data. Other statuses are classified with
/// [`SessionError::from_status()`], using the backend's message when one can
/// be found.
pub async fn read_reply<T: DeserializeOwned>(resp: Response) -> SessionResult<Option<T>> {
    let status = resp.status();
    let body = resp.bytes().await?;

    tracing::debug!(
        response.status = status.as_u16(),
        response.length = body.len(),
        "received response from backend"
    );

    if !status.is_success() {
        return Err(SessionError::from_status(status, error_message(status, &body)));
    }

    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Reply::new(default_message(status), None));
    }

    let envelope: Envelope<T> = serde_json::from_slice(&body)?;
    let message = envelope
        .message
        .map(Message::into_text)
        .unwrap_or_else(|| default_message(status));

    Ok(Reply::new(message, envelope.data))
}

/// Extracts the most specific message available from an error body
pub fn error_message(status: StatusCode, body: &[u8]) -> String {
    if let Ok(ErrorBody {
        message: Some(message),
    }) = serde_json::from_slice(body)
    {
        return message.into_text();
    }

    match std::str::from_utf8(body).map(str::trim) {
        Ok(text) if !text.is_empty() && !text.starts_with('{') && !text.starts_with('<') => {
            text.to_owned()
        }
        _ => default_message(status),
    }
}

fn default_message(status: StatusCode) -> String {
    status
        .canonical_reason()
        .unwrap_or("unrecognized status")
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::de::IgnoredAny;

    fn response(status: u16, body: &'static str) -> Response {
        http::Response::builder()
            .status(status)
            .body(body)
            .unwrap()
            .into()
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Payload {
        value: u32,
    }

    #[tokio::test]
    async fn success_envelope_yields_data_and_message() {
        let resp = response(200, r#"{"data":{"value":3},"statusCode":200,"message":"ok!"}"#);
        let reply = read_reply::<Payload>(resp).await.unwrap();
        assert_eq!(reply.message, "ok!");
        assert_eq!(reply.data, Some(Payload { value: 3 }));
    }

    #[tokio::test]
    async fn null_data_is_accepted() {
        let resp = response(201, r#"{"data":null,"statusCode":201,"message":"created"}"#);
        let reply = read_reply::<Payload>(resp).await.unwrap();
        assert_eq!(reply.data, None);
    }

    #[tokio::test]
    async fn absent_data_decodes_for_payloads_without_a_default() {
        let resp = response(200, r#"{"statusCode":200,"message":"done"}"#);
        let reply = read_reply::<Payload>(resp).await.unwrap();
        assert_eq!(reply.message, "done");
        assert_eq!(reply.data, None);
    }

    #[tokio::test]
    async fn empty_success_body_is_accepted() {
        let reply = read_reply::<IgnoredAny>(response(204, "")).await.unwrap();
        assert!(reply.data.is_none());
        assert_eq!(reply.message, "No Content");
    }

    #[tokio::test]
    async fn malformed_success_body_is_reported() {
        let error = read_reply::<Payload>(response(200, "<html>")).await.unwrap_err();
        assert!(matches!(error, SessionError::MalformedBody(_)));
    }

    #[tokio::test]
    async fn nested_error_message_is_used() {
        let resp = response(
            400,
            r#"{"code":400,"message":{"message":"wrong password","error":"Bad Request","statusCode":400}}"#,
        );
        let error = read_reply::<IgnoredAny>(resp).await.unwrap_err();
        match error {
            SessionError::Validation { message } => assert_eq!(message, "wrong password"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn listed_validation_messages_are_joined() {
        let body = br#"{"message":{"message":["a is short","b is empty"],"error":"Bad Request"}}"#;
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, body),
            "a is short; b is empty"
        );
    }

    #[test]
    fn plain_text_error_body_is_used() {
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, b"upstream down\n"),
            "upstream down"
        );
    }

    #[test]
    fn missing_message_falls_back_to_the_status_reason() {
        assert_eq!(error_message(StatusCode::NOT_FOUND, b"{}"), "Not Found");
    }
}
