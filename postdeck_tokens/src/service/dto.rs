//! DTOs for interacting with the identity backend

use serde::{Deserialize, Serialize};

use crate::{AccessToken, IdentifierRef, PasswordRef, VerificationCodeRef};

/// Credentials sent to log in or sign up
#[derive(Debug, Serialize)]
pub(super) struct CredentialsRequest<'a> {
    pub identifier: &'a IdentifierRef,
    pub password: &'a PasswordRef,
}

/// A request for a verification code
#[derive(Debug, Serialize)]
pub(super) struct CodeRequest<'a> {
    pub email: &'a IdentifierRef,
}

/// A verification code submitted for checking
#[derive(Debug, Serialize)]
pub(super) struct VerificationRequest<'a> {
    pub email: &'a IdentifierRef,
    pub code: &'a VerificationCodeRef,
}

/// A password change
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct PasswordChangeRequest<'a> {
    pub old_password: &'a PasswordRef,
    pub new_password: &'a PasswordRef,
}

/// The payload returned when a credential is issued
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct IssuedCredential {
    pub access_token: AccessToken,
    #[serde(default)]
    pub account_type: Option<String>,
    #[serde(default)]
    pub plan_type: Option<String>,
}

/// A verification code echoed back by the backend, which may be numeric
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(super) enum EchoedCode {
    Number(u64),
    Text(String),
}

impl EchoedCode {
    pub fn into_text(self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s,
        }
    }
}
