//! The record of the logged-in user

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Identifier, IdentifierRef};

/// The logged-in user as recorded alongside the credential
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// A client-generated identifier for this session
    pub id: String,
    /// The identifier (email) the user authenticated with
    pub identifier: Identifier,
    /// The account type reported by the backend
    pub account_type: String,
    /// The subscription plan reported by the backend
    pub plan_type: String,
    /// When the session was established
    pub created_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Records a session established just now for `identifier`
    pub fn new(
        identifier: &IdentifierRef,
        account_type: impl Into<String>,
        plan_type: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            identifier: identifier.to_owned(),
            account_type: account_type.into(),
            plan_type: plan_type.into(),
            created_at: Utc::now(),
        }
    }
}

/// Whether an identifier can still be used to register a new account
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    /// No account is registered under the identifier
    Available,
    /// An account is already registered under the identifier
    Taken,
}

impl Availability {
    /// Whether the identifier is available
    #[inline]
    pub fn is_available(self) -> bool {
        matches!(self, Self::Available)
    }
}
