//! Tags used to organize scheduled posts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use postdeck_tokens::{Reply, SessionResult};

use crate::ApiClient;

const TAGS: &str = "/user/tags";

/// The identifier of a tag
pub type TagId = u64;

/// A tag owned by the logged-in user
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    /// The identifier of the tag
    pub id: TagId,
    /// The display name of the tag
    pub name: String,
    /// When the tag was created
    pub created_at: DateTime<Utc>,
    /// When the tag was last renamed
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteTags<'a> {
    tag_ids: &'a [TagId],
}

/// Tag management calls, routed through an [`ApiClient`]
#[derive(Clone, Copy, Debug)]
pub struct TagApi<'a> {
    api: &'a ApiClient,
}

impl<'a> TagApi<'a> {
    /// Constructs the tag calls on top of `api`
    pub fn new(api: &'a ApiClient) -> Self {
        Self { api }
    }

    /// Lists the tags of the logged-in user
    pub async fn list(&self) -> SessionResult<Vec<Tag>> {
        let reply = self.api.get::<Vec<Tag>>(TAGS).await?;
        Ok(reply.map(Option::unwrap_or_default))
    }

    /// Creates a tag for each of `names`, returning the created tags
    pub async fn create<S>(&self, names: &[S]) -> SessionResult<Vec<Tag>>
    where
        S: AsRef<str>,
    {
        let names: Vec<&str> = names.iter().map(AsRef::as_ref).collect();
        let reply = self.api.post::<Vec<Tag>, _>(TAGS, &names).await?;
        Ok(reply.map(Option::unwrap_or_default))
    }

    /// Deletes the tags identified by `ids`
    pub async fn delete(&self, ids: &[TagId]) -> SessionResult<()> {
        let reply = self
            .api
            .request::<serde::de::IgnoredAny, _>(
                reqwest::Method::DELETE,
                TAGS,
                Some(&DeleteTags { tag_ids: ids }),
            )
            .await?;
        Ok(Reply::new(reply.message, ()))
    }
}
