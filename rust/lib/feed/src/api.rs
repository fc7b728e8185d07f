//! Network collaborator consumed by the engine.
//!
//! Transport, endpoints and authentication live on the other side of this
//! trait. Every call acts on behalf of the signed-in viewer.

use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::model::{Comment, Post, PostDraft, ReactionKind};

pub use crate::pagination::PageCursor;

/// One page as returned by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchedPage {
    pub posts: Vec<Post>,
    /// Explicit exhaustion flag. Some sources omit it; only an empty page
    /// then ends the feed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_more: Option<bool>,
}

impl FetchedPage {
    pub fn new(posts: Vec<Post>, has_more: bool) -> Self {
        Self {
            posts,
            has_more: Some(has_more),
        }
    }
}

#[async_trait::async_trait]
pub trait FeedApi: Send + Sync + 'static {
    async fn fetch_page(&self, cursor: PageCursor) -> Result<FetchedPage, ApiError>;

    /// Toggle `kind` on `post_id`. Returns the authoritative post,
    /// including reactions other users added meanwhile.
    async fn submit_reaction(&self, post_id: &str, kind: ReactionKind) -> Result<Post, ApiError>;

    async fn submit_comment(&self, post_id: &str, content: &str) -> Result<Comment, ApiError>;

    async fn create_post(&self, draft: &PostDraft) -> Result<Post, ApiError>;
}
