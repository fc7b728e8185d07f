//! Feed data model: posts and the reactions/comments hanging off them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix of every client-generated id (temporary comments, reactions, posts).
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Generate a fresh client-side id, e.g. `local-3f2a…`.
pub fn local_id() -> String {
    format!(
        "{}{}",
        LOCAL_ID_PREFIX,
        uuid::Uuid::new_v4().to_string().replace('-', "")
    )
}

/// Whether `id` was generated on this client and is not yet known to the server.
pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

// ── Reaction ────────────────────────────────────────────────────────

/// Reaction type a user can leave on a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReactionKind {
    Like,
    Love,
    Haha,
    Sad,
    Wow,
    Angry,
}

impl ReactionKind {
    pub const ALL: [ReactionKind; 6] = [
        ReactionKind::Like,
        ReactionKind::Love,
        ReactionKind::Haha,
        ReactionKind::Sad,
        ReactionKind::Wow,
        ReactionKind::Angry,
    ];

    /// Wire name, e.g. `"LIKE"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReactionKind::Like => "LIKE",
            ReactionKind::Love => "LOVE",
            ReactionKind::Haha => "HAHA",
            ReactionKind::Sad => "SAD",
            ReactionKind::Wow => "WOW",
            ReactionKind::Angry => "ANGRY",
        }
    }
}

impl fmt::Display for ReactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One user's reaction to one post. At most one exists per (post, user).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ReactionKind,
    pub user_id: String,
    pub post_id: String,
}

impl Reaction {
    pub fn new(
        id: impl Into<String>,
        kind: ReactionKind,
        user_id: impl Into<String>,
        post_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            user_id: user_id.into(),
            post_id: post_id.into(),
        }
    }
}

// ── Comment ─────────────────────────────────────────────────────────

/// A comment on a post. Immutable once posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    /// Server id, or a `local-` id for comments created on this client.
    pub id: String,
    pub content: String,
    pub user_id: String,
    pub post_id: String,
    pub created_at: DateTime<Utc>,
    /// Server id of a locally created comment, once confirmed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
}

impl Comment {
    /// Whether this comment is the entity identified by `id`, under either
    /// its client id or its confirmed server id.
    pub fn answers_to(&self, id: &str) -> bool {
        self.id == id || self.server_id.as_deref() == Some(id)
    }

    /// Created locally and still waiting for the server.
    pub fn is_unconfirmed(&self) -> bool {
        is_local_id(&self.id) && self.server_id.is_none()
    }
}

// ── Post ────────────────────────────────────────────────────────────

/// Post author as shown in the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl Author {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            avatar: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub url: String,
    pub kind: MediaKind,
}

/// A feed entry. Owned by the canonical collection, keyed by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub author: Author,
    #[serde(default)]
    pub media: Vec<Media>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub is_boosted: bool,
}

impl Post {
    pub fn new(id: impl Into<String>, author: Author, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            created_at: Utc::now(),
            author,
            media: Vec::new(),
            reactions: Vec::new(),
            comments: Vec::new(),
            is_boosted: false,
        }
    }

    /// The reaction `user_id` currently has on this post.
    pub fn reaction_of(&self, user_id: &str) -> Option<&Reaction> {
        self.reactions.iter().find(|r| r.user_id == user_id)
    }

    /// Index of `user_id`'s reaction within `reactions`.
    pub fn reaction_index(&self, user_id: &str) -> Option<usize> {
        self.reactions.iter().position(|r| r.user_id == user_id)
    }

    pub fn comment(&self, id: &str) -> Option<&Comment> {
        self.comments.iter().find(|c| c.answers_to(id))
    }

    pub fn reaction_count(&self, kind: ReactionKind) -> usize {
        self.reactions.iter().filter(|r| r.kind == kind).count()
    }
}

/// Content of a post the viewer is about to publish.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostDraft {
    pub content: String,
    #[serde(default)]
    pub media: Vec<Media>,
}

impl PostDraft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            media: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_ids_are_unique_and_prefixed() {
        let a = local_id();
        let b = local_id();
        assert_ne!(a, b);
        assert!(is_local_id(&a));
        assert!(!a[LOCAL_ID_PREFIX.len()..].contains('-'));
    }

    #[test]
    fn reaction_kind_wire_names() {
        assert_eq!(ReactionKind::Like.to_string(), "LIKE");
        let json = serde_json::to_string(&ReactionKind::Angry).unwrap();
        assert_eq!(json, "\"ANGRY\"");
        let back: ReactionKind = serde_json::from_str("\"HAHA\"").unwrap();
        assert_eq!(back, ReactionKind::Haha);
    }

    #[test]
    fn reaction_serializes_kind_as_type() {
        let r = Reaction::new("r1", ReactionKind::Wow, "u1", "p1");
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["type"], "WOW");
        assert_eq!(v["userId"], "u1");
    }

    #[test]
    fn comment_answers_to_both_ids() {
        let mut c = Comment {
            id: local_id(),
            content: "hi".into(),
            user_id: "u1".into(),
            post_id: "p1".into(),
            created_at: Utc::now(),
            server_id: None,
        };
        assert!(c.is_unconfirmed());
        c.server_id = Some("c-9".into());
        assert!(c.answers_to("c-9"));
        assert!(c.answers_to(&c.id.clone()));
        assert!(!c.is_unconfirmed());
    }

    #[test]
    fn post_deserializes_with_missing_collections() {
        let json = r#"{
            "id": "p1",
            "content": "hello",
            "createdAt": "2024-01-01T00:00:00Z",
            "author": {"id": "alice", "displayName": "Alice"}
        }"#;
        let post: Post = serde_json::from_str(json).unwrap();
        assert!(post.reactions.is_empty());
        assert!(post.comments.is_empty());
        assert!(!post.is_boosted);
    }

    #[test]
    fn reaction_lookup_by_user() {
        let mut post = Post::new("p1", Author::new("alice", "Alice"), "x");
        post.reactions.push(Reaction::new("r1", ReactionKind::Like, "bob", "p1"));
        post.reactions.push(Reaction::new("r2", ReactionKind::Love, "carol", "p1"));
        assert_eq!(post.reaction_of("carol").map(|r| r.kind), Some(ReactionKind::Love));
        assert_eq!(post.reaction_index("carol"), Some(1));
        assert!(post.reaction_of("dave").is_none());
        assert_eq!(post.reaction_count(ReactionKind::Like), 1);
    }
}
