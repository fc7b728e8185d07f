//! Entity reconciliation: merging partial post updates into canonical posts.
//!
//! Scalar fields in a patch simply overwrite. The two collections are merged
//! structurally instead, so that an update never erases data that arrived
//! from somewhere else in the meantime:
//!
//! - reactions: an authoritative (server-confirmed) set replaces wholesale;
//!   a local change only touches the acting user's entry.
//! - comments: append-only by id, never truncated or rewritten.
//!
//! Everything here is a pure function of its inputs.

use chrono::{DateTime, Utc};

use crate::model::{Author, Comment, Media, Post, Reaction, ReactionKind};

/// How a patch changes the reaction set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactionPatch {
    /// Server-confirmed set. Replaces the canonical set.
    Authoritative(Vec<Reaction>),

    /// One user's change. Other users' reactions are left untouched.
    Local {
        user_id: String,
        /// The user's reaction after the change; `None` removes it.
        reaction: Option<Reaction>,
        /// Where to insert when the user has no reaction in the set yet.
        /// Defaults to the end.
        at: Option<usize>,
    },
}

/// A partial post. `None` fields leave the canonical value as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostPatch {
    pub content: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub author: Option<Author>,
    pub media: Option<Vec<Media>>,
    pub is_boosted: Option<bool>,
    pub reactions: Option<ReactionPatch>,
    pub comments: Option<Vec<Comment>>,
}

impl PostPatch {
    /// Everything the server said about a post, reactions authoritative.
    pub fn from_server(post: Post) -> Self {
        Self {
            content: Some(post.content),
            created_at: Some(post.created_at),
            author: Some(post.author),
            media: Some(post.media),
            is_boosted: Some(post.is_boosted),
            reactions: Some(ReactionPatch::Authoritative(post.reactions)),
            comments: Some(post.comments),
        }
    }

    /// An optimistic reaction change by `user_id`.
    pub fn local_reaction(
        user_id: impl Into<String>,
        reaction: Option<Reaction>,
        at: Option<usize>,
    ) -> Self {
        Self {
            reactions: Some(ReactionPatch::Local {
                user_id: user_id.into(),
                reaction,
                at,
            }),
            ..Self::default()
        }
    }

    pub fn comments(comments: Vec<Comment>) -> Self {
        Self {
            comments: Some(comments),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Merge `patch` into `canonical`, producing the reconciled post.
///
/// The post id is never changed by a merge.
pub fn merge(canonical: &Post, patch: &PostPatch) -> Post {
    let mut merged = canonical.clone();

    if let Some(content) = &patch.content {
        merged.content = content.clone();
    }
    if let Some(created_at) = patch.created_at {
        merged.created_at = created_at;
    }
    if let Some(author) = &patch.author {
        merged.author = author.clone();
    }
    if let Some(media) = &patch.media {
        merged.media = media.clone();
    }
    if let Some(is_boosted) = patch.is_boosted {
        merged.is_boosted = is_boosted;
    }

    match &patch.reactions {
        Some(ReactionPatch::Authoritative(reactions)) => {
            merged.reactions = unique_per_user(reactions);
        }
        Some(ReactionPatch::Local {
            user_id,
            reaction,
            at,
        }) => {
            apply_local_reaction(&mut merged.reactions, user_id, reaction.clone(), *at);
        }
        None => {}
    }

    if let Some(comments) = &patch.comments {
        append_comments(&mut merged.comments, comments);
    }

    merged
}

/// Replace `user_id`'s entry in `reactions` with `reaction` (or drop it).
///
/// A replaced reaction keeps its position. A new one goes to `at`, clamped
/// to the set length, or to the end.
pub fn apply_local_reaction(
    reactions: &mut Vec<Reaction>,
    user_id: &str,
    reaction: Option<Reaction>,
    at: Option<usize>,
) {
    let previous = reactions.iter().position(|r| r.user_id == user_id);
    reactions.retain(|r| r.user_id != user_id);

    if let Some(reaction) = reaction {
        let index = previous
            .or(at)
            .unwrap_or(reactions.len())
            .min(reactions.len());
        reactions.insert(index, reaction);
    }
}

/// The reaction a user ends up with after requesting `requested`:
/// same type again removes it, anything else replaces it.
pub fn toggled_kind(current: Option<ReactionKind>, requested: ReactionKind) -> Option<ReactionKind> {
    if current == Some(requested) {
        None
    } else {
        Some(requested)
    }
}

/// Append the comments of `incoming` not already present, in order.
///
/// Existing comments are matched by id, including the server id recorded
/// on confirmed local comments. Nothing is ever removed.
pub fn append_comments(existing: &mut Vec<Comment>, incoming: &[Comment]) {
    for comment in incoming {
        let known = existing.iter().any(|c| {
            c.answers_to(&comment.id)
                || comment
                    .server_id
                    .as_deref()
                    .is_some_and(|server_id| c.answers_to(server_id))
        });
        if !known {
            existing.push(comment.clone());
        }
    }
}

/// Union of two comment lists, keeping first-seen order.
pub fn merge_comments(base: &[Comment], incoming: &[Comment]) -> Vec<Comment> {
    let mut merged = Vec::with_capacity(base.len().max(incoming.len()));
    append_comments(&mut merged, base);
    append_comments(&mut merged, incoming);
    merged
}

/// Keep only the first reaction of each user.
fn unique_per_user(reactions: &[Reaction]) -> Vec<Reaction> {
    let mut unique: Vec<Reaction> = Vec::with_capacity(reactions.len());
    for reaction in reactions {
        if !unique.iter().any(|r| r.user_id == reaction.user_id) {
            unique.push(reaction.clone());
        }
    }
    unique
}
