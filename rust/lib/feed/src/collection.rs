use std::collections::HashSet;

use tracing::debug;

use crate::model::{Comment, Post};
use crate::pagination::{self, PageMerge};
use crate::reconcile::{self, PostPatch};

/// The canonical collection: the one authoritative, ordered copy of every
/// fetched post.
///
/// All writes go through the reconciler ([`FeedCollection::apply`]) or the
/// page merger ([`FeedCollection::append_page`]). No two entries ever share
/// an id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedCollection {
    posts: Vec<Post>,
}

impl FeedCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an arbitrary list, keeping the first entry of each id.
    pub fn from_posts(posts: Vec<Post>) -> Self {
        let mut seen = HashSet::new();
        let posts = posts
            .into_iter()
            .filter(|p| seen.insert(p.id.clone()))
            .collect();
        Self { posts }
    }

    pub fn posts(&self) -> &[Post] {
        &self.posts
    }

    /// Owned copy for handing to presentation code.
    pub fn snapshot(&self) -> Vec<Post> {
        self.posts.clone()
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Post> {
        self.posts.iter().find(|p| p.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.posts.iter().position(|p| p.id == id)
    }

    /// Reconcile `patch` into post `id`.
    ///
    /// Returns `true` when the stored post actually changed; `false` when
    /// it is missing or the merge was a no-op.
    pub fn apply(&mut self, id: &str, patch: &PostPatch) -> bool {
        let Some(index) = self.position(id) else {
            debug!(post_id = id, "patch for unknown post ignored");
            return false;
        };
        let merged = reconcile::merge(&self.posts[index], patch);
        if merged == self.posts[index] {
            return false;
        }
        self.posts[index] = merged;
        true
    }

    /// Append a fetched page. Existing entries win over incoming duplicates.
    pub fn append_page(&mut self, incoming: Vec<Post>, source_has_more: Option<bool>) -> PageMerge {
        let existing = std::mem::take(&mut self.posts);
        let merge = pagination::append_page(existing, incoming, source_has_more);
        self.posts = merge.merged.clone();
        merge
    }

    /// Replace the whole collection (refresh). Returns the merge summary
    /// of the fresh page against an empty collection.
    pub fn replace_all(&mut self, incoming: Vec<Post>, source_has_more: Option<bool>) -> PageMerge {
        let merge = pagination::append_page(Vec::new(), incoming, source_has_more);
        self.posts = merge.merged.clone();
        merge
    }

    /// Insert at the head. Refused when the id is already present.
    pub fn insert_head(&mut self, post: Post) -> bool {
        if self.contains(&post.id) {
            return false;
        }
        self.posts.insert(0, post);
        true
    }

    /// Put `post` where `id` sits, keeping its position.
    ///
    /// When another entry already carries `post.id`, the entry at `id` is
    /// dropped instead so the id stays unique. Returns `false` when `id`
    /// is missing.
    pub fn replace_post(&mut self, id: &str, post: Post) -> bool {
        let Some(index) = self.position(id) else {
            return false;
        };
        if post.id != id && self.contains(&post.id) {
            self.posts.remove(index);
            return true;
        }
        self.posts[index] = post;
        true
    }

    /// Remove post `id`.
    pub fn evict(&mut self, id: &str) -> Option<Post> {
        let index = self.position(id)?;
        Some(self.posts.remove(index))
    }

    /// Drop a comment by its (client or server) id.
    ///
    /// This is the only way a comment ever leaves the collection, and is
    /// reserved for rolling back a comment the server never accepted.
    pub fn remove_comment(&mut self, post_id: &str, comment_id: &str) -> bool {
        let Some(index) = self.position(post_id) else {
            return false;
        };
        let comments = &mut self.posts[index].comments;
        let before = comments.len();
        comments.retain(|c| !c.answers_to(comment_id));
        comments.len() != before
    }

    /// Record the server's copy of a locally created comment.
    ///
    /// The temporary entry keeps its id and position and learns its server
    /// id. A server copy that slipped in meanwhile (e.g. via a refetch) is
    /// folded into it. If the temporary entry is gone, the server copy is
    /// appended instead.
    pub fn confirm_comment(&mut self, post_id: &str, temp_id: &str, server: &Comment) -> bool {
        let Some(index) = self.position(post_id) else {
            return false;
        };
        let comments = &mut self.posts[index].comments;

        let Some(local) = comments.iter().position(|c| c.id == temp_id) else {
            reconcile::append_comments(comments, std::slice::from_ref(server));
            return true;
        };

        comments[local].server_id = Some(server.id.clone());
        comments[local].created_at = server.created_at;
        let mut position = 0;
        comments.retain(|c| {
            let keep = position == local || c.id != server.id;
            position += 1;
            keep
        });
        true
    }
}
