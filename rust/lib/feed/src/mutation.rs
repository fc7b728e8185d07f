//! Optimistic mutations.
//!
//! Every mutation is applied to the canonical collection before its network
//! call starts, then confirmed with the server's answer or rolled back:
//!
//! ```text
//! IDLE -> PENDING -> CONFIRMED -> IDLE (acknowledge)
//!                 \-> FAILED   -> IDLE (acknowledge)
//! ```
//!
//! Reactions are tracked per (post, user) slot. Only one call per slot is
//! in flight; reactions issued meanwhile compose on top of the optimistic
//! value and are folded into a single follow-up call once the in-flight
//! one resolves.
//!
//! A refresh page may have been sliced before calls that were confirmed
//! while it was in flight. Those outcomes are kept until the page lands
//! and put back on top of it, ahead of the still-pending changes.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use chrono::Utc;
use tracing::{debug, warn};

use crate::collection::FeedCollection;
use crate::error::FeedError;
use crate::model::{Author, Comment, Post, PostDraft, Reaction, ReactionKind, is_local_id, local_id};
use crate::reconcile::{PostPatch, toggled_kind};

// ── Identifiers and lifecycle ───────────────────────────────────────

/// Handle of one issued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MutationId(u64);

impl MutationId {
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Reaction,
    Comment,
    CreatePost,
}

impl MutationKind {
    /// Topic segment, e.g. `"reaction"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Reaction => "reaction",
            MutationKind::Comment => "comment",
            MutationKind::CreatePost => "post",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    /// Unknown or acknowledged.
    Idle,
    /// Applied optimistically, waiting for the server.
    Pending,
    /// Merged with the server's answer.
    Confirmed,
    /// Rolled back.
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord {
    pub id: MutationId,
    pub kind: MutationKind,
    pub post_id: String,
    pub user_id: String,
    pub state: MutationState,
    pub error: Option<FeedError>,
}

// ── Network calls ───────────────────────────────────────────────────

/// A reaction submit to run. The server toggles: sending the type the user
/// already has removes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionCall {
    pub mutation: MutationId,
    pub post_id: String,
    pub user_id: String,
    pub kind: ReactionKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentCall {
    pub mutation: MutationId,
    pub post_id: String,
    pub user_id: String,
    pub temp_id: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePostCall {
    pub mutation: MutationId,
    pub temp_id: String,
    pub draft: PostDraft,
}

/// What a completion did to the collection.
#[derive(Debug, Default, PartialEq)]
pub struct Resolution {
    /// Mutations that left `Pending`.
    pub resolved: Vec<MutationRecord>,
    /// Posts whose canonical copy changed.
    pub touched: Vec<String>,
    /// Posts that left the collection.
    pub removed: Vec<String>,
    /// Follow-up reaction call to run next.
    pub next: Option<ReactionCall>,
    /// Temporary post ids swapped for server ids, `(temp, server)`.
    pub replaced: Vec<(String, String)>,
}

// ── Reaction slots ──────────────────────────────────────────────────

/// A user's reaction as last confirmed by the server, and where it sat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ReactionSnapshot {
    reaction: Option<Reaction>,
    index: Option<usize>,
}

impl ReactionSnapshot {
    fn of(post: &Post, user_id: &str) -> Self {
        Self {
            reaction: post.reaction_of(user_id).cloned(),
            index: post.reaction_index(user_id),
        }
    }

    fn kind(&self) -> Option<ReactionKind> {
        self.reaction.as_ref().map(|r| r.kind)
    }
}

/// In-flight reaction state of one (post, user) pair. Exists only while a
/// call is running.
#[derive(Debug)]
struct ReactionSlot {
    known_good: ReactionSnapshot,
    /// The reaction type the user wants to end up with.
    desired: Option<ReactionKind>,
    in_flight: MutationId,
    /// Mutations whose outcome is the in-flight call's outcome.
    riders: Vec<MutationId>,
    /// Mutations issued while the call runs, in issue order.
    queued: Vec<MutationId>,
}

/// Server outcomes confirmed while a refresh is in flight. The refresh
/// page may have been taken before them, so they are put back on top of it.
#[derive(Debug, Default)]
struct Confirmed {
    reactions: BTreeMap<(String, String), ReactionSnapshot>,
    comments: Vec<Comment>,
    posts: Vec<Post>,
}

/// Reaction type to submit to move the server from `server` to `desired`.
fn call_towards(server: Option<ReactionKind>, desired: Option<ReactionKind>) -> Option<ReactionKind> {
    if server == desired {
        None
    } else {
        desired.or(server)
    }
}

/// Show `desired` as `user_id`'s reaction on `post_id`, reusing the id of
/// the reaction already there.
fn apply_intent(
    collection: &mut FeedCollection,
    post_id: &str,
    user_id: &str,
    desired: Option<ReactionKind>,
) -> bool {
    let Some(post) = collection.get(post_id) else {
        return false;
    };
    let current = post.reaction_of(user_id);
    if current.map(|r| r.kind) == desired {
        return false;
    }
    let reaction = desired.map(|kind| {
        let id = current.map(|r| r.id.clone()).unwrap_or_else(local_id);
        Reaction::new(id, kind, user_id, post_id)
    });
    collection.apply(post_id, &PostPatch::local_reaction(user_id, reaction, None))
}

/// Put back exactly the snapshot, at its original index.
fn restore(collection: &mut FeedCollection, post_id: &str, user_id: &str, snapshot: &ReactionSnapshot) -> bool {
    let before = collection.get(post_id).cloned();
    collection.apply(post_id, &PostPatch::local_reaction(user_id, None, None));
    collection.apply(
        post_id,
        &PostPatch::local_reaction(user_id, snapshot.reaction.clone(), snapshot.index),
    );
    collection.get(post_id) != before.as_ref()
}

fn push_unique(ids: &mut Vec<String>, id: &str) {
    if !ids.iter().any(|known| known == id) {
        ids.push(id.to_string());
    }
}

// ── Controller ──────────────────────────────────────────────────────

/// Tracks every optimistic mutation from issue to resolution.
#[derive(Debug)]
pub struct MutationController {
    next_id: u64,
    history: usize,
    records: BTreeMap<MutationId, MutationRecord>,
    resolved_order: VecDeque<MutationId>,
    reactions: BTreeMap<(String, String), ReactionSlot>,
    comments: BTreeMap<MutationId, Comment>,
    posts: BTreeMap<MutationId, Post>,
    /// `Some` while a refresh is in flight.
    confirmed: Option<Confirmed>,
}

impl MutationController {
    /// `history` bounds how many resolved records stay queryable.
    pub fn new(history: usize) -> Self {
        Self {
            next_id: 1,
            history,
            records: BTreeMap::new(),
            resolved_order: VecDeque::new(),
            reactions: BTreeMap::new(),
            comments: BTreeMap::new(),
            posts: BTreeMap::new(),
            confirmed: None,
        }
    }

    pub fn state(&self, id: MutationId) -> MutationState {
        self.records
            .get(&id)
            .map(|r| r.state)
            .unwrap_or(MutationState::Idle)
    }

    pub fn record(&self, id: MutationId) -> Option<&MutationRecord> {
        self.records.get(&id)
    }

    /// Return a resolved mutation to `Idle`. Pending ones are left alone.
    pub fn acknowledge(&mut self, id: MutationId) -> bool {
        match self.records.get(&id) {
            Some(record) if record.state != MutationState::Pending => {
                self.records.remove(&id);
                true
            }
            _ => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.state == MutationState::Pending)
            .count()
    }

    fn issue(&mut self, kind: MutationKind, post_id: &str, user_id: &str) -> MutationId {
        let id = MutationId(self.next_id);
        self.next_id += 1;
        self.records.insert(
            id,
            MutationRecord {
                id,
                kind,
                post_id: post_id.to_string(),
                user_id: user_id.to_string(),
                state: MutationState::Pending,
                error: None,
            },
        );
        id
    }

    fn resolve(&mut self, id: MutationId, error: Option<FeedError>, out: &mut Resolution) {
        let Some(record) = self.records.get_mut(&id) else {
            return;
        };
        record.state = if error.is_some() {
            MutationState::Failed
        } else {
            MutationState::Confirmed
        };
        record.error = error;
        out.resolved.push(record.clone());

        self.resolved_order.push_back(id);
        while self.resolved_order.len() > self.history {
            if let Some(oldest) = self.resolved_order.pop_front() {
                self.records.remove(&oldest);
            }
        }
    }

    // ── Reactions ───────────────────────────────────────────────────

    /// Toggle `kind` for `user_id` on `post_id` and apply it at once.
    ///
    /// Returns the call to start, or `None` when another call for the same
    /// (post, user) is in flight; the mutation then rides on the follow-up.
    pub fn begin_reaction(
        &mut self,
        collection: &mut FeedCollection,
        post_id: &str,
        user_id: &str,
        kind: ReactionKind,
    ) -> Result<(MutationId, Option<ReactionCall>), FeedError> {
        if is_local_id(post_id) {
            return Err(FeedError::Validation(format!(
                "post '{}' is not published yet",
                post_id
            )));
        }
        let post = collection
            .get(post_id)
            .ok_or_else(|| FeedError::PostNotFound(post_id.to_string()))?;

        let current = post.reaction_of(user_id).map(|r| r.kind);
        let desired = toggled_kind(current, kind);
        let snapshot = ReactionSnapshot::of(post, user_id);

        apply_intent(collection, post_id, user_id, desired);
        let id = self.issue(MutationKind::Reaction, post_id, user_id);
        debug!(post_id, user_id, mutation = %id, ?desired, "reaction applied optimistically");

        let key = (post_id.to_string(), user_id.to_string());
        if let Some(slot) = self.reactions.get_mut(&key) {
            slot.desired = desired;
            slot.queued.push(id);
            return Ok((id, None));
        }

        self.reactions.insert(
            key,
            ReactionSlot {
                known_good: snapshot,
                desired,
                in_flight: id,
                riders: Vec::new(),
                queued: Vec::new(),
            },
        );
        Ok((
            id,
            Some(ReactionCall {
                mutation: id,
                post_id: post_id.to_string(),
                user_id: user_id.to_string(),
                kind,
            }),
        ))
    }

    /// Resolve a reaction call with the server's authoritative post, or the
    /// failure.
    pub fn complete_reaction(
        &mut self,
        collection: &mut FeedCollection,
        call: &ReactionCall,
        result: Result<Post, FeedError>,
    ) -> Resolution {
        let mut out = Resolution::default();
        let key = (call.post_id.clone(), call.user_id.clone());

        let mut slot = match self.reactions.remove(&key) {
            Some(slot) if slot.in_flight == call.mutation => slot,
            other => {
                if let Some(slot) = other {
                    self.reactions.insert(key, slot);
                }
                // Not the slot's call: merge whatever the server said and
                // settle the record.
                let error = match result {
                    Ok(server) => {
                        self.keep_confirmed_reaction(&call.post_id, &call.user_id, &server);
                        if collection.apply(&call.post_id, &PostPatch::from_server(server)) {
                            push_unique(&mut out.touched, &call.post_id);
                        }
                        None
                    }
                    Err(err) => Some(err),
                };
                self.resolve(call.mutation, error, &mut out);
                return out;
            }
        };

        let mut carriers = vec![slot.in_flight];
        carriers.append(&mut slot.riders);

        if !collection.contains(&call.post_id) {
            debug!(post_id = %call.post_id, "reaction resolved for evicted post");
            let error = result.err();
            for id in carriers {
                self.resolve(id, error.clone(), &mut out);
            }
            for id in std::mem::take(&mut slot.queued) {
                self.resolve(id, Some(FeedError::PostNotFound(call.post_id.clone())), &mut out);
            }
            return out;
        }

        let mut changed = false;
        match result {
            Ok(server) => {
                slot.known_good = ReactionSnapshot::of(&server, &call.user_id);
                self.keep_confirmed_reaction(&call.post_id, &call.user_id, &server);
                changed |= collection.apply(&call.post_id, &PostPatch::from_server(server));
                if !slot.queued.is_empty() {
                    changed |= apply_intent(collection, &call.post_id, &call.user_id, slot.desired);
                }
                for id in carriers {
                    self.resolve(id, None, &mut out);
                }
            }
            Err(err) => {
                if slot.queued.is_empty() {
                    warn!(post_id = %call.post_id, mutation = %call.mutation, error = %err, "reaction failed, rolling back");
                    changed |= restore(collection, &call.post_id, &call.user_id, &slot.known_good);
                } else {
                    warn!(post_id = %call.post_id, mutation = %call.mutation, error = %err, "reaction failed, newer intent queued");
                }
                for id in carriers {
                    self.resolve(id, Some(err.clone()), &mut out);
                }
            }
        }

        if let Some(carrier) = slot.queued.pop() {
            let riders = std::mem::take(&mut slot.queued);
            match call_towards(slot.known_good.kind(), slot.desired) {
                Some(kind) => {
                    debug!(post_id = %call.post_id, mutation = %carrier, %kind, "dispatching coalesced reaction");
                    slot.in_flight = carrier;
                    slot.riders = riders;
                    out.next = Some(ReactionCall {
                        mutation: carrier,
                        post_id: call.post_id.clone(),
                        user_id: call.user_id.clone(),
                        kind,
                    });
                    self.reactions.insert(key, slot);
                }
                None => {
                    changed |= restore(collection, &call.post_id, &call.user_id, &slot.known_good);
                    self.resolve(carrier, None, &mut out);
                    for id in riders {
                        self.resolve(id, None, &mut out);
                    }
                }
            }
        }

        if changed {
            push_unique(&mut out.touched, &call.post_id);
        }
        out
    }

    // ── Comments ────────────────────────────────────────────────────

    /// Append a temporary comment to `post_id` at once.
    pub fn begin_comment(
        &mut self,
        collection: &mut FeedCollection,
        post_id: &str,
        user_id: &str,
        content: &str,
        max_len: usize,
    ) -> Result<CommentCall, FeedError> {
        if content.trim().is_empty() {
            return Err(FeedError::Validation("comment cannot be empty".into()));
        }
        if content.chars().count() > max_len {
            return Err(FeedError::Validation(format!(
                "comment exceeds {} characters",
                max_len
            )));
        }
        if is_local_id(post_id) {
            return Err(FeedError::Validation(format!(
                "post '{}' is not published yet",
                post_id
            )));
        }
        if !collection.contains(post_id) {
            return Err(FeedError::PostNotFound(post_id.to_string()));
        }

        let temp = Comment {
            id: local_id(),
            content: content.to_string(),
            user_id: user_id.to_string(),
            post_id: post_id.to_string(),
            created_at: Utc::now(),
            server_id: None,
        };
        collection.apply(post_id, &PostPatch::comments(vec![temp.clone()]));

        let id = self.issue(MutationKind::Comment, post_id, user_id);
        debug!(post_id, mutation = %id, temp_id = %temp.id, "comment appended optimistically");

        let call = CommentCall {
            mutation: id,
            post_id: post_id.to_string(),
            user_id: user_id.to_string(),
            temp_id: temp.id.clone(),
            content: content.to_string(),
        };
        self.comments.insert(id, temp);
        Ok(call)
    }

    /// Confirm the temporary comment with the server copy, or drop it.
    pub fn complete_comment(
        &mut self,
        collection: &mut FeedCollection,
        call: &CommentCall,
        result: Result<Comment, FeedError>,
    ) -> Resolution {
        let mut out = Resolution::default();
        self.comments.remove(&call.mutation);

        let (changed, error) = match result {
            Ok(server) => {
                let changed = collection.confirm_comment(&call.post_id, &call.temp_id, &server);
                if let Some(confirmed) = self.confirmed.as_mut() {
                    let shown = collection
                        .get(&call.post_id)
                        .and_then(|p| p.comment(&call.temp_id).or_else(|| p.comment(&server.id)))
                        .cloned();
                    confirmed.comments.push(shown.unwrap_or(server));
                }
                (changed, None)
            }
            Err(err) => {
                warn!(post_id = %call.post_id, mutation = %call.mutation, error = %err, "comment failed, rolling back");
                (collection.remove_comment(&call.post_id, &call.temp_id), Some(err))
            }
        };
        if changed {
            push_unique(&mut out.touched, &call.post_id);
        }
        self.resolve(call.mutation, error, &mut out);
        out
    }

    // ── Posts ───────────────────────────────────────────────────────

    /// Insert a temporary post at the head of the collection.
    pub fn begin_create_post(
        &mut self,
        collection: &mut FeedCollection,
        author: &Author,
        draft: PostDraft,
        max_len: usize,
    ) -> Result<CreatePostCall, FeedError> {
        if draft.content.trim().is_empty() && draft.media.is_empty() {
            return Err(FeedError::Validation("post cannot be empty".into()));
        }
        if draft.content.chars().count() > max_len {
            return Err(FeedError::Validation(format!(
                "post exceeds {} characters",
                max_len
            )));
        }

        let mut temp = Post::new(local_id(), author.clone(), draft.content.clone());
        temp.media = draft.media.clone();
        collection.insert_head(temp.clone());

        let id = self.issue(MutationKind::CreatePost, &temp.id, &author.id);
        debug!(mutation = %id, temp_id = %temp.id, "post inserted optimistically");

        let call = CreatePostCall {
            mutation: id,
            temp_id: temp.id.clone(),
            draft,
        };
        self.posts.insert(id, temp);
        Ok(call)
    }

    /// Swap the temporary post for the server's, or evict it.
    pub fn complete_create_post(
        &mut self,
        collection: &mut FeedCollection,
        call: &CreatePostCall,
        result: Result<Post, FeedError>,
    ) -> Resolution {
        let mut out = Resolution::default();
        self.posts.remove(&call.mutation);

        let error = match result {
            Ok(server) => {
                let server_id = server.id.clone();
                if collection.replace_post(&call.temp_id, server) {
                    push_unique(&mut out.removed, &call.temp_id);
                    push_unique(&mut out.touched, &server_id);
                    out.replaced.push((call.temp_id.clone(), server_id.clone()));
                }
                if let (Some(confirmed), Some(post)) = (self.confirmed.as_mut(), collection.get(&server_id)) {
                    confirmed.posts.push(post.clone());
                }
                None
            }
            Err(err) => {
                warn!(mutation = %call.mutation, temp_id = %call.temp_id, error = %err, "post failed, evicting");
                if collection.evict(&call.temp_id).is_some() {
                    push_unique(&mut out.removed, &call.temp_id);
                }
                Some(err)
            }
        };
        self.resolve(call.mutation, error, &mut out);
        out
    }

    // ── Refresh and eviction ────────────────────────────────────────

    /// Start keeping the outcomes confirmed while a refresh is in flight.
    /// A newer refresh starts over: its page is requested after them.
    pub fn track_confirmations(&mut self) {
        self.confirmed = Some(Confirmed::default());
    }

    /// The refresh failed and will not replace the collection.
    pub fn stop_tracking(&mut self) {
        self.confirmed = None;
    }

    fn keep_confirmed_reaction(&mut self, post_id: &str, user_id: &str, server: &Post) {
        if let Some(confirmed) = self.confirmed.as_mut() {
            confirmed.reactions.insert(
                (post_id.to_string(), user_id.to_string()),
                ReactionSnapshot::of(server, user_id),
            );
        }
    }

    /// Re-apply, on top of a freshly replaced collection, the outcomes
    /// confirmed while the refresh was in flight and then every pending
    /// optimistic change. Returns the posts that changed.
    ///
    /// The fresh copy becomes the rollback target of in-flight reactions.
    pub fn reapply_pending(&mut self, collection: &mut FeedCollection) -> Vec<String> {
        let mut touched = Vec::new();

        if let Some(confirmed) = self.confirmed.take() {
            for post in confirmed.posts {
                let id = post.id.clone();
                if collection.insert_head(post) {
                    push_unique(&mut touched, &id);
                }
            }
            for ((post_id, user_id), snapshot) in confirmed.reactions {
                let patch = PostPatch::local_reaction(user_id, snapshot.reaction, snapshot.index);
                if collection.apply(&post_id, &patch) {
                    push_unique(&mut touched, &post_id);
                }
            }
            for comment in confirmed.comments {
                let post_id = comment.post_id.clone();
                if collection.apply(&post_id, &PostPatch::comments(vec![comment])) {
                    push_unique(&mut touched, &post_id);
                }
            }
        }

        for ((post_id, user_id), slot) in self.reactions.iter_mut() {
            let Some(post) = collection.get(post_id) else {
                continue;
            };
            slot.known_good = ReactionSnapshot::of(post, user_id);
            if apply_intent(collection, post_id, user_id, slot.desired) {
                push_unique(&mut touched, post_id);
            }
        }

        for comment in self.comments.values() {
            if collection.apply(&comment.post_id, &PostPatch::comments(vec![comment.clone()])) {
                push_unique(&mut touched, &comment.post_id);
            }
        }

        for post in self.posts.values() {
            if collection.insert_head(post.clone()) {
                push_unique(&mut touched, &post.id);
            }
        }

        if !touched.is_empty() {
            debug!(posts = touched.len(), "pending mutations re-applied");
        }
        touched
    }

    /// Stop re-applying pending changes to `post_id` after it was hidden.
    /// In-flight calls still resolve normally.
    pub fn discard_post(&mut self, post_id: &str) {
        self.comments.retain(|_, c| c.post_id != post_id);
        self.posts.retain(|_, p| p.id != post_id);
        if let Some(confirmed) = self.confirmed.as_mut() {
            confirmed.reactions.retain(|(id, _), _| id != post_id);
            confirmed.comments.retain(|c| c.post_id != post_id);
            confirmed.posts.retain(|p| p.id != post_id);
        }
    }
}
