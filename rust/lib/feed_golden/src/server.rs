//! In-memory feed server.
//!
//! Implements [`FeedApi`] over a plain post list (newest first) so the
//! engine can be driven end to end without a network. Tests steer it with:
//!
//! - gates: hold responses of one call type until released, to force
//!   out-of-order completion
//! - page delivery: take a page snapshot at once but deliver it only when
//!   released, so it arrives older than calls that completed meanwhile
//! - faults: fail the next N calls of one type
//! - injection: act as other users between the engine's calls

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::debug;

use feedsync::{
    ApiError, Author, Comment, FeedApi, FetchedPage, PageCursor, Post, PostDraft, Reaction,
    ReactionKind,
};

// ── Gates and faults ────────────────────────────────────────────────

/// Holds calls until permits are released. Open by default.
#[derive(Default)]
struct Gate {
    semaphore: Mutex<Option<Arc<Semaphore>>>,
}

impl Gate {
    fn close(&self) {
        *lock(&self.semaphore) = Some(Arc::new(Semaphore::new(0)));
    }

    fn release(&self, n: usize) {
        if let Some(semaphore) = lock(&self.semaphore).as_ref() {
            semaphore.add_permits(n);
        }
    }

    /// Let every waiting and future call through.
    fn open(&self) {
        if let Some(semaphore) = lock(&self.semaphore).take() {
            semaphore.close();
        }
    }

    async fn pass(&self) {
        let semaphore = lock(&self.semaphore).clone();
        if let Some(semaphore) = semaphore {
            // A closed semaphore means the gate was opened.
            if let Ok(permit) = semaphore.acquire().await {
                permit.forget();
            }
        }
    }
}

/// Fails the next `n` calls.
#[derive(Default)]
struct Fault {
    remaining: AtomicUsize,
}

impl Fault {
    fn arm(&self, n: usize) {
        self.remaining.store(n, Ordering::SeqCst);
    }

    fn trip(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// Gate, fault and call counter for one call type.
#[derive(Default)]
struct Endpoint {
    gate: Gate,
    fault: Fault,
    calls: AtomicUsize,
}

impl Endpoint {
    /// Count the call, wait at the gate, then decide whether it fails.
    async fn enter(&self, what: &str) -> Result<(), ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.pass().await;
        if self.fault.trip() {
            debug!(what, "injected failure");
            return Err(ApiError::Network(format!("injected {} failure", what)));
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── MemoryBackend ───────────────────────────────────────────────────

struct Data {
    /// Newest first.
    posts: Vec<Post>,
    next_id: u64,
}

impl Data {
    fn next_id(&mut self, prefix: &str) -> String {
        let id = format!("{}{}", prefix, self.next_id);
        self.next_id += 1;
        id
    }

    fn post_mut(&mut self, post_id: &str) -> Result<&mut Post, ApiError> {
        self.posts
            .iter_mut()
            .find(|p| p.id == post_id)
            .ok_or_else(|| ApiError::Server {
                status: 404,
                message: format!("post '{}' not found", post_id),
            })
    }

    /// Toggle `kind` for `user_id`: same type removes, another replaces in
    /// place, none adds at the end.
    fn toggle(&mut self, post_id: &str, user_id: &str, kind: ReactionKind) -> Result<Post, ApiError> {
        let id = self.next_id("r");
        let post = self.post_mut(post_id)?;
        match post.reactions.iter().position(|r| r.user_id == user_id) {
            Some(index) if post.reactions[index].kind == kind => {
                post.reactions.remove(index);
            }
            Some(index) => post.reactions[index].kind = kind,
            None => post.reactions.push(Reaction::new(id, kind, user_id, post_id)),
        }
        Ok(post.clone())
    }

    fn comment(&mut self, post_id: &str, user_id: &str, content: &str) -> Result<Comment, ApiError> {
        let id = self.next_id("c");
        let post = self.post_mut(post_id)?;
        let comment = Comment {
            id,
            content: content.to_string(),
            user_id: user_id.to_string(),
            post_id: post_id.to_string(),
            created_at: Utc::now(),
            server_id: None,
        };
        post.comments.push(comment.clone());
        Ok(comment)
    }
}

/// In-memory [`FeedApi`] acting for one signed-in viewer.
pub struct MemoryBackend {
    viewer: Author,
    data: Mutex<Data>,
    first_page: AtomicUsize,
    report_has_more: AtomicBool,
    reactions: Endpoint,
    comments: Endpoint,
    pages: Endpoint,
    posts: Endpoint,
    page_delivery: Gate,
}

impl MemoryBackend {
    /// `posts` newest first.
    pub fn new(viewer: Author, posts: Vec<Post>) -> Self {
        Self {
            viewer,
            data: Mutex::new(Data {
                posts,
                next_id: 1000,
            }),
            first_page: AtomicUsize::new(1),
            report_has_more: AtomicBool::new(true),
            reactions: Endpoint::default(),
            comments: Endpoint::default(),
            pages: Endpoint::default(),
            posts: Endpoint::default(),
            page_delivery: Gate::default(),
        }
    }

    pub fn viewer(&self) -> &Author {
        &self.viewer
    }

    /// Page number of the first page (default 1).
    pub fn set_first_page(&self, page: u32) {
        self.first_page.store(page as usize, Ordering::SeqCst);
    }

    /// When off, pages leave `has_more` unset.
    pub fn set_report_has_more(&self, report: bool) {
        self.report_has_more.store(report, Ordering::SeqCst);
    }

    // ====================================================================
    // Inspection
    // ====================================================================

    pub fn post(&self, id: &str) -> Option<Post> {
        lock(&self.data).posts.iter().find(|p| p.id == id).cloned()
    }

    pub fn post_count(&self) -> usize {
        lock(&self.data).posts.len()
    }

    pub fn reaction_calls(&self) -> usize {
        self.reactions.calls.load(Ordering::SeqCst)
    }

    pub fn comment_calls(&self) -> usize {
        self.comments.calls.load(Ordering::SeqCst)
    }

    pub fn page_calls(&self) -> usize {
        self.pages.calls.load(Ordering::SeqCst)
    }

    pub fn post_calls(&self) -> usize {
        self.posts.calls.load(Ordering::SeqCst)
    }

    // ====================================================================
    // Other users
    // ====================================================================

    pub fn react_as(&self, user_id: &str, post_id: &str, kind: ReactionKind) -> Option<Post> {
        lock(&self.data).toggle(post_id, user_id, kind).ok()
    }

    pub fn comment_as(&self, user_id: &str, post_id: &str, content: &str) -> Option<Comment> {
        lock(&self.data).comment(post_id, user_id, content).ok()
    }

    /// Publish a post at the head of the feed.
    pub fn insert_post(&self, post: Post) {
        lock(&self.data).posts.insert(0, post);
    }

    pub fn remove_post(&self, id: &str) -> Option<Post> {
        let mut data = lock(&self.data);
        let index = data.posts.iter().position(|p| p.id == id)?;
        Some(data.posts.remove(index))
    }

    // ====================================================================
    // Faults
    // ====================================================================

    pub fn fail_reactions(&self, n: usize) {
        self.reactions.fault.arm(n);
    }

    pub fn fail_comments(&self, n: usize) {
        self.comments.fault.arm(n);
    }

    pub fn fail_pages(&self, n: usize) {
        self.pages.fault.arm(n);
    }

    pub fn fail_posts(&self, n: usize) {
        self.posts.fault.arm(n);
    }

    // ====================================================================
    // Gates
    // ====================================================================

    pub fn gate_reactions(&self) {
        self.reactions.gate.close();
    }

    pub fn release_reactions(&self, n: usize) {
        self.reactions.gate.release(n);
    }

    pub fn open_reactions(&self) {
        self.reactions.gate.open();
    }

    pub fn gate_comments(&self) {
        self.comments.gate.close();
    }

    pub fn release_comments(&self, n: usize) {
        self.comments.gate.release(n);
    }

    pub fn open_comments(&self) {
        self.comments.gate.open();
    }

    pub fn gate_pages(&self) {
        self.pages.gate.close();
    }

    pub fn release_pages(&self, n: usize) {
        self.pages.gate.release(n);
    }

    pub fn open_pages(&self) {
        self.pages.gate.open();
    }

    /// Pages are sliced when requested and held until released.
    pub fn hold_page_delivery(&self) {
        self.page_delivery.close();
    }

    pub fn release_page_delivery(&self, n: usize) {
        self.page_delivery.release(n);
    }

    pub fn open_page_delivery(&self) {
        self.page_delivery.open();
    }
}

#[async_trait::async_trait]
impl FeedApi for MemoryBackend {
    async fn fetch_page(&self, cursor: PageCursor) -> Result<FetchedPage, ApiError> {
        self.pages.enter("page").await?;

        let first = self.first_page.load(Ordering::SeqCst);
        let index = (cursor.page as usize).checked_sub(first).ok_or_else(|| ApiError::Server {
            status: 400,
            message: format!("page {} before first page {}", cursor.page, first),
        })?;
        let size = cursor.page_size as usize;

        let page = {
            let data = lock(&self.data);
            let start = (index * size).min(data.posts.len());
            let end = (start + size).min(data.posts.len());
            let has_more = self
                .report_has_more
                .load(Ordering::SeqCst)
                .then_some(end < data.posts.len());
            FetchedPage {
                posts: data.posts[start..end].to_vec(),
                has_more,
            }
        };
        self.page_delivery.pass().await;

        debug!(page = cursor.page, returned = page.posts.len(), has_more = ?page.has_more, "served page");
        Ok(page)
    }

    async fn submit_reaction(&self, post_id: &str, kind: ReactionKind) -> Result<Post, ApiError> {
        self.reactions.enter("reaction").await?;
        lock(&self.data).toggle(post_id, &self.viewer.id, kind)
    }

    async fn submit_comment(&self, post_id: &str, content: &str) -> Result<Comment, ApiError> {
        self.comments.enter("comment").await?;
        lock(&self.data).comment(post_id, &self.viewer.id, content)
    }

    async fn create_post(&self, draft: &PostDraft) -> Result<Post, ApiError> {
        self.posts.enter("post").await?;
        let mut data = lock(&self.data);
        let mut post = Post::new(data.next_id("p"), self.viewer.clone(), draft.content.clone());
        post.media = draft.media.clone();
        data.posts.insert(0, post.clone());
        Ok(post)
    }
}
