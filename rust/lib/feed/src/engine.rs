use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::FeedApi;
use crate::boosted::BoostedSelector;
use crate::collection::FeedCollection;
use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::events::{FeedEvent, Notifier, Outbox, SubscriptionId};
use crate::handlers;
use crate::model::{Author, Post, PostDraft, ReactionKind};
use crate::mutation::{MutationController, MutationId, MutationKind, MutationRecord, MutationState, Resolution};
use crate::pagination::Pagination;
use crate::views::{ViewId, ViewState, ViewSynchronizer};

// ── State ───────────────────────────────────────────────────────────

/// Everything the engine owns, behind one lock.
pub(crate) struct FeedState {
    pub(crate) collection: FeedCollection,
    pub(crate) pagination: Pagination,
    pub(crate) boosted: BoostedSelector,
    pub(crate) mutations: MutationController,
    pub(crate) views: ViewSynchronizer,
    /// Hidden post ids, filtered out of later pages.
    pub(crate) hidden: HashSet<String>,
    next_seq: u64,
}

/// Events of one state change, numbered under the lock.
pub(crate) struct Batch {
    seq: u64,
    events: Vec<FeedEvent>,
}

impl FeedState {
    fn new(config: &FeedConfig) -> Self {
        Self {
            collection: FeedCollection::new(),
            pagination: Pagination::new(config.initial_page, config.page_size),
            boosted: BoostedSelector::new(config.boosted_seed),
            mutations: MutationController::new(config.mutation_history),
            views: ViewSynchronizer::new(),
            hidden: HashSet::new(),
            next_seq: 0,
        }
    }

    /// Number `events` for delivery. The batch must be emitted.
    pub(crate) fn batch(&mut self, events: Vec<FeedEvent>) -> Batch {
        let seq = self.next_seq;
        self.next_seq += 1;
        Batch { seq, events }
    }

    /// Propagate post changes to views and the boosted slot.
    pub(crate) fn settle(&mut self, touched: &[String], removed: &[String]) -> Vec<FeedEvent> {
        let mut events = Vec::new();
        for id in touched {
            let Some(post) = self.collection.get(id) else {
                continue;
            };
            events.push(FeedEvent::PostChanged { post: post.clone() });
            for view in self.views.sync(post) {
                self.push_view_event(view, &mut events);
            }
        }
        for id in removed {
            events.push(FeedEvent::PostRemoved { post_id: id.clone() });
        }
        self.refresh_boosted(&mut events);
        events
    }

    /// Re-sync every view and the boosted slot after a page landed.
    pub(crate) fn settle_collection(&mut self) -> Vec<FeedEvent> {
        let mut events = Vec::new();
        for view in self.views.sync_all(self.collection.posts()) {
            self.push_view_event(view, &mut events);
        }
        self.refresh_boosted(&mut events);
        events
    }

    /// Events for a completed mutation: post changes first, then outcomes.
    pub(crate) fn resolve(&mut self, resolution: Resolution) -> Vec<FeedEvent> {
        let mut events = Vec::new();
        for (temp_id, server_id) in &resolution.replaced {
            let Some(post) = self.collection.get(server_id) else {
                continue;
            };
            for view in self.views.repoint(temp_id, post) {
                self.push_view_event(view, &mut events);
            }
        }
        events.extend(self.settle(&resolution.touched, &resolution.removed));
        events.extend(resolution.resolved.into_iter().map(outcome_event));
        events
    }

    fn push_view_event(&self, view: ViewId, events: &mut Vec<FeedEvent>) {
        if let Some(state) = self.views.get(&view) {
            events.push(FeedEvent::ViewSynced {
                post_id: state.post.id.clone(),
                revision: state.revision,
                view,
            });
        }
    }

    fn refresh_boosted(&mut self, events: &mut Vec<FeedEvent>) {
        if self.boosted.refresh(self.collection.posts()) {
            let post_id = self.boosted.current().map(|p| p.id.clone());
            debug!(?post_id, "boosted slot changed");
            events.push(FeedEvent::BoostedChanged { post_id });
        }
    }
}

fn outcome_event(record: MutationRecord) -> FeedEvent {
    match record.error {
        Some(error) => FeedEvent::MutationFailed {
            mutation: record.id,
            kind: record.kind,
            post_id: record.post_id,
            error,
        },
        None => FeedEvent::MutationConfirmed {
            mutation: record.id,
            kind: record.kind,
            post_id: record.post_id,
        },
    }
}

/// State shared between the engine handle and its network tasks.
pub(crate) struct Shared {
    pub(crate) api: Arc<dyn FeedApi>,
    pub(crate) config: FeedConfig,
    pub(crate) viewer: Author,
    pub(crate) notifier: Notifier,
    outbox: Outbox,
    state: Mutex<FeedState>,
}

impl Shared {
    /// Lock the state. Never held across an `.await`.
    ///
    /// Every write leaves the state consistent, so a poisoned lock is
    /// still safe to use.
    pub(crate) fn lock(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver a batch. Call only after the lock is released; batches
    /// reach subscribers in the order they were numbered.
    pub(crate) fn emit(&self, batch: Batch) {
        self.outbox.deliver(batch.seq, batch.events, &self.notifier);
    }
}

// ── Dispatched ──────────────────────────────────────────────────────

/// Handle of a fire-and-forget action.
///
/// The optimistic part has already happened when the action returns.
/// Dropping the handle does not cancel the network task.
#[derive(Debug)]
pub struct Dispatched {
    mutation: Option<MutationId>,
    task: Option<JoinHandle<()>>,
}

impl Dispatched {
    fn none() -> Self {
        Self {
            mutation: None,
            task: None,
        }
    }

    /// The mutation issued, if the action was one and was accepted.
    pub fn mutation(&self) -> Option<MutationId> {
        self.mutation
    }

    /// Whether a network task was started.
    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Wait for the network task, including any follow-up calls it makes.
    ///
    /// A reaction queued behind an in-flight one has no task of its own;
    /// it resolves when the in-flight task does.
    pub async fn settled(self) {
        if let Some(task) = self.task {
            if let Err(err) = task.await {
                warn!(error = %err, "feed task ended abnormally");
            }
        }
    }
}

// ── FeedEngine ──────────────────────────────────────────────────────

/// The feed synchronization engine.
///
/// Owns the canonical collection and exposes the presentation surface:
/// read snapshots, fire-and-forget actions, dependent views and change
/// subscriptions. Cloning yields another handle to the same engine.
///
/// Actions spawn their network calls with `tokio::spawn` and must be
/// called from within a Tokio runtime.
#[derive(Clone)]
pub struct FeedEngine {
    shared: Arc<Shared>,
}

impl FeedEngine {
    pub fn new(api: Arc<dyn FeedApi>, viewer: Author, config: FeedConfig) -> Self {
        let state = FeedState::new(&config);
        Self {
            shared: Arc::new(Shared {
                api,
                config,
                viewer,
                notifier: Notifier::new(),
                outbox: Outbox::new(),
                state: Mutex::new(state),
            }),
        }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.shared.config
    }

    pub fn viewer(&self) -> &Author {
        &self.shared.viewer
    }

    // ====================================================================
    // Reads
    // ====================================================================

    /// Read-only snapshot of the canonical collection.
    pub fn get_collection(&self) -> Vec<Post> {
        self.shared.lock().collection.snapshot()
    }

    pub fn get_post(&self, id: &str) -> Option<Post> {
        self.shared.lock().collection.get(id).cloned()
    }

    pub fn get_boosted_post(&self) -> Option<Post> {
        self.shared.lock().boosted.current().cloned()
    }

    pub fn has_more(&self) -> bool {
        self.shared.lock().pagination.has_more()
    }

    pub fn is_loading(&self) -> bool {
        self.shared.lock().pagination.is_loading()
    }

    // ====================================================================
    // Actions
    // ====================================================================

    /// Toggle `kind` on `post_id` as the viewer.
    pub fn react(&self, post_id: &str, kind: ReactionKind) -> Dispatched {
        let user_id = self.shared.viewer.id.clone();
        let (outcome, events) = {
            let mut guard = self.shared.lock();
            let state = &mut *guard;
            match state
                .mutations
                .begin_reaction(&mut state.collection, post_id, &user_id, kind)
            {
                Ok((id, call)) => {
                    let events = state.settle(&[post_id.to_string()], &[]);
                    (Ok((id, call)), state.batch(events))
                }
                Err(err) => {
                    let event = rejected(MutationKind::Reaction, Some(post_id), &err);
                    (Err(err), state.batch(vec![event]))
                }
            }
        };
        self.shared.emit(events);

        match outcome {
            Ok((mutation, call)) => Dispatched {
                mutation: Some(mutation),
                task: call.map(|call| tokio::spawn(handlers::run_reaction(Arc::clone(&self.shared), call))),
            },
            Err(_) => Dispatched::none(),
        }
    }

    /// Append a comment by the viewer to `post_id`.
    pub fn comment(&self, post_id: &str, content: &str) -> Dispatched {
        let user_id = self.shared.viewer.id.clone();
        let max_len = self.shared.config.max_comment_len;
        let (outcome, events) = {
            let mut guard = self.shared.lock();
            let state = &mut *guard;
            match state
                .mutations
                .begin_comment(&mut state.collection, post_id, &user_id, content, max_len)
            {
                Ok(call) => {
                    let events = state.settle(&[post_id.to_string()], &[]);
                    (Some(call), state.batch(events))
                }
                Err(err) => {
                    let event = rejected(MutationKind::Comment, Some(post_id), &err);
                    (None, state.batch(vec![event]))
                }
            }
        };
        self.shared.emit(events);

        match outcome {
            Some(call) => Dispatched {
                mutation: Some(call.mutation),
                task: Some(tokio::spawn(handlers::run_comment(Arc::clone(&self.shared), call))),
            },
            None => Dispatched::none(),
        }
    }

    /// Publish a post as the viewer. It shows at the head of the feed at once.
    pub fn create_post(&self, draft: PostDraft) -> Dispatched {
        let max_len = self.shared.config.max_post_len;
        let (outcome, events) = {
            let mut guard = self.shared.lock();
            let state = &mut *guard;
            match state.mutations.begin_create_post(
                &mut state.collection,
                &self.shared.viewer,
                draft,
                max_len,
            ) {
                Ok(call) => {
                    let events = state.settle(std::slice::from_ref(&call.temp_id), &[]);
                    (Some(call), state.batch(events))
                }
                Err(err) => {
                    let event = rejected(MutationKind::CreatePost, None, &err);
                    (None, state.batch(vec![event]))
                }
            }
        };
        self.shared.emit(events);

        match outcome {
            Some(call) => Dispatched {
                mutation: Some(call.mutation),
                task: Some(tokio::spawn(handlers::run_create_post(
                    Arc::clone(&self.shared),
                    call,
                ))),
            },
            None => Dispatched::none(),
        }
    }

    /// Fetch the next page. A no-op while a fetch runs or once the feed is
    /// exhausted.
    pub fn load_more(&self) -> Dispatched {
        let request = self.shared.lock().pagination.start_next();
        match request {
            Some(request) => {
                info!(page = request.cursor.page, "loading page");
                Dispatched {
                    mutation: None,
                    task: Some(tokio::spawn(handlers::run_page(Arc::clone(&self.shared), request))),
                }
            }
            None => {
                debug!("load_more skipped: loading or exhausted");
                Dispatched::none()
            }
        }
    }

    /// Reload from the first page and replace the collection. A page still
    /// in flight from before is discarded when it lands.
    pub fn refresh(&self) -> Dispatched {
        let request = {
            let mut state = self.shared.lock();
            state.mutations.track_confirmations();
            state.pagination.start_reset()
        };
        info!(page = request.cursor.page, "refreshing feed");
        Dispatched {
            mutation: None,
            task: Some(tokio::spawn(handlers::run_page(Arc::clone(&self.shared), request))),
        }
    }

    /// Evict `post_id` from the feed and keep it out of later pages. Ids
    /// not in the feed are ignored.
    pub fn hide_post(&self, post_id: &str) -> bool {
        let events = {
            let mut guard = self.shared.lock();
            let state = &mut *guard;
            if state.collection.evict(post_id).is_none() {
                return false;
            }
            state.hidden.insert(post_id.to_string());
            state.mutations.discard_post(post_id);
            info!(post_id, "post hidden");
            let events = state.settle(&[], &[post_id.to_string()]);
            state.batch(events)
        };
        self.shared.emit(events);
        true
    }

    // ====================================================================
    // Mutations
    // ====================================================================

    pub fn mutation_state(&self, id: MutationId) -> MutationState {
        self.shared.lock().mutations.state(id)
    }

    pub fn mutation(&self, id: MutationId) -> Option<MutationRecord> {
        self.shared.lock().mutations.record(id).cloned()
    }

    /// Return a confirmed or failed mutation to `Idle`.
    pub fn acknowledge(&self, id: MutationId) -> bool {
        self.shared.lock().mutations.acknowledge(id)
    }

    pub fn pending_mutations(&self) -> usize {
        self.shared.lock().mutations.pending_count()
    }

    // ====================================================================
    // Views
    // ====================================================================

    /// Show the canonical copy of `post_id` in `view`.
    pub fn open_view(&self, view: impl Into<ViewId>, post_id: &str) -> Result<ViewState, FeedError> {
        let mut guard = self.shared.lock();
        let state = &mut *guard;
        let post = state
            .collection
            .get(post_id)
            .cloned()
            .ok_or_else(|| FeedError::PostNotFound(post_id.to_string()))?;
        Ok(state.views.open(view.into(), post).clone())
    }

    pub fn close_view(&self, view: &ViewId) -> bool {
        self.shared.lock().views.close(view).is_some()
    }

    pub fn view(&self, view: &ViewId) -> Option<ViewState> {
        self.shared.lock().views.get(view).cloned()
    }

    // ====================================================================
    // Subscriptions
    // ====================================================================

    /// Subscribe to events whose topic matches `pattern` (`+` and `#`
    /// wildcards). Handlers run outside the state lock and see events in
    /// the order the state changed, on any runtime flavor.
    pub fn subscribe<F>(&self, pattern: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&FeedEvent) + Send + Sync + 'static,
    {
        self.shared.notifier.subscribe(pattern, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.notifier.unsubscribe(id)
    }
}

fn rejected(kind: MutationKind, post_id: Option<&str>, err: &FeedError) -> FeedEvent {
    warn!(%kind, ?post_id, error = %err, "action rejected");
    FeedEvent::ActionRejected {
        kind,
        post_id: post_id.map(str::to_string),
        error: err.clone(),
    }
}
