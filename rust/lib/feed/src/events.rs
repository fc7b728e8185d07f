use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::error::FeedError;
use crate::model::Post;
use crate::mutation::{MutationId, MutationKind};
use crate::views::ViewId;

/// Change notification emitted after every state transition.
///
/// Each event has a slash-separated topic (see [`FeedEvent::topic`]);
/// subscribers pick events with MQTT-style patterns.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// The collection was replaced by a refresh. `feed/reset`
    Reset { count: usize },
    /// A page was appended. `feed/page`
    PageAppended { page: u32, added: usize, has_more: bool },
    /// A page fetch failed; the cursor did not move. `feed/page/failed`
    PageFailed { page: u32, error: FeedError },
    /// The canonical copy of a post changed. `posts/{id}`
    PostChanged { post: Post },
    /// A post left the collection. `posts/{id}/removed`
    PostRemoved { post_id: String },
    /// The promoted slot changed. `boosted`
    BoostedChanged { post_id: Option<String> },
    /// A dependent view received a new copy. `views/{view}`
    ViewSynced {
        view: ViewId,
        post_id: String,
        revision: u64,
    },
    /// `mutations/{kind}/confirmed`
    MutationConfirmed {
        mutation: MutationId,
        kind: MutationKind,
        post_id: String,
    },
    /// The mutation was rolled back. `mutations/{kind}/failed`
    MutationFailed {
        mutation: MutationId,
        kind: MutationKind,
        post_id: String,
        error: FeedError,
    },
    /// Refused before anything was applied. `mutations/{kind}/rejected`
    ActionRejected {
        kind: MutationKind,
        post_id: Option<String>,
        error: FeedError,
    },
}

impl FeedEvent {
    pub fn topic(&self) -> String {
        match self {
            FeedEvent::Reset { .. } => "feed/reset".to_string(),
            FeedEvent::PageAppended { .. } => "feed/page".to_string(),
            FeedEvent::PageFailed { .. } => "feed/page/failed".to_string(),
            FeedEvent::PostChanged { post } => format!("posts/{}", post.id),
            FeedEvent::PostRemoved { post_id } => format!("posts/{}/removed", post_id),
            FeedEvent::BoostedChanged { .. } => "boosted".to_string(),
            FeedEvent::ViewSynced { view, .. } => format!("views/{}", view),
            FeedEvent::MutationConfirmed { kind, .. } => format!("mutations/{}/confirmed", kind),
            FeedEvent::MutationFailed { kind, .. } => format!("mutations/{}/failed", kind),
            FeedEvent::ActionRejected { kind, .. } => format!("mutations/{}/rejected", kind),
        }
    }
}

/// Match `topic` against a subscription pattern.
///
/// - `+` matches exactly one level.
/// - `#` matches the remaining levels, including none. Only valid last.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut levels = topic.split('/');
    for segment in pattern.split('/') {
        if segment == "#" {
            return true;
        }
        match levels.next() {
            Some(level) if segment == "+" || segment == level => {}
            _ => return false,
        }
    }
    levels.next().is_none()
}

/// Callback invoked for each matching event.
pub type EventHandler = Arc<dyn Fn(&FeedEvent) + Send + Sync>;

/// Handle returned by [`Notifier::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone)]
struct HandlerEntry {
    id: SubscriptionId,
    pattern: String,
    handler: EventHandler,
}

/// Pattern-routed event fan-out.
///
/// Handlers run synchronously on the notifying thread, outside the
/// engine's state lock, so they may read the engine back.
pub struct Notifier {
    handlers: RwLock<Vec<HandlerEntry>>,
    next_id: AtomicU64,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe<F>(&self, pattern: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&FeedEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = HandlerEntry {
            id,
            pattern: pattern.to_string(),
            handler: Arc::new(handler),
        };
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        let before = handlers.len();
        handlers.retain(|entry| entry.id != id);
        handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every handler whose pattern matches its topic.
    pub fn notify(&self, event: &FeedEvent) {
        let topic = event.topic();
        // Collect first so handlers can (un)subscribe without deadlocking.
        let matching: Vec<EventHandler> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|entry| topic_matches(&entry.pattern, &topic))
            .map(|entry| Arc::clone(&entry.handler))
            .collect();
        for handler in matching {
            handler(event);
        }
    }

    pub fn notify_all(&self, events: &[FeedEvent]) {
        for event in events {
            self.notify(event);
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct OutboxQueue {
    next: u64,
    pending: BTreeMap<u64, Vec<FeedEvent>>,
    draining: bool,
}

/// Delivers event batches in sequence-number order, whichever thread
/// emits them.
///
/// Sequence numbers are taken under the engine's state lock, so batch
/// order is state-change order. Delivery happens outside every lock: the
/// caller that finds the outbox idle drains all in-order batches,
/// including those queued meanwhile by other threads or by handlers.
#[derive(Default)]
pub struct Outbox {
    queue: Mutex<OutboxQueue>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue batch `seq` and deliver everything now in order. Every
    /// sequence number taken must be delivered, even with no events.
    pub fn deliver(&self, seq: u64, events: Vec<FeedEvent>, notifier: &Notifier) {
        let mut queue = self.lock();
        queue.pending.insert(seq, events);
        if queue.draining {
            return;
        }
        queue.draining = true;
        loop {
            let next = queue.next;
            let Some(batch) = queue.pending.remove(&next) else {
                queue.draining = false;
                return;
            };
            queue.next += 1;
            drop(queue);
            notifier.notify_all(&batch);
            queue = self.lock();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OutboxQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
