//! Feedsync: client-side feed synchronization engine.
//!
//! Keeps one in-memory collection of posts consistent across incremental
//! pagination, several open views of the same post, and optimistic local
//! mutations that are confirmed or rolled back by the server.
//!
//! # Components
//!
//! - [`reconcile`]: merges partial post updates without losing concurrent data
//! - [`mutation`]: optimistic reactions, comments and posts with rollback
//! - [`pagination`]: page merging with dedup and the pagination cursor
//! - [`boosted`]: sticky random pick of one promoted post
//! - [`views`]: mirrors canonical posts into dependent views
//! - [`engine`]: the [`FeedEngine`] facade tying them together
//!
//! # Topics
//!
//! Every state change is announced as a [`FeedEvent`] on a slash-separated
//! topic, matched with MQTT-style wildcards:
//! - `feed/reset`, `feed/page`, `feed/page/failed`
//! - `posts/{id}`, `posts/{id}/removed`
//! - `boosted`, `views/{view}`
//! - `mutations/{kind}/confirmed|failed|rejected`
//!
//! # Example
//!
//! ```ignore
//! use feedsync::{FeedEngine, FeedConfig, ReactionKind};
//!
//! let engine = FeedEngine::new(api, viewer, FeedConfig::default());
//!
//! engine.subscribe("mutations/+/failed", |event| {
//!     eprintln!("rolled back: {:?}", event);
//! });
//!
//! engine.load_more().settled().await;
//! engine.react("p1", ReactionKind::Like);
//! let posts = engine.get_collection();
//! ```

pub mod api;
pub mod boosted;
pub mod collection;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
mod handlers;
pub mod model;
pub mod mutation;
pub mod pagination;
pub mod reconcile;
pub mod views;

// Re-export primary types at crate root.
pub use api::{FeedApi, FetchedPage, PageCursor};
pub use boosted::BoostedSelector;
pub use collection::FeedCollection;
pub use config::FeedConfig;
pub use engine::{Dispatched, FeedEngine};
pub use error::{ApiError, FeedError};
pub use events::{FeedEvent, SubscriptionId};
pub use model::{Author, Comment, Media, MediaKind, Post, PostDraft, Reaction, ReactionKind};
pub use mutation::{MutationId, MutationKind, MutationRecord, MutationState};
pub use reconcile::PostPatch;
pub use views::{ViewId, ViewState};
