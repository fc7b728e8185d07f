//! Feedsync golden app: an in-memory social feed driving the engine.
//!
//! Structure:
//! - `server`: in-memory backend implementing `FeedApi`, with gates,
//!   faults and other-user activity for tests
//! - `seed`: users and posts (some boosted)
//! - `tests/`: end-to-end engine scenarios

pub mod seed;
pub mod server;

pub use server::MemoryBackend;
