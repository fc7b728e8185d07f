//! Boosted post selection.
//!
//! One boosted post is promoted at a time. The pick is random at first
//! exposure and then sticky: it only changes when the chosen post leaves
//! the eligible set, never because the collection was re-fetched.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::model::Post;

/// Posts eligible for promotion, in collection order.
pub fn eligible(collection: &[Post]) -> Vec<&Post> {
    collection.iter().filter(|p| p.is_boosted).collect()
}

/// Pick the promoted post for `collection`.
///
/// - `previous` still eligible and unchanged: returned as is.
/// - `previous` still eligible but its reaction or comment count changed:
///   the collection's current copy of the same post.
/// - otherwise: a uniform draw from the eligible set, or `None`.
pub fn select<R: Rng + ?Sized>(collection: &[Post], previous: Option<&Post>, rng: &mut R) -> Option<Post> {
    let candidates = eligible(collection);

    if let Some(previous) = previous {
        if let Some(current) = candidates.iter().find(|p| p.id == previous.id) {
            if engagement_changed(previous, current) {
                return Some((*current).clone());
            }
            return Some(previous.clone());
        }
    }

    candidates.choose(rng).map(|p| (*p).clone())
}

/// Reaction or comment counts differ between two copies of the same post.
fn engagement_changed(before: &Post, after: &Post) -> bool {
    before.reactions.len() != after.reactions.len() || before.comments.len() != after.comments.len()
}

/// Stateful selector: owns the RNG and the current pick.
#[derive(Debug)]
pub struct BoostedSelector {
    rng: StdRng,
    current: Option<Post>,
}

impl BoostedSelector {
    /// `seed` makes draws reproducible; `None` seeds from OS entropy.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng, current: None }
    }

    pub fn current(&self) -> Option<&Post> {
        self.current.as_ref()
    }

    /// Re-validate the pick against `collection`.
    ///
    /// Returns `true` when the promoted slot changed (different post or
    /// refreshed data).
    pub fn refresh(&mut self, collection: &[Post]) -> bool {
        let next = select(collection, self.current.as_ref(), &mut self.rng);
        let changed = next != self.current;
        self.current = next;
        changed
    }
}
