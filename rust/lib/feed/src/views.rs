//! Dependent views: secondary copies of canonical posts (detail modal,
//! profile panel) kept in step with the canonical collection.
//!
//! The canonical collection is always the source of truth. A view only
//! ever receives copies; writing into one is not a way to change a post.

use std::collections::BTreeMap;
use std::fmt;

use crate::model::Post;

/// Name of an open view, e.g. `"detail"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ViewId(String);

impl ViewId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ViewId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ViewId {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// What one view is currently showing.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub post: Post,
    /// Bumped every time the view receives a different copy.
    pub revision: u64,
}

/// Mirror `canonical` into every view showing the same post.
///
/// Views whose copy is already identical are left alone, so mirroring a
/// change back into the view it came from does not count as a second
/// update. Returns the views that changed.
pub fn sync(canonical: &Post, views: &mut BTreeMap<ViewId, ViewState>) -> Vec<ViewId> {
    let mut updated = Vec::new();
    for (view, state) in views.iter_mut() {
        if state.post.id != canonical.id || state.post == *canonical {
            continue;
        }
        state.post = canonical.clone();
        state.revision += 1;
        updated.push(view.clone());
    }
    updated
}

/// Registry of open views.
#[derive(Debug, Default)]
pub struct ViewSynchronizer {
    views: BTreeMap<ViewId, ViewState>,
}

impl ViewSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Show `post` in `view`, replacing whatever it showed before.
    pub fn open(&mut self, view: ViewId, post: Post) -> &ViewState {
        self.views
            .entry(view)
            .and_modify(|state| {
                if state.post != post {
                    state.post = post.clone();
                    state.revision += 1;
                }
            })
            .or_insert_with(|| ViewState {
                post: post.clone(),
                revision: 0,
            })
    }

    pub fn close(&mut self, view: &ViewId) -> Option<ViewState> {
        self.views.remove(view)
    }

    pub fn get(&self, view: &ViewId) -> Option<&ViewState> {
        self.views.get(view)
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Views currently showing `post_id`.
    pub fn showing(&self, post_id: &str) -> Vec<ViewId> {
        self.views
            .iter()
            .filter(|(_, state)| state.post.id == post_id)
            .map(|(view, _)| view.clone())
            .collect()
    }

    /// Mirror one canonical post. See [`sync`].
    pub fn sync(&mut self, canonical: &Post) -> Vec<ViewId> {
        sync(canonical, &mut self.views)
    }

    /// Mirror every post of a freshly replaced collection. Views whose post
    /// is no longer present keep their last copy.
    pub fn sync_all(&mut self, collection: &[Post]) -> Vec<ViewId> {
        let mut updated = Vec::new();
        for post in collection {
            updated.extend(sync(post, &mut self.views));
        }
        updated
    }

    /// Move views showing `old_id` onto `post`, which replaced it under a
    /// new id (a temporary post swapped for the server's).
    pub fn repoint(&mut self, old_id: &str, post: &Post) -> Vec<ViewId> {
        let mut updated = Vec::new();
        for (view, state) in self.views.iter_mut() {
            if state.post.id == old_id && state.post != *post {
                state.post = post.clone();
                state.revision += 1;
                updated.push(view.clone());
            }
        }
        updated
    }
}
