//! Page merging and the pagination cursor.

use std::collections::HashSet;

use crate::model::Post;

/// Result of appending a fetched page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageMerge {
    pub merged: Vec<Post>,
    pub has_more: bool,
    /// Posts from the page that were new.
    pub added: usize,
    /// Posts from the page dropped because their id was already present.
    pub dropped: usize,
}

/// Append `incoming` to `existing`, dropping any post whose id is already
/// present. Existing entries win; order is never changed.
///
/// `source_has_more` is the server's explicit exhaustion flag. When it is
/// missing only an empty page ends the feed; a short page does not.
pub fn append_page(existing: Vec<Post>, incoming: Vec<Post>, source_has_more: Option<bool>) -> PageMerge {
    let has_more = has_more(incoming.len(), source_has_more);
    let mut seen: HashSet<String> = existing.iter().map(|p| p.id.clone()).collect();
    let mut merged = existing;
    let mut added = 0;
    let mut dropped = 0;

    for post in incoming {
        if seen.insert(post.id.clone()) {
            merged.push(post);
            added += 1;
        } else {
            dropped += 1;
        }
    }

    PageMerge {
        merged,
        has_more,
        added,
        dropped,
    }
}

/// Whether more pages exist after one that returned `incoming_len` posts.
pub fn has_more(incoming_len: usize, source_has_more: Option<bool>) -> bool {
    incoming_len > 0 && source_has_more.unwrap_or(true)
}

/// Position of one page request: 1-based `page` of `page_size` posts
/// (the base is whatever `initial_page` is configured to).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub page: u32,
    pub page_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Append the page to the collection.
    Append,
    /// Replace the collection with the page.
    Reset,
}

/// A page fetch handed out by [`Pagination`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub cursor: PageCursor,
    pub mode: FetchMode,
    generation: u64,
}

/// Cursor state of the feed.
///
/// At most one fetch is outstanding. A reset starts a new generation so
/// that a page requested before it is recognised as stale when it lands.
#[derive(Debug, Clone)]
pub struct Pagination {
    initial_page: u32,
    page_size: u32,
    next_page: u32,
    has_more: bool,
    loading: bool,
    generation: u64,
}

impl Pagination {
    pub fn new(initial_page: u32, page_size: u32) -> Self {
        Self {
            initial_page,
            page_size,
            next_page: initial_page,
            has_more: true,
            loading: false,
            generation: 0,
        }
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// The page the next `start_next` would request.
    pub fn next_page(&self) -> u32 {
        self.next_page
    }

    /// Claim the next page. `None` while a fetch is running or once the
    /// feed is exhausted.
    pub fn start_next(&mut self) -> Option<PageRequest> {
        if self.loading || !self.has_more {
            return None;
        }
        self.loading = true;
        Some(PageRequest {
            cursor: PageCursor {
                page: self.next_page,
                page_size: self.page_size,
            },
            mode: FetchMode::Append,
            generation: self.generation,
        })
    }

    /// Restart from the initial page. Any fetch in flight becomes stale.
    pub fn start_reset(&mut self) -> PageRequest {
        self.generation += 1;
        self.loading = true;
        PageRequest {
            cursor: PageCursor {
                page: self.initial_page,
                page_size: self.page_size,
            },
            mode: FetchMode::Reset,
            generation: self.generation,
        }
    }

    /// Whether `request` still belongs to the current generation.
    pub fn is_current(&self, request: &PageRequest) -> bool {
        request.generation == self.generation
    }

    /// Record a successful fetch. Stale requests are ignored.
    pub fn complete(&mut self, request: &PageRequest, has_more: bool) -> bool {
        if !self.is_current(request) {
            return false;
        }
        self.next_page = request.cursor.page + 1;
        self.has_more = has_more;
        self.loading = false;
        true
    }

    /// Record a failed fetch. The cursor stays put so the page can be retried.
    pub fn abort(&mut self, request: &PageRequest) -> bool {
        if !self.is_current(request) {
            return false;
        }
        self.loading = false;
        true
    }
}
