//! Network completions. Each handler awaits one collaborator call with the
//! state lock released, then applies the result under the lock and emits
//! the resulting events.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::engine::Shared;
use crate::error::FeedError;
use crate::events::FeedEvent;
use crate::model::Post;
use crate::mutation::{CommentCall, CreatePostCall, ReactionCall};
use crate::pagination::{self, FetchMode, PageRequest};

/// Run a reaction call, then any coalesced follow-ups it produces.
pub(crate) async fn run_reaction(shared: Arc<Shared>, call: ReactionCall) {
    let mut next = Some(call);
    while let Some(call) = next.take() {
        debug!(post_id = %call.post_id, mutation = %call.mutation, kind = %call.kind, "submitting reaction");
        let result = shared
            .api
            .submit_reaction(&call.post_id, call.kind)
            .await
            .map_err(FeedError::from);

        let events = {
            let mut guard = shared.lock();
            let state = &mut *guard;
            let resolution = state
                .mutations
                .complete_reaction(&mut state.collection, &call, result);
            next = resolution.next.clone();
            let events = state.resolve(resolution);
            state.batch(events)
        };
        shared.emit(events);
    }
}

pub(crate) async fn run_comment(shared: Arc<Shared>, call: CommentCall) {
    debug!(post_id = %call.post_id, mutation = %call.mutation, "submitting comment");
    let result = shared
        .api
        .submit_comment(&call.post_id, &call.content)
        .await
        .map_err(FeedError::from);

    let events = {
        let mut guard = shared.lock();
        let state = &mut *guard;
        let resolution = state
            .mutations
            .complete_comment(&mut state.collection, &call, result);
        let events = state.resolve(resolution);
        state.batch(events)
    };
    shared.emit(events);
}

pub(crate) async fn run_create_post(shared: Arc<Shared>, call: CreatePostCall) {
    debug!(mutation = %call.mutation, temp_id = %call.temp_id, "submitting post");
    let result = shared
        .api
        .create_post(&call.draft)
        .await
        .map_err(FeedError::from);

    let events = {
        let mut guard = shared.lock();
        let state = &mut *guard;
        let resolution = state
            .mutations
            .complete_create_post(&mut state.collection, &call, result);
        let events = state.resolve(resolution);
        state.batch(events)
    };
    shared.emit(events);
}

/// Fetch one page and append it, or replace the collection for a reset.
pub(crate) async fn run_page(shared: Arc<Shared>, request: PageRequest) {
    let page = request.cursor.page;
    let result = shared
        .api
        .fetch_page(request.cursor)
        .await
        .map_err(FeedError::from);

    let events = {
        let mut guard = shared.lock();
        let state = &mut *guard;

        if !state.pagination.is_current(&request) {
            warn!(page, "discarding page from before a refresh");
            return;
        }

        let events = match result {
            Ok(fetched) => {
                let has_more = pagination::has_more(fetched.posts.len(), fetched.has_more);
                let posts: Vec<Post> = fetched
                    .posts
                    .into_iter()
                    .filter(|p| !state.hidden.contains(&p.id))
                    .collect();
                state.pagination.complete(&request, has_more);

                match request.mode {
                    FetchMode::Append => {
                        let merge = state.collection.append_page(posts, Some(has_more));
                        if merge.dropped > 0 {
                            debug!(page, dropped = merge.dropped, "page overlapped existing posts");
                        }
                        info!(page, added = merge.added, has_more, "page appended");
                        let mut events = vec![FeedEvent::PageAppended {
                            page,
                            added: merge.added,
                            has_more,
                        }];
                        events.extend(state.settle_collection());
                        events
                    }
                    FetchMode::Reset => {
                        state.collection.replace_all(posts, Some(has_more));
                        let touched = state.mutations.reapply_pending(&mut state.collection);
                        let count = state.collection.len();
                        info!(count, has_more, "feed refreshed");
                        let mut events = vec![FeedEvent::Reset { count }];
                        events.extend(state.settle(&touched, &[]));
                        events.extend(state.settle_collection());
                        events
                    }
                }
            }
            Err(error) => {
                if state.pagination.abort(&request) && request.mode == FetchMode::Reset {
                    state.mutations.stop_tracking();
                }
                warn!(page, error = %error, "page fetch failed");
                vec![FeedEvent::PageFailed { page, error }]
            }
        };
        state.batch(events)
    };
    shared.emit(events);
}
