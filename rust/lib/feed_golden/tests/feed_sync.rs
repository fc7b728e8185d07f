//! End-to-end feed scenarios: the engine against the in-memory backend.

use std::sync::{Arc, Mutex};

use feedsync::model::is_local_id;
use feedsync::{
    FeedConfig, FeedEngine, FeedError, FeedEvent, MutationState, PostDraft, ReactionKind, ViewId,
};
use feed_golden::{MemoryBackend, seed};

// =====================================================================
// Helpers
// =====================================================================

fn config(page_size: u32) -> FeedConfig {
    FeedConfig {
        page_size,
        boosted_seed: Some(7),
        ..FeedConfig::default()
    }
}

fn setup(posts: usize, page_size: u32) -> (Arc<MemoryBackend>, FeedEngine) {
    let backend = Arc::new(seed::backend(posts));
    let engine = FeedEngine::new(backend.clone(), seed::viewer(), config(page_size));
    (backend, engine)
}

/// Collect every event whose topic matches `pattern`.
fn record(engine: &FeedEngine, pattern: &str) -> Arc<Mutex<Vec<FeedEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    engine.subscribe(pattern, move |event| {
        sink.lock().unwrap().push(event.clone());
    });
    events
}

fn topics(events: &Arc<Mutex<Vec<FeedEvent>>>) -> Vec<String> {
    events.lock().unwrap().iter().map(|e| e.topic()).collect()
}

fn ids(engine: &FeedEngine) -> Vec<String> {
    engine.get_collection().into_iter().map(|p| p.id).collect()
}

fn reactions(engine: &FeedEngine, post_id: &str) -> Vec<(String, ReactionKind)> {
    engine
        .get_post(post_id)
        .unwrap()
        .reactions
        .into_iter()
        .map(|r| (r.user_id, r.kind))
        .collect()
}

async fn load(engine: &FeedEngine) {
    engine.load_more().settled().await;
}

// =====================================================================
// Pagination
// =====================================================================

#[tokio::test]
async fn pages_append_in_order_until_exhausted() {
    let (backend, engine) = setup(23, 10);
    let pages = record(&engine, "feed/page");

    load(&engine).await;
    load(&engine).await;
    assert!(engine.has_more());
    load(&engine).await;

    let expected: Vec<String> = (1..=23).map(|i| format!("p{}", i)).collect();
    assert_eq!(ids(&engine), expected);
    assert!(!engine.has_more());
    assert_eq!(pages.lock().unwrap().len(), 3);

    let again = engine.load_more();
    assert!(!again.is_running());
    assert_eq!(backend.page_calls(), 3);
}

#[tokio::test]
async fn hiding_an_unloaded_post_does_not_filter_it() {
    let (_backend, engine) = setup(20, 10);
    load(&engine).await;

    assert!(!engine.hide_post("p15"));
    load(&engine).await;
    assert!(engine.get_post("p15").is_some());
}

#[tokio::test]
async fn overlapping_page_is_deduplicated() {
    let (backend, engine) = setup(20, 10);
    let pages = record(&engine, "feed/page");
    load(&engine).await;

    // A new post shifts the server's pages by one: page 2 repeats p10.
    backend.insert_post(feedsync::Post::new("n1", seed::viewer(), "breaking"));
    load(&engine).await;

    let ids = ids(&engine);
    assert_eq!(ids.len(), 19);
    assert_eq!(ids.iter().filter(|id| *id == "p10").count(), 1);
    assert!(!ids.contains(&"n1".to_string()));

    let events = pages.lock().unwrap();
    assert_eq!(
        events[1],
        FeedEvent::PageAppended {
            page: 2,
            added: 9,
            has_more: true,
        }
    );
}

#[tokio::test]
async fn short_page_without_flag_is_not_exhaustion() {
    let (backend, engine) = setup(5, 10);
    backend.set_report_has_more(false);

    load(&engine).await;
    assert_eq!(engine.get_collection().len(), 5);
    assert!(engine.has_more());

    load(&engine).await;
    assert_eq!(engine.get_collection().len(), 5);
    assert!(!engine.has_more());
}

#[tokio::test]
async fn failed_page_keeps_cursor() {
    let (backend, engine) = setup(12, 10);
    let failures = record(&engine, "feed/page/failed");

    backend.fail_pages(1);
    load(&engine).await;
    assert!(engine.get_collection().is_empty());
    assert!(engine.has_more());
    assert!(!engine.is_loading());
    assert_eq!(failures.lock().unwrap().len(), 1);

    load(&engine).await;
    assert_eq!(engine.get_collection().len(), 10);
}

#[tokio::test]
async fn refresh_resets_cursor_and_replaces_collection() {
    let (backend, engine) = setup(12, 5);
    load(&engine).await;
    load(&engine).await;
    assert_eq!(engine.get_collection().len(), 10);

    backend.remove_post("p2");
    let resets = record(&engine, "feed/reset");
    engine.refresh().settled().await;

    assert_eq!(ids(&engine), vec!["p1", "p3", "p4", "p5", "p6"]);
    assert_eq!(*resets.lock().unwrap(), vec![FeedEvent::Reset { count: 5 }]);

    load(&engine).await;
    assert_eq!(engine.get_collection().len(), 10);
    assert_eq!(ids(&engine)[5], "p7");
}

#[tokio::test]
async fn page_from_before_refresh_is_discarded() {
    let (backend, engine) = setup(20, 10);
    let events = record(&engine, "feed/#");

    backend.gate_pages();
    let stale = engine.load_more();
    tokio::task::yield_now().await;
    let fresh = engine.refresh();
    backend.open_pages();
    stale.settled().await;
    fresh.settled().await;

    assert_eq!(engine.get_collection().len(), 10);
    assert!(!engine.is_loading());
    assert_eq!(topics(&events), vec!["feed/reset"]);
}

// =====================================================================
// Reactions
// =====================================================================

#[tokio::test]
async fn reaction_scenario_picks_up_other_users() {
    let (backend, engine) = setup(2, 10);
    load(&engine).await;
    assert!(reactions(&engine, "p1").is_empty());

    backend.gate_reactions();
    let like = engine.react("p1", ReactionKind::Like);
    assert_eq!(reactions(&engine, "p1"), vec![("alice".into(), ReactionKind::Like)]);

    let love = engine.react("p1", ReactionKind::Love);
    assert_eq!(reactions(&engine, "p1"), vec![("alice".into(), ReactionKind::Love)]);
    tokio::task::yield_now().await;

    // Bob reacts while Alice's calls are in flight.
    backend.react_as("bob", "p1", ReactionKind::Haha);
    backend.open_reactions();
    like.settled().await;
    love.settled().await;

    let mut merged = reactions(&engine, "p1");
    merged.sort();
    assert_eq!(
        merged,
        vec![
            ("alice".into(), ReactionKind::Love),
            ("bob".into(), ReactionKind::Haha),
        ]
    );
    assert_eq!(engine.get_post("p1"), backend.post("p1"));
    assert_eq!(engine.pending_mutations(), 0);
}

#[tokio::test]
async fn failed_reaction_rolls_back_and_notifies() {
    let (backend, engine) = setup(3, 10);
    load(&engine).await;
    let before = engine.get_post("p3").unwrap().reactions;
    let failures = record(&engine, "mutations/+/failed");

    backend.fail_reactions(1);
    let dispatched = engine.react("p3", ReactionKind::Sad);
    let mutation = dispatched.mutation().unwrap();
    assert_eq!(engine.get_post("p3").unwrap().reactions.len(), before.len() + 1);
    assert_eq!(engine.mutation_state(mutation), MutationState::Pending);

    dispatched.settled().await;
    assert_eq!(engine.get_post("p3").unwrap().reactions, before);
    assert_eq!(engine.mutation_state(mutation), MutationState::Failed);

    let failures = failures.lock().unwrap();
    assert_eq!(failures.len(), 1);
    match &failures[0] {
        FeedEvent::MutationFailed { error, post_id, .. } => {
            assert_eq!(post_id, "p3");
            assert!(error.is_retryable());
        }
        other => panic!("unexpected event {:?}", other),
    }
    drop(failures);

    assert!(engine.acknowledge(mutation));
    assert_eq!(engine.mutation_state(mutation), MutationState::Idle);
}

#[tokio::test]
async fn failure_handler_sees_rolled_back_state() {
    let (backend, engine) = setup(2, 10);
    load(&engine).await;

    let seen = Arc::new(Mutex::new(None));
    let (sink, reader) = (Arc::clone(&seen), engine.clone());
    engine.subscribe("mutations/reaction/failed", move |_| {
        *sink.lock().unwrap() = reader.get_post("p1").map(|p| p.reactions.len());
    });

    backend.fail_reactions(1);
    engine.react("p1", ReactionKind::Like).settled().await;
    assert_eq!(*seen.lock().unwrap(), Some(0));
}

#[tokio::test]
async fn double_click_returns_to_original_state() {
    let (backend, engine) = setup(2, 10);
    load(&engine).await;

    backend.gate_reactions();
    let first = engine.react("p1", ReactionKind::Like);
    let second = engine.react("p1", ReactionKind::Like);
    assert!(first.is_running());
    assert!(!second.is_running());
    assert!(reactions(&engine, "p1").is_empty());
    tokio::task::yield_now().await;

    backend.open_reactions();
    first.settled().await;

    assert!(reactions(&engine, "p1").is_empty());
    assert!(backend.post("p1").unwrap().reactions.is_empty());
    assert_eq!(backend.reaction_calls(), 2);
    assert_eq!(
        engine.mutation_state(second.mutation().unwrap()),
        MutationState::Confirmed
    );
}

#[tokio::test]
async fn triple_click_needs_a_single_call() {
    let (backend, engine) = setup(2, 10);
    load(&engine).await;

    backend.gate_reactions();
    let first = engine.react("p1", ReactionKind::Like);
    engine.react("p1", ReactionKind::Like);
    engine.react("p1", ReactionKind::Like);
    tokio::task::yield_now().await;
    backend.open_reactions();
    first.settled().await;

    assert_eq!(reactions(&engine, "p1"), vec![("alice".into(), ReactionKind::Like)]);
    assert_eq!(backend.reaction_calls(), 1);
    assert_eq!(engine.pending_mutations(), 0);
}

#[tokio::test]
async fn at_most_one_reaction_per_user_at_every_step() {
    let (_backend, engine) = setup(2, 10);
    load(&engine).await;

    let violations = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&violations);
    engine.subscribe("posts/+", move |event| {
        if let FeedEvent::PostChanged { post } = event {
            let mine = post.reactions.iter().filter(|r| r.user_id == "alice").count();
            if mine > 1 {
                *sink.lock().unwrap() += 1;
            }
        }
    });

    let sequence = [
        ReactionKind::Like,
        ReactionKind::Love,
        ReactionKind::Love,
        ReactionKind::Angry,
        ReactionKind::Wow,
        ReactionKind::Wow,
        ReactionKind::Haha,
    ];
    let mut handles = Vec::new();
    for kind in sequence {
        handles.push(engine.react("p1", kind));
        assert!(reactions(&engine, "p1").iter().filter(|(u, _)| u == "alice").count() <= 1);
    }
    for handle in handles {
        handle.settled().await;
    }

    assert_eq!(*violations.lock().unwrap(), 0);
    assert_eq!(reactions(&engine, "p1"), vec![("alice".into(), ReactionKind::Haha)]);
}

#[tokio::test]
async fn reacting_to_unknown_post_is_rejected() {
    let (_backend, engine) = setup(2, 10);
    load(&engine).await;
    let rejected = record(&engine, "mutations/+/rejected");

    let dispatched = engine.react("p99", ReactionKind::Like);
    assert!(dispatched.mutation().is_none());
    assert!(!dispatched.is_running());
    assert_eq!(
        *rejected.lock().unwrap(),
        vec![FeedEvent::ActionRejected {
            kind: feedsync::MutationKind::Reaction,
            post_id: Some("p99".into()),
            error: FeedError::PostNotFound("p99".into()),
        }]
    );
}

// =====================================================================
// Comments
// =====================================================================

#[tokio::test]
async fn comment_shows_at_once_and_confirms_without_duplicate() {
    let (backend, engine) = setup(2, 10);
    load(&engine).await;

    let dispatched = engine.comment("p1", "nice one");
    let comments = engine.get_post("p1").unwrap().comments;
    assert_eq!(comments.len(), 1);
    assert!(is_local_id(&comments[0].id));
    let temp_id = comments[0].id.clone();

    dispatched.settled().await;
    let comments = engine.get_post("p1").unwrap().comments;
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].id, temp_id);
    let server_id = comments[0].server_id.clone().unwrap();
    assert_eq!(backend.post("p1").unwrap().comments[0].id, server_id);

    // A later authoritative copy of the post carries the comment again.
    engine.react("p1", ReactionKind::Like).settled().await;
    assert_eq!(engine.get_post("p1").unwrap().comments.len(), 1);
}

#[tokio::test]
async fn late_reaction_confirmation_keeps_new_comment() {
    let (backend, engine) = setup(2, 10);
    load(&engine).await;

    backend.gate_reactions();
    let reaction = engine.react("p1", ReactionKind::Like);
    tokio::task::yield_now().await;
    engine.comment("p1", "first").settled().await;

    backend.open_reactions();
    reaction.settled().await;

    let p1 = engine.get_post("p1").unwrap();
    assert_eq!(p1.reactions.len(), 1);
    assert_eq!(p1.comments.len(), 1);
    assert!(p1.comments[0].server_id.is_some());
}

#[tokio::test]
async fn late_comment_confirmation_keeps_new_reaction() {
    let (backend, engine) = setup(2, 10);
    load(&engine).await;

    backend.gate_comments();
    let comment = engine.comment("p1", "slow");
    tokio::task::yield_now().await;
    engine.react("p1", ReactionKind::Wow).settled().await;

    backend.open_comments();
    comment.settled().await;

    let p1 = engine.get_post("p1").unwrap();
    assert_eq!(p1.reactions.len(), 1);
    assert_eq!(p1.comments.len(), 1);
    assert!(!p1.comments[0].is_unconfirmed());
}

#[tokio::test]
async fn failed_comment_is_rolled_back() {
    let (backend, engine) = setup(2, 10);
    load(&engine).await;
    let failures = record(&engine, "mutations/comment/failed");

    backend.fail_comments(1);
    let dispatched = engine.comment("p2", "lost");
    assert_eq!(engine.get_post("p2").unwrap().comments.len(), 1);
    dispatched.settled().await;

    assert!(engine.get_post("p2").unwrap().comments.is_empty());
    assert_eq!(failures.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn blank_comment_is_rejected_without_a_call() {
    let (backend, engine) = setup(2, 10);
    load(&engine).await;
    let rejected = record(&engine, "mutations/comment/rejected");

    let dispatched = engine.comment("p1", "   ");
    assert!(!dispatched.is_running());
    assert!(engine.get_post("p1").unwrap().comments.is_empty());
    assert_eq!(backend.comment_calls(), 0);
    assert_eq!(rejected.lock().unwrap().len(), 1);
}

// =====================================================================
// Views
// =====================================================================

#[tokio::test]
async fn detail_view_follows_canonical_post() {
    let (_backend, engine) = setup(12, 10);
    load(&engine).await;
    let detail = ViewId::new("detail");

    let opened = engine.open_view(detail.clone(), "p1").unwrap();
    assert_eq!(opened.revision, 0);

    engine.react("p1", ReactionKind::Like).settled().await;
    let view = engine.view(&detail).unwrap();
    assert_eq!(Some(view.post.clone()), engine.get_post("p1"));
    assert!(view.revision > 0);

    // Re-applying identical data is not an update.
    let synced = record(&engine, "views/+");
    engine.refresh().settled().await;
    assert_eq!(engine.view(&detail).unwrap().revision, view.revision);
    assert!(synced.lock().unwrap().is_empty());
}

#[tokio::test]
async fn view_of_hidden_post_goes_stale_quietly() {
    let (_backend, engine) = setup(12, 10);
    load(&engine).await;
    let detail = ViewId::new("detail");
    engine.open_view(detail.clone(), "p2").unwrap();

    assert!(engine.hide_post("p2"));
    assert!(!engine.hide_post("p2"));
    assert!(engine.get_post("p2").is_none());
    assert_eq!(engine.view(&detail).unwrap().post.id, "p2");

    let dispatched = engine.react("p2", ReactionKind::Like);
    assert!(dispatched.mutation().is_none());

    engine.refresh().settled().await;
    assert!(engine.get_post("p2").is_none());
    assert_eq!(engine.view(&detail).unwrap().revision, 0);

    assert!(engine.close_view(&detail));
    assert!(engine.open_view(detail, "p2").is_err());
}

#[tokio::test]
async fn view_of_new_post_follows_it_to_server_id() {
    let (_backend, engine) = setup(2, 10);
    load(&engine).await;
    let compose = ViewId::new("compose");

    let dispatched = engine.create_post(PostDraft::text("just posted"));
    let temp_id = engine.get_collection()[0].id.clone();
    engine.open_view(compose.clone(), &temp_id).unwrap();
    dispatched.settled().await;

    let view = engine.view(&compose).unwrap();
    assert!(!is_local_id(&view.post.id));
    assert_eq!(Some(view.post), engine.get_post(&engine.get_collection()[0].id));
    assert_eq!(view.revision, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn view_revisions_arrive_in_order_on_a_threaded_runtime() {
    let (_backend, engine) = setup(6, 10);
    load(&engine).await;
    engine.open_view("detail", "p1").unwrap();

    let revisions = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&revisions);
    engine.subscribe("views/detail", move |event| {
        if let FeedEvent::ViewSynced { revision, .. } = event {
            sink.lock().unwrap().push(*revision);
        }
    });

    let kinds = [
        ReactionKind::Like,
        ReactionKind::Love,
        ReactionKind::Haha,
        ReactionKind::Wow,
        ReactionKind::Sad,
        ReactionKind::Angry,
    ];
    for round in 0..20 {
        let handles: Vec<_> = (1..=6)
            .map(|i| engine.react(&format!("p{}", i), kinds[(i + round) % kinds.len()]))
            .collect();
        for handle in handles {
            handle.settled().await;
        }
    }

    let revisions = revisions.lock().unwrap();
    assert!(revisions.len() >= 20);
    assert!(revisions.windows(2).all(|pair| pair[0] < pair[1]));
}

// =====================================================================
// Boosted
// =====================================================================

#[tokio::test]
async fn boosted_pick_is_sticky_across_refreshes() {
    let (_backend, engine) = setup(12, 12);
    load(&engine).await;

    let picked = engine.get_boosted_post().unwrap();
    assert!(picked.is_boosted);
    for _ in 0..5 {
        engine.refresh().settled().await;
        assert_eq!(engine.get_boosted_post().unwrap().id, picked.id);
    }
}

#[tokio::test]
async fn boosted_pick_follows_engagement_and_falls_back() {
    let (_backend, engine) = setup(12, 12);
    load(&engine).await;
    let picked = engine.get_boosted_post().unwrap();

    engine.react(&picked.id, ReactionKind::Love).settled().await;
    let refreshed = engine.get_boosted_post().unwrap();
    assert_eq!(refreshed.id, picked.id);
    assert_eq!(refreshed.reactions.len(), picked.reactions.len() + 1);

    // A copy with the same counts is not swapped in.
    engine.react(&picked.id, ReactionKind::Wow).settled().await;
    let held = engine.get_boosted_post().unwrap();
    assert_eq!(held, refreshed);
    assert_ne!(held, engine.get_post(&picked.id).unwrap());

    engine.hide_post(&picked.id);
    let fallback = engine.get_boosted_post().unwrap();
    assert_ne!(fallback.id, picked.id);
    assert!(fallback.is_boosted);

    for id in ["p4", "p8", "p12"] {
        engine.hide_post(id);
    }
    assert!(engine.get_boosted_post().is_none());
}

// =====================================================================
// Posts
// =====================================================================

#[tokio::test]
async fn created_post_is_swapped_for_server_copy() {
    let (backend, engine) = setup(3, 10);
    load(&engine).await;

    let dispatched = engine.create_post(PostDraft::text("hello feed"));
    let head = engine.get_collection()[0].clone();
    assert!(is_local_id(&head.id));
    assert_eq!(head.author.id, seed::VIEWER);

    dispatched.settled().await;
    let head = engine.get_collection()[0].clone();
    assert!(!is_local_id(&head.id));
    assert_eq!(head.content, "hello feed");
    assert_eq!(engine.get_collection().len(), 4);
    assert_eq!(backend.post_count(), 4);
}

#[tokio::test]
async fn failed_post_is_evicted() {
    let (backend, engine) = setup(3, 10);
    load(&engine).await;
    let removed = record(&engine, "posts/+/removed");

    backend.fail_posts(1);
    let dispatched = engine.create_post(PostDraft::text("doomed"));
    let temp_id = engine.get_collection()[0].id.clone();
    dispatched.settled().await;

    assert_eq!(ids(&engine), vec!["p1", "p2", "p3"]);
    assert_eq!(
        *removed.lock().unwrap(),
        vec![FeedEvent::PostRemoved { post_id: temp_id }]
    );
}

// =====================================================================
// Refresh with pending mutations
// =====================================================================

#[tokio::test]
async fn refresh_keeps_pending_optimistic_state() {
    let (backend, engine) = setup(4, 10);
    load(&engine).await;

    backend.gate_reactions();
    let reaction = engine.react("p1", ReactionKind::Like);
    tokio::task::yield_now().await;

    engine.refresh().settled().await;
    assert_eq!(reactions(&engine, "p1"), vec![("alice".into(), ReactionKind::Like)]);

    backend.open_reactions();
    reaction.settled().await;
    let p1 = engine.get_post("p1").unwrap();
    assert_eq!(p1.reactions.len(), 1);
    assert!(!is_local_id(&p1.reactions[0].id));
}

#[tokio::test]
async fn confirmations_during_refresh_survive_an_older_page() {
    let (backend, engine) = setup(4, 10);
    load(&engine).await;

    backend.hold_page_delivery();
    let refresh = engine.refresh();
    tokio::task::yield_now().await;

    // Both land on the server after it sliced the refresh page.
    engine.react("p1", ReactionKind::Like).settled().await;
    engine.comment("p1", "hello").settled().await;

    backend.open_page_delivery();
    refresh.settled().await;

    let p1 = engine.get_post("p1").unwrap();
    assert_eq!(reactions(&engine, "p1"), vec![("alice".into(), ReactionKind::Like)]);
    assert_eq!(p1.comments.len(), 1);
    let server_comment = backend.post("p1").unwrap().comments[0].id.clone();
    assert_eq!(p1.comments[0].server_id.as_deref(), Some(server_comment.as_str()));

    // A page taken after the confirmations agrees with the server.
    engine.refresh().settled().await;
    assert_eq!(engine.get_post("p1"), backend.post("p1"));
}
