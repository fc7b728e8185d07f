//! Feed demo: drives the engine against the in-memory backend and logs
//! every event.
//!
//! Usage: cargo run -p feedsync-golden -- --page-size=5 --boosted-seed=7

use std::sync::Arc;

use tracing::info;

use feedsync::{FeedConfig, FeedEngine, PostDraft, ReactionKind};
use feed_golden::seed;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = FeedConfig::from_args(&args);
    info!("Config: {}", serde_json::to_string(&config)?);

    let backend = Arc::new(seed::backend(23));
    let engine = FeedEngine::new(backend.clone(), seed::viewer(), config);

    engine.subscribe("#", |event| {
        info!(topic = %event.topic(), "event");
    });

    // First two pages.
    engine.load_more().settled().await;
    engine.load_more().settled().await;
    info!("Loaded {} posts, has_more={}", engine.get_collection().len(), engine.has_more());

    let first = engine
        .get_collection()
        .first()
        .map(|p| p.id.clone())
        .ok_or_else(|| anyhow::anyhow!("seeded feed is empty"))?;

    // Detail view of the first post, then interact with it.
    engine.open_view("detail", &first)?;
    engine.react(&first, ReactionKind::Like).settled().await;
    engine.comment(&first, "Looks great!").settled().await;

    // Someone else reacts; a double click coalesces into one follow-up.
    backend.react_as("bob", &first, ReactionKind::Wow);
    let a = engine.react(&first, ReactionKind::Love);
    let b = engine.react(&first, ReactionKind::Love);
    a.settled().await;
    b.settled().await;

    // A failed comment is rolled back.
    backend.fail_comments(1);
    engine.comment(&first, "This one is lost").settled().await;

    engine.create_post(PostDraft::text("Hello from the demo")).settled().await;
    engine.refresh().settled().await;

    if let Some(view) = engine.view(&"detail".into()) {
        info!(
            "Detail view: post={} revision={} reactions={} comments={}",
            view.post.id,
            view.revision,
            view.post.reactions.len(),
            view.post.comments.len(),
        );
    }
    if let Some(boosted) = engine.get_boosted_post() {
        info!("Boosted: {}", serde_json::to_string_pretty(&boosted)?);
    }
    info!(
        "Done: {} posts, {} server reaction calls",
        engine.get_collection().len(),
        backend.reaction_calls()
    );
    Ok(())
}
