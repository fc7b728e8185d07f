//! Seed data: a handful of users and a feed where every fourth post is a
//! boosted one from the brand account.

use chrono::{DateTime, Duration, Utc};

use feedsync::{Author, Comment, Media, MediaKind, Post, Reaction, ReactionKind};

use crate::server::MemoryBackend;

pub const VIEWER: &str = "alice";
pub const BRAND: &str = "acme";

pub fn users() -> Vec<Author> {
    vec![
        Author::new(VIEWER, "Alice"),
        Author::new("bob", "Bob"),
        Author::new("carol", "Carol"),
        Author::new("dave", "Dave"),
        Author::new(BRAND, "Acme Inc."),
    ]
}

pub fn viewer() -> Author {
    Author::new(VIEWER, "Alice")
}

fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_717_243_200, 0).unwrap_or_default()
}

/// `count` posts `p1..pN`, newest first.
pub fn posts(count: usize) -> Vec<Post> {
    let users = users();
    let others: Vec<&Author> = users
        .iter()
        .filter(|u| u.id != VIEWER && u.id != BRAND)
        .collect();

    (1..=count)
        .map(|i| {
            let id = format!("p{}", i);
            let boosted = i % 4 == 0;
            let author = if boosted {
                Author::new(BRAND, "Acme Inc.")
            } else {
                others[i % others.len()].clone()
            };

            let mut post = Post::new(&id, author, format!("Post number {}", i));
            post.created_at = epoch() - Duration::minutes(i as i64);
            post.is_boosted = boosted;

            if boosted {
                post.media.push(Media {
                    url: format!("https://cdn.example.com/promo/{}.jpg", i),
                    kind: MediaKind::Image,
                });
            }
            if i % 3 == 0 {
                post.reactions
                    .push(Reaction::new(format!("seed-r{}", i), ReactionKind::Haha, "bob", &id));
            }
            if i % 5 == 0 {
                post.comments.push(Comment {
                    id: format!("seed-c{}", i),
                    content: "First!".to_string(),
                    user_id: "carol".to_string(),
                    post_id: id.clone(),
                    created_at: post.created_at + Duration::seconds(30),
                    server_id: None,
                });
            }
            post
        })
        .collect()
}

/// Backend acting for [`VIEWER`] over `count` seeded posts.
pub fn backend(count: usize) -> MemoryBackend {
    MemoryBackend::new(viewer(), posts(count))
}
