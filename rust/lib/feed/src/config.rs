use serde::{Deserialize, Serialize};

/// Feed engine tuning.
///
/// Embedding apps either deserialize this from their own settings file or
/// parse it from command-line flags with [`FeedConfig::from_args`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Items requested per page. Never used to infer the end of the feed.
    pub page_size: u32,

    /// Cursor value of the first page; a refresh resets to it.
    pub initial_page: u32,

    /// Longest comment accepted, in characters.
    pub max_comment_len: usize,

    /// Longest post body accepted, in characters.
    pub max_post_len: usize,

    /// Seed for the boosted-post RNG. `None` seeds from OS entropy.
    pub boosted_seed: Option<u64>,

    /// Resolved mutation records kept for state queries.
    pub mutation_history: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: 10,
            initial_page: 1,
            max_comment_len: 2000,
            max_post_len: 5000,
            boosted_seed: None,
            mutation_history: 256,
        }
    }
}

impl FeedConfig {
    /// Parse configuration from command-line arguments.
    ///
    /// Supported flags:
    /// - `--page-size=N`
    /// - `--initial-page=N`
    /// - `--max-comment-len=N`
    /// - `--max-post-len=N`
    /// - `--boosted-seed=N`
    /// - `--mutation-history=N`
    ///
    /// Unknown flags are ignored; unparsable values keep the default.
    pub fn from_args(args: &[String]) -> Self {
        let mut config = FeedConfig::default();

        for arg in args {
            if let Some(val) = arg.strip_prefix("--page-size=") {
                config.page_size = val.parse().unwrap_or(config.page_size);
            } else if let Some(val) = arg.strip_prefix("--initial-page=") {
                config.initial_page = val.parse().unwrap_or(config.initial_page);
            } else if let Some(val) = arg.strip_prefix("--max-comment-len=") {
                config.max_comment_len = val.parse().unwrap_or(config.max_comment_len);
            } else if let Some(val) = arg.strip_prefix("--max-post-len=") {
                config.max_post_len = val.parse().unwrap_or(config.max_post_len);
            } else if let Some(val) = arg.strip_prefix("--boosted-seed=") {
                config.boosted_seed = val.parse().ok().or(config.boosted_seed);
            } else if let Some(val) = arg.strip_prefix("--mutation-history=") {
                config.mutation_history = val.parse().unwrap_or(config.mutation_history);
            }
        }

        config
    }
}
