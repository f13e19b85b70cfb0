//! Shared types, error model, and configuration for Feedloom.
//!
//! This crate is the foundation depended on by all other Feedloom crates.
//! It provides:
//! - [`FeedloomError`] — the unified error type
//! - Domain types ([`Task`], [`RssItem`], [`RssTransformed`], ...)
//! - The attributes/text tag-tree convention ([`tagtree`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod tagtree;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, TransformerConfig, config_dir, config_file_path, expand_home,
    init_config, load_config, load_config_from, parse_timezone, validate_api_key,
};
pub use error::{FeedloomError, Result};
pub use types::{
    FeedType, NewRssItem, RssItem, RssSource, RssTransformed, SummarizeTaskData, Task,
    TaskStatus, TaskType, TranslateTaskData, unique_article_id,
};
