//! Core domain types for Feedloom tasks and feed items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a task.
///
/// Recurring runs do not move the status; only immediate one-shot runs walk
/// `Pending → Running → {Completed, Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    NotStarted,
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskType
// ---------------------------------------------------------------------------

/// Discriminator for the content transform a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Translate,
    Summarize,
}

impl TaskType {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Translate => "TRANSLATE",
            Self::Summarize => "SUMMARIZE",
        }
    }

    /// Default registry key for this task type.
    pub fn default_function_name(&self) -> &'static str {
        match self {
            Self::Translate => "translateTask",
            Self::Summarize => "summarizeTask",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "TRANSLATE" => Ok(Self::Translate),
            "SUMMARIZE" => Ok(Self::Summarize),
            other => Err(format!("unknown task type '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A persisted job definition: schedule + transform variant + config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: i64,
    /// Human-readable name, unique across tasks.
    pub name: String,
    /// Cron expression (seconds resolution).
    pub schedule: String,
    /// Transform variant.
    pub task_type: TaskType,
    /// Key into the task handler registry.
    pub function_name: String,
    /// Variant-specific configuration (model, languages, custom prompt, ...).
    pub task_data: serde_json::Value,
    /// Feed source this task consumes.
    pub rss_source_id: i64,
    /// URL of the feed source (used to resolve items).
    pub rss_source_url: String,
    /// Ordered content-field names to transform. Empty means the feed
    /// type's default tag.
    #[serde(default)]
    pub rss_item_tag: Vec<String>,
    /// Requests a one-shot run outside the schedule.
    pub immediate: bool,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
    /// When the task was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Variant config for TRANSLATE tasks, deserialized from `Task::task_data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateTaskData {
    /// Model identifier override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Source language of the feed content.
    #[serde(default = "default_origin_lang")]
    pub origin_lang: String,
    /// Target language for the translation.
    #[serde(default = "default_target_lang")]
    pub target_lang: String,
    /// Extra instructions appended to the system prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_prompt: Option<String>,
}

fn default_origin_lang() -> String {
    "English".into()
}
fn default_target_lang() -> String {
    "Simplified Chinese".into()
}

/// Variant config for SUMMARIZE tasks, deserialized from `Task::task_data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizeTaskData {
    /// Model identifier override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Language the summary is written in.
    #[serde(default = "default_target_lang")]
    pub output_lang: String,
}

// ---------------------------------------------------------------------------
// Feed items
// ---------------------------------------------------------------------------

/// Wire protocol the source feed was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedType {
    Rss2,
    Atom,
}

impl FeedType {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rss2 => "rss2",
            Self::Atom => "atom",
        }
    }

    /// The content field transformed when a task configures no tags.
    pub fn default_content_tag(&self) -> &'static str {
        match self {
            Self::Rss2 => "description",
            Self::Atom => "content",
        }
    }
}

impl std::str::FromStr for FeedType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "rss2" => Ok(Self::Rss2),
            "atom" => Ok(Self::Atom),
            other => Err(format!("unknown feed type '{other}'")),
        }
    }
}

/// A subscribed feed source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RssSource {
    /// Unique source identifier.
    pub id: i64,
    /// Feed URL, unique across sources.
    pub source_url: String,
    /// Display name chosen at subscription time.
    pub custom_name: String,
    /// Protocol detected at ingestion.
    pub feed_type: FeedType,
    /// When the source was subscribed.
    pub created_at: DateTime<Utc>,
}

/// One ingested feed item. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RssItem {
    /// Unique item identifier.
    pub id: i64,
    /// Owning feed source.
    pub rss_source_id: i64,
    /// Link to the original article.
    pub item_url: String,
    /// Semi-structured tree mirroring the parsed feed XML
    /// (attributes/text convention, see the `tagtree` module).
    pub item_origin_info: serde_json::Value,
    /// Content-addressed identity: hex SHA-256 of url + primary content.
    pub unique_article_id: String,
    /// Protocol of the owning source.
    pub feed_type: FeedType,
}

/// A new item about to be ingested (no storage id yet).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRssItem {
    pub item_url: String,
    pub item_origin_info: serde_json::Value,
    pub unique_article_id: String,
    pub feed_type: FeedType,
}

/// The persisted, per-(task, item) output record of the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RssTransformed {
    /// Item the record was produced from.
    pub rss_item_id: i64,
    /// Task that produced the record.
    pub task_id: i64,
    /// Content-addressed identity of the item (dedup key with task_id).
    pub unique_article_id: String,
    /// Link to the original article.
    pub item_url: String,
    /// The item tree with target fields rewritten.
    pub item_transformed_info: serde_json::Value,
}

/// Compute the content-addressed identity of a feed item.
///
/// Identity is a pure function of (url, primary content), so re-ingesting
/// an unchanged item never produces duplicate work.
pub fn unique_article_id(url: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for status in [
            TaskStatus::NotStarted,
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            let parsed: TaskStatus = status.as_str().parse().expect("parse status");
            assert_eq!(parsed, status);
        }
        assert!("cancelled".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn task_type_serde_uses_screaming_case() {
        let json = serde_json::to_string(&TaskType::Translate).expect("serialize");
        assert_eq!(json, "\"TRANSLATE\"");
        let parsed: TaskType = serde_json::from_str("\"SUMMARIZE\"").expect("deserialize");
        assert_eq!(parsed, TaskType::Summarize);
    }

    #[test]
    fn default_content_tag_by_feed_type() {
        assert_eq!(FeedType::Rss2.default_content_tag(), "description");
        assert_eq!(FeedType::Atom.default_content_tag(), "content");
    }

    #[test]
    fn unique_article_id_is_deterministic() {
        let a = unique_article_id("https://example.com/post", "<p>body</p>");
        let b = unique_article_id("https://example.com/post", "<p>body</p>");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let c = unique_article_id("https://example.com/post", "<p>edited</p>");
        assert_ne!(a, c);
    }

    #[test]
    fn translate_task_data_defaults() {
        let data: TranslateTaskData = serde_json::from_str("{}").expect("deserialize");
        assert_eq!(data.origin_lang, "English");
        assert_eq!(data.target_lang, "Simplified Chinese");
        assert!(data.model.is_none());
    }

    #[test]
    fn task_serialization_roundtrip() {
        let task = Task {
            id: 1,
            name: "daily-news".into(),
            schedule: "0 0 * * * *".into(),
            task_type: TaskType::Translate,
            function_name: "translateTask".into(),
            task_data: serde_json::json!({"origin_lang": "English"}),
            rss_source_id: 7,
            rss_source_url: "https://example.com/feed.xml".into(),
            rss_item_tag: vec!["description".into()],
            immediate: false,
            status: TaskStatus::NotStarted,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&task).expect("serialize");
        let parsed: Task = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.name, "daily-news");
        assert_eq!(parsed.task_type, TaskType::Translate);
    }
}
