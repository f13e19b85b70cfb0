//! The summarizer's structured reply.

use feedloom_shared::{FeedloomError, Result};
use serde::{Deserialize, Serialize};

/// Outcome marker carried inside the summarizer's JSON reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStatus {
    #[default]
    Success,
    Error,
    Timeout,
}

/// A parsed summarization reply.
///
/// Every field defaults so a reply that only carries `status` still parses;
/// only [`SummaryPayload::is_success`] output is ever persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryPayload {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Publication date as stated by the article, if any.
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub status: SummaryStatus,
}

impl SummaryPayload {
    /// Parse a raw model reply into a payload.
    ///
    /// Models occasionally wrap the JSON in a markdown code fence despite
    /// instructions; strip that framing before parsing.
    pub fn parse(raw: &str) -> Result<Self> {
        let cleaned = strip_code_fence(raw.trim());
        serde_json::from_str(cleaned)
            .map_err(|e| FeedloomError::parse(format!("summary reply is not valid JSON: {e}")))
    }

    /// A payload representing a timed-out summarization call.
    pub fn timeout() -> Self {
        Self {
            status: SummaryStatus::Timeout,
            ..Self::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SummaryStatus::Success
    }
}

fn strip_code_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    // Skip an optional language tag on the fence line
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
