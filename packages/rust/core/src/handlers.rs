//! Task handlers: one per transform variant.

use std::sync::Arc;

use feedloom_shared::{
    FeedloomError, Result, SummarizeTaskData, Task, TranslateTaskData,
};
use feedloom_transform::Transformer;

/// One transform variant's behavior, looked up by `Task::function_name`.
#[async_trait::async_trait]
pub trait TaskHandler: Send + Sync {
    /// Registry key this handler is installed under.
    fn name(&self) -> &'static str;

    /// Whether content is chunked before transformation. Chunked handlers
    /// receive one serialized HTML chunk per [`TaskHandler::transform`]
    /// call; unchunked handlers receive the prepared content whole.
    fn chunked(&self) -> bool;

    /// Prepare extracted tag content for transformation.
    fn prepare(&self, content: &str) -> String;

    /// Transform one piece of prepared content.
    async fn transform(&self, task: &Task, content: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Translate
// ---------------------------------------------------------------------------

/// HTML-preserving translation. Content is chunked so arbitrarily long
/// articles fit the transformer's input bound.
pub struct TranslateHandler {
    transformer: Arc<dyn Transformer>,
}

impl TranslateHandler {
    pub fn new(transformer: Arc<dyn Transformer>) -> Self {
        Self { transformer }
    }
}

#[async_trait::async_trait]
impl TaskHandler for TranslateHandler {
    fn name(&self) -> &'static str {
        "translateTask"
    }

    fn chunked(&self) -> bool {
        true
    }

    fn prepare(&self, content: &str) -> String {
        content.to_string()
    }

    async fn transform(&self, task: &Task, content: &str) -> Result<String> {
        let data: TranslateTaskData = serde_json::from_value(task.task_data.clone())
            .map_err(|e| {
                FeedloomError::validation(format!("task {}: invalid translate config: {e}", task.id))
            })?;
        self.transformer.translate(content, &data).await
    }
}

// ---------------------------------------------------------------------------
// Summarize
// ---------------------------------------------------------------------------

/// Article summarization. Content is flattened to plain text and sent in
/// one call; a reply without success status fails the item so it is
/// retried on a later run instead of being persisted.
pub struct SummarizeHandler {
    transformer: Arc<dyn Transformer>,
}

impl SummarizeHandler {
    pub fn new(transformer: Arc<dyn Transformer>) -> Self {
        Self { transformer }
    }
}

#[async_trait::async_trait]
impl TaskHandler for SummarizeHandler {
    fn name(&self) -> &'static str {
        "summarizeTask"
    }

    fn chunked(&self) -> bool {
        false
    }

    fn prepare(&self, content: &str) -> String {
        feedloom_chunker::html_to_text(content)
    }

    async fn transform(&self, task: &Task, content: &str) -> Result<String> {
        let data: SummarizeTaskData = serde_json::from_value(task.task_data.clone())
            .map_err(|e| {
                FeedloomError::validation(format!("task {}: invalid summarize config: {e}", task.id))
            })?;

        let payload = self.transformer.summarize(content, &data).await?;
        if !payload.is_success() {
            return Err(FeedloomError::Transform(format!(
                "summarization returned {:?} status",
                payload.status
            )));
        }

        serde_json::to_string(&payload)
            .map_err(|e| FeedloomError::Transform(format!("serialize summary: {e}")))
    }
}
