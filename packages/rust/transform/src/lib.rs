//! Content transformation backends.
//!
//! The [`Transformer`] trait is the seam between the task pipeline and
//! whatever model service performs the actual work. The production
//! implementation is [`OpenAiTransformer`]; tests substitute their own.

mod openai;
mod prompts;
mod summary;

use feedloom_shared::{Result, SummarizeTaskData, TranslateTaskData};

pub use openai::OpenAiTransformer;
pub use prompts::{summarize_system_prompt, translate_system_prompt};
pub use summary::{SummaryPayload, SummaryStatus};

/// A content transformation backend.
#[async_trait::async_trait]
pub trait Transformer: Send + Sync {
    /// Translate an HTML fragment, preserving its markup.
    async fn translate(&self, content: &str, data: &TranslateTaskData) -> Result<String>;

    /// Summarize plain article text into a structured payload.
    ///
    /// A timed-out call resolves to a payload with timeout status rather
    /// than an error; callers decide whether that output is persisted.
    async fn summarize(&self, text: &str, data: &SummarizeTaskData) -> Result<SummaryPayload>;
}
