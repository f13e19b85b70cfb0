//! Feedloom core: task handlers, the transform pipeline, and scheduling.
//!
//! Data flow for one scheduled tick:
//! cron occurrence → [`Scheduler`] re-entrancy guard → [`Pipeline::execute`]
//! → pending item selection → per-tag chunk/transform/reassemble →
//! conflict-free output writes.

pub mod cron;
pub mod handlers;
pub mod pipeline;
pub mod registry;
pub mod scheduler;

pub use cron::{CronSpawner, JobFn, JobFuture, JobHandle, TokioCronSpawner, validate_schedule};
pub use handlers::{SummarizeHandler, TaskHandler, TranslateHandler};
pub use pipeline::{Pipeline, PipelineConfig, RunReport};
pub use registry::TaskRegistry;
pub use scheduler::Scheduler;

#[cfg(test)]
pub(crate) mod testing {
    //! Shared test doubles and storage fixtures.

    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;

    use feedloom_shared::{
        FeedType, FeedloomError, NewRssItem, Result, RssSource, SummarizeTaskData, Task,
        TaskType, TranslateTaskData, unique_article_id,
    };
    use feedloom_storage::{NewTask, Storage};
    use feedloom_transform::{SummaryPayload, SummaryStatus, Transformer};

    use crate::cron::{CronSpawner, JobFn, JobHandle};

    /// Deterministic transformer double: translation rewrites "Hello" to
    /// "Bonjour", summarization echoes the input.
    #[derive(Default)]
    pub struct StaticTransformer {
        /// Fail translation of content containing this substring.
        pub fail_on: Option<String>,
        /// Return an error-status summary for text containing this substring.
        pub summary_error_on: Option<String>,
        /// Sleep before answering, to widen race windows.
        pub delay: Option<Duration>,
        pub translate_calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Transformer for StaticTransformer {
        async fn translate(&self, content: &str, _data: &TranslateTaskData) -> Result<String> {
            self.translate_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(needle) = &self.fail_on {
                if content.contains(needle.as_str()) {
                    return Err(FeedloomError::Transform(format!(
                        "refusing content containing '{needle}'"
                    )));
                }
            }
            Ok(content.replace("Hello", "Bonjour"))
        }

        async fn summarize(&self, text: &str, _data: &SummarizeTaskData) -> Result<SummaryPayload> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(needle) = &self.summary_error_on {
                if text.contains(needle.as_str()) {
                    return Ok(SummaryPayload {
                        status: SummaryStatus::Error,
                        ..SummaryPayload::default()
                    });
                }
            }
            Ok(SummaryPayload {
                title: "Summary".into(),
                summary: text.to_string(),
                key_points: vec!["point".into()],
                tags: vec!["tag".into()],
                date: None,
                status: SummaryStatus::Success,
            })
        }
    }

    /// Spawner that captures jobs instead of driving them, so tests fire
    /// ticks by hand.
    #[derive(Default)]
    pub struct ManualSpawner {
        spawned: Mutex<Vec<(String, JobFn)>>,
    }

    impl ManualSpawner {
        pub fn spawn_count(&self) -> usize {
            self.spawned.lock().unwrap().len()
        }

        pub fn job(&self, idx: usize) -> JobFn {
            self.spawned.lock().unwrap()[idx].1.clone()
        }
    }

    impl CronSpawner for ManualSpawner {
        fn spawn(&self, schedule: &str, job: JobFn) -> Result<JobHandle> {
            self.spawned
                .lock()
                .unwrap()
                .push((schedule.to_string(), job));
            Ok(JobHandle::detached())
        }
    }

    pub async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("fl_core_test_{}.db", uuid::Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    pub async fn seed_source(storage: &Storage) -> RssSource {
        storage
            .create_rss_source("https://example.com/feed.xml", "example", FeedType::Rss2)
            .await
            .expect("create source")
    }

    pub async fn seed_items(storage: &Storage, source_id: i64, names: &[&str]) {
        let items: Vec<NewRssItem> = names
            .iter()
            .map(|name| {
                let url = format!("https://example.com/{name}");
                let body = format!("<p>Hello {name}</p>");
                NewRssItem {
                    item_url: url.clone(),
                    item_origin_info: json!({
                        "title": format!("Hello {name}"),
                        "link": url,
                        "description": body,
                    }),
                    unique_article_id: unique_article_id(&url, &body),
                    feed_type: FeedType::Rss2,
                }
            })
            .collect();
        storage
            .create_rss_items(source_id, &items)
            .await
            .expect("ingest items");
    }

    pub fn task_def(name: &str, source_id: i64, task_type: TaskType, immediate: bool) -> NewTask {
        NewTask {
            name: name.to_string(),
            schedule: "0 0 * * * *".to_string(),
            task_type,
            function_name: None,
            task_data: json!({}),
            rss_source_id: source_id,
            rss_item_tag: vec![],
            immediate,
        }
    }

    pub async fn seed_task(
        storage: &Storage,
        source_id: i64,
        task_type: TaskType,
        immediate: bool,
    ) -> Task {
        storage
            .create_task(task_def("test-task", source_id, task_type, immediate))
            .await
            .expect("create task")
    }
}
