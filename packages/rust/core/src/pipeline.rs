//! One task run: select pending items, transform them, persist the output.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use feedloom_chunker::{Chunk, chunk, combine};
use feedloom_shared::{
    FeedloomError, Result, RssItem, RssTransformed, Task,
    tagtree::{extract_tag_text, modify_tag_content},
};
use feedloom_storage::Storage;

use crate::handlers::TaskHandler;
use crate::registry::TaskRegistry;

/// Pipeline tuning knobs, from config.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum serialized length of a chunk sent to the transformer.
    pub chunk_max_len: usize,
    /// Maximum items transformed concurrently within one run.
    pub item_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_max_len: 1000,
            item_concurrency: 4,
        }
    }
}

/// Outcome of one task run.
#[derive(Debug)]
pub struct RunReport {
    pub task_id: i64,
    /// Items that were pending when the run started.
    pub items_seen: usize,
    pub items_transformed: usize,
    pub items_failed: usize,
    /// Rows actually written; lower than `items_transformed` only when a
    /// concurrent run already wrote the same (task, article) pair.
    pub records_written: usize,
    pub elapsed: std::time::Duration,
}

/// The transform pipeline shared by scheduled and immediate runs.
pub struct Pipeline {
    storage: Arc<Storage>,
    registry: Arc<TaskRegistry>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(storage: Arc<Storage>, registry: Arc<TaskRegistry>, config: PipelineConfig) -> Self {
        Self {
            storage,
            registry,
            config,
        }
    }

    /// Run a task once: fetch its pending items, transform each item's
    /// configured tags, and persist one output record per item.
    ///
    /// A failing item is logged and skipped; it stays pending and is picked
    /// up again on the next run. The run itself only fails on task-level
    /// problems (unknown task, unknown handler, storage errors).
    #[instrument(skip(self))]
    pub async fn execute(&self, task_id: i64) -> Result<RunReport> {
        let start = Instant::now();

        let task = self
            .storage
            .get_task_by_id(task_id)
            .await?
            .ok_or_else(|| FeedloomError::validation(format!("task {task_id} does not exist")))?;

        let handler = self.registry.get(&task.function_name).ok_or_else(|| {
            FeedloomError::Scheduler(format!(
                "task {} references unknown handler '{}'",
                task.id, task.function_name
            ))
        })?;

        let items = self
            .storage
            .get_unique_rss_items(task.id, &task.rss_source_url)
            .await?;
        let items_seen = items.len();

        info!(
            task = %task.name,
            handler = handler.name(),
            pending = items_seen,
            "starting task run"
        );

        if items.is_empty() {
            return Ok(RunReport {
                task_id,
                items_seen: 0,
                items_transformed: 0,
                items_failed: 0,
                records_written: 0,
                elapsed: start.elapsed(),
            });
        }

        let task = Arc::new(task);
        let semaphore = Arc::new(Semaphore::new(self.config.item_concurrency));
        let chunk_max_len = self.config.chunk_max_len;

        let mut handles = Vec::with_capacity(items.len());
        for item in items {
            let handler = handler.clone();
            let task = task.clone();
            let sem = semaphore.clone();

            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire().await.expect("semaphore closed");
                let item_url = item.item_url.clone();
                transform_item(handler, task, item, chunk_max_len)
                    .await
                    .map_err(|e| (item_url, e))
            }));
        }

        let mut records = Vec::new();
        let mut items_failed = 0;
        for handle in handles {
            match handle.await {
                Ok(Ok(record)) => records.push(record),
                Ok(Err((item_url, e))) => {
                    warn!(task = %task.name, item = %item_url, error = %e, "item transform failed, skipping");
                    items_failed += 1;
                }
                Err(e) => {
                    warn!(task = %task.name, error = %e, "item transform panicked, skipping");
                    items_failed += 1;
                }
            }
        }

        let items_transformed = records.len();
        let records_written = self.storage.write_rss_items_to_transformed(&records).await?;

        let report = RunReport {
            task_id,
            items_seen,
            items_transformed,
            items_failed,
            records_written,
            elapsed: start.elapsed(),
        };

        info!(
            task = %task.name,
            items_seen = report.items_seen,
            transformed = report.items_transformed,
            failed = report.items_failed,
            written = report.records_written,
            elapsed_ms = report.elapsed.as_millis(),
            "task run complete"
        );

        Ok(report)
    }
}

/// Transform every configured tag of one item, returning its output record.
async fn transform_item(
    handler: Arc<dyn TaskHandler>,
    task: Arc<Task>,
    item: RssItem,
    chunk_max_len: usize,
) -> Result<RssTransformed> {
    // An empty tag list falls back to the feed type's primary content field.
    let default_tag = item.feed_type.default_content_tag();
    let tags: Vec<&str> = if task.rss_item_tag.is_empty() {
        vec![default_tag]
    } else {
        task.rss_item_tag.iter().map(String::as_str).collect()
    };

    let mut tree = item.item_origin_info.clone();

    for tag in tags {
        let content = extract_tag_text(&tree, tag);
        if content.trim().is_empty() {
            continue;
        }

        let prepared = handler.prepare(&content);
        let new_content = if handler.chunked() {
            let chunks = chunk(&prepared, chunk_max_len);
            if chunks.is_empty() {
                continue;
            }
            let mut transformed = Vec::with_capacity(chunks.len());
            for piece in &chunks {
                let out = handler.transform(&task, &piece.content).await?;
                transformed.push(Chunk {
                    content: out,
                    level: piece.level,
                });
            }
            combine(&transformed)
        } else {
            handler.transform(&task, &prepared).await?
        };

        tree = modify_tag_content(&tree, tag, &new_content);
    }

    // Items whose tags are all absent or empty still produce a record:
    // the item is done as far as this task is concerned.
    Ok(RssTransformed {
        rss_item_id: item.id,
        task_id: task.id,
        unique_article_id: item.unique_article_id,
        item_url: item.item_url,
        item_transformed_info: tree,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StaticTransformer, seed_items, seed_source, seed_task, test_storage};
    use feedloom_shared::TaskType;
    use serde_json::json;

    fn pipeline_with(storage: Arc<Storage>, transformer: StaticTransformer) -> Pipeline {
        let registry = Arc::new(TaskRegistry::with_defaults(Arc::new(transformer)));
        Pipeline::new(storage, registry, PipelineConfig::default())
    }

    #[tokio::test]
    async fn translate_run_writes_one_record_per_item() {
        let storage = Arc::new(test_storage().await);
        let source = seed_source(&storage).await;
        seed_items(&storage, source.id, &["a", "b", "c"]).await;
        let task = seed_task(&storage, source.id, TaskType::Translate, false).await;

        let pipeline = pipeline_with(storage.clone(), StaticTransformer::default());
        let report = pipeline.execute(task.id).await.expect("run");

        assert_eq!(report.items_seen, 3);
        assert_eq!(report.items_transformed, 3);
        assert_eq!(report.items_failed, 0);
        assert_eq!(report.records_written, 3);

        let records = storage.list_transformed_by_task(task.id).await.expect("list");
        assert_eq!(records.len(), 3);
        for record in &records {
            assert!(
                record.item_transformed_info["description"]
                    .as_str()
                    .expect("description is a string")
                    .contains("Bonjour")
            );
        }
    }

    #[tokio::test]
    async fn long_item_is_chunked_and_short_item_is_not() {
        let storage = Arc::new(test_storage().await);
        let source = seed_source(&storage).await;

        let long_body = "<p>Hello paragraph one.</p><p>Hello paragraph two.</p>\
                         <p>Hello paragraph three.</p>";
        let items = vec![
            feedloom_shared::NewRssItem {
                item_url: "https://example.com/long".into(),
                item_origin_info: json!({"description": long_body}),
                unique_article_id: feedloom_shared::unique_article_id(
                    "https://example.com/long",
                    long_body,
                ),
                feed_type: feedloom_shared::FeedType::Rss2,
            },
            feedloom_shared::NewRssItem {
                item_url: "https://example.com/short".into(),
                item_origin_info: json!({"description": "<p>Hello</p>"}),
                unique_article_id: feedloom_shared::unique_article_id(
                    "https://example.com/short",
                    "<p>Hello</p>",
                ),
                feed_type: feedloom_shared::FeedType::Rss2,
            },
        ];
        storage.create_rss_items(source.id, &items).await.expect("ingest");
        let task = seed_task(&storage, source.id, TaskType::Translate, false).await;

        let transformer = Arc::new(StaticTransformer::default());
        let registry = Arc::new(TaskRegistry::with_defaults(transformer.clone()));
        let pipeline = Pipeline::new(
            storage.clone(),
            registry,
            PipelineConfig {
                chunk_max_len: 40,
                item_concurrency: 4,
            },
        );

        let report = pipeline.execute(task.id).await.expect("run");
        assert_eq!(report.items_transformed, 2);
        assert_eq!(report.records_written, 2);

        // The long item needed one call per chunk, the short one a single
        // call, so more than three calls happened in total.
        use std::sync::atomic::Ordering;
        assert!(transformer.translate_calls.load(Ordering::SeqCst) > 3);

        let records = storage.list_transformed_by_task(task.id).await.expect("list");
        assert_eq!(records.len(), 2);
        let long = records
            .iter()
            .find(|r| r.item_url.ends_with("/long"))
            .expect("long record");
        let rewritten = long.item_transformed_info["description"]
            .as_str()
            .expect("description");
        // Chunk boundaries left no seams and every paragraph was translated
        assert_eq!(rewritten.matches("Bonjour").count(), 3);
        assert!(!rewritten.contains("Hello"));
    }

    #[tokio::test]
    async fn second_run_finds_no_pending_items() {
        let storage = Arc::new(test_storage().await);
        let source = seed_source(&storage).await;
        seed_items(&storage, source.id, &["a"]).await;
        let task = seed_task(&storage, source.id, TaskType::Translate, false).await;

        let pipeline = pipeline_with(storage.clone(), StaticTransformer::default());
        pipeline.execute(task.id).await.expect("first run");

        let report = pipeline.execute(task.id).await.expect("second run");
        assert_eq!(report.items_seen, 0);
        assert_eq!(report.records_written, 0);
    }

    #[tokio::test]
    async fn failing_item_is_skipped_and_retried_later() {
        let storage = Arc::new(test_storage().await);
        let source = seed_source(&storage).await;
        seed_items(&storage, source.id, &["good", "poison"]).await;
        let task = seed_task(&storage, source.id, TaskType::Translate, false).await;

        let transformer = StaticTransformer {
            fail_on: Some("poison".into()),
            ..StaticTransformer::default()
        };
        let pipeline = pipeline_with(storage.clone(), transformer);

        let report = pipeline.execute(task.id).await.expect("run");
        assert_eq!(report.items_seen, 2);
        assert_eq!(report.items_transformed, 1);
        assert_eq!(report.items_failed, 1);

        // The failed item is still pending for the next run
        let pending = storage
            .get_unique_rss_items(task.id, &source.source_url)
            .await
            .expect("pending");
        assert_eq!(pending.len(), 1);
        assert!(pending[0].item_url.contains("poison"));
    }

    #[tokio::test]
    async fn summarize_run_persists_only_success_payloads() {
        let storage = Arc::new(test_storage().await);
        let source = seed_source(&storage).await;
        seed_items(&storage, source.id, &["plain", "unreadable"]).await;
        let task = seed_task(&storage, source.id, TaskType::Summarize, false).await;

        let transformer = StaticTransformer {
            summary_error_on: Some("unreadable".into()),
            ..StaticTransformer::default()
        };
        let pipeline = pipeline_with(storage.clone(), transformer);

        let report = pipeline.execute(task.id).await.expect("run");
        assert_eq!(report.items_transformed, 1);
        assert_eq!(report.items_failed, 1);

        let records = storage.list_transformed_by_task(task.id).await.expect("list");
        assert_eq!(records.len(), 1);
        let summary_json = records[0].item_transformed_info["description"]
            .as_str()
            .expect("summary is a string");
        let payload: serde_json::Value = serde_json::from_str(summary_json).expect("valid json");
        assert_eq!(payload["status"], json!("success"));
    }

    #[tokio::test]
    async fn unknown_handler_fails_the_run() {
        let storage = Arc::new(test_storage().await);
        let source = seed_source(&storage).await;
        let mut def = crate::testing::task_def("odd", source.id, TaskType::Translate, false);
        def.function_name = Some("vanishedTask".into());
        let task = storage.create_task(def).await.expect("create task");

        let pipeline = pipeline_with(storage.clone(), StaticTransformer::default());
        let result = pipeline.execute(task.id).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("unknown handler"));
    }

    #[tokio::test]
    async fn missing_task_is_a_validation_error() {
        let storage = Arc::new(test_storage().await);
        let pipeline = pipeline_with(storage, StaticTransformer::default());
        let result = pipeline.execute(12345).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn configured_tags_override_the_default() {
        let storage = Arc::new(test_storage().await);
        let source = seed_source(&storage).await;
        seed_items(&storage, source.id, &["a"]).await;

        let mut def = crate::testing::task_def("titles", source.id, TaskType::Translate, false);
        def.rss_item_tag = vec!["title".into()];
        let task = storage.create_task(def).await.expect("create task");

        let pipeline = pipeline_with(storage.clone(), StaticTransformer::default());
        pipeline.execute(task.id).await.expect("run");

        let records = storage.list_transformed_by_task(task.id).await.expect("list");
        // title was rewritten, description left alone
        assert_eq!(records[0].item_transformed_info["title"], json!("Bonjour a"));
        assert!(
            records[0].item_transformed_info["description"]
                .as_str()
                .expect("description")
                .contains("Hello")
        );
    }
}
