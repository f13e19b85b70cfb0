//! Turso Embedded / libSQL storage layer for Feedloom.
//!
//! The [`Storage`] struct wraps a libSQL database holding feed sources,
//! ingested items, task definitions, and per-(task, item) transform output.
//! The `rss_transformed` table's `UNIQUE(task_id, unique_article_id)`
//! constraint is the system's exactly-once backstop: writes race-safely
//! no-op when another run already produced the same record.

mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use feedloom_shared::{
    FeedType, FeedloomError, NewRssItem, Result, RssItem, RssSource, RssTransformed, Task,
    TaskStatus, TaskType,
};
use libsql::{Connection, Database, params};

/// A task definition about to be created (no storage id yet).
#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub schedule: String,
    pub task_type: TaskType,
    /// Registry key override; defaults from the task type when `None`.
    pub function_name: Option<String>,
    pub task_data: serde_json::Value,
    pub rss_source_id: i64,
    pub rss_item_tag: Vec<String>,
    pub immediate: bool,
}

/// Counts from a batch item ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub created: usize,
    pub skipped: usize,
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| FeedloomError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| FeedloomError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| FeedloomError::Storage(e.to_string()))?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    FeedloomError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Feed source operations
    // -----------------------------------------------------------------------

    /// Subscribe a new feed source. Fails if the URL is already subscribed.
    pub async fn create_rss_source(
        &self,
        source_url: &str,
        custom_name: &str,
        feed_type: FeedType,
    ) -> Result<RssSource> {
        if self.get_rss_source_by_url(source_url).await?.is_some() {
            return Err(FeedloomError::validation(format!(
                "feed source '{source_url}' is already subscribed"
            )));
        }

        let now = Utc::now();
        self.conn
            .execute(
                "INSERT INTO rss_sources (source_url, custom_name, feed_type, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![source_url, custom_name, feed_type.as_str(), now.to_rfc3339()],
            )
            .await
            .map_err(|e| FeedloomError::Storage(e.to_string()))?;

        Ok(RssSource {
            id: self.conn.last_insert_rowid(),
            source_url: source_url.to_string(),
            custom_name: custom_name.to_string(),
            feed_type,
            created_at: now,
        })
    }

    /// Get a feed source by ID.
    pub async fn get_rss_source_by_id(&self, id: i64) -> Result<Option<RssSource>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, source_url, custom_name, feed_type, created_at
                 FROM rss_sources WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| FeedloomError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_source(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(FeedloomError::Storage(e.to_string())),
        }
    }

    /// Get a feed source by URL.
    pub async fn get_rss_source_by_url(&self, source_url: &str) -> Result<Option<RssSource>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, source_url, custom_name, feed_type, created_at
                 FROM rss_sources WHERE source_url = ?1",
                params![source_url],
            )
            .await
            .map_err(|e| FeedloomError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_source(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(FeedloomError::Storage(e.to_string())),
        }
    }

    /// List all subscribed feed sources.
    pub async fn list_rss_sources(&self) -> Result<Vec<RssSource>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, source_url, custom_name, feed_type, created_at
                 FROM rss_sources ORDER BY custom_name",
                params![],
            )
            .await
            .map_err(|e| FeedloomError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_source(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Feed item operations
    // -----------------------------------------------------------------------

    /// Ingest a batch of items for a source. Items whose `unique_article_id`
    /// already exists for this source are skipped, so re-ingesting a feed is
    /// a no-op for unchanged content. The same article arriving through a
    /// different source is ingested again under that source.
    pub async fn create_rss_items(
        &self,
        rss_source_id: i64,
        items: &[NewRssItem],
    ) -> Result<IngestReport> {
        let now = Utc::now().to_rfc3339();
        let mut created = 0;

        for item in items {
            let origin_json = serde_json::to_string(&item.item_origin_info)
                .map_err(|e| FeedloomError::Storage(e.to_string()))?;
            let changed = self
                .conn
                .execute(
                    "INSERT INTO rss_items
                       (rss_source_id, item_url, item_origin_info, unique_article_id, feed_type, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(rss_source_id, unique_article_id) DO NOTHING",
                    params![
                        rss_source_id,
                        item.item_url.as_str(),
                        origin_json.as_str(),
                        item.unique_article_id.as_str(),
                        item.feed_type.as_str(),
                        now.as_str(),
                    ],
                )
                .await
                .map_err(|e| FeedloomError::Storage(e.to_string()))?;
            created += changed as usize;
        }

        Ok(IngestReport {
            created,
            skipped: items.len() - created,
        })
    }

    /// List all items belonging to the source with the given URL.
    pub async fn list_items_by_source_url(&self, source_url: &str) -> Result<Vec<RssItem>> {
        let mut rows = self
            .conn
            .query(
                "SELECT i.id, i.rss_source_id, i.item_url, i.item_origin_info,
                        i.unique_article_id, i.feed_type
                 FROM rss_items i
                 JOIN rss_sources s ON s.id = i.rss_source_id
                 WHERE s.source_url = ?1
                 ORDER BY i.id",
                params![source_url],
            )
            .await
            .map_err(|e| FeedloomError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_item(&row)?);
        }
        Ok(results)
    }

    /// Items of the task's source the task has not yet produced output for.
    ///
    /// This is the pipeline's work selection: full item set minus the
    /// `unique_article_id`s already present in `rss_transformed` for this
    /// task. Every run starts from here, so completed work is never redone.
    pub async fn get_unique_rss_items(
        &self,
        task_id: i64,
        source_url: &str,
    ) -> Result<Vec<RssItem>> {
        let mut rows = self
            .conn
            .query(
                "SELECT i.id, i.rss_source_id, i.item_url, i.item_origin_info,
                        i.unique_article_id, i.feed_type
                 FROM rss_items i
                 JOIN rss_sources s ON s.id = i.rss_source_id
                 WHERE s.source_url = ?1
                   AND i.unique_article_id NOT IN (
                     SELECT unique_article_id FROM rss_transformed WHERE task_id = ?2
                   )
                 ORDER BY i.id",
                params![source_url, task_id],
            )
            .await
            .map_err(|e| FeedloomError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_item(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Task operations
    // -----------------------------------------------------------------------

    /// Create a task. The name must be unique; the source must exist.
    pub async fn create_task(&self, new_task: NewTask) -> Result<Task> {
        if self.get_task_by_name(&new_task.name).await?.is_some() {
            return Err(FeedloomError::validation(format!(
                "task '{}' already exists",
                new_task.name
            )));
        }

        let source = self
            .get_rss_source_by_id(new_task.rss_source_id)
            .await?
            .ok_or_else(|| {
                FeedloomError::validation(format!(
                    "feed source {} does not exist",
                    new_task.rss_source_id
                ))
            })?;

        let function_name = new_task
            .function_name
            .unwrap_or_else(|| new_task.task_type.default_function_name().to_string());
        let task_data_json = serde_json::to_string(&new_task.task_data)
            .map_err(|e| FeedloomError::Storage(e.to_string()))?;
        let tags_json = serde_json::to_string(&new_task.rss_item_tag)
            .map_err(|e| FeedloomError::Storage(e.to_string()))?;
        let status = if new_task.immediate {
            TaskStatus::Pending
        } else {
            TaskStatus::NotStarted
        };
        let now = Utc::now();

        self.conn
            .execute(
                "INSERT INTO tasks
                   (name, schedule, task_type, function_name, task_data, rss_source_id,
                    rss_source_url, rss_item_tag, immediate, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    new_task.name.as_str(),
                    new_task.schedule.as_str(),
                    new_task.task_type.as_str(),
                    function_name.as_str(),
                    task_data_json.as_str(),
                    new_task.rss_source_id,
                    source.source_url.as_str(),
                    tags_json.as_str(),
                    new_task.immediate as i64,
                    status.as_str(),
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| FeedloomError::Storage(e.to_string()))?;

        Ok(Task {
            id: self.conn.last_insert_rowid(),
            name: new_task.name,
            schedule: new_task.schedule,
            task_type: new_task.task_type,
            function_name,
            task_data: new_task.task_data,
            rss_source_id: new_task.rss_source_id,
            rss_source_url: source.source_url,
            rss_item_tag: new_task.rss_item_tag,
            immediate: new_task.immediate,
            status,
            created_at: now,
            updated_at: now,
        })
    }

    /// Get a task by ID.
    pub async fn get_task_by_id(&self, id: i64) -> Result<Option<Task>> {
        let mut rows = self
            .conn
            .query(
                &format!("{TASK_COLUMNS} WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| FeedloomError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_task(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(FeedloomError::Storage(e.to_string())),
        }
    }

    /// Get a task by name.
    pub async fn get_task_by_name(&self, name: &str) -> Result<Option<Task>> {
        let mut rows = self
            .conn
            .query(
                &format!("{TASK_COLUMNS} WHERE name = ?1"),
                params![name],
            )
            .await
            .map_err(|e| FeedloomError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_task(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(FeedloomError::Storage(e.to_string())),
        }
    }

    /// List all tasks, oldest first.
    pub async fn get_all_tasks(&self) -> Result<Vec<Task>> {
        let mut rows = self
            .conn
            .query(&format!("{TASK_COLUMNS} ORDER BY id"), params![])
            .await
            .map_err(|e| FeedloomError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_task(&row)?);
        }
        Ok(results)
    }

    /// Delete a task by ID. Returns whether a row was removed.
    pub async fn delete_task(&self, id: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![id])
            .await
            .map_err(|e| FeedloomError::Storage(e.to_string()))?;
        Ok(changed > 0)
    }

    /// Update a task's lifecycle status.
    pub async fn update_task_status(&self, id: i64, status: TaskStatus) -> Result<()> {
        self.conn
            .execute(
                "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), Utc::now().to_rfc3339(), id],
            )
            .await
            .map_err(|e| FeedloomError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Update a task's status and clear or set its one-shot flag together.
    /// A finished immediate run clears the flag so reconciliation does not
    /// fire it again.
    pub async fn update_task_status_and_immediate(
        &self,
        id: i64,
        status: TaskStatus,
        immediate: bool,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE tasks SET status = ?1, immediate = ?2, updated_at = ?3 WHERE id = ?4",
                params![status.as_str(), immediate as i64, Utc::now().to_rfc3339(), id],
            )
            .await
            .map_err(|e| FeedloomError::Storage(e.to_string()))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Transform output operations
    // -----------------------------------------------------------------------

    /// Write a batch of transform records. Conflicting (task, article) pairs
    /// are silently skipped. Returns the number of rows actually written.
    pub async fn write_rss_items_to_transformed(
        &self,
        records: &[RssTransformed],
    ) -> Result<usize> {
        let now = Utc::now().to_rfc3339();
        let mut written = 0;

        for record in records {
            let transformed_json = serde_json::to_string(&record.item_transformed_info)
                .map_err(|e| FeedloomError::Storage(e.to_string()))?;
            let changed = self
                .conn
                .execute(
                    "INSERT INTO rss_transformed
                       (rss_item_id, task_id, unique_article_id, item_url,
                        item_transformed_info, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(task_id, unique_article_id) DO NOTHING",
                    params![
                        record.rss_item_id,
                        record.task_id,
                        record.unique_article_id.as_str(),
                        record.item_url.as_str(),
                        transformed_json.as_str(),
                        now.as_str(),
                    ],
                )
                .await
                .map_err(|e| FeedloomError::Storage(e.to_string()))?;
            written += changed as usize;
        }

        Ok(written)
    }

    /// List all transform records produced by a task, oldest first.
    pub async fn list_transformed_by_task(&self, task_id: i64) -> Result<Vec<RssTransformed>> {
        let mut rows = self
            .conn
            .query(
                "SELECT rss_item_id, task_id, unique_article_id, item_url, item_transformed_info
                 FROM rss_transformed WHERE task_id = ?1 ORDER BY id",
                params![task_id],
            )
            .await
            .map_err(|e| FeedloomError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_transformed(&row)?);
        }
        Ok(results)
    }
}

const TASK_COLUMNS: &str = "SELECT id, name, schedule, task_type, function_name, task_data, \
     rss_source_id, rss_source_url, rss_item_tag, immediate, status, created_at, updated_at \
     FROM tasks";

// ---------------------------------------------------------------------------
// Row conversions
// ---------------------------------------------------------------------------

fn get_string(row: &libsql::Row, idx: i32) -> Result<String> {
    row.get::<String>(idx)
        .map_err(|e| FeedloomError::Storage(e.to_string()))
}

fn get_i64(row: &libsql::Row, idx: i32) -> Result<i64> {
    row.get::<i64>(idx)
        .map_err(|e| FeedloomError::Storage(e.to_string()))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| FeedloomError::Storage(format!("invalid date: {e}")))
}

fn parse_json(s: &str) -> Result<serde_json::Value> {
    serde_json::from_str(s).map_err(|e| FeedloomError::Storage(format!("invalid json: {e}")))
}

fn row_to_source(row: &libsql::Row) -> Result<RssSource> {
    Ok(RssSource {
        id: get_i64(row, 0)?,
        source_url: get_string(row, 1)?,
        custom_name: get_string(row, 2)?,
        feed_type: get_string(row, 3)?
            .parse()
            .map_err(FeedloomError::Storage)?,
        created_at: parse_datetime(&get_string(row, 4)?)?,
    })
}

fn row_to_item(row: &libsql::Row) -> Result<RssItem> {
    Ok(RssItem {
        id: get_i64(row, 0)?,
        rss_source_id: get_i64(row, 1)?,
        item_url: get_string(row, 2)?,
        item_origin_info: parse_json(&get_string(row, 3)?)?,
        unique_article_id: get_string(row, 4)?,
        feed_type: get_string(row, 5)?
            .parse()
            .map_err(FeedloomError::Storage)?,
    })
}

fn row_to_task(row: &libsql::Row) -> Result<Task> {
    let tags: Vec<String> = serde_json::from_str(&get_string(row, 8)?)
        .map_err(|e| FeedloomError::Storage(format!("invalid tag list: {e}")))?;
    Ok(Task {
        id: get_i64(row, 0)?,
        name: get_string(row, 1)?,
        schedule: get_string(row, 2)?,
        task_type: get_string(row, 3)?
            .parse()
            .map_err(FeedloomError::Storage)?,
        function_name: get_string(row, 4)?,
        task_data: parse_json(&get_string(row, 5)?)?,
        rss_source_id: get_i64(row, 6)?,
        rss_source_url: get_string(row, 7)?,
        rss_item_tag: tags,
        immediate: get_i64(row, 9)? != 0,
        status: get_string(row, 10)?
            .parse()
            .map_err(FeedloomError::Storage)?,
        created_at: parse_datetime(&get_string(row, 11)?)?,
        updated_at: parse_datetime(&get_string(row, 12)?)?,
    })
}

fn row_to_transformed(row: &libsql::Row) -> Result<RssTransformed> {
    Ok(RssTransformed {
        rss_item_id: get_i64(row, 0)?,
        task_id: get_i64(row, 1)?,
        unique_article_id: get_string(row, 2)?,
        item_url: get_string(row, 3)?,
        item_transformed_info: parse_json(&get_string(row, 4)?)?,
    })
}
