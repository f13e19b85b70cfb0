//! SQL migration definitions for the Feedloom database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed within a transaction.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: rss_sources, rss_items, tasks, rss_transformed",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Subscribed feed sources
CREATE TABLE IF NOT EXISTS rss_sources (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    source_url  TEXT NOT NULL UNIQUE,
    custom_name TEXT NOT NULL,
    feed_type   TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

-- Ingested feed items, immutable after creation. Identity is scoped per
-- source: the same article syndicated by two feeds is two items.
CREATE TABLE IF NOT EXISTS rss_items (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    rss_source_id     INTEGER NOT NULL REFERENCES rss_sources(id) ON DELETE CASCADE,
    item_url          TEXT NOT NULL,
    item_origin_info  TEXT NOT NULL,
    unique_article_id TEXT NOT NULL,
    feed_type         TEXT NOT NULL,
    created_at        TEXT NOT NULL,
    UNIQUE(rss_source_id, unique_article_id)
);

CREATE INDEX IF NOT EXISTS idx_rss_items_source ON rss_items(rss_source_id);

-- Scheduled task definitions
CREATE TABLE IF NOT EXISTS tasks (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    name           TEXT NOT NULL UNIQUE,
    schedule       TEXT NOT NULL,
    task_type      TEXT NOT NULL,
    function_name  TEXT NOT NULL,
    task_data      TEXT NOT NULL,
    rss_source_id  INTEGER NOT NULL REFERENCES rss_sources(id) ON DELETE CASCADE,
    rss_source_url TEXT NOT NULL,
    rss_item_tag   TEXT NOT NULL,
    immediate      INTEGER NOT NULL DEFAULT 0,
    status         TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);

-- Per-(task, item) transform output. The UNIQUE pair is the exactly-once
-- guarantee: a task never reprocesses an item it already produced output for.
CREATE TABLE IF NOT EXISTS rss_transformed (
    id                    INTEGER PRIMARY KEY AUTOINCREMENT,
    rss_item_id           INTEGER NOT NULL REFERENCES rss_items(id) ON DELETE CASCADE,
    task_id               INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    unique_article_id     TEXT NOT NULL,
    item_url              TEXT NOT NULL,
    item_transformed_info TEXT NOT NULL,
    created_at            TEXT NOT NULL,
    UNIQUE(task_id, unique_article_id)
);

CREATE INDEX IF NOT EXISTS idx_rss_transformed_task ON rss_transformed(task_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
