//! CLI command definitions, routing, and tracing setup.

use std::path::Path;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use tracing::{info, warn};
use url::Url;

use feedloom_core::{
    Pipeline, PipelineConfig, Scheduler, TaskRegistry, TokioCronSpawner, validate_schedule,
};
use feedloom_shared::{
    AppConfig, FeedType, NewRssItem, TaskType, expand_home, init_config, load_config,
    parse_timezone, tagtree, unique_article_id, validate_api_key,
};
use feedloom_storage::{NewTask, Storage};
use feedloom_transform::OpenAiTransformer;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Feedloom — scheduled feed translation and summarization.
#[derive(Parser)]
#[command(
    name = "feedloom",
    version,
    about = "Run cron-scheduled translate/summarize tasks over subscribed feeds.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Task type argument.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum TaskTypeArg {
    Translate,
    Summarize,
}

impl From<TaskTypeArg> for TaskType {
    fn from(arg: TaskTypeArg) -> Self {
        match arg {
            TaskTypeArg::Translate => TaskType::Translate,
            TaskTypeArg::Summarize => TaskType::Summarize,
        }
    }
}

/// Feed type argument.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum FeedTypeArg {
    Rss2,
    Atom,
}

impl From<FeedTypeArg> for FeedType {
    fn from(arg: FeedTypeArg) -> Self {
        match arg {
            FeedTypeArg::Rss2 => FeedType::Rss2,
            FeedTypeArg::Atom => FeedType::Atom,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the scheduler until interrupted.
    Serve,

    /// Task management.
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Feed source management.
    Source {
        #[command(subcommand)]
        action: SourceAction,
    },

    /// Feed item operations.
    Items {
        #[command(subcommand)]
        action: ItemsAction,
    },

    /// Inspect transform output.
    Transformed {
        #[command(subcommand)]
        action: TransformedAction,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Task subcommands.
#[derive(Subcommand)]
pub(crate) enum TaskAction {
    /// Create a task.
    Add {
        /// Unique task name.
        #[arg(long)]
        name: String,

        /// Cron expression with seconds (e.g. "0 0 * * * *").
        #[arg(long)]
        schedule: String,

        /// Transform variant.
        #[arg(long = "type", value_name = "TYPE")]
        task_type: TaskTypeArg,

        /// URL of the subscribed feed source.
        #[arg(long)]
        source: String,

        /// Content field to transform (repeatable). Defaults to the feed
        /// type's primary content field.
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Variant config as JSON (model, languages, custom prompt, ...).
        #[arg(long, default_value = "{}")]
        data: String,

        /// Request a one-shot run at the next reconciliation.
        #[arg(long)]
        immediate: bool,
    },

    /// List all tasks.
    List,

    /// Delete a task by ID.
    Delete {
        /// Task ID.
        id: i64,
    },

    /// Run a task once, now.
    Run {
        /// Task ID.
        id: i64,
    },
}

/// Source subcommands.
#[derive(Subcommand)]
pub(crate) enum SourceAction {
    /// Subscribe a feed source.
    Add {
        /// Feed URL.
        url: String,

        /// Display name (defaults to the URL's hostname).
        #[arg(long)]
        name: Option<String>,

        /// Feed protocol.
        #[arg(long, default_value = "rss2")]
        feed_type: FeedTypeArg,
    },

    /// List subscribed sources.
    List,
}

/// Item subcommands.
#[derive(Subcommand)]
pub(crate) enum ItemsAction {
    /// Import parsed feed items from a JSON file (array of item trees).
    Import {
        /// Path to the JSON file.
        file: String,

        /// URL of the source the items belong to.
        #[arg(long)]
        source: String,
    },
}

/// Transformed output subcommands.
#[derive(Subcommand)]
pub(crate) enum TransformedAction {
    /// List output records of a task.
    List {
        /// Task ID.
        #[arg(long)]
        task: i64,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "feedloom=info",
        1 => "feedloom=debug",
        _ => "feedloom=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve => cmd_serve().await,
        Command::Task { action } => match action {
            TaskAction::Add {
                name,
                schedule,
                task_type,
                source,
                tags,
                data,
                immediate,
            } => cmd_task_add(&name, &schedule, task_type, &source, tags, &data, immediate).await,
            TaskAction::List => cmd_task_list().await,
            TaskAction::Delete { id } => cmd_task_delete(id).await,
            TaskAction::Run { id } => cmd_task_run(id).await,
        },
        Command::Source { action } => match action {
            SourceAction::Add {
                url,
                name,
                feed_type,
            } => cmd_source_add(&url, name.as_deref(), feed_type).await,
            SourceAction::List => cmd_source_list().await,
        },
        Command::Items { action } => match action {
            ItemsAction::Import { file, source } => cmd_items_import(&file, &source).await,
        },
        Command::Transformed { action } => match action {
            TransformedAction::List { task } => cmd_transformed_list(task).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Shared setup
// ---------------------------------------------------------------------------

async fn open_storage(config: &AppConfig) -> Result<Arc<Storage>> {
    let path = expand_home(&config.defaults.database_path);
    Ok(Arc::new(Storage::open(&path).await?))
}

/// Build the pipeline + scheduler pair used by `serve` and `task run`.
fn build_scheduler(config: &AppConfig, storage: Arc<Storage>) -> Result<Scheduler> {
    let timezone = parse_timezone(config)?;
    let transformer = Arc::new(OpenAiTransformer::new(&config.transformer)?);
    let registry = Arc::new(TaskRegistry::with_defaults(transformer));
    let pipeline = Arc::new(Pipeline::new(
        storage.clone(),
        registry,
        PipelineConfig {
            chunk_max_len: config.defaults.chunk_max_len,
            item_concurrency: config.defaults.item_concurrency,
        },
    ));
    let spawner = Arc::new(TokioCronSpawner::new(timezone));
    Ok(Scheduler::new(storage, pipeline, spawner))
}

// ---------------------------------------------------------------------------
// serve
// ---------------------------------------------------------------------------

async fn cmd_serve() -> Result<()> {
    let config = load_config()?;
    validate_api_key(&config)?;

    let storage = open_storage(&config).await?;
    let scheduler = build_scheduler(&config, storage)?;
    let resync = std::time::Duration::from_secs(config.defaults.resync_interval_secs);

    info!(
        timezone = %config.defaults.timezone,
        resync_secs = resync.as_secs(),
        "scheduler started"
    );

    loop {
        if let Err(e) = scheduler.reconcile().await {
            warn!(error = %e, "reconciliation pass failed");
        }

        tokio::select! {
            _ = tokio::time::sleep(resync) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                scheduler.shutdown().await;
                return Ok(());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// task
// ---------------------------------------------------------------------------

async fn cmd_task_add(
    name: &str,
    schedule: &str,
    task_type: TaskTypeArg,
    source_url: &str,
    tags: Vec<String>,
    data: &str,
    immediate: bool,
) -> Result<()> {
    validate_schedule(schedule)?;
    let task_data: serde_json::Value =
        serde_json::from_str(data).map_err(|e| eyre!("--data is not valid JSON: {e}"))?;

    let config = load_config()?;
    let storage = open_storage(&config).await?;

    let source = storage
        .get_rss_source_by_url(source_url)
        .await?
        .ok_or_else(|| eyre!("no subscribed source with URL '{source_url}'"))?;

    let task = storage
        .create_task(NewTask {
            name: name.to_string(),
            schedule: schedule.to_string(),
            task_type: task_type.into(),
            function_name: None,
            task_data,
            rss_source_id: source.id,
            rss_item_tag: tags,
            immediate,
        })
        .await?;

    println!("Created task {} '{}'", task.id, task.name);
    println!("  Type:     {}", task.task_type);
    println!("  Schedule: {}", task.schedule);
    println!("  Source:   {}", task.rss_source_url);
    if task.immediate {
        println!("  A one-shot run fires at the next reconciliation.");
    }

    Ok(())
}

async fn cmd_task_list() -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    let tasks = storage.get_all_tasks().await?;

    if tasks.is_empty() {
        println!("No tasks defined.");
        return Ok(());
    }

    for task in tasks {
        println!(
            "{:>4}  {:<20}  {:<9}  {:<15}  {:<11}  {}",
            task.id, task.name, task.task_type, task.schedule, task.status, task.rss_source_url
        );
    }

    Ok(())
}

async fn cmd_task_delete(id: i64) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;

    if storage.delete_task(id).await? {
        println!("Deleted task {id}");
        Ok(())
    } else {
        Err(eyre!("no task with ID {id}"))
    }
}

async fn cmd_task_run(id: i64) -> Result<()> {
    let config = load_config()?;
    validate_api_key(&config)?;

    let storage = open_storage(&config).await?;
    let scheduler = build_scheduler(&config, storage)?;

    let report = scheduler.run_immediate(id).await?;

    println!("Task {id} run complete");
    println!("  Pending items: {}", report.items_seen);
    println!("  Transformed:   {}", report.items_transformed);
    println!("  Failed:        {}", report.items_failed);
    println!("  Written:       {}", report.records_written);
    println!("  Time:          {:.1}s", report.elapsed.as_secs_f64());

    Ok(())
}

// ---------------------------------------------------------------------------
// source
// ---------------------------------------------------------------------------

async fn cmd_source_add(url: &str, name: Option<&str>, feed_type: FeedTypeArg) -> Result<()> {
    let parsed = Url::parse(url).map_err(|e| eyre!("invalid URL '{url}': {e}"))?;
    let display_name = name
        .map(String::from)
        .unwrap_or_else(|| parsed.host_str().unwrap_or("unknown").to_string());

    let config = load_config()?;
    let storage = open_storage(&config).await?;
    let source = storage
        .create_rss_source(url, &display_name, feed_type.into())
        .await?;

    println!("Subscribed source {} '{}'", source.id, source.custom_name);
    println!("  URL:  {}", source.source_url);
    println!("  Type: {}", source.feed_type.as_str());

    Ok(())
}

async fn cmd_source_list() -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;
    let sources = storage.list_rss_sources().await?;

    if sources.is_empty() {
        println!("No sources subscribed.");
        return Ok(());
    }

    for source in sources {
        println!(
            "{:>4}  {:<20}  {:<5}  {}",
            source.id,
            source.custom_name,
            source.feed_type.as_str(),
            source.source_url
        );
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// items
// ---------------------------------------------------------------------------

async fn cmd_items_import(file: &str, source_url: &str) -> Result<()> {
    let content = std::fs::read_to_string(Path::new(file))
        .map_err(|e| eyre!("cannot read '{file}': {e}"))?;
    let trees: Vec<serde_json::Value> = serde_json::from_str(&content)
        .map_err(|e| eyre!("'{file}' is not a JSON array of item trees: {e}"))?;

    let config = load_config()?;
    let storage = open_storage(&config).await?;
    let source = storage
        .get_rss_source_by_url(source_url)
        .await?
        .ok_or_else(|| eyre!("no subscribed source with URL '{source_url}'"))?;

    let mut items = Vec::new();
    let mut missing_link = 0;
    for tree in trees {
        let Some(link) = item_link(&tree) else {
            missing_link += 1;
            continue;
        };
        let content = tagtree::extract_tag_text(&tree, source.feed_type.default_content_tag());
        items.push(NewRssItem {
            unique_article_id: unique_article_id(&link, &content),
            item_url: link,
            item_origin_info: tree,
            feed_type: source.feed_type,
        });
    }

    if missing_link > 0 {
        warn!(count = missing_link, "items without a link were skipped");
    }

    let report = storage.create_rss_items(source.id, &items).await?;
    println!(
        "Imported {} items ({} already known, {} without link)",
        report.created, report.skipped, missing_link
    );

    Ok(())
}

/// Resolve an item's article URL: a plain `link` value, or the `href`
/// attribute of an Atom-style `<link/>` element.
fn item_link(tree: &serde_json::Value) -> Option<String> {
    let text = tagtree::extract_tag_text(tree, "link");
    if !text.trim().is_empty() {
        return Some(text);
    }

    tree.get("link")
        .and_then(|link| link.get(tagtree::ATTRIBUTES_KEY))
        .and_then(|attrs| attrs.get("href"))
        .and_then(|href| href.as_str())
        .map(String::from)
}

// ---------------------------------------------------------------------------
// transformed
// ---------------------------------------------------------------------------

async fn cmd_transformed_list(task_id: i64) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config).await?;

    let task = storage
        .get_task_by_id(task_id)
        .await?
        .ok_or_else(|| eyre!("no task with ID {task_id}"))?;
    let records = storage.list_transformed_by_task(task_id).await?;

    println!("Task {} '{}': {} records", task.id, task.name, records.len());
    for record in records {
        println!(
            "  item {:>4}  {}  {}",
            record.rss_item_id,
            &record.unique_article_id[..12.min(record.unique_article_id.len())],
            record.item_url
        );
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn item_link_prefers_plain_text() {
        let tree = json!({"link": "https://example.com/post"});
        assert_eq!(item_link(&tree).as_deref(), Some("https://example.com/post"));
    }

    #[test]
    fn item_link_falls_back_to_href_attribute() {
        let tree = json!({"link": {"attributes": {"href": "https://example.com/atom-post"}}});
        assert_eq!(
            item_link(&tree).as_deref(),
            Some("https://example.com/atom-post")
        );
    }

    #[test]
    fn item_link_missing_is_none() {
        assert_eq!(item_link(&json!({"title": "no link"})), None);
    }
}
