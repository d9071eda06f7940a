//! Single ingestion pass
//!
//! Init → resolve watermark → fetch catalog → filter and classify →
//! concurrent fetch+load per file → drain → close the store.
//!
//! Only table creation and the catalog fetch can abort a run. Every other
//! failure is logged at file or batch scope and reflected in the
//! [`RunSummary`]. Re-running is the retry mechanism: the watermark, the
//! staged-file check and `ON CONFLICT DO NOTHING` make it safe.

use crate::catalog::{filter_new, CatalogClient, ManifestEntry};
use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::fetcher::{build_http_client, FetchStatus, Fetcher};
use crate::loader::{staged_path, ChunkedLoader};
use crate::record_type::RecordType;
use crate::store::{PgStore, RecordStore};
use crate::summary::{FileResult, RunSummary};
use crate::watermark::resolve_watermark;
use futures::{future, stream, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use url::Url;

/// A manifest entry selected for ingestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTask {
    pub entry: ManifestEntry,
    pub record_type: RecordType,
}

impl FileTask {
    pub fn file_name(&self) -> &str {
        self.entry.file_name()
    }
}

/// Filter the manifest against `watermark` and classify what remains
///
/// Unclassifiable files are dropped. Input order is preserved.
pub fn plan<'a, I>(lines: I, watermark: &str) -> Vec<FileTask>
where
    I: IntoIterator<Item = &'a str>,
{
    filter_new(lines, watermark)
        .into_iter()
        .filter_map(|entry| match RecordType::classify(&entry.url) {
            Some(record_type) => Some(FileTask { entry, record_type }),
            None => {
                debug!(url = %entry.url, "Unrecognised file type, skipping");
                None
            },
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub data_dir: PathBuf,
    pub chunk_size: usize,
    pub workers: usize,
    pub show_progress: bool,
}

impl From<&IngestConfig> for RunSettings {
    fn from(config: &IngestConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            chunk_size: config.chunk_size,
            workers: config.workers,
            show_progress: true,
        }
    }
}

/// Per-file fetch+load, shared by all concurrent tasks
#[derive(Clone)]
struct FileWorker {
    fetcher: Arc<Fetcher>,
    loader: Arc<ChunkedLoader<dyn RecordStore>>,
    data_dir: PathBuf,
}

impl FileWorker {
    async fn process(&self, task: FileTask, shutdown: CancellationToken) -> FileResult {
        let destination = staged_path(&self.data_dir, task.file_name());

        match self
            .fetcher
            .fetch(&task.entry.url, &destination, task.entry.md5())
            .await
        {
            Ok(FetchStatus::AlreadyStaged) => {
                info!(file = task.file_name(), "Using previously staged file");
            },
            Ok(FetchStatus::Downloaded { .. }) => {},
            Err(e) => {
                error!(url = %task.entry.url, error = %e, "Fetch failed, skipping file");
                return FileResult::FetchFailed;
            },
        }

        if shutdown.is_cancelled() {
            return FileResult::Skipped;
        }

        let report = self
            .loader
            .load(&destination, task.record_type, &shutdown)
            .await;
        FileResult::Loaded(report)
    }
}

pub struct Orchestrator {
    settings: RunSettings,
    store: Arc<dyn RecordStore>,
    catalog: CatalogClient,
    worker: FileWorker,
}

impl Orchestrator {
    pub fn new(
        settings: RunSettings,
        store: Arc<dyn RecordStore>,
        catalog: CatalogClient,
        fetcher: Fetcher,
    ) -> Self {
        let worker = FileWorker {
            fetcher: Arc::new(fetcher),
            loader: Arc::new(ChunkedLoader::new(store.clone(), settings.chunk_size)),
            data_dir: settings.data_dir.clone(),
        };
        Self {
            settings,
            store,
            catalog,
            worker,
        }
    }

    /// Wire up HTTP and PostgreSQL from configuration
    pub async fn from_config(config: &IngestConfig) -> Result<Self> {
        let client = build_http_client(&config.http)?;
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| IngestError::config(format!("invalid base URL: {}", e)))?;

        let catalog = CatalogClient::new(client.clone(), config.manifest_url.clone());
        let fetcher = Fetcher::new(client, base_url, config.http.max_retries);
        let store = PgStore::connect(&config.database, config.max_connections()).await?;

        Ok(Self::new(RunSettings::from(config), Arc::new(store), catalog, fetcher))
    }

    /// Create the staging directory and all destination tables
    pub async fn initialize(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.settings.data_dir).await?;

        for record_type in RecordType::ALL {
            let schema = record_type.schema();
            if let Err(e) = self.store.ensure_table(schema).await {
                error!(table = schema.name, error = %e, "Could not create table");
                return Err(e);
            }
        }
        Ok(())
    }

    pub async fn watermark(&self) -> String {
        resolve_watermark(self.store.as_ref()).await
    }

    /// Watermark plus the files a run would process, without fetching them
    pub async fn plan(&self) -> Result<(String, Vec<FileTask>)> {
        let watermark = self.watermark().await;
        let lines = self.catalog.fetch_catalog().await?;
        let tasks = plan(lines.iter().map(String::as_str), &watermark);
        Ok((watermark, tasks))
    }

    /// Execute one pass; the store is closed whatever the outcome
    pub async fn run(&self, shutdown: CancellationToken) -> Result<RunSummary> {
        let result = self
            .run_pass(shutdown)
            .instrument(info_span!("ingest_run"))
            .await;
        self.close().await;

        match &result {
            Ok(summary) => info!(
                files_selected = summary.files_selected,
                files_fetched = summary.files_fetched,
                files_loaded = summary.files_loaded,
                files_fetch_failed = summary.files_fetch_failed,
                files_load_failed = summary.files_load_failed,
                batches_committed = summary.batches_committed,
                batches_failed = summary.batches_failed,
                rows_inserted = summary.rows_inserted,
                "Ingestion run completed"
            ),
            Err(e) => error!(error = %e, "Ingestion run aborted"),
        }
        result
    }

    pub async fn close(&self) {
        self.store.close().await;
    }

    async fn run_pass(&self, shutdown: CancellationToken) -> Result<RunSummary> {
        self.initialize().await?;

        let watermark = self.watermark().await;
        let lines = self.catalog.fetch_catalog().await?;
        let tasks = plan(lines.iter().map(String::as_str), &watermark);

        info!(
            manifest_lines = lines.len(),
            selected = tasks.len(),
            watermark = %watermark,
            "Dispatching files"
        );

        let mut summary = RunSummary::new(watermark, tasks.len());
        let progress = self.progress_bar(tasks.len() as u64);

        let mut results = stream::iter(tasks)
            .take_while(|_| future::ready(!shutdown.is_cancelled()))
            .map(|task| {
                let worker = self.worker.clone();
                let token = shutdown.clone();
                let span = info_span!("ingest_file", file = %task.file_name(), table = %task.record_type);
                tokio::spawn(async move { worker.process(task, token).await }.instrument(span))
            })
            .buffer_unordered(self.settings.workers.max(1));

        while let Some(joined) = results.next().await {
            match joined {
                Ok(result) => summary.record(&result),
                Err(e) => {
                    error!(error = %e, "File task crashed");
                    summary.files_load_failed += 1;
                },
            }
            progress.inc(1);
        }

        progress.finish_and_clear();
        if shutdown.is_cancelled() {
            warn!(not_started = summary.files_not_started(), "Run stopped early by shutdown request");
        }
        Ok(summary)
    }

    fn progress_bar(&self, total: u64) -> ProgressBar {
        if !self.settings.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} files ({eta})")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar
    }
}
