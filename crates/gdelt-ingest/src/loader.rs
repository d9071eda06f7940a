//! Chunked loading of staged files into the record store
//!
//! A blocking reader thread tokenizes the staged file (plain TSV or the first
//! entry of a zip archive) and hands over batches of `chunk_size` rows through
//! a channel of capacity one, so at most two batches are held in memory. Each
//! batch is inserted in its own transaction; a failed batch is logged and the
//! next one proceeds.
//!
//! The staged file is removed only when every batch committed. Anything else
//! (failed batch, read error, interruption) leaves it on disk for the next
//! run, which will skip the download and retry the load.

use crate::error::{IngestError, Result};
use crate::record_type::RecordType;
use crate::schema::{Row, TableSchema};
use crate::store::RecordStore;
use csv::{ByteRecord, ReaderBuilder};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct Batch {
    index: usize,
    rows: Vec<Row>,
    rejected: u64,
}

/// How a load ended
#[derive(Debug)]
pub enum LoadOutcome {
    /// Every batch committed and the staged file was removed
    Loaded,
    /// At least one batch was rolled back; the staged file was kept
    BatchesFailed,
    /// The file could not be read to the end; the staged file was kept
    ReadFailed(IngestError),
    /// Shutdown was requested; the staged file was kept
    Interrupted,
}

#[derive(Debug)]
pub struct LoadReport {
    pub outcome: LoadOutcome,
    pub batches_committed: u64,
    pub batches_failed: u64,
    pub rows_submitted: u64,
    pub rows_inserted: u64,
    pub rows_rejected: u64,
}

impl LoadReport {
    fn new() -> Self {
        Self {
            outcome: LoadOutcome::Loaded,
            batches_committed: 0,
            batches_failed: 0,
            rows_submitted: 0,
            rows_inserted: 0,
            rows_rejected: 0,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.outcome, LoadOutcome::Loaded)
    }
}

pub struct ChunkedLoader<S: ?Sized> {
    store: Arc<S>,
    chunk_size: usize,
}

impl<S> ChunkedLoader<S>
where
    S: RecordStore + ?Sized + 'static,
{
    pub fn new(store: Arc<S>, chunk_size: usize) -> Self {
        Self {
            store,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Load `path` into the table for `record_type`
    pub async fn load(
        &self,
        path: &Path,
        record_type: RecordType,
        shutdown: &CancellationToken,
    ) -> LoadReport {
        let schema = record_type.schema();
        let file = path.display().to_string();
        let mut report = LoadReport::new();

        info!(file = %file, table = schema.name, "Processing staged file");

        let (tx, mut rx) = mpsc::channel(1);
        let reader_path = path.to_path_buf();
        let chunk_size = self.chunk_size;
        let reader = tokio::task::spawn_blocking(move || {
            read_batches(&reader_path, schema, chunk_size, &tx);
        });

        let mut read_error = None;
        while let Some(message) = rx.recv().await {
            let batch: Batch = match message {
                Ok(batch) => batch,
                Err(e) => {
                    read_error = Some(e);
                    break;
                },
            };

            report.rows_rejected += batch.rejected;
            // Trailing rejects arrive without rows; there is nothing to insert.
            if batch.rows.is_empty() {
                continue;
            }
            report.rows_submitted += batch.rows.len() as u64;

            match self.store.insert_batch(schema, &batch.rows).await {
                Ok(inserted) => {
                    report.batches_committed += 1;
                    report.rows_inserted += inserted;
                    debug!(
                        file = %file,
                        table = schema.name,
                        batch = batch.index,
                        rows = batch.rows.len(),
                        inserted,
                        "Batch committed"
                    );
                },
                Err(e) => {
                    report.batches_failed += 1;
                    error!(
                        file = %file,
                        table = schema.name,
                        batch = batch.index,
                        rows = batch.rows.len(),
                        error = %e,
                        "Batch rolled back"
                    );
                },
            }

            if shutdown.is_cancelled() {
                report.outcome = LoadOutcome::Interrupted;
                break;
            }
        }

        // Unblocks the reader if we stopped early.
        drop(rx);
        if let Err(e) = reader.await {
            read_error.get_or_insert_with(|| IngestError::file_format(path, e));
        }

        if let Some(e) = read_error {
            error!(file = %file, table = schema.name, error = %e, "Load aborted, keeping staged file");
            report.outcome = LoadOutcome::ReadFailed(e);
            return report;
        }

        if matches!(report.outcome, LoadOutcome::Interrupted) {
            warn!(file = %file, "Load interrupted by shutdown, keeping staged file");
            return report;
        }

        if report.batches_failed > 0 {
            report.outcome = LoadOutcome::BatchesFailed;
            warn!(
                file = %file,
                table = schema.name,
                batches_failed = report.batches_failed,
                "Some batches failed, keeping staged file"
            );
            return report;
        }

        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!(file = %file, error = %e, "Could not remove staged file");
        }

        info!(
            file = %file,
            table = schema.name,
            batches = report.batches_committed,
            rows = report.rows_inserted,
            rejected = report.rows_rejected,
            "Staged file loaded"
        );
        report
    }
}

type BatchSender = mpsc::Sender<Result<Batch>>;

fn is_zip(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

/// Runs on a blocking thread; every outcome is reported through `tx`
fn read_batches(path: &Path, schema: &'static TableSchema, chunk_size: usize, tx: &BatchSender) {
    let result = if is_zip(path) {
        read_zip(path, schema, chunk_size, tx)
    } else {
        File::open(path)
            .map_err(IngestError::from)
            .and_then(|file| stream_records(BufReader::new(file), path, schema, chunk_size, tx))
    };

    if let Err(e) = result {
        // Receiver gone means the load already stopped; nothing left to report.
        let _ = tx.blocking_send(Err(e));
    }
}

fn read_zip(path: &Path, schema: &'static TableSchema, chunk_size: usize, tx: &BatchSender) -> Result<()> {
    let file = File::open(path)?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file))
        .map_err(|e| IngestError::file_format(path, e))?;

    let index = (0..archive.len())
        .find(|&i| archive.by_index(i).map(|entry| entry.is_file()).unwrap_or(false))
        .ok_or_else(|| IngestError::file_format(path, "zip archive has no file entries"))?;

    let entry = archive
        .by_index(index)
        .map_err(|e| IngestError::file_format(path, e))?;
    stream_records(entry, path, schema, chunk_size, tx)
}

fn stream_records<R: Read>(
    reader: R,
    path: &Path,
    schema: &'static TableSchema,
    chunk_size: usize,
    tx: &BatchSender,
) -> Result<()> {
    let mut csv = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_reader(reader);

    let mut record = ByteRecord::new();
    let mut rows = Vec::with_capacity(chunk_size.min(16_384));
    let mut rejected = 0u64;
    let mut index = 0usize;
    let mut line = 0u64;

    loop {
        let more = csv
            .read_byte_record(&mut record)
            .map_err(|e| IngestError::file_format(path, e))?;
        if !more {
            break;
        }
        line += 1;

        match Row::from_record(schema, &record) {
            Ok(row) => rows.push(row),
            Err(mismatch) => {
                rejected += 1;
                debug!(file = %path.display(), line, error = %mismatch, "Row rejected");
            },
        }

        if rows.len() >= chunk_size {
            if !send_batch(tx, index, std::mem::take(&mut rows), rejected, path) {
                return Ok(());
            }
            index += 1;
            rejected = 0;
        }
    }

    if !rows.is_empty() || rejected > 0 {
        send_batch(tx, index, rows, rejected, path);
    }
    Ok(())
}

fn send_batch(tx: &BatchSender, index: usize, rows: Vec<Row>, rejected: u64, path: &Path) -> bool {
    if rejected > 0 {
        warn!(file = %path.display(), batch = index, rejected, "Rows with wrong field count skipped");
    }
    tx.blocking_send(Ok(Batch { index, rows, rejected })).is_ok()
}

/// Local staging path for a feed file name
pub fn staged_path(data_dir: &Path, file_name: &str) -> PathBuf {
    data_dir.join(file_name)
}
