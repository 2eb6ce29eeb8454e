//! Category file persistence.
//!
//! # Data Flow
//! ```text
//! FileSink::write(category, record)
//!     → bounded queue for that category (try_send, never blocks the caller)
//!     → writer task owning the category's CategoryFile
//!     → CategoryFile::append (one JSON line, lazily opened file)
//! ```
//!
//! # Design Decisions
//! - One writer task per category: writes to a given file are serialized
//!   without a lock and lines are never interleaved
//! - Queue overflow drops the newest record and reports it on the console
//! - Every append is flushed before it counts as written, so a failed write
//!   always belongs to the record that caused it
//! - Write failures are reported on the console with the record; the
//!   configured [`WriteFailurePolicy`] decides whether the record is retried
//! - Closing drains every queue, flushes, and joins the writer tasks

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::schema::{LoggingConfig, Rotation, WriteFailurePolicy};
use crate::observability::error::SinkError;
use crate::observability::record::{Category, LogRecord};

/// Extension of category files; each line is one JSON document.
pub const FILE_EXTENSION: &str = "ndjson";

struct OpenFile {
    path: PathBuf,
    writer: BufWriter<File>,
}

/// Append-only destination for a single category.
///
/// The file is chosen per record from the rotation policy and opened on first
/// use; parent directories are created if missing.
pub struct CategoryFile {
    dir: PathBuf,
    service: String,
    category: Category,
    rotation: Rotation,
    run_stamp: String,
    current: Option<OpenFile>,
}

impl CategoryFile {
    pub fn new(
        logs_dir: &Path,
        service: &str,
        category: Category,
        rotation: Rotation,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            dir: logs_dir.join(category.as_str()),
            service: service.to_string(),
            category,
            rotation,
            run_stamp: started_at.format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string(),
            current: None,
        }
    }

    /// File that a record stamped at `timestamp` belongs to.
    pub fn path_for(&self, timestamp: DateTime<Utc>) -> PathBuf {
        let stamp = match self.rotation {
            Rotation::Daily => timestamp.format("%Y-%m-%d").to_string(),
            Rotation::PerRun => self.run_stamp.clone(),
        };
        self.dir.join(format!(
            "{}-{}-{}.{}",
            self.service, self.category, stamp, FILE_EXTENSION
        ))
    }

    /// Append `record` as a single JSON line and flush it to the file.
    ///
    /// `Ok` means the line reached the file. On error nothing of the record
    /// is left buffered and the handle is reopened on the next append.
    pub async fn append(&mut self, record: &LogRecord) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let target = self.path_for(record.envelope.timestamp);
        let needs_open = match &self.current {
            Some(open) => open.path != target,
            None => true,
        };
        if needs_open {
            self.current = Some(self.open(target).await?);
        }

        let Some(open) = self.current.as_mut() else {
            return Ok(());
        };
        let written = match open.writer.write_all(&line).await {
            Ok(()) => open.writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(source) = written {
            let path = open.path.clone();
            // Discard the handle together with whatever it still buffers.
            self.current = None;
            return Err(SinkError::Io { path, source });
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), SinkError> {
        if let Some(open) = self.current.as_mut() {
            if let Err(source) = open.writer.flush().await {
                let path = open.path.clone();
                self.current = None;
                return Err(SinkError::Io { path, source });
            }
        }
        Ok(())
    }

    /// Flush and release the file handle.
    pub async fn close(&mut self) -> Result<(), SinkError> {
        let result = self.flush().await;
        self.current = None;
        result
    }

    async fn open(&self, path: PathBuf) -> Result<OpenFile, SinkError> {
        if let Err(source) = fs::create_dir_all(&self.dir).await {
            return Err(SinkError::Io {
                path: self.dir.clone(),
                source,
            });
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| SinkError::Io {
                path: path.clone(),
                source,
            })?;
        tracing::debug!(category = %self.category, path = %path.display(), "Opened category file");
        Ok(OpenFile {
            path,
            writer: BufWriter::new(file),
        })
    }
}

/// Fan-in point for category persistence.
///
/// Cheap to clone; all clones feed the same writer tasks.
#[derive(Clone)]
pub struct FileSink {
    senders: Arc<Mutex<HashMap<Category, mpsc::Sender<LogRecord>>>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl FileSink {
    /// Spawn one writer task per category. Must run inside a Tokio runtime.
    pub fn start(config: &LoggingConfig, started_at: DateTime<Utc>) -> Self {
        let capacity = config.queue_capacity.max(1);
        let mut senders = HashMap::new();
        let mut tasks = Vec::new();

        for category in Category::ALL {
            let (tx, rx) = mpsc::channel(capacity);
            let file = CategoryFile::new(
                &config.logs_dir,
                &config.service_name,
                category,
                config.rotation,
                started_at,
            );
            tasks.push(tokio::spawn(run_writer(file, rx, config.write_failure)));
            senders.insert(category, tx);
        }

        Self {
            senders: Arc::new(Mutex::new(senders)),
            tasks: Arc::new(Mutex::new(tasks)),
        }
    }

    /// Queue `record` for its category file. Returns without waiting for the
    /// write to reach the disk.
    pub fn write(&self, category: Category, record: LogRecord) -> Result<(), SinkError> {
        let sender = self.senders.lock().get(&category).cloned();
        let Some(sender) = sender else {
            return Err(SinkError::Closed { category });
        };
        sender.try_send(record).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::QueueFull { category },
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed { category },
        })
    }

    pub fn is_closed(&self) -> bool {
        self.senders.lock().is_empty()
    }

    /// Stop accepting records, drain the queues and wait for the writers.
    pub async fn close(&self) {
        // Dropping the senders lets each writer finish its backlog and exit.
        self.senders.lock().clear();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Category writer task failed");
            }
        }
    }
}

async fn run_writer(
    mut file: CategoryFile,
    mut rx: mpsc::Receiver<LogRecord>,
    policy: WriteFailurePolicy,
) {
    let mut pending: VecDeque<LogRecord> = VecDeque::new();

    while let Some(record) = rx.recv().await {
        match policy {
            WriteFailurePolicy::Drop => {
                if let Err(e) = file.append(&record).await {
                    report_dropped(&record, &e);
                }
            }
            WriteFailurePolicy::Retry { max_pending } => {
                pending.push_back(record);
                retry_pending(&mut file, &mut pending, max_pending).await;
            }
        }
    }

    if !pending.is_empty() {
        retry_pending(&mut file, &mut pending, 0).await;
    }
    if let Err(e) = file.close().await {
        tracing::error!(error = %e, "Failed to close category file");
    }
}

/// Write pending records in order until one fails. Records beyond
/// `max_pending` are dropped oldest-first.
async fn retry_pending(
    file: &mut CategoryFile,
    pending: &mut VecDeque<LogRecord>,
    max_pending: usize,
) {
    while let Some(record) = pending.front() {
        match file.append(record).await {
            Ok(()) => {
                pending.pop_front();
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    pending = pending.len(),
                    "Category write failed; record kept for retry"
                );
                break;
            }
        }
    }
    while pending.len() > max_pending {
        if let Some(oldest) = pending.pop_front() {
            report_dropped(&oldest, &SinkError::QueueFull {
                category: oldest.category(),
            });
        }
    }
}

/// Console fallback for a record that will never reach its file.
fn report_dropped(record: &LogRecord, error: &SinkError) {
    let line = serde_json::to_string(record).unwrap_or_default();
    tracing::error!(
        category = %record.category(),
        error = %error,
        record = %line,
        "Log record dropped"
    );
}
