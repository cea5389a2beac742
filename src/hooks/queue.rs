//! Durable FIFO of events whose dispatch failed
//!
//! One JSON record per line. Records are only ever appended at the tail; a
//! drain takes a bounded number of records from the head, redelivers them,
//! and rewrites the file atomically with the survivors.

use crate::hooks::persist::{self, FileLock, LOCK_WAIT};
use crate::hooks::{HookError, HookEvent, HookResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default cap on redelivery attempts
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// One failed event awaiting redelivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedEventRecord {
    /// Stable identity across rewrites
    pub id: String,

    /// The event as read from the host, without enrichment
    pub event: HookEvent,

    /// Why the most recent attempt failed
    pub reason: String,

    /// Failed redeliveries so far
    pub retry_count: u32,

    pub first_failed_at: DateTime<Utc>,

    pub last_attempt_at: DateTime<Utc>,
}

impl FailedEventRecord {
    pub fn new(event: HookEvent, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event: event.without_context(),
            reason: reason.into(),
            retry_count: 0,
            first_failed_at: now,
            last_attempt_at: now,
        }
    }
}

/// Snapshot of the queue
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStatus {
    pub size: usize,
    pub entries: Vec<FailedEventRecord>,
}

/// Counts from one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Records taken from the head and redelivered
    pub processed: usize,
    pub succeeded: usize,
    /// Failed again and moved to the tail
    pub requeued: usize,
    /// Failed again with no retries left
    pub dropped: usize,
    /// Queue size after the pass
    pub remaining: usize,
}

/// Called with the queue size and entries before a non-empty queue is drained
pub type BacklogObserver = Arc<dyn Fn(usize, &[FailedEventRecord]) + Send + Sync>;

/// Per-client retry queue file
#[derive(Clone)]
pub struct RetryQueue {
    path: PathBuf,
    max_retries: u32,
    dead_letter: Option<PathBuf>,
    observer: Option<BacklogObserver>,
}

impl RetryQueue {
    pub fn new(path: impl Into<PathBuf>, max_retries: u32) -> Self {
        Self {
            path: path.into(),
            max_retries,
            dead_letter: None,
            observer: None,
        }
    }

    /// Keep dropped records in a line-delimited file instead of discarding them
    pub fn with_dead_letter(mut self, path: impl Into<PathBuf>) -> Self {
        self.dead_letter = Some(path.into());
        self
    }

    /// Register the backlog observer
    pub fn with_backlog_observer(mut self, observer: BacklogObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Read every record in order; corrupt lines are skipped
    pub fn load(&self) -> HookResult<Vec<FailedEventRecord>> {
        let content = match persist::read_optional(&self.path)? {
            Some(content) => content,
            None => return Ok(Vec::new()),
        };

        let mut records = Vec::new();
        for (n, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping corrupt queue line {} in {}: {}", n + 1, self.path.display(), e),
            }
        }
        Ok(records)
    }

    fn drain_marker(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "queue".into());
        name.push(".drain");
        self.path.with_file_name(name)
    }

    fn store(&self, records: &[FailedEventRecord]) -> HookResult<()> {
        let mut content = String::new();
        for record in records {
            content.push_str(&serde_json::to_string(record)?);
            content.push('\n');
        }
        persist::write_atomic(&self.path, content.as_bytes())
    }

    /// Append a failed event to the tail
    pub async fn enqueue(&self, event: &HookEvent, reason: impl Into<String>) -> HookResult<()> {
        let record = FailedEventRecord::new(event.clone(), reason);
        let line = serde_json::to_string(&record)?;

        let _lock = FileLock::acquire_async(&self.path, LOCK_WAIT).await?;
        persist::append_line(&self.path, &line)?;
        debug!(id = %record.id, kind = %record.event.kind(), "Queued failed event");
        Ok(())
    }

    /// Size and entries
    pub fn status(&self) -> HookResult<QueueStatus> {
        let entries = self.load()?;
        Ok(QueueStatus {
            size: entries.len(),
            entries,
        })
    }

    /// Number of queued records
    pub fn len(&self) -> HookResult<usize> {
        Ok(self.load()?.len())
    }

    pub fn is_empty(&self) -> HookResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove every record, leaving an empty file. Returns how many were removed.
    pub fn clear(&self) -> HookResult<usize> {
        let _lock = FileLock::acquire(&self.path, LOCK_WAIT)?;
        let removed = self.load()?.len();
        self.store(&[])?;
        Ok(removed)
    }

    /// Redeliver up to `limit` records from the head through `redeliver`.
    ///
    /// Successes are discarded. Failures have their counter bumped and move to
    /// the tail, or are dropped once the counter reaches the retry cap. Records
    /// past `limit` keep their place.
    ///
    /// Only one drain runs at a time: a pass holds `<queue>.drain.lock`
    /// throughout and fails with [`HookError::LockTimeout`] at once if another
    /// pass holds it. The file lock is taken only to read and to write back;
    /// records are matched by id on write-back, so events queued meanwhile are
    /// kept.
    pub async fn drain<F, Fut>(&self, limit: usize, mut redeliver: F) -> HookResult<DrainReport>
    where
        F: FnMut(HookEvent) -> Fut,
        Fut: Future<Output = HookResult<()>>,
    {
        let _pass = FileLock::acquire_async(&self.drain_marker(), Duration::ZERO).await?;

        let records = {
            let _lock = FileLock::acquire_async(&self.path, LOCK_WAIT).await?;
            self.load()?
        };

        if records.is_empty() {
            return Ok(DrainReport::default());
        }

        if let Some(observer) = &self.observer {
            observer(records.len(), &records);
        }

        let head: Vec<FailedEventRecord> = records.into_iter().take(limit).collect();
        let mut report = DrainReport {
            processed: head.len(),
            ..DrainReport::default()
        };
        let taken: HashSet<String> = head.iter().map(|r| r.id.clone()).collect();
        let mut requeue = Vec::new();
        let mut dropped = Vec::new();

        for mut record in head {
            match redeliver(record.event.clone()).await {
                Ok(()) => {
                    debug!(id = %record.id, "Redelivered queued event");
                    report.succeeded += 1;
                }
                Err(e) => {
                    record.retry_count += 1;
                    record.last_attempt_at = Utc::now();
                    record.reason = e.to_string();

                    if record.retry_count >= self.max_retries {
                        info!(
                            id = %record.id,
                            kind = %record.event.kind(),
                            retries = record.retry_count,
                            "Dropping queued event after final retry: {}",
                            record.reason
                        );
                        report.dropped += 1;
                        dropped.push(record);
                    } else {
                        debug!(id = %record.id, retries = record.retry_count, "Requeueing event: {}", e);
                        report.requeued += 1;
                        requeue.push(record);
                    }
                }
            }
        }

        let _lock = FileLock::acquire_async(&self.path, LOCK_WAIT).await?;
        let mut survivors: Vec<FailedEventRecord> = self
            .load()?
            .into_iter()
            .filter(|r| !taken.contains(&r.id))
            .collect();
        survivors.extend(requeue);
        self.store(&survivors)?;
        report.remaining = survivors.len();

        if let Some(path) = &self.dead_letter {
            for record in &dropped {
                let written = serde_json::to_string(record)
                    .map_err(HookError::from)
                    .and_then(|line| persist::append_line(path, &line));
                if let Err(e) = written {
                    warn!("Failed to write dead letter {}: {}", record.id, e);
                }
            }
        }

        Ok(report)
    }
}
