//! Job queue engine.
//!
//! Submitted images move through `pending -> processing -> complete | error`.
//! A run snapshots the pending items in submission order and analyzes them
//! one at a time; one item's failure never stops the others. Raw image bytes
//! are held only in this engine's memory, never in the store.

mod thumbnail;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::adapters::{AdapterError, AdapterRegistry, ImageData, VisionAdapter};
use crate::config::QueueConfig;
use crate::store::{Image, QueueItem, QueueStatus, Store, StoreError};
use crate::tasks::{notify, TaskProgress, TaskUpdate};

pub use thumbnail::{derive_thumbnail, ThumbnailError};

/// Recorded on items whose bytes did not survive a restart.
pub const STALE_PAYLOAD_MESSAGE: &str = "Image data is no longer available; add the file again";

/// Recorded on items found mid-analysis when the engine starts.
pub const INTERRUPTED_MESSAGE: &str = "Interrupted before analysis finished";

#[derive(Debug, Error)]
pub enum QueueError {
    /// The run was refused before any item changed state.
    #[error(transparent)]
    Configuration(AdapterError),

    #[error("queue item {id} is {status}; only failed items can be retried")]
    NotRetryable { id: String, status: QueueStatus },

    #[error("failed to create thumbnail for {filename}: {source}")]
    Thumbnail {
        filename: String,
        #[source]
        source: ThumbnailError,
    },

    /// The item's image bytes are gone, so it cannot be analysed.
    #[error("Image data is no longer available; add the file again")]
    StalePayload { id: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct QueueOptions {
    pub completion_grace: Duration,
    pub thumbnail_size: u32,
    pub analysis_max_dimension: u32,
}

impl Default for QueueOptions {
    fn default() -> Self {
        QueueOptions::from(&QueueConfig::default())
    }
}

impl From<&QueueConfig> for QueueOptions {
    fn from(config: &QueueConfig) -> Self {
        Self {
            completion_grace: config.completion_grace(),
            thumbnail_size: config.thumbnail_size,
            analysis_max_dimension: config.analysis_max_dimension,
        }
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub processed: usize,
    pub failed: usize,
    /// The run stopped early at the caller's request.
    pub stopped: bool,
    /// Library images created (or re-analyzed), in order.
    pub image_ids: Vec<String>,
}

impl RunReport {
    pub fn summary(&self) -> String {
        if self.failed > 0 {
            format!("{} processed, {} failed", self.processed, self.failed)
        } else {
            format!("{} images processed", self.processed)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub complete: usize,
    pub error: usize,
}

/// Result of submitting a group of files.
#[derive(Debug, Default)]
pub struct SubmitOutcome {
    pub items: Vec<QueueItem>,
    /// Files that could not be queued, with the reason.
    pub rejected: Vec<(String, QueueError)>,
    /// Present when auto-process ran the new items.
    pub run: Option<RunReport>,
}

pub struct QueueEngine {
    payloads: HashMap<String, Vec<u8>>,
    options: QueueOptions,
}

impl QueueEngine {
    /// Create an engine over `store`. Items left in `processing` by an earlier
    /// session are moved to `error` so they can be retried.
    pub fn open(store: &Store, options: QueueOptions) -> Result<Self, QueueError> {
        let recovered = store.update_queue_items(|item| {
            if item.status == QueueStatus::Processing {
                item.status = QueueStatus::Error;
                item.error_message = Some(INTERRUPTED_MESSAGE.to_string());
                true
            } else {
                false
            }
        })?;
        if recovered > 0 {
            tracing::warn!(count = recovered, "Recovered queue items from an interrupted run");
        }

        Ok(Self {
            payloads: HashMap::new(),
            options,
        })
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    pub fn has_payload(&self, id: &str) -> bool {
        self.payloads.contains_key(id)
    }

    /// Image bytes held for a queue item.
    pub fn payload(&self, id: &str) -> Result<&[u8], QueueError> {
        self.payloads
            .get(id)
            .map(Vec::as_slice)
            .ok_or_else(|| QueueError::StalePayload { id: id.to_string() })
    }

    /// Queue one image. Nothing is stored if the thumbnail cannot be made.
    pub fn enqueue(
        &mut self,
        store: &Store,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<QueueItem, QueueError> {
        let thumbnail = derive_thumbnail(&bytes, self.options.thumbnail_size).map_err(|source| {
            QueueError::Thumbnail {
                filename: filename.to_string(),
                source,
            }
        })?;

        let item = QueueItem::new(filename, thumbnail);
        store.push_queue_item(item.clone())?;
        self.payloads.insert(item.id.clone(), bytes);

        tracing::debug!(id = %item.id, filename, "Queued image");
        Ok(item)
    }

    /// Queue a group of files, then run them if auto-process is on.
    ///
    /// Only items created by this call are run; items that were already
    /// pending wait for an explicit [`QueueEngine::process_all`].
    pub fn submit(
        &mut self,
        store: &Store,
        registry: &AdapterRegistry,
        files: Vec<(String, Vec<u8>)>,
    ) -> Result<SubmitOutcome, QueueError> {
        let mut outcome = SubmitOutcome::default();

        for (filename, bytes) in files {
            match self.enqueue(store, &filename, bytes) {
                Ok(item) => outcome.items.push(item),
                Err(QueueError::Store(e)) => return Err(QueueError::Store(e)),
                Err(e) => {
                    tracing::warn!(filename = %filename, error = %e, "Rejected submission");
                    outcome.rejected.push((filename, e));
                }
            }
        }

        if outcome.items.is_empty() || !store.auto_process()? {
            return Ok(outcome);
        }

        let selection = registry.selected(store)?.ok_or_else(|| {
            QueueError::Configuration(AdapterError::Configuration {
                adapter: "registry",
                reason: "no adapter is registered for the selected backend".to_string(),
            })
        })?;

        let only: HashSet<String> = outcome.items.iter().map(|item| item.id.clone()).collect();
        let report = self.run(store, selection.adapter, &selection.model, Some(&only), None, None)?;
        outcome.run = Some(report);
        Ok(outcome)
    }

    /// Process every pending item, oldest first.
    pub fn process_all(
        &mut self,
        store: &Store,
        adapter: &dyn VisionAdapter,
        model: &str,
    ) -> Result<RunReport, QueueError> {
        self.run(store, adapter, model, None, None, None)
    }

    /// [`QueueEngine::process_all`] reporting through `tx` and checking
    /// `cancel_flag` between items.
    pub fn process_all_cancellable(
        &mut self,
        store: &Store,
        adapter: &dyn VisionAdapter,
        model: &str,
        tx: mpsc::Sender<TaskUpdate>,
        cancel_flag: Arc<AtomicBool>,
    ) -> Result<RunReport, QueueError> {
        self.run(store, adapter, model, None, Some(&tx), Some(cancel_flag.as_ref()))
    }

    fn run(
        &mut self,
        store: &Store,
        adapter: &dyn VisionAdapter,
        model: &str,
        only: Option<&HashSet<String>>,
        tx: Option<&mpsc::Sender<TaskUpdate>>,
        cancel_flag: Option<&AtomicBool>,
    ) -> Result<RunReport, QueueError> {
        self.sweep_completed(store)?;

        let pending: Vec<QueueItem> = store
            .queue_items()?
            .into_iter()
            .filter(|item| item.status == QueueStatus::Pending)
            .filter(|item| only.map_or(true, |ids| ids.contains(&item.id)))
            .collect();

        let total = pending.len();
        let mut report = RunReport::default();

        if total == 0 {
            notify(tx, TaskUpdate::Started { total: 0 });
            notify(
                tx,
                TaskUpdate::Completed {
                    message: "Nothing to process".to_string(),
                },
            );
            return Ok(report);
        }

        if !adapter.is_configured() {
            let err = AdapterError::Configuration {
                adapter: adapter.name(),
                reason: "add an API key or check the endpoint before processing".to_string(),
            };
            tracing::error!(adapter = adapter.name(), "Queue run refused: adapter not configured");
            notify(tx, TaskUpdate::Failed { error: err.to_string() });
            return Err(QueueError::Configuration(err));
        }

        tracing::info!(count = total, adapter = adapter.name(), model, "Starting queue run");
        notify(tx, TaskUpdate::Started { total });

        for (index, item) in pending.iter().enumerate() {
            if cancel_flag.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                tracing::info!(remaining = total - index, "Queue run stopped");
                report.stopped = true;
                notify(tx, TaskUpdate::Cancelled);
                break;
            }

            notify(
                tx,
                TaskUpdate::Progress(TaskProgress::new(index + 1, total).with_item(&item.filename)),
            );

            match self.process_item(store, adapter, model, item)? {
                Some(image_id) => {
                    report.processed += 1;
                    report.image_ids.push(image_id);
                }
                None => report.failed += 1,
            }
        }

        self.sweep_completed(store)?;

        tracing::info!(
            processed = report.processed,
            failed = report.failed,
            "Queue run finished"
        );
        if !report.stopped {
            notify(
                tx,
                TaskUpdate::Completed {
                    message: report.summary(),
                },
            );
        }
        Ok(report)
    }

    /// Analyze one item. `Ok(None)` means the item ended in `error`; `Err`
    /// means its state could not even be recorded.
    fn process_item(
        &mut self,
        store: &Store,
        adapter: &dyn VisionAdapter,
        model: &str,
        item: &QueueItem,
    ) -> Result<Option<String>, QueueError> {
        store.modify_queue_item(&item.id, |it| {
            it.status = QueueStatus::Processing;
            it.error_message = None;
        })?;

        let bytes = match self.payload(&item.id) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(id = %item.id, filename = %item.filename, "Queue item has no image data");
                self.fail_item(store, &item.id, &e.to_string())?;
                return Ok(None);
            }
        };

        let analysis = ImageData::from_bytes(bytes, self.options.analysis_max_dimension)
            .and_then(|image| adapter.analyze(&image, model));

        let result = match analysis {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(filename = %item.filename, error = %e, "Analysis failed");
                self.fail_item(store, &item.id, &e.to_string())?;
                return Ok(None);
            }
        };

        let image = Image::new(&item.filename, item.thumbnail.clone(), Some(result));
        let image_id = image.id.clone();
        match store.complete_queue_item(&item.id, image) {
            Ok(_) => {
                self.payloads.remove(&item.id);
                Ok(Some(image_id))
            }
            Err(e) => {
                tracing::error!(filename = %item.filename, error = %e, "Could not save analysis");
                self.fail_item(store, &item.id, &e.to_string())?;
                Ok(None)
            }
        }
    }

    /// Move an item to `error`. If the message does not fit the storage
    /// budget the item is still moved, without a message; that write only
    /// shrinks the record.
    fn fail_item(&self, store: &Store, id: &str, message: &str) -> Result<(), QueueError> {
        let recorded = store.modify_queue_item(id, |it| {
            it.status = QueueStatus::Error;
            it.error_message = Some(message.to_string());
        });
        match recorded {
            Ok(_) => Ok(()),
            Err(StoreError::QuotaExceeded { .. }) => {
                tracing::warn!(id, "Storage full; recording failure without a message");
                store.modify_queue_item(id, |it| {
                    it.status = QueueStatus::Error;
                    it.error_message = None;
                })?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Put a failed item back to `pending`. Does not start a run.
    pub fn retry(&mut self, store: &Store, id: &str) -> Result<QueueItem, QueueError> {
        let item = store
            .queue_item(id)?
            .ok_or_else(|| StoreError::not_found("queue item", id))?;
        if item.status != QueueStatus::Error {
            return Err(QueueError::NotRetryable {
                id: id.to_string(),
                status: item.status,
            });
        }

        let item = store.modify_queue_item(id, |it| {
            it.status = QueueStatus::Pending;
            it.error_message = None;
        })?;
        Ok(item)
    }

    /// Put every failed item back to `pending`. Returns how many.
    pub fn retry_all_failed(&mut self, store: &Store) -> Result<usize, QueueError> {
        let count = store.update_queue_items(|item| {
            if item.status == QueueStatus::Error {
                item.status = QueueStatus::Pending;
                item.error_message = None;
                true
            } else {
                false
            }
        })?;
        Ok(count)
    }

    pub fn remove(&mut self, store: &Store, id: &str) -> Result<bool, QueueError> {
        self.payloads.remove(id);
        Ok(store.retain_queue_items(|item| item.id != id)? > 0)
    }

    pub fn clear(&mut self, store: &Store) -> Result<(), QueueError> {
        self.payloads.clear();
        store.clear_queue_items()?;
        Ok(())
    }

    /// Current items, after sweeping finished ones.
    pub fn items(&self, store: &Store) -> Result<Vec<QueueItem>, QueueError> {
        self.sweep_completed(store)?;
        Ok(store.queue_items()?)
    }

    pub fn stats(&self, store: &Store) -> Result<QueueStats, QueueError> {
        let items = self.items(store)?;
        let mut stats = QueueStats {
            total: items.len(),
            ..Default::default()
        };
        for item in &items {
            match item.status {
                QueueStatus::Pending => stats.pending += 1,
                QueueStatus::Processing => stats.processing += 1,
                QueueStatus::Complete => stats.complete += 1,
                QueueStatus::Error => stats.error += 1,
            }
        }
        Ok(stats)
    }

    pub fn sweep_completed(&self, store: &Store) -> Result<usize, QueueError> {
        self.sweep_completed_before(store, Utc::now())
    }

    /// Remove completed items whose grace period has passed by `now`.
    pub fn sweep_completed_before(
        &self,
        store: &Store,
        now: DateTime<Utc>,
    ) -> Result<usize, QueueError> {
        let grace = chrono::Duration::from_std(self.options.completion_grace)
            .unwrap_or_else(|_| chrono::Duration::zero());

        let removed = store.retain_queue_items(|item| {
            if item.status != QueueStatus::Complete {
                return true;
            }
            match item.completed_at {
                Some(done) => done + grace > now,
                None => false,
            }
        })?;
        if removed > 0 {
            tracing::debug!(count = removed, "Swept completed queue items");
        }
        Ok(removed)
    }

    /// Re-run analysis over library images from their stored thumbnails,
    /// replacing each result. Same pre-flight and isolation rules as a run.
    pub fn reanalyze(
        &self,
        store: &Store,
        adapter: &dyn VisionAdapter,
        model: &str,
        image_ids: &[String],
        tx: Option<&mpsc::Sender<TaskUpdate>>,
    ) -> Result<RunReport, QueueError> {
        let mut report = RunReport::default();
        if image_ids.is_empty() {
            return Ok(report);
        }

        if !adapter.is_configured() {
            let err = AdapterError::Configuration {
                adapter: adapter.name(),
                reason: "add an API key or check the endpoint before re-analyzing".to_string(),
            };
            notify(tx, TaskUpdate::Failed { error: err.to_string() });
            return Err(QueueError::Configuration(err));
        }

        let total = image_ids.len();
        notify(tx, TaskUpdate::Started { total });

        for (index, id) in image_ids.iter().enumerate() {
            let Some(image) = store.image(id)? else {
                tracing::warn!(id = %id, "Skipping re-analysis of missing image");
                report.failed += 1;
                continue;
            };
            notify(
                tx,
                TaskUpdate::Progress(TaskProgress::new(index + 1, total).with_item(&image.filename)),
            );

            let analysis = ImageData::from_data_url(&image.thumbnail)
                .and_then(|data| adapter.analyze(&data, model));
            match analysis {
                Ok(result) => {
                    store.attach_result(id, result)?;
                    report.processed += 1;
                    report.image_ids.push(id.clone());
                }
                Err(e) => {
                    tracing::error!(filename = %image.filename, error = %e, "Re-analysis failed");
                    report.failed += 1;
                }
            }
        }

        notify(
            tx,
            TaskUpdate::Completed {
                message: report.summary(),
            },
        );
        Ok(report)
    }
}
