//! Batch scheduling: drives every item through decode, removal and encode.
//!
//! A run launches a small fixed number of worker futures that pull item indices
//! from a shared cursor. The workers are joined on the caller's task, so their
//! stages interleave cooperatively at the suspension points between decode,
//! removal and encode without one slow item blocking the others.
//!
//! Every run captures its own [`RunContext`]. Starting another run, loading a
//! new batch or resetting bumps the generation counter, and workers of the
//! superseded run notice at their next suspension point and stop without
//! touching the newer state.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use futures::future::join_all;
use image::RgbaImage;
use tokio::sync::watch;

use crate::encoder::{Encoded, Encoder, OutputSpec};
use crate::engine::WatermarkEngine;
use crate::error::{Error, ItemError, Notice, Result, ValidationError};
use crate::source::{ImageDecoder, RasterDecoder, SourceFile};
use crate::store::{self, Archive, OutputHandle, ResultStore};

/// Number of concurrent workers per run.
pub const DEFAULT_WORKERS: usize = 2;

/// Maximum number of supported files per batch.
pub const MAX_BATCH_FILES: usize = 10;

/// Scheduler tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Worker futures per run (at least 1).
    pub workers: usize,
    /// Largest accepted batch.
    pub max_files: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            max_files: MAX_BATCH_FILES,
        }
    }
}

/// Lifecycle of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemStatus {
    /// Waiting for a worker.
    Queued,
    /// Decoding the source (or fetching the cached raster).
    Loading,
    /// Applying reverse alpha blending.
    RemovingWatermark,
    /// Encoding the output.
    Encoding,
    /// Output available.
    Completed,
    /// Failed; see the item's error.
    Error,
}

impl ItemStatus {
    /// Text shown next to the item.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Queued => "Queued",
            Self::Loading => "Loading…",
            Self::RemovingWatermark | Self::Encoding => "Removing watermark…",
            Self::Completed => "Done",
            Self::Error => "Failed",
        }
    }

    /// Whether the item reached `Completed` or `Error`.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// Overall state of the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// No batch loaded.
    #[default]
    Idle,
    /// Items loaded, not yet run.
    Ready,
    /// A run is in progress.
    Processing,
    /// Every item reached `Completed` or `Error`.
    Processed,
    /// The run could not start (reference assets unusable).
    SetupFailed,
}

/// Progress descriptor published after every item transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    /// Batch phase.
    pub phase: Phase,
    /// Items completed or failed.
    pub done: usize,
    /// Items in the batch.
    pub total: usize,
}

/// Read-only view of one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemView {
    /// Position in the batch.
    pub index: usize,
    /// Source file name.
    pub name: String,
    /// Current status.
    pub status: ItemStatus,
    /// Status text for display.
    pub label: &'static str,
    /// Suggested download name, once completed.
    pub output_filename: Option<String>,
    /// Failure description, once failed.
    pub error: Option<String>,
}

/// A completed output ready to be saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    /// Suggested file name.
    pub filename: String,
    /// Encoded contents.
    pub bytes: Bytes,
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Items in the run.
    pub total: usize,
    /// Items completed.
    pub completed: usize,
    /// Items failed.
    pub failed: usize,
    /// First item failure, reported once per run.
    pub first_error: Option<String>,
    /// Encode degradation, reported once per run.
    pub notice: Option<Notice>,
    /// The run was overtaken by a newer run or batch and its results discarded.
    pub superseded: bool,
}

struct BatchItem {
    source: SourceFile,
    raster: Option<Arc<RgbaImage>>,
    output: Option<OutputHandle>,
    status: ItemStatus,
    error: Option<ItemError>,
}

impl BatchItem {
    fn new(source: SourceFile) -> Self {
        Self {
            source,
            raster: None,
            output: None,
            status: ItemStatus::Queued,
            error: None,
        }
    }
}

#[derive(Default)]
struct BatchState {
    /// Bumped by every run, load and reset.
    generation: u64,
    /// Bumped by every load and reset; identifies the item set.
    batch: u64,
    phase: Phase,
    items: Vec<BatchItem>,
    store: ResultStore,
    done: usize,
    first_error: Option<String>,
    notice: Option<Notice>,
}

impl BatchState {
    fn progress(&self) -> Progress {
        Progress {
            phase: self.phase,
            done: self.done,
            total: self.items.len(),
        }
    }

    fn release_outputs(&mut self) {
        for item in &mut self.items {
            item.output = None;
        }
        self.store.clear();
    }
}

/// Snapshot a run's workers operate on.
struct RunContext {
    generation: u64,
    batch: u64,
    spec: OutputSpec,
    total: usize,
    cursor: AtomicUsize,
}

/// Why an item's pipeline stopped early.
enum Abort {
    Stale,
    Failed(ItemError),
}

impl From<ItemError> for Abort {
    fn from(e: ItemError) -> Self {
        Self::Failed(e)
    }
}

/// Runs batches of images through the watermark removal pipeline.
pub struct BatchProcessor {
    engine: Arc<WatermarkEngine>,
    encoder: Encoder,
    decoder: Arc<dyn RasterDecoder>,
    options: BatchOptions,
    state: Mutex<BatchState>,
    progress: watch::Sender<Progress>,
}

impl BatchProcessor {
    /// Processor using the default decoder, encoder and options.
    #[must_use]
    pub fn new(engine: Arc<WatermarkEngine>) -> Self {
        let (progress, _) = watch::channel(Progress::default());
        Self {
            engine,
            encoder: Encoder::new(),
            decoder: Arc::new(ImageDecoder),
            options: BatchOptions::default(),
            state: Mutex::new(BatchState::default()),
            progress,
        }
    }

    /// Replace the source decoder.
    #[must_use]
    pub fn with_decoder(mut self, decoder: Arc<dyn RasterDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Replace the output encoder.
    #[must_use]
    pub fn with_encoder(mut self, encoder: Encoder) -> Self {
        self.encoder = encoder;
        self
    }

    /// Replace the scheduler options.
    #[must_use]
    pub fn with_options(mut self, options: BatchOptions) -> Self {
        self.options = BatchOptions {
            workers: options.workers.max(1),
            ..options
        };
        self
    }

    fn lock(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &BatchState) {
        self.progress.send_replace(state.progress());
    }

    /// Receiver notified after every item transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    /// Current progress.
    #[must_use]
    pub fn progress(&self) -> Progress {
        self.lock().progress()
    }

    /// Replace the current batch with `files`.
    ///
    /// Unsupported files are dropped. The previous batch, including all of its
    /// outputs, is released only once the new batch has been accepted.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] (leaving the previous batch intact) if no
    /// files are given, none is supported, or too many are supported.
    pub fn load(&self, files: Vec<SourceFile>) -> std::result::Result<usize, ValidationError> {
        let files = validate(files, self.options.max_files)?;
        let count = files.len();

        let mut state = self.lock();
        state.release_outputs();
        state.generation += 1;
        state.batch += 1;
        state.items = files.into_iter().map(BatchItem::new).collect();
        state.phase = Phase::Ready;
        state.done = 0;
        state.first_error = None;
        state.notice = None;
        tracing::debug!(count, batch = state.batch, "batch loaded");
        self.publish(&state);

        Ok(count)
    }

    /// Load `files` and run them under `spec`.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load) and [`run`](Self::run).
    pub async fn process(&self, files: Vec<SourceFile>, spec: OutputSpec) -> Result<RunSummary> {
        self.load(files)?;
        self.run(spec).await
    }

    /// Run every item of the current batch under `spec`.
    ///
    /// Calling this again (for instance after the format or quality changed)
    /// reprocesses the batch: previous outputs are released, decoded rasters are
    /// reused and every item goes through removal and encoding again.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyBatch`] if nothing is loaded, or the
    /// setup error if the reference assets are unusable (every item is then
    /// marked failed). Item failures are reported in the summary, not here.
    pub async fn run(&self, spec: OutputSpec) -> Result<RunSummary> {
        let run = {
            let mut state = self.lock();
            if state.items.is_empty() {
                return Err(ValidationError::EmptyBatch.into());
            }
            state.release_outputs();
            state.generation += 1;
            state.done = 0;
            state.first_error = None;
            state.notice = None;
            state.phase = Phase::Processing;
            for item in &mut state.items {
                item.status = ItemStatus::Queued;
                item.error = None;
            }
            self.publish(&state);

            RunContext {
                generation: state.generation,
                batch: state.batch,
                spec,
                total: state.items.len(),
                cursor: AtomicUsize::new(0),
            }
        };

        tracing::info!(
            generation = run.generation,
            total = run.total,
            format = %spec.format,
            quality = spec.quality,
            "starting batch run"
        );

        if let Err(setup) = self.engine.prepare() {
            tracing::error!(error = %setup, "cannot prepare watermark assets");
            let mut state = self.lock();
            if state.generation == run.generation {
                let message = setup.to_string();
                for item in &mut state.items {
                    item.status = ItemStatus::Error;
                    item.error = Some(ItemError::Setup(message.clone()));
                }
                state.done = state.items.len();
                state.phase = Phase::SetupFailed;
                self.publish(&state);
            }
            return Err(Error::Setup(setup));
        }

        let workers = self.options.workers.min(run.total);
        join_all((0..workers).map(|worker| self.worker(&run, worker))).await;

        let mut state = self.lock();
        if state.generation != run.generation {
            tracing::debug!(generation = run.generation, "run superseded");
            return Ok(RunSummary {
                total: run.total,
                completed: 0,
                failed: 0,
                first_error: None,
                notice: None,
                superseded: true,
            });
        }

        state.phase = Phase::Processed;
        self.publish(&state);

        let failed = state
            .items
            .iter()
            .filter(|item| item.status == ItemStatus::Error)
            .count();
        let summary = RunSummary {
            total: run.total,
            completed: run.total - failed,
            failed,
            first_error: state.first_error.clone(),
            notice: state.notice.clone(),
            superseded: false,
        };
        if let Some(first) = &summary.first_error {
            tracing::warn!(
                failed,
                total = run.total,
                first_error = %first,
                "some images could not be processed"
            );
        }
        tracing::info!(
            completed = summary.completed,
            failed,
            "batch run finished"
        );

        Ok(summary)
    }

    /// Drop the current batch and release every output.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.release_outputs();
        state.generation += 1;
        state.batch += 1;
        state.items.clear();
        state.phase = Phase::Idle;
        state.done = 0;
        state.first_error = None;
        state.notice = None;
        self.publish(&state);
    }

    async fn worker(&self, run: &RunContext, worker: usize) {
        loop {
            let index = run.cursor.fetch_add(1, Ordering::Relaxed);
            if index >= run.total {
                break;
            }

            let outcome = match self.process_item(run, index).await {
                Ok(encoded) => Ok(encoded),
                Err(Abort::Failed(e)) => Err(e),
                Err(Abort::Stale) => break,
            };

            let mut state = self.lock();
            if state.generation != run.generation {
                break;
            }
            let BatchState {
                items,
                store,
                done,
                first_error,
                notice,
                ..
            } = &mut *state;
            let item = &mut items[index];
            match outcome {
                Ok(encoded) => {
                    item.output = Some(store.replace(
                        item.output.take(),
                        encoded.bytes,
                        encoded.extension,
                    ));
                    item.status = ItemStatus::Completed;
                    if let Some(degraded) = encoded.notice {
                        if notice.is_none() {
                            tracing::warn!(notice = %degraded, "output encoding degraded");
                            *notice = Some(degraded);
                        }
                    }
                    tracing::debug!(worker, index, "item completed");
                }
                Err(e) => {
                    tracing::debug!(worker, index, error = %e, "item failed");
                    if first_error.is_none() {
                        *first_error = Some(e.to_string());
                    }
                    item.status = ItemStatus::Error;
                    item.error = Some(e);
                }
            }
            *done += 1;
            self.publish(&state);
        }
    }

    async fn process_item(
        &self,
        run: &RunContext,
        index: usize,
    ) -> std::result::Result<Encoded, Abort> {
        let (source, cached) = {
            let state = self.transition(run, index, ItemStatus::Loading)?;
            let item = &state.items[index];
            let loaded = (item.source.clone(), item.raster.clone());
            self.publish(&state);
            drop(state);
            loaded
        };
        self.suspend(run).await?;

        let raster = match cached {
            Some(raster) => raster,
            None => {
                let decoded = Arc::new(self.decoder.decode(&source)?);
                let mut state = self.lock();
                if state.batch == run.batch {
                    state.items[index].raster = Some(Arc::clone(&decoded));
                }
                decoded
            }
        };

        let state = self.transition(run, index, ItemStatus::RemovingWatermark)?;
        self.publish(&state);
        drop(state);
        self.suspend(run).await?;
        let mut working = RgbaImage::clone(&raster);
        self.engine.remove(&mut working)?;

        let state = self.transition(run, index, ItemStatus::Encoding)?;
        self.publish(&state);
        drop(state);
        self.suspend(run).await?;
        Ok(self.encoder.encode(&working, run.spec)?)
    }

    /// Set an item's status, unless the run has been superseded.
    fn transition(
        &self,
        run: &RunContext,
        index: usize,
        status: ItemStatus,
    ) -> std::result::Result<MutexGuard<'_, BatchState>, Abort> {
        let mut state = self.lock();
        if state.generation != run.generation {
            return Err(Abort::Stale);
        }
        state.items[index].status = status;
        tracing::debug!(
            index,
            generation = run.generation,
            status = status.label(),
            "item transition"
        );
        Ok(state)
    }

    async fn suspend(&self, run: &RunContext) -> std::result::Result<(), Abort> {
        tokio::task::yield_now().await;
        if self.lock().generation == run.generation {
            Ok(())
        } else {
            Err(Abort::Stale)
        }
    }

    /// Snapshot of every item.
    #[must_use]
    pub fn items(&self) -> Vec<ItemView> {
        let state = self.lock();
        state
            .items
            .iter()
            .enumerate()
            .map(|(index, item)| ItemView {
                index,
                name: item.source.name.clone(),
                status: item.status,
                label: item.status.label(),
                output_filename: item
                    .output
                    .and_then(|h| state.store.get(h))
                    .map(|out| store::output_filename(&item.source.name, out.extension)),
                error: item.error.as_ref().map(ToString::to_string),
            })
            .collect()
    }

    /// Output of a completed item.
    #[must_use]
    pub fn output(&self, index: usize) -> Option<Download> {
        let state = self.lock();
        let item = state.items.get(index)?;
        if item.status != ItemStatus::Completed {
            return None;
        }
        let stored = state.store.get(item.output?)?;
        Some(Download {
            filename: store::output_filename(&item.source.name, stored.extension),
            bytes: stored.bytes.clone(),
        })
    }

    /// Every completed output, named for packaging into one archive.
    ///
    /// Returns `None` when no item has completed.
    #[must_use]
    pub fn archive(&self) -> Option<Archive> {
        let count = self.lock().items.len();
        let files: Vec<_> = (0..count)
            .filter_map(|index| self.output(index))
            .map(|download| (download.filename, download.bytes))
            .collect();
        if files.is_empty() {
            tracing::info!("nothing to archive");
            return None;
        }
        let name = store::archive_name(chrono::Utc::now().timestamp_millis());
        Some(Archive::new(name, files))
    }

    /// Outputs currently held (not yet released).
    #[must_use]
    pub fn live_outputs(&self) -> usize {
        self.lock().store.live_handles()
    }
}

/// Keep supported files and check the batch size.
///
/// # Errors
///
/// See [`ValidationError`].
pub fn validate(
    files: Vec<SourceFile>,
    max_files: usize,
) -> std::result::Result<Vec<SourceFile>, ValidationError> {
    if files.is_empty() {
        return Err(ValidationError::EmptyBatch);
    }
    let submitted = files.len();
    let supported: Vec<_> = files.into_iter().filter(SourceFile::is_supported).collect();

    if supported.is_empty() {
        return Err(ValidationError::NoSupportedFiles {
            rejected: submitted,
        });
    }
    if supported.len() > max_files {
        return Err(ValidationError::TooManyFiles {
            count: supported.len(),
            max: max_files,
        });
    }
    if supported.len() < submitted {
        tracing::warn!(
            skipped = submitted - supported.len(),
            "ignoring files that are not PNG, JPEG or WebP"
        );
    }

    Ok(supported)
}
