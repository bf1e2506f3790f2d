/// Batch runner
///
/// Fans sites out over a bounded worker pool and funnels finished outcomes to
/// a single writer.
///
/// ```text
/// sites ──▶ rayon pool (max_parallel_sites) ──outcome──▶ channel ──▶ writer
///             SiteOrchestrator::process                     <id>.json
///                                                           <id>_overlay.png
///                                                           predictions.json
/// ```
///
/// Per-site write failures are logged and counted; they never stop the batch.
/// Re-running over the same sites overwrites the same files. File stems are
/// assigned in input order before dispatch; a stem already taken by an
/// earlier row gets the row index appended.
use crate::config::BatchConfig;
use crate::error::BatchError;
use crate::orchestrator::{SiteOrchestrator, SiteOutcome};
use crate::overlay::OverlayRenderer;
use crate::record::DecisionRecord;
use crate::site::Site;
use crossbeam_channel::unbounded;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const AGGREGATE_FILE: &str = "predictions.json";

/// Stops dispatch of sites not yet started. Sites already running finish.
#[derive(Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct BatchSummary {
    /// Records of every processed site, in input order
    pub records: Vec<DecisionRecord>,
    /// Sites never started because of an abort
    pub skipped: usize,
    /// Per-site files or overlays that could not be written
    pub write_failures: usize,
    pub elapsed: Duration,
}

impl BatchSummary {
    pub fn with_solar(&self) -> usize {
        self.records.iter().filter(|r| r.has_solar).count()
    }
}

pub struct BatchRunner {
    orchestrator: Arc<SiteOrchestrator>,
    output_dir: PathBuf,
    max_parallel_sites: usize,
    overlay: Option<OverlayRenderer>,
    abort: AbortHandle,
}

impl BatchRunner {
    pub fn new(orchestrator: Arc<SiteOrchestrator>, output_dir: impl Into<PathBuf>, config: &BatchConfig) -> Self {
        Self {
            orchestrator,
            output_dir: output_dir.into(),
            max_parallel_sites: config.max_parallel_sites.max(1),
            overlay: config.render_overlays.then(OverlayRenderer::default),
            abort: AbortHandle::default(),
        }
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Process every site and write per-site records, overlays and the
    /// aggregate. Fails only when the output directory, the worker pool or
    /// the aggregate file can't be set up or written.
    pub fn run(&self, sites: &[Site]) -> Result<BatchSummary, BatchError> {
        let started = Instant::now();
        fs::create_dir_all(&self.output_dir).map_err(|source| BatchError::OutputDirectory {
            path: self.output_dir.display().to_string(),
            source,
        })?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_parallel_sites)
            .thread_name(|i| format!("pv-site-{}", i))
            .build()?;

        tracing::info!(
            "[batch] Processing {} site(s) with {} worker(s)",
            sites.len(),
            self.max_parallel_sites
        );

        let stems = assign_stems(sites);
        let (tx, rx) = unbounded::<(usize, SiteOutcome)>();

        let (slots, write_failures) = std::thread::scope(|scope| {
            let writer = scope.spawn(|| {
                let mut slots: Vec<Option<DecisionRecord>> = vec![None; sites.len()];
                let mut failures = 0;
                let mut done = 0;
                while let Ok((index, outcome)) = rx.recv() {
                    done += 1;
                    failures += self.persist(&outcome, &stems[index]);
                    tracing::debug!("[batch] {}/{} {}", done, sites.len(), outcome.record.sample_id);
                    slots[index] = Some(outcome.record);
                }
                (slots, failures)
            });

            pool.install(|| {
                sites
                    .par_iter()
                    .enumerate()
                    .for_each_with(tx, |tx, (index, site)| {
                        if self.abort.is_aborted() {
                            return;
                        }
                        let outcome = self.orchestrator.process(site);
                        if tx.send((index, outcome)).is_err() {
                            tracing::error!("[batch] Writer is gone, dropping result for {}", site.id);
                        }
                    });
            });

            writer.join().map_err(|_| BatchError::WriterPanicked)
        })?;

        let skipped = slots.iter().filter(|s| s.is_none()).count();
        let records: Vec<DecisionRecord> = slots.into_iter().flatten().collect();

        let aggregate = self.output_dir.join(AGGREGATE_FILE);
        write_json(&aggregate, &records).map_err(|source| BatchError::WriteFailed {
            path: aggregate.display().to_string(),
            source,
        })?;

        let summary = BatchSummary {
            records,
            skipped,
            write_failures,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            "✓ [batch] {} site(s) processed, {} with solar, {} skipped, {} write failure(s) in {:.1}s",
            summary.records.len(),
            summary.with_solar(),
            summary.skipped,
            summary.write_failures,
            summary.elapsed.as_secs_f64()
        );
        if summary.skipped > 0 {
            tracing::warn!("[batch] Aborted before {} site(s) started", summary.skipped);
        }
        Ok(summary)
    }

    /// Write one site's record and overlay. Returns the number of failures.
    fn persist(&self, outcome: &SiteOutcome, stem: &str) -> usize {
        let mut failures = 0;
        let id = &outcome.record.sample_id;

        let path = record_path(&self.output_dir, stem);
        if let Err(e) = write_json(&path, &outcome.record) {
            tracing::error!("[batch] Failed to write {}: {}", path.display(), e);
            failures += 1;
        }

        if let (Some(renderer), Some(tile)) = (&self.overlay, &outcome.tile) {
            if let Err(e) = renderer.save(&self.output_dir, stem, tile, &outcome.detections) {
                tracing::error!("[batch] Failed to render overlay for {}: {}", id, e);
                failures += 1;
            }
        }
        failures
    }
}

pub fn record_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{}.json", stem))
}

/// One unique file stem per site, in input order.
pub fn assign_stems(sites: &[Site]) -> Vec<String> {
    let mut taken = HashSet::with_capacity(sites.len());
    sites
        .iter()
        .enumerate()
        .map(|(index, site)| {
            let base = site.id.file_stem();
            let mut stem = base.clone();
            let mut suffix = index;
            while !taken.insert(stem.clone()) {
                stem = format!("{}-{}", base, suffix);
                suffix += 1;
            }
            if stem != base {
                tracing::warn!("[batch] File name {} already used, writing {} as {}", base, site.id, stem);
            }
            stem
        })
        .collect()
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value).map_err(io::Error::from)?;
    writer.flush()
}
