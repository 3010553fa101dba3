// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Archive discovery and the replay worker pool.
//!
//! Files are independent units of work. A fixed number of blocking workers pull
//! paths from a shared queue, each parsing one file at a time, and stream records
//! to a single bounded channel. A full channel blocks the workers until the
//! consumer catches up. A file that fails is logged and left out of the totals.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::ReplayError;
use crate::parser::{parse_file, FileStats};
use crate::patterns::PatternSet;
use crate::record::ExtractionRecord;

pub const DEFAULT_WORKERS: usize = 8;

/// Archive files matching `pattern`, most recently modified first.
pub fn discover(pattern: &str) -> Result<Vec<PathBuf>, ReplayError> {
    let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in glob::glob(pattern)? {
        match entry {
            Ok(path) => {
                let modified = path
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                files.push((modified, path));
            }
            Err(e) => warn!("Skipping unreadable archive path: {e}"),
        }
    }
    files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    debug!("Discovered {} archive files for {pattern}", files.len());
    Ok(files.into_iter().map(|(_, path)| path).collect())
}

/// Result of one dispatched file.
#[derive(Debug)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub result: Result<FileStats, ReplayError>,
}

#[derive(Debug, Default)]
pub struct DispatchSummary {
    /// Totals over the files that replayed completely.
    pub total: FileStats,
    pub completed: Vec<(PathBuf, FileStats)>,
    pub failed: Vec<PathBuf>,
    /// Workers that stopped abnormally; the files they had finished are lost.
    pub worker_failures: Vec<ReplayError>,
}

impl DispatchSummary {
    fn record(&mut self, outcome: FileOutcome) {
        match outcome.result {
            Ok(stats) => {
                self.total.merge(stats);
                self.completed.push((outcome.path, stats));
            }
            Err(e) => {
                error!("Failed to replay {}: {e}", outcome.path.display());
                self.failed.push(outcome.path);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    workers: usize,
    patterns: Arc<PatternSet>,
}

impl Dispatcher {
    pub fn new(workers: usize, patterns: Arc<PatternSet>) -> Self {
        Dispatcher {
            workers: workers.max(1),
            patterns,
        }
    }

    /// Replays every file in `paths` and waits for all of them.
    ///
    /// Records are sent on `records` as they are extracted. A closed receiver does
    /// not stop the replay; the records are dropped.
    pub async fn dispatch(
        &self,
        paths: Vec<PathBuf>,
        records: mpsc::Sender<ExtractionRecord>,
    ) -> DispatchSummary {
        let file_count = paths.len();
        let queue = Arc::new(Mutex::new(VecDeque::from(paths)));
        let workers = self.workers.min(file_count.max(1));
        info!("Replaying {file_count} files with {workers} workers");

        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let queue = Arc::clone(&queue);
                let patterns = Arc::clone(&self.patterns);
                let records = records.clone();
                tokio::task::spawn_blocking(move || run_worker(worker, &queue, &patterns, &records))
            })
            .collect();
        drop(records);

        let mut summary = DispatchSummary::default();
        for handle in handles {
            match handle.await {
                Ok(outcomes) => outcomes.into_iter().for_each(|o| summary.record(o)),
                Err(e) => {
                    let failure = ReplayError::Worker(e.to_string());
                    error!("{failure}");
                    summary.worker_failures.push(failure);
                }
            }
        }

        info!(
            "Replayed {} files ({} failed): {} lines, {} bytes",
            summary.completed.len(),
            summary.failed.len(),
            summary.total.lines,
            summary.total.bytes
        );
        summary
    }
}

fn run_worker(
    worker: usize,
    queue: &Mutex<VecDeque<PathBuf>>,
    patterns: &PatternSet,
    records: &mpsc::Sender<ExtractionRecord>,
) -> Vec<FileOutcome> {
    let mut outcomes = Vec::new();
    while let Some(path) = next_path(queue) {
        debug!("Worker {worker} picked up {}", path.display());
        let result = parse_file(&path, patterns, |record| {
            let _ = records.blocking_send(record);
        });
        outcomes.push(FileOutcome { path, result });
    }
    outcomes
}

fn next_path(queue: &Mutex<VecDeque<PathBuf>>) -> Option<PathBuf> {
    queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .pop_front()
}
