// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Archive control loop.
//!
//! One cycle owns one archive file: a fresh producer buffer and compressor are wired
//! to the stream reader, run until the file reaches its cap or shutdown is requested,
//! and the file is closed. Cycles repeat until the cancellation token fires. The
//! pipeline is pulled by the compressor on a single task, so a stalled queue read
//! stalls the whole chain and nothing runs ahead of the cap check.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::buffer::{ProducerBuffer, StreamFill, DEFAULT_FILL_CHUNK};
use crate::compressor::Compressor;
use crate::config::ArchiverConfig;
use crate::errors::ArchiverError;
use crate::queue::{CursorStore, EventQueue};
use crate::reader::{ReaderSettings, StreamReader};
use crate::rotator::FileRotator;
use crate::stats::{CycleStats, CycleSummary};

/// A closed, complete archive file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedArchive {
    pub path: PathBuf,
    pub summary: CycleSummary,
}

pub struct Archiver<Q, C> {
    reader: StreamReader<Q, C>,
    rotator: FileRotator,
    compressor: Compressor,
    max_file_size: u64,
    fill_chunk: usize,
    progress_interval: Duration,
    cycle_pause: Duration,
}

impl<Q, C> Archiver<Q, C>
where
    Q: EventQueue,
    C: CursorStore,
{
    pub fn new(reader: StreamReader<Q, C>, config: &ArchiverConfig) -> Self {
        Archiver {
            reader,
            rotator: FileRotator::new(config.output_dir.clone()),
            compressor: Compressor::new(config.compression_level),
            max_file_size: config.max_file_size,
            fill_chunk: DEFAULT_FILL_CHUNK,
            progress_interval: config.progress_interval,
            cycle_pause: config.cycle_pause,
        }
    }

    /// Resumes from the persisted cursor, retrying until it loads.
    ///
    /// Returns `None` if `cancel` fires first.
    pub async fn resume(
        queue: Q,
        store: C,
        config: &ArchiverConfig,
        cancel: &CancellationToken,
    ) -> Option<Self> {
        let reader =
            StreamReader::resume(queue, store, ReaderSettings::from(config), cancel).await?;
        Some(Self::new(reader, config))
    }

    #[must_use]
    pub fn with_fill_chunk(mut self, fill_chunk: usize) -> Self {
        self.fill_chunk = fill_chunk;
        self
    }

    #[must_use]
    pub fn reader(&self) -> &StreamReader<Q, C> {
        &self.reader
    }

    /// Runs archive cycles until `cancel` fires, then returns every file written.
    ///
    /// The file open when cancellation arrives is finished and closed first. File
    /// system errors end the loop immediately.
    pub async fn run(
        mut self,
        cancel: CancellationToken,
    ) -> Result<Vec<ClosedArchive>, ArchiverError> {
        let mut closed = Vec::new();
        loop {
            closed.push(self.run_cycle(&cancel).await?);
            if cancel.is_cancelled() {
                break;
            }
            tokio::select! {
                () = tokio::time::sleep(self.cycle_pause) => {}
                () = cancel.cancelled() => break,
            }
        }
        info!("Archiver stopped after {} files", closed.len());
        Ok(closed)
    }

    /// Archives into one new file until it is capped or `cancel` fires.
    pub async fn run_cycle(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<ClosedArchive, ArchiverError> {
        let started = Instant::now();
        let stats = CycleStats::new();
        let archive = self.rotator.open_new_file(Local::now(), Arc::clone(&stats))?;
        info!("Starting pipe to {}", archive.path.display());
        self.reader.start_file();

        let reporter = CancellationToken::new();
        let _stop_reporter = reporter.clone().drop_guard();
        tokio::spawn(report_progress(
            Arc::clone(&stats),
            self.progress_interval,
            reporter,
        ));

        let fill = StreamFill::new(&mut self.reader, &stats, self.max_file_size, cancel);
        let mut buffer = ProducerBuffer::new(fill, self.fill_chunk);
        let writer = self
            .compressor
            .run(&mut buffer, archive.writer, &stats)
            .await?;
        debug!("Compressor finished, closing {}", archive.path.display());
        FileRotator::close(writer)?;

        let summary = stats.snapshot();
        info!(
            "Closed {}: {} events, {} bytes read, {} bytes written in {:.1}s",
            archive.path.display(),
            summary.events,
            summary.bytes_read,
            summary.bytes_written,
            started.elapsed().as_secs_f32()
        );
        Ok(ClosedArchive {
            path: archive.path,
            summary,
        })
    }
}

async fn report_progress(stats: Arc<CycleStats>, every: Duration, stop: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await; // first tick is immediate
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                info!(
                    "{} bytes read, {} bytes written, {} processed",
                    stats.bytes_read(),
                    stats.bytes_written(),
                    stats.events()
                );
            }
            () = stop.cancelled() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::Cursor;
    use crate::memory::{MemoryCursorStore, MemoryQueue};

    fn test_config(dir: &std::path::Path) -> ArchiverConfig {
        ArchiverConfig {
            output_dir: dir.to_path_buf(),
            block: Duration::from_millis(1),
            retry_delay: Duration::from_millis(1),
            cycle_pause: Duration::from_millis(1),
            progress_interval: Duration::from_millis(50),
            ..Default::default()
        }
    }

    fn decode(path: &std::path::Path) -> Vec<u8> {
        let file = std::fs::File::open(path).expect("failed to open archive");
        zstd::decode_all(file).expect("failed to decode archive")
    }

    /// Cancels once the store has persisted `target`.
    fn cancel_at(store: &MemoryCursorStore, target: Cursor) -> CancellationToken {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let watched = store.clone();
        tokio::spawn(async move {
            while watched.current() != Some(target.clone()) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            trigger.cancel();
        });
        cancel
    }

    /// Printable noise that zstd can barely shrink.
    fn noise(len: usize, seed: u64) -> String {
        const ALPHABET: &[u8] =
            b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
        let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                ALPHABET[(state % 64) as usize] as char
            })
            .collect()
    }

    #[tokio::test]
    async fn test_three_events_one_file() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let config = test_config(dir.path());
        let queue = MemoryQueue::new();
        queue.publish("a");
        queue.publish("b");
        queue.publish("c");
        let store = MemoryCursorStore::with_cursor(Cursor::new(0, 0));
        let cancel = cancel_at(&store, Cursor::new(3, 0));

        let mut archiver = Archiver::resume(queue, store.clone(), &config, &cancel)
            .await
            .expect("failed to resume")
            .with_fill_chunk(1);

        let closed = archiver.run_cycle(&cancel).await.expect("cycle failed");

        assert_eq!(decode(&closed.path), b"a\nb\nc\n");
        assert_eq!(closed.summary.events, 3);
        assert_eq!(store.current(), Some(Cursor::new(3, 0)));
    }

    #[tokio::test]
    async fn test_cap_rotates_files() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let config = ArchiverConfig {
            max_file_size: 64,
            batch_size: 1,
            compression_level: 1,
            ..test_config(dir.path())
        };
        let queue = MemoryQueue::new();
        for i in 0..20 {
            queue.publish(format!("{{\"line\":{i},\"pad\":\"{}\"}}", "x".repeat(40 + i)));
        }
        let store = MemoryCursorStore::with_cursor(Cursor::new(0, 0));
        let cancel = cancel_at(&store, Cursor::new(20, 0));

        let archiver = Archiver::resume(queue, store.clone(), &config, &cancel)
            .await
            .expect("failed to resume")
            .with_fill_chunk(1);

        let closed = archiver.run(cancel).await.expect("archiver failed");
        assert!(closed.len() > 1, "expected rotation, got {closed:?}");

        let mut lines = Vec::new();
        for archive in &closed {
            let text = String::from_utf8(decode(&archive.path)).expect("utf8");
            lines.extend(text.lines().map(str::to_string));
        }
        assert_eq!(lines.len(), 20);
        assert!(lines[0].starts_with("{\"line\":0,"));
        assert!(lines[19].starts_with("{\"line\":19,"));
    }

    #[tokio::test]
    async fn test_cap_holds_with_default_fill_chunk() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let config = ArchiverConfig {
            max_file_size: 100,
            batch_size: 1,
            ..test_config(dir.path())
        };
        let queue = MemoryQueue::new();
        for i in 0..200 {
            queue.publish(noise(200, i));
        }
        let store = MemoryCursorStore::with_cursor(Cursor::new(0, 0));
        let cancel = cancel_at(&store, Cursor::new(200, 0));

        let archiver = Archiver::resume(queue, store.clone(), &config, &cancel)
            .await
            .expect("failed to resume");
        let closed = archiver.run(cancel).await.expect("archiver failed");

        // One batch is a 200 byte payload and its newline; zstd adds frame overhead.
        let bound = config.max_file_size + 201 + 32;
        let mut events = 0;
        for archive in &closed {
            let size = std::fs::metadata(&archive.path)
                .expect("missing archive")
                .len();
            assert!(size <= bound, "{} is {size} bytes", archive.path.display());
            assert_eq!(size, archive.summary.bytes_written);
            events += archive.summary.events;
        }
        assert_eq!(events, 200);
    }

    #[tokio::test]
    async fn test_resume_waits_for_cursor_store() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let config = test_config(dir.path());
        let store = MemoryCursorStore::with_cursor(Cursor::new(4, 0));
        store.fail_next(5);
        let cancel = CancellationToken::new();

        let archiver = Archiver::resume(MemoryQueue::new(), store, &config, &cancel)
            .await
            .expect("failed to resume");
        assert_eq!(archiver.reader().cursor(), &Cursor::new(4, 0));
    }

    #[tokio::test]
    async fn test_cancel_closes_current_file() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let config = test_config(dir.path());
        let cancel = CancellationToken::new();
        let archiver = Archiver::resume(
            MemoryQueue::new(),
            MemoryCursorStore::new(),
            &config,
            &cancel,
        )
        .await
        .expect("failed to resume");

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let closed = archiver.run(cancel).await.expect("archiver failed");
        assert_eq!(closed.len(), 1);
        assert!(decode(&closed[0].path).is_empty());
    }
}
