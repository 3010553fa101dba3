// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Batched, checkpointed reads from the event stream.
//!
//! The reader never gives up: transport errors are logged and retried after a fixed
//! delay, and empty reads simply loop. To bound how long a stalled archiver keeps
//! chasing a backlog it cannot reach, too many unsuccessful attempts within one
//! archive file move the cursor to the stream tail. Whatever accumulated behind it is
//! skipped.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::ArchiverConfig;
use crate::cursor::Cursor;
use crate::queue::{CursorStore, Event, EventQueue};

#[derive(Debug, Clone, Copy)]
pub struct ReaderSettings {
    pub batch_size: usize,
    pub block: Duration,
    pub retry_delay: Duration,
    pub stale_threshold: u32,
}

impl From<&ArchiverConfig> for ReaderSettings {
    fn from(config: &ArchiverConfig) -> Self {
        ReaderSettings {
            batch_size: config.batch_size,
            block: config.block,
            retry_delay: config.retry_delay,
            stale_threshold: config.stale_threshold,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A non-empty batch, in stream order.
    Batch(Vec<Event>),
    Cancelled,
}

pub struct StreamReader<Q, C> {
    queue: Q,
    store: C,
    cursor: Cursor,
    settings: ReaderSettings,
    failed_attempts: u32,
}

impl<Q: EventQueue, C: CursorStore> StreamReader<Q, C> {
    pub fn new(queue: Q, store: C, cursor: Cursor, settings: ReaderSettings) -> Self {
        StreamReader {
            queue,
            store,
            cursor,
            settings,
            failed_attempts: 0,
        }
    }

    /// Builds a reader positioned at the persisted cursor, or at the tail when the
    /// store holds none.
    ///
    /// Loading is retried until it succeeds; returns `None` if cancelled first.
    pub async fn resume(
        queue: Q,
        mut store: C,
        settings: ReaderSettings,
        cancel: &CancellationToken,
    ) -> Option<Self> {
        loop {
            let loaded = tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                loaded = store.load() => loaded,
            };
            match loaded {
                Ok(cursor) => {
                    let cursor = cursor.unwrap_or_default();
                    debug!("Resuming stream reads after {cursor}");
                    return Some(Self::new(queue, store, cursor, settings));
                }
                Err(e) => {
                    error!("Failed to load stream cursor: {e}");
                    if !sleep_unless_cancelled(settings.retry_delay, cancel).await {
                        return None;
                    }
                }
            }
        }
    }

    #[must_use]
    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    #[must_use]
    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    /// Resets the staleness counter. Called when a new archive file is opened.
    pub fn start_file(&mut self) {
        self.failed_attempts = 0;
    }

    /// Waits for the next non-empty batch after the cursor.
    ///
    /// The cursor is not advanced here; call [`Self::checkpoint`] once the batch has
    /// been buffered.
    pub async fn next_batch(&mut self, cancel: &CancellationToken) -> ReadOutcome {
        loop {
            if cancel.is_cancelled() {
                return ReadOutcome::Cancelled;
            }

            let read = tokio::select! {
                biased;
                () = cancel.cancelled() => return ReadOutcome::Cancelled,
                read = self.queue.read(
                    &self.cursor,
                    self.settings.batch_size,
                    Some(self.settings.block),
                ) => read,
            };

            match read {
                Ok(events) if !events.is_empty() => {
                    self.failed_attempts = 0;
                    return ReadOutcome::Batch(events);
                }
                Ok(_) => {
                    self.record_failure();
                }
                Err(e) => {
                    error!("Failed to read from stream after {}: {e}", self.cursor);
                    self.record_failure();
                    if !sleep_unless_cancelled(self.settings.retry_delay, cancel).await {
                        return ReadOutcome::Cancelled;
                    }
                }
            }
        }
    }

    /// Moves the cursor to `id` and persists it before any further read.
    ///
    /// Persisting is retried like a read; returns `false` if cancelled first, in
    /// which case the in-memory cursor has still moved.
    pub async fn checkpoint(&mut self, id: &Cursor, cancel: &CancellationToken) -> bool {
        self.cursor = id.clone();
        loop {
            match self.store.store(&self.cursor).await {
                Ok(()) => return true,
                Err(e) => {
                    error!("Failed to persist cursor {}: {e}", self.cursor);
                    if !sleep_unless_cancelled(self.settings.retry_delay, cancel).await {
                        return false;
                    }
                }
            }
        }
    }

    fn record_failure(&mut self) {
        self.failed_attempts += 1;
        if self.failed_attempts < self.settings.stale_threshold {
            return;
        }
        if !self.cursor.is_tail() {
            warn!(
                "No events after {} for {} attempts, skipping to the stream tail; backlog behind it will not be archived",
                self.cursor, self.failed_attempts
            );
            self.cursor = Cursor::Tail;
        }
        self.failed_attempts = 0;
    }
}

/// Returns `false` when cancelled before the delay elapsed.
async fn sleep_unless_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = tokio::time::sleep(delay) => true,
        () = cancel.cancelled() => false,
    }
}
