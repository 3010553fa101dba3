// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-process queue and cursor store.
//!
//! Mirrors the Redis semantics the archiver depends on closely enough to drive the
//! read loop without a server: ordered ids, `COUNT` limits, `BLOCK` timeouts and the
//! `$` sentinel. Transport failures can be injected to exercise the retry path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::cursor::Cursor;
use crate::errors::QueueError;
use crate::queue::{CursorStore, Event, EventQueue};

#[derive(Debug, Default)]
struct QueueState {
    entries: Vec<Event>,
    failures_remaining: usize,
    reads: usize,
    // Length of the stream when the current run of `$` reads began.
    tail_mark: Option<usize>,
    next_ms: u64,
}

/// Cloneable handle to a shared in-memory stream.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    state: Arc<Mutex<QueueState>>,
}

impl MemoryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A poisoned lock only means another test thread panicked mid-update.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Appends an entry with the next `<n>-0` id and returns that id.
    pub fn publish(&self, payload: impl Into<Vec<u8>>) -> Cursor {
        let mut state = self.lock();
        state.next_ms += 1;
        let id = Cursor::new(state.next_ms, 0);
        state.entries.push(Event::new(id.clone(), payload));
        id
    }

    /// Makes the next `n` reads fail with a transport error.
    pub fn fail_next(&self, n: usize) {
        self.lock().failures_remaining = n;
    }

    /// Number of read calls observed, failed ones included.
    #[must_use]
    pub fn reads(&self) -> usize {
        self.lock().reads
    }

    fn take_after(&self, cursor: &Cursor, count: usize) -> Result<Vec<Event>, QueueError> {
        let mut state = self.lock();
        state.reads += 1;
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(QueueError::Transport("connection refused".to_string()));
        }

        let start = match cursor {
            Cursor::Tail => {
                let len = state.entries.len();
                *state.tail_mark.get_or_insert(len)
            }
            id => {
                state.tail_mark = None;
                state
                    .entries
                    .iter()
                    .position(|e| e.id.partial_cmp(id) == Some(std::cmp::Ordering::Greater))
                    .unwrap_or(state.entries.len())
            }
        };

        let batch: Vec<Event> = state.entries[start..]
            .iter()
            .take(count)
            .cloned()
            .collect();
        if !batch.is_empty() {
            state.tail_mark = None;
        }
        Ok(batch)
    }
}

#[async_trait]
impl EventQueue for MemoryQueue {
    async fn read(
        &mut self,
        cursor: &Cursor,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<Event>, QueueError> {
        let batch = self.take_after(cursor, count)?;
        if batch.is_empty() {
            if let Some(block) = block {
                tokio::time::sleep(block).await;
            }
        }
        Ok(batch)
    }
}

/// Cursor key that remembers every value written to it.
#[derive(Debug, Clone, Default)]
pub struct MemoryCursorStore {
    history: Arc<Mutex<Vec<Cursor>>>,
    failures_remaining: Arc<AtomicUsize>,
}

impl MemoryCursorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a cursor, as left behind by a previous run.
    #[must_use]
    pub fn with_cursor(cursor: Cursor) -> Self {
        MemoryCursorStore {
            history: Arc::new(Mutex::new(vec![cursor])),
            failures_remaining: Arc::default(),
        }
    }

    /// Makes the next `n` loads or stores fail with a transport error.
    pub fn fail_next(&self, n: usize) {
        self.failures_remaining.store(n, Ordering::Relaxed);
    }

    fn take_failure(&self) -> Result<(), QueueError> {
        let failed = self
            .failures_remaining
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(QueueError::Transport("connection refused".to_string()))
        } else {
            Ok(())
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Cursor>> {
        self.history
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[must_use]
    pub fn current(&self) -> Option<Cursor> {
        self.lock().last().cloned()
    }

    #[must_use]
    pub fn history(&self) -> Vec<Cursor> {
        self.lock().clone()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&mut self) -> Result<Option<Cursor>, QueueError> {
        self.take_failure()?;
        Ok(self.current())
    }

    async fn store(&mut self, cursor: &Cursor) -> Result<(), QueueError> {
        self.take_failure()?;
        self.lock().push(cursor.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_after_cursor_with_count() {
        let mut queue = MemoryQueue::new();
        let first = queue.publish("a");
        queue.publish("b");
        queue.publish("c");

        let batch = queue
            .read(&first, 1, None)
            .await
            .expect("read failed");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, b"b");

        let all = queue
            .read(&Cursor::new(0, 0), 10, None)
            .await
            .expect("read failed");
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_tail_skips_backlog() {
        let mut queue = MemoryQueue::new();
        queue.publish("old");

        let batch = queue
            .read(&Cursor::Tail, 10, Some(Duration::from_millis(1)))
            .await
            .expect("read failed");
        assert!(batch.is_empty());

        queue.publish("new");
        let batch = queue
            .read(&Cursor::Tail, 10, Some(Duration::from_millis(1)))
            .await
            .expect("read failed");
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, b"new");
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let mut queue = MemoryQueue::new();
        queue.publish("a");
        queue.fail_next(2);

        assert!(queue.read(&Cursor::new(0, 0), 10, None).await.is_err());
        assert!(queue.read(&Cursor::new(0, 0), 10, None).await.is_err());
        assert_eq!(
            queue
                .read(&Cursor::new(0, 0), 10, None)
                .await
                .expect("read failed")
                .len(),
            1
        );
        assert_eq!(queue.reads(), 3);
    }

    #[tokio::test]
    async fn test_cursor_store_history() {
        let mut store = MemoryCursorStore::with_cursor(Cursor::new(1, 0));
        assert_eq!(store.load().await.expect("load failed"), Some(Cursor::new(1, 0)));
        store.store(&Cursor::new(2, 0)).await.expect("store failed");
        assert_eq!(store.history(), vec![Cursor::new(1, 0), Cursor::new(2, 0)]);
    }
}
