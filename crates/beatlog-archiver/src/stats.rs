// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for one archive cycle.
///
/// Shared between the pipeline task, which updates them, and the progress reporter,
/// which only reads them. The fill function checks `bytes_written` plus `bytes_pending`
/// against the file size cap. `bytes_pending` is input handed to the compressor since
/// its last flush.
#[derive(Debug, Default)]
pub struct CycleStats {
    events: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    bytes_pending: AtomicU64,
}

impl CycleStats {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_event(&self, payload_len: usize) {
        self.events.fetch_add(1, Ordering::Relaxed);
        self.bytes_read
            .fetch_add(payload_len as u64, Ordering::Relaxed);
    }

    pub fn record_written(&self, n: usize) {
        self.bytes_written.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn record_pending(&self, n: usize) {
        self.bytes_pending.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn clear_pending(&self) {
        self.bytes_pending.store(0, Ordering::Relaxed);
    }

    #[must_use]
    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn bytes_pending(&self) -> u64 {
        self.bytes_pending.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self) -> CycleSummary {
        CycleSummary {
            events: self.events(),
            bytes_read: self.bytes_read(),
            bytes_written: self.bytes_written(),
        }
    }
}

/// Final counters of a closed archive file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub events: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}
