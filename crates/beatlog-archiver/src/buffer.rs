// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pull-driven byte source feeding the compressor.
//!
//! Nothing is read from the queue until the compressor asks for the next chunk, and
//! the fill function refuses to read once the current archive file is at its cap.
//! That refusal is the only backpressure in the archiver: an empty fill ends the
//! sequence and the compressor finishes the file.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::cursor::Cursor;
use crate::queue::{CursorStore, EventQueue};
use crate::reader::{ReadOutcome, StreamReader};
use crate::stats::CycleStats;

/// Chunk size requested from the fill function.
pub const DEFAULT_FILL_CHUNK: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillStatus {
    /// At least the requested number of bytes was appended.
    Filled,
    /// The archive file reached its size cap; no more input for this file.
    Capped,
    /// Shutdown was requested; whatever was appended is the last input.
    Cancelled,
}

#[async_trait]
pub trait Fill: Send {
    /// Appends at least `want` bytes to `out` unless the input has to end early.
    async fn fill(&mut self, want: usize, out: &mut Vec<u8>) -> FillStatus;
}

/// Appends one archived line: the payload and its delimiter.
pub fn push_line(out: &mut Vec<u8>, payload: &[u8]) {
    out.reserve(payload.len() + 1);
    out.extend_from_slice(payload);
    out.push(b'\n');
}

pub struct ProducerBuffer<F> {
    fill: F,
    chunk_size: usize,
    ended: bool,
}

impl<F: Fill> ProducerBuffer<F> {
    pub fn new(fill: F, chunk_size: usize) -> Self {
        ProducerBuffer {
            fill,
            chunk_size: chunk_size.max(1),
            ended: false,
        }
    }

    /// Next chunk of input, or `None` once the sequence has ended.
    pub async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        if self.ended {
            return None;
        }
        let mut out = Vec::with_capacity(self.chunk_size);
        let status = self.fill.fill(self.chunk_size, &mut out).await;
        if status != FillStatus::Filled || out.is_empty() {
            self.ended = true;
        }
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.ended
    }
}

/// Fill function backed by the stream reader.
///
/// The size cap is checked before every queue read against the compressed bytes
/// written, the input the compressor has not flushed yet and the bytes already
/// appended to this chunk. One file overshoots the cap by at most one read batch.
pub struct StreamFill<'a, Q, C> {
    reader: &'a mut StreamReader<Q, C>,
    stats: &'a CycleStats,
    max_file_size: u64,
    cancel: &'a CancellationToken,
}

impl<'a, Q: EventQueue, C: CursorStore> StreamFill<'a, Q, C> {
    pub fn new(
        reader: &'a mut StreamReader<Q, C>,
        stats: &'a CycleStats,
        max_file_size: u64,
        cancel: &'a CancellationToken,
    ) -> Self {
        StreamFill {
            reader,
            stats,
            max_file_size,
            cancel,
        }
    }

    fn at_cap(&self, appended: usize) -> bool {
        self.stats.bytes_written() + self.stats.bytes_pending() + appended as u64
            >= self.max_file_size
    }
}

#[async_trait]
impl<Q: EventQueue, C: CursorStore> Fill for StreamFill<'_, Q, C> {
    async fn fill(&mut self, want: usize, out: &mut Vec<u8>) -> FillStatus {
        while out.len() < want {
            if self.at_cap(out.len()) {
                return FillStatus::Capped;
            }

            let events = match self.reader.next_batch(self.cancel).await {
                ReadOutcome::Batch(events) => events,
                ReadOutcome::Cancelled => return FillStatus::Cancelled,
            };

            let mut last: Option<Cursor> = None;
            for event in events {
                push_line(out, &event.payload);
                self.stats.record_event(event.payload.len());
                last = Some(event.id);
            }

            // The batch is buffered; persist its position before reading again.
            if let Some(last) = last {
                if !self.reader.checkpoint(&last, self.cancel).await {
                    return FillStatus::Cancelled;
                }
            }
        }
        FillStatus::Filled
    }
}
