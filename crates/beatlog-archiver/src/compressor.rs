// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io::{self, Write};

use tracing::debug;
use zstd::stream::write::Encoder;
use zstd::zstd_safe::CompressionLevel;

use crate::buffer::{Fill, ProducerBuffer};
use crate::stats::CycleStats;

/// Uncompressed input between two encoder flushes.
pub const DEFAULT_FLUSH_EVERY: usize = 1024 * 1024;

/// Streaming zstd stage between the producer buffer and the file sink.
#[derive(Debug, Clone, Copy)]
pub struct Compressor {
    level: CompressionLevel,
    flush_every: usize,
}

impl Compressor {
    #[must_use]
    pub fn new(level: CompressionLevel) -> Self {
        Compressor {
            level,
            flush_every: DEFAULT_FLUSH_EVERY,
        }
    }

    #[must_use]
    pub fn with_flush_every(mut self, flush_every: usize) -> Self {
        self.flush_every = flush_every.max(1);
        self
    }

    /// Drains `buffer` into `sink` and finishes the zstd frame.
    ///
    /// Input not yet flushed through the encoder is reported as pending in `stats`
    /// so the cap check never undercounts. Returning is the "finished" signal: the
    /// sink then holds a complete frame.
    pub async fn run<F, W>(
        &self,
        buffer: &mut ProducerBuffer<F>,
        sink: W,
        stats: &CycleStats,
    ) -> io::Result<W>
    where
        F: Fill,
        W: Write,
    {
        let mut encoder = Encoder::new(sink, self.level)?;
        let mut chunks = 0usize;
        let mut unflushed = 0usize;
        while let Some(chunk) = buffer.next_chunk().await {
            encoder.write_all(&chunk)?;
            unflushed += chunk.len();
            stats.record_pending(chunk.len());
            if unflushed >= self.flush_every {
                encoder.flush()?;
                stats.clear_pending();
                unflushed = 0;
            }
            chunks += 1;
        }
        debug!("Input ended after {chunks} chunks, finishing zstd frame");
        let sink = encoder.finish()?;
        stats.clear_pending();
        Ok(sink)
    }
}
