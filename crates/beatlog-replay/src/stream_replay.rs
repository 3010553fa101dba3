// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Extraction over the backlog still held in the queue.
//!
//! Reads the stream from its first entry without blocking until a read comes back
//! empty. The archiver's cursor is neither read nor written.

use beatlog_archiver::cursor::Cursor;
use beatlog_archiver::errors::QueueError;
use beatlog_archiver::queue::EventQueue;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::parser::FileStats;
use crate::patterns::PatternSet;
use crate::record::{extract_records, ExtractionRecord};

pub const STREAM_BATCH_SIZE: usize = 2048;

/// Runs every queued payload through the extraction patterns and sends the records
/// on `records`, waiting whenever the channel is full.
///
/// Stats count payloads as lines. Reading stops early if the receiver is gone.
pub async fn replay_stream<Q>(
    queue: &mut Q,
    patterns: &PatternSet,
    records: &mpsc::Sender<ExtractionRecord>,
) -> Result<FileStats, QueueError>
where
    Q: EventQueue,
{
    let mut cursor = Cursor::new(0, 0);
    let mut stats = FileStats::default();
    loop {
        let events = queue.read(&cursor, STREAM_BATCH_SIZE, None).await?;
        let Some(last) = events.last() else {
            break;
        };
        cursor = last.id.clone();

        for event in &events {
            stats.lines += 1;
            stats.bytes += event.payload.len() as u64;
            let text = String::from_utf8_lossy(&event.payload);
            for record in extract_records(&text, patterns) {
                if records.send(record).await.is_err() {
                    warn!("Record receiver closed, stopping queue replay at {cursor}");
                    return Ok(stats);
                }
            }
        }
        debug!("Replayed {} queued events up to {cursor}", stats.lines);
    }
    info!(
        "Replayed queue backlog: {} events, {} bytes",
        stats.lines, stats.bytes
    );
    Ok(stats)
}
