// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Maps extraction records to points and feeds them to the writer.
//!
//! The service owns the writer and consumes records as the workers produce them. It
//! finishes once every sender is dropped, flushing whatever the writer still buffers.

use chrono::DateTime;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::error::WriteError;
use crate::influx::{FieldValue, Point, PointWriter};
use crate::record::ExtractionRecord;

pub const MEASUREMENT: &str = "log";

/// Records buffered between the replay workers and the emitter.
pub const RECORD_CHANNEL_CAPACITY: usize = 4096;

/// Builds the point for one record, or `None` when its timestamp is not RFC 3339
/// or lies before 1970.
pub fn to_point(record: &ExtractionRecord) -> Option<Point> {
    let timestamp = DateTime::parse_from_rfc3339(&record.timestamp).ok()?;
    let timestamp_ms = timestamp.timestamp_millis();
    if timestamp_ms < 0 {
        return None;
    }

    let mut point = Point::new(MEASUREMENT, timestamp_ms).tag("type", "warrior");
    if let Some(host) = &record.host {
        point = point.tag("host", host.as_str());
    }
    if let Some(image) = &record.container_image {
        point = point.tag("container_image", image.as_str());
    }

    if let Some(action) = &record.action {
        point = point.field("action", FieldValue::Str(action.clone()));
    }
    if let Some(state) = &record.state {
        point = point.field("state", FieldValue::Str(state.to_lowercase()));
    }
    if let Some(code) = record.status_code.and_then(|c| i64::try_from(c).ok()) {
        point = point.field("status_code", FieldValue::Int(code));
    }
    if let Some(items) = record.items.and_then(|i| i64::try_from(i).ok()) {
        point = point.field("items", FieldValue::Int(items));
    }
    if let Some(name) = &record.container_name {
        point = point.field("container_name", FieldValue::Str(name.clone()));
    }
    if let Some(action) = &record.warrior_action {
        point = point.field("warrior_action", FieldValue::Str(action.clone()));
    }
    if let Some(pipeline) = &record.pipeline {
        point = point.field("pipeline", FieldValue::Str(pipeline.clone()));
    }
    if let Some(sent) = record.rsync_sent.and_then(|n| i64::try_from(n).ok()) {
        point = point.field("rsync_sent", FieldValue::Int(sent));
    }
    if let Some(received) = record.rsync_received.and_then(|n| i64::try_from(n).ok()) {
        point = point.field("rsync_received", FieldValue::Int(received));
    }
    if let Some(throughput) = record
        .rsync_throughput
        .as_deref()
        .and_then(|t| t.parse::<f64>().ok())
    {
        point = point.field("rsync_throughput", FieldValue::Float(throughput));
    }
    Some(point)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitterReport {
    pub received: u64,
    pub written: u64,
    /// Records without a usable timestamp or fields.
    pub skipped: u64,
    /// Points lost to failed writes.
    pub failed: u64,
}

pub struct EmitterService<W> {
    rx: mpsc::Receiver<ExtractionRecord>,
    writer: W,
    report: EmitterReport,
}

impl<W: PointWriter> EmitterService<W> {
    /// Senders block once `capacity` records are waiting.
    pub fn new(writer: W, capacity: usize) -> (Self, mpsc::Sender<ExtractionRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let service = EmitterService {
            rx,
            writer,
            report: EmitterReport::default(),
        };
        (service, tx)
    }

    pub async fn run(mut self) -> EmitterReport {
        debug!("Emitter service started");
        while let Some(record) = self.rx.recv().await {
            self.report.received += 1;
            let Some(point) = to_point(&record).filter(Point::has_fields) else {
                debug!("Skipping record without usable timestamp: {record:?}");
                self.report.skipped += 1;
                continue;
            };
            // A failed send drops everything the writer had buffered.
            let at_risk = self.writer.pending() as u64 + 1;
            match self.writer.write_point(point).await {
                Ok(()) => {}
                Err(e @ WriteError::Encode(_)) => {
                    error!("Dropping point: {e}");
                    self.report.failed += 1;
                }
                Err(e) => {
                    error!("Failed to write points: {e}");
                    self.report.failed += at_risk;
                }
            }
        }

        let at_risk = self.writer.pending() as u64;
        if let Err(e) = self.writer.flush().await {
            error!("Failed to flush points: {e}");
            self.report.failed += at_risk;
        }
        self.report.written = self.report.received - self.report.skipped - self.report.failed;
        info!(
            "Emitted {} points ({} skipped, {} failed)",
            self.report.written, self.report.skipped, self.report.failed
        );
        self.report
    }
}
