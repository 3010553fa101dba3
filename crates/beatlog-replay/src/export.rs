// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Offline export of points as gzip-compressed line protocol.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, info};

use crate::error::WriteError;
use crate::influx::{Point, PointWriter};

pub const EXPORT_SUFFIX: &str = ".influx.gz";

/// Writes one line-protocol line per point into a gzip file.
///
/// The file can be loaded later with `influx write --format lp --compression gzip`.
pub struct GzExportWriter {
    path: PathBuf,
    encoder: GzEncoder<BufWriter<File>>,
    points: u64,
}

impl GzExportWriter {
    /// Creates `path`, and its parent directory when missing.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, WriteError> {
        let path = path.into();
        let export_error = |source| WriteError::Export {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(export_error)?;
        }
        let file = File::create(&path).map_err(export_error)?;
        debug!("Exporting points to {}", path.display());
        Ok(GzExportWriter {
            encoder: GzEncoder::new(BufWriter::new(file), Compression::fast()),
            path,
            points: 0,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn export_error(&self, source: io::Error) -> WriteError {
        WriteError::Export {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl PointWriter for GzExportWriter {
    async fn write_point(&mut self, point: Point) -> Result<(), WriteError> {
        let mut line = point.to_line_protocol()?;
        line.push('\n');
        self.encoder
            .write_all(line.as_bytes())
            .map_err(|e| self.export_error(e))?;
        self.points += 1;
        Ok(())
    }

    /// Writes the gzip trailer. Call once, after the last point.
    async fn flush(&mut self) -> Result<(), WriteError> {
        self.encoder.try_finish().map_err(|e| self.export_error(e))?;
        self.encoder
            .get_mut()
            .flush()
            .map_err(|e| self.export_error(e))?;
        info!("Exported {} points to {}", self.points, self.path.display());
        Ok(())
    }

    fn pending(&self) -> usize {
        0
    }
}
