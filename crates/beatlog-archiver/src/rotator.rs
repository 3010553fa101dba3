// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Archive file naming, opening and closing.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local, TimeDelta};
use tracing::debug;

use crate::errors::ArchiverError;
use crate::stats::CycleStats;

pub const ARCHIVE_SUFFIX: &str = ".txt.zst";

const MAX_NAME_ATTEMPTS: u32 = 60;

/// Writer that reports every byte it passes on to the cycle stats.
pub struct CountingWriter<W> {
    inner: W,
    stats: Arc<CycleStats>,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W, stats: Arc<CycleStats>) -> Self {
        CountingWriter { inner, stats }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.stats.record_written(n);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

pub type ArchiveWriter = CountingWriter<BufWriter<File>>;

/// An archive file open for writing.
pub struct OpenArchive {
    pub path: PathBuf,
    pub writer: ArchiveWriter,
}

#[derive(Debug, Clone)]
pub struct FileRotator {
    dir: PathBuf,
    // Unix second of the last file opened, so back-to-back cycles get ascending names.
    last_created: Option<i64>,
}

impl FileRotator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileRotator {
            dir: dir.into(),
            last_created: None,
        }
    }

    /// `{unix_seconds}-logs-{yyyy-mm-dd-HH-MM-ss}.txt.zst`
    #[must_use]
    pub fn file_name(created_at: &DateTime<Local>) -> String {
        format!(
            "{}-logs-{}{ARCHIVE_SUFFIX}",
            created_at.timestamp(),
            created_at.format("%Y-%m-%d-%H-%M-%S")
        )
    }

    /// Creates the next archive file in the output directory.
    ///
    /// Closed archives are never truncated: when `created_at` falls in the second of
    /// the previous file, or a file for it already exists, the name moves forward a
    /// second.
    pub fn open_new_file(
        &mut self,
        created_at: DateTime<Local>,
        stats: Arc<CycleStats>,
    ) -> Result<OpenArchive, ArchiverError> {
        fs::create_dir_all(&self.dir).map_err(|source| ArchiverError::OpenFile {
            path: self.dir.clone(),
            source,
        })?;

        let mut created_at = created_at;
        if let Some(last) = self.last_created {
            let behind = last - created_at.timestamp();
            if behind >= 0 {
                created_at += TimeDelta::seconds(behind + 1);
            }
        }
        let mut attempts = 0;
        loop {
            let path = self.dir.join(Self::file_name(&created_at));
            match File::options().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    debug!("Opened archive file {}", path.display());
                    self.last_created = Some(created_at.timestamp());
                    return Ok(OpenArchive {
                        path,
                        writer: CountingWriter::new(BufWriter::new(file), stats),
                    });
                }
                Err(e)
                    if e.kind() == io::ErrorKind::AlreadyExists
                        && attempts < MAX_NAME_ATTEMPTS =>
                {
                    attempts += 1;
                    created_at += TimeDelta::seconds(1);
                }
                Err(source) => return Err(ArchiverError::OpenFile { path, source }),
            }
        }
    }

    /// Flushes and fsyncs a finished archive.
    pub fn close(writer: ArchiveWriter) -> io::Result<()> {
        let file = writer.into_inner().into_inner().map_err(|e| e.into_error())?;
        file.sync_all()
    }
}
