// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Streaming replay of one archive file.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info};
use zstd::stream::read::Decoder;

use crate::error::ReplayError;
use crate::patterns::PatternSet;
use crate::record::{extract_records, ExtractionRecord};

/// Lines between two progress reports.
pub const PROGRESS_EVERY: u64 = 1 << 20;

/// Counters for a completely replayed file. `bytes` excludes line terminators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStats {
    pub lines: u64,
    pub bytes: u64,
}

impl FileStats {
    pub fn merge(&mut self, other: FileStats) {
        self.lines += other.lines;
        self.bytes += other.bytes;
    }
}

/// Decompresses `path` line by line and hands every extracted record to `on_record`.
///
/// Records are delivered in line order. Any read or decompression error, including
/// a truncated frame, fails the whole file; records already delivered stay delivered.
pub fn parse_file<F>(
    path: &Path,
    patterns: &PatternSet,
    mut on_record: F,
) -> Result<FileStats, ReplayError>
where
    F: FnMut(ExtractionRecord),
{
    let started = Instant::now();
    debug!("Starting replay of {}", path.display());

    let file = File::open(path).map_err(|source| ReplayError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let decoder = Decoder::new(file).map_err(|source| ReplayError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(decoder);

    let mut stats = FileStats::default();
    let mut last_report = Instant::now();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .map_err(|source| ReplayError::Read {
                path: path.to_path_buf(),
                lines: stats.lines,
                source,
            })?;
        if n == 0 {
            break;
        }

        let line = trim_line_end(&buf);
        stats.lines += 1;
        stats.bytes += line.len() as u64;

        let text = String::from_utf8_lossy(line);
        for record in extract_records(&text, patterns) {
            on_record(record);
        }

        if stats.lines % PROGRESS_EVERY == 0 {
            info!(
                "{}: {} lines, {} bytes, {:.3}s",
                path.display(),
                stats.lines,
                stats.bytes,
                last_report.elapsed().as_secs_f32()
            );
            last_report = Instant::now();
        }
    }

    info!(
        "Completed {}: {} lines, {} bytes in {:.3}s",
        path.display(),
        stats.lines,
        stats.bytes,
        started.elapsed().as_secs_f32()
    );
    Ok(stats)
}

fn trim_line_end(buf: &[u8]) -> &[u8] {
    let line = buf.strip_suffix(b"\n").unwrap_or(buf);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_archive(dir: &Path, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        let compressed = zstd::encode_all(content, 3).expect("compression failed");
        std::fs::write(&path, compressed).expect("write failed");
        path
    }

    fn patterns() -> PatternSet {
        PatternSet::new().expect("patterns should compile")
    }

    #[test]
    fn test_counts_lines_and_bytes() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = write_archive(dir.path(), "a.txt.zst", b"abc\r\nde\nlast-no-newline");

        let stats = parse_file(&path, &patterns(), |_| {}).expect("parse failed");

        assert_eq!(
            stats,
            FileStats {
                lines: 3,
                bytes: 3 + 2 + 15,
            }
        );
    }

    #[test]
    fn test_records_in_line_order() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let content = concat!(
            r#"{"@timestamp":"2024-01-01T00:00:00Z","host":{"name":"h1"},"message":"Starting Upload for x"}"#,
            "\n",
            "not json at all\n",
            r#"{"@timestamp":"2024-01-01T00:00:01Z","host":{"name":"h1"},"message":"Finished Upload for x"}"#,
            "\n",
        );
        let path = write_archive(dir.path(), "b.txt.zst", content.as_bytes());

        let mut records = Vec::new();
        let stats = parse_file(&path, &patterns(), |r| records.push(r)).expect("parse failed");

        assert_eq!(stats.lines, 3);
        let states: Vec<_> = records.iter().map(|r| r.state.clone()).collect();
        assert_eq!(
            states,
            vec![Some("Starting".to_string()), Some("Finished".to_string())]
        );
    }

    #[test]
    fn test_truncated_file_fails() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let content: String = (0..2000).map(|i| format!("line {i}\n")).collect();
        let compressed = zstd::encode_all(content.as_bytes(), 3).expect("compression failed");
        let path = dir.path().join("truncated.txt.zst");
        let mut file = File::create(&path).expect("create failed");
        file.write_all(&compressed[..compressed.len() / 2])
            .expect("write failed");
        drop(file);

        let result = parse_file(&path, &patterns(), |_| {});
        assert!(matches!(result, Err(ReplayError::Read { .. })), "{result:?}");
    }

    #[test]
    fn test_missing_file_fails() {
        let result = parse_file(Path::new("/nonexistent/x.txt.zst"), &patterns(), |_| {});
        assert!(matches!(result, Err(ReplayError::Open { .. })));
    }
}
