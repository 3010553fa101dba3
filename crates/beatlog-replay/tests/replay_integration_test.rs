// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use beatlog_replay::{
    dispatch::Dispatcher,
    emitter::{EmitterReport, EmitterService},
    export::GzExportWriter,
    influx::{InfluxConfig, InfluxWriter, RetryStrategy},
    parser::{parse_file, FileStats},
    patterns::PatternSet,
    record::ExtractionRecord,
};
use flate2::read::GzDecoder;
use mockito::{Matcher, Server};
use proptest::prelude::*;
use tokio::sync::mpsc;

const LIFECYCLE_LINE: &str = r#"2024-01-01 {"@timestamp":"2024-01-01T00:00:00Z","host":{"name":"h1"},"message":"Starting task for x"}"#;

fn write_archive(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    let compressed = zstd::encode_all(content.as_bytes(), 3).expect("compression failed");
    std::fs::write(&path, compressed).expect("write failed");
    path
}

fn envelope(host: &str, message: &str) -> String {
    format!(r#"{{"@timestamp":"2024-01-01T00:00:00Z","host":{{"name":"{host}"}},"message":"{message}"}}"#)
}

fn patterns() -> Arc<PatternSet> {
    Arc::new(PatternSet::new().expect("patterns should compile"))
}

#[tokio::test]
async fn failed_file_does_not_affect_the_others() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let mut paths = Vec::new();
    for i in 0..5 {
        let content: String = (0..100)
            .map(|n| envelope(&format!("h{i}"), &format!("Submitting {n} items")) + "\n")
            .collect();
        paths.push(write_archive(dir.path(), &format!("{i}.txt.zst"), &content));
    }
    let expected = parse_file(&paths[0], &patterns(), |_| {}).expect("parse failed");

    // Truncate one of them mid-frame.
    let corrupted = paths[2].clone();
    let bytes = std::fs::read(&corrupted).expect("read failed");
    std::fs::write(&corrupted, &bytes[..bytes.len() / 2]).expect("write failed");

    let (tx, mut rx) = mpsc::channel(32);
    let counter = tokio::spawn(async move {
        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        received
    });
    let summary = Dispatcher::new(3, patterns()).dispatch(paths, tx).await;

    assert_eq!(summary.failed, vec![corrupted]);
    assert_eq!(summary.completed.len(), 4);
    for (_, stats) in &summary.completed {
        assert_eq!(*stats, expected);
    }
    assert_eq!(summary.total.lines, 4 * expected.lines);
    assert_eq!(summary.total.bytes, 4 * expected.bytes);

    let received = counter.await.expect("counter panicked");
    assert!(received >= 400, "got {received} records");
}

#[tokio::test]
async fn lifecycle_line_reaches_influx() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = write_archive(dir.path(), "a.txt.zst", &format!("{LIFECYCLE_LINE}\n"));

    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v2/write")
        .match_query(Matcher::Any)
        .match_header("Authorization", "Token secret")
        .match_body(Matcher::Exact(
            r#"log,type=warrior,host=h1 action="task",state="starting" 1704067200000"#.to_string(),
        ))
        .with_status(204)
        .expect(1)
        .create_async()
        .await;

    let writer = InfluxWriter::new(InfluxConfig {
        url: server.url(),
        org: "archiveteam".to_string(),
        bucket: "warriors".to_string(),
        token: "secret".to_string(),
        batch_size: 5000,
        timeout: Duration::from_secs(5),
        https_proxy: None,
        retry_strategy: RetryStrategy::Immediate(1),
    })
    .expect("failed to build writer");
    let (service, tx) = EmitterService::new(writer, 16);
    let emitter = tokio::spawn(service.run());

    let summary = Dispatcher::new(8, patterns()).dispatch(vec![path], tx).await;
    let report = emitter.await.expect("emitter panicked");

    assert_eq!(summary.total, FileStats { lines: 1, bytes: LIFECYCLE_LINE.len() as u64 });
    assert_eq!(
        report,
        EmitterReport {
            received: 1,
            written: 1,
            skipped: 0,
            failed: 0,
        }
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn archives_export_to_gzip_line_protocol() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let paths = vec![
        write_archive(dir.path(), "a.txt.zst", &format!("{LIFECYCLE_LINE}\n")),
        write_archive(
            dir.path(),
            "b.txt.zst",
            &format!("{}\nnot json\n", envelope("h2", "Uploading with Rsync")),
        ),
    ];
    let export = dir.path().join("parsed").join("all.influx.gz");
    let writer = GzExportWriter::create(&export).expect("failed to create export");
    let (service, tx) = EmitterService::new(writer, 4);
    let emitter = tokio::spawn(service.run());

    let summary = Dispatcher::new(2, patterns()).dispatch(paths, tx).await;
    let report = emitter.await.expect("emitter panicked");
    assert_eq!(summary.total.lines, 3);
    assert_eq!(report.written, 2);

    let mut text = String::new();
    GzDecoder::new(std::fs::File::open(&export).expect("missing export"))
        .read_to_string(&mut text)
        .expect("invalid gzip");
    let mut lines: Vec<&str> = text.lines().collect();
    lines.sort_unstable();
    assert_eq!(lines.len(), 2);
    assert!(lines.contains(
        &r#"log,type=warrior,host=h1 action="task",state="starting" 1704067200000"#
    ));
    assert!(
        lines.iter().any(|l| l.contains("host=h2") && l.contains(r#"warrior_action="item_uploading""#)),
        "{lines:?}"
    );
}

fn line_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z ]{0,40}",
        (0u32..600, 1u32..5).prop_map(|(code, n)| envelope("h", &format!("{n}={code} http://x"))),
        "(Starting|Finished) [A-Za-z]{1,12} for".prop_map(|m| envelope("h", &m)),
        (0u32..10_000).prop_map(|n| envelope("h2", &format!("Submitting {n} items"))),
        Just(LIFECYCLE_LINE.to_string()),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn replaying_a_file_twice_is_identical(lines in prop::collection::vec(line_strategy(), 0..200)) {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let content: String = lines.iter().map(|l| format!("{l}\n")).collect();
        let path = write_archive(dir.path(), "p.txt.zst", &content);
        let patterns = patterns();

        let run = || {
            let mut records: Vec<ExtractionRecord> = Vec::new();
            let stats = parse_file(&path, &patterns, |r| records.push(r)).expect("parse failed");
            records.sort();
            (stats, records)
        };
        let (first_stats, first_records) = run();
        let (second_stats, second_records) = run();

        prop_assert_eq!(first_stats, second_stats);
        prop_assert_eq!(first_stats.lines, lines.len() as u64);
        prop_assert_eq!(first_records, second_records);
    }
}
