// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};

use beatlog::init_logging;
use beatlog_archiver::redis_queue::RedisQueue;
use beatlog_replay::{
    config::{ReplayConfig, ReplaySink},
    dispatch::{discover, Dispatcher},
    emitter::EmitterService,
    export::GzExportWriter,
    influx::{InfluxWriter, PointWriter},
    patterns::PatternSet,
    stream_replay::replay_stream,
};

#[tokio::main]
pub async fn main() -> ExitCode {
    let config = match ReplayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_logging("info");
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config.log_level);

    let patterns = match PatternSet::new() {
        Ok(patterns) => Arc::new(patterns),
        Err(e) => {
            error!("Invalid message pattern: {e}");
            return ExitCode::FAILURE;
        }
    };
    let paths = match discover(&config.archive_glob) {
        Ok(paths) => paths,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    match &config.sink {
        ReplaySink::Influx(influx) => match InfluxWriter::new(influx.clone()) {
            Ok(writer) => replay(&config, patterns, paths, writer).await,
            Err(e) => {
                error!("{e}");
                ExitCode::FAILURE
            }
        },
        ReplaySink::Export(path) => match GzExportWriter::create(path) {
            Ok(writer) => replay(&config, patterns, paths, writer).await,
            Err(e) => {
                error!("{e}");
                ExitCode::FAILURE
            }
        },
    }
}

async fn replay<W>(
    config: &ReplayConfig,
    patterns: Arc<PatternSet>,
    paths: Vec<PathBuf>,
    writer: W,
) -> ExitCode
where
    W: PointWriter + 'static,
{
    let (service, records) = EmitterService::new(writer, config.record_buffer);
    let emitter = tokio::spawn(service.run());

    if config.replay_queue {
        match RedisQueue::connect(&config.redis_url, &config.stream).await {
            Ok(mut queue) => {
                if let Err(e) = replay_stream(&mut queue, &patterns, &records).await {
                    error!("Queue replay of {} stopped: {e}", config.stream);
                }
            }
            Err(e) => error!("Unable to connect to {}: {e}", config.redis_url),
        }
    }

    let summary = Dispatcher::new(config.workers, patterns)
        .dispatch(paths, records)
        .await;

    let report = match emitter.await {
        Ok(report) => report,
        Err(e) => {
            error!("Emitter task failed: {e}");
            return ExitCode::FAILURE;
        }
    };
    info!(
        "{} total lines, {} total bytes, {} points written",
        summary.total.lines, summary.total.bytes, report.written
    );
    ExitCode::SUCCESS
}
