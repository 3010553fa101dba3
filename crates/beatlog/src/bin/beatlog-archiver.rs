// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::process::ExitCode;

use tracing::{error, info};

use beatlog::{init_logging, shutdown_on_ctrl_c};
use beatlog_archiver::{archiver::Archiver, config::ArchiverConfig, redis_queue::RedisQueue};

#[tokio::main]
pub async fn main() -> ExitCode {
    let config = match ArchiverConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_logging("info");
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config.log_level);

    let cancel = shutdown_on_ctrl_c();
    let connected = RedisQueue::connect_retrying(
        &config.redis_url,
        &config.stream,
        config.retry_delay,
        &cancel,
    )
    .await;
    let queue = match connected {
        Ok(Some(queue)) => queue.with_cursor_key(&config.cursor_key),
        Ok(None) => {
            info!("Shutdown requested before connecting, exiting");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            error!("Invalid redis url {}: {e}", config.redis_url);
            return ExitCode::FAILURE;
        }
    };

    let Some(archiver) = Archiver::resume(queue.clone(), queue, &config, &cancel).await else {
        info!("Shutdown requested before the cursor was loaded, exiting");
        return ExitCode::SUCCESS;
    };
    info!(
        "Archiving stream {} into {} from {}",
        config.stream,
        config.output_dir.display(),
        archiver.reader().cursor()
    );

    match archiver.run(cancel).await {
        Ok(closed) => {
            info!("Archived into {} files, exiting", closed.len());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Archiver stopped: {e}");
            ExitCode::FAILURE
        }
    }
}
