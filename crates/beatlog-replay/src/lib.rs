// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Replay half of beatlog.
//!
//! Decompresses archive files in parallel, extracts warrior events from the log
//! lines and writes them to InfluxDB as points, or to a gzip line-protocol export.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod dispatch;
pub mod emitter;
pub mod error;
pub mod export;
pub mod influx;
pub mod parser;
pub mod patterns;
pub mod record;
pub mod stream_replay;
