// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Archival half of beatlog.
//!
//! Consumes a Redis stream of log events and writes them, newline delimited, into
//! size-capped zstd files. Progress is checkpointed in a single cursor key so a
//! restarted archiver resumes after the last buffered batch.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod archiver;
pub mod buffer;
pub mod compressor;
pub mod config;
pub mod cursor;
pub mod errors;
pub mod memory;
pub mod queue;
pub mod reader;
pub mod redis_queue;
pub mod rotator;
pub mod stats;
