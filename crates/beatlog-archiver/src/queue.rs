// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Boundary to the message queue and the cursor key.
//!
//! The archiver only relies on two operations: a batched read after a cursor, and a
//! get/set of one scalar key. Both are expressed as traits so the read loop can be
//! driven by Redis in production and by [`crate::memory`] in tests.

use std::time::Duration;

use async_trait::async_trait;

use crate::cursor::Cursor;
use crate::errors::QueueError;

/// One stream entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: Cursor,
    pub payload: Vec<u8>,
}

impl Event {
    pub fn new(id: Cursor, payload: impl Into<Vec<u8>>) -> Self {
        Event {
            id,
            payload: payload.into(),
        }
    }
}

#[async_trait]
pub trait EventQueue: Send {
    /// Returns up to `count` entries strictly after `cursor`.
    ///
    /// With `block` set the call waits up to that long for new entries and returns an
    /// empty vector on timeout. Without it the call returns immediately.
    async fn read(
        &mut self,
        cursor: &Cursor,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<Event>, QueueError>;
}

#[async_trait]
pub trait CursorStore: Send {
    async fn load(&mut self) -> Result<Option<Cursor>, QueueError>;

    async fn store(&mut self, cursor: &Cursor) -> Result<(), QueueError>;
}
