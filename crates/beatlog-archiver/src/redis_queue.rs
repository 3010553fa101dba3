// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Redis Streams implementation of the queue boundary.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::StreamReadOptions;
use redis::{AsyncCommands, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::cursor::Cursor;
use crate::errors::QueueError;
use crate::queue::{CursorStore, Event, EventQueue};

pub const DEFAULT_CURSOR_KEY: &str = "filebeat_last";

/// Reads one stream and keeps its cursor under `cursor_key`.
///
/// [`ConnectionManager`] reconnects on its own, so a dropped connection surfaces as a
/// transport error on the next call and is retried by the stream reader.
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
    stream: String,
    cursor_key: String,
}

impl RedisQueue {
    pub async fn connect(url: &str, stream: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::from_connection(conn, stream))
    }

    /// Connects, retrying every `retry_delay` while the server is unreachable.
    ///
    /// An unusable URL is returned as an error right away. Returns `Ok(None)` if
    /// `cancel` fires before a connection is made.
    pub async fn connect_retrying(
        url: &str,
        stream: &str,
        retry_delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Self>, QueueError> {
        let client = redis::Client::open(url)?;
        loop {
            let attempt = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(None),
                attempt = ConnectionManager::new(client.clone()) => attempt,
            };
            match attempt {
                Ok(conn) => return Ok(Some(Self::from_connection(conn, stream))),
                Err(e) => {
                    error!("Unable to connect to redis, retrying: {e}");
                    tokio::select! {
                        () = tokio::time::sleep(retry_delay) => {}
                        () = cancel.cancelled() => return Ok(None),
                    }
                }
            }
        }
    }

    fn from_connection(conn: ConnectionManager, stream: &str) -> Self {
        debug!("Connected to redis stream {stream}");
        RedisQueue {
            conn,
            stream: stream.to_string(),
            cursor_key: DEFAULT_CURSOR_KEY.to_string(),
        }
    }

    #[must_use]
    pub fn with_cursor_key(mut self, cursor_key: &str) -> Self {
        self.cursor_key = cursor_key.to_string();
        self
    }
}

fn unexpected(what: &str, value: &Value) -> QueueError {
    QueueError::Protocol(format!("unexpected {what} in XREAD reply: {value:?}"))
}

/// Value of the first field of an entry, in reply order.
fn first_field_value(fields: Value) -> Option<Value> {
    match fields {
        Value::Array(items) => items.into_iter().nth(1),
        Value::Map(pairs) => pairs.into_iter().next().map(|(_, value)| value),
        _ => None,
    }
}

/// Turns an `XREAD` reply into events.
///
/// Filebeat's redis output writes the document as the only field value; when an
/// entry carries more fields, the first one is archived.
fn parse_read_reply(reply: Value) -> Result<Vec<Event>, QueueError> {
    let streams: Vec<Value> = match reply {
        Value::Nil => return Ok(Vec::new()),
        Value::Map(streams) => streams.into_iter().map(|(_, entries)| entries).collect(),
        Value::Array(streams) => streams
            .into_iter()
            .map(|stream| match stream {
                Value::Array(mut pair) if pair.len() == 2 => Ok(pair.swap_remove(1)),
                other => Err(unexpected("stream", &other)),
            })
            .collect::<Result<_, _>>()?,
        other => return Err(unexpected("reply", &other)),
    };

    let mut events = Vec::new();
    for entries in streams {
        let entries = match entries {
            Value::Array(entries) => entries,
            other => return Err(unexpected("entry list", &other)),
        };
        for entry in entries {
            let (id, fields) = match entry {
                Value::Array(mut parts) if parts.len() == 2 => {
                    let fields = parts.swap_remove(1);
                    (parts.swap_remove(0), fields)
                }
                other => return Err(unexpected("entry", &other)),
            };
            let id: Cursor = redis::from_redis_value::<String>(&id)?.parse()?;
            let payload = match first_field_value(fields) {
                Some(Value::BulkString(bytes)) => bytes,
                Some(Value::SimpleString(text)) => text.into_bytes(),
                Some(other) => {
                    warn!("Skipping stream entry {id} with non-string payload: {other:?}");
                    continue;
                }
                None => {
                    warn!("Skipping stream entry {id} without fields");
                    continue;
                }
            };
            events.push(Event { id, payload });
        }
    }
    Ok(events)
}

#[async_trait]
impl EventQueue for RedisQueue {
    async fn read(
        &mut self,
        cursor: &Cursor,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Vec<Event>, QueueError> {
        let mut options = StreamReadOptions::default().count(count);
        if let Some(block) = block {
            // BLOCK 0 means forever in redis; never ask for that.
            let block_ms = usize::try_from(block.as_millis()).unwrap_or(usize::MAX).max(1);
            options = options.block(block_ms);
        }

        let id = cursor.to_string();
        let reply: Value = self
            .conn
            .xread_options(&[self.stream.as_str()], &[id.as_str()], &options)
            .await?;
        parse_read_reply(reply)
    }
}

#[async_trait]
impl CursorStore for RedisQueue {
    async fn load(&mut self) -> Result<Option<Cursor>, QueueError> {
        let value: Option<String> = self.conn.get(&self.cursor_key).await?;
        Ok(value.map(|v| v.parse()).transpose()?)
    }

    async fn store(&mut self, cursor: &Cursor) -> Result<(), QueueError> {
        let _: () = self.conn.set(&self.cursor_key, cursor.to_string()).await?;
        Ok(())
    }
}
