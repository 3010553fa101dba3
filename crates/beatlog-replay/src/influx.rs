// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! InfluxDB v2 line-protocol writer.
//!
//! Points are buffered and posted in batches to `/api/v2/write`. Transient failures
//! (network errors, 5xx) are retried with the configured strategy; a 4xx response
//! means the batch will never be accepted, so it is dropped.

use std::time::Duration;

use async_trait::async_trait;
use influxdb::{InfluxDbWriteable, Query, Timestamp, Type};
use reqwest::StatusCode;
use tracing::{debug, error, warn};

use crate::error::WriteError;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    Float(f64),
}

impl From<FieldValue> for Type {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Str(s) => Type::Text(s),
            FieldValue::Int(n) => Type::SignedInteger(n),
            FieldValue::Float(f) => Type::Float(f),
        }
    }
}

/// One point with millisecond precision.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    measurement: String,
    tags: Vec<(String, String)>,
    fields: Vec<(String, FieldValue)>,
    timestamp_ms: i64,
}

impl Point {
    pub fn new(measurement: impl Into<String>, timestamp_ms: i64) -> Self {
        Point {
            measurement: measurement.into(),
            tags: Vec::new(),
            fields: Vec::new(),
            timestamp_ms,
        }
    }

    /// Adds a tag. Influx rejects empty tag values, so those are left out.
    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.is_empty() {
            self.tags.push((key.into(), value));
        }
        self
    }

    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.fields.push((key.into(), value));
        self
    }

    #[must_use]
    pub fn has_fields(&self) -> bool {
        !self.fields.is_empty()
    }

    #[must_use]
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    #[must_use]
    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn field_value(&self, key: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Encodes the point as one line of line protocol.
    pub fn to_line_protocol(&self) -> Result<String, WriteError> {
        let timestamp = u128::try_from(self.timestamp_ms).map_err(|_| {
            WriteError::Encode(format!("timestamp {} is before 1970", self.timestamp_ms))
        })?;
        let mut query = Timestamp::Milliseconds(timestamp).into_query(self.measurement.as_str());
        for (key, value) in &self.tags {
            query = query.add_tag(key.as_str(), Type::Text(value.clone()));
        }
        for (key, value) in &self.fields {
            query = query.add_field(key.as_str(), Type::from(value.clone()));
        }
        let line = query
            .build()
            .map_err(|e| WriteError::Encode(e.to_string()))?;
        Ok(line.get())
    }
}

/// Destination of emitted points.
#[async_trait]
pub trait PointWriter: Send {
    async fn write_point(&mut self, point: Point) -> Result<(), WriteError>;

    /// Sends anything still buffered.
    async fn flush(&mut self) -> Result<(), WriteError>;

    /// Points accepted but not yet sent.
    fn pending(&self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Up to `n` attempts back to back.
    Immediate(u64),
    /// Up to `attempts` attempts, waiting `delay_ms * attempt` between them.
    LinearBackoff(u64, u64),
}

impl RetryStrategy {
    fn attempts(&self) -> u64 {
        match self {
            RetryStrategy::Immediate(n) | RetryStrategy::LinearBackoff(n, _) => (*n).max(1),
        }
    }

    fn delay(&self, attempt: u64) -> Option<Duration> {
        match self {
            RetryStrategy::Immediate(_) => None,
            RetryStrategy::LinearBackoff(_, delay_ms) => {
                Some(Duration::from_millis(delay_ms.saturating_mul(attempt)))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub url: String,
    pub org: String,
    pub bucket: String,
    pub token: String,
    pub batch_size: usize,
    pub timeout: Duration,
    pub https_proxy: Option<String>,
    pub retry_strategy: RetryStrategy,
}

pub struct InfluxWriter {
    client: reqwest::Client,
    endpoint: String,
    org: String,
    bucket: String,
    token: String,
    batch_size: usize,
    retry_strategy: RetryStrategy,
    pending: Vec<String>,
}

impl InfluxWriter {
    pub fn new(config: InfluxConfig) -> Result<Self, WriteError> {
        let client = build_client(config.https_proxy.as_deref(), config.timeout)
            .map_err(|e| WriteError::Client(e.to_string()))?;
        let endpoint = format!("{}/api/v2/write", config.url.trim_end_matches('/'));
        Ok(InfluxWriter {
            client,
            endpoint,
            org: config.org,
            bucket: config.bucket,
            token: config.token,
            batch_size: config.batch_size.max(1),
            retry_strategy: config.retry_strategy,
            pending: Vec::new(),
        })
    }

    async fn send(&self, body: String) -> Result<(), WriteError> {
        let attempts = self.retry_strategy.attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let resp = self
                .client
                .post(&self.endpoint)
                .query(&[
                    ("org", self.org.as_str()),
                    ("bucket", self.bucket.as_str()),
                    ("precision", "ms"),
                ])
                .header("Authorization", format!("Token {}", self.token))
                .header("Content-Type", "text/plain; charset=utf-8")
                .body(body.clone())
                .send()
                .await;

            let message = match resp {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if is_permanent(status) {
                        return Err(WriteError::Rejected { status, body: text });
                    }
                    format!("{status}: {text}")
                }
                Err(e) => e.to_string(),
            };

            if attempt >= attempts {
                return Err(WriteError::Exhausted {
                    attempts: attempt,
                    message,
                });
            }
            warn!("Influx write attempt {attempt} failed, retrying: {message}");
            if let Some(delay) = self.retry_strategy.delay(attempt) {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn is_permanent(status: StatusCode) -> bool {
    status.is_client_error()
}

#[async_trait]
impl PointWriter for InfluxWriter {
    async fn write_point(&mut self, point: Point) -> Result<(), WriteError> {
        self.pending.push(point.to_line_protocol()?);
        if self.pending.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), WriteError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let lines = std::mem::take(&mut self.pending);
        let count = lines.len();
        debug!("Writing {count} points to influx");
        match self.send(lines.join("\n")).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("Dropping {count} points: {e}");
                Err(e)
            }
        }
    }

    fn pending(&self) -> usize {
        self.pending.len()
    }
}

pub fn build_client(
    proxy_url: Option<&str>,
    timeout: Duration,
) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if let Some(proxy) = proxy_url {
        builder = builder.proxy(reqwest::Proxy::https(proxy)?);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn config(url: String, batch_size: usize, retry_strategy: RetryStrategy) -> InfluxConfig {
        InfluxConfig {
            url,
            org: "archive team".to_string(),
            bucket: "warriors".to_string(),
            token: "secret".to_string(),
            batch_size,
            timeout: Duration::from_secs(5),
            https_proxy: None,
            retry_strategy,
        }
    }

    fn point(n: i64) -> Point {
        Point::new("log", 1_704_067_200_000 + n)
            .tag("type", "warrior")
            .field("items", FieldValue::Int(n))
    }

    #[test]
    fn test_line_protocol() {
        let point = Point::new("log", 1_704_067_200_000)
            .tag("type", "warrior")
            .tag("host", "h 1,a=b")
            .tag("container_image", "")
            .field("action", FieldValue::Str("say \"hi\"".to_string()))
            .field("status_code", FieldValue::Int(200));
        assert_eq!(
            point.to_line_protocol().expect("encodable point"),
            r#"log,type=warrior,host=h\ 1\,a\=b action="say \"hi\"",status_code=200i 1704067200000"#
        );
        assert_eq!(point.tag_value("container_image"), None);
    }

    #[test]
    fn test_unencodable_points() {
        let no_fields = Point::new("log", 1).tag("type", "warrior");
        assert!(matches!(no_fields.to_line_protocol(), Err(WriteError::Encode(_))));

        let before_epoch = Point::new("log", -1).field("items", FieldValue::Int(1));
        assert!(matches!(before_epoch.to_line_protocol(), Err(WriteError::Encode(_))));
    }

    #[tokio::test]
    async fn test_encode_failure_keeps_pending_points() {
        let mut writer = InfluxWriter::new(config(
            "http://127.0.0.1:9".to_string(),
            10,
            RetryStrategy::Immediate(1),
        ))
        .expect("failed to build writer");
        writer.write_point(point(1)).await.expect("write failed");
        let result = writer.write_point(Point::new("log", 1)).await;
        assert!(matches!(result, Err(WriteError::Encode(_))));
        assert_eq!(writer.pending(), 1);
    }

    #[tokio::test]
    async fn test_batches_and_flushes() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v2/write")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("org".into(), "archive team".into()),
                Matcher::UrlEncoded("bucket".into(), "warriors".into()),
                Matcher::UrlEncoded("precision".into(), "ms".into()),
            ]))
            .match_header("Authorization", "Token secret")
            .with_status(204)
            .expect(2)
            .create_async()
            .await;

        let mut writer = InfluxWriter::new(config(server.url(), 2, RetryStrategy::Immediate(1)))
            .expect("failed to build writer");
        for n in 0..3 {
            writer.write_point(point(n)).await.expect("write failed");
        }
        assert_eq!(writer.pending(), 1);
        writer.flush().await.expect("flush failed");
        assert_eq!(writer.pending(), 0);

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v2/write")
            .match_query(Matcher::Any)
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let mut writer = InfluxWriter::new(config(
            server.url(),
            1,
            RetryStrategy::LinearBackoff(3, 1),
        ))
        .expect("failed to build writer");
        let result = writer.write_point(point(1)).await;

        assert!(matches!(result, Err(WriteError::Exhausted { attempts: 3, .. })));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v2/write")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body("unable to parse")
            .expect(1)
            .create_async()
            .await;

        let mut writer = InfluxWriter::new(config(
            server.url(),
            1,
            RetryStrategy::LinearBackoff(3, 1),
        ))
        .expect("failed to build writer");
        let result = writer.write_point(point(1)).await;

        match result {
            Err(WriteError::Rejected { status, body }) => {
                assert_eq!(status, StatusCode::BAD_REQUEST);
                assert_eq!(body, "unable to parse");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(writer.pending(), 0);
        mock.assert_async().await;
    }
}
