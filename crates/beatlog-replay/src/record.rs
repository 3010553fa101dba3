// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Filebeat envelope and the records extracted from it.

use serde::Deserialize;

use crate::patterns::{mentions_warrior_action, warrior_action, MatchedFields, PatternSet};

/// The JSON document Filebeat ships for every log line.
///
/// Only the fields replay uses are modelled; everything else is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BeatEnvelope {
    #[serde(rename = "@timestamp")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub host: Option<BeatHost>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub container: Option<BeatContainer>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BeatHost {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BeatContainer {
    pub id: Option<String>,
    pub name: Option<String>,
    pub image: Option<BeatImage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BeatImage {
    pub name: Option<String>,
}

impl BeatEnvelope {
    /// Parses the envelope of an archived line.
    ///
    /// Lines that carry a plain-text prefix before the document are parsed from
    /// their first `{`.
    pub fn parse(line: &str) -> Option<Self> {
        if let Ok(envelope) = serde_json::from_str(line) {
            return Some(envelope);
        }
        let start = line.find('{')?;
        if start == 0 {
            return None;
        }
        serde_json::from_str(&line[start..]).ok()
    }

    fn host_name(&self) -> Option<String> {
        self.host.as_ref().and_then(|h| h.name.clone())
    }

    fn container_name(&self) -> Option<String> {
        self.container.as_ref().and_then(|c| c.name.clone())
    }

    fn container_image(&self) -> Option<String> {
        self.container
            .as_ref()
            .and_then(|c| c.image.as_ref())
            .and_then(|i| i.name.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtractionRecord {
    /// RFC 3339, as found in the envelope.
    pub timestamp: String,
    pub host: Option<String>,
    pub action: Option<String>,
    pub status_code: Option<u64>,
    pub state: Option<String>,
    pub items: Option<u64>,
    pub container_name: Option<String>,
    pub container_image: Option<String>,
    pub warrior_action: Option<String>,
    pub pipeline: Option<String>,
    pub rsync_sent: Option<u64>,
    pub rsync_received: Option<u64>,
    pub rsync_throughput: Option<String>,
}

impl ExtractionRecord {
    fn new(envelope: &BeatEnvelope, timestamp: &str, fields: MatchedFields) -> Self {
        ExtractionRecord {
            timestamp: timestamp.to_string(),
            host: envelope.host_name(),
            action: fields.action,
            status_code: fields.status_code,
            state: fields.state,
            items: fields.items,
            container_name: envelope.container_name(),
            container_image: envelope.container_image(),
            warrior_action: envelope
                .message
                .as_deref()
                .and_then(warrior_action)
                .map(str::to_string),
            pipeline: fields.pipeline,
            rsync_sent: fields.rsync_sent,
            rsync_received: fields.rsync_received,
            rsync_throughput: fields.rsync_throughput,
        }
    }
}

/// Records for one archived line, one per matching pattern.
///
/// Patterns run against the raw line. A line matching none of them still yields one
/// record when its message starts with a warrior action prefix. The envelope is
/// parsed only when either applies; a line whose envelope does not parse or has no
/// `@timestamp` yields nothing.
pub fn extract_records(line: &str, patterns: &PatternSet) -> Vec<ExtractionRecord> {
    let mut matches = patterns.matches(line);
    if matches.is_empty() && !mentions_warrior_action(line) {
        return Vec::new();
    }
    let Some(envelope) = BeatEnvelope::parse(line) else {
        return Vec::new();
    };
    let Some(timestamp) = envelope.timestamp.as_deref() else {
        return Vec::new();
    };
    if matches.is_empty() {
        let has_action = envelope.message.as_deref().and_then(warrior_action).is_some();
        if !has_action {
            return Vec::new();
        }
        matches.push(MatchedFields::default());
    }
    matches
        .into_iter()
        .map(|fields| ExtractionRecord::new(&envelope, timestamp, fields))
        .collect()
}
