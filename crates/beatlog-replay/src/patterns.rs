// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Message patterns recognised in archived warrior logs.

use regex::{Captures, Regex};

use crate::error::ReplayError;

/// Tried in this order on every line; each match yields its own record.
pub const MESSAGE_PATTERNS: [&str; 5] = [
    r"\d+=(?P<status_code>\d+)\s",
    r"(?P<state>Starting|Finished) (?P<action>\w+) for",
    r"(?P<action>Tracker confirmed)",
    r"(?P<action>Uploading with Rsync)",
    r"(?P<action>Submitting) (?P<items>\d+) items",
];

/// Pipeline failures and startups plus rsync transfer summaries, tried after
/// [`MESSAGE_PATTERNS`].
pub const PIPELINE_PATTERNS: [&str; 3] = [
    r"(?P<state>Failed) (?P<action>\w+) for Item",
    r"(?P<state>Initializing) pipeline for '(?P<pipeline>[^']+)'",
    r"sent (?P<rsync_sent>[\d,]+) bytes\s\sreceived (?P<rsync_received>[\d,]+) bytes\s\s(?P<rsync_throughput>[\d,.]+) bytes",
];

/// Message prefixes of the warrior's own status lines and the action each names.
pub const WARRIOR_ACTIONS: [(&str, &str); 9] = [
    ("Received item", "item_received"),
    ("Queued file", "queued_file"),
    ("Queued user", "queued_user"),
    ("Queuing URL", "queued_url"),
    ("Queuing folder", "queued_folder"),
    ("Checking IP address", "ip_check"),
    ("Tracker confirmed item", "item_confirmed"),
    ("Uploading with Rsync", "item_uploading"),
    ("No item received.", "no_items"),
];

/// Action for a message starting with one of the [`WARRIOR_ACTIONS`] prefixes.
pub fn warrior_action(message: &str) -> Option<&'static str> {
    WARRIOR_ACTIONS
        .iter()
        .find(|(prefix, _)| message.starts_with(prefix))
        .map(|(_, action)| *action)
}

/// Whether `line` could carry a message with a warrior action prefix.
pub fn mentions_warrior_action(line: &str) -> bool {
    WARRIOR_ACTIONS.iter().any(|(prefix, _)| line.contains(prefix))
}

/// Named groups captured by one pattern match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MatchedFields {
    pub status_code: Option<u64>,
    pub state: Option<String>,
    pub action: Option<String>,
    pub items: Option<u64>,
    pub pipeline: Option<String>,
    pub rsync_sent: Option<u64>,
    pub rsync_received: Option<u64>,
    /// Bytes per second with the thousands separators removed.
    pub rsync_throughput: Option<String>,
}

impl MatchedFields {
    fn from_captures(caps: &Captures<'_>) -> Self {
        let text = |name: &str| caps.name(name).map(|m| m.as_str().to_string());
        // Digit runs too long for u64 are dropped rather than failing the match.
        let number = |name: &str| {
            caps.name(name)
                .and_then(|m| m.as_str().replace(',', "").parse().ok())
        };
        MatchedFields {
            status_code: number("status_code"),
            state: text("state"),
            action: text("action"),
            items: number("items"),
            pipeline: text("pipeline"),
            rsync_sent: number("rsync_sent"),
            rsync_received: number("rsync_received"),
            rsync_throughput: caps
                .name("rsync_throughput")
                .map(|m| m.as_str().replace(',', "")),
        }
    }
}

/// The compiled pattern set. Compiled once and shared by all workers.
#[derive(Debug, Clone)]
pub struct PatternSet {
    regexes: Vec<Regex>,
}

impl PatternSet {
    /// The message patterns followed by the pipeline patterns.
    pub fn new() -> Result<Self, ReplayError> {
        let patterns: Vec<&str> = MESSAGE_PATTERNS
            .iter()
            .chain(PIPELINE_PATTERNS.iter())
            .copied()
            .collect();
        Self::from_patterns(&patterns)
    }

    pub fn from_patterns(patterns: &[&str]) -> Result<Self, ReplayError> {
        let regexes = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PatternSet { regexes })
    }

    /// Fields of every pattern matching `line`, in pattern order.
    pub fn matches(&self, line: &str) -> Vec<MatchedFields> {
        self.regexes
            .iter()
            .filter_map(|re| re.captures(line))
            .map(|caps| MatchedFields::from_captures(&caps))
            .collect()
    }
}
