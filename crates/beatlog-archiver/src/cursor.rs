// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Stream positions.
//!
//! Redis assigns every stream entry an id of the form `<ms>-<seq>`. The archiver only
//! needs two things from it: to hand it back verbatim on the next read, and to tell
//! whether one position is past another. The special id `$` asks Redis for entries
//! newer than anything currently in the stream.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::errors::ParseCursorError;

/// Sentinel understood by `XREAD` as "only entries added after this call".
pub const TAIL: &str = "$";

/// A position in the event stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Cursor {
    /// Skip any existing backlog.
    #[default]
    Tail,
    /// A concrete entry id.
    Id { ms: u64, seq: u64 },
}

impl Cursor {
    #[must_use]
    pub fn new(ms: u64, seq: u64) -> Self {
        Cursor::Id { ms, seq }
    }

    #[must_use]
    pub fn is_tail(&self) -> bool {
        matches!(self, Cursor::Tail)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cursor::Tail => f.write_str(TAIL),
            Cursor::Id { ms, seq } => write!(f, "{ms}-{seq}"),
        }
    }
}

impl FromStr for Cursor {
    type Err = ParseCursorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == TAIL {
            return Ok(Cursor::Tail);
        }
        // Redis accepts a bare millisecond id as shorthand for `<ms>-0`.
        let (ms, seq) = s.split_once('-').unwrap_or((s, "0"));
        let ms = ms
            .parse::<u64>()
            .map_err(|_| ParseCursorError(s.to_string()))?;
        let seq = seq
            .parse::<u64>()
            .map_err(|_| ParseCursorError(s.to_string()))?;
        Ok(Cursor::Id { ms, seq })
    }
}

/// Concrete ids are totally ordered; the tail sentinel is not comparable with them
/// because its meaning depends on when the read is issued.
impl PartialOrd for Cursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Cursor::Tail, Cursor::Tail) => Some(Ordering::Equal),
            (Cursor::Id { ms: a, seq: b }, Cursor::Id { ms: c, seq: d }) => {
                Some((a, b).cmp(&(c, d)))
            }
            _ => None,
        }
    }
}
