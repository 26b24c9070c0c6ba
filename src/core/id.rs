//! Hierarchical content type identifiers.
//!
//! A content type id encodes its lineage: `0x01` is the root item type,
//! `0x0101` derives from it with a short segment, and `0x0100<guid>` derives
//! from it with a GUID segment. Appending a child id to a parent id is plain
//! segment concatenation.

use super::error::FormatError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Longest canonical id the store accepts.
pub const MAX_ID_LEN: usize = 1024;

const GUID_MARKER: &str = "00";
const GUID_DIGITS: usize = 32;

/// One lineage step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdSegment {
    /// Two hex digits, never `00`.
    Short(u8),
    /// `00` followed by a 32-digit GUID.
    Guid(u128),
}

impl IdSegment {
    fn write_to(self, out: &mut String) {
        use fmt::Write;
        // writing into a String cannot fail
        let _ = match self {
            Self::Short(b) => write!(out, "{:02X}", b),
            Self::Guid(g) => write!(out, "{}{:032X}", GUID_MARKER, g),
        };
    }
}

/// Content type identifier, absolute (`0x...`) or relative.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentTypeId {
    segments: Vec<IdSegment>,
    absolute: bool,
}

impl ContentTypeId {
    /// Parse an id string.
    ///
    /// Absolute ids start with `0x`. Relative ids have no prefix; a bare
    /// 32-digit hex string is taken as a single GUID segment, so a relative
    /// id of exactly sixteen short segments has no unambiguous text form.
    pub fn parse(input: &str) -> Result<Self, FormatError> {
        if input.is_empty() {
            return Err(FormatError::new(input, "empty id"));
        }
        if input.len() > MAX_ID_LEN {
            return Err(FormatError::new(
                input,
                format!("longer than {} characters", MAX_ID_LEN),
            ));
        }

        let (absolute, body) = match input
            .strip_prefix("0x")
            .or_else(|| input.strip_prefix("0X"))
        {
            Some(rest) => (true, rest),
            None => (false, input),
        };

        if let Some(bad) = body.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(FormatError::new(input, format!("non-hex digit '{}'", bad)));
        }

        let segments = if !absolute && body.len() == GUID_DIGITS {
            vec![IdSegment::Guid(parse_guid(input, body)?)]
        } else {
            decompose(input, body)?
        };

        if segments.is_empty() {
            return Err(FormatError::new(input, "no segments"));
        }

        Ok(Self { segments, absolute })
    }

    /// Relative id made of a single GUID segment.
    pub fn from_guid(guid: Uuid) -> Self {
        Self {
            segments: vec![IdSegment::Guid(guid.as_u128())],
            absolute: false,
        }
    }

    /// Concatenate `child`'s segments after this id's. The result keeps this
    /// id's absoluteness and must still fit in [`MAX_ID_LEN`].
    pub fn append(&self, child: &ContentTypeId) -> Result<ContentTypeId, FormatError> {
        let mut segments = Vec::with_capacity(self.segments.len() + child.segments.len());
        segments.extend_from_slice(&self.segments);
        segments.extend_from_slice(&child.segments);
        let joined = Self {
            segments,
            absolute: self.absolute,
        };
        if joined.canonical_len() > MAX_ID_LEN {
            return Err(FormatError::new(
                &joined.to_string(),
                format!("longer than {} characters", MAX_ID_LEN),
            ));
        }
        Ok(joined)
    }

    /// Length of the canonical text form.
    pub fn canonical_len(&self) -> usize {
        let prefix = if self.absolute { 2 } else { 0 };
        prefix
            + self
                .segments
                .iter()
                .map(|seg| match seg {
                    IdSegment::Short(_) => 2,
                    IdSegment::Guid(_) => GUID_MARKER.len() + GUID_DIGITS,
                })
                .sum::<usize>()
    }

    pub fn segments(&self) -> &[IdSegment] {
        &self.segments
    }

    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    /// Id of the immediate ancestor, or `None` for a single-segment id.
    pub fn parent(&self) -> Option<ContentTypeId> {
        if self.segments.len() < 2 {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
            absolute: self.absolute,
        })
    }

    /// True when `other` strictly descends from this id.
    pub fn is_ancestor_of(&self, other: &ContentTypeId) -> bool {
        self.absolute == other.absolute
            && other.segments.len() > self.segments.len()
            && other.segments.starts_with(&self.segments)
    }
}

fn parse_guid(input: &str, digits: &str) -> Result<u128, FormatError> {
    u128::from_str_radix(digits, 16)
        .map_err(|e| FormatError::new(input, format!("bad GUID segment: {}", e)))
}

/// Split a hex body into segments. Caller has checked every char is hex.
fn decompose(input: &str, body: &str) -> Result<Vec<IdSegment>, FormatError> {
    let mut segments = Vec::new();
    let mut pos = 0;
    while pos < body.len() {
        let Some(pair) = body.get(pos..pos + 2) else {
            return Err(FormatError::new(input, "odd number of hex digits"));
        };
        if pair == GUID_MARKER {
            let start = pos + 2;
            let Some(digits) = body.get(start..start + GUID_DIGITS) else {
                return Err(FormatError::new(
                    input,
                    format!("GUID segment at offset {} is truncated", pos),
                ));
            };
            segments.push(IdSegment::Guid(parse_guid(input, digits)?));
            pos = start + GUID_DIGITS;
        } else {
            let b = u8::from_str_radix(pair, 16)
                .map_err(|e| FormatError::new(input, format!("bad segment '{}': {}", pair, e)))?;
            segments.push(IdSegment::Short(b));
            pos += 2;
        }
    }
    Ok(segments)
}

impl fmt::Display for ContentTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::with_capacity(2 + self.segments.len() * 2);
        if self.absolute {
            out.push_str("0x");
        }
        for seg in &self.segments {
            seg.write_to(&mut out);
        }
        f.write_str(&out)
    }
}

impl FromStr for ContentTypeId {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ContentTypeId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContentTypeId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
