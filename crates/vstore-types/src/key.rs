//! Store keys and their canonical flat-string encoding.
//!
//! A [`StoreKey`] is an ordered list of non-empty segments (for example
//! `["warehouse", "sales", "orders"]`). Index entries and storage record ids
//! need a single flat string, so keys are encoded by joining segments with
//! `.`, after replacing any literal `.` or NUL inside a segment with the
//! group separator `U+001D`. Decoding splits on `.` and maps both the group
//! separator and NUL back to `.`.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::KeyError;

/// Segment delimiter in the canonical string form.
pub const DOT: char = '.';
/// The NUL character, treated like an embedded `.`.
pub const ZERO_BYTE: char = '\u{0000}';
/// Reserved stand-in for an embedded `.` or NUL.
pub const GROUP_SEPARATOR: char = '\u{001D}';

/// Canonical key codec.
pub mod key_codec {
    use super::{DOT, GROUP_SEPARATOR, ZERO_BYTE};

    /// Encode segments into the canonical string form.
    pub fn encode<S: AsRef<str>>(segments: &[S]) -> String {
        let mut out = String::new();
        for (i, segment) in segments.iter().enumerate() {
            if i > 0 {
                out.push(DOT);
            }
            out.extend(segment.as_ref().chars().map(|c| match c {
                DOT | ZERO_BYTE => GROUP_SEPARATOR,
                other => other,
            }));
        }
        out
    }

    /// Decode the canonical string form back into segments.
    ///
    /// Both the group separator and NUL come back as `.`; the distinction
    /// between an embedded `.` and an embedded NUL is not recoverable.
    pub fn decode(encoded: &str) -> Vec<String> {
        encoded
            .split(DOT)
            .map(|piece| {
                piece
                    .chars()
                    .map(|c| match c {
                        GROUP_SEPARATOR | ZERO_BYTE => DOT,
                        other => other,
                    })
                    .collect()
            })
            .collect()
    }
}

/// A validated, ordered key into a store index.
///
/// Construction rejects empty keys, empty segments and literal group
/// separators. NUL characters inside segments are normalized to `.` so a key
/// keeps its identity across an encode/decode round trip.
///
/// Keys order lexicographically by segment sequence.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreKey {
    segments: Vec<String>,
}

impl StoreKey {
    /// Build a key from raw segments.
    pub fn new<I, S>(segments: I) -> Result<Self, KeyError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out = Vec::new();
        for (index, segment) in segments.into_iter().enumerate() {
            let segment: String = segment.into();
            if segment.is_empty() {
                return Err(KeyError::EmptySegment { index });
            }
            if segment.contains(GROUP_SEPARATOR) {
                return Err(KeyError::ReservedCharacter { index });
            }
            out.push(segment.replace(ZERO_BYTE, "."));
        }
        if out.is_empty() {
            return Err(KeyError::Empty);
        }
        Ok(Self { segments: out })
    }

    /// Convenience for a single-segment key.
    pub fn of(name: impl Into<String>) -> Result<Self, KeyError> {
        Self::new([name.into()])
    }

    /// Parse the canonical string form.
    pub fn from_path_string(encoded: &str) -> Result<Self, KeyError> {
        if encoded.is_empty() {
            return Err(KeyError::Empty);
        }
        let segments = key_codec::decode(encoded);
        for (index, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                return Err(KeyError::EmptySegment { index });
            }
        }
        Ok(Self { segments })
    }

    /// The canonical string form.
    pub fn to_path_string(&self) -> String {
        key_codec::encode(&self.segments)
    }

    /// Byte length of [`to_path_string`](Self::to_path_string) without
    /// building it. Replacement characters are single bytes, as is `.`.
    pub fn encoded_len(&self) -> usize {
        self.segments.iter().map(String::len).sum::<usize>() + self.segments.len() - 1
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments (always at least one).
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always `false`; present for API symmetry with collections.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The last segment.
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// The key without its last segment, or `None` for single-segment keys.
    pub fn parent(&self) -> Option<StoreKey> {
        if self.segments.len() < 2 {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Returns `true` if `prefix`'s segments are a leading run of this key's.
    pub fn starts_with(&self, prefix: &StoreKey) -> bool {
        self.segments.starts_with(&prefix.segments)
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreKey({:?})", self.segments)
    }
}

impl Serialize for StoreKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_path_string())
    }
}

impl<'de> Deserialize<'de> for StoreKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        StoreKey::from_path_string(&encoded).map_err(serde::de::Error::custom)
    }
}
