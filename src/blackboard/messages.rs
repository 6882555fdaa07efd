//! Blackboard message protocol.
//!
//! Each request gets a response of the matching type, or an Error-kind reply
//! when the request is invalid. Timestamps accept the older
//! `timestamp`/`expiration` field names as aliases.

use serde::{Deserialize, Serialize};

use crate::time::SimTime;
use crate::value::{Value, ValueKind};

const fn forever() -> SimTime {
    SimTime::FOREVER
}

/// Stores `value` under `key` for `[valid_from, valid_until]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddEntryRequest {
    /// Key to store under.
    pub key: String,
    pub value: Value,
    /// Start of the validity window.
    #[serde(alias = "timestamp")]
    pub valid_from: SimTime,
    /// End of the validity window; open-ended by default.
    #[serde(alias = "expiration", default = "forever")]
    pub valid_until: SimTime,
}

impl AddEntryRequest {
    /// An entry valid from `valid_from` onwards.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<Value>, valid_from: SimTime) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            valid_from,
            valid_until: SimTime::FOREVER,
        }
    }

    /// Bounds the entry's validity.
    #[must_use]
    pub const fn until(mut self, valid_until: SimTime) -> Self {
        self.valid_until = valid_until;
        self
    }
}

/// Reply to [`AddEntryRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddEntryResponse {
    /// Entries held after the insertion.
    pub entry_count: usize,
}

/// Looks up `key` at `at_time`, or at the time the request is processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetEntryRequest {
    /// Key to look up.
    pub key: String,
    /// Lookup time; `None` means the time the request is processed.
    #[serde(default)]
    pub at_time: Option<SimTime>,
    /// Only return the value if it has this kind.
    #[serde(default, rename = "type")]
    pub kind: Option<ValueKind>,
}

impl GetEntryRequest {
    /// Looks `key` up at processing time.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            at_time: None,
            kind: None,
        }
    }

    /// Looks the key up at `time` instead.
    #[must_use]
    pub const fn at(mut self, time: SimTime) -> Self {
        self.at_time = Some(time);
        self
    }

    /// Only accepts a value of `kind`.
    #[must_use]
    pub const fn of_kind(mut self, kind: ValueKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// Reply to [`GetEntryRequest`]; `value` is `None` when nothing is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetEntryResponse {
    /// Key that was looked up.
    pub key: String,
    /// Time the lookup was made at.
    pub at_time: SimTime,
    pub value: Option<Value>,
}

/// Removes `key` regardless of its window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveEntryRequest {
    /// Key to remove.
    pub key: String,
}

impl RemoveEntryRequest {
    /// Removes `key`.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

/// Reply to [`RemoveEntryRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveEntryResponse {
    /// Entries held after the removal.
    pub entry_count: usize,
}
