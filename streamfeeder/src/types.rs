//! Message types carried by the feeder.
//!
//! Identifiers and tags use smart constructors so that a value, once built,
//! is valid for the rest of its life.

use chrono::{DateTime, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A routing label attached to a message.
///
/// `Tag` values are trimmed, non-empty and at most 255 characters. The feeder
/// never interprets a tag; it is passed through to the sink untouched.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct Tag(String);

/// A unique, time-ordered message identifier (UUIDv7).
#[nutype(
    validate(predicate = |id: &Uuid| id.get_version() == Some(uuid::Version::SortRand)),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new `MessageId` with the current timestamp.
    pub fn new() -> Self {
        // Uuid::now_v7() always yields a v7 UUID
        Self::try_new(Uuid::now_v7()).expect("Uuid::now_v7() should always return a valid v7 UUID")
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

/// The moment a message was accepted by `feed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a timestamp from a UTC `DateTime`.
    pub const fn new(datetime: DateTime<Utc>) -> Self {
        Self(datetime)
    }

    /// Creates a timestamp representing the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Returns the underlying `DateTime`.
    pub const fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(datetime: DateTime<Utc>) -> Self {
        Self::new(datetime)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A message queued for delivery to the sink.
///
/// The payload is opaque to the feeder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Identifier assigned when the message was fed.
    pub id: MessageId,
    /// Application payload.
    pub payload: Value,
    /// Optional routing label.
    pub tag: Option<Tag>,
    /// When the message was fed.
    pub fed_at: Timestamp,
}

impl Message {
    /// Wraps a payload and optional tag into a new message.
    pub fn new(payload: Value, tag: Option<Tag>) -> Self {
        Self {
            id: MessageId::new(),
            payload,
            tag,
            fed_at: Timestamp::now(),
        }
    }

    /// Returns the tag as a string slice, if any.
    pub fn tag_str(&self) -> Option<&str> {
        self.tag.as_ref().map(AsRef::as_ref)
    }
}
