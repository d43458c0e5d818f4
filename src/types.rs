//! Core types for the message log.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Default namespace prefixed to every store-side key.
pub const DEFAULT_NAMESPACE: &str = "remq";

/// Identifier assigned to a message by the store.
///
/// Identifiers increase across the whole namespace, not per channel, and are
/// never reused.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct MessageId(pub u64);

impl MessageId {
    /// The following id.
    pub fn next(self) -> Self {
        MessageId(self.0 + 1)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MessageId {
    fn from(id: u64) -> Self {
        MessageId(id)
    }
}

/// A message read back from the log, with its body decoded by the client's codec.
#[derive(Clone, Debug, PartialEq)]
pub struct Message<T> {
    /// Channel the message was published to.
    pub channel: String,

    /// Store-assigned identifier.
    pub id: MessageId,

    /// Decoded body.
    pub body: T,
}

impl<T> Message<T> {
    /// Replace the body, keeping channel and id.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Message<U> {
        Message {
            channel: self.channel,
            id: self.id,
            body: f(self.body),
        }
    }
}

/// Channel name to publish on.
///
/// Built either from a plain string or from segments joined with `.`:
///
/// ```ignore
/// assert_eq!(Channel::from(["events", "account", "create"]).as_str(), "events.account.create");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Channel(String);

impl Channel {
    /// Join segments with `.`.
    pub fn join<S: AsRef<str>>(segments: impl IntoIterator<Item = S>) -> Self {
        let joined = segments
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(".");
        Channel(joined)
    }

    /// Get the channel name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Channel {
    fn from(s: &str) -> Self {
        Channel(s.to_string())
    }
}

impl From<String> for Channel {
    fn from(s: String) -> Self {
        Channel(s)
    }
}

impl From<&String> for Channel {
    fn from(s: &String) -> Self {
        Channel(s.clone())
    }
}

impl<const N: usize> From<[&str; N]> for Channel {
    fn from(segments: [&str; N]) -> Self {
        Channel::join(segments)
    }
}

impl From<&[&str]> for Channel {
    fn from(segments: &[&str]) -> Self {
        Channel::join(segments)
    }
}

impl From<Vec<String>> for Channel {
    fn from(segments: Vec<String>) -> Self {
        Channel::join(segments)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time. Clocks set before the epoch read as zero.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Timestamp(micros)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Build a store key: `<namespace>:<part>:<part>...`.
pub fn key<S: AsRef<str>>(namespace: &str, parts: impl IntoIterator<Item = S>) -> String {
    let mut key = namespace.to_string();
    for part in parts {
        key.push(':');
        key.push_str(part.as_ref());
    }
    key
}

/// Pub/sub topic a channel (or channel pattern) is published on.
pub fn channel_key(namespace: &str, channel: &str) -> String {
    key(namespace, ["channel", channel])
}
