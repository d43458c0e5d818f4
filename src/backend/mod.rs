//! Store connections.
//!
//! The client talks to the store over two logically separate connections:
//!
//! - a request/response connection used to execute scripts (publish,
//!   consume), via [`Backend::eval_sha`] and [`Backend::eval`];
//! - a dedicated pub/sub connection per live subscription, opened with
//!   [`Backend::psubscribe`]. A connection in subscribed mode cannot
//!   interleave other commands, so every call opens a fresh one.
//!
//! [`MemoryStore`] is an in-process store speaking the same protocol.

pub mod memory;

use crate::error::Result;
use crossbeam_channel::Receiver;

pub use memory::{MemoryConnection, MemoryStore, Procedure};

/// A reply from the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Nil,
    Int(i64),
    Bulk(Vec<u8>),
    Array(Vec<Reply>),
}

/// A connection to the store.
pub trait Backend: Send + Sync + 'static {
    /// Execute a script the store already knows, by its SHA-1 hex digest.
    ///
    /// Fails with [`RemqError::NoScript`](crate::RemqError::NoScript) when the
    /// store has never seen the script or has evicted it.
    fn eval_sha(&self, hash: &str, args: &[Vec<u8>]) -> Result<Reply>;

    /// Execute a script by its full source. The store remembers it under its
    /// digest for later `eval_sha` calls.
    fn eval(&self, source: &str, args: &[Vec<u8>]) -> Result<Reply>;

    /// Open a dedicated pub/sub connection subscribed to a glob pattern.
    fn psubscribe(&self, pattern: &str) -> Result<PubSubStream>;

    /// Close the request/response connection.
    fn quit(&self) -> Result<()>;
}

/// A message delivered on a pattern subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PubSubMessage {
    /// Pattern that matched.
    pub pattern: String,
    /// Concrete topic the message was published on.
    pub channel: String,
    /// Raw wire record.
    pub payload: Vec<u8>,
}

/// Live side of a pattern subscription.
///
/// Messages arrive on [`receiver`](Self::receiver) in publish order. The
/// receiver disconnects when the store drops the connection. Dropping the
/// stream closes the subscription.
pub struct PubSubStream {
    receiver: Receiver<PubSubMessage>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl PubSubStream {
    /// Wrap a receiver; `on_close` runs when the stream is dropped.
    pub fn new(receiver: Receiver<PubSubMessage>, on_close: impl FnOnce() + Send + 'static) -> Self {
        Self {
            receiver,
            on_close: Some(Box::new(on_close)),
        }
    }

    /// Channel the store delivers matching messages on.
    pub fn receiver(&self) -> &Receiver<PubSubMessage> {
        &self.receiver
    }
}

impl Drop for PubSubStream {
    fn drop(&mut self) {
        if let Some(close) = self.on_close.take() {
            close();
        }
    }
}

/// Read an integer argument, the way the store coerces script arguments.
pub(crate) fn int_arg(args: &[Vec<u8>], index: usize) -> Option<i64> {
    std::str::from_utf8(args.get(index)?).ok()?.trim().parse().ok()
}

/// Read a UTF-8 string argument.
pub(crate) fn str_arg(args: &[Vec<u8>], index: usize) -> Option<&str> {
    std::str::from_utf8(args.get(index)?).ok()
}
