//! # remq
//!
//! A durable, ordered message log on top of a key-value store with
//! scripting and native pattern pub/sub.
//!
//! ## Core Concepts
//!
//! - **Messages**: published to a channel, assigned an id that increases
//!   across the whole namespace, and kept for replay
//! - **Consume**: page through history by cursor (exclusive) and limit
//! - **Subscribe**: replay from a cursor, then switch to live pub/sub,
//!   delivering everything through the same `message` listeners
//! - **Scripts**: publish and consume run atomically on the store and are
//!   called by digest, with the source resent only when the store lacks it
//!
//! Delivery is at-least-once across restarts: keep the last id you handled
//! (see [`Client::key`]) and subscribe from it.
//!
//! ## Example
//!
//! ```ignore
//! use remq::{Client, ConsumeOptions, MemoryStore, Message, MessageId, SubscribeOptions};
//!
//! let store = MemoryStore::new();
//! let producer = Client::new(store.connect());
//! let consumer = Client::new(store.connect());
//!
//! let id = producer.publish("events.account.create", br#"{"account_id":1}"#)?;
//!
//! let history = consumer.consume("events.*", ConsumeOptions::new().limit(100))?;
//!
//! let handle = consumer.subscribe_with(
//!     "events.*",
//!     SubscribeOptions::from_id(MessageId(0)),
//!     |channel: &str, msg: &Message<Vec<u8>>| {
//!         println!("{channel} #{}", msg.id);
//!         Ok(())
//!     },
//! )?;
//! ```

pub mod backend;
pub mod client;
pub mod codec;
pub mod error;
pub mod listeners;
pub mod scripts;
pub mod subscriptions;
pub mod types;
pub mod wire;

// Re-exports
pub use backend::{Backend, MemoryConnection, MemoryStore, Procedure, PubSubMessage, PubSubStream, Reply};
pub use client::{Client, ClientConfig, ConsumeOptions, DEFAULT_LIMIT};
pub use codec::{Codec, JsonCodec, MsgPackCodec, RawCodec};
pub use error::{BoxError, ParseError, RemqError, Result};
pub use listeners::{Listener, ListenerId, ListenerRegistry, ListenerResult, MESSAGE};
pub use scripts::{Script, ScriptCache, ScriptName, ScriptSource};
pub use subscriptions::{
    SubscribeOptions, SubscriptionHandle, SubscriptionId, SubscriptionInfo, SubscriptionState,
};
pub use types::*;
pub use wire::RawMessage;
