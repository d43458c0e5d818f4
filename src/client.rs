//! The client: publish, consume, listeners, and subscription state.

use crate::backend::{Backend, Reply};
use crate::codec::{Codec, RawCodec};
use crate::error::{RemqError, Result};
use crate::listeners::{Listener, ListenerId, ListenerRegistry};
use crate::scripts::{ScriptCache, ScriptName, ScriptSource};
use crate::subscriptions::ActiveSubscription;
use crate::types::{self, Channel, Message, MessageId, Timestamp, DEFAULT_NAMESPACE};
use crate::wire;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::thread::ThreadId;

/// Default number of messages per `consume` call and per catch-up page.
pub const DEFAULT_LIMIT: usize = 1000;

/// Client configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Prefix for every store-side key.
    /// Default: "remq"
    pub namespace: String,

    /// Messages fetched per catch-up page.
    /// Default: 1000
    pub page_size: usize,

    /// Default `consume` limit.
    /// Default: 1000
    pub limit: usize,

    /// Where store-side scripts are loaded from.
    pub scripts: ScriptSource,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            page_size: DEFAULT_LIMIT,
            limit: DEFAULT_LIMIT,
            scripts: ScriptSource::Bundled,
        }
    }
}

impl ClientConfig {
    /// Parse from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| RemqError::Deserialization(e.to_string()))
    }
}

/// Options for [`Client::consume`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConsumeOptions {
    /// Only messages with a larger id are returned.
    pub cursor: MessageId,
    /// Maximum number of messages (None = the configured limit).
    pub limit: Option<usize>,
}

impl ConsumeOptions {
    /// Options with cursor 0 and the configured limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only return messages after `cursor`.
    pub fn cursor(mut self, cursor: MessageId) -> Self {
        self.cursor = cursor;
        self
    }

    /// Return at most `limit` messages.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Mutable client state, all behind one lock.
pub(crate) struct ClientState<T> {
    pub(crate) listeners: ListenerRegistry<T>,
    pub(crate) scripts: ScriptCache,
    pub(crate) subscription: Option<ActiveSubscription>,
    /// Thread currently running listeners, if any.
    pub(crate) dispatching: Option<ThreadId>,
}

pub(crate) struct ClientInner<C: Codec> {
    pub(crate) config: ClientConfig,
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) codec: C,
    pub(crate) state: Mutex<ClientState<C::Item>>,
    /// Held for the duration of each message dispatch.
    pub(crate) delivery: Mutex<()>,
    pub(crate) next_subscription: AtomicU64,
}

/// Client for a message log kept in a scriptable pub/sub store.
///
/// Cloning is cheap; clones share connections, listeners, scripts, and the
/// subscription.
pub struct Client<C: Codec = RawCodec> {
    pub(crate) inner: Arc<ClientInner<C>>,
}

impl<C: Codec> Clone for Client<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Client<RawCodec> {
    /// Create a client with default configuration and raw byte bodies.
    pub fn new(backend: impl Backend) -> Self {
        Self::with_config(backend, ClientConfig::default())
    }

    /// Create a client with raw byte bodies and the given configuration.
    pub fn with_config(backend: impl Backend, config: ClientConfig) -> Self {
        Self::with_codec(backend, config, RawCodec)
    }
}

impl<C: Codec> Client<C> {
    /// Create a client that decodes bodies with `codec`.
    pub fn with_codec(backend: impl Backend, config: ClientConfig, codec: C) -> Self {
        let scripts = ScriptCache::new(config.scripts.clone());
        Self {
            inner: Arc::new(ClientInner {
                config,
                backend: Arc::new(backend),
                codec,
                state: Mutex::new(ClientState {
                    listeners: ListenerRegistry::new(),
                    scripts,
                    subscription: None,
                    dispatching: None,
                }),
                delivery: Mutex::new(()),
                next_subscription: AtomicU64::new(1),
            }),
        }
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Get the payload codec.
    pub fn codec(&self) -> &C {
        &self.inner.codec
    }

    // --- Publish / Consume ---

    /// Publish an encoded message. Returns the id the store assigned, or
    /// None if the store rejected the channel.
    pub fn publish(&self, channel: impl Into<Channel>, message: impl AsRef<[u8]>) -> Result<Option<MessageId>> {
        let channel = channel.into();
        let args = vec![
            self.inner.config.namespace.as_bytes().to_vec(),
            channel.as_str().as_bytes().to_vec(),
            message.as_ref().to_vec(),
            Timestamp::now().0.to_string().into_bytes(),
        ];

        let id = match self.execute(ScriptName::Publish, &args)? {
            Reply::Nil => None,
            Reply::Int(id) if id > 0 => Some(MessageId(id as u64)),
            Reply::Bulk(bytes) => std::str::from_utf8(&bytes)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(MessageId)
                .ok_or_else(|| RemqError::UnexpectedReply(format!("publish returned {bytes:?}")))
                .map(Some)?,
            other => {
                return Err(RemqError::UnexpectedReply(format!(
                    "publish returned {other:?}"
                )))
            }
        };

        match id {
            Some(id) => tracing::debug!(channel = %channel, %id, "published"),
            None => tracing::debug!(channel = %channel, "publish rejected by store"),
        }
        Ok(id)
    }

    /// Encode `item` with the client's codec and publish it.
    pub fn send(&self, channel: impl Into<Channel>, item: &C::Item) -> Result<Option<MessageId>> {
        let body = self.inner.codec.encode(item)?;
        self.publish(channel, body)
    }

    /// Read persisted messages matching `pattern`, ascending by id.
    ///
    /// Returns at most `limit` messages, all with id greater than `cursor`.
    /// Fewer than `limit` means the end of the log was reached.
    pub fn consume(&self, pattern: &str, options: ConsumeOptions) -> Result<BTreeMap<MessageId, Message<C::Item>>> {
        let limit = options.limit.unwrap_or(self.inner.config.limit);
        let page = self.consume_page(pattern, options.cursor, limit)?;
        Ok(page.into_iter().map(|m| (m.id, m)).collect())
    }

    pub(crate) fn consume_page(
        &self,
        pattern: &str,
        cursor: MessageId,
        limit: usize,
    ) -> Result<Vec<Message<C::Item>>> {
        let args = vec![
            self.inner.config.namespace.as_bytes().to_vec(),
            pattern.as_bytes().to_vec(),
            cursor.0.to_string().into_bytes(),
            limit.to_string().into_bytes(),
        ];

        let items = match self.execute(ScriptName::Consume, &args)? {
            Reply::Array(items) => items,
            Reply::Nil => Vec::new(),
            other => {
                return Err(RemqError::UnexpectedReply(format!(
                    "consume returned {other:?}"
                )))
            }
        };

        let messages = items
            .into_iter()
            .map(|item| match item {
                Reply::Bulk(raw) => self.decode_record(&raw),
                other => Err(RemqError::UnexpectedReply(format!(
                    "consume item {other:?}"
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(pattern, %cursor, limit, count = messages.len(), "consumed");
        Ok(messages)
    }

    /// Parse a wire record and decode its body.
    pub(crate) fn decode_record(&self, raw: &[u8]) -> Result<Message<C::Item>> {
        let raw = wire::parse(raw)?;
        Ok(Message {
            channel: raw.channel,
            id: raw.id,
            body: self.inner.codec.decode(&raw.body)?,
        })
    }

    /// Run a store-side script, loading it on first use.
    pub(crate) fn execute(&self, name: ScriptName, args: &[Vec<u8>]) -> Result<Reply> {
        let script = self.inner.state.lock().scripts.script(name)?;
        script.eval(self.inner.backend.as_ref(), args)
    }

    // --- Listeners ---

    /// Register a listener for `event`. Listeners run in registration order.
    pub fn on(&self, event: &str, listener: impl Listener<C::Item>) -> Result<ListenerId> {
        self.inner.state.lock().listeners.add(event, Arc::new(listener))
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        self.inner.state.lock().listeners.remove(event, id)
    }

    /// Number of listeners registered for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.inner.state.lock().listeners.count(event)
    }

    // --- Misc ---

    /// Build a key in this client's namespace, e.g. `key(["cursor", "consumer-1"])`
    /// for a caller-kept bookmark.
    pub fn key<S: AsRef<str>>(&self, parts: impl IntoIterator<Item = S>) -> String {
        types::key(&self.inner.config.namespace, parts)
    }

    /// Stop any subscription and close the request/response connection.
    pub fn quit(&self) -> Result<()> {
        self.unsubscribe();
        self.inner.backend.quit()
    }
}

impl<C: Codec> std::fmt::Debug for Client<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("namespace", &self.inner.config.namespace)
            .finish()
    }
}
