//! In-process store.
//!
//! Implements the store side of the protocol in memory: a script cache keyed
//! by digest, atomic publish/consume procedures, and glob pattern pub/sub.
//! Scripts cannot be interpreted here, so the store runs a native
//! [`Procedure`] for each script source it has been taught.

use super::{int_arg, str_arg, Backend, PubSubMessage, PubSubStream, Reply};
use crate::error::{RemqError, Result};
use crate::scripts::{digest, ScriptName};
use crate::types::{channel_key, MessageId, Timestamp};
use crate::wire;
use crossbeam_channel::{unbounded, Sender};
use glob::Pattern;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Native implementation of a store-side script.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Procedure {
    /// ARGV: namespace, channel, message, timestamp. Returns the id or nil.
    Publish,
    /// ARGV: namespace, pattern, cursor, limit. Returns wire records.
    Consume,
}

/// One persisted message.
struct Entry {
    id: u64,
    channel: String,
    record: Vec<u8>,
    published_at: Timestamp,
}

/// Messages of one namespace, ascending by id.
#[derive(Default)]
struct Namespace {
    last_id: u64,
    entries: Vec<Entry>,
}

struct PatternSubscriber {
    pattern: Pattern,
    raw: String,
    sender: Sender<PubSubMessage>,
}

#[derive(Default)]
struct ServerState {
    procedures: HashMap<String, Procedure>,
    loaded_scripts: HashSet<String>,
    namespaces: HashMap<String, Namespace>,
    subscribers: HashMap<u64, PatternSubscriber>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<ServerState>,
    next_subscriber: AtomicU64,
    eval_count: AtomicU64,
    eval_sha_count: AtomicU64,
}

/// An in-process store shared by any number of connections.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Create an empty store that understands the bundled scripts.
    pub fn new() -> Self {
        let store = Self {
            shared: Arc::new(Shared::default()),
        };
        store.register_procedure(ScriptName::Publish.bundled_source(), Procedure::Publish);
        store.register_procedure(ScriptName::Consume.bundled_source(), Procedure::Consume);
        store
    }

    /// Teach the store to run `procedure` for scripts with this source.
    pub fn register_procedure(&self, source: &str, procedure: Procedure) {
        self.shared
            .state
            .lock()
            .procedures
            .insert(digest(source), procedure);
    }

    /// Open a new connection.
    pub fn connect(&self) -> MemoryConnection {
        MemoryConnection {
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
        }
    }

    /// Forget every script loaded so far, as after a store restart.
    pub fn flush_scripts(&self) {
        self.shared.state.lock().loaded_scripts.clear();
    }

    /// Drop every pattern subscription, as on a network partition.
    pub fn disconnect_subscribers(&self) {
        self.shared.state.lock().subscribers.clear();
    }

    /// Number of full-source script executions.
    pub fn eval_count(&self) -> u64 {
        self.shared.eval_count.load(Ordering::SeqCst)
    }

    /// Number of by-digest script executions, including NOSCRIPT failures.
    pub fn eval_sha_count(&self) -> u64 {
        self.shared.eval_sha_count.load(Ordering::SeqCst)
    }

    /// Number of open pattern subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.shared.state.lock().subscribers.len()
    }

    /// Last id allocated in a namespace.
    pub fn last_id(&self, namespace: &str) -> Option<MessageId> {
        self.shared
            .state
            .lock()
            .namespaces
            .get(namespace)
            .filter(|ns| ns.last_id > 0)
            .map(|ns| MessageId(ns.last_id))
    }

    /// Publish time recorded for a message.
    pub fn published_at(&self, namespace: &str, id: MessageId) -> Option<Timestamp> {
        let state = self.shared.state.lock();
        let ns = state.namespaces.get(namespace)?;
        let pos = ns.entries.binary_search_by_key(&id.0, |e| e.id).ok()?;
        Some(ns.entries[pos].published_at)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// A connection to a [`MemoryStore`].
pub struct MemoryConnection {
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RemqError::Transport("connection closed".into()));
        }
        Ok(())
    }
}

impl Backend for MemoryConnection {
    fn eval_sha(&self, hash: &str, args: &[Vec<u8>]) -> Result<Reply> {
        self.ensure_open()?;
        self.shared.eval_sha_count.fetch_add(1, Ordering::SeqCst);

        let mut state = self.shared.state.lock();
        if !state.loaded_scripts.contains(hash) {
            return Err(RemqError::NoScript {
                hash: hash.to_string(),
            });
        }
        let procedure = *state
            .procedures
            .get(hash)
            .ok_or_else(|| RemqError::Script(format!("no procedure for script {hash}")))?;
        run(&mut state, procedure, args)
    }

    fn eval(&self, source: &str, args: &[Vec<u8>]) -> Result<Reply> {
        self.ensure_open()?;
        self.shared.eval_count.fetch_add(1, Ordering::SeqCst);

        let hash = digest(source);
        let mut state = self.shared.state.lock();
        let procedure = *state
            .procedures
            .get(&hash)
            .ok_or_else(|| RemqError::Script(format!("unsupported script {hash}")))?;
        state.loaded_scripts.insert(hash);
        run(&mut state, procedure, args)
    }

    fn psubscribe(&self, pattern: &str) -> Result<PubSubStream> {
        self.ensure_open()?;
        let compiled = Pattern::new(pattern)
            .map_err(|e| RemqError::Script(format!("invalid pattern {pattern:?}: {e}")))?;

        let id = self.shared.next_subscriber.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = unbounded();
        self.shared.state.lock().subscribers.insert(
            id,
            PatternSubscriber {
                pattern: compiled,
                raw: pattern.to_string(),
                sender,
            },
        );

        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        Ok(PubSubStream::new(receiver, move || {
            if let Some(shared) = shared.upgrade() {
                shared.state.lock().subscribers.remove(&id);
            }
        }))
    }

    fn quit(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn run(state: &mut ServerState, procedure: Procedure, args: &[Vec<u8>]) -> Result<Reply> {
    match procedure {
        Procedure::Publish => publish(state, args),
        Procedure::Consume => consume(state, args),
    }
}

fn wrong_args(procedure: &str) -> RemqError {
    RemqError::Script(format!("wrong arguments for {procedure}"))
}

/// Channels must be non-empty and free of the header separator, newlines,
/// and glob metacharacters.
fn valid_channel(channel: &str) -> bool {
    !channel.is_empty() && !channel.contains(['@', '\n', '*', '?', '[', ']'])
}

fn publish(state: &mut ServerState, args: &[Vec<u8>]) -> Result<Reply> {
    let namespace = str_arg(args, 0).ok_or_else(|| wrong_args("publish"))?;
    let message = args.get(2).ok_or_else(|| wrong_args("publish"))?;
    let timestamp = int_arg(args, 3).ok_or_else(|| wrong_args("publish"))?;

    let channel = match str_arg(args, 1) {
        Some(channel) if valid_channel(channel) => channel,
        _ => return Ok(Reply::Nil),
    };

    let ns = state.namespaces.entry(namespace.to_string()).or_default();
    ns.last_id += 1;
    let id = ns.last_id;
    let record = wire::serialize(channel, MessageId(id), message);

    ns.entries.push(Entry {
        id,
        channel: channel.to_string(),
        record: record.clone(),
        published_at: Timestamp(timestamp),
    });

    let topic = channel_key(namespace, channel);
    state.subscribers.retain(|_, sub| {
        if !sub.pattern.matches(&topic) {
            return true;
        }
        sub.sender
            .send(PubSubMessage {
                pattern: sub.raw.clone(),
                channel: topic.clone(),
                payload: record.clone(),
            })
            .is_ok()
    });

    Ok(Reply::Int(id as i64))
}

fn consume(state: &mut ServerState, args: &[Vec<u8>]) -> Result<Reply> {
    let namespace = str_arg(args, 0).ok_or_else(|| wrong_args("consume"))?;
    let pattern = str_arg(args, 1).ok_or_else(|| wrong_args("consume"))?;
    let cursor = int_arg(args, 2).ok_or_else(|| wrong_args("consume"))?;
    let limit = int_arg(args, 3).ok_or_else(|| wrong_args("consume"))?;

    let pattern = Pattern::new(pattern)
        .map_err(|e| RemqError::Script(format!("invalid pattern: {e}")))?;

    let Some(ns) = state.namespaces.get(namespace) else {
        return Ok(Reply::Array(Vec::new()));
    };
    if limit <= 0 {
        return Ok(Reply::Array(Vec::new()));
    }

    let cursor = cursor.max(0) as u64;
    let start = ns.entries.partition_point(|e| e.id <= cursor);
    let records = ns.entries[start..]
        .iter()
        .filter(|e| pattern.matches(&e.channel))
        .take(limit as usize)
        .map(|e| Reply::Bulk(e.record.clone()))
        .collect();

    Ok(Reply::Array(records))
}
