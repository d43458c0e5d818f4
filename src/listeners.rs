//! Event listeners.
//!
//! Listeners are registered per event name and called in registration
//! order. The client only emits [`MESSAGE`], once per delivered message, on
//! the subscription worker's thread.

use crate::error::{BoxError, RemqError, Result};
use crate::types::Message;
use std::collections::HashMap;
use std::sync::Arc;

/// Event emitted for every message delivered by a subscription.
pub const MESSAGE: &str = "message";

/// What a listener returns. An error stops dispatch and ends the
/// subscription that was delivering.
pub type ListenerResult = std::result::Result<(), BoxError>;

/// Callback for delivered messages.
pub trait Listener<T>: Send + Sync + 'static {
    fn call(&self, channel: &str, message: &Message<T>) -> ListenerResult;
}

impl<T, F> Listener<T> for F
where
    F: Fn(&str, &Message<T>) -> ListenerResult + Send + Sync + 'static,
{
    fn call(&self, channel: &str, message: &Message<T>) -> ListenerResult {
        self(channel, message)
    }
}

/// Identifies a registration, for removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Listeners by event name, in registration order.
pub struct ListenerRegistry<T> {
    listeners: HashMap<String, Vec<(ListenerId, Arc<dyn Listener<T>>)>>,
    next_id: u64,
}

impl<T> ListenerRegistry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            listeners: HashMap::new(),
            next_id: 1,
        }
    }

    /// Register a listener. Event names must be non-empty and contain no
    /// whitespace.
    pub fn add(&mut self, event: &str, listener: Arc<dyn Listener<T>>) -> Result<ListenerId> {
        if event.is_empty() || event.chars().any(char::is_whitespace) {
            return Err(RemqError::InvalidListener(format!(
                "invalid event name {event:?}"
            )));
        }

        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners
            .entry(event.to_string())
            .or_default()
            .push((id, listener));
        Ok(id)
    }

    /// Remove a registration. Returns false if it was not registered.
    pub fn remove(&mut self, event: &str, id: ListenerId) -> bool {
        let Some(list) = self.listeners.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(lid, _)| *lid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.listeners.remove(event);
        }
        removed
    }

    /// Listeners for an event at this moment, in dispatch order.
    pub fn snapshot(&self, event: &str) -> Vec<Arc<dyn Listener<T>>> {
        self.listeners
            .get(event)
            .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default()
    }

    /// Number of listeners registered for `event`.
    pub fn count(&self, event: &str) -> usize {
        self.listeners.get(event).map_or(0, Vec::len)
    }
}

impl<T> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Call each listener in order, stopping at the first error.
///
/// `active` is checked before every call; once it returns false the
/// remaining listeners are skipped.
pub fn emit<T: 'static>(
    listeners: &[Arc<dyn Listener<T>>],
    message: &Message<T>,
    mut active: impl FnMut() -> bool,
) -> Result<()> {
    for listener in listeners {
        if !active() {
            break;
        }
        listener
            .call(&message.channel, message)
            .map_err(RemqError::Listener)?;
    }
    Ok(())
}
