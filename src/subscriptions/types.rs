//! Subscription types.

use crate::error::{RemqError, Result};
use crate::listeners::ListenerId;
use crate::types::MessageId;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::fmt;
use std::thread::JoinHandle;
use std::time::Duration;

/// Where a subscription is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    /// No subscription.
    Idle,
    /// Replaying persisted messages from a cursor.
    CatchingUp,
    /// Receiving published messages as they arrive.
    Live,
    /// Unsubscribed or failed; the worker is exiting.
    Stopped,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubscriptionState::Idle => "idle",
            SubscriptionState::CatchingUp => "catching_up",
            SubscriptionState::Live => "live",
            SubscriptionState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Unique identifier for a subscription within a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Options for [`Client::subscribe`](crate::Client::subscribe).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Replay persisted messages after this id before going live.
    /// None = live only.
    pub from_id: Option<MessageId>,
}

impl SubscribeOptions {
    /// Live only.
    pub fn live() -> Self {
        Self::default()
    }

    /// Catch up from `id` (exclusive), then go live.
    pub fn from_id(id: MessageId) -> Self {
        Self { from_id: Some(id) }
    }
}

/// Snapshot of the active subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub pattern: String,
    /// Id of the last message delivered to listeners.
    pub cursor: Option<MessageId>,
    pub state: SubscriptionState,
}

/// The client's record of its one subscription.
pub(crate) struct ActiveSubscription {
    pub(crate) id: SubscriptionId,
    pub(crate) pattern: String,
    pub(crate) cursor: Option<MessageId>,
    pub(crate) state: SubscriptionState,
    /// Listener registered by `subscribe_with`, removed with the subscription.
    pub(crate) listener: Option<ListenerId>,
    /// Dropped to tell the worker to stop.
    pub(crate) _stop: Sender<()>,
}

impl ActiveSubscription {
    pub(crate) fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            id: self.id,
            pattern: self.pattern.clone(),
            cursor: self.cursor,
            state: self.state,
        }
    }

    pub(crate) fn is_running(&self, id: SubscriptionId) -> bool {
        self.id == id && self.state != SubscriptionState::Stopped
    }
}

/// Handle to a subscription's worker thread.
///
/// Dropping the handle does not stop the subscription; call
/// [`Client::unsubscribe`](crate::Client::unsubscribe).
pub struct SubscriptionHandle {
    pub(crate) id: SubscriptionId,
    pub(crate) pattern: String,
    pub(crate) worker: JoinHandle<Result<()>>,
    pub(crate) done: Receiver<()>,
}

impl SubscriptionHandle {
    /// Get the subscription id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Get the subscribed pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Block until the worker exits.
    ///
    /// Returns the error that ended the subscription, if any. A listener
    /// panic surfaces as [`RemqError::WorkerPanicked`].
    pub fn join(self) -> Result<()> {
        self.worker.join().map_err(|_| RemqError::WorkerPanicked)?
    }

    /// Wait up to `timeout` for the worker to exit. Returns true if it has.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(
            self.done.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected) | Ok(())
        )
    }

    /// Whether the worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .finish()
    }
}
