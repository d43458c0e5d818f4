//! Subscription worker: catch-up paging, live pub/sub, and dispatch.

use crate::backend::PubSubStream;
use crate::client::{Client, ClientInner, ClientState};
use crate::codec::Codec;
use crate::error::{RemqError, Result};
use crate::listeners::{self, Listener, MESSAGE};
use crate::types::{channel_key, Message, MessageId};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::thread;

use super::types::{
    ActiveSubscription, SubscribeOptions, SubscriptionHandle, SubscriptionId, SubscriptionInfo,
    SubscriptionState,
};

impl<C: Codec> Client<C> {
    /// Subscribe to channels matching `pattern`.
    ///
    /// With `from_id`, persisted messages after it are replayed before the
    /// subscription goes live; without it, the pattern subscription is
    /// established before this returns, so anything published afterwards is
    /// delivered. Messages go to the `message` listeners.
    ///
    /// Returns None if this client already has a subscription.
    pub fn subscribe(
        &self,
        pattern: &str,
        options: SubscribeOptions,
    ) -> Result<Option<SubscriptionHandle>> {
        self.start_subscription(pattern, options, None)
    }

    /// Like [`subscribe`](Self::subscribe), registering `listener` for
    /// `message` first.
    ///
    /// The listener belongs to the subscription: it is only registered if
    /// the subscription starts, and is removed when it ends.
    pub fn subscribe_with(
        &self,
        pattern: &str,
        options: SubscribeOptions,
        listener: impl Listener<C::Item>,
    ) -> Result<Option<SubscriptionHandle>> {
        self.start_subscription(pattern, options, Some(Arc::new(listener)))
    }

    /// Stop the subscription.
    ///
    /// Once this returns no further messages are delivered, except that a
    /// listener calling it finishes its own invocation. A page request
    /// already in flight is not interrupted; its messages are discarded.
    /// Returns false if there was no subscription.
    pub fn unsubscribe(&self) -> bool {
        let (subscription, in_dispatch) = {
            let mut state = self.inner.state.lock();
            let Some(mut subscription) = state.subscription.take() else {
                return false;
            };
            subscription.state = SubscriptionState::Stopped;
            release_listener(&mut state, &subscription);
            let in_dispatch = state.dispatching == Some(thread::current().id());
            (subscription, in_dispatch)
        };

        tracing::info!(id = %subscription.id, pattern = %subscription.pattern, "unsubscribed");
        drop(subscription);

        // Wait out a dispatch running on another thread.
        if !in_dispatch {
            drop(self.inner.delivery.lock());
        }
        true
    }

    /// The active subscription, if any.
    pub fn subscription(&self) -> Option<SubscriptionInfo> {
        self.inner
            .state
            .lock()
            .subscription
            .as_ref()
            .map(ActiveSubscription::info)
    }

    /// State of the active subscription, or `Idle` if there is none.
    pub fn subscription_state(&self) -> SubscriptionState {
        self.subscription()
            .map_or(SubscriptionState::Idle, |info| info.state)
    }

    fn start_subscription(
        &self,
        pattern: &str,
        options: SubscribeOptions,
        listener: Option<Arc<dyn Listener<C::Item>>>,
    ) -> Result<Option<SubscriptionHandle>> {
        let mut state = self.inner.state.lock();
        if state.subscription.is_some() {
            tracing::debug!(pattern, "already subscribed");
            return Ok(None);
        }

        // Live-only subscriptions listen before returning to the caller.
        let (initial, stream) = match options.from_id {
            Some(_) => (SubscriptionState::CatchingUp, None),
            None => {
                let topic = channel_key(&self.inner.config.namespace, pattern);
                (SubscriptionState::Live, Some(self.inner.backend.psubscribe(&topic)?))
            }
        };

        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::SeqCst));
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let (done_tx, done_rx) = bounded::<()>(0);

        state.subscription = Some(ActiveSubscription {
            id,
            pattern: pattern.to_string(),
            cursor: options.from_id,
            state: initial,
            listener: None,
            _stop: stop_tx,
        });

        let worker = Worker {
            inner: Arc::downgrade(&self.inner),
            id,
            pattern: pattern.to_string(),
            from_id: options.from_id,
            stream,
            stop: stop_rx,
        };

        let spawned = thread::Builder::new()
            .name(format!("remq-subscription-{id}"))
            .spawn(move || worker.run(done_tx));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                state.subscription = None;
                return Err(RemqError::Io(e));
            }
        };

        // The worker cannot dispatch until the state lock is released.
        if let Some(listener) = listener {
            match state.listeners.add(MESSAGE, listener) {
                Ok(listener_id) => {
                    if let Some(sub) = state.subscription.as_mut() {
                        sub.listener = Some(listener_id);
                    }
                }
                Err(e) => {
                    state.subscription = None;
                    return Err(e);
                }
            }
        }

        tracing::info!(%id, pattern, from_id = ?options.from_id, state = %initial, "subscribed");

        Ok(Some(SubscriptionHandle {
            id,
            pattern: pattern.to_string(),
            worker: handle,
            done: done_rx,
        }))
    }

    fn is_running(&self, id: SubscriptionId) -> bool {
        self.inner
            .state
            .lock()
            .subscription
            .as_ref()
            .is_some_and(|s| s.is_running(id))
    }

    fn set_state(&self, id: SubscriptionId, new_state: SubscriptionState) -> bool {
        let mut state = self.inner.state.lock();
        match state.subscription.as_mut() {
            Some(sub) if sub.is_running(id) => {
                sub.state = new_state;
                true
            }
            _ => false,
        }
    }

    /// Deliver one message to the `message` listeners.
    ///
    /// Returns false, without delivering, once the subscription has stopped.
    fn dispatch(&self, id: SubscriptionId, message: Message<C::Item>) -> Result<bool> {
        let _delivery = self.inner.delivery.lock();

        let listeners = {
            let mut state = self.inner.state.lock();
            if !state.subscription.as_ref().is_some_and(|s| s.is_running(id)) {
                return Ok(false);
            }
            state.dispatching = Some(thread::current().id());
            state.listeners.snapshot(MESSAGE)
        };
        let _dispatching = DispatchGuard(&self.inner);

        listeners::emit(&listeners, &message, || self.is_running(id))?;

        let mut state = self.inner.state.lock();
        match state.subscription.as_mut() {
            Some(sub) if sub.is_running(id) => {
                sub.cursor = Some(message.id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Clears the dispatching thread, also when a listener panics.
struct DispatchGuard<'a, C: Codec>(&'a ClientInner<C>);

impl<C: Codec> Drop for DispatchGuard<'_, C> {
    fn drop(&mut self) {
        self.0.state.lock().dispatching = None;
    }
}

/// Remove the listener a subscription registered for itself.
fn release_listener<T>(state: &mut ClientState<T>, subscription: &ActiveSubscription) {
    if let Some(listener) = subscription.listener {
        state.listeners.remove(MESSAGE, listener);
    }
}

/// Releases the subscription when the worker exits, however it exits.
struct ExitGuard<C: Codec> {
    inner: Weak<ClientInner<C>>,
    id: SubscriptionId,
    _done: Sender<()>,
}

impl<C: Codec> Drop for ExitGuard<C> {
    fn drop(&mut self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut state = inner.state.lock();
        if state.subscription.as_ref().is_some_and(|s| s.id == self.id) {
            if let Some(subscription) = state.subscription.take() {
                release_listener(&mut state, &subscription);
            }
        }
    }
}

/// Drives one subscription.
///
/// Holds the client weakly: the client owns the stop signal, so once every
/// client handle is gone the worker exits instead of keeping it alive.
struct Worker<C: Codec> {
    inner: Weak<ClientInner<C>>,
    id: SubscriptionId,
    pattern: String,
    from_id: Option<MessageId>,
    stream: Option<PubSubStream>,
    /// Disconnects when the subscription is stopped.
    stop: Receiver<()>,
}

impl<C: Codec> Worker<C> {
    fn run(mut self, done: Sender<()>) -> Result<()> {
        let _exit = ExitGuard {
            inner: Weak::clone(&self.inner),
            id: self.id,
            _done: done,
        };

        let result = self.drive();
        match &result {
            Ok(()) => tracing::debug!(id = %self.id, pattern = %self.pattern, "subscription worker exited"),
            Err(e) => tracing::error!(id = %self.id, pattern = %self.pattern, error = %e, "subscription failed"),
        }
        result
    }

    /// The client, while any handle to it is still alive.
    fn client(&self) -> Option<Client<C>> {
        self.inner.upgrade().map(|inner| Client { inner })
    }

    fn drive(&mut self) -> Result<()> {
        let stream = match self.stream.take() {
            Some(stream) => stream,
            None => {
                let cursor = self.from_id.unwrap_or_default();
                if !self.catch_up(cursor)? {
                    return Ok(());
                }

                let Some(client) = self.client() else {
                    return Ok(());
                };
                let topic = channel_key(&client.inner.config.namespace, &self.pattern);
                let stream = client.inner.backend.psubscribe(&topic)?;
                if !client.set_state(self.id, SubscriptionState::Live) {
                    return Ok(());
                }
                tracing::info!(id = %self.id, pattern = %self.pattern, "caught up, now live");
                stream
            }
        };

        self.listen(&stream)
    }

    /// Page through persisted messages until a short page.
    ///
    /// Returns false if the subscription stopped first.
    fn catch_up(&self, mut cursor: MessageId) -> Result<bool> {
        loop {
            let Some(client) = self.client() else {
                return Ok(false);
            };
            if !client.is_running(self.id) {
                return Ok(false);
            }

            let page_size = client.inner.config.page_size.max(1);
            let page = client.consume_page(&self.pattern, cursor, page_size)?;
            let len = page.len();
            tracing::debug!(id = %self.id, %cursor, len, "catch-up page");

            for message in page {
                cursor = message.id;
                if !client.dispatch(self.id, message)? {
                    return Ok(false);
                }
            }

            if len < page_size {
                return Ok(true);
            }
        }
    }

    /// Deliver pub/sub messages until stopped or the connection drops.
    fn listen(&self, stream: &PubSubStream) -> Result<()> {
        loop {
            select! {
                recv(self.stop) -> _ => return Ok(()),
                recv(stream.receiver()) -> received => {
                    let Some(client) = self.client() else {
                        return Ok(());
                    };
                    let Ok(received) = received else {
                        if !client.is_running(self.id) {
                            return Ok(());
                        }
                        return Err(RemqError::Transport("subscription connection closed".into()));
                    };

                    let message = client.decode_record(&received.payload)?;
                    if !client.dispatch(self.id, message)? {
                        return Ok(());
                    }
                }
            }
        }
    }
}
