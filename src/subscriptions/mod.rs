//! Catch-up and live subscriptions.
//!
//! A client holds at most one subscription. Subscribing with a starting id
//! replays persisted messages page by page, then switches to the store's
//! pattern pub/sub for new ones. Subscribing without one goes live at once.
//! Either way, every message reaches the `message` listeners in id order
//! on a dedicated worker thread.
//!
//! ```text
//! Idle ──subscribe(from_id)──▶ CatchingUp ──short page──▶ Live
//!   └───subscribe()──────────────────────────────────────▶ Live
//! CatchingUp | Live ──unsubscribe / fatal error──▶ Stopped ──▶ Idle
//! ```
//!
//! # Handoff gap
//!
//! The switch from paging to pub/sub is not atomic with respect to
//! publishers. A message published after the last page was read and before
//! the pattern subscription is established is not delivered. If publishers
//! keep every page exactly full, catch-up never sees a short page and never
//! goes live. Callers that need every message should persist the last id
//! they handled and reconcile with `consume`.
//!
//! # Example
//!
//! ```ignore
//! let client = Client::new(store.connect());
//!
//! let handle = client
//!     .subscribe_with("events.*", SubscribeOptions::from_id(last_id), |channel: &str, msg: &Message<Vec<u8>>| {
//!         println!("{channel} #{}", msg.id);
//!         Ok(())
//!     })?
//!     .expect("not yet subscribed");
//!
//! handle.join()?;
//! ```

mod manager;
mod types;

pub(crate) use types::ActiveSubscription;
pub use types::{
    SubscribeOptions, SubscriptionHandle, SubscriptionId, SubscriptionInfo, SubscriptionState,
};
