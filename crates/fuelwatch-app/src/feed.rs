//! Async change feed.
//!
//! Store callbacks run synchronously on the thread that called `set`. Async
//! consumers instead attach a [`ChangeFeed`], which forwards matching changes
//! into a tokio broadcast channel that any number of tasks can receive from.

use fuelwatch_core::{StateMap, StateStore, StoreHandle, Subscription};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// One applied setting change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingChange {
    pub key: String,
    pub value: Value,
}

/// Selects which settings a feed forwards.
#[derive(Debug, Clone, Default)]
pub enum KeyFilter {
    /// Every setting.
    #[default]
    All,
    /// Only the listed settings.
    Only(Vec<String>),
}

impl KeyFilter {
    /// Build a filter from setting names. `"*"` selects everything.
    pub fn keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        if keys.iter().any(|k| k == "*") {
            KeyFilter::All
        } else {
            KeyFilter::Only(keys)
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyFilter::All => true,
            KeyFilter::Only(keys) => keys.iter().any(|k| k == key),
        }
    }
}

/// Forwards store changes to a broadcast channel.
///
/// Dropping the feed unsubscribes it from the store.
#[derive(Debug)]
pub struct ChangeFeed {
    tx: broadcast::Sender<SettingChange>,
    subscription: Subscription,
}

impl ChangeFeed {
    /// Attach a feed to a store owned by the caller.
    ///
    /// `capacity` bounds how many changes a slow receiver may lag behind
    /// before it observes `RecvError::Lagged`.
    pub fn new(store: &StateStore, capacity: usize, filter: KeyFilter) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        let subscription = store.subscribe(forward(tx.clone(), filter));
        Self::attached(tx, subscription)
    }

    /// Attach a feed through a handle. Returns `None` if the store is gone.
    pub fn attach(store: &StoreHandle, capacity: usize, filter: KeyFilter) -> Option<Self> {
        let (tx, _) = broadcast::channel(capacity.max(1));
        let subscription = store.subscribe(forward(tx.clone(), filter))?;
        Some(Self::attached(tx, subscription))
    }

    fn attached(tx: broadcast::Sender<SettingChange>, subscription: Subscription) -> Self {
        debug!(subscription = ?subscription.id(), "Change feed attached");
        Self { tx, subscription }
    }

    /// A new receiver that sees changes applied after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<SettingChange> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Store callback that sends matching changes into `tx`.
fn forward(
    tx: broadcast::Sender<SettingChange>,
    filter: KeyFilter,
) -> impl Fn(&StateMap, &str, &Value) + Send + Sync + 'static {
    move |_, key, value| {
        if !filter.matches(key) {
            return;
        }
        let change = SettingChange {
            key: key.to_string(),
            value: value.clone(),
        };
        // No receivers is fine; the change is simply dropped
        if tx.send(change).is_err() {
            trace!(key = %key, "Change feed has no receivers");
        }
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}
