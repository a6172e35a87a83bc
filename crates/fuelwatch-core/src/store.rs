//! Reactive settings store.
//!
//! The store keeps the current value of every dashboard setting in memory,
//! writes the allow-listed subset to a [`SettingsStorage`] backend whenever
//! one of those settings changes, and notifies subscribers synchronously.
//!
//! # Ownership
//!
//! [`StateStore`] is owned by the application root. Consumers receive a
//! [`StoreHandle`], which does not keep the store alive; once the store is
//! dropped, handle reads return `None` and writes are ignored.
//!
//! # Re-entrancy
//!
//! Every operation runs under one re-entrant lock, held across compare,
//! update, persist and notify. Other threads wait for a notification pass to
//! finish. A callback on the notifying thread may call back into the store:
//! a nested `set` that changes a value runs its own notification pass to
//! completion before the outer pass continues (depth-first), and the
//! remaining outer callbacks see the state as it is when they are called.

use crate::model::{
    self, keys, ColorMode, FuelType, StateMap, DEFAULT_STORAGE_KEY, PERSISTED_KEYS,
};
use crate::storage::SettingsStorage;
use parking_lot::ReentrantMutex;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Change callback: `(full state, changed key, new value)`.
pub type Callback = dyn Fn(&StateMap, &str, &Value) + Send + Sync;

/// Identifies one registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Store construction parameters.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Key under which the snapshot is written to backing storage.
    pub storage_key: String,
    /// Settings included in the snapshot.
    pub persisted_keys: Vec<String>,
    /// Initial values before the persisted snapshot is merged in.
    pub defaults: StateMap,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::with_year(model::current_year())
    }
}

impl StoreConfig {
    /// Dashboard defaults with `year` as the default year.
    pub fn with_year(year: i32) -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            persisted_keys: PERSISTED_KEYS.iter().map(|k| k.to_string()).collect(),
            defaults: model::default_entries(year),
        }
    }

    /// Check if a setting is written to backing storage.
    pub fn is_persisted(&self, key: &str) -> bool {
        self.persisted_keys.iter().any(|k| k == key)
    }

    /// The allow-listed subset of `entries`, as written to storage.
    fn persisted_subset(&self, entries: &StateMap) -> Map<String, Value> {
        self.persisted_keys
            .iter()
            .filter_map(|key| entries.get(key).map(|value| (key.clone(), value.clone())))
            .collect()
    }
}

/// Read access and change operations shared by the store and its handles.
///
/// The typed accessors fall back to the setting's default when the stored
/// value is missing or not valid for the key.
pub trait SettingsStore {
    /// Get the current value of a setting.
    fn get(&self, key: &str) -> Option<Value>;

    /// Change a setting. Returns `true` if the value changed and subscribers
    /// were notified, `false` if it was already equal.
    fn set(&self, key: &str, value: Value) -> bool;

    fn fuel_type(&self) -> FuelType {
        self.get(keys::FUEL_TYPE)
            .and_then(|v| v.as_str()?.parse().ok())
            .unwrap_or_default()
    }

    fn color_mode(&self) -> ColorMode {
        self.get(keys::COLOR_MODE)
            .and_then(|v| v.as_str()?.parse().ok())
            .unwrap_or_default()
    }

    fn year(&self) -> Option<i32> {
        self.get(keys::YEAR).as_ref().and_then(model::parse_year)
    }

    fn month(&self) -> Option<u32> {
        self.get(keys::MONTH).as_ref().and_then(model::parse_month)
    }

    fn active_page(&self) -> Option<String> {
        self.get(keys::ACTIVE_PAGE)
            .and_then(|v| v.as_str().map(String::from))
    }

    fn set_fuel_type(&self, fuel: FuelType) -> bool {
        self.set(keys::FUEL_TYPE, Value::from(fuel.as_str()))
    }

    fn set_color_mode(&self, mode: ColorMode) -> bool {
        self.set(keys::COLOR_MODE, Value::from(mode.as_str()))
    }

    /// Select a year and month. Each changed setting notifies separately.
    fn set_period(&self, year: i32, month: u32) -> bool {
        let year_changed = self.set(keys::YEAR, Value::from(year.to_string()));
        let month_changed = self.set(keys::MONTH, Value::from(month.to_string()));
        year_changed || month_changed
    }
}

struct Subscriber {
    id: SubscriptionId,
    callback: Arc<Callback>,
}

struct Inner {
    entries: StateMap,
    subscribers: Vec<Subscriber>,
    next_id: u64,
    /// Bumped on every applied change.
    revision: u64,
}

impl Inner {
    fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.subscribers.iter().any(|s| s.id == id)
    }
}

struct Shared {
    inner: ReentrantMutex<RefCell<Inner>>,
    storage: Arc<dyn SettingsStorage>,
    config: StoreConfig,
}

impl Shared {
    fn get(&self, key: &str) -> Option<Value> {
        let guard = self.inner.lock();
        let value = guard.borrow().entries.get(key).cloned();
        value
    }

    fn set(&self, key: &str, value: Value) -> bool {
        let guard = self.inner.lock();

        let (mut state, mut seen_revision, pending) = {
            let mut inner = guard.borrow_mut();
            if inner.entries.get(key) == Some(&value) {
                return false;
            }
            inner.entries.insert(key.to_string(), value.clone());
            inner.revision += 1;
            let pending: Vec<(SubscriptionId, Arc<Callback>)> = inner
                .subscribers
                .iter()
                .map(|s| (s.id, Arc::clone(&s.callback)))
                .collect();
            (inner.entries.clone(), inner.revision, pending)
        };

        if self.config.is_persisted(key) {
            self.persist(&state);
        }

        debug!(key = %key, subscribers = pending.len(), "Setting changed");

        for (id, callback) in pending {
            {
                let inner = guard.borrow();
                // Removed by an earlier callback in this pass
                if !inner.is_subscribed(id) {
                    continue;
                }
                if inner.revision != seen_revision {
                    state = inner.entries.clone();
                    seen_revision = inner.revision;
                }
            }
            callback(&state, key, &value);
        }

        true
    }

    /// Write the allow-listed snapshot. Failures are logged and swallowed:
    /// the in-memory state stays authoritative for the session.
    fn persist(&self, entries: &StateMap) {
        let snapshot = Value::Object(self.config.persisted_subset(entries));
        let blob = match serde_json::to_string(&snapshot) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(error = %e, "Failed to serialize settings snapshot");
                return;
            }
        };

        if let Err(e) = self.storage.save(&self.config.storage_key, &blob) {
            warn!(
                storage_key = %self.config.storage_key,
                error = %e,
                "Failed to persist settings, keeping in-memory state"
            );
        }
    }

    fn subscribe(self: &Arc<Self>, callback: Arc<Callback>) -> Subscription {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();

        let id = SubscriptionId(inner.next_id);
        inner.next_id += 1;
        inner.subscribers.push(Subscriber { id, callback });
        debug!(subscription = id.0, total = inner.subscribers.len(), "Subscriber added");

        Subscription {
            id,
            shared: Arc::downgrade(self),
        }
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();

        let before = inner.subscribers.len();
        inner.subscribers.retain(|s| s.id != id);
        before != inner.subscribers.len()
    }
}

/// Read the persisted snapshot, keeping only allow-listed keys with valid
/// values. Anything unreadable counts as "nothing persisted".
fn load_snapshot(storage: &dyn SettingsStorage, config: &StoreConfig) -> StateMap {
    let blob = match storage.load(&config.storage_key) {
        Ok(Some(blob)) => blob,
        Ok(None) => return StateMap::new(),
        Err(e) => {
            warn!(error = %e, "Failed to read persisted settings, using defaults");
            return StateMap::new();
        }
    };

    let object = match serde_json::from_str::<Value>(&blob) {
        Ok(Value::Object(object)) => object,
        Ok(_) => {
            warn!("Persisted settings are not a JSON object, using defaults");
            return StateMap::new();
        }
        Err(e) => {
            warn!(error = %e, "Persisted settings are not valid JSON, using defaults");
            return StateMap::new();
        }
    };

    object
        .into_iter()
        .filter(|(key, _)| config.is_persisted(key))
        .filter(|(key, value)| {
            let valid = model::is_valid_value(key, value);
            if !valid {
                warn!(key = %key, value = %value, "Ignoring invalid persisted setting");
            }
            valid
        })
        .collect()
}

/// The settings store.
///
/// Created once by the application root. Hand [`StoreHandle`]s to consumers
/// rather than sharing the store itself.
pub struct StateStore {
    shared: Arc<Shared>,
}

impl StateStore {
    /// Create a store with the dashboard defaults, restoring any snapshot
    /// found in `storage`.
    pub fn new(storage: Arc<dyn SettingsStorage>) -> Self {
        Self::open(storage, StoreConfig::default())
    }

    /// Create a store with explicit configuration.
    ///
    /// Persisted values win over defaults key by key.
    pub fn open(storage: Arc<dyn SettingsStorage>, config: StoreConfig) -> Self {
        let mut entries = config.defaults.clone();
        let restored = load_snapshot(storage.as_ref(), &config);
        debug!(restored = restored.len(), "Settings store opened");
        entries.extend(restored);

        Self {
            shared: Arc::new(Shared {
                inner: ReentrantMutex::new(RefCell::new(Inner {
                    entries,
                    subscribers: Vec::new(),
                    next_id: 0,
                    revision: 0,
                })),
                storage,
                config,
            }),
        }
    }

    /// A non-owning handle for consumers.
    pub fn handle(&self) -> StoreHandle {
        StoreHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Register a change callback.
    ///
    /// The callback runs on every future change, not for the current state;
    /// call [`SettingsStore::get`] for initial values. Dropping the returned
    /// [`Subscription`] does not unsubscribe.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StateMap, &str, &Value) + Send + Sync + 'static,
    {
        self.shared.subscribe(Arc::new(callback))
    }

    /// Clone of the full current state.
    pub fn snapshot(&self) -> StateMap {
        let guard = self.shared.inner.lock();
        let entries = guard.borrow().entries.clone();
        entries
    }

    /// The allow-listed subset as it would be written to storage.
    pub fn persisted_snapshot(&self) -> Value {
        let guard = self.shared.inner.lock();
        let subset = self.shared.config.persisted_subset(&guard.borrow().entries);
        Value::Object(subset)
    }

    /// Number of registered callbacks.
    pub fn subscriber_count(&self) -> usize {
        let guard = self.shared.inner.lock();
        let count = guard.borrow().subscribers.len();
        count
    }

    /// Restore every default and delete the persisted snapshot.
    ///
    /// Each setting that actually changes notifies subscribers, in key order.
    /// Settings without a default are left alone. Returns the number of
    /// settings changed.
    pub fn reset(&self) -> usize {
        let _guard = self.shared.inner.lock();

        let mut changed = 0;
        for (key, value) in &self.shared.config.defaults {
            if self.shared.set(key, value.clone()) {
                changed += 1;
            }
        }

        if let Err(e) = self.shared.storage.remove(&self.shared.config.storage_key) {
            warn!(error = %e, "Failed to remove persisted settings");
        }

        changed
    }

    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }
}

impl SettingsStore for StateStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.shared.get(key)
    }

    fn set(&self, key: &str, value: Value) -> bool {
        self.shared.set(key, value)
    }
}

impl fmt::Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStore")
            .field("storage_key", &self.shared.config.storage_key)
            .field("entries", &self.snapshot())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Non-owning reference to a [`StateStore`].
///
/// Once the store is dropped, `get` returns `None`, `set` returns `false`
/// and `subscribe` returns `None`.
#[derive(Debug, Clone)]
pub struct StoreHandle {
    shared: Weak<Shared>,
}

impl StoreHandle {
    /// Register a change callback. See [`StateStore::subscribe`].
    pub fn subscribe<F>(&self, callback: F) -> Option<Subscription>
    where
        F: Fn(&StateMap, &str, &Value) + Send + Sync + 'static,
    {
        let shared = self.shared.upgrade()?;
        Some(shared.subscribe(Arc::new(callback)))
    }

    /// Check if the store is still alive.
    pub fn is_alive(&self) -> bool {
        self.shared.strong_count() > 0
    }
}

impl SettingsStore for StoreHandle {
    fn get(&self, key: &str) -> Option<Value> {
        self.shared.upgrade()?.get(key)
    }

    fn set(&self, key: &str, value: Value) -> bool {
        match self.shared.upgrade() {
            Some(shared) => shared.set(key, value),
            None => false,
        }
    }
}

/// Capability to remove one registered callback.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    shared: Weak<Shared>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove the callback. Returns `true` if it was still registered;
    /// repeated calls, and calls after the store is gone, return `false`.
    pub fn unsubscribe(&self) -> bool {
        match self.shared.upgrade() {
            Some(shared) => shared.unsubscribe(self.id),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, StorageError};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    type Calls = Arc<Mutex<Vec<(String, Value)>>>;

    fn memory() -> Arc<MemoryStorage> {
        Arc::new(MemoryStorage::new())
    }

    fn open(storage: &Arc<MemoryStorage>) -> StateStore {
        StateStore::open(storage.clone(), StoreConfig::with_year(2024))
    }

    fn record(store: &StateStore) -> (Calls, Subscription) {
        let calls: Calls = Arc::default();
        let sink = calls.clone();
        let sub = store.subscribe(move |_, key, value| {
            sink.lock().push((key.to_string(), value.clone()));
        });
        (calls, sub)
    }

    fn persisted(storage: &MemoryStorage) -> Value {
        let blob = storage.load(DEFAULT_STORAGE_KEY).unwrap().unwrap();
        serde_json::from_str(&blob).unwrap()
    }

    /// Storage where every operation fails.
    struct BrokenStorage;

    impl SettingsStorage for BrokenStorage {
        fn load(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into())
        }

        fn save(&self, _key: &str, _blob: &str) -> Result<(), StorageError> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into())
        }

        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into())
        }
    }

    #[test]
    fn test_defaults_on_empty_storage() {
        let storage = memory();
        let store = open(&storage);

        assert_eq!(store.get(keys::FUEL_TYPE), Some(json!("e10")));
        assert_eq!(store.get(keys::YEAR), Some(json!("2024")));
        assert_eq!(store.get(keys::MONTH), Some(json!("1")));
        assert_eq!(store.get(keys::ACTIVE_PAGE), Some(json!("overview")));
        assert_eq!(store.get(keys::COLOR_MODE), Some(json!("default")));
        // Construction alone writes nothing
        assert!(!storage.has_key(DEFAULT_STORAGE_KEY));
    }

    #[test]
    fn test_default_year_is_current_year() {
        let store = StateStore::new(memory());
        assert_eq!(store.year(), Some(model::current_year()));
    }

    #[test]
    fn test_unknown_key_is_absent() {
        let store = open(&memory());
        assert_eq!(store.get("doesNotExist"), None);
    }

    #[test]
    fn test_set_notifies_once_and_persists() {
        let storage = memory();
        let store = open(&storage);
        let (calls, _sub) = record(&store);

        assert!(store.set(keys::FUEL_TYPE, json!("e5")));

        assert_eq!(
            *calls.lock(),
            vec![(keys::FUEL_TYPE.to_string(), json!("e5"))]
        );
        assert_eq!(store.get(keys::FUEL_TYPE), Some(json!("e5")));
        assert_eq!(
            persisted(&storage),
            json!({
                "fuelType": "e5",
                "year": "2024",
                "month": "1",
                "colorMode": "default"
            })
        );

        // Same value again: nothing happens
        assert!(!store.set(keys::FUEL_TYPE, json!("e5")));
        assert_eq!(calls.lock().len(), 1);
    }

    #[test]
    fn test_equal_value_does_not_persist() {
        let storage = memory();
        let store = open(&storage);

        assert!(!store.set(keys::FUEL_TYPE, json!("e10")));
        assert!(!storage.has_key(DEFAULT_STORAGE_KEY));
    }

    #[test]
    fn test_value_equality_not_identity() {
        let store = open(&memory());
        let (calls, _sub) = record(&store);

        store.set("filters", json!({ "region": "BW", "stations": [1, 2] }));
        store.set("filters", json!({ "region": "BW", "stations": [1, 2] }));
        assert_eq!(calls.lock().len(), 1);

        // A number is not equal to its string form
        store.set(keys::MONTH, json!(1));
        assert_eq!(calls.lock().len(), 2);
    }

    #[test]
    fn test_persisted_round_trip() {
        let storage = memory();
        {
            let store = open(&storage);
            store.set(keys::FUEL_TYPE, json!("diesel"));
            store.set(keys::COLOR_MODE, json!("accessible"));
            store.set_period(2022, 3);
        }

        let store = open(&storage);
        assert_eq!(store.get(keys::FUEL_TYPE), Some(json!("diesel")));
        assert_eq!(store.fuel_type(), FuelType::Diesel);
        assert_eq!(store.color_mode(), ColorMode::Accessible);
        assert_eq!(store.year(), Some(2022));
        assert_eq!(store.month(), Some(3));
    }

    #[test]
    fn test_transient_keys_do_not_round_trip() {
        let storage = memory();
        {
            let store = open(&storage);
            store.set(keys::ACTIVE_PAGE, json!("crisis"));
            store.set("tooltipPinned", json!(true));
            store.set(keys::FUEL_TYPE, json!("e5"));
        }

        let store = open(&storage);
        assert_eq!(store.get(keys::ACTIVE_PAGE), Some(json!("overview")));
        assert_eq!(store.get("tooltipPinned"), None);
        assert_eq!(store.get(keys::FUEL_TYPE), Some(json!("e5")));

        let snapshot = persisted(&storage);
        assert!(snapshot.get(keys::ACTIVE_PAGE).is_none());
        assert!(snapshot.get("tooltipPinned").is_none());
    }

    #[test]
    fn test_transient_change_skips_persistence() {
        let storage = memory();
        let store = open(&storage);
        let (calls, _sub) = record(&store);

        assert!(store.set(keys::ACTIVE_PAGE, json!("regional")));
        assert_eq!(calls.lock().len(), 1);
        assert!(!storage.has_key(DEFAULT_STORAGE_KEY));
    }

    #[test]
    fn test_callback_sees_new_value() {
        let store = open(&memory());
        let handle = store.handle();
        let seen: Arc<Mutex<Vec<(Value, Option<Value>, Option<Value>)>>> = Arc::default();
        let sink = seen.clone();

        let _sub = store.subscribe(move |state, key, value| {
            sink.lock().push((
                value.clone(),
                state.get(key).cloned(),
                handle.get(keys::COLOR_MODE),
            ));
        });

        store.set(keys::COLOR_MODE, json!("accessible"));

        assert_eq!(
            *seen.lock(),
            vec![(
                json!("accessible"),
                Some(json!("accessible")),
                Some(json!("accessible"))
            )]
        );
    }

    #[test]
    fn test_every_subscriber_called_in_order() {
        let store = open(&memory());
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::default();

        for name in ["first", "second", "third"] {
            let order = order.clone();
            store.subscribe(move |_, _, _| order.lock().push(name));
        }

        store.set(keys::COLOR_MODE, json!("accessible"));
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
        assert_eq!(store.subscriber_count(), 3);
    }

    #[test]
    fn test_subscribe_does_not_replay() {
        let store = open(&memory());
        store.set(keys::FUEL_TYPE, json!("e5"));

        let (calls, _sub) = record(&store);
        assert!(calls.lock().is_empty());
    }

    #[test]
    fn test_unsubscribe_stops_delivery_and_is_idempotent() {
        let store = open(&memory());
        let (calls, sub) = record(&store);
        let (other_calls, _other) = record(&store);

        store.set(keys::MONTH, json!("2"));
        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        store.set(keys::MONTH, json!("3"));

        assert_eq!(calls.lock().len(), 1);
        assert_eq!(other_calls.lock().len(), 2);
        assert_eq!(store.subscriber_count(), 1);
    }

    #[test]
    fn test_unsubscribe_after_store_dropped() {
        let store = open(&memory());
        let (_calls, sub) = record(&store);
        drop(store);
        assert!(!sub.unsubscribe());
    }

    #[test]
    fn test_write_failure_keeps_memory_and_notifies() {
        let storage = Arc::new(MemoryStorage::with_quota(10));
        let store = StateStore::open(storage.clone(), StoreConfig::with_year(2024));
        let (calls, _sub) = record(&store);

        assert!(store.set(keys::FUEL_TYPE, json!("diesel")));

        assert_eq!(store.get(keys::FUEL_TYPE), Some(json!("diesel")));
        assert_eq!(calls.lock().len(), 1);
        assert!(!storage.has_key(DEFAULT_STORAGE_KEY));
    }

    #[test]
    fn test_unavailable_storage_degrades_to_defaults() {
        let store = StateStore::open(Arc::new(BrokenStorage), StoreConfig::with_year(2024));
        let (calls, _sub) = record(&store);

        assert_eq!(store.fuel_type(), FuelType::E10);
        assert!(store.set_fuel_type(FuelType::E5));
        assert_eq!(store.fuel_type(), FuelType::E5);
        assert_eq!(calls.lock().len(), 1);
        assert_eq!(store.reset(), 1);
    }

    #[test]
    fn test_malformed_snapshot_treated_as_absent() {
        for blob in ["{not json", "null", "[1,2,3]", "\"e5\""] {
            let storage = memory();
            storage.save(DEFAULT_STORAGE_KEY, blob).unwrap();

            let store = open(&storage);
            assert_eq!(store.snapshot(), model::default_entries(2024), "blob {blob:?}");
        }
    }

    #[test]
    fn test_invalid_persisted_values_fall_back_per_key() {
        let storage = memory();
        storage
            .save(
                DEFAULT_STORAGE_KEY,
                r#"{"fuelType":"kerosene","year":"2021","month":"13","colorMode":"accessible","activePage":"crisis","extra":1}"#,
            )
            .unwrap();

        let store = open(&storage);
        assert_eq!(store.get(keys::FUEL_TYPE), Some(json!("e10")));
        assert_eq!(store.get(keys::YEAR), Some(json!("2021")));
        assert_eq!(store.get(keys::MONTH), Some(json!("1")));
        assert_eq!(store.get(keys::COLOR_MODE), Some(json!("accessible")));
        assert_eq!(store.get(keys::ACTIVE_PAGE), Some(json!("overview")));
        assert_eq!(store.get("extra"), None);
    }

    #[test]
    fn test_snapshot_overwrites_fully() {
        let storage = memory();
        storage
            .save(DEFAULT_STORAGE_KEY, r#"{"fuelType":"e5","legacy":"x"}"#)
            .unwrap();

        let store = open(&storage);
        store.set(keys::MONTH, json!("6"));

        assert_eq!(
            persisted(&storage),
            json!({
                "fuelType": "e5",
                "year": "2024",
                "month": "6",
                "colorMode": "default"
            })
        );
        assert_eq!(store.persisted_snapshot(), persisted(&storage));
    }

    #[test]
    fn test_same_key_write_from_callback_terminates() {
        let store = open(&memory());
        let handle = store.handle();
        let count = Arc::new(Mutex::new(0));
        let counter = count.clone();

        store.subscribe(move |_, key, value| {
            *counter.lock() += 1;
            // Echo the value back; it already matches so nothing re-fires
            handle.set(key, value.clone());
        });

        store.set(keys::FUEL_TYPE, json!("e5"));
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn test_nested_set_is_depth_first() {
        let store = open(&memory());
        let handle = store.handle();
        let log: Arc<Mutex<Vec<String>>> = Arc::default();

        let sink = log.clone();
        store.subscribe(move |_, key, value| {
            sink.lock().push(format!("a:{key}={value}"));
            if key == keys::FUEL_TYPE {
                handle.set(keys::MONTH, json!("5"));
            }
        });

        let sink = log.clone();
        store.subscribe(move |state, key, value| {
            sink.lock().push(format!("b:{key}={value} month={}", state[keys::MONTH]));
        });

        store.set(keys::FUEL_TYPE, json!("e5"));

        assert_eq!(
            *log.lock(),
            vec![
                r#"a:fuelType="e5""#.to_string(),
                r#"a:month="5""#.to_string(),
                r#"b:month="5" month="5""#.to_string(),
                r#"b:fuelType="e5" month="5""#.to_string(),
            ]
        );
    }

    #[test]
    fn test_unsubscribe_during_pass_skips_later_callback() {
        let store = Arc::new(open(&memory()));
        let calls: Arc<Mutex<Vec<&'static str>>> = Arc::default();
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::default();

        let sink = calls.clone();
        let target = victim.clone();
        store.subscribe(move |_, _, _| {
            sink.lock().push("first");
            if let Some(sub) = target.lock().as_ref() {
                sub.unsubscribe();
            }
        });

        let sink = calls.clone();
        let sub = store.subscribe(move |_, _, _| sink.lock().push("second"));
        *victim.lock() = Some(sub);

        store.set(keys::FUEL_TYPE, json!("diesel"));
        assert_eq!(*calls.lock(), vec!["first"]);
    }

    #[test]
    fn test_subscribe_during_pass_waits_for_next_change() {
        let store = open(&memory());
        let handle = store.handle();
        let late_calls = Arc::new(Mutex::new(0));
        let registered = Arc::new(Mutex::new(false));

        let counter = late_calls.clone();
        let flag = registered.clone();
        store.subscribe(move |_, _, _| {
            let mut done = flag.lock();
            if !*done {
                *done = true;
                let counter = counter.clone();
                handle.subscribe(move |_, _, _| *counter.lock() += 1);
            }
        });

        store.set(keys::MONTH, json!("2"));
        assert_eq!(*late_calls.lock(), 0);

        store.set(keys::MONTH, json!("3"));
        assert_eq!(*late_calls.lock(), 1);
    }

    #[test]
    fn test_handle_degrades_after_drop() {
        let store = open(&memory());
        let handle = store.handle();

        assert!(handle.is_alive());
        assert_eq!(handle.fuel_type(), FuelType::E10);
        assert!(handle.set_color_mode(ColorMode::Accessible));
        assert_eq!(store.color_mode(), ColorMode::Accessible);

        drop(store);
        assert!(!handle.is_alive());
        assert_eq!(handle.get(keys::COLOR_MODE), None);
        assert!(!handle.set(keys::COLOR_MODE, json!("default")));
        assert!(handle.subscribe(|_, _, _| {}).is_none());
    }

    #[test]
    fn test_typed_getters_fall_back_on_invalid_values() {
        let store = open(&memory());
        store.set(keys::FUEL_TYPE, json!(42));
        store.set(keys::COLOR_MODE, json!("sepia"));
        store.set(keys::MONTH, json!("0"));

        assert_eq!(store.fuel_type(), FuelType::E10);
        assert_eq!(store.color_mode(), ColorMode::Standard);
        assert_eq!(store.month(), None);
    }

    #[test]
    fn test_set_period() {
        let store = open(&memory());
        let (calls, _sub) = record(&store);

        assert!(store.set_period(2023, 1));
        assert_eq!(
            *calls.lock(),
            vec![(keys::YEAR.to_string(), json!("2023"))]
        );
        assert!(!store.set_period(2023, 1));
    }

    #[test]
    fn test_reset_restores_defaults_and_clears_snapshot() {
        let storage = memory();
        let store = open(&storage);
        store.set(keys::FUEL_TYPE, json!("diesel"));
        store.set(keys::ACTIVE_PAGE, json!("trends"));
        store.set("tooltipPinned", json!(true));
        let (calls, _sub) = record(&store);

        assert_eq!(store.reset(), 2);

        assert_eq!(
            *calls.lock(),
            vec![
                (keys::ACTIVE_PAGE.to_string(), json!("overview")),
                (keys::FUEL_TYPE.to_string(), json!("e10")),
            ]
        );
        assert_eq!(store.get("tooltipPinned"), Some(json!(true)));
        assert!(!storage.has_key(DEFAULT_STORAGE_KEY));
    }

    #[test]
    fn test_concurrent_sets_are_serialized() {
        let store = Arc::new(open(&memory()));
        let in_pass = Arc::new(Mutex::new(false));
        let overlaps = Arc::new(Mutex::new(0));
        let changes = Arc::new(Mutex::new(0));

        {
            let in_pass = in_pass.clone();
            let overlaps = overlaps.clone();
            let changes = changes.clone();
            store.subscribe(move |_, _, _| {
                {
                    let mut flag = in_pass.lock();
                    if *flag {
                        *overlaps.lock() += 1;
                    }
                    *flag = true;
                }
                std::thread::yield_now();
                *changes.lock() += 1;
                *in_pass.lock() = false;
            });
        }

        let threads: Vec<_> = (0..4)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store.set(&format!("counter{t}"), json!(i));
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(*overlaps.lock(), 0);
        assert_eq!(*changes.lock(), 200);
        for t in 0..4 {
            assert_eq!(store.get(&format!("counter{t}")), Some(json!(49)));
        }
    }

    #[test]
    fn test_store_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StateStore>();
        assert_send_sync::<StoreHandle>();
        assert_send_sync::<Subscription>();
    }
}
