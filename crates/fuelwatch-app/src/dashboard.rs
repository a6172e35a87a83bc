//! Dashboard application root.
//!
//! The dashboard owns the settings store for the lifetime of the session and
//! wires up the built-in consumers. Page controllers and chart components get
//! a [`StoreHandle`] through [`Dashboard::handle`] instead of reaching for a
//! global.

use std::sync::Arc;

use fuelwatch_core::{SettingsStorage, SettingsStore, StateStore, StoreConfig, StoreHandle};
use tracing::info;

use crate::palette::ThemeConsumer;
use crate::router::PageRouter;

#[cfg(feature = "tokio-runtime")]
use crate::feed::{ChangeFeed, KeyFilter};

/// The application root.
#[derive(Debug)]
pub struct Dashboard {
    store: StateStore,
    router: PageRouter,
    theme: ThemeConsumer,
}

impl Dashboard {
    /// Start a session with the default store configuration.
    pub fn new(storage: Arc<dyn SettingsStorage>) -> Self {
        Self::with_config(storage, StoreConfig::default())
    }

    pub fn with_config(storage: Arc<dyn SettingsStorage>, config: StoreConfig) -> Self {
        let store = StateStore::open(storage, config);
        let router = PageRouter::new(store.handle());
        let theme = ThemeConsumer::attach(&store.handle());

        info!(
            fuel = %store.fuel_type(),
            color_mode = %store.color_mode(),
            year = ?store.year(),
            month = ?store.month(),
            "Dashboard session started"
        );

        Self {
            store,
            router,
            theme,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// A non-owning handle for a page or component.
    pub fn handle(&self) -> StoreHandle {
        self.store.handle()
    }

    pub fn router(&self) -> &PageRouter {
        &self.router
    }

    pub fn theme(&self) -> &ThemeConsumer {
        &self.theme
    }

    /// Forward changes to async consumers.
    #[cfg(feature = "tokio-runtime")]
    pub fn change_feed(&self, capacity: usize, filter: KeyFilter) -> ChangeFeed {
        ChangeFeed::new(&self.store, capacity, filter)
    }
}
