//! Route fragment handling.
//!
//! The dashboard navigates by URL fragment (`#trends`, `#crisis`, ...). The
//! router resolves a fragment to a [`Page`] and records it in the transient
//! `activePage` setting so other consumers can follow navigation.

use fuelwatch_core::{keys, Page, SettingsStore, StoreHandle};
use serde_json::Value;
use tracing::debug;

/// Page shown for an empty or unknown fragment.
pub const DEFAULT_PAGE: Page = Page::Trends;

/// Resolve a route fragment, with or without the leading `#`.
pub fn resolve_route(fragment: &str) -> Page {
    let name = fragment.trim();
    let name = name.strip_prefix('#').unwrap_or(name);
    name.parse().unwrap_or(DEFAULT_PAGE)
}

/// Writes navigation into the store.
#[derive(Debug, Clone)]
pub struct PageRouter {
    store: StoreHandle,
}

impl PageRouter {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    /// Navigate to the page named by `fragment` and return the page shown.
    pub fn navigate(&self, fragment: &str) -> Page {
        let page = resolve_route(fragment);
        if self.store.set(keys::ACTIVE_PAGE, Value::from(page.as_str())) {
            debug!(page = %page, "Navigated");
        }
        page
    }

    /// The page currently recorded in the store, if it is a known page.
    pub fn current(&self) -> Option<Page> {
        self.store.active_page()?.parse().ok()
    }
}
