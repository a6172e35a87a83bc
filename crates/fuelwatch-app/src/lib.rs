//! # fuelwatch-app
//!
//! Application root for the fuel-price dashboard and the consumers that react
//! to settings changes.
//!
//! The [`Dashboard`] owns the one [`StateStore`] of the session and hands
//! [`StoreHandle`]s to everything else:
//! - [`PageRouter`] maps route fragments to the `activePage` setting
//! - [`ThemeConsumer`] keeps the colour palette in step with `colorMode`
//! - `ChangeFeed` (feature `tokio-runtime`) forwards changes to async tasks

pub mod dashboard;
#[cfg(feature = "tokio-runtime")]
pub mod feed;
pub mod palette;
pub mod router;

pub use dashboard::Dashboard;
#[cfg(feature = "tokio-runtime")]
pub use feed::{ChangeFeed, KeyFilter, SettingChange};
pub use palette::{Palette, ThemeConsumer};
pub use router::{resolve_route, PageRouter, DEFAULT_PAGE};

pub use fuelwatch_core::{SettingsStore, StateStore, StoreHandle};
