//! Dashboard setting model.
//!
//! Settings are stored as JSON values keyed by name. This module defines:
//! - The well-known setting keys and which of them are persisted
//! - Typed views of the enumerated settings (fuel type, colour mode, page)
//! - Hardcoded defaults and validation of persisted values

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Full store state: setting name to current value.
pub type StateMap = BTreeMap<String, Value>;

/// Storage key under which the persisted snapshot is written.
pub const DEFAULT_STORAGE_KEY: &str = "fuelApp_settings";

/// Well-known setting names.
pub mod keys {
    pub const FUEL_TYPE: &str = "fuelType";
    pub const YEAR: &str = "year";
    pub const MONTH: &str = "month";
    pub const ACTIVE_PAGE: &str = "activePage";
    pub const COLOR_MODE: &str = "colorMode";
}

/// Settings written to backing storage. `activePage` is deliberately absent.
pub const PERSISTED_KEYS: [&str; 4] = [
    keys::FUEL_TYPE,
    keys::YEAR,
    keys::MONTH,
    keys::COLOR_MODE,
];

/// Errors raised when parsing a typed setting from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("Unknown fuel type: {0}")]
    UnknownFuelType(String),

    #[error("Unknown color mode: {0}")]
    UnknownColorMode(String),

    #[error("Unknown page: {0}")]
    UnknownPage(String),
}

/// Fuel grades tracked by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FuelType {
    /// Super E5
    E5,
    /// Super E10
    #[default]
    E10,
    Diesel,
}

impl FuelType {
    pub const ALL: [FuelType; 3] = [FuelType::E5, FuelType::E10, FuelType::Diesel];

    /// The fuel code as stored in settings and used by the price API.
    pub fn as_str(&self) -> &'static str {
        match self {
            FuelType::E5 => "e5",
            FuelType::E10 => "e10",
            FuelType::Diesel => "diesel",
        }
    }

    /// Display label shown in fuel selectors.
    pub fn label(&self) -> &'static str {
        match self {
            FuelType::E5 => "Super E5",
            FuelType::E10 => "Super E10",
            FuelType::Diesel => "Diesel",
        }
    }
}

impl fmt::Display for FuelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FuelType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FuelType::ALL
            .into_iter()
            .find(|fuel| fuel.as_str() == s)
            .ok_or_else(|| ModelError::UnknownFuelType(s.to_string()))
    }
}

/// Colour scheme used by charts and maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    /// Green-to-red scales
    #[default]
    #[serde(rename = "default")]
    Standard,
    /// Colour-blind safe scales
    Accessible,
}

impl ColorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColorMode::Standard => "default",
            ColorMode::Accessible => "accessible",
        }
    }
}

impl fmt::Display for ColorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColorMode {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(ColorMode::Standard),
            "accessible" => Ok(ColorMode::Accessible),
            other => Err(ModelError::UnknownColorMode(other.to_string())),
        }
    }
}

/// Dashboard pages addressable by route fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Page {
    Overview,
    Trends,
    Crisis,
    Regional,
    MarketPhases,
    Ukraine,
}

impl Page {
    pub const ALL: [Page; 6] = [
        Page::Overview,
        Page::Trends,
        Page::Crisis,
        Page::Regional,
        Page::MarketPhases,
        Page::Ukraine,
    ];

    /// Route fragment for this page (without the leading `#`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Page::Overview => "overview",
            Page::Trends => "trends",
            Page::Crisis => "crisis",
            Page::Regional => "regional",
            Page::MarketPhases => "market-phases",
            Page::Ukraine => "ukraine",
        }
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Page {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Page::ALL
            .into_iter()
            .find(|page| page.as_str() == s)
            .ok_or_else(|| ModelError::UnknownPage(s.to_string()))
    }
}

/// The current calendar year in local time.
pub fn current_year() -> i32 {
    chrono::Local::now().year()
}

/// Hardcoded defaults for every well-known setting.
///
/// Year and month are numeric strings, matching what the dashboard's
/// selectors produce.
pub fn default_entries(year: i32) -> StateMap {
    let mut entries = StateMap::new();
    entries.insert(
        keys::FUEL_TYPE.to_string(),
        Value::from(FuelType::default().as_str()),
    );
    entries.insert(keys::YEAR.to_string(), Value::from(year.to_string()));
    entries.insert(keys::MONTH.to_string(), Value::from("1"));
    entries.insert(
        keys::ACTIVE_PAGE.to_string(),
        Value::from(Page::Overview.as_str()),
    );
    entries.insert(
        keys::COLOR_MODE.to_string(),
        Value::from(ColorMode::default().as_str()),
    );
    entries
}

/// Parse a year setting ("2024").
pub fn parse_year(value: &Value) -> Option<i32> {
    let text = value.as_str()?;
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

/// Parse a month setting ("1" to "12").
pub fn parse_month(value: &Value) -> Option<u32> {
    let month: u32 = value.as_str()?.parse().ok()?;
    (1..=12).contains(&month).then_some(month)
}

/// Check whether a value is acceptable for the given setting.
///
/// Keys without a known shape accept any value.
pub fn is_valid_value(key: &str, value: &Value) -> bool {
    match key {
        keys::FUEL_TYPE => value.as_str().is_some_and(|s| s.parse::<FuelType>().is_ok()),
        keys::COLOR_MODE => value.as_str().is_some_and(|s| s.parse::<ColorMode>().is_ok()),
        keys::YEAR => parse_year(value).is_some(),
        keys::MONTH => parse_month(value).is_some(),
        keys::ACTIVE_PAGE => value.is_string(),
        _ => true,
    }
}
