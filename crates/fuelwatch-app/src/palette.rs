//! Colour palettes and the consumer that tracks `colorMode`.

use fuelwatch_core::{keys, ColorMode, FuelType, SettingsStore, StoreHandle, Subscription};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Colours used by charts and maps for one colour mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub mode: ColorMode,
    /// Low, middle and high stops of the price scale.
    pub price_scale: [&'static str; 3],
}

impl Palette {
    pub fn for_mode(mode: ColorMode) -> Self {
        let price_scale = match mode {
            ColorMode::Standard => ["#2c752f", "#ecb100", "#b13230"],
            ColorMode::Accessible => ["#0072B2", "#E69F00", "#B24A7A"],
        };
        Self { mode, price_scale }
    }

    /// Series colour for a fuel grade.
    pub fn fuel_color(&self, fuel: FuelType) -> &'static str {
        match fuel {
            FuelType::E10 => "#059669",
            FuelType::E5 => "#10b981",
            FuelType::Diesel => "#4b5563",
        }
    }

    /// Map colour for a price at relative position `t` within the visible
    /// range (0 = cheapest, 1 = most expensive), as a CSS `hsl()` string.
    ///
    /// `t` is clamped to `[0, 1]`; non-finite input maps to the low end.
    pub fn price_color(&self, t: f64) -> String {
        let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };

        match self.mode {
            ColorMode::Standard => {
                let hue = (1.0 - t) * 120.0;
                format!("hsl({hue:.0}, 85%, 45%)")
            }
            // Blue through pale yellow to red
            ColorMode::Accessible if t < 0.5 => {
                let local = t * 2.0;
                format!(
                    "hsl({:.0}, {:.0}%, {:.0}%)",
                    240.0 - local * 180.0,
                    70.0 + local * 20.0,
                    50.0 + local * 40.0
                )
            }
            ColorMode::Accessible => {
                let local = (t - 0.5) * 2.0;
                format!(
                    "hsl({:.0}, {:.0}%, {:.0}%)",
                    60.0 - local * 60.0,
                    90.0 + local * 10.0,
                    90.0 - local * 40.0
                )
            }
        }
    }
}

/// Keeps a [`Palette`] in step with the `colorMode` setting.
#[derive(Debug)]
pub struct ThemeConsumer {
    palette: Arc<RwLock<Palette>>,
    subscription: Option<Subscription>,
}

impl ThemeConsumer {
    /// Read the current mode and subscribe to changes.
    ///
    /// If the store is already gone the consumer keeps the default palette.
    pub fn attach(store: &StoreHandle) -> Self {
        let palette = Arc::new(RwLock::new(Palette::for_mode(store.color_mode())));

        let target = palette.clone();
        let subscription = store.subscribe(move |_, key, value| {
            if key != keys::COLOR_MODE {
                return;
            }
            let mode = value
                .as_str()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default();
            *target.write() = Palette::for_mode(mode);
            debug!(mode = %mode, "Palette switched");
        });

        Self {
            palette,
            subscription,
        }
    }

    pub fn palette(&self) -> Palette {
        *self.palette.read()
    }

    /// Stop following the store. The last palette is kept.
    pub fn detach(&self) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(Subscription::unsubscribe)
    }
}
