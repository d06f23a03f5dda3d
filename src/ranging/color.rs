//! Distance to colour mapping.
//!
//! Near readings are red, far readings sweep through the hue wheel to violet.
//! The sweep stops at 300° so the far end never wraps back to red.

use crate::sensors::Distance;
use serde::{Deserialize, Serialize};

/// Readings at or below this are shown in the hottest colour.
pub const NEAR_FLOOR_MM: u16 = 50;

const HUE_SPAN: f32 = 300.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const RED: Rgb = Rgb::new(255, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Standard HSV conversion; `hue` in degrees, `saturation` and `value` in 0..=1.
    pub fn from_hsv(hue: f32, saturation: f32, value: f32) -> Self {
        if saturation <= 0.0 {
            let v = (value * 255.0) as u8;
            return Self::new(v, v, v);
        }
        let h = hue.rem_euclid(360.0) / 60.0;
        let sector = h.floor();
        let f = h - sector;
        let p = value * (1.0 - saturation);
        let q = value * (1.0 - saturation * f);
        let t = value * (1.0 - saturation * (1.0 - f));
        let (r, g, b) = match sector as u8 {
            0 => (value, t, p),
            1 => (q, value, p),
            2 => (p, value, t),
            3 => (p, q, value),
            4 => (t, p, value),
            _ => (value, p, q),
        };
        Self::new((r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8)
    }
}

/// What to show for a reading at or beyond the variant's maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverRange {
    /// Show it as if it were exactly at the maximum
    #[default]
    Fold,
    /// Turn the pixel off
    Suppress,
}

/// Colour for one reading against a sensor whose usable range ends at `max_mm`.
pub fn color_for_distance(distance: Distance, max_mm: u16, over_range: OverRange) -> Rgb {
    let Some(mm) = distance.millimeters() else {
        return Rgb::BLACK;
    };
    let mm = if mm >= max_mm {
        match over_range {
            OverRange::Fold => max_mm,
            OverRange::Suppress => return Rgb::BLACK,
        }
    } else {
        mm
    };
    if mm <= NEAR_FLOOR_MM {
        return Rgb::RED;
    }
    let ratio = f32::from(mm) / f32::from(max_mm);
    Rgb::from_hsv(ratio * HUE_SPAN, 1.0, 1.0)
}
