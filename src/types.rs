use serde::{Deserialize, Serialize};

/// Bridge identifier as reported by the discovery directory
pub type BridgeId = String;

/// Light identifier, unique within one bridge
pub type LightId = String;

/// A bridge found by the discovery directory
///
/// The `id` is stable; the `address` may change between discoveries when the
/// bridge gets a new DHCP lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeDescriptor {
    pub id: BridgeId,
    pub address: String,
}

/// Capability class of a light
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LightType {
    Color,
    ColorTemperature,
    Dimmable,
    Unknown,
}

impl LightType {
    /// Classify the raw `type` string reported by the bridge
    ///
    /// Total over all input; anything unrecognized is `Unknown`.
    pub fn classify(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "extended color light" | "color light" => LightType::Color,
            "color temperature light" => LightType::ColorTemperature,
            "dimmable light" => LightType::Dimmable,
            _ => LightType::Unknown,
        }
    }

    /// Whether the light accepts hue and saturation
    pub fn supports_color(&self) -> bool {
        matches!(self, LightType::Color | LightType::Unknown)
    }
}

/// Same as [`LightType::classify`]
pub fn classify_type(raw: &str) -> LightType {
    LightType::classify(raw)
}

/// A controllable light known to a paired bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Light {
    pub id: LightId,
    pub name: String,
    pub light_type: LightType,
}

impl Light {
    /// Light with the given id, name and type
    pub fn new(id: impl Into<LightId>, name: impl Into<String>, light_type: LightType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            light_type,
        }
    }
}

/// 8-bit sRGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    fn channels(&self) -> (f32, f32, f32) {
        (
            self.r as f32 / 255.0,
            self.g as f32 / 255.0,
            self.b as f32 / 255.0,
        )
    }

    /// HSV saturation in `0.0..=1.0`
    pub fn saturation(&self) -> f32 {
        let (r, g, b) = self.channels();
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        if max <= 0.0 {
            0.0
        } else {
            (max - min) / max
        }
    }

    /// Convert to the bridge's hue/sat/bri scale
    pub fn to_hue(&self) -> HueColor {
        let (r, g, b) = self.channels();
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let delta = max - min;

        let mut degrees = if delta <= f32::EPSILON {
            0.0
        } else if max == r {
            60.0 * (((g - b) / delta) % 6.0)
        } else if max == g {
            60.0 * ((b - r) / delta + 2.0)
        } else {
            60.0 * ((r - g) / delta + 4.0)
        };
        if degrees < 0.0 {
            degrees += 360.0;
        }

        HueColor {
            hue: ((degrees / 360.0) * 65535.0).round().clamp(0.0, 65535.0) as u16,
            saturation: (self.saturation() * 254.0).round().clamp(0.0, 254.0) as u8,
            brightness: (max * 254.0).round().clamp(1.0, 254.0) as u8,
        }
    }
}

/// Color on the bridge's scales: hue `0..=65535`, sat `0..=254`, bri `1..=254`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HueColor {
    pub hue: u16,
    pub saturation: u8,
    pub brightness: u8,
}

/// One palette entry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Swatch {
    pub color: Rgb,
    /// Visual prominence, higher is more prominent
    pub weight: f32,
}

/// Dominant colors of one image, most prominent first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Palette {
    swatches: Vec<Swatch>,
}

impl Palette {
    /// Palette with no colors (extraction failed or image was blank)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a palette from swatches already in prominence order
    pub fn from_swatches(swatches: Vec<Swatch>) -> Self {
        Self { swatches }
    }

    /// Colors in order of prominence
    pub fn swatches(&self) -> &[Swatch] {
        &self.swatches
    }

    /// Number of colors
    pub fn len(&self) -> usize {
        self.swatches.len()
    }

    /// Whether no color was found
    pub fn is_empty(&self) -> bool {
        self.swatches.is_empty()
    }

    /// The most prominent color
    pub fn dominant(&self) -> Option<Rgb> {
        self.swatches.first().map(|s| s.color)
    }
}

/// Body of `PUT /api/{token}/lights/{id}/state`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredState {
    pub on: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hue: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sat: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bri: Option<u8>,
    /// Fade duration in multiples of 100ms
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transitiontime: Option<u16>,
}

impl DesiredState {
    /// State showing `color` on a light of the given type
    ///
    /// Lights without color support only get on/brightness.
    pub fn for_color(color: Rgb, light_type: LightType, transition_time: Option<u16>) -> Self {
        let hue = color.to_hue();
        let (hue_value, sat) = if light_type.supports_color() {
            (Some(hue.hue), Some(hue.saturation))
        } else {
            (None, None)
        };

        Self {
            on: true,
            hue: hue_value,
            sat,
            bri: Some(hue.brightness),
            transitiontime: transition_time,
        }
    }

    /// Brightness-only update
    pub fn brightness(bri: u8) -> Self {
        Self {
            on: bri > 0,
            hue: None,
            sat: None,
            bri: Some(bri.clamp(1, 254)),
            transitiontime: None,
        }
    }
}

/// One state change addressed to one light
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightCommand {
    pub light_id: LightId,
    pub desired_state: DesiredState,
}
