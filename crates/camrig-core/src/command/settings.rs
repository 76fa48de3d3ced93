// ── Camera settings ──
//
// Single-field setters with their documented ranges, the crop region,
// and the full settings document sent in one bulk command.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use tracing::warn;

use crate::error::CoreError;

/// JSON object carried by `SET_ALL_SETTINGS_`.
pub type SettingsMap = serde_json::Map<String, serde_json::Value>;

pub const SENSOR_WIDTH: u32 = 4056;
pub const SENSOR_HEIGHT: u32 = 3040;

const VALID_ROTATIONS: [i64; 4] = [0, 90, 180, 270];

// ── Single-field settings ────────────────────────────────────────

/// Fields settable with `SET_CAMERA_<FIELD>_<VALUE>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum SettingField {
    Brightness,
    Contrast,
    Saturation,
    Iso,
    Quality,
    FlipHorizontal,
    FlipVertical,
    Rotation,
    Grayscale,
}

impl SettingField {
    /// Accepted numeric range, `None` for boolean fields and rotation.
    pub fn range(self) -> Option<RangeInclusive<i64>> {
        match self {
            Self::Brightness => Some(-50..=50),
            Self::Contrast | Self::Saturation => Some(0..=100),
            Self::Iso => Some(100..=6400),
            Self::Quality => Some(20..=100),
            Self::FlipHorizontal | Self::FlipVertical | Self::Rotation | Self::Grayscale => None,
        }
    }

    pub fn is_flag(self) -> bool {
        matches!(
            self,
            Self::FlipHorizontal | Self::FlipVertical | Self::Grayscale
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingValue {
    Int(i64),
    Flag(bool),
}

impl std::fmt::Display for SettingValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Flag(true) => f.write_str("TRUE"),
            Self::Flag(false) => f.write_str("FALSE"),
        }
    }
}

/// A validated single-field setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSetting {
    field: SettingField,
    value: SettingValue,
}

impl FieldSetting {
    /// Validate the value type and bring it into the field's range.
    ///
    /// Out-of-range numbers are clamped; an unsupported rotation becomes
    /// 0. Both are logged. A flag given for a numeric field (or the
    /// reverse) is rejected.
    pub fn new(field: SettingField, value: SettingValue) -> Result<Self, CoreError> {
        let value = match (field.is_flag(), value) {
            (true, SettingValue::Flag(_)) => value,
            (false, SettingValue::Int(v)) if field == SettingField::Rotation => {
                if VALID_ROTATIONS.contains(&v) {
                    value
                } else {
                    warn!(degrees = v, "unsupported rotation, using 0");
                    SettingValue::Int(0)
                }
            }
            (false, SettingValue::Int(v)) => {
                let range = field.range().unwrap_or(i64::MIN..=i64::MAX);
                let clamped = v.clamp(*range.start(), *range.end());
                if clamped != v {
                    warn!(%field, requested = v, applied = clamped, "setting clamped to range");
                }
                SettingValue::Int(clamped)
            }
            (true, SettingValue::Int(_)) | (false, SettingValue::Flag(_)) => {
                return Err(CoreError::ValidationFailed {
                    message: format!("{field} does not accept {value}"),
                });
            }
        };
        Ok(Self { field, value })
    }

    pub fn field(&self) -> SettingField {
        self.field
    }

    pub fn value(&self) -> SettingValue {
        self.value
    }

    pub fn encode(&self) -> String {
        format!("SET_CAMERA_{}_{}", self.field, self.value)
    }

    /// Parse a textual value for this field (`true`/`on`/`1` for flags).
    pub fn parse(field: SettingField, raw: &str) -> Result<Self, CoreError> {
        let value = if field.is_flag() {
            match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "on" | "yes" | "1" => SettingValue::Flag(true),
                "false" | "off" | "no" | "0" => SettingValue::Flag(false),
                _ => {
                    return Err(CoreError::ValidationFailed {
                        message: format!("'{raw}' is not a boolean for {field}"),
                    });
                }
            }
        } else {
            let v = raw.trim().parse().map_err(|_| CoreError::ValidationFailed {
                message: format!("'{raw}' is not an integer for {field}"),
            })?;
            SettingValue::Int(v)
        };
        Self::new(field, value)
    }
}

// ── Crop ─────────────────────────────────────────────────────────

/// Sensor-space crop rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRegion {
    pub const FULL: Self = Self {
        x: 0,
        y: 0,
        width: SENSOR_WIDTH,
        height: SENSOR_HEIGHT,
    };

    /// Clamp the rectangle so it lies inside the sensor and is at least
    /// one pixel in each dimension.
    pub fn clamped(self) -> Self {
        let x = self.x.min(SENSOR_WIDTH - 1);
        let y = self.y.min(SENSOR_HEIGHT - 1);
        let width = self.width.clamp(1, SENSOR_WIDTH - x);
        let height = self.height.clamp(1, SENSOR_HEIGHT - y);
        let clamped = Self {
            x,
            y,
            width,
            height,
        };
        if clamped != self {
            warn!(requested = ?self, applied = ?clamped, "crop region clamped to sensor");
        }
        clamped
    }

    pub fn is_full_frame(&self) -> bool {
        *self == Self::FULL
    }

    /// The bulk-settings fragment enabling this crop.
    pub fn to_settings(self) -> SettingsMap {
        let mut map = SettingsMap::new();
        map.insert("crop_enabled".into(), (!self.is_full_frame()).into());
        map.insert("crop_x".into(), self.x.into());
        map.insert("crop_y".into(), self.y.into());
        map.insert("crop_width".into(), self.width.into());
        map.insert("crop_height".into(), self.height.into());
        map
    }
}

// ── Full settings document ───────────────────────────────────────

/// Every setting a camera understands, with the fleet defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    // Exposure
    pub brightness: i32,
    pub contrast: u32,
    pub exp_compensation: i32,
    pub iso_auto: bool,
    pub iso: u32,
    pub shutter_auto: bool,
    pub shutter_us: u32,
    pub agc_enabled: bool,

    // Color
    pub saturation: u32,
    pub wb_mode: String,
    pub color_temp: u32,
    pub manual_gains: bool,
    pub red_gain: f64,
    pub blue_gain: f64,
    pub grayscale: bool,

    // Processing
    pub sharpness: u32,
    pub denoise_mode: String,
    pub lens_shading: bool,
    pub hdr_enabled: bool,

    // Zoom and crop
    pub zoom_enabled: bool,
    pub zoom_level: u32,
    pub crop_enabled: bool,
    pub crop_x: u32,
    pub crop_y: u32,
    pub crop_width: u32,
    pub crop_height: u32,

    // Capture
    pub jpeg_quality: u32,
    pub raw_enabled: bool,
    pub exif_enabled: bool,
    pub timestamp_filename: bool,

    // Advanced
    pub fps: u32,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    pub rotation: u32,
    pub test_pattern: bool,
    pub sensor_mode: String,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            brightness: 0,
            contrast: 50,
            exp_compensation: 0,
            iso_auto: true,
            iso: 400,
            shutter_auto: true,
            shutter_us: 10_000,
            agc_enabled: true,

            saturation: 50,
            wb_mode: "Auto".into(),
            color_temp: 5500,
            manual_gains: false,
            red_gain: 1.5,
            blue_gain: 1.2,
            grayscale: false,

            sharpness: 50,
            denoise_mode: "Fast".into(),
            lens_shading: true,
            hdr_enabled: false,

            zoom_enabled: false,
            zoom_level: 100,
            crop_enabled: false,
            crop_x: 0,
            crop_y: 0,
            crop_width: SENSOR_WIDTH,
            crop_height: SENSOR_HEIGHT,

            jpeg_quality: 95,
            raw_enabled: false,
            exif_enabled: true,
            timestamp_filename: true,

            fps: 30,
            flip_horizontal: false,
            flip_vertical: false,
            rotation: 0,
            test_pattern: false,
            sensor_mode: "Auto".into(),
        }
    }
}

impl CameraSettings {
    pub fn to_map(&self) -> Result<SettingsMap, CoreError> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(CoreError::ValidationFailed {
                message: format!("settings serialized to {other} instead of an object"),
            }),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn encode(field: SettingField, value: SettingValue) -> String {
        FieldSetting::new(field, value).unwrap().encode()
    }

    #[test]
    fn numeric_fields_are_clamped() {
        assert_eq!(
            encode(SettingField::Brightness, SettingValue::Int(-80)),
            "SET_CAMERA_BRIGHTNESS_-50"
        );
        assert_eq!(
            encode(SettingField::Quality, SettingValue::Int(5)),
            "SET_CAMERA_QUALITY_20"
        );
        assert_eq!(
            encode(SettingField::Iso, SettingValue::Int(12_800)),
            "SET_CAMERA_ISO_6400"
        );
        assert_eq!(
            encode(SettingField::Contrast, SettingValue::Int(75)),
            "SET_CAMERA_CONTRAST_75"
        );
    }

    #[test]
    fn flags_encode_upper_case() {
        assert_eq!(
            encode(SettingField::FlipHorizontal, SettingValue::Flag(true)),
            "SET_CAMERA_FLIP_HORIZONTAL_TRUE"
        );
        assert_eq!(
            encode(SettingField::Grayscale, SettingValue::Flag(false)),
            "SET_CAMERA_GRAYSCALE_FALSE"
        );
    }

    #[test]
    fn rotation_outside_quarter_turns_becomes_zero() {
        assert_eq!(
            encode(SettingField::Rotation, SettingValue::Int(180)),
            "SET_CAMERA_ROTATION_180"
        );
        assert_eq!(
            encode(SettingField::Rotation, SettingValue::Int(45)),
            "SET_CAMERA_ROTATION_0"
        );
    }

    #[test]
    fn mismatched_value_types_are_rejected() {
        assert!(FieldSetting::new(SettingField::Iso, SettingValue::Flag(true)).is_err());
        assert!(FieldSetting::new(SettingField::FlipVertical, SettingValue::Int(1)).is_err());
    }

    #[test]
    fn parse_from_text() {
        let s = FieldSetting::parse("flip_vertical".parse().unwrap(), "on").unwrap();
        assert_eq!(s.value(), SettingValue::Flag(true));
        let s = FieldSetting::parse(SettingField::Saturation, "250").unwrap();
        assert_eq!(s.value(), SettingValue::Int(100));
        assert!(FieldSetting::parse(SettingField::Saturation, "lots").is_err());
    }

    #[test]
    fn crop_stays_inside_sensor() {
        let crop = CropRegion {
            x: 4000,
            y: 0,
            width: 500,
            height: 0,
        }
        .clamped();
        assert_eq!(crop.x, 4000);
        assert_eq!(crop.width, 56);
        assert_eq!(crop.height, 1);

        let map = CropRegion::FULL.to_settings();
        assert_eq!(map["crop_enabled"], false);
        assert_eq!(map["crop_width"], 4056);
    }

    #[test]
    fn defaults_serialize_to_a_flat_object() {
        let map = CameraSettings::default().to_map().unwrap();
        assert_eq!(map["jpeg_quality"], 95);
        assert_eq!(map["wb_mode"], "Auto");
        assert_eq!(map["crop_height"], 3040);
        assert!(map.contains_key("sensor_mode"));
    }
}
