//! Writable charger settings and their safe ranges.
//!
//! The charger performs no input validation of its own, so every value is
//! checked here before a command is encoded.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::protocol::codec::ProtocolError;

/// Amperes.
pub const MAX_CURRENT_RANGE: RangeInclusive<u32> = 6..=32;
/// Seconds before an idle connection is dropped.
pub const IDLE_TIMEOUT_RANGE: RangeInclusive<u32> = 30..=900;
/// Degrees Celsius.
pub const MAX_TEMPERATURE_RANGE: RangeInclusive<u32> = 85..=95;
/// Volts.
pub const MAX_VOLTAGE_RANGE: RangeInclusive<u32> = 265..=290;
/// Volts.
pub const MIN_VOLTAGE_RANGE: RangeInclusive<u32> = 70..=110;

/// Front-panel LED intensity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum LedBrightness {
    Off = 0,
    Low = 1,
    Medium = 2,
    High = 3,
}

impl TryFrom<u32> for LedBrightness {
    type Error = ProtocolError;

    fn try_from(value: u32) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(LedBrightness::Off),
            1 => Ok(LedBrightness::Low),
            2 => Ok(LedBrightness::Medium),
            3 => Ok(LedBrightness::High),
            other => Err(ProtocolError::InvalidParameter {
                name: "LED brightness",
                value: i64::from(other),
                min: 0,
                max: 3,
            }),
        }
    }
}

impl FromStr for LedBrightness {
    type Err = ProtocolError;

    /// Accepts `off|low|medium|high` (any case) or the numeric level 0–3.
    fn from_str(s: &str) -> Result<Self, ProtocolError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(LedBrightness::Off),
            "low" => Ok(LedBrightness::Low),
            "medium" => Ok(LedBrightness::Medium),
            "high" => Ok(LedBrightness::High),
            other => other
                .parse::<u32>()
                .map_err(|_| ProtocolError::InvalidParameter {
                    name: "LED brightness",
                    value: -1,
                    min: 0,
                    max: 3,
                })
                .and_then(LedBrightness::try_from),
        }
    }
}

impl fmt::Display for LedBrightness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LedBrightness::Off => "off",
            LedBrightness::Low => "low",
            LedBrightness::Medium => "medium",
            LedBrightness::High => "high",
        };
        f.write_str(name)
    }
}

/// A single configuration write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargerSetting {
    MaxCurrent(u32),
    IdleTimeout(u32),
    MaxTemperature(u32),
    MaxVoltage(u32),
    MinVoltage(u32),
    LedBrightness(LedBrightness),
    DirectMode(bool),
}

impl ChargerSetting {
    /// Human-readable name used in errors and logs.
    pub fn name(&self) -> &'static str {
        match self {
            ChargerSetting::MaxCurrent(_) => "max current",
            ChargerSetting::IdleTimeout(_) => "idle timeout",
            ChargerSetting::MaxTemperature(_) => "max temperature",
            ChargerSetting::MaxVoltage(_) => "max voltage",
            ChargerSetting::MinVoltage(_) => "min voltage",
            ChargerSetting::LedBrightness(_) => "LED brightness",
            ChargerSetting::DirectMode(_) => "direct mode",
        }
    }

    /// Key the charger firmware expects in command field 1.
    pub fn vendor_key(&self) -> &'static str {
        match self {
            ChargerSetting::MaxCurrent(_) => "VendorMaxWorkCurrent",
            ChargerSetting::IdleTimeout(_) => "VendorConnectionTimeOut",
            ChargerSetting::MaxTemperature(_) => "VendorMaxTemperature",
            ChargerSetting::MaxVoltage(_) => "VendorMaxVoltage",
            ChargerSetting::MinVoltage(_) => "VendorMinVoltage",
            ChargerSetting::LedBrightness(_) => "VendorLEDStrength",
            ChargerSetting::DirectMode(_) => "VendorDirectWorkMode",
        }
    }

    /// Inclusive range for numeric settings; `None` for enum and boolean ones.
    pub fn range(&self) -> Option<RangeInclusive<u32>> {
        match self {
            ChargerSetting::MaxCurrent(_) => Some(MAX_CURRENT_RANGE),
            ChargerSetting::IdleTimeout(_) => Some(IDLE_TIMEOUT_RANGE),
            ChargerSetting::MaxTemperature(_) => Some(MAX_TEMPERATURE_RANGE),
            ChargerSetting::MaxVoltage(_) => Some(MAX_VOLTAGE_RANGE),
            ChargerSetting::MinVoltage(_) => Some(MIN_VOLTAGE_RANGE),
            ChargerSetting::LedBrightness(_) | ChargerSetting::DirectMode(_) => None,
        }
    }

    fn numeric_value(&self) -> Option<u32> {
        match *self {
            ChargerSetting::MaxCurrent(v)
            | ChargerSetting::IdleTimeout(v)
            | ChargerSetting::MaxTemperature(v)
            | ChargerSetting::MaxVoltage(v)
            | ChargerSetting::MinVoltage(v) => Some(v),
            ChargerSetting::LedBrightness(_) | ChargerSetting::DirectMode(_) => None,
        }
    }

    /// Checks the value against its range.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::InvalidParameter`] when a numeric value is out of range.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if let (Some(range), Some(value)) = (self.range(), self.numeric_value()) {
            if !range.contains(&value) {
                return Err(ProtocolError::InvalidParameter {
                    name: self.name(),
                    value: i64::from(value),
                    min: i64::from(*range.start()),
                    max: i64::from(*range.end()),
                });
            }
        }
        Ok(())
    }

    /// Decimal string the firmware expects in command field 2.
    pub fn wire_value(&self) -> String {
        match *self {
            ChargerSetting::LedBrightness(level) => (level as u8).to_string(),
            ChargerSetting::DirectMode(on) => u8::from(on).to_string(),
            _ => self.numeric_value().unwrap_or_default().to_string(),
        }
    }
}

impl fmt::Display for ChargerSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChargerSetting::MaxCurrent(v) => write!(f, "max current {v}A"),
            ChargerSetting::IdleTimeout(v) => write!(f, "idle timeout {v}s"),
            ChargerSetting::MaxTemperature(v) => write!(f, "max temperature {v}°C"),
            ChargerSetting::MaxVoltage(v) => write!(f, "max voltage {v}V"),
            ChargerSetting::MinVoltage(v) => write!(f, "min voltage {v}V"),
            ChargerSetting::LedBrightness(level) => write!(f, "LED brightness {level}"),
            ChargerSetting::DirectMode(on) => {
                write!(f, "direct mode {}", if *on { "on" } else { "off" })
            }
        }
    }
}
