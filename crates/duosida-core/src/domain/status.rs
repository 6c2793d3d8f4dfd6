//! Typed telemetry projected from a status response.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::codec::ProtocolError;

/// Charge-point connection state reported in telemetry field 17.
///
/// The codes 0–6 follow OCPP naming. Firmware may add codes, so every other
/// value maps to [`ConnectionState::Unknown`] instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Available,
    Preparing,
    Charging,
    Cooling,
    SuspendedEV,
    Finished,
    Holiday,
    Unknown(u64),
}

impl ConnectionState {
    /// Total mapping from the wire code.
    pub fn from_code(code: u64) -> Self {
        match code {
            0 => ConnectionState::Available,
            1 => ConnectionState::Preparing,
            2 => ConnectionState::Charging,
            3 => ConnectionState::Cooling,
            4 => ConnectionState::SuspendedEV,
            5 => ConnectionState::Finished,
            6 => ConnectionState::Holiday,
            other => ConnectionState::Unknown(other),
        }
    }

    pub fn code(self) -> u64 {
        match self {
            ConnectionState::Available => 0,
            ConnectionState::Preparing => 1,
            ConnectionState::Charging => 2,
            ConnectionState::Cooling => 3,
            ConnectionState::SuspendedEV => 4,
            ConnectionState::Finished => 5,
            ConnectionState::Holiday => 6,
            ConnectionState::Unknown(code) => code,
        }
    }

    pub fn is_known(self) -> bool {
        !matches!(self, ConnectionState::Unknown(_))
    }
}

/// Strict conversion for callers that want an error on unrecognised codes.
impl TryFrom<u64> for ConnectionState {
    type Error = ProtocolError;

    fn try_from(code: u64) -> Result<Self, ProtocolError> {
        match ConnectionState::from_code(code) {
            ConnectionState::Unknown(code) => Err(ProtocolError::UnknownState(code)),
            known => Ok(known),
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Available => f.write_str("Available"),
            ConnectionState::Preparing => f.write_str("Preparing"),
            ConnectionState::Charging => f.write_str("Charging"),
            ConnectionState::Cooling => f.write_str("Cooling"),
            ConnectionState::SuspendedEV => f.write_str("SuspendedEV"),
            ConnectionState::Finished => f.write_str("Finished"),
            ConnectionState::Holiday => f.write_str("Holiday"),
            ConnectionState::Unknown(code) => write!(f, "Unknown ({code})"),
        }
    }
}

/// One telemetry reading.
///
/// Built fresh from every status response; nothing here is cached between
/// reads. `power` is always `voltage * current` of the same reading.
///
/// Only `voltage` is guaranteed to come off the wire. The firmware omits
/// zero-valued fields, so every other numeric field reads 0 when absent and
/// a 0 here may be a default rather than a measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargerStatus {
    pub connection_state: ConnectionState,
    /// Volts, line 1.
    pub voltage: f64,
    /// Amperes, line 1.
    pub current: f64,
    /// Watts.
    pub power: f64,
    /// Degrees Celsius at the station sensor.
    pub temperature_station: f64,
    /// Degrees Celsius inside the enclosure.
    pub temperature_internal: f64,
    pub session_energy_kwh: f64,
    pub today_consumption_kwh: f64,
    /// Unix seconds of the reading, 0 when the firmware omits it.
    pub timestamp: u64,
    pub device_id: String,
    pub model: String,
    pub manufacturer: String,
    pub firmware: String,
}

/// Instantaneous power derived from a voltage/current pair.
pub fn derived_power(voltage: f64, current: f64) -> f64 {
    voltage * current
}

impl fmt::Display for ChargerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Charger Status:")?;
        writeln!(f, "  Device ID: {}", self.device_id)?;
        writeln!(f, "  Status: {}", self.connection_state)?;
        if !self.manufacturer.is_empty() {
            writeln!(f, "  Manufacturer: {}", self.manufacturer)?;
        }
        if !self.model.is_empty() {
            writeln!(f, "  Model: {}", self.model)?;
        }
        if !self.firmware.is_empty() {
            writeln!(f, "  Firmware: {}", self.firmware)?;
        }

        writeln!(f)?;
        writeln!(f, "  ELECTRICAL:")?;
        writeln!(f, "    Voltage (L1): {:.1}V", self.voltage)?;
        writeln!(f, "    Current (L1): {:.2}A", self.current)?;
        writeln!(f, "    Power: {:.1}W", self.power)?;

        writeln!(f)?;
        writeln!(f, "  TEMPERATURE:")?;
        write!(f, "    Station: {:.1}°C", self.temperature_station)?;
        if self.temperature_internal > 0.01 {
            write!(f, "\n    Internal: {:.1}°C", self.temperature_internal)?;
        }

        if self.today_consumption_kwh > 0.01 || self.session_energy_kwh > 0.01 {
            write!(f, "\n\n  ENERGY:")?;
            if self.today_consumption_kwh > 0.01 {
                write!(
                    f,
                    "\n    Today's Consumption: {:.2} kWh",
                    self.today_consumption_kwh
                )?;
            }
            if self.session_energy_kwh > 0.01 {
                write!(f, "\n    Session Energy: {:.2} kWh", self.session_energy_kwh)?;
            }
            if self.timestamp > 0 {
                write!(f, "\n    Reading Time: {} (unix)", self.timestamp)?;
            }
        }
        Ok(())
    }
}
