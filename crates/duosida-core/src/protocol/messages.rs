//! Charger message model: request builders and the telemetry projection.
//!
//! Requests after the handshake share one envelope:
//! ```text
//! { <payload fields>, 100: device_id, 101: sequence }
//! ```
//! Status responses carry telemetry at outer field 16 → inner field 10.
//! Only the field numbers below are interpreted; everything else the
//! firmware sends is left untouched in the field tree.

use crate::domain::setting::ChargerSetting;
use crate::domain::status::{derived_power, ChargerStatus, ConnectionState};
use crate::protocol::codec::{encode_message, find_field, FieldNode, ProtocolError};
use crate::protocol::sequence::SequenceCounter;

/// Outer (envelope-level) field numbers.
pub mod field {
    /// Login block inside the second handshake message.
    pub const LOGIN: u32 = 3;
    /// Device information sub-message (manufacturer, model, firmware).
    pub const DEVICE_INFO: u32 = 4;
    /// Write command sub-message.
    pub const COMMAND: u32 = 10;
    /// Vendor data sub-message carrying telemetry.
    pub const VENDOR_DATA: u32 = 16;
    /// Session-open block inside the first handshake message.
    pub const SESSION_OPEN: u32 = 52;
    pub const DEVICE_ID: u32 = 100;
    pub const SEQUENCE: u32 = 101;
}

/// Field numbers inside the vendor data sub-message (outer field 16).
pub mod vendor {
    pub const MESSAGE_TYPE: u32 = 2;
    pub const STATUS: u32 = 10;
    /// Alternate status slot used by some firmware revisions.
    pub const STATUS_ALT: u32 = 12;
}

/// Field numbers inside the telemetry sub-message.
pub mod telemetry {
    pub const VOLTAGE: u32 = 1;
    pub const CURRENT: u32 = 2;
    pub const TEMPERATURE_INTERNAL: u32 = 7;
    pub const TEMPERATURE_STATION: u32 = 8;
    pub const SESSION_ENERGY: u32 = 9;
    pub const CONNECTION_STATE: u32 = 17;
    pub const TIMESTAMP: u32 = 18;
    /// Watt-hours.
    pub const TODAY_CONSUMPTION: u32 = 20;
}

/// Field numbers inside the device information sub-message (outer field 4).
pub mod device_info {
    pub const MANUFACTURER: u32 = 1;
    pub const MODEL: u32 = 2;
    pub const FIRMWARE: u32 = 5;
}

/// Field numbers inside a write command (outer field 10).
pub mod command {
    pub const KEY: u32 = 1;
    pub const VALUE: u32 = 2;
}

/// Vendor message type that marks a status push.
pub const STATUS_MESSAGE_TYPE: &str = "DataVendorStatusReq";
/// Vendor message type of a keep-alive; never carries telemetry.
pub const CONTINUE_MESSAGE_TYPE: &str = "DataContinueReq";

const HANDSHAKE_PLATFORM: &str = "IOS";
const LOGIN_TOKEN: u64 = 3_526_800_158;
const LOGIN_SEQUENCE: u64 = 134_217_886;

// ── Request builders ──────────────────────────────────────────────────────────

/// Builds the two fixed handshake messages, in send order.
///
/// Only the device id varies; the remaining values are constants taken from
/// the vendor app's session opening. Handshake messages go out unframed.
pub fn build_handshake(device_id: &str) -> [Vec<u8>; 2] {
    let hello = encode_message(&[
        FieldNode::message(
            field::SESSION_OPEN,
            vec![FieldNode::varint(1, 0), FieldNode::varint(2, 0)],
        ),
        FieldNode::string(field::DEVICE_ID, HANDSHAKE_PLATFORM),
        FieldNode::varint(field::SEQUENCE, 0),
    ]);
    let login = encode_message(&[
        FieldNode::message(
            field::LOGIN,
            vec![
                FieldNode::varint(1, LOGIN_TOKEN),
                FieldNode::varint(2, 0),
                FieldNode::varint(3, 0),
            ],
        ),
        FieldNode::string(field::DEVICE_ID, device_id),
        FieldNode::varint(field::SEQUENCE, LOGIN_SEQUENCE),
    ]);
    [hello, login]
}

/// Builds the request that makes the charger push a status frame.
pub fn build_status_request(device_id: &str, sequence: u64) -> Vec<u8> {
    with_envelope(
        vec![FieldNode::message(
            field::VENDOR_DATA,
            vec![FieldNode::string(vendor::MESSAGE_TYPE, STATUS_MESSAGE_TYPE)],
        )],
        device_id,
        sequence,
    )
}

/// Builds the max-current write command.
///
/// # Errors
///
/// [`ProtocolError::InvalidParameter`] unless `6 <= amps <= 32`.
pub fn build_set_current(
    amps: u32,
    device_id: &str,
    sequence: u64,
) -> Result<Vec<u8>, ProtocolError> {
    build_set_config(ChargerSetting::MaxCurrent(amps), device_id, sequence)
}

/// Builds a write command for any [`ChargerSetting`].
///
/// # Errors
///
/// [`ProtocolError::InvalidParameter`] when the value is outside the
/// setting's range. Nothing is encoded in that case.
pub fn build_set_config(
    setting: ChargerSetting,
    device_id: &str,
    sequence: u64,
) -> Result<Vec<u8>, ProtocolError> {
    setting.validate()?;
    let value = setting.wire_value();
    Ok(with_envelope(
        vec![FieldNode::message(
            field::COMMAND,
            vec![
                FieldNode::string(command::KEY, setting.vendor_key()),
                FieldNode::string(command::VALUE, &value),
            ],
        )],
        device_id,
        sequence,
    ))
}

fn with_envelope(mut fields: Vec<FieldNode>, device_id: &str, sequence: u64) -> Vec<u8> {
    fields.push(FieldNode::string(field::DEVICE_ID, device_id));
    fields.push(FieldNode::varint(field::SEQUENCE, sequence));
    encode_message(&fields)
}

/// Produces every request for one charger, numbering them as it goes.
#[derive(Debug)]
pub struct RequestBuilder {
    device_id: String,
    sequence: SequenceCounter,
}

impl RequestBuilder {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            sequence: SequenceCounter::new(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn handshake(&self) -> [Vec<u8>; 2] {
        build_handshake(&self.device_id)
    }

    pub fn status_request(&self) -> Vec<u8> {
        build_status_request(&self.device_id, self.sequence.next())
    }

    /// Validates before consuming a sequence number.
    pub fn set_config(&self, setting: ChargerSetting) -> Result<Vec<u8>, ProtocolError> {
        setting.validate()?;
        build_set_config(setting, &self.device_id, self.sequence.next())
    }

    pub fn set_current(&self, amps: u32) -> Result<Vec<u8>, ProtocolError> {
        self.set_config(ChargerSetting::MaxCurrent(amps))
    }
}

// ── Response projection ───────────────────────────────────────────────────────

/// Locates the telemetry sub-message in a decoded response.
///
/// Returns `None` for frames that carry none: keep-alives, history pushes,
/// handshake acknowledgements.
pub fn find_telemetry(fields: &[FieldNode]) -> Option<&[FieldNode]> {
    let vendor_data = find_field(fields, field::VENDOR_DATA)?.as_message()?;
    if is_keepalive(vendor_data) {
        tracing::trace!("keep-alive frame carries no telemetry");
        return None;
    }
    find_field(vendor_data, vendor::STATUS)
        .or_else(|| find_field(vendor_data, vendor::STATUS_ALT))
        .and_then(FieldNode::as_message)
}

fn is_keepalive(vendor_data: &[FieldNode]) -> bool {
    find_field(vendor_data, vendor::MESSAGE_TYPE)
        .and_then(FieldNode::as_string)
        .is_some_and(|t| t == CONTINUE_MESSAGE_TYPE)
}

/// Projects a decoded status response onto [`ChargerStatus`].
///
/// Scalars the firmware leaves out are zero: it elides zero-valued fields on
/// the wire. Voltage is the exception, a powered charger always reports it,
/// so its absence means the frame is not a usable reading.
///
/// # Errors
///
/// - [`ProtocolError::IncompleteTelemetry`] if the telemetry sub-message or
///   its voltage field is missing.
/// - [`ProtocolError::MalformedMessage`] if a measurement uses a
///   length-delimited wire type.
pub fn parse_status(fields: &[FieldNode]) -> Result<ChargerStatus, ProtocolError> {
    let readings = find_telemetry(fields)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            ProtocolError::IncompleteTelemetry(
                "response carries no telemetry sub-message (field 16 → 10)".to_string(),
            )
        })?;

    let voltage = find_field(readings, telemetry::VOLTAGE)
        .ok_or_else(|| ProtocolError::IncompleteTelemetry("voltage (field 1) missing".to_string()))
        .and_then(numeric)?;
    let current = optional_number(readings, telemetry::CURRENT)?;
    let state_code = optional_integer(readings, telemetry::CONNECTION_STATE)?;

    let device_info = find_field(fields, field::DEVICE_INFO).and_then(FieldNode::as_message);
    let info_text = |number: u32| {
        device_info
            .and_then(|info| find_field(info, number))
            .and_then(FieldNode::as_string)
            .unwrap_or_default()
    };

    Ok(ChargerStatus {
        connection_state: ConnectionState::from_code(state_code),
        voltage,
        current,
        power: derived_power(voltage, current),
        temperature_station: optional_number(readings, telemetry::TEMPERATURE_STATION)?,
        temperature_internal: optional_number(readings, telemetry::TEMPERATURE_INTERNAL)?,
        session_energy_kwh: optional_number(readings, telemetry::SESSION_ENERGY)?,
        today_consumption_kwh: optional_number(readings, telemetry::TODAY_CONSUMPTION)? / 1000.0,
        timestamp: optional_integer(readings, telemetry::TIMESTAMP)?,
        device_id: find_field(fields, field::DEVICE_ID)
            .and_then(FieldNode::as_string)
            .unwrap_or_default(),
        model: info_text(device_info::MODEL),
        manufacturer: info_text(device_info::MANUFACTURER),
        firmware: info_text(device_info::FIRMWARE),
    })
}

fn numeric(field: &FieldNode) -> Result<f64, ProtocolError> {
    field.as_f64().ok_or_else(|| {
        ProtocolError::MalformedMessage(format!(
            "telemetry field {} has non-numeric wire type {:?}",
            field.field_number,
            field.wire_type()
        ))
    })
}

fn optional_number(readings: &[FieldNode], number: u32) -> Result<f64, ProtocolError> {
    find_field(readings, number).map_or(Ok(0.0), numeric)
}

fn optional_integer(readings: &[FieldNode], number: u32) -> Result<u64, ProtocolError> {
    match find_field(readings, number) {
        None => Ok(0),
        Some(f) => match f.as_u64() {
            Some(v) => Ok(v),
            // Some firmware sends integers as floats.
            None => numeric(f).map(|v| v.max(0.0) as u64),
        },
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
