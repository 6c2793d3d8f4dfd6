//! Charger identity as reported by the UDP discovery exchange.
//!
//! The charger's Wi-Fi module answers the broadcast probe with a short ASCII
//! record:
//! ```text
//! <ip>,<mac>,<model>[,<firmware>[,<device_id>]]
//! ```
//! The self-reported IP is ignored in favour of the datagram's source address,
//! which is the one a TCP session can actually reach.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::protocol::codec::ProtocolError;

/// Probe payload broadcast to the discovery ports.
pub const DISCOVERY_PROBE: &[u8] = b"HF-A11ASSISTHREAD";

/// A charger found on the local network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargerIdentity {
    pub ip: IpAddr,
    /// Empty when the reply does not carry one.
    pub device_id: String,
    /// Upper-case, colon-separated.
    pub mac: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware: Option<String>,
}

/// Parses one discovery reply received from `source`.
///
/// # Errors
///
/// [`ProtocolError::MalformedMessage`] for non-UTF-8 payloads, an echo of our
/// own probe, a record with fewer than two fields, or an unparsable MAC.
pub fn parse_discovery_reply(
    source: IpAddr,
    payload: &[u8],
) -> Result<ChargerIdentity, ProtocolError> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| ProtocolError::MalformedMessage(format!("discovery reply not UTF-8: {e}")))?
        .trim_matches(|c: char| c.is_whitespace() || c == '\0');

    if text.as_bytes() == DISCOVERY_PROBE {
        return Err(ProtocolError::MalformedMessage(
            "discovery probe echo".to_string(),
        ));
    }

    let parts: Vec<&str> = text.split(',').map(str::trim).collect();
    if parts.len() < 2 {
        return Err(ProtocolError::MalformedMessage(format!(
            "discovery reply has {} field(s), expected at least 2",
            parts.len()
        )));
    }

    let mac = normalize_mac(parts[1]).ok_or_else(|| {
        ProtocolError::MalformedMessage(format!("invalid MAC in discovery reply: {:?}", parts[1]))
    })?;

    let optional = |i: usize| {
        parts
            .get(i)
            .filter(|s| !s.is_empty())
            .map(|s| (*s).to_string())
    };

    Ok(ChargerIdentity {
        ip: source,
        device_id: optional(4).unwrap_or_default(),
        mac,
        model: optional(2),
        firmware: optional(3),
    })
}

/// Normalises a MAC address to `AA:BB:CC:DD:EE:FF`.
///
/// Accepts 12 hex digits, optionally separated by `:` or `-`.
pub fn normalize_mac(raw: &str) -> Option<String> {
    let digits: String = raw
        .chars()
        .filter(|c| *c != ':' && *c != '-')
        .collect();
    if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let upper = digits.to_ascii_uppercase();
    let octets: Vec<&str> = (0..6).map(|i| &upper[i * 2..i * 2 + 2]).collect();
    Some(octets.join(":"))
}
