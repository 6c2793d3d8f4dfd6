//! # duosida-core
//!
//! Shared library for talking to Duosida EV chargers on the local network.
//! It holds the wire codec, the charger message set and the domain types.
//!
//! This crate performs no I/O. The session, discovery and monitoring clients
//! live in `duosida-client`.
//!
//! - **`protocol`** – How bytes travel over the network. Messages are a
//!   protobuf-style tree of numbered fields, decoded without a schema. After
//!   the handshake every message is wrapped in a 4-byte big-endian length
//!   prefix.
//!
//! - **`domain`** – Telemetry, writable settings and discovery identities,
//!   together with the range checks applied before anything is sent.

pub mod domain;
pub mod protocol;

pub use domain::{ChargerIdentity, ChargerSetting, ChargerStatus, ConnectionState, LedBrightness};
pub use protocol::codec::{decode_message, encode_message, FieldNode, FieldValue, ProtocolError};
pub use protocol::messages::RequestBuilder;
