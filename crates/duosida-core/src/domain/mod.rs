//! Domain types shared by the session and discovery clients.
//!
//! Everything here is plain data plus validation; nothing performs I/O.

pub mod identity;
pub mod setting;
pub mod status;

pub use identity::{parse_discovery_reply, ChargerIdentity, DISCOVERY_PROBE};
pub use setting::{ChargerSetting, LedBrightness};
pub use status::{derived_power, ChargerStatus, ConnectionState};
