//! duosida-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! The client talks to Duosida chargers directly on the local network:
//!
//! 1. [`discover_chargers`] broadcasts a UDP probe and collects the replies.
//! 2. [`ChargerSession`] opens the TCP session (port 9988), performs the
//!    two-message handshake and then exchanges length-prefixed frames to read
//!    telemetry and write settings.
//! 3. [`monitor`] polls any [`StatusSource`] on a fixed interval until told
//!    to stop.

/// Application layer: the polling loop.
pub mod application;

/// Infrastructure layer: TCP session, UDP discovery and configuration.
pub mod infrastructure;

pub use application::monitor::{
    monitor, MonitorOptions, MonitorOutcome, StatusSource, MIN_INTERVAL,
};
pub use infrastructure::network::discovery::{
    discover_chargers, DiscoveryClient, DiscoveryConfig, DiscoveryError,
};
pub use infrastructure::network::session::{
    ChargerSession, SessionConfig, SessionError, SessionPhase,
};
