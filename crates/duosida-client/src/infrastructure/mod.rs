//! Infrastructure layer for the client.
//!
//! Contains the OS-facing adapters: TCP/UDP network I/O and configuration
//! file loading.
//!
//! # Sub-modules
//!
//! - **`network`** – The TCP session to a single charger (handshake, framed
//!   request/response exchange) and the UDP broadcast discovery client.
//!
//! - **`storage`** – Read-only TOML configuration supplying defaults for the
//!   CLI (charger address, timeouts, polling interval).

pub mod network;
pub mod storage;
