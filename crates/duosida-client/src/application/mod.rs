//! Application layer for the client.
//!
//! - **`monitor`** – Polls a [`monitor::StatusSource`] on a fixed interval and
//!   hands every reading (or per-read error) to a callback. The loop depends
//!   only on the trait, so it is unit-tested against a mock source.

pub mod monitor;
