//! Network infrastructure: the charger TCP session and UDP discovery.

pub mod discovery;
pub mod session;

use std::time::Duration;

use tokio::{
    sync::watch,
    time::{self, Instant},
};

/// Resolves once `stop` carries `true`.
///
/// If every sender is dropped without signalling, this never resolves: no one
/// is left who could ask for a stop.
pub async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    if stop.wait_for(|stopped| *stopped).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// `Instant::now() + after`, or `None` if that is too far away to represent.
pub fn deadline_after(after: Duration) -> Option<Instant> {
    Instant::now().checked_add(after)
}

/// Sleeps until `deadline`; never resolves for `None`.
pub async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
