//! Polling loop: read telemetry on a fixed interval until told to stop.
//!
//! The loop depends only on the [`StatusSource`] trait. [`ChargerSession`]
//! is the production implementation; tests inject a mock.
//!
//! A failed read is reported to the callback and polling continues, as long
//! as the source is still ready. A failed read that leaves the source
//! unusable ends the loop with [`MonitorOutcome::Faulted`]; the loop never
//! reconnects on its own.

use std::time::Duration;

use async_trait::async_trait;
use duosida_core::domain::ChargerStatus;
use tokio::{
    sync::watch,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::infrastructure::network::{
    deadline_after, sleep_until_deadline,
    session::{ChargerSession, SessionError},
    stop_requested,
};

/// Anything that can produce a telemetry reading on demand.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StatusSource: Send {
    /// Reads one snapshot.
    async fn get_status(&mut self) -> Result<ChargerStatus, SessionError>;

    /// Whether further reads can succeed without reconnecting.
    fn is_ready(&self) -> bool;
}

#[async_trait]
impl StatusSource for ChargerSession {
    async fn get_status(&mut self) -> Result<ChargerStatus, SessionError> {
        ChargerSession::get_status(self).await
    }

    fn is_ready(&self) -> bool {
        ChargerSession::is_ready(self)
    }
}

/// Shortest polling period. A shorter `interval`, including zero, is raised
/// to it.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Polling cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorOptions {
    pub interval: Duration,
    /// Stop after this long; `None` polls until stopped.
    pub max_duration: Option<Duration>,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_duration: None,
        }
    }
}

impl MonitorOptions {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            max_duration: None,
        }
    }
}

/// Why [`monitor`] returned.
#[derive(Debug)]
pub enum MonitorOutcome {
    /// Stop was signalled or `max_duration` elapsed.
    Stopped,
    /// A read failed and left the source unusable.
    Faulted(SessionError),
}

/// Polls `source` every `options.interval`, handing each result to
/// `on_reading`.
///
/// The first read happens immediately. A stop signal is honoured both while
/// waiting for the next tick and while a read is in flight, so it takes
/// effect within one interval.
pub async fn monitor<S, F>(
    source: &mut S,
    options: MonitorOptions,
    mut on_reading: F,
    mut stop: watch::Receiver<bool>,
) -> MonitorOutcome
where
    S: StatusSource + ?Sized,
    F: FnMut(Result<&ChargerStatus, &SessionError>),
{
    let deadline = options.max_duration.and_then(deadline_after);
    let period = options.interval.max(MIN_INTERVAL);
    if period != options.interval {
        warn!("monitor interval {:?} raised to {period:?}", options.interval);
    }
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut reads: u64 = 0;

    info!("monitoring every {period:?}");
    loop {
        if *stop.borrow() {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop_requested(&mut stop) => break,
            _ = sleep_until_deadline(deadline) => {
                info!("monitor duration elapsed");
                break;
            }
        }

        let result = tokio::select! {
            result = source.get_status() => result,
            _ = stop_requested(&mut stop) => break,
        };
        reads += 1;

        match &result {
            Ok(status) => debug!("reading #{reads}: {}", status.connection_state),
            Err(e) => warn!("reading #{reads} failed: {e}"),
        }
        on_reading(result.as_ref());

        if let Err(e) = result {
            if !source.is_ready() {
                warn!("status source no longer ready; monitor ending");
                return MonitorOutcome::Faulted(e);
            }
        }
    }

    info!("monitor stopped after {reads} reading(s)");
    MonitorOutcome::Stopped
}

// ── Tests ─────────────────────────────────────────────────────────────────────
