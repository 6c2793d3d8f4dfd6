//! UDP broadcast discovery of chargers on the local subnet.
//!
//! The charger's Wi-Fi module listens for a fixed ASCII probe on UDP ports
//! 48899 and 48890 and answers each probe with a short comma-separated
//! record (see [`parse_discovery_reply`]). Discovery is one shot:
//!
//! 1. Bind an ephemeral UDP socket with broadcast enabled.
//! 2. Send the probe to the broadcast address on every configured port.
//! 3. Collect replies until the timeout elapses or a stop is requested.
//! 4. Keep the first reply per source IP, in arrival order.
//!
//! The socket is dropped when discovery returns.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use duosida_core::domain::{parse_discovery_reply, ChargerIdentity, DISCOVERY_PROBE};
use thiserror::Error;
use tokio::{net::UdpSocket, sync::watch};
use tracing::{debug, info, warn};

use super::{deadline_after, sleep_until_deadline, stop_requested};

/// Ports the charger's Wi-Fi module answers probes on.
pub const DISCOVERY_PORTS: [u16; 2] = [48899, 48890];

/// Error type for discovery operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The UDP socket could not be bound or configured for broadcast.
    #[error("failed to bind discovery socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// The probe could not be sent to any port.
    #[error("failed to send discovery probe to {target}: {source}")]
    Send {
        target: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// Receiving failed with a non-transient error.
    #[error("discovery recv error: {0}")]
    Recv(#[source] std::io::Error),
}

/// Where and how to probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    pub broadcast_addr: IpAddr,
    pub ports: Vec<u16>,
    /// Local address to bind; port 0 picks an ephemeral port.
    pub bind_addr: SocketAddr,
    pub probe: Vec<u8>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            broadcast_addr: IpAddr::V4(Ipv4Addr::BROADCAST),
            ports: DISCOVERY_PORTS.to_vec(),
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            probe: DISCOVERY_PROBE.to_vec(),
        }
    }
}

/// Broadcasts probes and collects charger replies.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryClient {
    config: DiscoveryConfig,
}

impl DiscoveryClient {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Probes and collects replies for the full `timeout`.
    ///
    /// No responders is not an error: the result is simply empty.
    ///
    /// # Errors
    ///
    /// See [`Self::discover_until`].
    pub async fn discover(&self, timeout: Duration) -> Result<Vec<ChargerIdentity>, DiscoveryError> {
        let (_stop_tx, stop_rx) = watch::channel(false);
        self.discover_until(timeout, stop_rx).await
    }

    /// Like [`Self::discover`], but returns early with whatever has been
    /// collected once `stop` carries `true`.
    ///
    /// # Errors
    ///
    /// - [`DiscoveryError::Bind`] if the socket cannot be bound or switched to
    ///   broadcast mode.
    /// - [`DiscoveryError::Send`] if the probe could not be sent to any port.
    /// - [`DiscoveryError::Recv`] on a non-transient receive error.
    pub async fn discover_until(
        &self,
        timeout: Duration,
        mut stop: watch::Receiver<bool>,
    ) -> Result<Vec<ChargerIdentity>, DiscoveryError> {
        let addr = self.config.bind_addr;
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| DiscoveryError::Bind { addr, source })?;
        socket
            .set_broadcast(true)
            .map_err(|source| DiscoveryError::Bind { addr, source })?;

        self.send_probes(&socket).await?;
        debug!(
            "discovery probe sent to {} on ports {:?}; listening for {timeout:?}",
            self.config.broadcast_addr, self.config.ports
        );

        let deadline = deadline_after(timeout);
        let mut found: Vec<ChargerIdentity> = Vec::new();
        let mut buf = [0u8; 1024];

        loop {
            let (len, src) = tokio::select! {
                received = socket.recv_from(&mut buf) => match received {
                    Ok(pair) => pair,
                    Err(e) if is_transient(&e) => {
                        debug!("transient discovery recv error: {e}");
                        continue;
                    }
                    Err(e) => return Err(DiscoveryError::Recv(e)),
                },
                _ = sleep_until_deadline(deadline) => break,
                _ = stop_requested(&mut stop) => {
                    debug!("discovery stopped early");
                    break;
                }
            };

            match parse_discovery_reply(src.ip(), &buf[..len]) {
                Ok(identity) if found.iter().any(|known| known.ip == identity.ip) => {
                    debug!("duplicate discovery reply from {src}");
                }
                Ok(identity) => {
                    info!("found charger at {} (MAC {})", identity.ip, identity.mac);
                    found.push(identity);
                }
                Err(e) => debug!("ignoring datagram from {src}: {e}"),
            }
        }

        info!("discovery finished: {} charger(s)", found.len());
        Ok(found)
    }

    /// Sends the probe to every port; fails only if no send succeeded.
    async fn send_probes(&self, socket: &UdpSocket) -> Result<(), DiscoveryError> {
        let mut last_error = None;
        let mut sent = 0usize;
        for &port in &self.config.ports {
            let target = SocketAddr::new(self.config.broadcast_addr, port);
            match socket.send_to(&self.config.probe, target).await {
                Ok(_) => sent += 1,
                Err(source) => {
                    warn!("failed to send discovery probe to {target}: {source}");
                    last_error = Some(DiscoveryError::Send { target, source });
                }
            }
        }
        match last_error {
            Some(e) if sent == 0 => Err(e),
            _ => Ok(()),
        }
    }
}

/// Probes with the default configuration.
///
/// # Errors
///
/// See [`DiscoveryClient::discover_until`].
pub async fn discover_chargers(timeout: Duration) -> Result<Vec<ChargerIdentity>, DiscoveryError> {
    DiscoveryClient::default().discover(timeout).await
}

/// Errors a UDP receive loop should ride out.
///
/// Windows reports ICMP port-unreachable for an earlier send as a reset on
/// the next receive.
fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock
            | std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionRefused
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────
