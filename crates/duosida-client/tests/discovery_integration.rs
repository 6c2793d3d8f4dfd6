//! Integration tests for the discovery client against loopback responders.
//!
//! The probe goes to 127.0.0.1 instead of the broadcast address so the tests
//! run without a LAN.

use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

use duosida_client::{DiscoveryClient, DiscoveryConfig};
use tokio::{net::UdpSocket, sync::watch};

const PROBE: &[u8] = b"HF-A11ASSISTHREAD";

fn loopback_config(ports: Vec<u16>) -> DiscoveryConfig {
    DiscoveryConfig {
        broadcast_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
        ports,
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        ..DiscoveryConfig::default()
    }
}

/// A port with nothing listening on it.
async fn unused_port() -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.local_addr().unwrap().port()
}

/// Answers the first probe with each of `replies`, in order.
async fn spawn_responder(replies: Vec<&'static str>) -> (u16, tokio::task::JoinHandle<()>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = socket.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let mut buf = [0u8; 64];
        let (len, src) = socket.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], PROBE);
        for reply in replies {
            socket.send_to(reply.as_bytes(), src).await.unwrap();
        }
    });
    (port, handle)
}

#[tokio::test]
async fn test_no_responders_yields_empty_list() {
    // Arrange
    let client = DiscoveryClient::new(loopback_config(vec![unused_port().await]));

    // Act
    let started = Instant::now();
    let found = client.discover(Duration::from_secs(2)).await.unwrap();

    // Assert
    assert!(found.is_empty());
    assert!(started.elapsed() >= Duration::from_millis(1900));
}

#[tokio::test]
async fn test_reply_is_parsed_and_duplicates_dropped() {
    // Arrange: the same charger answers twice, plus one garbage datagram
    let (port, responder) = spawn_responder(vec![
        "192.168.20.95,ACCF23AABBCC,HF-LPB100,4.02,0310107112122360374",
        "not a discovery reply",
        "192.168.20.95,ACCF23AABBCC,HF-LPB100,4.02,0310107112122360374",
    ])
    .await;
    let client = DiscoveryClient::new(loopback_config(vec![port]));

    // Act
    let found = client.discover(Duration::from_millis(500)).await.unwrap();

    // Assert
    responder.await.unwrap();
    assert_eq!(found.len(), 1);
    let charger = &found[0];
    assert_eq!(charger.ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
    assert_eq!(charger.mac, "AC:CF:23:AA:BB:CC");
    assert_eq!(charger.device_id, "0310107112122360374");
    assert_eq!(charger.model.as_deref(), Some("HF-LPB100"));
}

#[tokio::test]
async fn test_probe_goes_to_every_configured_port() {
    // Arrange: two responders on one host
    let (first_port, first) = spawn_responder(vec!["10.0.0.2,ACCF23000001,HF-LPB100"]).await;
    let (second_port, second) = spawn_responder(vec!["10.0.0.2,ACCF23000001,HF-LPB100"]).await;
    let client = DiscoveryClient::new(loopback_config(vec![first_port, second_port]));

    // Act
    let found = client.discover(Duration::from_millis(500)).await.unwrap();

    // Assert: both probed, one charger per source IP
    first.await.unwrap();
    second.await.unwrap();
    assert_eq!(found.len(), 1);
}

#[tokio::test]
async fn test_stop_signal_ends_collection_early() {
    // Arrange
    let client = DiscoveryClient::new(loopback_config(vec![unused_port().await]));
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        stop_tx.send(true).unwrap();
    });

    // Act
    let started = Instant::now();
    let found = client
        .discover_until(Duration::from_secs(30), stop_rx)
        .await
        .unwrap();

    // Assert
    assert!(found.is_empty());
    assert!(started.elapsed() < Duration::from_secs(5));
}
