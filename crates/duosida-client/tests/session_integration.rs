//! Integration tests for `ChargerSession` against a fake charger.
//!
//! Each test binds a loopback `TcpListener` and scripts the charger side:
//! check the handshake bytes, answer status requests with hand-built frames,
//! or misbehave (close mid-frame, stay silent, send garbage).

use std::time::Duration;

use duosida_client::{
    monitor, ChargerSession, MonitorOptions, MonitorOutcome, SessionConfig, SessionError,
    SessionPhase,
};
use duosida_core::{
    protocol::{
        codec::{decode_message, encode_frame, encode_message, find_field, FieldNode},
        messages::build_handshake,
    },
    ConnectionState, ProtocolError,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::watch,
};

const DEVICE_ID: &str = "0310107112122360374";

// ── Fake charger helpers ──────────────────────────────────────────────────────

fn test_config(port: u16) -> SessionConfig {
    SessionConfig {
        port,
        connect_timeout: Duration::from_secs(2),
        response_timeout: Duration::from_millis(500),
        write_timeout: Duration::from_millis(500),
        late_reply_grace: Duration::from_millis(500),
        hello_settle: Duration::from_millis(10),
        hello_ack_timeout: Duration::from_millis(500),
        login_settle: Duration::from_millis(10),
        command_settle: Duration::from_millis(10),
    }
}

async fn listen() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// Accepts one connection and checks both handshake messages byte for byte.
async fn accept_handshake(listener: &TcpListener) -> TcpStream {
    let (mut stream, _) = listener.accept().await.unwrap();
    let [hello, login] = build_handshake(DEVICE_ID);

    let mut buf = vec![0u8; hello.len()];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, hello, "hello must match the captured bytes");
    stream.write_all(&[0x08, 0x01]).await.unwrap();

    let mut buf = vec![0u8; login.len()];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, login, "login must match the captured bytes");
    stream
}

async fn read_request(stream: &mut TcpStream) -> Vec<FieldNode> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.unwrap();
    let mut payload = vec![0u8; u32::from_be_bytes(header) as usize];
    stream.read_exact(&mut payload).await.unwrap();
    decode_message(&payload).unwrap()
}

/// Reads until the client closes its side.
async fn hold_open(mut stream: TcpStream) {
    let mut buf = [0u8; 256];
    while let Ok(n) = stream.read(&mut buf).await {
        if n == 0 {
            break;
        }
    }
}

fn status_frame(voltage: f32, current: f32, state: u64) -> Vec<u8> {
    let payload = encode_message(&[
        FieldNode::message(
            4,
            vec![
                FieldNode::string(1, "Duosida"),
                FieldNode::string(2, "SmartChargePi"),
            ],
        ),
        FieldNode::message(
            16,
            vec![
                FieldNode::string(2, "DataVendorStatusReq"),
                FieldNode::message(
                    10,
                    vec![
                        FieldNode::float(1, voltage),
                        FieldNode::float(2, current),
                        FieldNode::float(8, 24.0),
                        FieldNode::varint(17, state),
                    ],
                ),
            ],
        ),
        FieldNode::string(100, DEVICE_ID),
    ]);
    encode_frame(&payload).unwrap()
}

fn keepalive_frame() -> Vec<u8> {
    let payload = encode_message(&[FieldNode::message(
        16,
        vec![FieldNode::string(2, "DataContinueReq")],
    )]);
    encode_frame(&payload).unwrap()
}

fn history_frame() -> Vec<u8> {
    let payload = encode_message(&[FieldNode::message(
        16,
        vec![
            FieldNode::string(2, "DataHistoryReq"),
            FieldNode::varint(5, 12),
        ],
    )]);
    encode_frame(&payload).unwrap()
}

fn vendor_message_type(fields: &[FieldNode]) -> Option<String> {
    find_field(fields, 16)
        .and_then(FieldNode::as_message)
        .and_then(|inner| find_field(inner, 2))
        .and_then(FieldNode::as_string)
}

// ── Connect ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_connect_performs_handshake_and_becomes_ready() {
    // Arrange
    let (listener, port) = listen().await;
    let server = tokio::spawn(async move {
        let stream = accept_handshake(&listener).await;
        hold_open(stream).await;
    });
    let mut session = ChargerSession::new(test_config(port));

    // Act
    session.connect("127.0.0.1", DEVICE_ID).await.unwrap();

    // Assert
    assert_eq!(session.phase(), SessionPhase::Ready);
    assert_eq!(session.device_id(), Some(DEVICE_ID));
    assert_eq!(session.peer().map(|p| p.port()), Some(port));

    session.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_connect_refused_is_connection_error() {
    // Arrange: grab a free port, then close it again
    let (listener, port) = listen().await;
    drop(listener);
    let mut session = ChargerSession::new(test_config(port));

    // Act
    let result = session.connect("127.0.0.1", DEVICE_ID).await;

    // Assert
    assert!(matches!(result, Err(SessionError::Connection { .. })));
    assert_eq!(session.phase(), SessionPhase::Disconnected);
}

#[tokio::test]
async fn test_charger_closing_during_handshake_is_connection_error() {
    let (listener, port) = listen().await;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut hello = [0u8; 16];
        stream.read_exact(&mut hello).await.unwrap();
    });
    let mut session = ChargerSession::new(test_config(port));

    let result = session.connect("127.0.0.1", DEVICE_ID).await;

    assert!(matches!(result, Err(SessionError::Connection { .. })));
    assert_eq!(session.phase(), SessionPhase::Disconnected);
    server.await.unwrap();
}

#[tokio::test]
async fn test_connect_on_live_session_replaces_the_socket() {
    // Arrange
    let (listener, port) = listen().await;
    let server = tokio::spawn(async move {
        let mut first = accept_handshake(&listener).await;
        let second = accept_handshake(&listener).await;
        let mut buf = [0u8; 16];
        let n = first.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "first socket must be closed by the reconnect");
        hold_open(second).await;
    });
    let mut session = ChargerSession::new(test_config(port));

    // Act
    session.connect("127.0.0.1", DEVICE_ID).await.unwrap();
    session.connect("127.0.0.1", DEVICE_ID).await.unwrap();

    // Assert
    assert!(session.is_ready());
    session.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let (listener, port) = listen().await;
    let server = tokio::spawn(async move {
        let stream = accept_handshake(&listener).await;
        hold_open(stream).await;
    });
    let mut session = ChargerSession::new(test_config(port));
    session.connect("127.0.0.1", DEVICE_ID).await.unwrap();

    session.disconnect().await;
    session.disconnect().await;

    assert_eq!(session.phase(), SessionPhase::Disconnected);
    assert!(session.device_id().is_none());
    assert!(matches!(
        session.get_status().await,
        Err(SessionError::NotConnected)
    ));
    server.await.unwrap();
}

// ── Status ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_get_status_skips_unrelated_frames() {
    // Arrange
    let (listener, port) = listen().await;
    let server = tokio::spawn(async move {
        let mut stream = accept_handshake(&listener).await;
        let request = read_request(&mut stream).await;
        assert_eq!(vendor_message_type(&request).as_deref(), Some("DataVendorStatusReq"));
        assert_eq!(find_field(&request, 101).and_then(FieldNode::as_u64), Some(3));

        stream.write_all(&keepalive_frame()).await.unwrap();
        stream.write_all(&history_frame()).await.unwrap();
        // Status frame split across two writes.
        let frame = status_frame(230.0, 16.0, 2);
        stream.write_all(&frame[..7]).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        stream.write_all(&frame[7..]).await.unwrap();
        hold_open(stream).await;
    });
    let mut session = ChargerSession::new(test_config(port));
    session.connect("127.0.0.1", DEVICE_ID).await.unwrap();

    // Act
    let status = session.get_status().await.unwrap();

    // Assert
    assert_eq!(status.connection_state, ConnectionState::Charging);
    assert_eq!(status.voltage, 230.0);
    assert_eq!(status.current, 16.0);
    assert_eq!(status.power, 3680.0);
    assert_eq!(status.manufacturer, "Duosida");
    assert_eq!(status.device_id, DEVICE_ID);

    session.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_partial_frame_then_close_is_connection_lost() {
    // Arrange: declares 50 bytes, sends 30, closes
    let (listener, port) = listen().await;
    let server = tokio::spawn(async move {
        let mut stream = accept_handshake(&listener).await;
        read_request(&mut stream).await;
        let mut partial = 50u32.to_be_bytes().to_vec();
        partial.extend([0x0A; 30]);
        stream.write_all(&partial).await.unwrap();
    });
    let mut session = ChargerSession::new(test_config(port));
    session.connect("127.0.0.1", DEVICE_ID).await.unwrap();

    // Act
    let result = session.get_status().await;

    // Assert
    assert!(matches!(result, Err(SessionError::ConnectionLost(_))));
    assert_eq!(session.phase(), SessionPhase::Faulted);
    assert!(matches!(
        session.get_status().await,
        Err(SessionError::NotConnected)
    ));
    server.await.unwrap();
}

#[tokio::test]
async fn test_late_reply_after_timeout_is_not_returned_for_the_next_request() {
    // Arrange: request n is answered with 230 + n volts; the first answer
    // arrives after the response timeout
    let (listener, port) = listen().await;
    let server = tokio::spawn(async move {
        let mut stream = accept_handshake(&listener).await;
        for n in 1..=3u64 {
            read_request(&mut stream).await;
            if n == 1 {
                tokio::time::sleep(Duration::from_millis(700)).await;
            }
            stream
                .write_all(&status_frame(230.0 + n as f32, 0.0, 0))
                .await
                .unwrap();
        }
        hold_open(stream).await;
    });
    let mut session = ChargerSession::new(test_config(port));
    session.connect("127.0.0.1", DEVICE_ID).await.unwrap();

    // Act
    let first = session.get_status().await;
    let second = session.get_status().await;
    let third = session.get_status().await;

    // Assert
    assert!(matches!(first, Err(SessionError::Timeout(_))));
    assert_eq!(second.unwrap().voltage, 232.0);
    let third = third.unwrap();
    assert_eq!(third.voltage, 233.0);
    assert_eq!(third.connection_state, ConnectionState::Available);
    assert!(session.is_ready());

    session.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_unanswered_request_does_not_hold_back_later_ones() {
    // Arrange: the first request is never answered
    let (listener, port) = listen().await;
    let server = tokio::spawn(async move {
        let mut stream = accept_handshake(&listener).await;
        read_request(&mut stream).await;
        let request = read_request(&mut stream).await;
        assert_eq!(find_field(&request, 101).and_then(FieldNode::as_u64), Some(4));
        stream.write_all(&status_frame(232.0, 0.0, 0)).await.unwrap();
        hold_open(stream).await;
    });
    let mut session = ChargerSession::new(test_config(port));
    session.connect("127.0.0.1", DEVICE_ID).await.unwrap();

    // Act
    let first = session.get_status().await;
    let second = session.get_status().await;

    // Assert
    assert!(matches!(first, Err(SessionError::Timeout(_))));
    assert_eq!(second.unwrap().voltage, 232.0);
    assert!(session.is_ready());

    session.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_telemetry_queued_before_the_request_is_dropped() {
    // Arrange: an unsolicited status push sits in the socket before the request
    let (listener, port) = listen().await;
    let server = tokio::spawn(async move {
        let mut stream = accept_handshake(&listener).await;
        stream.write_all(&status_frame(199.0, 0.0, 0)).await.unwrap();
        read_request(&mut stream).await;
        stream.write_all(&status_frame(230.0, 16.0, 2)).await.unwrap();
        hold_open(stream).await;
    });
    let mut session = ChargerSession::new(test_config(port));
    session.connect("127.0.0.1", DEVICE_ID).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Act
    let status = session.get_status().await.unwrap();

    // Assert
    assert_eq!(status.voltage, 230.0);

    session.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_malformed_frame_is_surfaced_and_stream_stays_aligned() {
    // Arrange: field number 0 is never valid
    let (listener, port) = listen().await;
    let server = tokio::spawn(async move {
        let mut stream = accept_handshake(&listener).await;
        read_request(&mut stream).await;
        stream.write_all(&encode_frame(&[0x00, 0x00]).unwrap()).await.unwrap();
        read_request(&mut stream).await;
        stream.write_all(&status_frame(229.5, 10.0, 2)).await.unwrap();
        hold_open(stream).await;
    });
    let mut session = ChargerSession::new(test_config(port));
    session.connect("127.0.0.1", DEVICE_ID).await.unwrap();

    // Act
    let first = session.get_status().await;
    let second = session.get_status().await;

    // Assert
    assert!(matches!(
        first,
        Err(SessionError::Protocol(ProtocolError::MalformedMessage(_)))
    ));
    assert_eq!(second.unwrap().voltage, 229.5);
    assert!(session.is_ready());

    session.disconnect().await;
    server.await.unwrap();
}

// ── Writes ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_set_max_current_sends_command_and_caches_value() {
    // Arrange
    let (listener, port) = listen().await;
    let server = tokio::spawn(async move {
        let mut stream = accept_handshake(&listener).await;
        let command = read_request(&mut stream).await;
        hold_open(stream).await;
        command
    });
    let mut session = ChargerSession::new(test_config(port));
    session.connect("127.0.0.1", DEVICE_ID).await.unwrap();

    // Act
    let rejected = session.set_max_current(40).await;
    session.set_max_current(16).await.unwrap();
    session.disconnect().await;
    let command = server.await.unwrap();

    // Assert: the rejected value never reached the socket
    assert!(matches!(
        rejected,
        Err(SessionError::Protocol(ProtocolError::InvalidParameter { .. }))
    ));
    let body = find_field(&command, 10).and_then(FieldNode::as_message).unwrap();
    assert_eq!(
        find_field(body, 1).and_then(FieldNode::as_string).as_deref(),
        Some("VendorMaxWorkCurrent")
    );
    assert_eq!(find_field(body, 2).and_then(FieldNode::as_string).as_deref(), Some("16"));
    assert_eq!(find_field(&command, 101).and_then(FieldNode::as_u64), Some(3));
    assert_eq!(session.last_requested_max_current(), Some(16));
}

#[tokio::test]
async fn test_other_settings_use_their_vendor_keys() {
    let (listener, port) = listen().await;
    let server = tokio::spawn(async move {
        let mut stream = accept_handshake(&listener).await;
        let mut keys = Vec::new();
        for _ in 0..2 {
            let command = read_request(&mut stream).await;
            let body = find_field(&command, 10).and_then(FieldNode::as_message).unwrap();
            keys.push((
                find_field(body, 1).and_then(FieldNode::as_string).unwrap(),
                find_field(body, 2).and_then(FieldNode::as_string).unwrap(),
            ));
        }
        hold_open(stream).await;
        keys
    });
    let mut session = ChargerSession::new(test_config(port));
    session.connect("127.0.0.1", DEVICE_ID).await.unwrap();

    session.set_idle_timeout(120).await.unwrap();
    session.set_direct_mode(true).await.unwrap();
    session.disconnect().await;
    let keys = server.await.unwrap();

    assert_eq!(
        keys,
        vec![
            ("VendorConnectionTimeOut".to_string(), "120".to_string()),
            ("VendorDirectWorkMode".to_string(), "1".to_string()),
        ]
    );
    assert!(session.last_requested_max_current().is_none());
}

// ── Monitor over a real session ───────────────────────────────────────────────

#[tokio::test]
async fn test_monitor_reads_from_session_until_stopped() {
    // Arrange
    let (listener, port) = listen().await;
    let server = tokio::spawn(async move {
        let mut stream = accept_handshake(&listener).await;
        for i in 0..3u64 {
            read_request(&mut stream).await;
            stream
                .write_all(&status_frame(230.0, 6.0 + i as f32, 2))
                .await
                .unwrap();
        }
        hold_open(stream).await;
    });
    let mut session = ChargerSession::new(test_config(port));
    session.connect("127.0.0.1", DEVICE_ID).await.unwrap();
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut currents = Vec::new();

    // Act
    let outcome = monitor(
        &mut session,
        MonitorOptions::every(Duration::from_millis(20)),
        |reading| {
            currents.push(reading.map(|s| s.current).unwrap_or(-1.0));
            if currents.len() == 3 {
                stop_tx.send(true).unwrap();
            }
        },
        stop_rx,
    )
    .await;

    // Assert
    assert!(matches!(outcome, MonitorOutcome::Stopped));
    assert_eq!(currents, vec![6.0, 7.0, 8.0]);

    session.disconnect().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_monitor_ends_faulted_when_charger_goes_away() {
    let (listener, port) = listen().await;
    let server = tokio::spawn(async move {
        let mut stream = accept_handshake(&listener).await;
        read_request(&mut stream).await;
    });
    let mut session = ChargerSession::new(test_config(port));
    session.connect("127.0.0.1", DEVICE_ID).await.unwrap();
    let (_stop_tx, stop_rx) = watch::channel(false);

    let outcome = monitor(
        &mut session,
        MonitorOptions::every(Duration::from_millis(20)),
        |_| {},
        stop_rx,
    )
    .await;

    assert!(matches!(
        outcome,
        MonitorOutcome::Faulted(SessionError::ConnectionLost(_))
    ));
    server.await.unwrap();
}
