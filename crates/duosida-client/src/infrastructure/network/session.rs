//! TCP session to a single charger.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──▶ Handshaking ──▶ Ready
//!       ▲                        │               │            │
//!       └──────── failure ───────┴───────────────┘            │
//!       ▲                                                     │
//!       └──────────── disconnect ◀──── Faulted ◀── transport error
//! ```
//!
//! The handshake goes out raw. Everything after it travels in
//! `[u32 BE length][payload]` frames. Every exchange method takes `&mut self`,
//! so a session never has two requests in flight.
//!
//! # Frame reading
//!
//! TCP gives no guarantee that one `read()` returns exactly one frame: a read
//! may end mid-frame or carry several frames at once. [`FrameReader`] keeps
//! every received byte in an accumulation buffer and only removes a frame once
//! all of it has arrived. Because bytes are appended only after a `read()`
//! completes, dropping a pending read (for example when a response timeout
//! fires) loses nothing; the next exchange resumes at the same frame boundary.
//!
//! # Stale replies
//!
//! Replies carry nothing that ties them to a request. Before a status request
//! goes out, the session therefore drops every frame that is already queued,
//! and after a timed-out request it first waits up to `late_reply_grace` for
//! the reply still owed to it. A frame that is half received when the request
//! goes out is dropped once it completes.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use duosida_core::{
    domain::{ChargerSetting, ChargerStatus, LedBrightness},
    protocol::{
        codec::{complete_frame_len, decode_message, encode_frame, FRAME_HEADER_SIZE},
        messages::{find_telemetry, parse_status, RequestBuilder},
    },
    ProtocolError,
};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    time,
};
use tracing::{debug, info, warn};

/// TCP port the charger listens on.
pub const DEFAULT_PORT: u16 = 9988;

const READ_CHUNK: usize = 4096;

/// Errors surfaced by [`ChargerSession`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// Connecting or handshaking failed. The session is back in
    /// [`SessionPhase::Disconnected`].
    #[error("failed to connect to charger at {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: io::Error,
    },
    /// The transport failed mid-exchange. The session is
    /// [`SessionPhase::Faulted`] and must be reconnected.
    #[error("connection to charger lost: {0}")]
    ConnectionLost(#[source] io::Error),
    /// No telemetry arrived in time. The session stays usable, and the late
    /// reply is discarded by the next request.
    #[error("no status response within {0:?}")]
    Timeout(Duration),
    #[error("session is not connected")]
    NotConnected,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Where a [`ChargerSession`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Disconnected,
    Connecting,
    Handshaking,
    Ready,
    Faulted,
}

/// Timing knobs for a session. The defaults match what the charger firmware
/// tolerates; tests shrink them.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub port: u16,
    /// Bound on the TCP connect.
    pub connect_timeout: Duration,
    /// Bound on waiting for telemetry once a status request is sent.
    pub response_timeout: Duration,
    /// Bound on writing one frame. A write cut off by it faults the session.
    pub write_timeout: Duration,
    /// After a timed-out status request, how long the next one waits for the
    /// late reply before giving up on it.
    pub late_reply_grace: Duration,
    /// Pause after the first handshake message.
    pub hello_settle: Duration,
    /// How long to wait for the charger to acknowledge the first handshake
    /// message before moving on regardless.
    pub hello_ack_timeout: Duration,
    /// Pause after the second handshake message.
    pub login_settle: Duration,
    /// Pause after a configuration write.
    pub command_settle: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            late_reply_grace: Duration::from_secs(1),
            hello_settle: Duration::from_millis(100),
            hello_ack_timeout: Duration::from_secs(1),
            login_settle: Duration::from_millis(200),
            command_settle: Duration::from_millis(500),
        }
    }
}

// ── Frame reader ──────────────────────────────────────────────────────────────

/// Splits a byte stream into frame payloads.
#[derive(Debug, Default)]
pub struct FrameReader {
    recv_buf: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            recv_buf: Vec::with_capacity(READ_CHUNK),
        }
    }

    /// Bytes received but not yet returned as part of a frame.
    pub fn buffered(&self) -> usize {
        self.recv_buf.len()
    }

    pub fn clear(&mut self) {
        self.recv_buf.clear();
    }

    /// Appends bytes read elsewhere.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.recv_buf.extend_from_slice(bytes);
    }

    /// Removes and returns the first frame payload if it is fully buffered.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::MalformedMessage`] if the header declares more than
    /// `MAX_FRAME_LEN` bytes. The buffer is cleared since the stream can no
    /// longer be realigned.
    pub fn take_frame(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        match complete_frame_len(&self.recv_buf) {
            Ok(Some(total)) => {
                let payload = self.recv_buf[FRAME_HEADER_SIZE..total].to_vec();
                self.recv_buf.drain(..total);
                Ok(Some(payload))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.recv_buf.clear();
                Err(e)
            }
        }
    }

    /// Returns the next complete frame payload, reading more bytes as needed.
    ///
    /// Cancel-safe: if the returned future is dropped, no received bytes are
    /// lost.
    ///
    /// # Errors
    ///
    /// - [`SessionError::ConnectionLost`] on a read error, or on EOF before a
    ///   complete frame has arrived.
    /// - [`SessionError::Protocol`] if a header declares more than
    ///   `MAX_FRAME_LEN` bytes, as for [`Self::take_frame`].
    pub async fn next_frame<R>(&mut self, reader: &mut R) -> Result<Vec<u8>, SessionError>
    where
        R: AsyncRead + Unpin,
    {
        let mut read_tmp = [0u8; READ_CHUNK];
        loop {
            if let Some(payload) = self.take_frame()? {
                return Ok(payload);
            }

            let n = reader
                .read(&mut read_tmp)
                .await
                .map_err(SessionError::ConnectionLost)?;
            if n == 0 {
                return Err(SessionError::ConnectionLost(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "charger closed the connection with {} byte(s) of an incomplete frame buffered",
                        self.recv_buf.len()
                    ),
                )));
            }
            self.recv_buf.extend_from_slice(&read_tmp[..n]);
        }
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// A TCP session to one charger.
///
/// ```no_run
/// # async fn example() -> Result<(), duosida_client::SessionError> {
/// use duosida_client::{ChargerSession, SessionConfig};
///
/// let mut session = ChargerSession::new(SessionConfig::default());
/// session.connect("192.168.20.95", "0310107112122360374").await?;
/// let status = session.get_status().await?;
/// println!("{status}");
/// session.set_max_current(16).await?;
/// session.disconnect().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ChargerSession {
    config: SessionConfig,
    phase: SessionPhase,
    stream: Option<TcpStream>,
    reader: FrameReader,
    requests: Option<RequestBuilder>,
    peer: Option<SocketAddr>,
    last_set_current: Option<u32>,
    /// A status request was sent and its reply has not been seen.
    reply_outstanding: bool,
    /// The next completed frame was partly received before the latest
    /// request went out.
    skip_next_frame: bool,
}

impl ChargerSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            phase: SessionPhase::Disconnected,
            stream: None,
            reader: FrameReader::new(),
            requests: None,
            peer: None,
            last_set_current: None,
            reply_outstanding: false,
            skip_next_frame: false,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase == SessionPhase::Ready
    }

    /// Device id of the live session.
    pub fn device_id(&self) -> Option<&str> {
        self.requests.as_ref().map(RequestBuilder::device_id)
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// The last max-current value written in this session.
    ///
    /// This records what was requested. The charger never confirms writes,
    /// so it is not a reading of the charger's actual limit.
    pub fn last_requested_max_current(&self) -> Option<u32> {
        self.last_set_current
    }

    /// Connects to `host` and performs the handshake.
    ///
    /// A live session is disconnected first. No retries.
    ///
    /// # Errors
    ///
    /// [`SessionError::Connection`] if the TCP connect fails or times out, or
    /// the charger closes the connection or errors during the handshake.
    pub async fn connect(&mut self, host: &str, device_id: &str) -> Result<(), SessionError> {
        if self.stream.is_some() {
            self.disconnect().await;
        }

        let addr = format!("{host}:{}", self.config.port);
        self.phase = SessionPhase::Connecting;
        debug!("connecting to charger at {addr}");

        let connect = TcpStream::connect((host, self.config.port));
        let mut stream = match time::timeout(self.config.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(self.connect_failed(addr, source)),
            Err(_) => {
                let source = io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect timed out after {:?}", self.config.connect_timeout),
                );
                return Err(self.connect_failed(addr, source));
            }
        };

        self.phase = SessionPhase::Handshaking;
        let requests = RequestBuilder::new(device_id);
        if let Err(source) = handshake(&mut stream, &requests, &self.config).await {
            return Err(self.connect_failed(addr, source));
        }

        self.peer = stream.peer_addr().ok();
        self.stream = Some(stream);
        self.reader.clear();
        self.requests = Some(requests);
        self.last_set_current = None;
        self.reply_outstanding = false;
        self.skip_next_frame = false;
        self.phase = SessionPhase::Ready;
        info!("connected to charger {device_id} at {addr}");
        Ok(())
    }

    fn connect_failed(&mut self, addr: String, source: io::Error) -> SessionError {
        warn!("connection to {addr} failed: {source}");
        self.phase = SessionPhase::Disconnected;
        SessionError::Connection { addr, source }
    }

    /// Closes the socket if one is open. Idempotent.
    pub async fn disconnect(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("socket shutdown failed: {e}");
            }
            info!(
                "disconnected from charger at {}",
                self.peer.map_or_else(|| "?".to_string(), |p| p.to_string())
            );
        }
        self.reader.clear();
        self.requests = None;
        self.peer = None;
        self.reply_outstanding = false;
        self.skip_next_frame = false;
        self.phase = SessionPhase::Disconnected;
    }

    /// Requests and reads one telemetry snapshot.
    ///
    /// Frames that carry no telemetry (keep-alives, history pushes) are
    /// skipped, as is anything that arrived before the request was sent.
    /// After a timed-out request this first waits up to `late_reply_grace`
    /// for the late reply and drops it.
    ///
    /// # Errors
    ///
    /// - [`SessionError::NotConnected`] unless the session is ready.
    /// - [`SessionError::Timeout`] if no telemetry arrives within
    ///   `response_timeout`. The session stays ready.
    /// - [`SessionError::Protocol`] for an undecodable frame or incomplete
    ///   telemetry. The session stays ready.
    /// - [`SessionError::ConnectionLost`] on a transport failure, including a
    ///   request write that stalls past `write_timeout`.
    pub async fn get_status(&mut self) -> Result<ChargerStatus, SessionError> {
        let request = self.requests()?.status_request();
        self.await_late_reply().await?;
        self.discard_queued()?;
        self.send_frame(&request).await?;
        self.reply_outstanding = true;

        let deadline = self.config.response_timeout;
        match time::timeout(deadline, self.read_status()).await {
            Ok(result) => result,
            Err(_) => {
                warn!("status request timed out after {deadline:?}");
                Err(SessionError::Timeout(deadline))
            }
        }
    }

    async fn read_status(&mut self) -> Result<ChargerStatus, SessionError> {
        loop {
            let payload = self.next_frame().await?;
            if std::mem::take(&mut self.skip_next_frame) {
                debug!("dropping {}-byte frame sent before the request", payload.len());
                continue;
            }
            let fields = match decode_message(&payload) {
                Ok(fields) => fields,
                Err(e) => {
                    warn!("discarding undecodable {}-byte frame: {e}", payload.len());
                    self.reply_outstanding = false;
                    return Err(e.into());
                }
            };
            if find_telemetry(&fields).is_none() {
                debug!("skipping {}-byte frame without telemetry", payload.len());
                continue;
            }
            self.reply_outstanding = false;
            let status = parse_status(&fields)?;
            debug!(
                "status: {} {:.1}V {:.2}A",
                status.connection_state, status.voltage, status.current
            );
            return Ok(status);
        }
    }

    /// Writes the max charging current.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::InvalidParameter`] (wrapped) unless `6 <= amps <= 32`;
    /// nothing is sent in that case. Otherwise as [`Self::set_setting`].
    pub async fn set_max_current(&mut self, amps: u32) -> Result<(), SessionError> {
        self.set_setting(ChargerSetting::MaxCurrent(amps)).await
    }

    /// Writes one configuration value.
    ///
    /// Success means the command was written without a transport error; the
    /// charger does not acknowledge writes.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Protocol`] if the value is out of range. Checked
    ///   before anything else, so nothing is sent.
    /// - [`SessionError::NotConnected`] unless the session is ready.
    /// - [`SessionError::ConnectionLost`] on a transport failure.
    pub async fn set_setting(&mut self, setting: ChargerSetting) -> Result<(), SessionError> {
        setting.validate()?;
        let command = self.requests()?.set_config(setting)?;
        self.send_frame(&command).await?;
        time::sleep(self.config.command_settle).await;

        if let ChargerSetting::MaxCurrent(amps) = setting {
            self.last_set_current = Some(amps);
        }
        info!("sent {setting}");
        Ok(())
    }

    pub async fn set_idle_timeout(&mut self, seconds: u32) -> Result<(), SessionError> {
        self.set_setting(ChargerSetting::IdleTimeout(seconds)).await
    }

    pub async fn set_max_temperature(&mut self, celsius: u32) -> Result<(), SessionError> {
        self.set_setting(ChargerSetting::MaxTemperature(celsius)).await
    }

    pub async fn set_max_voltage(&mut self, volts: u32) -> Result<(), SessionError> {
        self.set_setting(ChargerSetting::MaxVoltage(volts)).await
    }

    pub async fn set_min_voltage(&mut self, volts: u32) -> Result<(), SessionError> {
        self.set_setting(ChargerSetting::MinVoltage(volts)).await
    }

    pub async fn set_led_brightness(&mut self, level: LedBrightness) -> Result<(), SessionError> {
        self.set_setting(ChargerSetting::LedBrightness(level)).await
    }

    pub async fn set_direct_mode(&mut self, enabled: bool) -> Result<(), SessionError> {
        self.set_setting(ChargerSetting::DirectMode(enabled)).await
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn requests(&self) -> Result<&RequestBuilder, SessionError> {
        match (&self.requests, self.phase) {
            (Some(requests), SessionPhase::Ready) => Ok(requests),
            _ => Err(SessionError::NotConnected),
        }
    }

    async fn send_frame(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        let frame = encode_frame(payload)?;
        let stream = self.stream.as_mut().ok_or(SessionError::NotConnected)?;
        if let Err(e) = write_frame(stream, &frame, self.config.write_timeout).await {
            self.fault(&e);
            return Err(SessionError::ConnectionLost(e));
        }
        debug!("sent {}-byte frame", frame.len());
        Ok(())
    }

    /// Waits up to `late_reply_grace` for the telemetry owed to a timed-out
    /// request and drops it.
    async fn await_late_reply(&mut self) -> Result<(), SessionError> {
        if !self.reply_outstanding {
            return Ok(());
        }
        let grace = self.config.late_reply_grace;
        let wait = async {
            loop {
                let payload = self.next_frame().await?;
                if std::mem::take(&mut self.skip_next_frame) {
                    continue;
                }
                match decode_message(&payload) {
                    Ok(fields) if find_telemetry(&fields).is_none() => continue,
                    _ => return Ok::<usize, SessionError>(payload.len()),
                }
            }
        };
        match time::timeout(grace, wait).await {
            Ok(Ok(len)) => debug!("dropped {len}-byte late reply to an earlier request"),
            Ok(Err(e)) => return Err(e),
            Err(_) => debug!("no late reply within {grace:?}"),
        }
        self.reply_outstanding = false;
        Ok(())
    }

    /// Drops every frame received so far without waiting for more.
    fn discard_queued(&mut self) -> Result<(), SessionError> {
        let stream = self.stream.as_ref().ok_or(SessionError::NotConnected)?;
        let mut buf = [0u8; READ_CHUNK];
        let read_error = loop {
            match stream.try_read(&mut buf) {
                Ok(0) => {
                    break Some(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "charger closed the connection",
                    ))
                }
                Ok(n) => self.reader.extend(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break None,
                Err(e) => break Some(e),
            }
        };
        if let Some(e) = read_error {
            self.fault(&e);
            return Err(SessionError::ConnectionLost(e));
        }

        loop {
            match self.reader.take_frame() {
                Ok(Some(payload)) => debug!("dropping queued {}-byte frame", payload.len()),
                Ok(None) => break,
                Err(e) => {
                    self.fault(&e);
                    return Err(e.into());
                }
            }
        }
        self.skip_next_frame = self.reader.buffered() > 0;
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Vec<u8>, SessionError> {
        let stream = self.stream.as_mut().ok_or(SessionError::NotConnected)?;
        let result = self.reader.next_frame(stream).await;
        match result {
            Ok(payload) => {
                debug!("received {}-byte frame", payload.len());
                Ok(payload)
            }
            Err(e) => {
                self.fault(&e);
                Err(e)
            }
        }
    }

    fn fault(&mut self, cause: &dyn std::fmt::Display) {
        warn!("session faulted: {cause}");
        self.stream = None;
        self.reader.clear();
        self.reply_outstanding = false;
        self.skip_next_frame = false;
        self.phase = SessionPhase::Faulted;
    }
}

/// Writes one whole frame within `limit`.
///
/// A write cut off by the limit may have left part of the frame on the wire,
/// so the caller must treat it like any other transport failure.
async fn write_frame<W>(writer: &mut W, frame: &[u8], limit: Duration) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match time::timeout(limit, writer.write_all(frame)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("frame write stalled for {limit:?}"),
        )),
    }
}

/// Sends the two handshake messages, discarding whatever the charger sends
/// back in between.
async fn handshake(
    stream: &mut TcpStream,
    requests: &RequestBuilder,
    config: &SessionConfig,
) -> io::Result<()> {
    let [hello, login] = requests.handshake();

    stream.write_all(&hello).await?;
    time::sleep(config.hello_settle).await;

    let mut ack = [0u8; READ_CHUNK];
    match time::timeout(config.hello_ack_timeout, stream.read(&mut ack)).await {
        Ok(Ok(0)) => return Err(closed_during_handshake()),
        Ok(Ok(n)) => debug!("discarded {n}-byte handshake acknowledgement"),
        Ok(Err(e)) => return Err(e),
        Err(_) => debug!("no handshake acknowledgement within {:?}", config.hello_ack_timeout),
    }

    stream.write_all(&login).await?;
    time::sleep(config.login_settle).await;
    discard_pending(stream).await
}

/// Drops any bytes already received without waiting for more.
async fn discard_pending(stream: &mut TcpStream) -> io::Result<()> {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match stream.try_read(&mut buf) {
            Ok(0) => return Err(closed_during_handshake()),
            Ok(n) => debug!("discarded {n}-byte login acknowledgement"),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

fn closed_during_handshake() -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "charger closed the connection during the handshake",
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────
