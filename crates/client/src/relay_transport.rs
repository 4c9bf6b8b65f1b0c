use crate::{Error, Result};
use dkls_protocol::{CryptoEnvelope, GroupId, PartyId, ProtocolMessage, Recipient};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::{CloseFrame, Message},
    MaybeTlsStream, WebSocketStream,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const QUEUE_CAP: usize = 100;

/// The three kinds of protocol run a connection can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    /// A fresh distributed key generation.
    Keygen,
    /// A signing run.
    Sign,
    /// A key rotation.
    Rotation,
}

impl ProtocolKind {
    fn as_path_segment(self) -> &'static str {
        match self {
            ProtocolKind::Keygen => "keygen",
            ProtocolKind::Sign => "sign",
            ProtocolKind::Rotation => "rotation",
        }
    }
}

/// Connection lifecycle state, mirroring spec's
/// `Disconnected -> Connecting -> Open -> Disconnected` machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket, nothing buffered beyond the send queue.
    Disconnected,
    /// Handshake in flight.
    Connecting,
    /// Ready to send and receive.
    Open,
}

/// Whether `msg` should be encrypted on the wire: every frame except
/// those originating at or addressed to the server, and except the
/// closing `DONE` control frame a party sends to the server.
pub fn should_encrypt(msg: &ProtocolMessage, key_set: bool) -> bool {
    key_set
        && !msg.from_id.is_server()
        && !(msg.content == "DONE" && matches!(&msg.to_id, Recipient::Party(p) if p.is_server()))
}

/// Encrypt `msg.content` in place under `envelope` when
/// [`should_encrypt`] holds. Shared by [`RelayTransport`] and
/// [`crate::testing::InMemoryTransport`] so both transports apply
/// identical wire semantics.
pub(crate) fn encrypt_if_needed(
    mut msg: ProtocolMessage,
    envelope: Option<&CryptoEnvelope>,
) -> Result<ProtocolMessage> {
    if should_encrypt(&msg, envelope.is_some()) {
        let envelope = envelope.expect("should_encrypt implies envelope is set");
        msg.content = envelope.encrypt_transport(msg.content.as_bytes())?;
    }
    Ok(msg)
}

/// Decrypt `msg.content` in place under `envelope` when
/// [`should_encrypt`] holds. Returns `None` when decryption fails,
/// meaning the frame must be silently dropped rather than surfaced.
pub(crate) fn decrypt_if_needed(
    mut msg: ProtocolMessage,
    envelope: Option<&CryptoEnvelope>,
) -> Option<ProtocolMessage> {
    if should_encrypt(&msg, envelope.is_some()) {
        let envelope = envelope.expect("checked by should_encrypt");
        match envelope.decrypt_transport(&msg.content) {
            Ok(plain) => {
                msg.content = String::from_utf8_lossy(&plain).into_owned();
                Some(msg)
            }
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecryptable frame");
                None
            }
        }
    } else {
        Some(msg)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IncomingFrame {
    Wrapped { #[allow(dead_code)] r#type: String, message: ProtocolMessage },
    Bare(ProtocolMessage),
}

/// Bidirectional relay channel for one `(group, protocol)` run.
///
/// Built on `tokio-tungstenite`, splitting connect/send/queue concerns
/// from the round-buffering concerns that live in `dkls-driver`.
pub struct RelayTransport {
    ws_url: String,
    group_id: GroupId,
    protocol: ProtocolKind,
    token: String,
    own_party_id: Option<PartyId>,
    envelope: Option<CryptoEnvelope>,
    state: ConnectionState,
    queue: VecDeque<ProtocolMessage>,
    socket: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

impl RelayTransport {
    /// Build a transport bound to `group_id`/`protocol`, not yet
    /// connected.
    pub fn new(
        ws_url: impl Into<String>,
        group_id: GroupId,
        protocol: ProtocolKind,
        token: impl Into<String>,
    ) -> Self {
        Self {
            ws_url: ws_url.into(),
            group_id,
            protocol,
            token: token.into(),
            own_party_id: None,
            envelope: None,
            state: ConnectionState::Disconnected,
            queue: VecDeque::new(),
            socket: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Record this party's own id, used for loop-prevention on
    /// receive.
    pub fn set_own_party_id(&mut self, party_id: PartyId) {
        self.own_party_id = Some(party_id);
    }

    /// Install the transport encryption key. Write-once per
    /// connection: a second call is a programmer error surfaced as
    /// `Fatal`, since it would silently re-key an in-flight run.
    pub fn set_encryption_key(&mut self, key: [u8; 32]) -> Result<()> {
        if self.envelope.is_some() {
            return Err(dkls_protocol::Error::Fatal(
                "encryption key is write-once per connection".into(),
            )
            .into());
        }
        self.envelope = Some(CryptoEnvelope::new(key));
        Ok(())
    }

    fn url(&self) -> String {
        format!(
            "{}/ws/{}/{}?token={}",
            self.ws_url,
            self.group_id,
            self.protocol.as_path_segment(),
            self.token
        )
    }

    /// Open the connection, failing with [`Error::ConnectTimeout`] if
    /// the handshake does not complete within 10 seconds. On success,
    /// flushes any messages queued while disconnected, in FIFO order.
    pub async fn connect(&mut self) -> Result<()> {
        self.state = ConnectionState::Connecting;
        let attempt = connect_async(self.url());
        let (socket, _response) = match tokio::time::timeout(CONNECT_TIMEOUT, attempt).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                self.state = ConnectionState::Disconnected;
                return Err(e.into());
            }
            Err(_) => {
                self.state = ConnectionState::Disconnected;
                return Err(Error::ConnectTimeout);
            }
        };
        self.socket = Some(socket);
        self.state = ConnectionState::Open;
        self.flush_queue().await?;
        Ok(())
    }

    async fn flush_queue(&mut self) -> Result<()> {
        while let Some(msg) = self.queue.pop_front() {
            self.write_now(msg).await?;
        }
        Ok(())
    }

    fn prepare_outbound(&self, msg: ProtocolMessage) -> Result<ProtocolMessage> {
        encrypt_if_needed(msg, self.envelope.as_ref())
    }

    async fn write_now(&mut self, msg: ProtocolMessage) -> Result<()> {
        let socket = self.socket.as_mut().expect("Open state implies a live socket");
        let json = serde_json::to_string(&msg)?;
        socket.send(Message::Text(json)).await?;
        Ok(())
    }

    /// Send `msg`. If the connection is `Open`, writes immediately;
    /// otherwise appends to the bounded send queue, dropping the
    /// oldest queued message on overflow.
    pub async fn send(&mut self, msg: ProtocolMessage) -> Result<()> {
        let prepared = self.prepare_outbound(msg)?;
        if self.state == ConnectionState::Open && self.socket.is_some() {
            self.write_now(prepared).await
        } else {
            if self.queue.len() >= QUEUE_CAP {
                tracing::warn!("send queue at capacity, dropping oldest message");
                self.queue.pop_front();
            }
            self.queue.push_back(prepared);
            Ok(())
        }
    }

    fn decode_frame(text: &str) -> Option<ProtocolMessage> {
        match serde_json::from_str::<IncomingFrame>(text) {
            Ok(IncomingFrame::Wrapped { message, .. }) => Some(message),
            Ok(IncomingFrame::Bare(message)) => Some(message),
            Err(e) => {
                tracing::warn!(error = %e, "dropping structurally invalid frame");
                None
            }
        }
    }

    /// Receive the next application-level message, applying loop
    /// prevention and decryption. Returns `Ok(None)` once the socket
    /// closes; invalid, reflected, or undecryptable frames are
    /// skipped internally rather than returned.
    pub async fn recv(&mut self) -> Result<Option<ProtocolMessage>> {
        loop {
            let socket = match self.socket.as_mut() {
                Some(s) => s,
                None => return Ok(None),
            };
            let next = match socket.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Binary(bytes))) => {
                    String::from_utf8_lossy(&bytes).into_owned()
                }
                Some(Ok(Message::Close(_))) | None => {
                    self.state = ConnectionState::Disconnected;
                    return Ok(None);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.state = ConnectionState::Disconnected;
                    return Err(e.into());
                }
            };

            let Some(msg) = Self::decode_frame(&next) else { continue };

            if let Some(own) = &self.own_party_id {
                if &msg.from_id == own {
                    continue;
                }
            }

            let Some(msg) = decrypt_if_needed(msg, self.envelope.as_ref()) else { continue };

            return Ok(Some(msg));
        }
    }

    /// Close the connection with normal-closure status, empty the
    /// send queue, and return to `Disconnected`. Idempotent.
    pub async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut socket) = self.socket.take() {
            let frame = CloseFrame {
                code: tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::Normal,
                reason: "".into(),
            };
            let _ = socket.close(Some(frame)).await;
        }
        self.queue.clear();
        self.state = ConnectionState::Disconnected;
        Ok(())
    }
}
