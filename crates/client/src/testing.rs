//! In-process relay double used by this crate's own tests and by
//! `integration_tests`. Never wired into a production code path.
//!
//! There is no in-process double for the relay's HTTP endpoints (the
//! real relay server is out of scope); tests seed a [`crate::Session`]
//! directly via [`crate::Session::new_for_test`] with already-known
//! registration and group state, and use [`MockBroker`] only to shuttle
//! the connected protocol run's messages between parties.

use crate::relay_transport::{decrypt_if_needed, encrypt_if_needed};
use crate::Result;
use dkls_driver::testing::MockCore;
use dkls_driver::{DklsCoreFactory, Error as DriverError, Result as DriverResult};
use dkls_protocol::{
    CryptoEnvelope, Error as ProtocolError, GroupId, PartyId, ProtocolMessage, Recipient,
    RoundNumber,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

struct BrokerState {
    members: HashMap<PartyId, mpsc::UnboundedSender<ProtocolMessage>>,
    taps: HashMap<PartyId, Vec<mpsc::UnboundedSender<ProtocolMessage>>>,
    reflect: bool,
}

/// An in-memory stand-in for the relay server's message-routing half:
/// broadcasts and point-to-point sends are fanned out to registered
/// [`InMemoryTransport`]s exactly as a real relay would forward them,
/// with no HTTP or socket layer involved.
pub struct MockBroker {
    state: Mutex<BrokerState>,
}

impl MockBroker {
    /// Build an empty broker.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BrokerState {
                members: HashMap::new(),
                taps: HashMap::new(),
                reflect: false,
            }),
        })
    }

    /// When set, broadcast and point-to-point sends are also delivered
    /// back to their own sender, modeling a relay that reflects a
    /// party's own traffic. Loop prevention then depends entirely on
    /// the transport layer, exactly as it must against a real relay.
    pub fn set_reflect(&self, reflect: bool) {
        self.state.lock().unwrap().reflect = reflect;
    }

    /// Register `party_id`, returning the transport endpoint it should
    /// use to send and receive.
    pub fn register(self: &Arc<Self>, party_id: PartyId) -> InMemoryTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().unwrap().members.insert(party_id, tx);
        InMemoryTransport { broker: self.clone(), own_party_id: None, envelope: None, rx }
    }

    fn route(&self, msg: ProtocolMessage) {
        let state = self.state.lock().unwrap();
        match &msg.to_id {
            Recipient::Broadcast => {
                for (party_id, tx) in state.members.iter() {
                    if party_id == &PartyId::server() {
                        continue;
                    }
                    if party_id == &msg.from_id && !state.reflect {
                        continue;
                    }
                    let _ = tx.send(msg.clone());
                    Self::notify_taps(&state, party_id, &msg);
                }
            }
            Recipient::Party(target) => {
                if target == &msg.from_id && !state.reflect {
                    return;
                }
                if let Some(tx) = state.members.get(target) {
                    let _ = tx.send(msg.clone());
                }
                Self::notify_taps(&state, target, &msg);
            }
        }
    }

    fn notify_taps(state: &BrokerState, target: &PartyId, msg: &ProtocolMessage) {
        if let Some(taps) = state.taps.get(target) {
            for tx in taps {
                let _ = tx.send(msg.clone());
            }
        }
    }

    /// Observe every message the broker delivers to `party_id`,
    /// without consuming it from that party's own transport. Used to
    /// capture real traffic for later [`MockBroker::replay_to`] calls.
    pub fn tap(self: &Arc<Self>, party_id: &PartyId) -> mpsc::UnboundedReceiver<ProtocolMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().unwrap().taps.entry(party_id.clone()).or_default().push(tx);
        rx
    }

    /// Deliver a server-originated control frame (`START`/`END:*`) to
    /// every registered party.
    pub fn broadcast_control(
        &self,
        group_id: &GroupId,
        content: impl Into<String>,
        round: RoundNumber,
    ) {
        let msg =
            ProtocolMessage::new(group_id.clone(), PartyId::server(), Recipient::Broadcast, content, round);
        self.route(msg);
    }

    /// Redeliver `msg` to `to` `times` times, modeling relay-side
    /// duplicate delivery independent of anything a sender did.
    pub fn replay_to(&self, to: &PartyId, msg: ProtocolMessage, times: usize) {
        let state = self.state.lock().unwrap();
        if let Some(tx) = state.members.get(to) {
            for _ in 0..times {
                let _ = tx.send(msg.clone());
            }
        }
    }
}

/// The [`MockBroker`]-backed counterpart to [`crate::RelayTransport`]:
/// same encryption and loop-prevention behavior, with an in-process
/// channel standing in for the websocket.
pub struct InMemoryTransport {
    broker: Arc<MockBroker>,
    own_party_id: Option<PartyId>,
    envelope: Option<CryptoEnvelope>,
    rx: mpsc::UnboundedReceiver<ProtocolMessage>,
}

impl InMemoryTransport {
    /// Record this party's own id for loop prevention.
    pub fn set_own_party_id(&mut self, party_id: PartyId) {
        self.own_party_id = Some(party_id);
    }

    /// Install the transport encryption key; write-once, mirroring
    /// [`crate::RelayTransport::set_encryption_key`].
    pub fn set_encryption_key(&mut self, key: [u8; 32]) -> Result<()> {
        if self.envelope.is_some() {
            return Err(ProtocolError::Fatal(
                "encryption key is write-once per connection".into(),
            )
            .into());
        }
        self.envelope = Some(CryptoEnvelope::new(key));
        Ok(())
    }

    /// Send `msg`, applying the same encryption rules as
    /// [`crate::RelayTransport::send`]. Public so test harnesses can
    /// drive a bare `InMemoryTransport` standing in for the relay
    /// server, not just one owned by a [`crate::Session`].
    pub async fn send(&mut self, msg: ProtocolMessage) -> Result<()> {
        let prepared = encrypt_if_needed(msg, self.envelope.as_ref())?;
        self.broker.route(prepared);
        Ok(())
    }

    /// Receive the next message, applying loop prevention and
    /// decryption exactly as [`crate::RelayTransport::recv`] does.
    pub async fn recv(&mut self) -> Result<Option<ProtocolMessage>> {
        loop {
            let Some(msg) = self.rx.recv().await else { return Ok(None) };
            if let Some(own) = &self.own_party_id {
                if &msg.from_id == own {
                    continue;
                }
            }
            match decrypt_if_needed(msg, self.envelope.as_ref()) {
                Some(msg) => return Ok(Some(msg)),
                None => continue,
            }
        }
    }

    /// Close the receiving half; idempotent.
    pub async fn disconnect(&mut self) -> Result<()> {
        self.rx.close();
        Ok(())
    }
}

/// `MockCore`'s marker payloads are `"mock:{mode}:p{index}:r{round}"`;
/// recover the participant index so rotation/signing can resume the
/// same mock identity a keygen run produced.
fn parse_mock_index(serialized: &[u8]) -> DriverResult<usize> {
    let marker = String::from_utf8_lossy(serialized);
    marker
        .split(':')
        .nth(2)
        .and_then(|segment| segment.strip_prefix('p'))
        .and_then(|digits| digits.parse::<usize>().ok())
        .ok_or_else(|| {
            DriverError::Protocol(ProtocolError::CorruptData(
                "mock keyshare marker missing party index".into(),
            ))
        })
}

/// Builds [`MockCore`] instances keyed by participant index, standing
/// in for a real `DklsCoreFactory` wherever tests need a session
/// driven end-to-end without the actual DKLS23 cryptography.
#[derive(Debug, Clone, Copy, Default)]
pub struct TestCoreFactory;

impl DklsCoreFactory for TestCoreFactory {
    type Core = MockCore;

    fn new_keygen_session(
        &self,
        _n: u16,
        _t: u16,
        party_index: u16,
        _group_id: &[u8],
        _seed: Option<[u8; 32]>,
        _distributed: bool,
    ) -> DriverResult<Self::Core> {
        Ok(MockCore::keygen(party_index as usize))
    }

    fn init_key_rotation(
        &self,
        old_keyshare: &[u8],
        _seed: Option<[u8; 32]>,
        _distributed: bool,
    ) -> DriverResult<Self::Core> {
        Ok(MockCore::keygen(parse_mock_index(old_keyshare)?))
    }

    fn new_sign_session(
        &self,
        keyshare: &[u8],
        _message_hash: [u8; 32],
        _seed: Option<[u8; 32]>,
        _distributed: bool,
    ) -> DriverResult<Self::Core> {
        Ok(MockCore::sign(parse_mock_index(keyshare)?))
    }
}
