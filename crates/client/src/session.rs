use crate::relay_client::generate_party_id;
use crate::relay_transport::{ProtocolKind, RelayTransport};
use crate::transport::{Transport, TransportBackend};
use crate::{Error, KeyshareStore, RelayClient, Result};
use dkls_driver::{
    DklsCoreFactory, Driver, DriverMessage, DriverSignal, KeygenContext, KeygenDriver,
    KeygenHandler, MessageBody, SignDriver, SignHandler,
};
use dkls_protocol::{
    Event, EventBus, GroupId, GroupInfo, KeyshareRecord, PartyId, ProtocolMessage,
};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

enum Run<F: DklsCoreFactory> {
    Keygen(KeygenDriver<F::Core>),
    Sign(SignDriver<F::Core>),
}

/// Orchestrates one party's lifecycle across registration, group
/// membership, and keygen/signing runs: installs the matching
/// `dkls-driver` driver, bridges its signals into `Event`s, and
/// persists finished keyshares.
///
/// Generic over the crypto core factory so the same façade drives
/// either the real DKLS23 implementation or
/// [`dkls_driver::testing::MockCore`] in tests.
pub struct Session<F: DklsCoreFactory> {
    relay: RelayClient,
    backend: TransportBackend,
    factory: F,
    store: KeyshareStore,
    events: Arc<EventBus>,
    party_id: Option<PartyId>,
    token: Option<String>,
    group: Option<GroupInfo>,
    transport: Option<Transport>,
    run: Option<Run<F>>,
}

impl<F: DklsCoreFactory> Session<F> {
    /// Build a session against `http_url`/`ws_url`, using `factory` to
    /// construct crypto cores and `store` to persist keyshares.
    pub fn new(
        http_url: impl Into<String>,
        ws_url: impl Into<String>,
        factory: F,
        store: KeyshareStore,
        events: Arc<EventBus>,
    ) -> Result<Self> {
        Ok(Self {
            relay: RelayClient::new(http_url, DEFAULT_HTTP_TIMEOUT)?,
            backend: TransportBackend::Relay(ws_url.into()),
            factory,
            store,
            events,
            party_id: None,
            token: None,
            group: None,
            transport: None,
            run: None,
        })
    }

    /// Build a session for tests, wired directly to a
    /// [`crate::testing::MockBroker`] in place of a real relay
    /// connection and seeded with already-known registration and
    /// group state.
    ///
    /// There is no in-process double for the relay's HTTP endpoints
    /// (the real relay server is out of scope), so this bypasses
    /// `register`/`create_group`/`join_group` rather than faking them;
    /// it exercises exactly the connected-protocol-run behavior the
    /// spec's test scenarios describe.
    #[cfg(any(test, feature = "testing"))]
    pub fn new_for_test(
        broker: Arc<crate::testing::MockBroker>,
        factory: F,
        store: KeyshareStore,
        events: Arc<EventBus>,
        party_id: PartyId,
        token: String,
        group: GroupInfo,
    ) -> Result<Self> {
        Ok(Self {
            relay: RelayClient::new("http://unused.invalid", DEFAULT_HTTP_TIMEOUT)?,
            backend: TransportBackend::Mock(broker),
            factory,
            store,
            events,
            party_id: Some(party_id),
            token: Some(token),
            group: Some(group),
            transport: None,
            run: None,
        })
    }

    fn require_token(&self) -> Result<&str> {
        self.token.as_deref().ok_or(Error::SessionUninitialized)
    }

    fn require_party_id(&self) -> Result<&PartyId> {
        self.party_id.as_ref().ok_or(Error::SessionUninitialized)
    }

    fn require_group(&self) -> Result<&GroupInfo> {
        self.group.as_ref().ok_or(Error::SessionUninitialized)
    }

    /// Bring the session up. There is no crypto core to warm ahead of
    /// time (one is built per run by `factory`), so this only
    /// announces readiness.
    pub fn initialize(&mut self) {
        self.events.emit(&Event::Initialized);
    }

    /// Register a freshly generated [`PartyId`] with the relay,
    /// obtaining the bearer token used for every later request.
    pub async fn register(&mut self) -> Result<PartyId> {
        let candidate = generate_party_id();
        let registration = self.relay.register(candidate).await?;
        self.party_id = Some(registration.party_id.clone());
        self.token = Some(registration.token);
        self.events.emit(&Event::Registered(registration.party_id.clone()));
        Ok(registration.party_id)
    }

    /// Create a fresh group with the given threshold and party count.
    pub async fn create_group(
        &mut self,
        t: u16,
        n: u16,
        timeout_minutes: u32,
    ) -> Result<GroupInfo> {
        let token = self.require_token()?.to_string();
        let group = self
            .relay
            .create_group(&token, GroupId::generate(), n, t, timeout_minutes)
            .await?;
        self.group = Some(group.clone());
        self.events.emit(&Event::GroupCreated(group.clone()));
        Ok(group)
    }

    /// Join an existing group.
    pub async fn join_group(&mut self, group_id: GroupId) -> Result<GroupInfo> {
        let token = self.require_token()?.to_string();
        let group = self.relay.join_group(&token, group_id).await?;
        self.group = Some(group.clone());
        self.events.emit(&Event::GroupJoined(group.clone()));
        Ok(group)
    }

    async fn open_transport(&mut self, protocol: ProtocolKind, key: [u8; 32]) -> Result<()> {
        let group = self.require_group()?.clone();
        let token = self.require_token()?.to_string();
        let own = self.require_party_id()?.clone();

        let transport = match &self.backend {
            TransportBackend::Relay(ws_url) => {
                let mut t = RelayTransport::new(ws_url.clone(), group.group_id, protocol, token);
                t.set_own_party_id(own);
                t.set_encryption_key(key)?;
                t.connect().await?;
                Transport::Relay(t)
            }
            #[cfg(any(test, feature = "testing"))]
            TransportBackend::Mock(broker) => {
                let mut t = broker.register(own.clone());
                t.set_own_party_id(own);
                t.set_encryption_key(key)?;
                Transport::Mock(t)
            }
        };
        self.transport = Some(transport);
        self.events.emit(&Event::Connected);
        Ok(())
    }

    /// Start a keygen or, when `existing` is provided, a key rotation
    /// run. `existing` supplies the prior keyshare to rotate from;
    /// its absence selects fresh distributed key generation.
    pub async fn start_keygen(
        &mut self,
        distributed: bool,
        existing: Option<KeyshareRecord>,
        encryption_key: [u8; 32],
    ) -> Result<()> {
        let group = self.require_group()?.clone();
        let own = self.require_party_id()?.clone();
        let token = self.require_token()?.to_string();
        let party_index = group.index_of(&own).ok_or_else(|| {
            dkls_protocol::Error::Fatal("own party is not a group member".into())
        })?;

        let protocol =
            if existing.is_some() { ProtocolKind::Rotation } else { ProtocolKind::Keygen };
        self.open_transport(protocol, encryption_key).await?;

        let core = match &existing {
            Some(record) => {
                self.factory.init_key_rotation(&record.serialized, None, distributed)?
            }
            None => {
                let group_id_bytes = hex::decode(group.group_id.as_str()).map_err(|e| {
                    dkls_protocol::Error::Fatal(format!("group id is not valid hex: {e}"))
                })?;
                self.factory.new_keygen_session(
                    group.total_parties,
                    group.threshold,
                    party_index,
                    &group_id_bytes,
                    None,
                    distributed,
                )?
            }
        };

        let ctx = KeygenContext {
            party_id: own.clone(),
            party_index,
            group_id: group.group_id.clone(),
            total_parties: group.total_parties,
            threshold: group.threshold,
            api_key: token,
        };
        let driver = Driver::new(own, group.clone(), KeygenHandler::new(ctx), core);
        self.run = Some(Run::Keygen(driver));
        self.events.emit(&Event::KeygenStarted(group.group_id));
        Ok(())
    }

    /// Start a signing run over `message_hash` using `keyshare`.
    pub async fn start_signing(
        &mut self,
        message_hash: [u8; 32],
        keyshare: &KeyshareRecord,
        encryption_key: [u8; 32],
    ) -> Result<()> {
        let group = self.require_group()?.clone();
        let own = self.require_party_id()?.clone();

        self.open_transport(ProtocolKind::Sign, encryption_key).await?;

        let core = self.factory.new_sign_session(&keyshare.serialized, message_hash, None, true)?;
        let driver = Driver::new(own, group.clone(), SignHandler::new(), core);
        self.run = Some(Run::Sign(driver));
        self.events.emit(&Event::SigningStarted(group.group_id));
        Ok(())
    }

    fn stamp(group_id: &GroupId, own: &PartyId, msg: DriverMessage) -> ProtocolMessage {
        let content = match msg.body {
            MessageBody::Control(s) => s,
            MessageBody::Payload(bytes) => {
                use base64::engine::general_purpose::STANDARD as BASE64;
                use base64::Engine;
                BASE64.encode(bytes)
            }
        };
        ProtocolMessage::new(group_id.clone(), own.clone(), msg.to, content, msg.round)
    }

    /// Persist a finished keyshare without aborting the run on
    /// failure: the caller keeps the in-memory share either way.
    async fn persist_keygen_result(&mut self, record: &KeyshareRecord) {
        let rotation = matches!(self.run, Some(Run::Keygen(_)))
            && self.store.load(&record.group_id, record.party_index).await.is_ok();
        if let Err(e) = self.store.save(record, rotation).await {
            tracing::warn!(error = %e, "failed to persist finished keyshare");
            self.events.emit(&Event::Error(format!("keyshare persistence failed: {e}")));
        }
    }

    /// Drive the pump one step: receive a single relay message, feed
    /// it to the installed driver, send any resulting messages, and
    /// report the resulting event (if any). Returns `Ok(None)` once
    /// the transport has closed, and keeps looping internally past
    /// messages that produce no reportable signal.
    pub async fn next_event(&mut self) -> Result<Option<Event>> {
        loop {
            let Some(msg) = self.recv_next().await? else {
                return Ok(None);
            };

            let group_id = msg.group_id.clone();
            let own = self.require_party_id()?.clone();

            let (outbound, signal) = match self.run.as_mut() {
                Some(Run::Keygen(driver)) => driver.process_message(msg)?,
                Some(Run::Sign(driver)) => driver.process_message(msg)?,
                None => continue,
            };

            let stamped: Vec<ProtocolMessage> =
                outbound.into_iter().map(|m| Self::stamp(&group_id, &own, m)).collect();
            if let Some(transport) = self.transport.as_mut() {
                for msg in stamped.clone() {
                    transport.send(msg).await?;
                }
            }

            match signal {
                DriverSignal::None => continue,
                DriverSignal::RoundCompleted(round) => {
                    let event = Event::RoundComplete { round, messages: stamped };
                    self.events.emit(&event);
                    return Ok(Some(event));
                }
                DriverSignal::Terminal(event) => {
                    if let Event::KeygenComplete(record) = &event {
                        self.persist_keygen_result(record).await;
                    }
                    self.run = None;
                    self.events.emit(&event);
                    return Ok(Some(event));
                }
            }
        }
    }

    async fn recv_next(&mut self) -> Result<Option<ProtocolMessage>> {
        let transport = match self.transport.as_mut() {
            Some(t) => t,
            None => return Ok(None),
        };
        match transport.recv().await? {
            Some(msg) => Ok(Some(msg)),
            None => {
                self.events.emit(&Event::Disconnected);
                Ok(None)
            }
        }
    }

    /// Idempotently tear the session down: closes the transport,
    /// destroys any in-flight driver, and clears group/registration
    /// state so a fresh `register`/`create_group` cycle can follow.
    pub async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut transport) = self.transport.take() {
            transport.disconnect().await?;
        }
        self.run = None;
        self.events.emit(&Event::Disconnected);
        Ok(())
    }
}
