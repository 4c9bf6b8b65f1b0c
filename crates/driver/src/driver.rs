use crate::hash::rolling_hash32;
use crate::{DklsCore, Result};
use dkls_protocol::{
    control, Error, Event, GroupInfo, PartyId, ProtocolMessage, Recipient, RoundNumber,
    RoundState,
};
use std::collections::{HashMap, HashSet};

/// Body of a message a driver wants to send, before it is wrapped
/// into a wire [`ProtocolMessage`].
///
/// Control frames travel in the clear; payload frames are the crypto
/// core's opaque bytes and are base64-encoded (and, on the wire,
/// encrypted) by whatever owns the transport.
#[derive(Debug, Clone)]
pub enum MessageBody {
    /// A plaintext control frame body (`"START"`, `"DONE"`, ...).
    Control(String),
    /// Opaque bytes produced by the crypto core for a protocol round.
    Payload(Vec<u8>),
}

/// A message emitted by a driver, addressed by [`Recipient`] and
/// still missing the envelope fields (group id, sender, timestamp)
/// that only the owning session can fill in.
#[derive(Debug, Clone)]
pub struct DriverMessage {
    /// Destination of this message.
    pub to: Recipient,
    /// Round this message belongs to.
    pub round: RoundNumber,
    /// Message content.
    pub body: MessageBody,
}

/// What happened as a result of feeding one message into a [`Driver`].
///
/// Round completion is reported as a signal rather than a ready-made
/// [`Event::RoundComplete`] because the driver only has unaddressed
/// [`DriverMessage`]s; only the owning session knows the group id,
/// sender and timestamp needed to stamp a full [`ProtocolMessage`]
/// for the event payload.
#[derive(Debug, Clone)]
pub enum DriverSignal {
    /// Nothing notable happened.
    None,
    /// `round` finished processing for the first time.
    RoundCompleted(RoundNumber),
    /// A terminal lifecycle event (`keygen-complete`, `signing-complete`
    /// or `error`) fired.
    Terminal(Event),
}

/// Per-protocol hooks a [`Driver`] delegates to.
///
/// Implemented by [`crate::KeygenDriver`] and [`crate::SignDriver`];
/// the shared round-buffering, deduplication and lifecycle machinery
/// in [`Driver`] is identical for both.
pub trait RoundHandler: Send {
    /// Crypto core type this handler drives.
    type Core: DklsCore;

    /// Produce this party's round-0 outbound messages.
    fn handle_start_round(
        &mut self,
        core: &mut Self::Core,
        group: &GroupInfo,
    ) -> Result<Vec<DriverMessage>>;

    /// Hand a fully buffered round to the crypto core and produce the
    /// messages for the next round (or the closing `DONE` frame).
    fn process_round(
        &mut self,
        core: &mut Self::Core,
        group: &GroupInfo,
        own: &PartyId,
        round: RoundNumber,
        inbound: &[ProtocolMessage],
    ) -> Result<Vec<DriverMessage>>;

    /// Called once, when `END:SUCCESS` arrives, to hand back the
    /// completion event for whatever result this handler accumulated.
    /// Returns `None` if there is nothing pending (e.g. called twice).
    fn finalize(&mut self) -> Option<Event>;
}

/// Whether a message at `round` addressed to `to` is relevant to
/// `own` under the wasm-adapter-style filtering rule:
/// rounds 1 and 4 are broadcast rounds; rounds 2 and 3 are
/// point-to-point and keep only messages addressed to `own` or to the
/// broadcast recipient.
pub fn is_relevant(round: RoundNumber, own: &PartyId, msg: &ProtocolMessage) -> bool {
    match round.get() {
        2 | 3 => matches!(&msg.to_id, Recipient::Broadcast) || msg.to_id.party() == Some(own),
        _ => true,
    }
}

/// Resolve a round's buffered messages into the `(participant index,
/// opaque bytes)` pairs the crypto core expects, applying the
/// broadcast/point-to-point filter and rejecting senders who are not
/// members of the group.
pub fn index_inbound(
    group: &GroupInfo,
    round: RoundNumber,
    own: &PartyId,
    buffered: &[ProtocolMessage],
) -> Result<Vec<(usize, Vec<u8>)>> {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine;

    let mut out = Vec::with_capacity(buffered.len());
    for msg in buffered.iter().filter(|m| is_relevant(round, own, m)) {
        let index = group.index_of(&msg.from_id).ok_or_else(|| {
            Error::InvalidMessage(format!(
                "sender {} is not a member of group {}",
                msg.from_id, msg.group_id
            ))
        })?;
        let body = BASE64
            .decode(&msg.content)
            .map_err(|e| Error::InvalidMessage(format!("bad base64 round payload: {e}")))?;
        out.push((index as usize, body));
    }
    Ok(out)
}

/// Resolve a crypto-core-addressed outbound message back to a
/// [`Recipient`], rejecting indices outside the group.
pub fn resolve_recipient(group: &GroupInfo, to: Option<usize>) -> Result<Recipient> {
    match to {
        None => Ok(Recipient::Broadcast),
        Some(i) => {
            let index = u16::try_from(i)
                .map_err(|_| Error::InvalidMessage(format!("participant index {i} out of range")))?;
            group
                .party_at(index)
                .cloned()
                .map(Recipient::Party)
                .ok_or_else(|| {
                    Error::InvalidMessage(format!(
                        "participant index {index} has no member in group {}",
                        group.group_id
                    ))
                })
                .map_err(Into::into)
        }
    }
}

/// Expected number of inbound messages for a protocol round: `n - 1`
/// for rounds 1-4 (one per other party), 0 for round 5.
fn expected_count(group: &GroupInfo, round: RoundNumber) -> usize {
    if round.is_protocol_round() {
        group.expected_peer_count()
    } else {
        0
    }
}

/// Generic round-buffering, deduplicating state machine shared by
/// every DKLS23 protocol driver.
///
/// Tracks `current_round` (`-1` uninitialized, `0` started but not
/// yet advanced, `1..=5` mid-protocol), per-round message buffers,
/// and a rolling set of seen message hashes, and delegates the actual
/// crypto-core calls to a [`RoundHandler`].
pub struct Driver<H: RoundHandler> {
    own_party_id: PartyId,
    group: GroupInfo,
    current_round: i32,
    is_complete: bool,
    round_states: HashMap<u8, RoundState>,
    seen_hashes: HashSet<u32>,
    handler: H,
    core: H::Core,
}

impl<H: RoundHandler> Driver<H> {
    /// Build a driver bound to `group`, starting uninitialized.
    pub fn new(own_party_id: PartyId, group: GroupInfo, handler: H, core: H::Core) -> Self {
        Self {
            own_party_id,
            group,
            current_round: -1,
            is_complete: false,
            round_states: HashMap::new(),
            seen_hashes: HashSet::new(),
            handler,
            core,
        }
    }

    /// Whether `END:SUCCESS` (or a terminal failure) has already been
    /// observed; once true, every further message is dropped.
    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    fn dedup_hash(msg: &ProtocolMessage) -> u32 {
        let key = format!("{}:{}:{}:{}", msg.from_id, msg.to_id, msg.round.get(), msg.content);
        rolling_hash32(&key)
    }

    /// Process one inbound message, returning the outbound messages
    /// it produced (if any) alongside a [`DriverSignal`] describing
    /// any lifecycle event the caller should publish.
    pub fn process_message(
        &mut self,
        msg: ProtocolMessage,
    ) -> Result<(Vec<DriverMessage>, DriverSignal)> {
        if self.is_complete {
            return Ok((Vec::new(), DriverSignal::None));
        }

        if msg.round.is_start() && control::is_start(&msg.content) {
            if self.current_round != -1 {
                return Ok((Vec::new(), DriverSignal::None));
            }
            self.current_round = 0;
            let out = self.handler.handle_start_round(&mut self.core, &self.group)?;
            self.current_round = 1;
            self.round_states.entry(1).or_insert_with(RoundState::new);
            return Ok((out, DriverSignal::RoundCompleted(RoundNumber::START)));
        }

        if msg.round.is_start() {
            if let Some(status) = control::end_status(&msg.content) {
                if msg.from_id.is_server() {
                    if self.current_round == -1 {
                        // An END arriving before any round has started has no
                        // run to terminate.
                        return Ok((Vec::new(), DriverSignal::None));
                    }
                    self.is_complete = true;
                    let completion = self.handler.finalize();
                    if status != control::SUCCESS {
                        let message = format!("process ended with status: {status}");
                        tracing::warn!(status, "protocol run ended with non-success status");
                        return Ok((Vec::new(), DriverSignal::Terminal(Event::Error(message))));
                    }
                    return Ok((
                        Vec::new(),
                        completion
                            .map(DriverSignal::Terminal)
                            .unwrap_or(DriverSignal::None),
                    ));
                }
            }
            return Ok((Vec::new(), DriverSignal::None));
        }

        if self.current_round == -1 {
            return Ok((Vec::new(), DriverSignal::None));
        }
        if msg.from_id == self.own_party_id {
            return Ok((Vec::new(), DriverSignal::None));
        }

        let digest = Self::dedup_hash(&msg);
        if !self.seen_hashes.insert(digest) {
            return Ok((Vec::new(), DriverSignal::None));
        }

        let round = msg.round;
        let state = self.round_states.entry(round.get()).or_insert_with(RoundState::new);
        state.buffered.push(msg);

        let expected = expected_count(&self.group, round);
        if state.buffered.len() < expected || state.processed {
            return Ok((Vec::new(), DriverSignal::None));
        }
        state.processed = true;
        let buffered = state.buffered.clone();

        match self.handler.process_round(&mut self.core, &self.group, &self.own_party_id, round, &buffered)
        {
            Ok(out) => {
                let already_emitted =
                    self.round_states.get(&round.get()).map(|s| s.emitted).unwrap_or(false);
                if !round.is_done() {
                    self.current_round = round.get() as i32 + 1;
                    self.round_states.entry(round.next().get()).or_insert_with(RoundState::new);
                }
                let signal = if already_emitted {
                    DriverSignal::None
                } else {
                    if let Some(state) = self.round_states.get_mut(&round.get()) {
                        state.emitted = true;
                    }
                    DriverSignal::RoundCompleted(round)
                };
                Ok((out, signal))
            }
            Err(e) => {
                if let Some(state) = self.round_states.get_mut(&round.get()) {
                    state.processed = false;
                }
                Err(e)
            }
        }
    }

    /// Tear the driver down: clears every buffer so it can be
    /// dropped without retaining protocol state.
    pub fn destroy(&mut self) {
        self.round_states.clear();
        self.seen_hashes.clear();
        self.is_complete = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCore;
    use crate::keygen::{KeygenContext, KeygenHandler};
    use base64::Engine;
    use dkls_protocol::{GroupId, GroupMember, GroupStatus};

    fn party(byte: &str) -> PartyId {
        ("02".to_string() + &byte.repeat(64)).parse().unwrap()
    }

    fn two_party_group() -> (GroupInfo, PartyId, PartyId) {
        let a = party("a");
        let b = party("b");
        let group = GroupInfo {
            group_id: GroupId::generate(),
            threshold: 2,
            total_parties: 2,
            timeout_minutes: 10,
            members: vec![
                GroupMember { party_id: a.clone(), index: 0 },
                GroupMember { party_id: b.clone(), index: 1 },
            ],
            created_by: a.clone(),
            status: GroupStatus::Ready,
        };
        (group, a, b)
    }

    fn keygen_driver(group: &GroupInfo, own: &PartyId, index: u16) -> Driver<KeygenHandler<MockCore>> {
        let ctx = KeygenContext {
            party_id: own.clone(),
            party_index: index,
            group_id: group.group_id.clone(),
            total_parties: group.total_parties,
            threshold: group.threshold,
            api_key: "token".into(),
        };
        Driver::new(own.clone(), group.clone(), KeygenHandler::new(ctx), MockCore::keygen(index as usize))
    }

    #[test]
    fn end_before_start_is_ignored() {
        let (group, a, _b) = two_party_group();
        let mut driver = keygen_driver(&group, &a, 0);
        let end = ProtocolMessage::new(
            group.group_id.clone(),
            PartyId::server(),
            Recipient::Broadcast,
            "END:SUCCESS",
            RoundNumber::START,
        );
        let (out, signal) = driver.process_message(end).unwrap();
        assert!(out.is_empty());
        assert!(matches!(signal, DriverSignal::None));
        assert!(!driver.is_complete());
    }

    #[test]
    fn duplicate_delivery_is_idempotent() {
        let (group, a, b) = two_party_group();
        let mut driver = keygen_driver(&group, &a, 0);

        let start = ProtocolMessage::new(
            group.group_id.clone(),
            PartyId::server(),
            Recipient::Broadcast,
            control::START,
            RoundNumber::START,
        );
        driver.process_message(start).unwrap();

        let payload = base64::engine::general_purpose::STANDARD.encode(b"round-1-from-b");
        let msg = ProtocolMessage::new(
            group.group_id.clone(),
            b.clone(),
            Recipient::Broadcast,
            payload,
            RoundNumber::new(1).unwrap(),
        );

        let (out1, signal1) = driver.process_message(msg.clone()).unwrap();
        let (out2, signal2) = driver.process_message(msg).unwrap();
        assert!(!out1.is_empty());
        assert!(out2.is_empty());
        assert!(matches!(signal1, DriverSignal::RoundCompleted(_)));
        assert!(matches!(signal2, DriverSignal::None));
    }

    #[test]
    fn messages_from_self_are_dropped() {
        let (group, a, _b) = two_party_group();
        let mut driver = keygen_driver(&group, &a, 0);
        let start = ProtocolMessage::new(
            group.group_id.clone(),
            PartyId::server(),
            Recipient::Broadcast,
            control::START,
            RoundNumber::START,
        );
        driver.process_message(start).unwrap();

        let payload = base64::engine::general_purpose::STANDARD.encode(b"x");
        let from_self = ProtocolMessage::new(
            group.group_id.clone(),
            a.clone(),
            Recipient::Broadcast,
            payload,
            RoundNumber::new(1).unwrap(),
        );
        let (out, signal) = driver.process_message(from_self).unwrap();
        assert!(out.is_empty());
        assert!(matches!(signal, DriverSignal::None));
    }
}
