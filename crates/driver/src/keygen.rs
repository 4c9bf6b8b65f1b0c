use crate::core::KeyshareOutput;
use crate::driver::{index_inbound, resolve_recipient, Driver, DriverMessage, MessageBody, RoundHandler};
use crate::{DklsCore, Result};
use chrono::Utc;
use dkls_protocol::{
    control, Event, GroupId, GroupInfo, KeyshareRecord, PartyId, ProtocolMessage, Recipient,
    RoundNumber,
};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// Context a [`KeygenHandler`] needs to build a [`KeyshareRecord`]
/// once the run finishes; supplied by whatever owns the session
/// (it alone knows the live bearer token).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeygenContext {
    /// This party's identifier.
    pub party_id: PartyId,
    /// This party's 0-based index in the group.
    pub party_index: u16,
    /// Group this run belongs to.
    pub group_id: GroupId,
    /// Total parties in the group.
    pub total_parties: u16,
    /// Signing threshold.
    pub threshold: u16,
    /// Bearer token active for the session driving this run.
    pub api_key: String,
}

/// Drives a DKLS23 keygen (or key rotation) run to completion.
///
/// The final round's keyshare is held in `pending` until
/// `END:SUCCESS` arrives, at which point [`RoundHandler::finalize`]
/// emits `keygen-complete` and clears it.
pub struct KeygenHandler<C: DklsCore> {
    ctx: KeygenContext,
    pending: Option<KeyshareOutput>,
    _core: PhantomData<C>,
}

/// A [`Driver`] wired up to drive a keygen run.
pub type KeygenDriver<C> = Driver<KeygenHandler<C>>;

impl<C: DklsCore> KeygenHandler<C> {
    /// Build a handler for a fresh run bound to `ctx`.
    pub fn new(ctx: KeygenContext) -> Self {
        Self { ctx, pending: None, _core: PhantomData }
    }
}

fn to_driver_messages(
    group: &GroupInfo,
    round: RoundNumber,
    out: Vec<crate::core::DklsOutbound>,
) -> Result<Vec<DriverMessage>> {
    out.into_iter()
        .map(|m| {
            Ok(DriverMessage {
                to: resolve_recipient(group, m.to)?,
                round,
                body: MessageBody::Payload(m.body),
            })
        })
        .collect()
}

impl<C: DklsCore> RoundHandler for KeygenHandler<C> {
    type Core = C;

    fn handle_start_round(
        &mut self,
        core: &mut Self::Core,
        group: &GroupInfo,
    ) -> Result<Vec<DriverMessage>> {
        let out = core.create_first_message()?;
        to_driver_messages(group, RoundNumber::new(1)?, out)
    }

    fn process_round(
        &mut self,
        core: &mut Self::Core,
        group: &GroupInfo,
        own: &PartyId,
        round: RoundNumber,
        inbound: &[ProtocolMessage],
    ) -> Result<Vec<DriverMessage>> {
        match round.get() {
            1 | 2 | 3 => {
                let indexed = index_inbound(group, round, own, inbound)?;
                let out = core.handle_messages(round.get(), &indexed)?;
                to_driver_messages(group, round.next(), out)
            }
            4 => {
                let indexed = index_inbound(group, round, own, inbound)?;
                // The core's final call produces no further protocol
                // messages; its side effect is that `keyshare()` now
                // returns the finished share.
                core.handle_messages(round.get(), &indexed)?;
                self.pending = core.keyshare();
                Ok(vec![DriverMessage {
                    to: Recipient::Party(PartyId::server()),
                    round: RoundNumber::DONE,
                    body: MessageBody::Control(control::DONE.to_string()),
                }])
            }
            _ => Ok(Vec::new()),
        }
    }

    fn finalize(&mut self) -> Option<Event> {
        let output = self.pending.take()?;
        let record = KeyshareRecord {
            serialized: output.serialized,
            public_key: output.public_key,
            participants: self.ctx.total_parties,
            threshold: self.ctx.threshold,
            party_id: self.ctx.party_id.clone(),
            party_index: self.ctx.party_index,
            group_id: self.ctx.group_id.clone(),
            total_parties: self.ctx.total_parties,
            timestamp: Utc::now(),
            api_key: self.ctx.api_key.clone(),
        };
        Some(Event::KeygenComplete(record))
    }
}
