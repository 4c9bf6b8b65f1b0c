use crate::driver::{index_inbound, resolve_recipient, Driver, DriverMessage, MessageBody, RoundHandler};
use crate::{DklsCore, Result};
use dkls_protocol::{control, Event, GroupInfo, PartyId, ProtocolMessage, Recipient, RoundNumber};
use std::marker::PhantomData;

/// Drives a DKLS23 signing run to completion.
///
/// Parallel structure to [`crate::KeygenHandler`]: the
/// final round's `(r, s)` pair is held in `pending` until
/// `END:SUCCESS` arrives, at which point [`RoundHandler::finalize`]
/// emits `signing-complete` and clears it.
pub struct SignHandler<C: DklsCore> {
    pending: Option<(Vec<u8>, Vec<u8>)>,
    _core: PhantomData<C>,
}

/// A [`Driver`] wired up to drive a signing run.
pub type SignDriver<C> = Driver<SignHandler<C>>;

impl<C: DklsCore> Default for SignHandler<C> {
    fn default() -> Self {
        Self { pending: None, _core: PhantomData }
    }
}

impl<C: DklsCore> SignHandler<C> {
    /// Build a handler for a fresh signing run.
    pub fn new() -> Self {
        Self::default()
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

impl<C: DklsCore> RoundHandler for SignHandler<C> {
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
                core.handle_messages(round.get(), &indexed)?;
                self.pending = core.signature();
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
        let (r, s) = self.pending.take()?;
        Some(Event::SigningComplete { r, s })
    }
}
