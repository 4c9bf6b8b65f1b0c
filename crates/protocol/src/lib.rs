//! Wire types, event bus, key/value storage and cryptographic
//! envelopes shared by the `dkls-driver` and `dkls-client` crates.

mod crypto_envelope;
mod error;
mod event;
mod group;
mod ids;
mod keyshare;
mod kv_store;
mod message;

pub use crypto_envelope::{open_at_rest, seal_at_rest, AtRestEnvelope, CryptoEnvelope};
pub use error::{Error, Result};
/// Re-exported so `dkls-client` can tag its `Error::Server` variant
/// with the same status-code type the relay's HTTP responses carry,
/// without taking its own direct `http` dependency.
pub use http::StatusCode;
pub use event::{Event, EventBus, SubscriptionId};
pub use group::{GroupInfo, GroupMember, GroupStatus};
pub use ids::{GroupId, PartyId, RoundNumber};
pub use keyshare::KeyshareRecord;
pub use kv_store::{KeyValueStore, MemoryStore};
pub use message::{control, ProtocolMessage, Recipient, RoundState};
