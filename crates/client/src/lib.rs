//! Relay-backed session client: composes registration, group
//! membership, the encrypted relay transport, keyshare persistence and
//! the round-buffering protocol drivers from `dkls-driver` into a
//! single observable [`Session`].

mod error;
mod keyshare_store;
mod relay_client;
mod relay_transport;
mod session;
mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{Error, Result};
pub use keyshare_store::KeyshareStore;
pub use relay_client::{generate_party_id, RelayClient, Registration};
pub use relay_transport::{ConnectionState, ProtocolKind, RelayTransport};
pub use session::Session;
pub use transport::Transport;
