use crate::relay_transport::RelayTransport;
use crate::Result;
use dkls_protocol::ProtocolMessage;
#[cfg(any(test, feature = "testing"))]
use std::sync::Arc;

/// Where a [`crate::Session`] opens its transport connections.
///
/// Production sessions always use `Relay`; `Mock` is only reachable
/// through [`crate::Session::new_for_test`].
pub(crate) enum TransportBackend {
    Relay(String),
    #[cfg(any(test, feature = "testing"))]
    Mock(Arc<crate::testing::MockBroker>),
}

/// A live connection a [`crate::Session`] drives messages over.
///
/// Modeled as an enum over the concrete transport kinds, in the
/// teacher's `Transport` enum-over-variants style, rather than a
/// trait object: a session only ever has one live connection at a
/// time and never needs to treat the kinds polymorphically beyond
/// this module.
pub enum Transport {
    /// A real websocket connection to the relay.
    Relay(RelayTransport),
    /// An in-process double driven by a [`crate::testing::MockBroker`].
    #[cfg(any(test, feature = "testing"))]
    Mock(crate::testing::InMemoryTransport),
}

impl Transport {
    pub(crate) async fn send(&mut self, msg: ProtocolMessage) -> Result<()> {
        match self {
            Transport::Relay(t) => t.send(msg).await,
            #[cfg(any(test, feature = "testing"))]
            Transport::Mock(t) => t.send(msg).await,
        }
    }

    pub(crate) async fn recv(&mut self) -> Result<Option<ProtocolMessage>> {
        match self {
            Transport::Relay(t) => t.recv().await,
            #[cfg(any(test, feature = "testing"))]
            Transport::Mock(t) => t.recv().await,
        }
    }

    pub(crate) async fn disconnect(&mut self) -> Result<()> {
        match self {
            Transport::Relay(t) => t.disconnect().await,
            #[cfg(any(test, feature = "testing"))]
            Transport::Mock(t) => t.disconnect().await,
        }
    }
}
