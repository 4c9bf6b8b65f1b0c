use crate::Result;

/// A message produced by the crypto core, addressed by participant
/// index rather than [`dkls_protocol::PartyId`].
///
/// `to: None` is a broadcast; `to: Some(i)` targets the party at
/// index `i` in the group's member list. Resolving the index to a
/// concrete [`dkls_protocol::PartyId`] (and rejecting out-of-bounds
/// indices as `InvalidMessage`) is the driver's job, not the core's.
#[derive(Debug, Clone)]
pub struct DklsOutbound {
    /// Destination index, or `None` for broadcast.
    pub to: Option<usize>,
    /// Opaque message bytes produced by the crypto core.
    pub body: Vec<u8>,
}

/// A completed keygen or rotation result.
#[derive(Debug, Clone)]
pub struct KeyshareOutput {
    /// Opaque serialized keyshare bytes, persisted as-is.
    pub serialized: Vec<u8>,
    /// Compressed-secp256k1 public key, hex-encoded.
    pub public_key: String,
}

/// The DKLS23 cryptographic core, treated as an opaque black box.
///
/// A single `DklsCore` instance is scoped to one protocol run (one
/// keygen, rotation, or signing session) and is driven round by
/// round. This trait is the seam a real DKLS23 implementation plugs
/// into; nothing in this crate inspects `body` bytes beyond passing
/// them through.
pub trait DklsCore: Send {
    /// Produce this party's first outbound message (round 0 → 1).
    fn create_first_message(&mut self) -> Result<Vec<DklsOutbound>>;

    /// Hand the core every deduplicated inbound message for `round`,
    /// each tagged with the sender's participant index, and receive
    /// this party's messages for the next round.
    fn handle_messages(
        &mut self,
        round: u8,
        inbound: &[(usize, Vec<u8>)],
    ) -> Result<Vec<DklsOutbound>>;

    /// The finished keyshare, if this core ran a keygen or rotation
    /// session to completion.
    fn keyshare(&self) -> Option<KeyshareOutput>;

    /// The finished `(r, s)` signature pair, if this core ran a
    /// signing session to completion.
    fn signature(&self) -> Option<(Vec<u8>, Vec<u8>)>;
}

/// Constructs scoped [`DklsCore`] instances for each kind of protocol
/// run.
///
/// Mirrors a `KeygenSession::new` / `::init_key_rotation` and a
/// signing-session constructor: each call starts a fresh,
/// independent core bound to the given parameters.
pub trait DklsCoreFactory: Send + Sync {
    /// Concrete core type this factory constructs.
    type Core: DklsCore;

    /// Start a fresh distributed key generation.
    fn new_keygen_session(
        &self,
        n: u16,
        t: u16,
        party_index: u16,
        group_id: &[u8],
        seed: Option<[u8; 32]>,
        distributed: bool,
    ) -> Result<Self::Core>;

    /// Start a key rotation, refreshing an existing keyshare without
    /// changing the public key.
    fn init_key_rotation(
        &self,
        old_keyshare: &[u8],
        seed: Option<[u8; 32]>,
        distributed: bool,
    ) -> Result<Self::Core>;

    /// Start a signing session over a 32-byte message hash using a
    /// previously persisted keyshare.
    fn new_sign_session(
        &self,
        keyshare: &[u8],
        message_hash: [u8; 32],
        seed: Option<[u8; 32]>,
        distributed: bool,
    ) -> Result<Self::Core>;
}
