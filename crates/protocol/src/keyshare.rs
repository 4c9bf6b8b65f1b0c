use crate::{Error, GroupId, PartyId, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A party's persisted fragment of a threshold key.
///
/// `serialized` is treated as fully opaque: it is whatever blob the
/// DKLS23 crypto core returned, round-tripped through storage without
/// inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyshareRecord {
    /// Opaque keyshare bytes produced by the crypto core.
    #[serde(with = "hex::serde")]
    pub serialized: Vec<u8>,
    /// Compressed-secp256k1 public key, hex-encoded.
    pub public_key: String,
    /// Number of participants in the run that produced this share.
    pub participants: u16,
    /// Signing threshold for this share.
    pub threshold: u16,
    /// This party's identifier.
    pub party_id: PartyId,
    /// This party's 0-based index in the group.
    pub party_index: u16,
    /// Group the share was produced in.
    pub group_id: GroupId,
    /// Total parties in the group.
    pub total_parties: u16,
    /// When this record was produced.
    pub timestamp: DateTime<Utc>,
    /// API key active for the session that produced this record.
    pub api_key: String,
}

impl KeyshareRecord {
    /// Serialize to the JSON form persisted in a [`crate::KeyValueStore`].
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from the JSON form persisted in a
    /// [`crate::KeyValueStore`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            Error::CorruptData(format!("keyshare record decode failed: {e}"))
        })
    }
}
