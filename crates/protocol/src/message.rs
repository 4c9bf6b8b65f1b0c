use crate::{Error, GroupId, PartyId, Result, RoundNumber};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Recipient of a [`ProtocolMessage`].
///
/// The wire form uses the literal string `"0"` for broadcast; any
/// other value must be a valid [`PartyId`].
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum Recipient {
    /// Addressed to every other party in the group.
    Broadcast,
    /// Addressed to a single party.
    Party(PartyId),
}

const BROADCAST_TOKEN: &str = "0";

impl Recipient {
    /// The party this message is addressed to, or `None` for a
    /// broadcast.
    pub fn party(&self) -> Option<&PartyId> {
        match self {
            Recipient::Broadcast => None,
            Recipient::Party(p) => Some(p),
        }
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::Broadcast => write!(f, "{BROADCAST_TOKEN}"),
            Recipient::Party(p) => write!(f, "{p}"),
        }
    }
}

impl TryFrom<String> for Recipient {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        if value == BROADCAST_TOKEN || value.is_empty() {
            Ok(Recipient::Broadcast)
        } else {
            Ok(Recipient::Party(value.parse()?))
        }
    }
}

impl From<Recipient> for String {
    fn from(value: Recipient) -> Self {
        value.to_string()
    }
}

impl Serialize for Recipient {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Recipient {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Recipient::try_from(s).map_err(serde::de::Error::custom)
    }
}

/// Well-known control frame bodies exchanged on round 0 and round 5.
pub mod control {
    /// Legacy-cased and canonical START tokens.
    pub const START_LOWER: &str = "start";
    /// Canonical START token.
    pub const START: &str = "START";
    /// DONE status sent by a party after its last round.
    pub const DONE: &str = "DONE";
    /// Prefix for the server's terminal status frame.
    pub const END_PREFIX: &str = "END:";
    /// Status suffix indicating a successful protocol run.
    pub const SUCCESS: &str = "SUCCESS";

    /// Whether `content` is a START frame body.
    pub fn is_start(content: &str) -> bool {
        content == START || content == START_LOWER
    }

    /// Whether `content` is an `END:<STATUS>` frame body, returning the
    /// status suffix when it is.
    pub fn end_status(content: &str) -> Option<&str> {
        content.strip_prefix(END_PREFIX)
    }
}

/// A single message exchanged between parties via the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProtocolMessage {
    /// Group this message belongs to.
    pub group_id: GroupId,
    /// Sender of the message (or the reserved server id).
    pub from_id: PartyId,
    /// Recipient of the message.
    pub to_id: Recipient,
    /// Plaintext for control frames, base64 ciphertext otherwise.
    pub content: String,
    /// Round this message belongs to.
    pub round: RoundNumber,
    /// RFC-3339 timestamp of creation.
    pub timestamp: DateTime<Utc>,
}

impl ProtocolMessage {
    /// Construct a new message stamped with the current time.
    pub fn new(
        group_id: GroupId,
        from_id: PartyId,
        to_id: Recipient,
        content: impl Into<String>,
        round: RoundNumber,
    ) -> Self {
        Self {
            group_id,
            from_id,
            to_id,
            content: content.into(),
            round,
            timestamp: Utc::now(),
        }
    }

    /// Validate the structural invariants from the wire schema against
    /// the session's current group.
    pub fn validate(&self, expected_group: &GroupId) -> Result<()> {
        if &self.group_id != expected_group {
            return Err(Error::InvalidMessage(format!(
                "message group {} does not match session group {}",
                self.group_id, expected_group
            )));
        }
        Ok(())
    }
}

/// Per-round message buffer maintained by a [`crate`]-level protocol
/// driver.
#[derive(Debug, Default, Clone)]
pub struct RoundState {
    /// Messages buffered for this round, in arrival order.
    pub buffered: Vec<ProtocolMessage>,
    /// Whether the round has already been handed to the crypto core.
    pub processed: bool,
    /// Whether a `round-complete` event has already been published.
    pub emitted: bool,
}

impl RoundState {
    /// Create an empty round state.
    pub fn new() -> Self {
        Self::default()
    }
}
