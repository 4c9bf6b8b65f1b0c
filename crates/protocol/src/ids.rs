use crate::{Error, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Identifier for a party in a DKLS23 run.
///
/// Encoded as the 66-character hex representation of a compressed
/// secp256k1 point (leading byte `0x02` or `0x03`). The all-zero id
/// is reserved for the relay server itself.
#[derive(
    Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct PartyId(String);

impl PartyId {
    /// Length in hex characters of a valid party id.
    pub const LEN: usize = 66;

    /// Reserved identifier for the relay server.
    pub fn server() -> Self {
        Self("0".repeat(Self::LEN))
    }

    /// Whether this id is the reserved server identifier.
    pub fn is_server(&self) -> bool {
        self.0.bytes().all(|b| b == b'0')
    }

    /// Borrow the underlying hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<()> {
        if s.len() != Self::LEN || !is_hex(s) {
            return Err(Error::InvalidMessage(format!(
                "party id must be {} hex characters, got {:?}",
                Self::LEN,
                s
            )));
        }
        // The server id is all zeros and has no leading-byte
        // constraint; every other id must encode a compressed point.
        if s.bytes().all(|b| b == b'0') {
            return Ok(());
        }
        match &s[0..2] {
            "02" | "03" => Ok(()),
            other => Err(Error::InvalidMessage(format!(
                "party id leading byte must be 02 or 03, got {other}"
            ))),
        }
    }
}

impl FromStr for PartyId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::validate(s)?;
        Ok(Self(s.to_lowercase()))
    }
}

impl TryFrom<String> for PartyId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PartyId> for String {
    fn from(value: PartyId) -> Self {
        value.0
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for PartyId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier shared by every party in a single protocol run.
///
/// Encoded as 64 hex characters (32 random bytes).
#[derive(
    Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct GroupId(String);

impl GroupId {
    /// Length in hex characters of a valid group id.
    pub const LEN: usize = 64;

    /// Generate a fresh, random group id.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Borrow the underlying hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for GroupId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != Self::LEN || !is_hex(s) {
            return Err(Error::InvalidMessage(format!(
                "group id must be {} hex characters, got {:?}",
                Self::LEN,
                s
            )));
        }
        Ok(Self(s.to_lowercase()))
    }
}

impl TryFrom<String> for GroupId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<GroupId> for String {
    fn from(value: GroupId) -> Self {
        value.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Round number within a protocol run.
///
/// `0` is the control/START round, `1..=4` are the DKLS23 protocol
/// rounds, `5` is the DONE status round.
#[derive(
    Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub struct RoundNumber(u8);

impl RoundNumber {
    /// Control round carrying `START`/`END:*` frames.
    pub const START: Self = Self(0);
    /// Round carrying the session's `DONE` status frame.
    pub const DONE: Self = Self(5);

    /// Construct a round number, validating it lies in `0..=5`.
    pub fn new(value: u8) -> Result<Self> {
        if value > 5 {
            return Err(Error::InvalidMessage(format!(
                "round must be in 0..=5, got {value}"
            )));
        }
        Ok(Self(value))
    }

    /// The next round number.
    ///
    /// # Panics
    /// Panics if called on round 5 (`DONE` has no successor).
    pub fn next(self) -> Self {
        Self::new(self.0 + 1).expect("no round after DONE")
    }

    /// Raw numeric value.
    pub fn get(self) -> u8 {
        self.0
    }

    /// Whether this is the `START` control round.
    pub fn is_start(self) -> bool {
        self == Self::START
    }

    /// Whether this is one of the four DKLS23 protocol rounds.
    pub fn is_protocol_round(self) -> bool {
        (1..=4).contains(&self.0)
    }

    /// Whether this is the `DONE` status round.
    pub fn is_done(self) -> bool {
        self == Self::DONE
    }
}

impl TryFrom<u8> for RoundNumber {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Self::new(value)
    }
}

impl From<RoundNumber> for u8 {
    fn from(value: RoundNumber) -> Self {
        value.0
    }
}

impl fmt::Display for RoundNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
