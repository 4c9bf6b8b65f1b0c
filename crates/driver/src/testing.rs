//! A deterministic, in-memory stand-in for the real DKLS23 crypto
//! core, used only by this crate's and `integration_tests`'s test
//! suites. Never treated as production cryptography.

use crate::core::{DklsCore, DklsOutbound, KeyshareOutput};
use crate::Result;

/// Which kind of run a [`MockCore`] is standing in for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Keygen,
    Sign,
}

/// Deterministic four-round crypto core double.
///
/// Each round simply echoes a small marker payload derived from this
/// party's index so tests can assert on message shape without a real
/// DKLS23 implementation. `keyshare()`/`signature()` become available
/// only after round 4 has been processed.
pub struct MockCore {
    mode: Mode,
    party_index: usize,
    round: u8,
    finished: bool,
}

impl MockCore {
    /// A core driving a keygen (or rotation) run for the party at
    /// `party_index`.
    pub fn keygen(party_index: usize) -> Self {
        Self { mode: Mode::Keygen, party_index, round: 0, finished: false }
    }

    /// A core driving a signing run for the party at `party_index`.
    pub fn sign(party_index: usize) -> Self {
        Self { mode: Mode::Sign, party_index, round: 0, finished: false }
    }

    fn marker(&self, round: u8) -> Vec<u8> {
        format!("mock:{:?}:p{}:r{round}", self.mode, self.party_index).into_bytes()
    }
}

impl DklsCore for MockCore {
    fn create_first_message(&mut self) -> Result<Vec<DklsOutbound>> {
        self.round = 1;
        Ok(vec![DklsOutbound { to: None, body: self.marker(1) }])
    }

    fn handle_messages(
        &mut self,
        round: u8,
        _inbound: &[(usize, Vec<u8>)],
    ) -> Result<Vec<DklsOutbound>> {
        if round == 4 {
            self.finished = true;
            return Ok(Vec::new());
        }
        self.round = round + 1;
        Ok(vec![DklsOutbound { to: None, body: self.marker(round + 1) }])
    }

    fn keyshare(&self) -> Option<KeyshareOutput> {
        if self.finished && self.mode == Mode::Keygen {
            Some(KeyshareOutput {
                serialized: self.marker(5),
                public_key: format!("02{:0>64}", self.party_index),
            })
        } else {
            None
        }
    }

    fn signature(&self) -> Option<(Vec<u8>, Vec<u8>)> {
        if self.finished && self.mode == Mode::Sign {
            Some((self.marker(5), self.marker(6)))
        } else {
            None
        }
    }
}
