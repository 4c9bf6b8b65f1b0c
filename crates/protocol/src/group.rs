use crate::{Error, GroupId, PartyId, Result};
use serde::{Deserialize, Serialize};

/// A party's position within a [`GroupInfo`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupMember {
    /// The party's identifier.
    pub party_id: PartyId,
    /// Server-assigned join index; this is the party's 0-based
    /// position in the DKLS23 participant list.
    pub index: u16,
}

/// Lifecycle status of a group as tracked by the relay.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    /// Created, waiting for parties to join.
    Pending,
    /// All expected parties have joined; ready to run a protocol.
    Ready,
    /// A protocol run was completed for this group.
    Completed,
}

/// Full description of a group coordinated by the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInfo {
    /// Group identifier.
    pub group_id: GroupId,
    /// Signing threshold `t`.
    pub threshold: u16,
    /// Total number of parties `n`.
    pub total_parties: u16,
    /// Server-enforced timeout, in minutes.
    pub timeout_minutes: u32,
    /// Members ordered by server-assigned join index.
    pub members: Vec<GroupMember>,
    /// Party id of whoever issued `create_group`.
    pub created_by: PartyId,
    /// Current lifecycle status.
    pub status: GroupStatus,
}

impl GroupInfo {
    /// Validate the `1 <= t <= n` and `|members| <= n` invariants.
    pub fn validate(&self) -> Result<()> {
        if self.threshold < 1 || self.threshold > self.total_parties {
            return Err(Error::InvalidParams(format!(
                "threshold {} must satisfy 1 <= t <= n ({})",
                self.threshold, self.total_parties
            )));
        }
        if self.members.len() > self.total_parties as usize {
            return Err(Error::InvalidParams(format!(
                "group has {} members but only {} parties expected",
                self.members.len(),
                self.total_parties
            )));
        }
        Ok(())
    }

    /// Find a member's index by party id.
    pub fn index_of(&self, party_id: &PartyId) -> Option<u16> {
        self.members
            .iter()
            .find(|m| &m.party_id == party_id)
            .map(|m| m.index)
    }

    /// The party id at a given index, if within bounds.
    pub fn party_at(&self, index: u16) -> Option<&PartyId> {
        self.members
            .iter()
            .find(|m| m.index == index)
            .map(|m| &m.party_id)
    }

    /// The number of inbound messages expected per protocol round,
    /// i.e. every other party.
    pub fn expected_peer_count(&self) -> usize {
        self.total_parties.saturating_sub(1) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn party(byte: &str) -> PartyId {
        ("02".to_string() + &byte.repeat(64)).parse().unwrap()
    }

    fn group(threshold: u16, total: u16, members: Vec<GroupMember>) -> GroupInfo {
        GroupInfo {
            group_id: GroupId::generate(),
            threshold,
            total_parties: total,
            timeout_minutes: 10,
            members,
            created_by: party("a"),
            status: GroupStatus::Pending,
        }
    }

    #[test]
    fn rejects_threshold_above_total() {
        let g = group(3, 2, vec![]);
        assert!(g.validate().is_err());
    }

    #[test]
    fn rejects_threshold_zero() {
        let g = group(0, 2, vec![]);
        assert!(g.validate().is_err());
    }

    #[test]
    fn accepts_valid_group() {
        let members = vec![
            GroupMember { party_id: party("a"), index: 0 },
            GroupMember { party_id: party("b"), index: 1 },
        ];
        let g = group(2, 2, members);
        assert!(g.validate().is_ok());
        assert_eq!(g.expected_peer_count(), 1);
        assert_eq!(g.index_of(&party("b")), Some(1));
        assert_eq!(g.party_at(0), Some(&party("a")));
    }
}
