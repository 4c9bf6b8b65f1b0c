use crate::Result;
use dkls_protocol::{Error, GroupId, KeyValueStore, KeyshareRecord};
use std::sync::Arc;

fn current_key(group_id: &GroupId, party_index: u16) -> String {
    format!("keyshare_{group_id}_{party_index}")
}

fn backup_key(group_id: &GroupId, party_index: u16) -> String {
    format!("{}.bak", current_key(group_id, party_index))
}

/// Persists [`KeyshareRecord`]s under the `keyshare_{group_id}_{index}`
/// key schema, keeping at most one `.bak` backup per rotation.
pub struct KeyshareStore {
    backing: Arc<dyn KeyValueStore>,
}

impl KeyshareStore {
    /// Wrap a [`KeyValueStore`] backing implementation.
    pub fn new(backing: Arc<dyn KeyValueStore>) -> Self {
        Self { backing }
    }

    /// Persist `record`. If `rotation` is set, best-effort deletes any
    /// existing `.bak`, moves the current record to `.bak`, then
    /// writes `record` as the new current; this sequence is not
    /// atomic across the two keys, so a crash mid-rotation can leave
    /// `current` missing with `.bak` holding the prior share, which
    /// callers must treat as authoritative in that case.
    pub async fn save(&self, record: &KeyshareRecord, rotation: bool) -> Result<()> {
        let current = current_key(&record.group_id, record.party_index);
        if rotation {
            let backup = backup_key(&record.group_id, record.party_index);
            if let Err(e) = self.backing.delete(&backup).await {
                tracing::warn!(error = %e, "failed to clear prior backup before rotation");
            }
            if let Some(existing) = self.backing.get(&current).await? {
                self.backing.set(&backup, existing).await?;
            }
        }
        self.backing.set(&current, record.to_bytes()?).await?;
        Ok(())
    }

    /// Load the current record for `(group_id, party_index)`.
    pub async fn load(&self, group_id: &GroupId, party_index: u16) -> Result<KeyshareRecord> {
        let bytes = self
            .backing
            .get(&current_key(group_id, party_index))
            .await?
            .ok_or_else(|| Error::NotFound(format!(
                "no keyshare for group {group_id} party index {party_index}"
            )))?;
        Ok(KeyshareRecord::from_bytes(&bytes)?)
    }

    /// Load the `.bak` record for `(group_id, party_index)`, if any.
    pub async fn load_backup(
        &self,
        group_id: &GroupId,
        party_index: u16,
    ) -> Result<KeyshareRecord> {
        let bytes = self
            .backing
            .get(&backup_key(group_id, party_index))
            .await?
            .ok_or_else(|| Error::NotFound(format!(
                "no backup keyshare for group {group_id} party index {party_index}"
            )))?;
        Ok(KeyshareRecord::from_bytes(&bytes)?)
    }
}
