//! Blob-backed Event Log
//!
//! One blob per aggregate, key `"{account_id}.jsonl"`, one JSON event per
//! line, oldest first. Appends are read-modify-write of the whole blob.

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::{AccountEvent, AccountId};

use super::blob::{BlobError, BlobStore, Precondition};
use super::LogError;

const KEY_SUFFIX: &str = ".jsonl";

/// Maximum attempts for a conditional append before giving up
const MAX_APPEND_ATTEMPTS: u32 = 3;

/// Append-only per-aggregate event history
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Durably append one event to the aggregate's history
    async fn append(&self, account_id: &AccountId, event: &AccountEvent) -> Result<(), LogError>;

    /// Full history, oldest first. `None` when nothing was ever stored for the id.
    async fn read_all(&self, account_id: &AccountId)
        -> Result<Option<Vec<AccountEvent>>, LogError>;

    /// Ids of every aggregate with a stored history
    async fn list_aggregates(&self) -> Result<Vec<AccountId>, LogError>;
}

/// Event log over any [`BlobStore`].
///
/// Each append is conditional on the etag seen during its read, so two
/// writers racing on one aggregate cannot silently drop each other's
/// event: the loser re-reads and retries.
#[derive(Debug)]
pub struct BlobEventLog<B> {
    store: B,
    max_attempts: u32,
}

impl<B: BlobStore> BlobEventLog<B> {
    pub fn new(store: B) -> Self {
        Self {
            store,
            max_attempts: MAX_APPEND_ATTEMPTS,
        }
    }

    pub fn store(&self) -> &B {
        &self.store
    }

    fn key_for(account_id: &AccountId) -> String {
        format!("{account_id}{KEY_SUFFIX}")
    }

    /// Parse a JSON-lines blob. Blank lines are skipped; the first line that
    /// does not parse ends the read with `Corrupt`.
    fn decode(key: &str, data: &[u8]) -> Result<Vec<AccountEvent>, LogError> {
        let mut events = Vec::new();

        for (idx, line) in data.split(|b| *b == b'\n').enumerate() {
            if line.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            let event = serde_json::from_slice::<AccountEvent>(line).map_err(|e| {
                LogError::Corrupt {
                    key: key.to_string(),
                    line: idx + 1,
                    reason: e.to_string(),
                }
            })?;
            events.push(event);
        }

        Ok(events)
    }
}

impl From<BlobError> for LogError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::InvalidKey(key) => LogError::InvalidKey(key),
            other => LogError::Unavailable(other.to_string()),
        }
    }
}

#[async_trait]
impl<B: BlobStore> EventLog for BlobEventLog<B> {
    async fn append(&self, account_id: &AccountId, event: &AccountEvent) -> Result<(), LogError> {
        let key = Self::key_for(account_id);
        let mut record = serde_json::to_vec(event)?;
        record.push(b'\n');

        for attempt in 0..self.max_attempts {
            let (mut data, precondition) = match self.store.get(&key).await? {
                Some(blob) => {
                    // Never write back on top of history we cannot read
                    Self::decode(&key, &blob.data)?;
                    (blob.data, Precondition::Matches(blob.etag))
                }
                None => (Vec::new(), Precondition::Absent),
            };

            if data.last().is_some_and(|b| *b != b'\n') {
                data.push(b'\n');
            }
            data.extend_from_slice(&record);

            match self.store.put(&key, data, precondition).await {
                Ok(_) => {
                    tracing::debug!(
                        key = %key,
                        event_type = %event.event_type(),
                        event_id = %event.event_id(),
                        "Event appended"
                    );
                    return Ok(());
                }
                Err(BlobError::PreconditionFailed(_)) if attempt + 1 < self.max_attempts => {
                    let delay = Duration::from_millis(50 * (attempt as u64 + 1));
                    tracing::warn!(
                        key = %key,
                        "Concurrent append detected, retrying (attempt {}/{})",
                        attempt + 1,
                        self.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(BlobError::PreconditionFailed(_)) => break,
                Err(e) => return Err(e.into()),
            }
        }

        Err(LogError::Conflict {
            key,
            attempts: self.max_attempts,
        })
    }

    async fn read_all(
        &self,
        account_id: &AccountId,
    ) -> Result<Option<Vec<AccountEvent>>, LogError> {
        let key = Self::key_for(account_id);

        match self.store.get(&key).await? {
            Some(blob) => Ok(Some(Self::decode(&key, &blob.data)?)),
            None => Ok(None),
        }
    }

    async fn list_aggregates(&self) -> Result<Vec<AccountId>, LogError> {
        let keys = self.store.list(KEY_SUFFIX).await?;

        let mut ids = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(raw) = key.strip_suffix(KEY_SUFFIX) else {
                continue;
            };
            match AccountId::new(raw) {
                Ok(id) => ids.push(id),
                Err(e) => tracing::warn!(key = %key, error = %e, "Skipping blob with unusable key"),
            }
        }
        Ok(ids)
    }
}
