use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::Result;
use crate::types::{Checkpoint, PartitionOwnership, StreamIdentity};

/// Durable store for ownership and checkpoint records.
///
/// Cross-process coordination rests entirely on `claim_ownership` rejecting
/// stale-etag writes: there is no lock service, and the engine never assumes
/// a claim succeeded until the store echoes the record back with a fresh
/// etag.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// List every ownership record for the stream, including released and
    /// expired ones.
    async fn list_ownership(&self, identity: &StreamIdentity) -> Result<Vec<PartitionOwnership>>;

    /// Attempt a batch of ownership claims. Returns only the accepted
    /// records, each carrying a fresh etag and a refreshed
    /// `last_modified_time`. A request whose etag no longer matches the
    /// stored record is silently dropped from the result.
    async fn claim_ownership(
        &self,
        requests: &[PartitionOwnership],
    ) -> Result<Vec<PartitionOwnership>>;

    async fn list_checkpoints(&self, identity: &StreamIdentity) -> Result<Vec<Checkpoint>>;

    async fn update_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;
}

type RecordKey = (String, String, String, String);

fn key_of(namespace: &str, stream: &str, group: &str, partition: &str) -> RecordKey {
    (
        namespace.to_string(),
        stream.to_string(),
        group.to_string(),
        partition.to_string(),
    )
}

/// In-memory `CheckpointStore` with full compare-and-swap semantics.
///
/// The reference store for tests and local development. Claims follow the
/// same rules a blob or etcd backed store would enforce: a request must
/// present the record's current etag (or no etag for a record that does not
/// exist yet) to be accepted.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    ownership: Mutex<HashMap<RecordKey, PartitionOwnership>>,
    checkpoints: Mutex<HashMap<RecordKey, Checkpoint>>,
    etag_counter: AtomicU64,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_etag(&self) -> String {
        self.etag_counter.fetch_add(1, Ordering::SeqCst).to_string()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn list_ownership(&self, identity: &StreamIdentity) -> Result<Vec<PartitionOwnership>> {
        let ownership = self.ownership.lock().expect("ownership lock poisoned");
        Ok(ownership
            .values()
            .filter(|o| {
                o.namespace == identity.namespace
                    && o.stream_name == identity.stream_name
                    && o.consumer_group == identity.consumer_group
            })
            .cloned()
            .collect())
    }

    async fn claim_ownership(
        &self,
        requests: &[PartitionOwnership],
    ) -> Result<Vec<PartitionOwnership>> {
        let mut ownership = self.ownership.lock().expect("ownership lock poisoned");
        let mut accepted = Vec::new();

        for request in requests {
            let key = key_of(
                &request.namespace,
                &request.stream_name,
                &request.consumer_group,
                &request.partition_id,
            );

            let current_etag = ownership.get(&key).and_then(|o| o.etag.clone());
            if current_etag != request.etag {
                tracing::debug!(
                    partition_id = %request.partition_id,
                    owner_id = %request.owner_id,
                    "ownership claim rejected, etag advanced by a concurrent writer"
                );
                continue;
            }

            let mut claimed = request.clone();
            claimed.etag = Some(self.next_etag());
            claimed.last_modified_time = Utc::now();
            ownership.insert(key, claimed.clone());
            accepted.push(claimed);
        }

        Ok(accepted)
    }

    async fn list_checkpoints(&self, identity: &StreamIdentity) -> Result<Vec<Checkpoint>> {
        let checkpoints = self.checkpoints.lock().expect("checkpoint lock poisoned");
        Ok(checkpoints
            .values()
            .filter(|c| {
                c.namespace == identity.namespace
                    && c.stream_name == identity.stream_name
                    && c.consumer_group == identity.consumer_group
            })
            .cloned()
            .collect())
    }

    async fn update_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let key = key_of(
            &checkpoint.namespace,
            &checkpoint.stream_name,
            &checkpoint.consumer_group,
            &checkpoint.partition_id,
        );
        self.checkpoints
            .lock()
            .expect("checkpoint lock poisoned")
            .insert(key, checkpoint.clone());
        Ok(())
    }
}
