use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::client::PartitionClient;
use crate::error::Result;
use crate::handler::{CloseReason, ErrorContext, EventHandler};
use crate::pump_manager::PartitionPumpManager;
use crate::store::CheckpointStore;
use crate::strategy::{self, LoadBalancingStrategy};
use crate::types::{Checkpoint, PartitionOwnership, StreamIdentity};

/// The periodic ownership-claiming algorithm.
///
/// Leaderless: every instance runs the same cycle against the same store
/// snapshot, and the store's optimistic writes arbitrate conflicts. A cycle
/// that fails partway makes no pump changes and is simply retried on the
/// next timer tick.
pub struct PartitionLoadBalancer {
    identity: StreamIdentity,
    owner_id: String,
    strategy: LoadBalancingStrategy,
    ownership_expiration: Duration,
    store: Arc<dyn CheckpointStore>,
    client: Arc<dyn PartitionClient>,
    pumps: Arc<PartitionPumpManager>,
    handler: Arc<dyn EventHandler>,
}

impl PartitionLoadBalancer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: StreamIdentity,
        owner_id: String,
        strategy: LoadBalancingStrategy,
        ownership_expiration: Duration,
        store: Arc<dyn CheckpointStore>,
        client: Arc<dyn PartitionClient>,
        pumps: Arc<PartitionPumpManager>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            identity,
            owner_id,
            strategy,
            ownership_expiration,
            store,
            client,
            pumps,
            handler,
        }
    }

    /// Run one load-balancing cycle. Never fails the caller: coordination
    /// errors are logged, routed to `process_error` without a partition, and
    /// retried on the next tick.
    pub async fn load_balance(&self) {
        if let Err(error) = self.run_cycle().await {
            tracing::warn!(
                owner_id = %self.owner_id,
                error = %error,
                "load balancing cycle failed, retrying next tick"
            );
            let ctx = ErrorContext {
                partition_id: None,
                error,
            };
            if let Err(e) = self.handler.process_error(&ctx).await {
                tracing::warn!(owner_id = %self.owner_id, error = %e, "process_error callback failed");
            }
        }
    }

    async fn run_cycle(&self) -> Result<()> {
        let partition_ids = self.client.partition_ids().await?;
        if partition_ids.is_empty() {
            tracing::debug!(owner_id = %self.owner_id, "stream reports no partitions");
            return Ok(());
        }

        let all_ownership = self.store.list_ownership(&self.identity).await?;

        let now = Utc::now();
        let active: Vec<PartitionOwnership> = all_ownership
            .iter()
            .filter(|o| o.is_active(now, self.ownership_expiration))
            .cloned()
            .collect();

        // Any record, live or not, carries the etag a claim must present.
        let etags: HashMap<&str, Option<String>> = all_ownership
            .iter()
            .map(|o| (o.partition_id.as_str(), o.etag.clone()))
            .collect();

        let mine: Vec<&PartitionOwnership> = active
            .iter()
            .filter(|o| o.owner_id == self.owner_id)
            .collect();

        let to_claim =
            strategy::compute_claims(self.strategy, &self.owner_id, &partition_ids, &active);

        // One batch: renewals for everything held plus this cycle's claims.
        // A renewal raced by a concurrent steal fails silently and the
        // reconciliation below stops that pump.
        let mut requests: Vec<PartitionOwnership> = Vec::with_capacity(mine.len() + to_claim.len());
        for owned in &mine {
            requests.push(self.claim_request(&owned.partition_id, owned.etag.clone()));
        }
        for partition_id in &to_claim {
            let etag = etags.get(partition_id.as_str()).cloned().flatten();
            requests.push(self.claim_request(partition_id, etag));
        }

        let accepted = if requests.is_empty() {
            Vec::new()
        } else {
            self.store.claim_ownership(&requests).await?
        };

        if !to_claim.is_empty() {
            tracing::info!(
                owner_id = %self.owner_id,
                attempted = requests.len(),
                accepted = accepted.len(),
                "submitted ownership claims"
            );
        }

        self.reconcile(&accepted).await
    }

    /// Align running pumps with the ownership the store just confirmed:
    /// stop pumps for anything not accepted, start pumps for anything new.
    async fn reconcile(&self, accepted: &[PartitionOwnership]) -> Result<()> {
        let confirmed: HashSet<&str> = accepted
            .iter()
            .map(|o| o.partition_id.as_str())
            .collect();

        let running = self.pumps.active_partitions().await;
        for partition_id in &running {
            if !confirmed.contains(partition_id.as_str()) {
                tracing::info!(
                    owner_id = %self.owner_id,
                    partition_id = %partition_id,
                    "ownership lost, stopping pump"
                );
                self.pumps
                    .stop_pump(partition_id, CloseReason::OwnershipLost)
                    .await;
            }
        }

        let running: HashSet<String> = running.into_iter().collect();
        let to_start: Vec<&PartitionOwnership> = accepted
            .iter()
            .filter(|o| !running.contains(&o.partition_id))
            .collect();
        if to_start.is_empty() {
            return Ok(());
        }

        let checkpoints: HashMap<String, Checkpoint> = self
            .store
            .list_checkpoints(&self.identity)
            .await?
            .into_iter()
            .map(|c| (c.partition_id.clone(), c))
            .collect();

        for ownership in to_start {
            let checkpoint = checkpoints.get(&ownership.partition_id);
            if let Err(e) = self.pumps.start_pump(ownership, checkpoint).await {
                tracing::warn!(
                    owner_id = %self.owner_id,
                    partition_id = %ownership.partition_id,
                    error = %e,
                    "failed to start pump, will retry next cycle"
                );
            }
        }
        Ok(())
    }

    fn claim_request(&self, partition_id: &str, etag: Option<String>) -> PartitionOwnership {
        PartitionOwnership {
            namespace: self.identity.namespace.clone(),
            stream_name: self.identity.stream_name.clone(),
            consumer_group: self.identity.consumer_group.clone(),
            partition_id: partition_id.to_string(),
            owner_id: self.owner_id.clone(),
            last_modified_time: Utc::now(),
            etag,
        }
    }

    /// Best-effort release of every ownership record this instance holds,
    /// so other instances can claim immediately instead of waiting for the
    /// records to age out. Called at shutdown; failures are only logged.
    pub async fn relinquish_ownership(&self) {
        let listed = match self.store.list_ownership(&self.identity).await {
            Ok(listed) => listed,
            Err(e) => {
                tracing::warn!(owner_id = %self.owner_id, error = %e, "could not list ownership to relinquish");
                return;
            }
        };

        let releases: Vec<PartitionOwnership> = listed
            .into_iter()
            .filter(|o| o.owner_id == self.owner_id)
            .map(|mut o| {
                o.owner_id = String::new();
                o.last_modified_time = Utc::now();
                o
            })
            .collect();
        if releases.is_empty() {
            return;
        }

        match self.store.claim_ownership(&releases).await {
            Ok(released) => tracing::info!(
                owner_id = %self.owner_id,
                released = released.len(),
                "relinquished partition ownership"
            ),
            Err(e) => {
                tracing::warn!(owner_id = %self.owner_id, error = %e, "failed to relinquish ownership")
            }
        }
    }
}
