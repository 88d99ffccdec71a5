use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::{PartitionClient, StreamOptions};
use crate::error::{Error, Result};
use crate::handler::{CloseReason, EventHandler, PartitionContext};
use crate::pump::{PartitionPump, PumpPolicy};
use crate::store::CheckpointStore;
use crate::types::{Checkpoint, PartitionOwnership, StartPosition, StreamIdentity};

/// Caller-supplied fallback for where to start reading a partition that has
/// no checkpoint yet.
pub type InitialPositionProvider = Arc<dyn Fn(&str) -> Option<StartPosition> + Send + Sync>;

/// Delivery and subscription policy shared by every pump this manager runs.
#[derive(Clone)]
pub struct PumpOptions {
    pub max_batch_size: usize,
    /// Window time boundary. `None` disables heartbeats: a window then only
    /// closes once `max_batch_size` events have accumulated.
    pub max_wait_time: Option<Duration>,
    pub batch_receive_mode: bool,
    pub prefetch_count: u32,
    pub track_last_enqueued_event_properties: bool,
    pub initial_position_provider: Option<InitialPositionProvider>,
}

impl Default for PumpOptions {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            max_wait_time: None,
            batch_receive_mode: false,
            prefetch_count: 300,
            track_last_enqueued_event_properties: false,
            initial_position_provider: None,
        }
    }
}

struct PumpHandle {
    /// Distinguishes this pump from any later pump for the same partition,
    /// so a stale task never removes its successor's entry.
    pump_id: u64,
    cancel: CancellationToken,
    close_reason: Arc<OnceLock<CloseReason>>,
    task: JoinHandle<()>,
}

type PumpMap = HashMap<String, PumpHandle>;

/// Supervises the set of active partition pumps.
///
/// The pump map is the only mutable state shared across tasks; every insert
/// and remove happens under its lock, and the lock is never held across
/// store or stream I/O.
pub struct PartitionPumpManager {
    identity: StreamIdentity,
    handler: Arc<dyn EventHandler>,
    client: Arc<dyn PartitionClient>,
    store: Arc<dyn CheckpointStore>,
    options: PumpOptions,
    pumps: Arc<Mutex<PumpMap>>,
    next_pump_id: AtomicU64,
}

impl PartitionPumpManager {
    pub fn new(
        identity: StreamIdentity,
        handler: Arc<dyn EventHandler>,
        client: Arc<dyn PartitionClient>,
        store: Arc<dyn CheckpointStore>,
        options: PumpOptions,
    ) -> Self {
        Self {
            identity,
            handler,
            client,
            store,
            options,
            pumps: Arc::new(Mutex::new(HashMap::new())),
            next_pump_id: AtomicU64::new(0),
        }
    }

    /// Start a pump for a newly claimed partition. Idempotent: if a pump is
    /// already running for this partition the call is a no-op, so the
    /// reconciliation step can blindly request starts for everything owned.
    ///
    /// A synchronous stream-open failure leaves no entry behind and is
    /// returned wrapped; the load balancer logs it and retries next cycle.
    pub async fn start_pump(
        &self,
        ownership: &PartitionOwnership,
        checkpoint: Option<&Checkpoint>,
    ) -> Result<()> {
        let partition_id = ownership.partition_id.clone();

        if self.pumps.lock().await.contains_key(&partition_id) {
            return Ok(());
        }

        let start_position = self.resolve_start_position(&partition_id, checkpoint);
        let stream_options = StreamOptions {
            prefetch_count: self.options.prefetch_count,
            track_last_enqueued_event_properties: self
                .options
                .track_last_enqueued_event_properties,
            owner_level: None,
        };
        let stream = self
            .client
            .open_partition_stream(&partition_id, start_position, &stream_options)
            .await
            .map_err(|e| Error::PumpStart {
                partition_id: partition_id.clone(),
                source: Box::new(e),
            })?;

        let mut pumps = self.pumps.lock().await;
        // The map may have changed while the stream was opening; a pump that
        // appeared in the meantime wins and our subscription is dropped.
        if pumps.contains_key(&partition_id) {
            return Ok(());
        }

        let pump_id = self.next_pump_id.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let close_reason = Arc::new(OnceLock::new());
        let pump = PartitionPump::new(
            PartitionContext {
                identity: self.identity.clone(),
                partition_id: partition_id.clone(),
            },
            Arc::clone(&self.handler),
            Arc::clone(&self.store),
            PumpPolicy {
                max_batch_size: self.options.max_batch_size,
                max_wait_time: self.options.max_wait_time,
                batch_receive_mode: self.options.batch_receive_mode,
            },
            cancel.clone(),
            Arc::clone(&close_reason),
        );

        let task = {
            let pumps = Arc::clone(&self.pumps);
            let partition_id = partition_id.clone();
            tokio::spawn(async move {
                pump.run(stream, start_position).await;
                // Self-cleanup for pumps that terminate on their own; a pump
                // stopped through stop_pump finds its entry already gone.
                let mut pumps = pumps.lock().await;
                if pumps.get(&partition_id).is_some_and(|h| h.pump_id == pump_id) {
                    pumps.remove(&partition_id);
                }
            })
        };

        tracing::info!(
            partition_id = %partition_id,
            start_position = ?start_position,
            "started partition pump"
        );
        pumps.insert(
            partition_id,
            PumpHandle {
                pump_id,
                cancel,
                close_reason,
                task,
            },
        );
        Ok(())
    }

    /// Stop one pump and wait for its teardown. Safe to call for a partition
    /// with no pump (including one that already self-terminated).
    pub async fn stop_pump(&self, partition_id: &str, reason: CloseReason) {
        let handle = self.pumps.lock().await.remove(partition_id);
        let Some(handle) = handle else { return };
        Self::shutdown(partition_id, handle, reason).await;
    }

    /// Stop every pump and wait for all teardowns, releasing schedulers and
    /// stream subscriptions before returning. Used at process shutdown.
    pub async fn stop_all_pumps(&self, reason: CloseReason) {
        let drained: Vec<(String, PumpHandle)> =
            self.pumps.lock().await.drain().collect();
        for (partition_id, handle) in drained {
            Self::shutdown(&partition_id, handle, reason).await;
        }
    }

    async fn shutdown(partition_id: &str, handle: PumpHandle, reason: CloseReason) {
        // Record the reason before cancelling so the pump's close callback
        // observes it; a pump that already stopped on its own ignores it.
        drop(handle.close_reason.set(reason));
        handle.cancel.cancel();
        if let Err(e) = handle.task.await {
            tracing::error!(partition_id, error = %e, "partition pump task panicked");
        }
    }

    /// Snapshot of partitions with a running pump, for reconciliation.
    pub async fn active_partitions(&self) -> Vec<String> {
        self.pumps.lock().await.keys().cloned().collect()
    }

    /// Initial read position precedence: checkpoint offset, then checkpoint
    /// sequence number, then the caller-supplied provider, then latest.
    fn resolve_start_position(
        &self,
        partition_id: &str,
        checkpoint: Option<&Checkpoint>,
    ) -> StartPosition {
        if let Some(checkpoint) = checkpoint {
            if let Some(offset) = checkpoint.offset {
                return StartPosition::Offset(offset);
            }
            if let Some(sequence_number) = checkpoint.sequence_number {
                return StartPosition::SequenceNumber(sequence_number);
            }
        }
        if let Some(provider) = &self.options.initial_position_provider {
            if let Some(position) = provider(partition_id) {
                return position;
            }
        }
        StartPosition::Latest
    }
}
