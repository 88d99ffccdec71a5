use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::store::CheckpointStore;
use crate::types::{Checkpoint, Event, StartPosition, StreamIdentity};

/// Identifies the partition a callback is firing for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionContext {
    pub identity: StreamIdentity,
    pub partition_id: String,
}

/// Context for the one-time `initialize` callback, fired before any event
/// delivery for a freshly started pump.
#[derive(Debug, Clone)]
pub struct InitializationContext {
    pub partition: PartitionContext,
    /// Where reading will begin, after checkpoint/provider resolution.
    pub start_position: StartPosition,
}

/// Why a pump is closing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The processor is shutting down.
    Shutdown,
    /// Another instance claimed the partition away from us.
    OwnershipLost,
    /// The event stream ended normally.
    StreamCompleted,
    /// The event stream failed; `process_error` fired before this.
    StreamError,
}

#[derive(Debug, Clone)]
pub struct CloseContext {
    pub partition: PartitionContext,
    pub reason: CloseReason,
}

/// Context for `process_error`. Load-balancer failures carry no partition.
#[derive(Debug)]
pub struct ErrorContext {
    pub partition_id: Option<String>,
    pub error: Error,
}

/// Context for a single delivered event.
pub struct EventContext {
    pub partition: PartitionContext,
    pub event: Event,
    store: Arc<dyn CheckpointStore>,
}

impl EventContext {
    pub(crate) fn new(
        partition: PartitionContext,
        event: Event,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            partition,
            event,
            store,
        }
    }

    /// Durably record this event as processed. A failed write is logged and
    /// returned, but the pump keeps running either way; the next checkpoint
    /// attempt supersedes it.
    pub async fn update_checkpoint(&self) -> Result<()> {
        write_checkpoint(&*self.store, &self.partition, &self.event).await
    }
}

/// Context for a delivered window of events. The window may be empty when
/// `max_wait_time` elapsed with no events (a heartbeat).
pub struct EventBatchContext {
    pub partition: PartitionContext,
    pub events: Vec<Event>,
    store: Arc<dyn CheckpointStore>,
}

impl EventBatchContext {
    pub(crate) fn new(
        partition: PartitionContext,
        events: Vec<Event>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            partition,
            events,
            store,
        }
    }

    /// Checkpoint at the last event of the window. A no-op for empty
    /// (heartbeat) windows.
    pub async fn update_checkpoint(&self) -> Result<()> {
        match self.events.last() {
            Some(event) => write_checkpoint(&*self.store, &self.partition, event).await,
            None => Ok(()),
        }
    }
}

async fn write_checkpoint(
    store: &dyn CheckpointStore,
    partition: &PartitionContext,
    event: &Event,
) -> Result<()> {
    let checkpoint = Checkpoint {
        namespace: partition.identity.namespace.clone(),
        stream_name: partition.identity.stream_name.clone(),
        consumer_group: partition.identity.consumer_group.clone(),
        partition_id: partition.partition_id.clone(),
        offset: Some(event.offset),
        sequence_number: Some(event.sequence_number),
    };
    if let Err(e) = store.update_checkpoint(&checkpoint).await {
        tracing::warn!(
            partition_id = %partition.partition_id,
            error = %e,
            "checkpoint write failed, a later checkpoint will supersede it"
        );
        return Err(e);
    }
    Ok(())
}

/// User-supplied processing callbacks.
///
/// Exactly one of `process_event` / `process_event_batch` is exercised,
/// selected by `batch_receive_mode`. Errors returned from any callback are
/// logged and isolated: they never crash the pump task or block teardown.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn initialize(&self, _ctx: &InitializationContext) {}

    async fn process_event(&self, _ctx: &EventContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn process_event_batch(&self, _ctx: &EventBatchContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn process_error(&self, ctx: &ErrorContext) -> anyhow::Result<()> {
        tracing::error!(
            partition_id = ctx.partition_id.as_deref().unwrap_or("none"),
            error = %ctx.error,
            "processing error"
        );
        Ok(())
    }

    async fn close(&self, _ctx: &CloseContext) -> anyhow::Result<()> {
        Ok(())
    }
}
