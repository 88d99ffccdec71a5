use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::types::{Event, StartPosition};

/// Lazy per-partition event sequence. The pump pulls one event at a time;
/// any read-ahead beyond that is governed by `StreamOptions::prefetch_count`
/// inside the client.
pub type EventStream = BoxStream<'static, Result<Event>>;

/// Options passed through to the stream client when opening a partition.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Upper bound on events the client may buffer ahead of delivery.
    pub prefetch_count: u32,
    pub track_last_enqueued_event_properties: bool,
    /// Epoch-style fencing level for transports that support it.
    pub owner_level: Option<i64>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            prefetch_count: 300,
            track_last_enqueued_event_properties: false,
            owner_level: None,
        }
    }
}

/// Wire-level client for one partitioned event stream.
///
/// Implementations own connection management and transport retries; the
/// engine only needs the partition id set and a stream per partition.
#[async_trait]
pub trait PartitionClient: Send + Sync {
    /// The full partition-id set for the target stream.
    async fn partition_ids(&self) -> Result<Vec<String>>;

    /// Open a lazy event stream for one partition at the given position.
    /// Dropping the returned stream releases the subscription.
    async fn open_partition_stream(
        &self,
        partition_id: &str,
        start: StartPosition,
        options: &StreamOptions,
    ) -> Result<EventStream>;
}
