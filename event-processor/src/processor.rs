use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::PartitionClient;
use crate::error::{Error, Result};
use crate::handler::{CloseReason, EventHandler};
use crate::load_balancer::PartitionLoadBalancer;
use crate::pump_manager::{InitialPositionProvider, PartitionPumpManager, PumpOptions};
use crate::store::CheckpointStore;
use crate::strategy::LoadBalancingStrategy;
use crate::types::StreamIdentity;

/// Everything an `EventProcessor` consumes at construction time.
#[derive(Clone)]
pub struct ProcessorConfig {
    pub namespace: String,
    pub stream_name: String,
    pub consumer_group: String,
    /// Unique id of this consumer-group member; ownership records carry it.
    pub owner_id: String,
    pub strategy: LoadBalancingStrategy,
    /// How often the load balancer runs a claiming cycle.
    pub update_interval: Duration,
    /// Ownership records older than this are treated as unowned.
    pub partition_ownership_expiration_interval: Duration,
    pub max_batch_size: usize,
    /// Window time boundary for batch mode; `None` disables heartbeats.
    pub max_wait_time: Option<Duration>,
    pub batch_receive_mode: bool,
    pub prefetch_count: u32,
    pub track_last_enqueued_event_properties: bool,
    pub initial_position_provider: Option<InitialPositionProvider>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            namespace: "localhost".to_string(),
            stream_name: "stream".to_string(),
            consumer_group: "$default".to_string(),
            owner_id: "processor-0".to_string(),
            strategy: LoadBalancingStrategy::Balanced,
            update_interval: Duration::from_secs(10),
            partition_ownership_expiration_interval: Duration::from_secs(60),
            max_batch_size: 100,
            max_wait_time: None,
            batch_receive_mode: false,
            prefetch_count: 300,
            track_last_enqueued_event_properties: false,
            initial_position_provider: None,
        }
    }
}

impl ProcessorConfig {
    /// The only place this engine returns errors across the start/stop
    /// boundary; everything at runtime goes to `process_error` or the logs.
    pub fn validate(&self) -> Result<()> {
        if self.stream_name.is_empty() {
            return Err(Error::Config("stream_name must not be empty".to_string()));
        }
        if self.consumer_group.is_empty() {
            return Err(Error::Config("consumer_group must not be empty".to_string()));
        }
        if self.owner_id.is_empty() {
            return Err(Error::Config("owner_id must not be empty".to_string()));
        }
        if self.max_batch_size == 0 {
            return Err(Error::Config("max_batch_size must be at least 1".to_string()));
        }
        if self.update_interval.is_zero() {
            return Err(Error::Config("update_interval must be non-zero".to_string()));
        }
        if self.partition_ownership_expiration_interval.is_zero() {
            return Err(Error::Config(
                "partition_ownership_expiration_interval must be non-zero".to_string(),
            ));
        }
        if self.max_wait_time.is_some_and(|w| w.is_zero()) {
            return Err(Error::Config(
                "max_wait_time must be non-zero when set".to_string(),
            ));
        }
        if self.prefetch_count == 0 {
            return Err(Error::Config("prefetch_count must be at least 1".to_string()));
        }
        Ok(())
    }

    fn identity(&self) -> StreamIdentity {
        StreamIdentity {
            namespace: self.namespace.clone(),
            stream_name: self.stream_name.clone(),
            consumer_group: self.consumer_group.clone(),
        }
    }
}

/// Thin orchestration over the load balancer: a timer loop that claims
/// partitions every `update_interval` until cancelled, then winds down
/// every pump and releases ownership.
pub struct EventProcessor {
    config: ProcessorConfig,
    balancer: PartitionLoadBalancer,
    pumps: Arc<PartitionPumpManager>,
}

impl EventProcessor {
    pub fn new(
        config: ProcessorConfig,
        handler: Arc<dyn EventHandler>,
        client: Arc<dyn PartitionClient>,
        store: Arc<dyn CheckpointStore>,
    ) -> Result<Self> {
        config.validate()?;

        let identity = config.identity();
        let pumps = Arc::new(PartitionPumpManager::new(
            identity.clone(),
            Arc::clone(&handler),
            Arc::clone(&client),
            Arc::clone(&store),
            PumpOptions {
                max_batch_size: config.max_batch_size,
                max_wait_time: config.max_wait_time,
                batch_receive_mode: config.batch_receive_mode,
                prefetch_count: config.prefetch_count,
                track_last_enqueued_event_properties: config
                    .track_last_enqueued_event_properties,
                initial_position_provider: config.initial_position_provider.clone(),
            },
        ));
        let balancer = PartitionLoadBalancer::new(
            identity,
            config.owner_id.clone(),
            config.strategy,
            config.partition_ownership_expiration_interval,
            store,
            client,
            Arc::clone(&pumps),
            handler,
        );

        Ok(Self {
            config,
            balancer,
            pumps,
        })
    }

    /// Run until cancelled. The first claiming cycle fires immediately, the
    /// rest on the update interval. On cancellation every pump is stopped
    /// and awaited, then held ownership is released best-effort.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            owner_id = %self.config.owner_id,
            consumer_group = %self.config.consumer_group,
            strategy = ?self.config.strategy,
            "event processor started"
        );

        let mut ticker = tokio::time::interval(self.config.update_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.balancer.load_balance().await,
            }
        }

        self.pumps.stop_all_pumps(CloseReason::Shutdown).await;
        self.balancer.relinquish_ownership().await;
        tracing::info!(owner_id = %self.config.owner_id, "event processor stopped");
    }

    /// Partitions this instance is actively pumping.
    pub async fn active_partitions(&self) -> Vec<String> {
        self.pumps.active_partitions().await
    }
}
