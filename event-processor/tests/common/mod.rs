#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::StreamExt;

use event_processor::client::{EventStream, PartitionClient, StreamOptions};
use event_processor::error::{Error, Result};
use event_processor::handler::{
    CloseContext, CloseReason, ErrorContext, EventBatchContext, EventContext, EventHandler,
    InitializationContext,
};
use event_processor::load_balancer::PartitionLoadBalancer;
use event_processor::pump_manager::{PartitionPumpManager, PumpOptions};
use event_processor::store::{CheckpointStore, InMemoryCheckpointStore};
use event_processor::strategy::LoadBalancingStrategy;
use event_processor::types::{Event, PartitionOwnership, StartPosition, StreamIdentity};

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Route engine logs through the test harness; `RUST_LOG` filters as usual.
pub fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

pub fn identity() -> StreamIdentity {
    StreamIdentity {
        namespace: "ns".to_string(),
        stream_name: "stream".to_string(),
        consumer_group: "cg".to_string(),
    }
}

pub fn make_event(sequence_number: i64) -> Event {
    Event::new(
        format!("event-{sequence_number}"),
        sequence_number * 100,
        sequence_number,
    )
}

pub async fn wait_for_condition<F, Fut>(timeout: Duration, interval: Duration, f: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if f().await {
            return;
        }
        tokio::time::sleep(interval).await;
    }
    panic!("condition not met within {timeout:?}");
}

// ── Scripted stream client ──────────────────────────────────────

/// Stream client whose partition streams are installed by the test. A
/// partition without an installed script yields a stream that stays open
/// and never produces an event.
pub struct ScriptedPartitionClient {
    partitions: Vec<String>,
    streams: StdMutex<HashMap<String, EventStream>>,
    /// Every open call, in order, with the resolved start position.
    pub opens: StdMutex<Vec<(String, StartPosition)>>,
    fail_partition_ids: bool,
}

impl ScriptedPartitionClient {
    pub fn new(partitions: &[&str]) -> Self {
        Self {
            partitions: partitions.iter().map(|p| p.to_string()).collect(),
            streams: StdMutex::new(HashMap::new()),
            opens: StdMutex::new(Vec::new()),
            fail_partition_ids: false,
        }
    }

    /// A client whose `partition_ids` call always fails.
    pub fn broken() -> Self {
        Self {
            partitions: Vec::new(),
            streams: StdMutex::new(HashMap::new()),
            opens: StdMutex::new(Vec::new()),
            fail_partition_ids: true,
        }
    }

    pub fn install_stream(&self, partition_id: &str, stream: EventStream) {
        self.streams
            .lock()
            .unwrap()
            .insert(partition_id.to_string(), stream);
    }

    pub fn open_count(&self, partition_id: &str) -> usize {
        self.opens
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == partition_id)
            .count()
    }
}

#[async_trait]
impl PartitionClient for ScriptedPartitionClient {
    async fn partition_ids(&self) -> Result<Vec<String>> {
        if self.fail_partition_ids {
            return Err(Error::client(anyhow!("metadata endpoint unavailable")));
        }
        Ok(self.partitions.clone())
    }

    async fn open_partition_stream(
        &self,
        partition_id: &str,
        start: StartPosition,
        _options: &StreamOptions,
    ) -> Result<EventStream> {
        self.opens
            .lock()
            .unwrap()
            .push((partition_id.to_string(), start));
        let installed = self.streams.lock().unwrap().remove(partition_id);
        Ok(installed.unwrap_or_else(|| futures::stream::pending().boxed()))
    }
}

pub fn events_then_pending(events: Vec<Event>) -> EventStream {
    futures::stream::iter(events.into_iter().map(Ok))
        .chain(futures::stream::pending())
        .boxed()
}

pub fn events_then_complete(events: Vec<Event>) -> EventStream {
    futures::stream::iter(events.into_iter().map(Ok)).boxed()
}

pub fn events_then_error(events: Vec<Event>, message: &str) -> EventStream {
    let error = Error::Stream {
        partition_id: "?".to_string(),
        source: anyhow!("{message}"),
    };
    futures::stream::iter(
        events
            .into_iter()
            .map(Ok)
            .chain(std::iter::once(Err(error))),
    )
    .boxed()
}

// ── Collecting handler ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Callback {
    Initialized {
        partition_id: String,
        start: StartPosition,
    },
    Event {
        partition_id: String,
        sequence_number: i64,
    },
    Batch {
        partition_id: String,
        sequence_numbers: Vec<i64>,
    },
    Error {
        partition_id: Option<String>,
        message: String,
    },
    Closed {
        partition_id: String,
        reason: CloseReason,
    },
}

/// Handler recording every callback, optionally checkpointing each batch
/// and optionally failing its close callback.
pub struct CollectingHandler {
    pub calls: Arc<StdMutex<Vec<Callback>>>,
    pub checkpoint_on_delivery: bool,
    pub fail_close: bool,
}

impl CollectingHandler {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(StdMutex::new(Vec::new())),
            checkpoint_on_delivery: false,
            fail_close: false,
        }
    }

    pub fn checkpointing() -> Self {
        Self {
            checkpoint_on_delivery: true,
            ..Self::new()
        }
    }

    pub fn with_failing_close() -> Self {
        Self {
            fail_close: true,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Vec<Callback> {
        self.calls.lock().unwrap().clone()
    }

    pub fn batches(&self) -> Vec<Vec<i64>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Callback::Batch {
                    sequence_numbers, ..
                } => Some(sequence_numbers),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<(Option<String>, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Callback::Error {
                    partition_id,
                    message,
                } => Some((partition_id, message)),
                _ => None,
            })
            .collect()
    }

    pub fn closes(&self) -> Vec<(String, CloseReason)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Callback::Closed {
                    partition_id,
                    reason,
                } => Some((partition_id, reason)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventHandler for CollectingHandler {
    async fn initialize(&self, ctx: &InitializationContext) {
        self.calls.lock().unwrap().push(Callback::Initialized {
            partition_id: ctx.partition.partition_id.clone(),
            start: ctx.start_position,
        });
    }

    async fn process_event(&self, ctx: &EventContext) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(Callback::Event {
            partition_id: ctx.partition.partition_id.clone(),
            sequence_number: ctx.event.sequence_number,
        });
        if self.checkpoint_on_delivery {
            drop(ctx.update_checkpoint().await);
        }
        Ok(())
    }

    async fn process_event_batch(&self, ctx: &EventBatchContext) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(Callback::Batch {
            partition_id: ctx.partition.partition_id.clone(),
            sequence_numbers: ctx.events.iter().map(|e| e.sequence_number).collect(),
        });
        if self.checkpoint_on_delivery {
            drop(ctx.update_checkpoint().await);
        }
        Ok(())
    }

    async fn process_error(&self, ctx: &ErrorContext) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(Callback::Error {
            partition_id: ctx.partition_id.clone(),
            message: ctx.error.to_string(),
        });
        Ok(())
    }

    async fn close(&self, ctx: &CloseContext) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(Callback::Closed {
            partition_id: ctx.partition.partition_id.clone(),
            reason: ctx.reason,
        });
        if self.fail_close {
            return Err(anyhow!("close callback exploded"));
        }
        Ok(())
    }
}

// ── Component builders ──────────────────────────────────────────

pub struct Instance {
    pub pumps: Arc<PartitionPumpManager>,
    pub balancer: PartitionLoadBalancer,
}

pub fn build_instance(
    owner_id: &str,
    strategy: LoadBalancingStrategy,
    store: Arc<InMemoryCheckpointStore>,
    client: Arc<ScriptedPartitionClient>,
    handler: Arc<CollectingHandler>,
    options: PumpOptions,
) -> Instance {
    init_tracing();
    let pumps = Arc::new(PartitionPumpManager::new(
        identity(),
        handler.clone(),
        client.clone(),
        store.clone(),
        options,
    ));
    let balancer = PartitionLoadBalancer::new(
        identity(),
        owner_id.to_string(),
        strategy,
        Duration::from_secs(30),
        store,
        client,
        Arc::clone(&pumps),
        handler,
    );
    Instance { pumps, balancer }
}

pub fn batch_options(max_batch_size: usize, max_wait_time: Option<Duration>) -> PumpOptions {
    PumpOptions {
        max_batch_size,
        max_wait_time,
        batch_receive_mode: true,
        ..PumpOptions::default()
    }
}

/// Seed the store with active ownership records for `owner_id`.
pub async fn seed_ownership(
    store: &InMemoryCheckpointStore,
    owner_id: &str,
    partitions: &[&str],
) -> Vec<PartitionOwnership> {
    let requests: Vec<PartitionOwnership> = partitions
        .iter()
        .map(|p| PartitionOwnership {
            namespace: "ns".to_string(),
            stream_name: "stream".to_string(),
            consumer_group: "cg".to_string(),
            partition_id: p.to_string(),
            owner_id: owner_id.to_string(),
            last_modified_time: chrono::Utc::now(),
            etag: None,
        })
        .collect();
    let accepted = store.claim_ownership(&requests).await.unwrap();
    assert_eq!(accepted.len(), partitions.len(), "seeding must claim all");
    accepted
}

/// Count active ownership per owner as recorded in the store.
pub async fn ownership_counts(store: &InMemoryCheckpointStore) -> HashMap<String, usize> {
    let now = chrono::Utc::now();
    let mut counts = HashMap::new();
    for record in store.list_ownership(&identity()).await.unwrap() {
        if record.is_active(now, Duration::from_secs(30)) {
            *counts.entry(record.owner_id).or_insert(0) += 1;
        }
    }
    counts
}
