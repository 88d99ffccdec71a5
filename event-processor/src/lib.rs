//! Client-side engine for consuming a partitioned event stream as one
//! logical consumer group across multiple cooperating processes.
//!
//! Each processor instance dynamically claims a fair share of partitions
//! without a central coordinator: the only cross-process state is a
//! [`store::CheckpointStore`] whose optimistic (etag-guarded) writes
//! arbitrate conflicting claims. Claimed partitions are read by managed
//! per-partition pumps that window events, deliver them to user callbacks,
//! and write checkpoints on request.
//!
//! Entry point is [`processor::EventProcessor`]; the interesting machinery
//! lives in [`load_balancer`] (the claiming cycle) and [`pump_manager`]
//! (the per-partition task supervisor).

pub mod client;
pub mod error;
pub mod handler;
pub mod load_balancer;
pub mod processor;
mod pump;
pub mod pump_manager;
pub mod store;
pub mod strategy;
pub mod types;

pub use client::{EventStream, PartitionClient, StreamOptions};
pub use error::{Error, Result};
pub use handler::{CloseReason, EventHandler};
pub use processor::{EventProcessor, ProcessorConfig};
pub use store::{CheckpointStore, InMemoryCheckpointStore};
pub use strategy::LoadBalancingStrategy;
pub use types::{Checkpoint, Event, PartitionOwnership, StartPosition, StreamIdentity};
