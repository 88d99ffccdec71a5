use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::client::EventStream;
use crate::error::Error;
use crate::handler::{
    CloseContext, CloseReason, ErrorContext, EventBatchContext, EventContext, EventHandler,
    InitializationContext, PartitionContext,
};
use crate::store::CheckpointStore;
use crate::types::{Event, StartPosition};

/// Delivery policy for one pump.
#[derive(Debug, Clone)]
pub(crate) struct PumpPolicy {
    pub max_batch_size: usize,
    pub max_wait_time: Option<Duration>,
    pub batch_receive_mode: bool,
}

/// How the read loop ended, before terminal callbacks run.
enum PumpOutcome {
    /// Cancellation was requested; the reason is read from the shared slot.
    Cancelled,
    /// The stream ended normally.
    Completed,
    /// The stream yielded an error.
    Failed(Error),
}

/// One running consumption task for a single partition.
///
/// Lifecycle is Starting -> Running -> Stopping -> Stopped and a pump is
/// never restarted; ownership regained later gets a brand-new pump.
pub(crate) struct PartitionPump {
    context: PartitionContext,
    handler: Arc<dyn EventHandler>,
    store: Arc<dyn CheckpointStore>,
    policy: PumpPolicy,
    cancel: CancellationToken,
    /// Set by the manager before cancelling so the close callback can name
    /// the right reason. Unset means plain shutdown.
    close_reason: Arc<OnceLock<CloseReason>>,
}

impl PartitionPump {
    pub(crate) fn new(
        context: PartitionContext,
        handler: Arc<dyn EventHandler>,
        store: Arc<dyn CheckpointStore>,
        policy: PumpPolicy,
        cancel: CancellationToken,
        close_reason: Arc<OnceLock<CloseReason>>,
    ) -> Self {
        Self {
            context,
            handler,
            store,
            policy,
            cancel,
            close_reason,
        }
    }

    /// Run to completion: initialize, pump events, then fire the terminal
    /// callbacks. Never returns an error; every failure is routed through
    /// `process_error` / logs so the task cannot take the process down.
    pub(crate) async fn run(self, mut stream: EventStream, start_position: StartPosition) {
        let init = InitializationContext {
            partition: self.context.clone(),
            start_position,
        };
        self.handler.initialize(&init).await;

        let outcome = if self.policy.batch_receive_mode {
            self.run_windowed(&mut stream).await
        } else {
            self.run_immediate(&mut stream).await
        };

        // Drop the subscription before user close callbacks run.
        drop(stream);

        let reason = match outcome {
            PumpOutcome::Cancelled => self
                .close_reason
                .get()
                .copied()
                .unwrap_or(CloseReason::Shutdown),
            PumpOutcome::Completed => CloseReason::StreamCompleted,
            PumpOutcome::Failed(error) => {
                let ctx = ErrorContext {
                    partition_id: Some(self.context.partition_id.clone()),
                    error,
                };
                if let Err(e) = self.handler.process_error(&ctx).await {
                    tracing::warn!(
                        partition_id = %self.context.partition_id,
                        error = %e,
                        "process_error callback failed"
                    );
                }
                CloseReason::StreamError
            }
        };

        let close = CloseContext {
            partition: self.context.clone(),
            reason,
        };
        if let Err(e) = self.handler.close(&close).await {
            tracing::warn!(
                partition_id = %self.context.partition_id,
                error = %e,
                "close callback failed"
            );
        }
        tracing::info!(
            partition_id = %self.context.partition_id,
            reason = ?reason,
            "partition pump stopped"
        );
    }

    /// Non-batch mode: deliver each event as soon as it is received.
    async fn run_immediate(&self, stream: &mut EventStream) -> PumpOutcome {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return PumpOutcome::Cancelled,
                item = stream.next() => match item {
                    Some(Ok(event)) => self.deliver_one(event).await,
                    Some(Err(e)) => return PumpOutcome::Failed(e),
                    None => return PumpOutcome::Completed,
                },
            }
        }
    }

    /// Batch mode: window by count or time, whichever boundary comes first.
    ///
    /// With `max_wait_time` set, an expiring window is delivered even when
    /// empty so idle partitions still get a heartbeat. Without it a window
    /// only closes at `max_batch_size`; a partition that never accumulates
    /// that many events never sees a callback, by design of the receive
    /// contract.
    async fn run_windowed(&self, stream: &mut EventStream) -> PumpOutcome {
        loop {
            if self.cancel.is_cancelled() {
                return PumpOutcome::Cancelled;
            }

            let deadline = self
                .policy
                .max_wait_time
                .map(|wait| tokio::time::Instant::now() + wait);
            let window_timeout = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };
            tokio::pin!(window_timeout);

            let mut window: Vec<Event> = Vec::new();
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        // Partial windows are not delivered once stopping.
                        return PumpOutcome::Cancelled;
                    }
                    _ = &mut window_timeout => {
                        self.deliver_window(std::mem::take(&mut window)).await;
                        break;
                    }
                    item = stream.next() => match item {
                        Some(Ok(event)) => {
                            window.push(event);
                            if window.len() >= self.policy.max_batch_size {
                                self.deliver_window(std::mem::take(&mut window)).await;
                                break;
                            }
                        }
                        Some(Err(e)) => return PumpOutcome::Failed(e),
                        None => {
                            if !window.is_empty() {
                                self.deliver_window(window).await;
                            }
                            return PumpOutcome::Completed;
                        }
                    },
                }
            }
        }
    }

    async fn deliver_one(&self, event: Event) {
        let ctx = EventContext::new(self.context.clone(), event, Arc::clone(&self.store));
        if let Err(e) = self.handler.process_event(&ctx).await {
            tracing::warn!(
                partition_id = %self.context.partition_id,
                error = %e,
                "process_event callback failed"
            );
        }
    }

    async fn deliver_window(&self, events: Vec<Event>) {
        let ctx = EventBatchContext::new(self.context.clone(), events, Arc::clone(&self.store));
        if let Err(e) = self.handler.process_event_batch(&ctx).await {
            tracing::warn!(
                partition_id = %self.context.partition_id,
                error = %e,
                "process_event_batch callback failed"
            );
        }
    }
}
