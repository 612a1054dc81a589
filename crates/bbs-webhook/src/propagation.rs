//! Hand-over of translated events to the orchestrator.
//!
//! Propagation is fire-and-forget: each event runs on its own task, after the
//! configured settle delay, and the dispatcher never waits on it.

use async_trait::async_trait;
use bbs_core::{NormalizedEvent, ReindexRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Receiver of normalized events
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn on_event(&self, event: NormalizedEvent);

    async fn on_reindex(&self, request: ReindexRequest);
}

/// Work handed to an [`EventSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum Propagated {
    Event(NormalizedEvent),
    Reindex(ReindexRequest),
}

#[derive(Clone)]
pub struct Propagator {
    sink: Arc<dyn EventSink>,
}

impl Propagator {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// Deliver `work` after `delay` on a detached task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule(&self, work: Propagated, delay: Duration) -> JoinHandle<()> {
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            if !delay.is_zero() {
                debug!(delay_ms = delay.as_millis() as u64, "Delaying event propagation");
                tokio::time::sleep(delay).await;
            }
            match work {
                Propagated::Event(event) => sink.on_event(event).await,
                Propagated::Reindex(request) => sink.on_reindex(request).await,
            }
        })
    }
}

/// Forwards propagated work into a channel.
pub struct ChannelSink {
    sender: mpsc::Sender<Propagated>,
}

impl ChannelSink {
    pub fn new(buffer_size: usize) -> (Self, mpsc::Receiver<Propagated>) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        (Self { sender }, receiver)
    }

    async fn forward(&self, work: Propagated) {
        if self.sender.send(work).await.is_err() {
            warn!("Event receiver dropped, discarding propagated event");
        }
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn on_event(&self, event: NormalizedEvent) {
        self.forward(Propagated::Event(event)).await;
    }

    async fn on_reindex(&self, request: ReindexRequest) {
        self.forward(Propagated::Reindex(request)).await;
    }
}
