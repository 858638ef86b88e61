//! Real-time notifications for connected clients.
//!
//! The lifecycle layer publishes [`RealtimeEvent`]s through the
//! [`RealtimeNotifier`] trait after each store write. The shipped
//! implementation fans out over a `tokio::sync::broadcast` channel; whatever
//! push transport fronts connected clients subscribes to it. Publishing is
//! fire-and-forget: a full or closed channel is logged and dropped, never
//! propagated into the state transition that produced the event.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::store::models::{CallOutcome, CallStatus};
use crate::types::{CallId, CampaignId};

pub mod email;

/// Events pushed to connected clients, each scoped by call or campaign id
/// for selective subscription.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RealtimeEvent {
    CallStatusChanged {
        call_id: CallId,
        status: CallStatus,
    },
    CallCompleted {
        call_id: CallId,
        status: CallStatus,
        outcome: Option<CallOutcome>,
    },
    AnalyticsReady {
        call_id: CallId,
    },
    TranscriptChunk {
        call_id: CallId,
        role: String,
        text: String,
    },
    CampaignProgressChanged {
        campaign_id: CampaignId,
        completed_calls: i32,
        failed_calls: i32,
    },
}

/// Sink for realtime events.
pub trait RealtimeNotifier: Send + Sync {
    /// Publish an event. Must not block and must not fail the caller.
    fn publish(&self, event: RealtimeEvent);
}

/// Notifier backed by a broadcast channel.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<RealtimeEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to the event stream. Receivers that fall behind lose the
    /// oldest events, which is acceptable for display traffic.
    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.tx.subscribe()
    }
}

impl RealtimeNotifier for BroadcastNotifier {
    fn publish(&self, event: RealtimeEvent) {
        // send only errors when there are no subscribers; nothing to do.
        if let Err(e) = self.tx.send(event) {
            tracing::trace!(error = %e, "No realtime subscribers for event");
        }
    }
}

/// Notifier that drops everything; used by tests that don't care.
#[derive(Default)]
pub struct NoopNotifier;

impl RealtimeNotifier for NoopNotifier {
    fn publish(&self, _event: RealtimeEvent) {}
}
