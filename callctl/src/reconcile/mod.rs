//! Reconciliation poller: repairs call state when webhook delivery fails.
//!
//! A webhook can be lost to a network partition or tunnel restart, leaving a
//! call stranded in a non-terminal status forever. The reconciler
//! periodically finds calls whose age exceeds a grace window, asks the
//! provider for their authoritative state, and pushes ended calls through
//! the same terminal processing as the webhook path
//! ([`CallLifecycle::process_ended_call`]); shared code, so the two paths
//! cannot drift.
//!
//! The daemon owns its own interval loop and shutdown; a manual-trigger
//! channel runs an on-demand sweep through the same single consumer, so
//! sweeps never overlap.

use std::sync::Arc;

use chrono::{Duration, Utc};
use metrics::counter;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::errors::Error;
use crate::lifecycle::{CallLifecycle, EndedCallArtifacts};
use crate::provider::VoiceProvider;
use crate::store::models::Call;
use crate::store::CallStore;
use crate::types::abbrev_uuid;

/// Outcome counts for one sweep.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SweepReport {
    /// Stuck calls examined.
    pub scanned: usize,
    /// Calls the provider reported ended and we converged.
    pub synced: usize,
    /// Calls still active at the provider; left alone.
    pub skipped: usize,
    /// Calls whose sync failed; logged, retried next sweep.
    pub errored: usize,
}

/// Handle for requesting an on-demand sweep from the daemon.
#[derive(Clone)]
pub struct ReconcilerHandle {
    trigger_tx: mpsc::Sender<oneshot::Sender<SweepReport>>,
}

impl ReconcilerHandle {
    /// Run one sweep now and wait for its report. Queued behind any sweep
    /// already in flight; never concurrent with it.
    pub async fn trigger_sweep(&self) -> Result<SweepReport, Error> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.trigger_tx
            .send(reply_tx)
            .await
            .map_err(|_| Error::Internal {
                operation: "trigger reconciliation sweep: daemon not running".to_string(),
            })?;
        reply_rx.await.map_err(|_| Error::Internal {
            operation: "receive reconciliation sweep report".to_string(),
        })
    }
}

/// The reconciliation poller.
pub struct Reconciler {
    store: Arc<dyn CallStore>,
    provider: Arc<dyn VoiceProvider>,
    lifecycle: CallLifecycle,
    interval: std::time::Duration,
    /// Minimum age before a non-terminal call counts as stuck. Long enough
    /// that ordinary webhook latency cannot trip it.
    grace: Duration,
    batch_limit: i64,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn CallStore>,
        provider: Arc<dyn VoiceProvider>,
        lifecycle: CallLifecycle,
        interval: std::time::Duration,
        grace: Duration,
        batch_limit: i64,
    ) -> Self {
        Self {
            store,
            provider,
            lifecycle,
            interval,
            grace,
            batch_limit,
        }
    }

    /// Run one complete sweep over all stuck calls. One call's failure is
    /// counted and logged; it never aborts the rest of the sweep.
    pub async fn sweep(&self) -> SweepReport {
        let cutoff = Utc::now() - self.grace;
        let stuck = match self.store.list_stuck_calls(cutoff, self.batch_limit).await {
            Ok(calls) => calls,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list stuck calls");
                return SweepReport::default();
            }
        };

        let mut report = SweepReport {
            scanned: stuck.len(),
            ..Default::default()
        };

        if stuck.is_empty() {
            tracing::debug!("No stuck calls to reconcile");
            return report;
        }

        tracing::info!(count = stuck.len(), "Reconciling stuck calls");

        for call in &stuck {
            match self.sync_call(call).await {
                Ok(true) => report.synced += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    report.errored += 1;
                    tracing::warn!(
                        error = %e,
                        call_id = %abbrev_uuid(&call.id),
                        "Failed to reconcile call"
                    );
                }
            }
        }

        counter!("callctl_reconcile_sweeps_total").increment(1);
        counter!("callctl_reconcile_synced_total").increment(report.synced as u64);
        tracing::info!(
            scanned = report.scanned,
            synced = report.synced,
            skipped = report.skipped,
            errored = report.errored,
            "Reconciliation sweep finished"
        );

        report
    }

    /// Pull one call's authoritative state from the provider and converge
    /// local state. Returns `true` when the call was ended and processed,
    /// `false` when the provider reports it still active.
    pub async fn sync_call(&self, call: &Call) -> Result<bool, Error> {
        let provider_call_id = call.provider_call_id.as_deref().ok_or_else(|| Error::BadRequest {
            message: "call has no provider call id to sync against".to_string(),
        })?;

        let provider_call = self.provider.get_call(provider_call_id).await?;

        if !provider_call.is_ended() {
            tracing::debug!(
                call_id = %abbrev_uuid(&call.id),
                status = ?provider_call.status,
                "Provider reports call still active, skipping"
            );
            return Ok(false);
        }

        let artifacts = EndedCallArtifacts::from_provider_call(&provider_call);
        self.lifecycle
            .process_ended_call(call, artifacts, true)
            .await
            .map_err(Error::from)?;

        tracing::info!(
            call_id = %abbrev_uuid(&call.id),
            ended_reason = ?provider_call.ended_reason,
            "Reconciled stuck call from provider state"
        );
        Ok(true)
    }

    /// Spawn the daemon. Returns the handle for manual sweeps; the daemon
    /// stops when `shutdown` is cancelled.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> ReconcilerHandle {
        let (trigger_tx, trigger_rx) = mpsc::channel(4);
        tokio::spawn(self.run_daemon(shutdown, trigger_rx));
        ReconcilerHandle { trigger_tx }
    }

    /// Daemon loop: interval ticks and manual triggers feed the same
    /// consumer, so two sweeps can never run at once.
    async fn run_daemon(
        self: Arc<Self>,
        shutdown: CancellationToken,
        mut trigger_rx: mpsc::Receiver<oneshot::Sender<SweepReport>>,
    ) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            grace_secs = self.grace.num_seconds(),
            "Starting reconciliation daemon"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so a fresh boot doesn't
        // sweep before the provider has had a chance to deliver anything.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Reconciliation daemon shutting down");
                    break;
                }

                _ = interval.tick() => {
                    self.sweep().await;
                }

                request = trigger_rx.recv() => {
                    match request {
                        Some(reply_tx) => {
                            let report = self.sweep().await;
                            // Caller may have given up waiting; fine.
                            let _ = reply_tx.send(report);
                        }
                        None => {
                            tracing::debug!("Reconciler trigger channel closed");
                            break;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NoopNotifier;
    use crate::provider::dummy::DummyProvider;
    use crate::provider::types::ProviderCall;
    use crate::store::in_memory::InMemoryCallStore;
    use crate::store::models::{CallCreateRequest, CallDirection, CallOutcome, CallStatus};

    fn reconciler_with(store: Arc<InMemoryCallStore>, provider: Arc<DummyProvider>) -> Reconciler {
        let lifecycle = CallLifecycle::new(
            store.clone(),
            Arc::new(NoopNotifier),
            None,
            Duration::days(30),
        );
        Reconciler::new(
            store,
            provider,
            lifecycle,
            std::time::Duration::from_secs(120),
            Duration::zero(), // everything counts as stuck in tests
            100,
        )
    }

    async fn stuck_call(store: &InMemoryCallStore, provider_call_id: &str) -> Call {
        store
            .create_call(CallCreateRequest {
                provider_call_id: Some(provider_call_id.to_string()),
                direction: CallDirection::Outbound,
                phone_number: "+15558880001".to_string(),
                status: CallStatus::InProgress,
                contact_id: None,
                campaign_id: None,
            })
            .await
            .unwrap()
    }

    fn ended_provider_call(id: &str, ended_reason: &str) -> ProviderCall {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "status": "ended",
            "endedReason": ended_reason,
            "startedAt": "2026-03-02T10:00:00Z",
            "endedAt": "2026-03-02T10:01:00Z",
            "analysis": {"summary": "Recovered by poller."}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_sweep_converges_ended_call() {
        let store = Arc::new(InMemoryCallStore::new());
        let provider = Arc::new(DummyProvider::new());
        let call = stuck_call(&store, "prov-stuck").await;
        provider.set_call_state(ended_provider_call("prov-stuck", "customer-ended-call"));

        let reconciler = reconciler_with(store.clone(), provider);
        // Let the created_at timestamps fall behind the cutoff.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let report = reconciler.sweep().await;

        assert_eq!(report.scanned, 1);
        assert_eq!(report.synced, 1);
        assert_eq!(report.errored, 0);

        let call = store.get_call(call.id).await.unwrap().unwrap();
        assert_eq!(call.status, CallStatus::Completed);
        assert_eq!(call.duration_secs, Some(60));

        let analytics = store.get_analytics(call.id).await.unwrap().unwrap();
        assert!(analytics.synced_by_reconciler);
    }

    #[tokio::test]
    async fn test_sweep_skips_still_active_calls() {
        let store = Arc::new(InMemoryCallStore::new());
        let provider = Arc::new(DummyProvider::new());
        stuck_call(&store, "prov-live").await;
        provider.set_call_state(
            serde_json::from_value(serde_json::json!({"id": "prov-live", "status": "in-progress"})).unwrap(),
        );

        let reconciler = reconciler_with(store.clone(), provider);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let report = reconciler.sweep().await;

        assert_eq!(report.skipped, 1);
        assert_eq!(report.synced, 0);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_sweep() {
        let store = Arc::new(InMemoryCallStore::new());
        let provider = Arc::new(DummyProvider::new());

        // First call unknown at the provider (sync errors), second ended.
        stuck_call(&store, "prov-gone").await;
        stuck_call(&store, "prov-ok").await;
        provider.set_call_state(ended_provider_call("prov-ok", "customer-ended-call"));

        let reconciler = reconciler_with(store.clone(), provider);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let report = reconciler.sweep().await;

        assert_eq!(report.scanned, 2);
        assert_eq!(report.synced, 1);
        assert_eq!(report.errored, 1);
    }

    #[tokio::test]
    async fn test_double_sweep_is_noop_on_second_pass() {
        let store = Arc::new(InMemoryCallStore::new());
        let provider = Arc::new(DummyProvider::new());
        let call = stuck_call(&store, "prov-twice").await;
        provider.set_call_state(ended_provider_call("prov-twice", "customer-ended-call"));

        let reconciler = reconciler_with(store.clone(), provider);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let first = reconciler.sweep().await;
        assert_eq!(first.synced, 1);

        // The call is terminal now, so the second sweep scans nothing.
        let second = reconciler.sweep().await;
        assert_eq!(second.scanned, 0);

        let call = store.get_call(call.id).await.unwrap().unwrap();
        assert_eq!(call.status, CallStatus::Completed);
        assert_eq!(call.outcome, Some(CallOutcome::NoResponse));
    }

    #[tokio::test]
    async fn test_manual_trigger_runs_sweep() {
        let store = Arc::new(InMemoryCallStore::new());
        let provider = Arc::new(DummyProvider::new());
        let call = stuck_call(&store, "prov-manual").await;
        provider.set_call_state(ended_provider_call("prov-manual", "customer-ended-call"));

        let reconciler = Arc::new(reconciler_with(store.clone(), provider));
        let shutdown = CancellationToken::new();
        let handle = reconciler.spawn(shutdown.clone());

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let report = handle.trigger_sweep().await.unwrap();
        assert_eq!(report.synced, 1);

        let call = store.get_call(call.id).await.unwrap().unwrap();
        assert!(call.status.is_terminal());

        shutdown.cancel();
    }
}
