//! Call lifecycle service: applies event-driven transitions, runs terminal
//! processing, and fans out side effects.
//!
//! The webhook ingestor and the reconciliation poller both drive state
//! through this service, so refinement rules, classification, and campaign
//! bookkeeping live in exactly one place. Transition *planning* is pure (see
//! [`transition`]); this module owns the store writes and the follow-on
//! effects.

use std::sync::Arc;

use chrono::{Duration, Utc};
use metrics::counter;

use crate::lifecycle::classifier::{classify, ClassifierInput, StructuredAnalysis};
use crate::lifecycle::transition::{
    map_provider_status, plan_transition, refine_ended_status, transition_write, TransitionOutcome,
};
use crate::notify::email::{AppointmentContact, AppointmentMailer};
use crate::notify::{RealtimeEvent, RealtimeNotifier};
use crate::provider::types::ProviderCall;
use crate::store::models::{
    Call, CallAnalyticsUpsertRequest, CallCompletionUpdate, CallDirection, CallOutcome, CallStatus,
    CampaignContactStatus, TranscriptTurn, TranscriptUpsertRequest,
};
use crate::store::{CallStore, StoreError};
use crate::types::abbrev_uuid;

pub mod classifier;
pub mod transition;

/// Everything terminal processing needs about an ended call, regardless of
/// whether it arrived in an end-of-call-report webhook or was pulled from the
/// provider by the reconciler.
#[derive(Debug, Clone, Default)]
pub struct EndedCallArtifacts {
    pub ended_reason: Option<String>,
    pub duration_secs: Option<i32>,
    pub cost: Option<rust_decimal::Decimal>,
    pub transcript_text: Option<String>,
    pub turns: Vec<TranscriptTurn>,
    pub recording_url: Option<String>,
    pub recording_duration_secs: Option<f64>,
    pub summary: Option<String>,
    pub success: Option<bool>,
    pub structured_data: Option<serde_json::Value>,
    pub raw_analysis: Option<serde_json::Value>,
}

impl EndedCallArtifacts {
    /// Extract artifacts from an authoritative provider call record.
    pub fn from_provider_call(call: &ProviderCall) -> Self {
        let turns = call
            .artifact
            .as_ref()
            .map(|artifact| {
                artifact
                    .messages
                    .iter()
                    .filter_map(|m| {
                        m.message.as_ref().map(|content| TranscriptTurn {
                            role: m.role.clone(),
                            content: content.clone(),
                            offset_secs: m.seconds_from_start.unwrap_or(0.0),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            ended_reason: call.ended_reason.clone(),
            duration_secs: call.duration_secs(),
            cost: call.cost,
            transcript_text: call.artifact.as_ref().and_then(|a| a.transcript.clone()),
            turns,
            recording_url: call.artifact.as_ref().and_then(|a| a.recording_url.clone()),
            recording_duration_secs: call.artifact.as_ref().and_then(|a| a.recording_duration),
            summary: call.analysis.as_ref().and_then(|a| a.summary.clone()),
            success: call.analysis.as_ref().and_then(|a| a.success()),
            structured_data: call.analysis.as_ref().and_then(|a| a.structured_data.clone()),
            raw_analysis: call
                .analysis
                .as_ref()
                .and_then(|a| serde_json::to_value(a).ok()),
        }
    }

    fn has_transcript(&self) -> bool {
        self.transcript_text.is_some() || !self.turns.is_empty() || self.recording_url.is_some()
    }
}

/// The lifecycle service. Cheap to clone; shared by the webhook handlers and
/// the reconciler.
#[derive(Clone)]
pub struct CallLifecycle {
    store: Arc<dyn CallStore>,
    notifier: Arc<dyn RealtimeNotifier>,
    mailer: Option<Arc<AppointmentMailer>>,
    /// How far back to search for the outbound call an inbound callback
    /// answers.
    callback_lookback: Duration,
}

impl CallLifecycle {
    pub fn new(
        store: Arc<dyn CallStore>,
        notifier: Arc<dyn RealtimeNotifier>,
        mailer: Option<Arc<AppointmentMailer>>,
        callback_lookback: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            mailer,
            callback_lookback,
        }
    }

    /// Apply a provider status-update event.
    pub async fn handle_status_update(
        &self,
        call: &Call,
        provider_status: &str,
        ended_reason: Option<&str>,
    ) -> Result<TransitionOutcome, StoreError> {
        let Some(target) = map_provider_status(provider_status, ended_reason) else {
            tracing::debug!(
                call_id = %abbrev_uuid(&call.id),
                status = provider_status,
                "Ignoring unknown provider status"
            );
            return Ok(TransitionOutcome::NoOp { status: call.status });
        };

        let outcome = self.apply_status(call, target, false).await?;

        // A bare "ended" update may carry the reason before the full report
        // arrives; keep it.
        if let (Some(reason), true) = (ended_reason, target.is_terminal()) {
            self.store
                .record_completion(
                    call.id,
                    CallCompletionUpdate {
                        ended_reason: Some(reason.to_string()),
                        ..Default::default()
                    },
                )
                .await?;
        }

        Ok(outcome)
    }

    /// Promote a call to InProgress on conversation/speech activity. Some
    /// provider paths (browser-originated calls) never emit an explicit
    /// in-progress status update; the first conversation event is the only
    /// signal the call is live.
    pub async fn promote_in_progress(&self, call: &Call) -> Result<TransitionOutcome, StoreError> {
        if call.status.rank() >= CallStatus::InProgress.rank() {
            return Ok(TransitionOutcome::NoOp { status: call.status });
        }
        self.apply_status(call, CallStatus::InProgress, false).await
    }

    /// A hang event ends the call without a report.
    pub async fn handle_hang(&self, call: &Call) -> Result<TransitionOutcome, StoreError> {
        self.apply_status(call, CallStatus::Completed, false).await
    }

    /// Cancel locally. Does not retract a live provider call.
    pub async fn cancel(&self, call: &Call) -> Result<TransitionOutcome, StoreError> {
        self.apply_status(call, CallStatus::Cancelled, false).await
    }

    /// Plan and apply one status transition, with campaign bookkeeping and
    /// notifications on entry to a terminal state.
    pub async fn apply_status(
        &self,
        call: &Call,
        target: CallStatus,
        authoritative: bool,
    ) -> Result<TransitionOutcome, StoreError> {
        let planned = plan_transition(call.status, target, authoritative);

        match planned {
            TransitionOutcome::NoOp { status } => {
                tracing::debug!(
                    call_id = %abbrev_uuid(&call.id),
                    status = %status,
                    "Transition is a no-op"
                );
                Ok(planned)
            }
            TransitionOutcome::Rejected { from, to, reason } => {
                tracing::debug!(
                    call_id = %abbrev_uuid(&call.id),
                    from = %from,
                    to = %to,
                    reason,
                    "Transition rejected"
                );
                counter!("callctl_transitions_total", "outcome" => "rejected").increment(1);
                Ok(planned)
            }
            TransitionOutcome::Applied { from, to } => {
                let updated = self
                    .store
                    .apply_transition(call.id, transition_write(from, to, Utc::now()))
                    .await?;

                if !updated {
                    // The guard no longer matched: another writer moved the
                    // call first. Converged, nothing further to do.
                    tracing::debug!(
                        call_id = %abbrev_uuid(&call.id),
                        from = %from,
                        to = %to,
                        "Transition lost the guard race, treating as no-op"
                    );
                    return Ok(TransitionOutcome::NoOp { status: from });
                }

                counter!("callctl_transitions_total", "outcome" => "applied").increment(1);
                tracing::info!(
                    call_id = %abbrev_uuid(&call.id),
                    from = %from,
                    to = %to,
                    "Call transitioned"
                );

                self.notifier.publish(RealtimeEvent::CallStatusChanged {
                    call_id: call.id,
                    status: to,
                });

                if to.is_terminal() && !from.is_terminal() {
                    self.finalize_campaign(call, to).await;
                    self.notifier.publish(RealtimeEvent::CallCompleted {
                        call_id: call.id,
                        status: to,
                        outcome: call.outcome,
                    });
                }

                Ok(planned)
            }
        }
    }

    /// Shared terminal path for end-of-call-report webhooks and
    /// reconciliation: transition, transcript, classification, analytics,
    /// and side effects. Idempotent per call; re-running with the same
    /// artifacts converges on the same state.
    pub async fn process_ended_call(
        &self,
        call: &Call,
        artifacts: EndedCallArtifacts,
        via_reconciler: bool,
    ) -> Result<(), StoreError> {
        let terminal = refine_ended_status(artifacts.ended_reason.as_deref());
        let transition = self.apply_status(call, terminal, true).await?;
        let newly_terminal = matches!(
            transition,
            TransitionOutcome::Applied { from, .. } if !from.is_terminal()
        );

        if artifacts.has_transcript() {
            self.store
                .upsert_transcript(
                    call.id,
                    TranscriptUpsertRequest {
                        full_text: artifacts.transcript_text.clone(),
                        turns: artifacts.turns.clone(),
                        recording_url: artifacts.recording_url.clone(),
                        recording_duration_secs: artifacts.recording_duration_secs,
                    },
                )
                .await?;
        }

        let ended_at = call.ended_at.unwrap_or_else(Utc::now);
        let structured = StructuredAnalysis::from_raw(artifacts.structured_data.as_ref());
        let classification = classify(&ClassifierInput {
            structured: structured.clone(),
            success: artifacts.success,
            ended_reason: artifacts.ended_reason.as_deref(),
            duration_secs: artifacts.duration_secs,
            transcript: artifacts.transcript_text.as_deref(),
            ended_at,
        });

        self.store
            .record_completion(
                call.id,
                CallCompletionUpdate {
                    ended_reason: artifacts.ended_reason.clone(),
                    duration_secs: artifacts.duration_secs,
                    cost: artifacts.cost,
                    outcome: Some(classification.outcome),
                    result: Some(classification.result),
                },
            )
            .await?;

        self.store
            .upsert_analytics(
                call.id,
                CallAnalyticsUpsertRequest {
                    summary: artifacts.summary.clone(),
                    interest_level: structured.interest_level.clone(),
                    sentiment: structured.sentiment.clone(),
                    appointment_booked: structured.appointment_booked.unwrap_or(false),
                    appointment_date: structured.appointment_date.clone(),
                    appointment_time: structured.appointment_time.clone(),
                    appointment_at: classification.appointment_at,
                    follow_up_needed: structured.follow_up_needed.unwrap_or(false),
                    confirmed_name: structured.confirmed_name.clone(),
                    confirmed_phone: structured.confirmed_phone.clone(),
                    confirmed_email: structured.confirmed_email.clone(),
                    raw_analysis: artifacts.raw_analysis.clone(),
                    synced_by_reconciler: via_reconciler,
                },
            )
            .await?;

        self.notifier.publish(RealtimeEvent::AnalyticsReady { call_id: call.id });

        // First-observation side effects only; reprocessing the same report
        // must not re-notify or re-propagate.
        if newly_terminal {
            if classification.appointment_at.is_some() || structured.appointment_booked == Some(true) {
                self.send_appointment_email(call, &structured, &artifacts, classification.appointment_at)
                    .await;
            }

            if call.direction == CallDirection::Inbound
                && matches!(classification.outcome, CallOutcome::Success | CallOutcome::Partial)
            {
                self.propagate_callback_outcome(call, classification.outcome, classification.result)
                    .await;
            }
        }

        Ok(())
    }

    /// Campaign bookkeeping when a call enters a terminal state.
    ///
    /// Runs inside the same logical update as the transition (immediately
    /// after the guarded write that won), so observers never see a terminal
    /// call whose campaign counters are about to change out from under them
    /// in a different order.
    async fn finalize_campaign(&self, call: &Call, terminal: CallStatus) {
        let Some(campaign_id) = call.campaign_id else {
            return;
        };

        let failed = terminal.counts_as_failed();
        if let Err(e) = self.store.increment_campaign_counters(campaign_id, failed).await {
            tracing::error!(
                error = %e,
                campaign_id = %abbrev_uuid(&campaign_id),
                "Failed to update campaign counters"
            );
            return;
        }

        if let Some(contact_id) = call.contact_id {
            if let Err(e) = self
                .store
                .set_campaign_contact_status(campaign_id, contact_id, CampaignContactStatus::Completed)
                .await
            {
                tracing::warn!(
                    error = %e,
                    campaign_id = %abbrev_uuid(&campaign_id),
                    contact_id = %abbrev_uuid(&contact_id),
                    "Failed to update campaign contact status"
                );
            }
        }

        match self.store.pending_contact_count(campaign_id).await {
            Ok(0) => {
                if let Err(e) = self.store.complete_campaign(campaign_id).await {
                    tracing::error!(
                        error = %e,
                        campaign_id = %abbrev_uuid(&campaign_id),
                        "Failed to complete campaign"
                    );
                } else {
                    tracing::info!(campaign_id = %abbrev_uuid(&campaign_id), "Campaign completed");
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    campaign_id = %abbrev_uuid(&campaign_id),
                    "Failed to count pending campaign contacts"
                );
            }
        }

        if let Ok(Some(campaign)) = self.store.get_campaign(campaign_id).await {
            self.notifier.publish(RealtimeEvent::CampaignProgressChanged {
                campaign_id,
                completed_calls: campaign.completed_calls,
                failed_calls: campaign.failed_calls,
            });
        }
    }

    /// Fire-and-forget appointment notification. Prefers identity confirmed
    /// verbally during the call over the stored contact record.
    async fn send_appointment_email(
        &self,
        call: &Call,
        structured: &StructuredAnalysis,
        artifacts: &EndedCallArtifacts,
        appointment_at: Option<chrono::DateTime<Utc>>,
    ) {
        let Some(mailer) = self.mailer.clone() else {
            return;
        };

        let stored_contact = match call.contact_id {
            Some(contact_id) => self.store.get_contact(contact_id).await.ok().flatten(),
            None => None,
        };

        let contact = AppointmentContact {
            name: structured
                .confirmed_name
                .clone()
                .or_else(|| stored_contact.as_ref().and_then(|c| c.name.clone())),
            phone: structured
                .confirmed_phone
                .clone()
                .or_else(|| stored_contact.as_ref().map(|c| c.phone_number.clone()))
                .or_else(|| Some(call.phone_number.clone())),
            email: structured
                .confirmed_email
                .clone()
                .or_else(|| stored_contact.as_ref().and_then(|c| c.email.clone())),
        };

        let raw_date = structured.appointment_date.clone();
        let raw_time = structured.appointment_time.clone();
        let summary = artifacts.summary.clone();
        let call_id = call.id;

        tokio::spawn(async move {
            if let Err(e) = mailer
                .send_appointment_booked(
                    &contact,
                    appointment_at,
                    raw_date.as_deref(),
                    raw_time.as_deref(),
                    summary.as_deref(),
                )
                .await
            {
                tracing::warn!(
                    error = %e,
                    call_id = %abbrev_uuid(&call_id),
                    "Failed to send appointment notification email"
                );
            }
        });
    }

    /// An inbound callback's business outcome belongs to the relationship:
    /// copy it onto the most recent outbound call to the same number.
    async fn propagate_callback_outcome(&self, call: &Call, outcome: CallOutcome, result: crate::store::models::CallResult) {
        let since = Utc::now() - self.callback_lookback;
        match self.store.latest_outbound_call_to(&call.phone_number, since).await {
            Ok(Some(outbound)) if outbound.id != call.id => {
                if let Err(e) = self.store.set_outcome(outbound.id, outcome, result).await {
                    tracing::warn!(
                        error = %e,
                        call_id = %abbrev_uuid(&call.id),
                        outbound_id = %abbrev_uuid(&outbound.id),
                        "Failed to propagate callback outcome"
                    );
                } else {
                    tracing::info!(
                        call_id = %abbrev_uuid(&call.id),
                        outbound_id = %abbrev_uuid(&outbound.id),
                        outcome = outcome.as_str(),
                        "Propagated inbound callback outcome to outbound call"
                    );
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    call_id = %abbrev_uuid(&call.id),
                    "Failed to look up outbound call for callback propagation"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NoopNotifier;
    use crate::store::in_memory::InMemoryCallStore;
    use crate::store::models::{CallCreateRequest, Campaign, CampaignContact, CampaignStatus, Contact};
    use uuid::Uuid;

    fn lifecycle(store: Arc<InMemoryCallStore>) -> CallLifecycle {
        CallLifecycle::new(store, Arc::new(NoopNotifier), None, Duration::days(30))
    }

    async fn make_call(store: &InMemoryCallStore, status: CallStatus, campaign_id: Option<Uuid>) -> Call {
        store
            .create_call(CallCreateRequest {
                provider_call_id: Some(format!("prov-{}", Uuid::new_v4())),
                direction: CallDirection::Outbound,
                phone_number: "+15551230001".to_string(),
                status,
                contact_id: None,
                campaign_id,
            })
            .await
            .unwrap()
    }

    fn campaign_with(store: &InMemoryCallStore, max_concurrent: i32) -> Campaign {
        let campaign = Campaign {
            id: Uuid::new_v4(),
            name: "spring outreach".to_string(),
            status: CampaignStatus::Active,
            max_concurrent,
            completed_calls: 0,
            failed_calls: 0,
            assistant_id: Some("asst-1".to_string()),
            created_at: Utc::now(),
        };
        store.insert_campaign(campaign.clone());
        campaign
    }

    #[tokio::test]
    async fn test_in_progress_sets_started_and_answered() {
        let store = Arc::new(InMemoryCallStore::new());
        let lifecycle = lifecycle(store.clone());
        let call = make_call(&store, CallStatus::Scheduled, None).await;

        lifecycle
            .handle_status_update(&call, "in-progress", None)
            .await
            .unwrap();

        let call = store.get_call(call.id).await.unwrap().unwrap();
        assert_eq!(call.status, CallStatus::InProgress);
        assert!(call.started_at.is_some());
        assert!(call.answered_at.is_some());
    }

    #[tokio::test]
    async fn test_terminal_sets_ended_at() {
        let store = Arc::new(InMemoryCallStore::new());
        let lifecycle = lifecycle(store.clone());
        let call = make_call(&store, CallStatus::InProgress, None).await;

        lifecycle
            .handle_status_update(&call, "ended", Some("assistant-ended-call"))
            .await
            .unwrap();

        let call = store.get_call(call.id).await.unwrap().unwrap();
        assert_eq!(call.status, CallStatus::Completed);
        assert!(call.ended_at.is_some());
        assert_eq!(call.ended_reason.as_deref(), Some("assistant-ended-call"));
    }

    #[tokio::test]
    async fn test_late_status_update_cannot_regress_terminal_call() {
        let store = Arc::new(InMemoryCallStore::new());
        let lifecycle = lifecycle(store.clone());
        let call = make_call(&store, CallStatus::InProgress, None).await;

        lifecycle.handle_status_update(&call, "ended", None).await.unwrap();
        let terminal = store.get_call(call.id).await.unwrap().unwrap();

        // Late non-terminal update after the call already ended.
        let outcome = lifecycle
            .handle_status_update(&terminal, "ringing", None)
            .await
            .unwrap();
        assert!(matches!(outcome, TransitionOutcome::Rejected { .. }));
        let call = store.get_call(call.id).await.unwrap().unwrap();
        assert_eq!(call.status, CallStatus::Completed);
    }

    #[tokio::test]
    async fn test_conversation_promotes_queued_call() {
        let store = Arc::new(InMemoryCallStore::new());
        let lifecycle = lifecycle(store.clone());
        let call = make_call(&store, CallStatus::Queued, None).await;

        lifecycle.promote_in_progress(&call).await.unwrap();
        let call = store.get_call(call.id).await.unwrap().unwrap();
        assert_eq!(call.status, CallStatus::InProgress);

        // Already in progress: a second conversation event is a no-op.
        let outcome = lifecycle.promote_in_progress(&call).await.unwrap();
        assert!(matches!(outcome, TransitionOutcome::NoOp { .. }));
    }

    #[tokio::test]
    async fn test_process_ended_call_classifies_and_stores_artifacts() {
        let store = Arc::new(InMemoryCallStore::new());
        let lifecycle = lifecycle(store.clone());
        let call = make_call(&store, CallStatus::InProgress, None).await;

        let artifacts = EndedCallArtifacts {
            ended_reason: Some("assistant-ended-call".to_string()),
            duration_secs: Some(120),
            transcript_text: Some("Great, see you then.".to_string()),
            turns: vec![TranscriptTurn {
                role: "assistant".to_string(),
                content: "Great, see you then.".to_string(),
                offset_secs: 100.0,
            }],
            summary: Some("Customer agreed to a follow-up.".to_string()),
            success: Some(true),
            ..Default::default()
        };

        lifecycle.process_ended_call(&call, artifacts, false).await.unwrap();

        let call = store.get_call(call.id).await.unwrap().unwrap();
        assert_eq!(call.status, CallStatus::Completed);
        assert_eq!(call.outcome, Some(CallOutcome::Success));
        assert_eq!(call.duration_secs, Some(120));

        let transcript = store.get_transcript(call.id).await.unwrap().unwrap();
        assert_eq!(transcript.turns.len(), 1);

        let analytics = store.get_analytics(call.id).await.unwrap().unwrap();
        assert_eq!(analytics.summary.as_deref(), Some("Customer agreed to a follow-up."));
        assert!(!analytics.synced_by_reconciler);
    }

    #[tokio::test]
    async fn test_process_ended_call_twice_is_idempotent() {
        let store = Arc::new(InMemoryCallStore::new());
        let campaign = campaign_with(&store, 5);
        let contact_id = Uuid::new_v4();
        store.insert_contact(Contact {
            id: contact_id,
            name: Some("Jordan".to_string()),
            phone_number: "+15551230001".to_string(),
            email: None,
        });
        store.insert_campaign_contact(CampaignContact {
            campaign_id: campaign.id,
            contact_id,
            status: CampaignContactStatus::InProgress,
            attempts: 1,
            last_attempt_at: Some(Utc::now()),
        });

        let lifecycle = lifecycle(store.clone());
        let call = store
            .create_call(CallCreateRequest {
                provider_call_id: Some("prov-idem".to_string()),
                direction: CallDirection::Outbound,
                phone_number: "+15551230001".to_string(),
                status: CallStatus::InProgress,
                contact_id: Some(contact_id),
                campaign_id: Some(campaign.id),
            })
            .await
            .unwrap();

        let artifacts = EndedCallArtifacts {
            ended_reason: Some("customer-ended-call".to_string()),
            duration_secs: Some(95),
            success: Some(true),
            ..Default::default()
        };

        lifecycle
            .process_ended_call(&call, artifacts.clone(), false)
            .await
            .unwrap();
        let after_first = store.get_call(call.id).await.unwrap().unwrap();

        // Duplicate delivery of the same report.
        lifecycle
            .process_ended_call(&after_first, artifacts, false)
            .await
            .unwrap();

        let after_second = store.get_call(call.id).await.unwrap().unwrap();
        assert_eq!(after_first.status, after_second.status);
        assert_eq!(after_first.outcome, after_second.outcome);

        // Campaign counters were applied exactly once.
        let campaign = store.get_campaign(campaign.id).await.unwrap().unwrap();
        assert_eq!(campaign.completed_calls, 1);
        assert_eq!(campaign.failed_calls, 0);
        assert_eq!(campaign.status, CampaignStatus::Completed);
    }

    #[tokio::test]
    async fn test_end_of_call_report_refines_bare_ended_status() {
        let store = Arc::new(InMemoryCallStore::new());
        let lifecycle = lifecycle(store.clone());
        let call = make_call(&store, CallStatus::Ringing, None).await;

        // A bare "ended" status update lands first, recorded as Completed.
        lifecycle.handle_status_update(&call, "ended", None).await.unwrap();
        let call = store.get_call(call.id).await.unwrap().unwrap();
        assert_eq!(call.status, CallStatus::Completed);

        // The report then arrives with the real reason.
        let artifacts = EndedCallArtifacts {
            ended_reason: Some("customer-did-not-answer".to_string()),
            ..Default::default()
        };
        lifecycle.process_ended_call(&call, artifacts, false).await.unwrap();

        let call = store.get_call(call.id).await.unwrap().unwrap();
        assert_eq!(call.status, CallStatus::NoAnswer);
        assert_eq!(call.outcome, Some(CallOutcome::NoResponse));
    }

    #[tokio::test]
    async fn test_inbound_callback_propagates_outcome() {
        let store = Arc::new(InMemoryCallStore::new());
        let lifecycle = lifecycle(store.clone());

        let outbound = store
            .create_call(CallCreateRequest {
                provider_call_id: Some("prov-out".to_string()),
                direction: CallDirection::Outbound,
                phone_number: "+15559990001".to_string(),
                status: CallStatus::NoAnswer,
                contact_id: None,
                campaign_id: None,
            })
            .await
            .unwrap();

        let inbound = store
            .create_call(CallCreateRequest {
                provider_call_id: Some("prov-in".to_string()),
                direction: CallDirection::Inbound,
                phone_number: "+15559990001".to_string(),
                status: CallStatus::InProgress,
                contact_id: None,
                campaign_id: None,
            })
            .await
            .unwrap();

        let artifacts = EndedCallArtifacts {
            ended_reason: Some("customer-ended-call".to_string()),
            duration_secs: Some(60),
            success: Some(true),
            ..Default::default()
        };
        lifecycle.process_ended_call(&inbound, artifacts, false).await.unwrap();

        let outbound = store.get_call(outbound.id).await.unwrap().unwrap();
        assert_eq!(outbound.outcome, Some(CallOutcome::Success));
    }

    #[tokio::test]
    async fn test_reconciler_marks_analytics_source() {
        let store = Arc::new(InMemoryCallStore::new());
        let lifecycle = lifecycle(store.clone());
        let call = make_call(&store, CallStatus::InProgress, None).await;

        lifecycle
            .process_ended_call(&call, EndedCallArtifacts::default(), true)
            .await
            .unwrap();

        let analytics = store.get_analytics(call.id).await.unwrap().unwrap();
        assert!(analytics.synced_by_reconciler);
    }
}
