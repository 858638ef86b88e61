//! Webhook ingestion: log, resolve, dispatch, acknowledge.
//!
//! The contract with the provider is strict: every event gets a 200, no
//! matter what happened inside. The raw payload is persisted to the webhook
//! log before any processing (the durability checkpoint); processing errors
//! are recorded on that log entry and swallowed. Duplicate and out-of-order
//! deliveries are absorbed by the state machine's idempotency rules, not
//! handled here.

use std::sync::Arc;

use chrono::{Duration, Utc};
use metrics::counter;

use crate::errors::Error;
use crate::ingest::events::{ProviderEvent, WebhookEnvelope};
use crate::lifecycle::{CallLifecycle, EndedCallArtifacts};
use crate::notify::{RealtimeEvent, RealtimeNotifier};
use crate::provider::types::ProviderCall;
use crate::provider::VoiceProvider;
use crate::store::models::{Call, CallCreateRequest, CallDirection, CallStatus};
use crate::store::CallStore;
use crate::types::abbrev_uuid;

pub mod events;

/// What the webhook handler should send back.
#[derive(Debug)]
pub enum IngestResponse {
    /// Plain acknowledgement; `error` carries the processing failure text
    /// when there was one (still a 200).
    Ack { error: Option<String> },
    /// Synchronous answer to an assistant-request event.
    Assistant { assistant: serde_json::Value },
}

/// Ingestion service behind `POST /webhooks/vapi`.
#[derive(Clone)]
pub struct WebhookIngestor {
    store: Arc<dyn CallStore>,
    lifecycle: CallLifecycle,
    provider: Arc<dyn VoiceProvider>,
    notifier: Arc<dyn RealtimeNotifier>,
    default_assistant_id: Option<String>,
    /// How far back to search for the outbound call that explains an inbound
    /// one (attribution and assistant selection).
    inbound_lookback: Duration,
}

impl WebhookIngestor {
    pub fn new(
        store: Arc<dyn CallStore>,
        lifecycle: CallLifecycle,
        provider: Arc<dyn VoiceProvider>,
        notifier: Arc<dyn RealtimeNotifier>,
        default_assistant_id: Option<String>,
        inbound_lookback: Duration,
    ) -> Self {
        Self {
            store,
            lifecycle,
            provider,
            notifier,
            default_assistant_id,
            inbound_lookback,
        }
    }

    /// Ingest one raw webhook payload. Never returns an error; failures end
    /// up in the returned acknowledgement and on the webhook log entry.
    pub async fn ingest(&self, payload: serde_json::Value) -> IngestResponse {
        let event_type = payload
            .pointer("/message/type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let provider_call_id = payload
            .pointer("/message/call/id")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        counter!("callctl_webhook_events_total", "type" => event_type.clone()).increment(1);

        // Durability checkpoint: the raw payload is kept even when nothing
        // after this point works.
        let log_id = match self
            .store
            .insert_webhook_log(&event_type, provider_call_id.as_deref(), &payload)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!(error = %e, event_type, "Failed to persist webhook log entry");
                None
            }
        };

        let envelope = match serde_json::from_value::<WebhookEnvelope>(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                let message = format!("malformed webhook payload: {e}");
                tracing::warn!(error = %e, event_type, "Malformed webhook payload");
                if let Some(log_id) = log_id {
                    let _ = self.store.mark_webhook_error(log_id, &message).await;
                }
                return IngestResponse::Ack { error: Some(message) };
            }
        };

        let parsed_type = envelope.message.event_type();
        match self.process_event(envelope.message).await {
            Ok(assistant) => {
                if let Some(log_id) = log_id {
                    if let Err(e) = self.store.mark_webhook_processed(log_id).await {
                        tracing::warn!(error = %e, "Failed to mark webhook log entry processed");
                    }
                }
                match assistant {
                    Some(assistant) => IngestResponse::Assistant { assistant },
                    None => IngestResponse::Ack { error: None },
                }
            }
            Err(e) => {
                // Contained per event: record, acknowledge, move on. The
                // reconciler repairs whatever this event was supposed to do.
                let message = e.to_string();
                tracing::warn!(error = %e, event_type = parsed_type, "Webhook event processing failed");
                if let Some(log_id) = log_id {
                    let _ = self.store.mark_webhook_error(log_id, &message).await;
                }
                IngestResponse::Ack { error: Some(message) }
            }
        }
    }

    /// Dispatch one parsed event. Returns the assistant payload for
    /// assistant-request events, `None` otherwise.
    async fn process_event(&self, event: ProviderEvent) -> Result<Option<serde_json::Value>, Error> {
        match event {
            ProviderEvent::AssistantRequest { call, customer } => {
                let number = customer
                    .as_ref()
                    .map(|c| c.number.clone())
                    .or_else(|| call.as_ref().and_then(|c| c.customer.as_ref()).map(|c| c.number.clone()));
                let assistant = self.select_assistant(number.as_deref()).await?;
                Ok(Some(assistant))
            }

            ProviderEvent::StatusUpdate {
                call,
                status,
                ended_reason,
            } => {
                let Some(local) = self.resolve_call(call.as_ref()).await? else {
                    return Ok(None);
                };
                let Some(status) = status.as_deref().or_else(|| {
                    call.as_ref().and_then(|c| c.status.as_deref())
                }) else {
                    tracing::debug!(call_id = %abbrev_uuid(&local.id), "Status update without a status");
                    return Ok(None);
                };
                self.lifecycle
                    .handle_status_update(&local, status, ended_reason.as_deref())
                    .await?;
                Ok(None)
            }

            ProviderEvent::ConversationUpdate { call } | ProviderEvent::SpeechUpdate { call } => {
                let Some(local) = self.resolve_call(call.as_ref()).await? else {
                    return Ok(None);
                };
                self.lifecycle.promote_in_progress(&local).await?;
                Ok(None)
            }

            ProviderEvent::Transcript {
                call,
                role,
                transcript,
                transcript_type,
            } => {
                // Partial hypotheses are noise; only final chunks go out.
                if transcript_type.as_deref() == Some("partial") {
                    return Ok(None);
                }
                let Some(local) = self.resolve_call(call.as_ref()).await? else {
                    return Ok(None);
                };
                if let Some(text) = transcript {
                    self.notifier.publish(RealtimeEvent::TranscriptChunk {
                        call_id: local.id,
                        role: role.unwrap_or_else(|| "unknown".to_string()),
                        text,
                    });
                }
                Ok(None)
            }

            ProviderEvent::Hang { call } => {
                let Some(local) = self.resolve_call(call.as_ref()).await? else {
                    return Ok(None);
                };
                self.lifecycle.handle_hang(&local).await?;
                Ok(None)
            }

            ProviderEvent::EndOfCallReport {
                call,
                artifact,
                analysis,
                ended_reason,
                cost,
                duration_seconds,
            } => {
                let Some(local) = self.resolve_call(call.as_ref()).await? else {
                    return Ok(None);
                };

                // The report's top-level fields win over whatever the nested
                // call object carries; they're fresher.
                let mut provider_call = call.unwrap_or(ProviderCall {
                    id: String::new(),
                    status: None,
                    ended_reason: None,
                    started_at: None,
                    ended_at: None,
                    cost: None,
                    customer: None,
                    assistant_id: None,
                    artifact: None,
                    analysis: None,
                });
                provider_call.ended_reason = ended_reason.or(provider_call.ended_reason);
                provider_call.cost = cost.or(provider_call.cost);
                provider_call.artifact = artifact.or(provider_call.artifact);
                provider_call.analysis = analysis.or(provider_call.analysis);

                let mut artifacts = EndedCallArtifacts::from_provider_call(&provider_call);
                if artifacts.duration_secs.is_none() {
                    artifacts.duration_secs = duration_seconds.map(|secs| secs.round() as i32);
                }

                self.lifecycle.process_ended_call(&local, artifacts, false).await?;
                Ok(None)
            }

            ProviderEvent::Unknown => {
                tracing::debug!("Ignoring unhandled webhook event type");
                Ok(None)
            }
        }
    }

    /// Find the local call for an event, synthesizing an inbound call row
    /// when the provider call id is unknown locally.
    async fn resolve_call(&self, event_call: Option<&ProviderCall>) -> Result<Option<Call>, Error> {
        let Some(event_call) = event_call else {
            tracing::debug!("Event carries no call object");
            return Ok(None);
        };

        if let Some(existing) = self.store.get_call_by_provider_id(&event_call.id).await? {
            return Ok(Some(existing));
        }

        // Unknown provider call id: this is an inbound call we haven't seen.
        // Attribute it to the most recent outbound call to the same number
        // so the contact/campaign relationship carries over.
        let number = event_call
            .customer
            .as_ref()
            .map(|c| c.number.clone())
            .unwrap_or_else(|| "unknown".to_string());

        let since = Utc::now() - self.inbound_lookback;
        let origin = self.store.latest_outbound_call_to(&number, since).await?;

        let created = self
            .store
            .create_call(CallCreateRequest {
                provider_call_id: Some(event_call.id.clone()),
                direction: CallDirection::Inbound,
                phone_number: number,
                status: CallStatus::Queued,
                contact_id: origin.as_ref().and_then(|c| c.contact_id),
                campaign_id: origin.as_ref().and_then(|c| c.campaign_id),
            })
            .await;

        match created {
            Ok(call) => {
                tracing::info!(
                    call_id = %abbrev_uuid(&call.id),
                    provider_call_id = %event_call.id,
                    attributed = origin.is_some(),
                    "Synthesized inbound call from webhook event"
                );
                Ok(Some(call))
            }
            // Two events for the same new call racing: the other one won,
            // fetch what it created.
            Err(crate::store::StoreError::UniqueViolation { .. }) => {
                Ok(self.store.get_call_by_provider_id(&event_call.id).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve the assistant configuration for an inbound call: the campaign
    /// assistant of the most recent outbound call to this number, falling
    /// back to the configured default.
    async fn select_assistant(&self, number: Option<&str>) -> Result<serde_json::Value, Error> {
        if let Some(number) = number {
            let since = Utc::now() - self.inbound_lookback;
            if let Some(origin) = self.store.latest_outbound_call_to(number, since).await? {
                if let Some(campaign_id) = origin.campaign_id {
                    if let Some(campaign) = self.store.get_campaign(campaign_id).await? {
                        if let Some(assistant_id) = campaign.assistant_id {
                            return Ok(self.provider.get_assistant(&assistant_id).await?);
                        }
                    }
                }
            }
        }

        match &self.default_assistant_id {
            Some(assistant_id) => Ok(self.provider.get_assistant(assistant_id).await?),
            None => Err(Error::Internal {
                operation: "select assistant for inbound call: no default assistant configured".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NoopNotifier;
    use crate::provider::dummy::DummyProvider;
    use crate::store::in_memory::InMemoryCallStore;
    use crate::store::models::{Campaign, CampaignStatus};
    use uuid::Uuid;

    fn ingestor_with(store: Arc<InMemoryCallStore>) -> WebhookIngestor {
        let notifier = Arc::new(NoopNotifier);
        let lifecycle = CallLifecycle::new(store.clone(), notifier.clone(), None, Duration::days(30));
        WebhookIngestor::new(
            store,
            lifecycle,
            Arc::new(DummyProvider::new()),
            notifier,
            Some("default-asst".to_string()),
            Duration::days(7),
        )
    }

    fn status_event(provider_call_id: &str, status: &str) -> serde_json::Value {
        serde_json::json!({
            "message": {
                "type": "status-update",
                "status": status,
                "call": {"id": provider_call_id, "customer": {"number": "+15557770001"}}
            }
        })
    }

    fn report_event(provider_call_id: &str, ended_reason: &str) -> serde_json::Value {
        serde_json::json!({
            "message": {
                "type": "end-of-call-report",
                "endedReason": ended_reason,
                "call": {"id": provider_call_id, "customer": {"number": "+15557770001"}},
                "artifact": {"transcript": "AI: Hello?"},
                "analysis": {"summary": "No answer.", "successEvaluation": "false"}
            }
        })
    }

    async fn seeded_outbound(store: &InMemoryCallStore, provider_call_id: &str) -> Call {
        store
            .create_call(CallCreateRequest {
                provider_call_id: Some(provider_call_id.to_string()),
                direction: CallDirection::Outbound,
                phone_number: "+15557770001".to_string(),
                status: CallStatus::Scheduled,
                contact_id: None,
                campaign_id: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_every_event_lands_in_webhook_log() {
        let store = Arc::new(InMemoryCallStore::new());
        let ingestor = ingestor_with(store.clone());
        seeded_outbound(&store, "prov-1").await;

        ingestor.ingest(status_event("prov-1", "ringing")).await;
        ingestor.ingest(serde_json::json!({"message": {"type": "bogus-event"}})).await;
        assert_eq!(store.webhook_log_len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_payload_still_acked() {
        let store = Arc::new(InMemoryCallStore::new());
        let ingestor = ingestor_with(store.clone());

        let response = ingestor.ingest(serde_json::json!({"not": "an envelope"})).await;
        match response {
            IngestResponse::Ack { error } => assert!(error.is_some()),
            other => panic!("unexpected response {other:?}"),
        }
        // The raw payload is still on the log.
        assert_eq!(store.webhook_log_len(), 1);
    }

    #[tokio::test]
    async fn test_status_update_moves_call() {
        let store = Arc::new(InMemoryCallStore::new());
        let ingestor = ingestor_with(store.clone());
        let call = seeded_outbound(&store, "prov-2").await;

        ingestor.ingest(status_event("prov-2", "in-progress")).await;

        let call = store.get_call(call.id).await.unwrap().unwrap();
        assert_eq!(call.status, CallStatus::InProgress);
        assert!(call.started_at.is_some());
        assert!(call.answered_at.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_terminal_report_is_idempotent() {
        let store = Arc::new(InMemoryCallStore::new());
        let ingestor = ingestor_with(store.clone());
        let call = seeded_outbound(&store, "prov-3").await;

        ingestor.ingest(report_event("prov-3", "customer-did-not-answer")).await;
        let first = store.get_call(call.id).await.unwrap().unwrap();
        let first_analytics = store.get_analytics(call.id).await.unwrap().unwrap();

        ingestor.ingest(report_event("prov-3", "customer-did-not-answer")).await;
        let second = store.get_call(call.id).await.unwrap().unwrap();
        let second_analytics = store.get_analytics(call.id).await.unwrap().unwrap();

        assert_eq!(first.status, CallStatus::NoAnswer);
        assert_eq!(second.status, first.status);
        assert_eq!(second.outcome, first.outcome);
        assert_eq!(second.ended_at, first.ended_at);
        assert_eq!(second_analytics.summary, first_analytics.summary);
    }

    #[tokio::test]
    async fn test_late_status_update_after_report_does_not_regress() {
        let store = Arc::new(InMemoryCallStore::new());
        let ingestor = ingestor_with(store.clone());
        let call = seeded_outbound(&store, "prov-4").await;

        ingestor.ingest(report_event("prov-4", "customer-ended-call")).await;
        ingestor.ingest(status_event("prov-4", "in-progress")).await;

        let call = store.get_call(call.id).await.unwrap().unwrap();
        assert_eq!(call.status, CallStatus::Completed);
    }

    #[tokio::test]
    async fn test_unknown_inbound_call_synthesized_with_attribution() {
        let store = Arc::new(InMemoryCallStore::new());
        let ingestor = ingestor_with(store.clone());

        let campaign_id = Uuid::new_v4();
        let contact_id = Uuid::new_v4();
        store.insert_campaign(Campaign {
            id: campaign_id,
            name: "callback test".to_string(),
            status: CampaignStatus::Active,
            max_concurrent: 5,
            completed_calls: 0,
            failed_calls: 0,
            assistant_id: Some("asst-campaign".to_string()),
            created_at: Utc::now(),
        });
        store
            .create_call(CallCreateRequest {
                provider_call_id: Some("prov-orig".to_string()),
                direction: CallDirection::Outbound,
                phone_number: "+15557770001".to_string(),
                status: CallStatus::NoAnswer,
                contact_id: Some(contact_id),
                campaign_id: Some(campaign_id),
            })
            .await
            .unwrap();

        ingestor.ingest(status_event("prov-inbound-new", "in-progress")).await;

        let synthesized = store.get_call_by_provider_id("prov-inbound-new").await.unwrap().unwrap();
        assert_eq!(synthesized.direction, CallDirection::Inbound);
        assert_eq!(synthesized.campaign_id, Some(campaign_id));
        assert_eq!(synthesized.contact_id, Some(contact_id));
        assert_eq!(synthesized.status, CallStatus::InProgress);
    }

    #[tokio::test]
    async fn test_assistant_request_returns_configuration() {
        let store = Arc::new(InMemoryCallStore::new());
        let ingestor = ingestor_with(store.clone());

        let response = ingestor
            .ingest(serde_json::json!({
                "message": {
                    "type": "assistant-request",
                    "customer": {"number": "+15550009999"}
                }
            }))
            .await;

        match response {
            IngestResponse::Assistant { assistant } => {
                assert_eq!(assistant["id"], "default-asst");
            }
            other => panic!("expected assistant response, got {other:?}"),
        }
    }
}
