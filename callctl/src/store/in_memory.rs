//! In-memory implementation of [`CallStore`].
//!
//! Backed by mutex-guarded maps. Used by the test suite and by the dummy
//! deployment mode where no PostgreSQL instance is available. Semantics
//! mirror the PostgreSQL implementation: guarded transitions, set-if-null
//! timestamps, keyed upserts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::store::models::{
    Call, CallAnalytics, CallAnalyticsUpsertRequest, CallCompletionUpdate, CallCreateRequest, CallOutcome, CallResult,
    Campaign, CampaignContact, CampaignContactStatus, Contact, Transcript, TranscriptUpsertRequest, WebhookLogEntry,
};
use crate::store::{CallStore, CallTransitionWrite, Result, StoreError};
use crate::types::{CallId, CampaignId, ContactId, WebhookLogId};

#[derive(Default)]
struct Inner {
    calls: HashMap<CallId, Call>,
    transcripts: HashMap<CallId, Transcript>,
    analytics: HashMap<CallId, CallAnalytics>,
    webhook_log: HashMap<WebhookLogId, WebhookLogEntry>,
    campaigns: HashMap<CampaignId, Campaign>,
    campaign_contacts: HashMap<(CampaignId, ContactId), CampaignContact>,
    contacts: HashMap<ContactId, Contact>,
}

/// Store holding everything in process memory.
#[derive(Clone, Default)]
pub struct InMemoryCallStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryCallStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a campaign row (fixture surface for tests and dev mode).
    pub fn insert_campaign(&self, campaign: Campaign) {
        self.inner.lock().unwrap().campaigns.insert(campaign.id, campaign);
    }

    /// Seed a contact row.
    pub fn insert_contact(&self, contact: Contact) {
        self.inner.lock().unwrap().contacts.insert(contact.id, contact);
    }

    /// Seed a campaign membership row.
    pub fn insert_campaign_contact(&self, link: CampaignContact) {
        self.inner
            .lock()
            .unwrap()
            .campaign_contacts
            .insert((link.campaign_id, link.contact_id), link);
    }

    /// Number of webhook log entries recorded so far.
    pub fn webhook_log_len(&self) -> usize {
        self.inner.lock().unwrap().webhook_log.len()
    }
}

#[async_trait]
impl CallStore for InMemoryCallStore {
    async fn create_call(&self, request: CallCreateRequest) -> Result<Call> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(provider_id) = &request.provider_call_id {
            if inner.calls.values().any(|c| c.provider_call_id.as_deref() == Some(provider_id)) {
                return Err(StoreError::UniqueViolation {
                    constraint: Some("calls_provider_call_id_unique".into()),
                    message: format!("provider call id {} already exists", provider_id),
                });
            }
        }

        let call = Call {
            id: Uuid::new_v4(),
            provider_call_id: request.provider_call_id,
            direction: request.direction,
            phone_number: request.phone_number,
            status: request.status,
            outcome: None,
            result: None,
            ended_reason: None,
            duration_secs: None,
            cost: None,
            contact_id: request.contact_id,
            campaign_id: request.campaign_id,
            created_at: Utc::now(),
            started_at: None,
            answered_at: None,
            ended_at: None,
        };
        inner.calls.insert(call.id, call.clone());
        Ok(call)
    }

    async fn get_call(&self, id: CallId) -> Result<Option<Call>> {
        Ok(self.inner.lock().unwrap().calls.get(&id).cloned())
    }

    async fn get_call_by_provider_id(&self, provider_call_id: &str) -> Result<Option<Call>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .calls
            .values()
            .find(|c| c.provider_call_id.as_deref() == Some(provider_call_id))
            .cloned())
    }

    async fn set_provider_call_id(&self, id: CallId, provider_call_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let call = inner.calls.get_mut(&id).ok_or(StoreError::NotFound)?;
        call.provider_call_id = Some(provider_call_id.to_string());
        Ok(())
    }

    async fn apply_transition(&self, id: CallId, write: CallTransitionWrite) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let Some(call) = inner.calls.get_mut(&id) else {
            return Ok(false);
        };
        if call.status != write.from {
            return Ok(false);
        }
        call.status = write.to;
        call.started_at = call.started_at.or(write.set_started_at);
        call.answered_at = call.answered_at.or(write.set_answered_at);
        call.ended_at = call.ended_at.or(write.set_ended_at);
        Ok(true)
    }

    async fn record_completion(&self, id: CallId, update: CallCompletionUpdate) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let call = inner.calls.get_mut(&id).ok_or(StoreError::NotFound)?;
        call.ended_reason = update.ended_reason.or(call.ended_reason.take());
        call.duration_secs = update.duration_secs.or(call.duration_secs);
        call.cost = update.cost.or(call.cost);
        call.outcome = update.outcome.or(call.outcome);
        call.result = update.result.or(call.result);
        Ok(())
    }

    async fn set_outcome(&self, id: CallId, outcome: CallOutcome, result: CallResult) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let call = inner.calls.get_mut(&id).ok_or(StoreError::NotFound)?;
        call.outcome = Some(outcome);
        call.result = Some(result);
        Ok(())
    }

    async fn list_stuck_calls(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Call>> {
        let inner = self.inner.lock().unwrap();
        let mut calls: Vec<Call> = inner
            .calls
            .values()
            .filter(|c| c.provider_call_id.is_some() && !c.status.is_terminal() && c.created_at < cutoff)
            .cloned()
            .collect();
        calls.sort_by_key(|c| c.created_at);
        calls.truncate(limit as usize);
        Ok(calls)
    }

    async fn latest_outbound_call_to(&self, phone_number: &str, since: DateTime<Utc>) -> Result<Option<Call>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .calls
            .values()
            .filter(|c| {
                c.direction == crate::store::models::CallDirection::Outbound
                    && c.phone_number == phone_number
                    && c.created_at >= since
            })
            .max_by_key(|c| c.created_at)
            .cloned())
    }

    async fn upsert_transcript(&self, call_id: CallId, request: TranscriptUpsertRequest) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.transcripts.insert(
            call_id,
            Transcript {
                call_id,
                full_text: request.full_text,
                turns: request.turns,
                recording_url: request.recording_url,
                recording_duration_secs: request.recording_duration_secs,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_transcript(&self, call_id: CallId) -> Result<Option<Transcript>> {
        Ok(self.inner.lock().unwrap().transcripts.get(&call_id).cloned())
    }

    async fn upsert_analytics(&self, call_id: CallId, request: CallAnalyticsUpsertRequest) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.analytics.insert(
            call_id,
            CallAnalytics {
                call_id,
                summary: request.summary,
                interest_level: request.interest_level,
                sentiment: request.sentiment,
                appointment_booked: request.appointment_booked,
                appointment_date: request.appointment_date,
                appointment_time: request.appointment_time,
                appointment_at: request.appointment_at,
                follow_up_needed: request.follow_up_needed,
                confirmed_name: request.confirmed_name,
                confirmed_phone: request.confirmed_phone,
                confirmed_email: request.confirmed_email,
                raw_analysis: request.raw_analysis,
                synced_by_reconciler: request.synced_by_reconciler,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_analytics(&self, call_id: CallId) -> Result<Option<CallAnalytics>> {
        Ok(self.inner.lock().unwrap().analytics.get(&call_id).cloned())
    }

    async fn insert_webhook_log(
        &self,
        event_type: &str,
        provider_call_id: Option<&str>,
        payload: &serde_json::Value,
    ) -> Result<WebhookLogId> {
        let mut inner = self.inner.lock().unwrap();
        let id = Uuid::new_v4();
        inner.webhook_log.insert(
            id,
            WebhookLogEntry {
                id,
                event_type: event_type.to_string(),
                provider_call_id: provider_call_id.map(|s| s.to_string()),
                payload: payload.clone(),
                processed: false,
                error: None,
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn mark_webhook_processed(&self, id: WebhookLogId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.webhook_log.get_mut(&id).ok_or(StoreError::NotFound)?;
        entry.processed = true;
        Ok(())
    }

    async fn mark_webhook_error(&self, id: WebhookLogId, error: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.webhook_log.get_mut(&id).ok_or(StoreError::NotFound)?;
        entry.error = Some(error.to_string());
        Ok(())
    }

    async fn get_campaign(&self, id: CampaignId) -> Result<Option<Campaign>> {
        Ok(self.inner.lock().unwrap().campaigns.get(&id).cloned())
    }

    async fn increment_campaign_counters(&self, id: CampaignId, failed: bool) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let campaign = inner.campaigns.get_mut(&id).ok_or(StoreError::NotFound)?;
        if failed {
            campaign.failed_calls += 1;
        } else {
            campaign.completed_calls += 1;
        }
        Ok(())
    }

    async fn pending_contact_count(&self, id: CampaignId) -> Result<i64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .campaign_contacts
            .values()
            .filter(|cc| {
                cc.campaign_id == id
                    && matches!(
                        cc.status,
                        CampaignContactStatus::Pending | CampaignContactStatus::InProgress
                    )
            })
            .count() as i64)
    }

    async fn complete_campaign(&self, id: CampaignId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let campaign = inner.campaigns.get_mut(&id).ok_or(StoreError::NotFound)?;
        campaign.status = crate::store::models::CampaignStatus::Completed;
        Ok(())
    }

    async fn set_campaign_contact_status(
        &self,
        campaign_id: CampaignId,
        contact_id: ContactId,
        status: CampaignContactStatus,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let link = inner
            .campaign_contacts
            .get_mut(&(campaign_id, contact_id))
            .ok_or(StoreError::NotFound)?;
        link.status = status;
        Ok(())
    }

    async fn record_contact_attempt(&self, campaign_id: CampaignId, contact_id: ContactId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let link = inner
            .campaign_contacts
            .get_mut(&(campaign_id, contact_id))
            .ok_or(StoreError::NotFound)?;
        link.status = CampaignContactStatus::InProgress;
        link.attempts += 1;
        link.last_attempt_at = Some(Utc::now());
        Ok(())
    }

    async fn list_pending_contacts(&self, campaign_id: CampaignId) -> Result<Vec<Contact>> {
        let inner = self.inner.lock().unwrap();
        let mut contacts: Vec<Contact> = inner
            .campaign_contacts
            .values()
            .filter(|cc| cc.campaign_id == campaign_id && cc.status == CampaignContactStatus::Pending)
            .filter_map(|cc| inner.contacts.get(&cc.contact_id).cloned())
            .collect();
        contacts.sort_by_key(|c| c.id);
        Ok(contacts)
    }

    async fn get_contact(&self, id: ContactId) -> Result<Option<Contact>> {
        Ok(self.inner.lock().unwrap().contacts.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{CallDirection, CallStatus};

    async fn queued_call(store: &InMemoryCallStore) -> Call {
        store
            .create_call(CallCreateRequest {
                provider_call_id: None,
                direction: CallDirection::Outbound,
                phone_number: "+15551230001".into(),
                status: CallStatus::Queued,
                contact_id: None,
                campaign_id: None,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_transition_guard_rejects_stale_from() {
        let store = InMemoryCallStore::new();
        let call = queued_call(&store).await;

        let applied = store
            .apply_transition(
                call.id,
                CallTransitionWrite {
                    from: CallStatus::Queued,
                    to: CallStatus::Scheduled,
                    set_started_at: None,
                    set_answered_at: None,
                    set_ended_at: None,
                },
            )
            .await
            .unwrap();
        assert!(applied);

        // Same guard again: the row has moved on, so this is a no-op.
        let applied = store
            .apply_transition(
                call.id,
                CallTransitionWrite {
                    from: CallStatus::Queued,
                    to: CallStatus::Scheduled,
                    set_started_at: None,
                    set_answered_at: None,
                    set_ended_at: None,
                },
            )
            .await
            .unwrap();
        assert!(!applied);
    }

    #[tokio::test]
    async fn test_timestamps_set_only_once() {
        let store = InMemoryCallStore::new();
        let call = queued_call(&store).await;

        let first = Utc::now();
        store
            .apply_transition(
                call.id,
                CallTransitionWrite {
                    from: CallStatus::Queued,
                    to: CallStatus::InProgress,
                    set_started_at: Some(first),
                    set_answered_at: Some(first),
                    set_ended_at: None,
                },
            )
            .await
            .unwrap();

        let later = first + chrono::Duration::seconds(30);
        store
            .apply_transition(
                call.id,
                CallTransitionWrite {
                    from: CallStatus::InProgress,
                    to: CallStatus::Completed,
                    set_started_at: Some(later),
                    set_answered_at: Some(later),
                    set_ended_at: Some(later),
                },
            )
            .await
            .unwrap();

        let call = store.get_call(call.id).await.unwrap().unwrap();
        assert_eq!(call.started_at, Some(first));
        assert_eq!(call.answered_at, Some(first));
        assert_eq!(call.ended_at, Some(later));
    }

    #[tokio::test]
    async fn test_duplicate_provider_call_id_rejected() {
        let store = InMemoryCallStore::new();
        let request = CallCreateRequest {
            provider_call_id: Some("prov-1".into()),
            direction: CallDirection::Outbound,
            phone_number: "+15551230001".into(),
            status: CallStatus::Scheduled,
            contact_id: None,
            campaign_id: None,
        };
        store.create_call(request.clone()).await.unwrap();
        let err = store.create_call(request).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation { .. }));
    }

    #[tokio::test]
    async fn test_latest_outbound_lookup_ignores_inbound() {
        let store = InMemoryCallStore::new();
        let number = "+15551230002";
        store
            .create_call(CallCreateRequest {
                provider_call_id: None,
                direction: CallDirection::Inbound,
                phone_number: number.into(),
                status: CallStatus::InProgress,
                contact_id: None,
                campaign_id: None,
            })
            .await
            .unwrap();

        let since = Utc::now() - chrono::Duration::hours(1);
        assert!(store.latest_outbound_call_to(number, since).await.unwrap().is_none());

        let outbound = store
            .create_call(CallCreateRequest {
                provider_call_id: None,
                direction: CallDirection::Outbound,
                phone_number: number.into(),
                status: CallStatus::Scheduled,
                contact_id: None,
                campaign_id: None,
            })
            .await
            .unwrap();

        let found = store.latest_outbound_call_to(number, since).await.unwrap().unwrap();
        assert_eq!(found.id, outbound.id);
    }
}
