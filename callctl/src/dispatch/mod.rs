//! Batch call dispatcher: issues a campaign's calls under a concurrency
//! ceiling.
//!
//! Contacts are partitioned into chunks of the campaign's `max_concurrent`;
//! each chunk is dispatched concurrently and awaited in full before the next
//! chunk starts, with a fixed delay between chunks for provider rate limits.
//! Every attempt creates its Call row *before* the provider is asked, so a
//! rejected dispatch is still visible to operators as a Failed call with the
//! provider's error text.

use std::sync::Arc;

use futures::future::join_all;
use metrics::counter;
use serde::Serialize;

use crate::errors::Error;
use crate::lifecycle::CallLifecycle;
use crate::provider::types::{CreateCallParams, CustomerRef};
use crate::provider::VoiceProvider;
use crate::store::models::{
    CallCompletionUpdate, CallCreateRequest, CallDirection, CallStatus, Campaign, CampaignContactStatus, Contact,
};
use crate::store::CallStore;
use crate::types::{abbrev_uuid, CallId, CampaignId, ContactId};

/// Per-contact outcome of a dispatch attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ContactDispatchResult {
    pub contact_id: ContactId,
    pub call_id: Option<CallId>,
    pub provider_call_id: Option<String>,
    pub error: Option<String>,
}

/// Outcome of one campaign dispatch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub total: usize,
    pub dispatched: usize,
    pub failed: usize,
    pub results: Vec<ContactDispatchResult>,
}

/// Dispatcher for outbound campaign calls.
pub struct BatchDispatcher {
    store: Arc<dyn CallStore>,
    provider: Arc<dyn VoiceProvider>,
    lifecycle: CallLifecycle,
    /// Pause between chunks, respecting provider rate limits.
    chunk_delay: std::time::Duration,
    /// Configured outbound line; when unset, the first provider phone number
    /// is resolved once and cached for the dispatcher's lifetime.
    phone_number_id: Option<String>,
    resolved_phone_number_id: tokio::sync::OnceCell<String>,
}

impl BatchDispatcher {
    pub fn new(
        store: Arc<dyn CallStore>,
        provider: Arc<dyn VoiceProvider>,
        lifecycle: CallLifecycle,
        chunk_delay: std::time::Duration,
        phone_number_id: Option<String>,
    ) -> Self {
        Self {
            store,
            provider,
            lifecycle,
            chunk_delay,
            phone_number_id,
            resolved_phone_number_id: tokio::sync::OnceCell::new(),
        }
    }

    /// Dispatch all pending contacts of a campaign.
    ///
    /// Phone-number resolution failure aborts the whole run (nothing has
    /// been attempted yet); a single contact's failure only marks that
    /// contact.
    pub async fn run_campaign(&self, campaign_id: CampaignId) -> Result<DispatchReport, Error> {
        let campaign = self
            .store
            .get_campaign(campaign_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                resource: "Campaign".to_string(),
                id: campaign_id.to_string(),
            })?;

        let phone_number_id = self.resolve_phone_number_id().await?;

        let contacts = self.store.list_pending_contacts(campaign_id).await?;
        let mut report = DispatchReport {
            total: contacts.len(),
            ..Default::default()
        };

        if contacts.is_empty() {
            tracing::info!(campaign_id = %abbrev_uuid(&campaign_id), "Campaign has no pending contacts");
            return Ok(report);
        }

        let chunk_size = campaign.max_concurrent.max(1) as usize;
        tracing::info!(
            campaign_id = %abbrev_uuid(&campaign_id),
            contacts = contacts.len(),
            chunk_size,
            "Dispatching campaign calls"
        );

        for (index, chunk) in contacts.chunks(chunk_size).enumerate() {
            if index > 0 {
                tokio::time::sleep(self.chunk_delay).await;
            }

            let results = join_all(
                chunk
                    .iter()
                    .map(|contact| self.dispatch_contact(&campaign, &phone_number_id, contact)),
            )
            .await;

            for result in results {
                if result.error.is_none() {
                    report.dispatched += 1;
                } else {
                    report.failed += 1;
                }
                report.results.push(result);
            }
        }

        counter!("callctl_dispatched_calls_total").increment(report.dispatched as u64);
        counter!("callctl_dispatch_failures_total").increment(report.failed as u64);
        tracing::info!(
            campaign_id = %abbrev_uuid(&campaign_id),
            dispatched = report.dispatched,
            failed = report.failed,
            "Campaign dispatch finished"
        );

        Ok(report)
    }

    /// Resolve which provider line to call from. Configured id wins; else
    /// the provider's first phone number, looked up once and kept for the
    /// dispatcher's lifetime.
    async fn resolve_phone_number_id(&self) -> Result<String, Error> {
        if let Some(id) = &self.phone_number_id {
            return Ok(id.clone());
        }

        self.resolved_phone_number_id
            .get_or_try_init(|| async {
                let numbers = self.provider.list_phone_numbers().await?;
                numbers
                    .into_iter()
                    .next()
                    .map(|n| n.id)
                    .ok_or_else(|| Error::Internal {
                        operation: "resolve outbound phone number: provider has no phone numbers".to_string(),
                    })
            })
            .await
            .cloned()
    }

    /// Dispatch one contact. Infallible by design: every failure mode lands
    /// in the result (and on the Call row where one exists).
    async fn dispatch_contact(
        &self,
        campaign: &Campaign,
        phone_number_id: &str,
        contact: &Contact,
    ) -> ContactDispatchResult {
        let mut result = ContactDispatchResult {
            contact_id: contact.id,
            call_id: None,
            provider_call_id: None,
            error: None,
        };

        if let Err(e) = self.store.record_contact_attempt(campaign.id, contact.id).await {
            tracing::warn!(
                error = %e,
                contact_id = %abbrev_uuid(&contact.id),
                "Failed to record contact attempt"
            );
        }

        // Local row first: the record must exist even if the provider call
        // never happens.
        let call = match self
            .store
            .create_call(CallCreateRequest {
                provider_call_id: None,
                direction: CallDirection::Outbound,
                phone_number: contact.phone_number.clone(),
                status: CallStatus::Queued,
                contact_id: Some(contact.id),
                campaign_id: Some(campaign.id),
            })
            .await
        {
            Ok(call) => call,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    contact_id = %abbrev_uuid(&contact.id),
                    "Failed to create call row for dispatch"
                );
                result.error = Some(format!("create call row: {e}"));
                return result;
            }
        };
        result.call_id = Some(call.id);

        let params = CreateCallParams {
            assistant_id: campaign.assistant_id.clone(),
            phone_number_id: phone_number_id.to_string(),
            customer: CustomerRef {
                number: contact.phone_number.clone(),
                name: contact.name.clone(),
            },
            metadata: Some(serde_json::json!({ "callId": call.id })),
        };

        match self.provider.create_call(params).await {
            Ok(provider_call) => {
                result.provider_call_id = Some(provider_call.id.clone());

                if let Err(e) = self.store.set_provider_call_id(call.id, &provider_call.id).await {
                    tracing::error!(
                        error = %e,
                        call_id = %abbrev_uuid(&call.id),
                        "Failed to attach provider call id"
                    );
                }
                if let Err(e) = self.lifecycle.apply_status(&call, CallStatus::Scheduled, false).await {
                    tracing::error!(
                        error = %e,
                        call_id = %abbrev_uuid(&call.id),
                        "Failed to mark dispatched call scheduled"
                    );
                }

                tracing::debug!(
                    call_id = %abbrev_uuid(&call.id),
                    provider_call_id = %provider_call.id,
                    "Dispatched call"
                );
            }
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(
                    error = %e,
                    call_id = %abbrev_uuid(&call.id),
                    contact_id = %abbrev_uuid(&contact.id),
                    "Provider rejected dispatch"
                );

                // Failed transition runs the usual terminal bookkeeping
                // (campaign failed counter); the contact is then explicitly
                // marked Failed rather than Completed.
                if let Err(e) = self
                    .store
                    .record_completion(
                        call.id,
                        CallCompletionUpdate {
                            ended_reason: Some(message.clone()),
                            ..Default::default()
                        },
                    )
                    .await
                {
                    tracing::error!(error = %e, call_id = %abbrev_uuid(&call.id), "Failed to record dispatch error");
                }
                if let Err(e) = self.lifecycle.apply_status(&call, CallStatus::Failed, false).await {
                    tracing::error!(error = %e, call_id = %abbrev_uuid(&call.id), "Failed to mark call failed");
                }
                if let Err(e) = self
                    .store
                    .set_campaign_contact_status(campaign.id, contact.id, CampaignContactStatus::Failed)
                    .await
                {
                    tracing::warn!(error = %e, contact_id = %abbrev_uuid(&contact.id), "Failed to mark contact failed");
                }

                result.error = Some(message);
            }
        }

        result
    }
}
