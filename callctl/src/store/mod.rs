//! Persistence layer for call records and their satellite entities.
//!
//! [`CallStore`] is the single write surface for calls, transcripts,
//! analytics, the webhook event log, and campaign progress. The production
//! implementation is [`postgres::PostgresCallStore`]; [`in_memory`] provides
//! a lock-based implementation used by tests and the dummy deployment mode.
//!
//! All mutations are single-row operations. Status transitions are guarded
//! on the current status, so concurrent writers converge instead of racing:
//! the second writer's guard no longer matches and its update affects zero
//! rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::store::models::{
    Call, CallAnalytics, CallAnalyticsUpsertRequest, CallCompletionUpdate, CallCreateRequest, CallOutcome, CallResult,
    CallStatus, Campaign, CampaignContactStatus, Contact, Transcript, TranscriptUpsertRequest,
};
use crate::types::{CallId, CampaignId, ContactId, WebhookLogId};

pub mod in_memory;
pub mod models;
pub mod postgres;

/// Unified error type for store operations that application code can handle.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Entity not found by the given identifier
    #[error("Entity not found")]
    NotFound,

    /// Unique constraint violation
    #[error("Unique constraint violation: {message}")]
    UniqueViolation {
        constraint: Option<String>,
        message: String,
    },

    /// Catch-all for non-recoverable errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Convert from sqlx::Error using sqlx's error categorization
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => StoreError::UniqueViolation {
                constraint: db_err.constraint().map(|s| s.to_string()),
                message: db_err.message().to_string(),
            },
            _ => StoreError::Other(anyhow::Error::from(err)),
        }
    }
}

/// Type alias for store operation results
pub type Result<T> = std::result::Result<T, StoreError>;

/// A guarded status transition write.
///
/// The write only applies when the row still holds `from`; the timestamp
/// fields use set-if-null semantics so re-applying an already-applied event
/// leaves the first observation in place.
#[derive(Debug, Clone, Copy)]
pub struct CallTransitionWrite {
    pub from: CallStatus,
    pub to: CallStatus,
    pub set_started_at: Option<DateTime<Utc>>,
    pub set_answered_at: Option<DateTime<Utc>>,
    pub set_ended_at: Option<DateTime<Utc>>,
}

/// Store surface for call lifecycle state.
///
/// Implementations must make every method atomic on its own; callers never
/// get multi-statement transactions and are written to tolerate that.
#[async_trait]
pub trait CallStore: Send + Sync {
    // ----- calls -----

    /// Insert a new call row.
    async fn create_call(&self, request: CallCreateRequest) -> Result<Call>;

    /// Fetch a call by local id.
    async fn get_call(&self, id: CallId) -> Result<Option<Call>>;

    /// Fetch a call by the provider's call id.
    async fn get_call_by_provider_id(&self, provider_call_id: &str) -> Result<Option<Call>>;

    /// Attach the provider call id once the provider accepts the call.
    async fn set_provider_call_id(&self, id: CallId, provider_call_id: &str) -> Result<()>;

    /// Apply a guarded status transition. Returns `true` when the row was
    /// updated, `false` when the guard no longer matched (another writer got
    /// there first, or the event was a duplicate).
    async fn apply_transition(&self, id: CallId, write: CallTransitionWrite) -> Result<bool>;

    /// Record terminal artifact fields (ended reason, duration, cost,
    /// outcome, result). Overwrites; callers only invoke this from terminal
    /// processing.
    async fn record_completion(&self, id: CallId, update: CallCompletionUpdate) -> Result<()>;

    /// Set outcome/result only. Used to propagate an inbound callback's
    /// outcome onto the outbound call it answers.
    async fn set_outcome(&self, id: CallId, outcome: CallOutcome, result: CallResult) -> Result<()>;

    /// Calls with a provider id, in a non-terminal status, created before
    /// `cutoff`. Ordered oldest first.
    async fn list_stuck_calls(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Call>>;

    /// Most recent outbound call to `phone_number` created after `since`,
    /// used for inbound attribution and assistant selection.
    async fn latest_outbound_call_to(&self, phone_number: &str, since: DateTime<Utc>) -> Result<Option<Call>>;

    // ----- transcripts -----

    async fn upsert_transcript(&self, call_id: CallId, request: TranscriptUpsertRequest) -> Result<()>;

    async fn get_transcript(&self, call_id: CallId) -> Result<Option<Transcript>>;

    // ----- analytics -----

    async fn upsert_analytics(&self, call_id: CallId, request: CallAnalyticsUpsertRequest) -> Result<()>;

    async fn get_analytics(&self, call_id: CallId) -> Result<Option<CallAnalytics>>;

    // ----- webhook event log -----

    /// Append a raw event to the webhook log. This is the durability
    /// checkpoint for ingestion and must happen before any processing.
    async fn insert_webhook_log(
        &self,
        event_type: &str,
        provider_call_id: Option<&str>,
        payload: &serde_json::Value,
    ) -> Result<WebhookLogId>;

    async fn mark_webhook_processed(&self, id: WebhookLogId) -> Result<()>;

    async fn mark_webhook_error(&self, id: WebhookLogId, error: &str) -> Result<()>;

    // ----- campaigns -----

    async fn get_campaign(&self, id: CampaignId) -> Result<Option<Campaign>>;

    /// Bump the campaign's completed or failed counter by one.
    async fn increment_campaign_counters(&self, id: CampaignId, failed: bool) -> Result<()>;

    /// Number of campaign contacts still Pending or InProgress.
    async fn pending_contact_count(&self, id: CampaignId) -> Result<i64>;

    /// Move the campaign to Completed.
    async fn complete_campaign(&self, id: CampaignId) -> Result<()>;

    /// Set one contact's participation status.
    async fn set_campaign_contact_status(
        &self,
        campaign_id: CampaignId,
        contact_id: ContactId,
        status: CampaignContactStatus,
    ) -> Result<()>;

    /// Mark a dispatch attempt: status InProgress, attempts + 1, timestamp.
    async fn record_contact_attempt(&self, campaign_id: CampaignId, contact_id: ContactId) -> Result<()>;

    /// Contacts of the campaign still in Pending status.
    async fn list_pending_contacts(&self, campaign_id: CampaignId) -> Result<Vec<Contact>>;

    // ----- contacts -----

    async fn get_contact(&self, id: ContactId) -> Result<Option<Contact>>;
}
