//! PostgreSQL implementation of [`CallStore`].
//!
//! Uses the runtime query API so the crate builds without a database at
//! compile time. All status transitions are single-statement guarded
//! updates; the upserts use `ON CONFLICT` keyed by call id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;

use crate::store::models::{
    Call, CallAnalytics, CallAnalyticsUpsertRequest, CallCompletionUpdate, CallCreateRequest, CallOutcome, CallResult,
    Campaign, CampaignContactStatus, Contact, Transcript, TranscriptTurn, TranscriptUpsertRequest,
};
use crate::store::{CallStore, CallTransitionWrite, Result, StoreError};
use crate::types::{abbrev_uuid, CallId, CampaignId, ContactId, WebhookLogId};

/// Store backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PostgresCallStore {
    pool: PgPool,
}

impl PostgresCallStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CallStore for PostgresCallStore {
    #[instrument(skip(self, request), fields(phone = %request.phone_number), err)]
    async fn create_call(&self, request: CallCreateRequest) -> Result<Call> {
        let call = sqlx::query_as::<_, Call>(
            r#"
            INSERT INTO calls (provider_call_id, direction, phone_number, status, contact_id, campaign_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(&request.provider_call_id)
        .bind(request.direction.as_str())
        .bind(&request.phone_number)
        .bind(request.status.as_str())
        .bind(request.contact_id)
        .bind(request.campaign_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(call)
    }

    #[instrument(skip(self), fields(call_id = %abbrev_uuid(&id)), err)]
    async fn get_call(&self, id: CallId) -> Result<Option<Call>> {
        let call = sqlx::query_as::<_, Call>("SELECT * FROM calls WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(call)
    }

    #[instrument(skip(self), err)]
    async fn get_call_by_provider_id(&self, provider_call_id: &str) -> Result<Option<Call>> {
        let call = sqlx::query_as::<_, Call>("SELECT * FROM calls WHERE provider_call_id = $1")
            .bind(provider_call_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(call)
    }

    #[instrument(skip(self), fields(call_id = %abbrev_uuid(&id)), err)]
    async fn set_provider_call_id(&self, id: CallId, provider_call_id: &str) -> Result<()> {
        sqlx::query("UPDATE calls SET provider_call_id = $2 WHERE id = $1")
            .bind(id)
            .bind(provider_call_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[instrument(
        skip(self, write),
        fields(call_id = %abbrev_uuid(&id), from = %write.from, to = %write.to),
        err
    )]
    async fn apply_transition(&self, id: CallId, write: CallTransitionWrite) -> Result<bool> {
        // Guarded on the current status: a duplicate or late event finds the
        // guard stale and updates zero rows.
        let result = sqlx::query(
            r#"
            UPDATE calls
            SET
                status = $3,
                started_at = COALESCE(started_at, $4),
                answered_at = COALESCE(answered_at, $5),
                ended_at = COALESCE(ended_at, $6)
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(write.from.as_str())
        .bind(write.to.as_str())
        .bind(write.set_started_at)
        .bind(write.set_answered_at)
        .bind(write.set_ended_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, update), fields(call_id = %abbrev_uuid(&id)), err)]
    async fn record_completion(&self, id: CallId, update: CallCompletionUpdate) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE calls
            SET
                ended_reason = COALESCE($2, ended_reason),
                duration_secs = COALESCE($3, duration_secs),
                cost = COALESCE($4, cost),
                outcome = COALESCE($5, outcome),
                result = COALESCE($6, result)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&update.ended_reason)
        .bind(update.duration_secs)
        .bind(update.cost)
        .bind(update.outcome.map(|o| o.as_str()))
        .bind(update.result.map(|r| r.as_str()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self), fields(call_id = %abbrev_uuid(&id)), err)]
    async fn set_outcome(&self, id: CallId, outcome: CallOutcome, result: CallResult) -> Result<()> {
        sqlx::query("UPDATE calls SET outcome = $2, result = $3 WHERE id = $1")
            .bind(id)
            .bind(outcome.as_str())
            .bind(result.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn list_stuck_calls(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<Call>> {
        let calls = sqlx::query_as::<_, Call>(
            r#"
            SELECT * FROM calls
            WHERE provider_call_id IS NOT NULL
              AND status IN ('QUEUED', 'SCHEDULED', 'RINGING', 'IN_PROGRESS')
              AND created_at < $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(calls)
    }

    #[instrument(skip(self), err)]
    async fn latest_outbound_call_to(&self, phone_number: &str, since: DateTime<Utc>) -> Result<Option<Call>> {
        let call = sqlx::query_as::<_, Call>(
            r#"
            SELECT * FROM calls
            WHERE direction = 'OUTBOUND'
              AND phone_number = $1
              AND created_at >= $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(phone_number)
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;

        Ok(call)
    }

    #[instrument(skip(self, request), fields(call_id = %abbrev_uuid(&call_id)), err)]
    async fn upsert_transcript(&self, call_id: CallId, request: TranscriptUpsertRequest) -> Result<()> {
        let turns = serde_json::to_value(&request.turns).map_err(anyhow::Error::from)?;

        sqlx::query(
            r#"
            INSERT INTO transcripts (call_id, full_text, turns, recording_url, recording_duration_secs, updated_at)
            VALUES ($1, $2, $3, $4, $5, now())
            ON CONFLICT (call_id) DO UPDATE SET
                full_text = EXCLUDED.full_text,
                turns = EXCLUDED.turns,
                recording_url = EXCLUDED.recording_url,
                recording_duration_secs = EXCLUDED.recording_duration_secs,
                updated_at = now()
            "#,
        )
        .bind(call_id)
        .bind(&request.full_text)
        .bind(turns)
        .bind(&request.recording_url)
        .bind(request.recording_duration_secs)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self), fields(call_id = %abbrev_uuid(&call_id)), err)]
    async fn get_transcript(&self, call_id: CallId) -> Result<Option<Transcript>> {
        use sqlx::Row;

        let row = sqlx::query("SELECT * FROM transcripts WHERE call_id = $1")
            .bind(call_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let turns: serde_json::Value = row.try_get("turns")?;
            let turns: Vec<TranscriptTurn> =
                serde_json::from_value(turns).map_err(|e| sqlx::Error::ColumnDecode {
                    index: "turns".into(),
                    source: e.into(),
                })?;
            Ok::<_, sqlx::Error>(Transcript {
                call_id: row.try_get("call_id")?,
                full_text: row.try_get("full_text")?,
                turns,
                recording_url: row.try_get("recording_url")?,
                recording_duration_secs: row.try_get("recording_duration_secs")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
        .map_err(StoreError::from)
    }

    #[instrument(skip(self, request), fields(call_id = %abbrev_uuid(&call_id)), err)]
    async fn upsert_analytics(&self, call_id: CallId, request: CallAnalyticsUpsertRequest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO call_analytics (
                call_id, summary, interest_level, sentiment,
                appointment_booked, appointment_date, appointment_time, appointment_at,
                follow_up_needed, confirmed_name, confirmed_phone, confirmed_email,
                raw_analysis, synced_by_reconciler, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, now())
            ON CONFLICT (call_id) DO UPDATE SET
                summary = EXCLUDED.summary,
                interest_level = EXCLUDED.interest_level,
                sentiment = EXCLUDED.sentiment,
                appointment_booked = EXCLUDED.appointment_booked,
                appointment_date = EXCLUDED.appointment_date,
                appointment_time = EXCLUDED.appointment_time,
                appointment_at = EXCLUDED.appointment_at,
                follow_up_needed = EXCLUDED.follow_up_needed,
                confirmed_name = EXCLUDED.confirmed_name,
                confirmed_phone = EXCLUDED.confirmed_phone,
                confirmed_email = EXCLUDED.confirmed_email,
                raw_analysis = EXCLUDED.raw_analysis,
                synced_by_reconciler = EXCLUDED.synced_by_reconciler,
                updated_at = now()
            "#,
        )
        .bind(call_id)
        .bind(&request.summary)
        .bind(&request.interest_level)
        .bind(&request.sentiment)
        .bind(request.appointment_booked)
        .bind(&request.appointment_date)
        .bind(&request.appointment_time)
        .bind(request.appointment_at)
        .bind(request.follow_up_needed)
        .bind(&request.confirmed_name)
        .bind(&request.confirmed_phone)
        .bind(&request.confirmed_email)
        .bind(&request.raw_analysis)
        .bind(request.synced_by_reconciler)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self), fields(call_id = %abbrev_uuid(&call_id)), err)]
    async fn get_analytics(&self, call_id: CallId) -> Result<Option<CallAnalytics>> {
        use sqlx::Row;

        let row = sqlx::query("SELECT * FROM call_analytics WHERE call_id = $1")
            .bind(call_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok::<_, sqlx::Error>(CallAnalytics {
                call_id: row.try_get("call_id")?,
                summary: row.try_get("summary")?,
                interest_level: row.try_get("interest_level")?,
                sentiment: row.try_get("sentiment")?,
                appointment_booked: row.try_get("appointment_booked")?,
                appointment_date: row.try_get("appointment_date")?,
                appointment_time: row.try_get("appointment_time")?,
                appointment_at: row.try_get("appointment_at")?,
                follow_up_needed: row.try_get("follow_up_needed")?,
                confirmed_name: row.try_get("confirmed_name")?,
                confirmed_phone: row.try_get("confirmed_phone")?,
                confirmed_email: row.try_get("confirmed_email")?,
                raw_analysis: row.try_get("raw_analysis")?,
                synced_by_reconciler: row.try_get("synced_by_reconciler")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
        .map_err(StoreError::from)
    }

    #[instrument(skip(self, payload), err)]
    async fn insert_webhook_log(
        &self,
        event_type: &str,
        provider_call_id: Option<&str>,
        payload: &serde_json::Value,
    ) -> Result<WebhookLogId> {
        use sqlx::Row;

        let row = sqlx::query(
            r#"
            INSERT INTO webhook_log (event_type, provider_call_id, payload)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(event_type)
        .bind(provider_call_id)
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id").map_err(StoreError::from)?)
    }

    #[instrument(skip(self), fields(log_id = %abbrev_uuid(&id)), err)]
    async fn mark_webhook_processed(&self, id: WebhookLogId) -> Result<()> {
        sqlx::query("UPDATE webhook_log SET processed = true WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[instrument(skip(self, error), fields(log_id = %abbrev_uuid(&id)), err)]
    async fn mark_webhook_error(&self, id: WebhookLogId, error: &str) -> Result<()> {
        sqlx::query("UPDATE webhook_log SET error = $2 WHERE id = $1")
            .bind(id)
            .bind(error)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[instrument(skip(self), fields(campaign_id = %abbrev_uuid(&id)), err)]
    async fn get_campaign(&self, id: CampaignId) -> Result<Option<Campaign>> {
        let campaign = sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(campaign)
    }

    #[instrument(skip(self), fields(campaign_id = %abbrev_uuid(&id)), err)]
    async fn increment_campaign_counters(&self, id: CampaignId, failed: bool) -> Result<()> {
        if failed {
            sqlx::query("UPDATE campaigns SET failed_calls = failed_calls + 1 WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;
        } else {
            sqlx::query("UPDATE campaigns SET completed_calls = completed_calls + 1 WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    #[instrument(skip(self), fields(campaign_id = %abbrev_uuid(&id)), err)]
    async fn pending_contact_count(&self, id: CampaignId) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM campaign_contacts
            WHERE campaign_id = $1 AND status IN ('PENDING', 'IN_PROGRESS')
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    #[instrument(skip(self), fields(campaign_id = %abbrev_uuid(&id)), err)]
    async fn complete_campaign(&self, id: CampaignId) -> Result<()> {
        sqlx::query("UPDATE campaigns SET status = 'COMPLETED' WHERE id = $1 AND status <> 'COMPLETED'")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[instrument(
        skip(self),
        fields(campaign_id = %abbrev_uuid(&campaign_id), contact_id = %abbrev_uuid(&contact_id)),
        err
    )]
    async fn set_campaign_contact_status(
        &self,
        campaign_id: CampaignId,
        contact_id: ContactId,
        status: CampaignContactStatus,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE campaign_contacts
            SET status = $3
            WHERE campaign_id = $1 AND contact_id = $2
            "#,
        )
        .bind(campaign_id)
        .bind(contact_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(
        skip(self),
        fields(campaign_id = %abbrev_uuid(&campaign_id), contact_id = %abbrev_uuid(&contact_id)),
        err
    )]
    async fn record_contact_attempt(&self, campaign_id: CampaignId, contact_id: ContactId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE campaign_contacts
            SET status = 'IN_PROGRESS', attempts = attempts + 1, last_attempt_at = now()
            WHERE campaign_id = $1 AND contact_id = $2
            "#,
        )
        .bind(campaign_id)
        .bind(contact_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self), fields(campaign_id = %abbrev_uuid(&campaign_id)), err)]
    async fn list_pending_contacts(&self, campaign_id: CampaignId) -> Result<Vec<Contact>> {
        let contacts = sqlx::query_as::<_, Contact>(
            r#"
            SELECT c.id, c.name, c.phone_number, c.email
            FROM contacts c
            JOIN campaign_contacts cc ON cc.contact_id = c.id
            WHERE cc.campaign_id = $1 AND cc.status = 'PENDING'
            ORDER BY c.id
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(contacts)
    }

    #[instrument(skip(self), fields(contact_id = %abbrev_uuid(&id)), err)]
    async fn get_contact(&self, id: ContactId) -> Result<Option<Contact>> {
        let contact = sqlx::query_as::<_, Contact>("SELECT id, name, phone_number, email FROM contacts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(contact)
    }
}
