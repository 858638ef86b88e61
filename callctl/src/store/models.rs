//! Entity models for calls, transcripts, analytics, campaigns, and the
//! webhook event log.
//!
//! Status-like enums are stored as TEXT and converted through
//! `as_str`/`FromStr`, so unknown values coming back from the database fail
//! loudly at the mapping layer instead of deep inside business logic.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use uuid::Uuid;

use crate::types::{CallId, CampaignId, ContactId, WebhookLogId};

/// Direction of a call attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CallDirection {
    Outbound,
    Inbound,
}

impl CallDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outbound => "OUTBOUND",
            Self::Inbound => "INBOUND",
        }
    }
}

impl std::str::FromStr for CallDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OUTBOUND" => Ok(Self::Outbound),
            "INBOUND" => Ok(Self::Inbound),
            _ => Err(format!("Unknown call direction: {}", s)),
        }
    }
}

/// Lifecycle status of a call.
///
/// Statuses only move forward: Queued → Scheduled → Ringing → InProgress →
/// one of the terminal states. Cancelled is reachable from any non-terminal
/// status. See [`crate::lifecycle::transition`] for the transition rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallStatus {
    Queued,
    Scheduled,
    Ringing,
    InProgress,
    Completed,
    NoAnswer,
    Busy,
    Voicemail,
    Failed,
    Cancelled,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Scheduled => "SCHEDULED",
            Self::Ringing => "RINGING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::NoAnswer => "NO_ANSWER",
            Self::Busy => "BUSY",
            Self::Voicemail => "VOICEMAIL",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Terminal statuses admit no further transitions (except authoritative
    /// refinement into a different terminal status).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::NoAnswer | Self::Busy | Self::Voicemail | Self::Failed | Self::Cancelled
        )
    }

    /// Monotonic rank used to reject backward transitions. All terminal
    /// statuses share the top rank.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Scheduled => 1,
            Self::Ringing => 2,
            Self::InProgress => 3,
            _ => 4,
        }
    }

    /// Whether this terminal status counts against the campaign's failed
    /// counter rather than its completed counter.
    pub fn counts_as_failed(&self) -> bool {
        matches!(self, Self::Failed | Self::NoAnswer | Self::Busy)
    }
}

impl std::str::FromStr for CallStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(Self::Queued),
            "SCHEDULED" => Ok(Self::Scheduled),
            "RINGING" => Ok(Self::Ringing),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "NO_ANSWER" => Ok(Self::NoAnswer),
            "BUSY" => Ok(Self::Busy),
            "VOICEMAIL" => Ok(Self::Voicemail),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown call status: {}", s)),
        }
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Business outcome derived from a terminal call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallOutcome {
    Success,
    Partial,
    NoResponse,
    CallbackRequested,
    WrongNumber,
    Declined,
    TechnicalFailure,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Partial => "PARTIAL",
            Self::NoResponse => "NO_RESPONSE",
            Self::CallbackRequested => "CALLBACK_REQUESTED",
            Self::WrongNumber => "WRONG_NUMBER",
            Self::Declined => "DECLINED",
            Self::TechnicalFailure => "TECHNICAL_FAILURE",
        }
    }
}

impl std::str::FromStr for CallOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(Self::Success),
            "PARTIAL" => Ok(Self::Partial),
            "NO_RESPONSE" => Ok(Self::NoResponse),
            "CALLBACK_REQUESTED" => Ok(Self::CallbackRequested),
            "WRONG_NUMBER" => Ok(Self::WrongNumber),
            "DECLINED" => Ok(Self::Declined),
            "TECHNICAL_FAILURE" => Ok(Self::TechnicalFailure),
            _ => Err(format!("Unknown call outcome: {}", s)),
        }
    }
}

/// Pass/fail verdict accompanying an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallResult {
    Pass,
    Fail,
    Inconclusive,
}

impl CallResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Inconclusive => "INCONCLUSIVE",
        }
    }
}

impl std::str::FromStr for CallResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PASS" => Ok(Self::Pass),
            "FAIL" => Ok(Self::Fail),
            "INCONCLUSIVE" => Ok(Self::Inconclusive),
            _ => Err(format!("Unknown call result: {}", s)),
        }
    }
}

/// One outbound or inbound phone call attempt.
#[derive(Debug, Clone, Serialize)]
pub struct Call {
    pub id: CallId,
    /// Provider-side call id; unique once assigned.
    pub provider_call_id: Option<String>,
    pub direction: CallDirection,
    pub phone_number: String,
    pub status: CallStatus,
    pub outcome: Option<CallOutcome>,
    pub result: Option<CallResult>,
    pub ended_reason: Option<String>,
    pub duration_secs: Option<i32>,
    pub cost: Option<Decimal>,
    pub contact_id: Option<ContactId>,
    pub campaign_id: Option<CampaignId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

fn parse_column<T>(raw: Option<String>, column: &str) -> Result<Option<T>, sqlx::Error>
where
    T: std::str::FromStr<Err = String>,
{
    raw.map(|s| {
        s.parse::<T>().map_err(|e| sqlx::Error::ColumnDecode {
            index: column.to_string(),
            source: e.into(),
        })
    })
    .transpose()
}

impl FromRow<'_, PgRow> for Call {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let direction: String = row.try_get("direction")?;
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            provider_call_id: row.try_get("provider_call_id")?,
            direction: direction.parse().map_err(|e: String| sqlx::Error::ColumnDecode {
                index: "direction".into(),
                source: e.into(),
            })?,
            phone_number: row.try_get("phone_number")?,
            status: status.parse().map_err(|e: String| sqlx::Error::ColumnDecode {
                index: "status".into(),
                source: e.into(),
            })?,
            outcome: parse_column(row.try_get("outcome")?, "outcome")?,
            result: parse_column(row.try_get("result")?, "result")?,
            ended_reason: row.try_get("ended_reason")?,
            duration_secs: row.try_get("duration_secs")?,
            cost: row.try_get("cost")?,
            contact_id: row.try_get("contact_id")?,
            campaign_id: row.try_get("campaign_id")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            answered_at: row.try_get("answered_at")?,
            ended_at: row.try_get("ended_at")?,
        })
    }
}

/// Request to create a new call row.
#[derive(Debug, Clone)]
pub struct CallCreateRequest {
    pub provider_call_id: Option<String>,
    pub direction: CallDirection,
    pub phone_number: String,
    pub status: CallStatus,
    pub contact_id: Option<ContactId>,
    pub campaign_id: Option<CampaignId>,
}

/// Terminal artifact fields written alongside a terminal transition.
#[derive(Debug, Clone, Default)]
pub struct CallCompletionUpdate {
    pub ended_reason: Option<String>,
    pub duration_secs: Option<i32>,
    pub cost: Option<Decimal>,
    pub outcome: Option<CallOutcome>,
    pub result: Option<CallResult>,
}

/// One speaker turn within a transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptTurn {
    pub role: String,
    pub content: String,
    pub offset_secs: f64,
}

/// Full conversation record for a call; at most one per call.
#[derive(Debug, Clone, Serialize)]
pub struct Transcript {
    pub call_id: CallId,
    pub full_text: Option<String>,
    pub turns: Vec<TranscriptTurn>,
    pub recording_url: Option<String>,
    pub recording_duration_secs: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

/// Upsert payload for a call's transcript.
#[derive(Debug, Clone, Default)]
pub struct TranscriptUpsertRequest {
    pub full_text: Option<String>,
    pub turns: Vec<TranscriptTurn>,
    pub recording_url: Option<String>,
    pub recording_duration_secs: Option<f64>,
}

/// Structured analysis for a terminal call; at most one per call.
#[derive(Debug, Clone, Serialize)]
pub struct CallAnalytics {
    pub call_id: CallId,
    pub summary: Option<String>,
    pub interest_level: Option<String>,
    pub sentiment: Option<String>,
    pub appointment_booked: bool,
    pub appointment_date: Option<String>,
    pub appointment_time: Option<String>,
    /// Resolved absolute timestamp for the appointment, when the raw
    /// date/time strings could be interpreted.
    pub appointment_at: Option<DateTime<Utc>>,
    pub follow_up_needed: bool,
    pub confirmed_name: Option<String>,
    pub confirmed_phone: Option<String>,
    pub confirmed_email: Option<String>,
    /// Verbatim provider analysis payload, kept for audit.
    pub raw_analysis: Option<serde_json::Value>,
    /// Set when the reconciliation poller produced this record instead of a
    /// webhook delivery.
    pub synced_by_reconciler: bool,
    pub updated_at: DateTime<Utc>,
}

/// Upsert payload for a call's analytics; idempotent per call id.
#[derive(Debug, Clone, Default)]
pub struct CallAnalyticsUpsertRequest {
    pub summary: Option<String>,
    pub interest_level: Option<String>,
    pub sentiment: Option<String>,
    pub appointment_booked: bool,
    pub appointment_date: Option<String>,
    pub appointment_time: Option<String>,
    pub appointment_at: Option<DateTime<Utc>>,
    pub follow_up_needed: bool,
    pub confirmed_name: Option<String>,
    pub confirmed_phone: Option<String>,
    pub confirmed_email: Option<String>,
    pub raw_analysis: Option<serde_json::Value>,
    pub synced_by_reconciler: bool,
}

/// Append-only audit record of one inbound provider event.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookLogEntry {
    pub id: WebhookLogId,
    pub event_type: String,
    pub provider_call_id: Option<String>,
    pub payload: serde_json::Value,
    pub processed: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Campaign status. The core only ever moves campaigns to Completed; creation
/// and activation belong to the CRUD surface outside this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Completed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Active => "ACTIVE",
            Self::Paused => "PAUSED",
            Self::Completed => "COMPLETED",
        }
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(Self::Draft),
            "ACTIVE" => Ok(Self::Active),
            "PAUSED" => Ok(Self::Paused),
            "COMPLETED" => Ok(Self::Completed),
            _ => Err(format!("Unknown campaign status: {}", s)),
        }
    }
}

/// An outbound calling campaign.
#[derive(Debug, Clone, Serialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub status: CampaignStatus,
    /// Dispatch chunk size: how many provider calls may be in flight at once.
    pub max_concurrent: i32,
    pub completed_calls: i32,
    pub failed_calls: i32,
    /// Provider assistant (call configuration) used for this campaign's calls.
    pub assistant_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FromRow<'_, PgRow> for Campaign {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            status: status.parse().map_err(|e: String| sqlx::Error::ColumnDecode {
                index: "status".into(),
                source: e.into(),
            })?,
            max_concurrent: row.try_get("max_concurrent")?,
            completed_calls: row.try_get("completed_calls")?,
            failed_calls: row.try_get("failed_calls")?,
            assistant_id: row.try_get("assistant_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Participation state of one contact in one campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignContactStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl CampaignContactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::str::FromStr for CampaignContactStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("Unknown campaign contact status: {}", s)),
        }
    }
}

/// Join entity tracking a contact's participation in a campaign.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignContact {
    pub campaign_id: CampaignId,
    pub contact_id: ContactId,
    pub status: CampaignContactStatus,
    pub attempts: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl FromRow<'_, PgRow> for CampaignContact {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(Self {
            campaign_id: row.try_get("campaign_id")?,
            contact_id: row.try_get("contact_id")?,
            status: status.parse().map_err(|e: String| sqlx::Error::ColumnDecode {
                index: "status".into(),
                source: e.into(),
            })?,
            attempts: row.try_get("attempts")?,
            last_attempt_at: row.try_get("last_attempt_at")?,
        })
    }
}

/// Contact record; owned by the CRUD surface, read here for dispatch and
/// notification identity.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Contact {
    pub id: ContactId,
    pub name: Option<String>,
    pub phone_number: String,
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            CallStatus::Queued,
            CallStatus::Scheduled,
            CallStatus::Ringing,
            CallStatus::InProgress,
            CallStatus::Completed,
            CallStatus::NoAnswer,
            CallStatus::Busy,
            CallStatus::Voicemail,
            CallStatus::Failed,
            CallStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<CallStatus>().unwrap(), status);
        }
        assert!("ended".parse::<CallStatus>().is_err());
    }

    #[test]
    fn test_terminal_ranks_are_top() {
        assert!(CallStatus::Queued.rank() < CallStatus::Scheduled.rank());
        assert!(CallStatus::Scheduled.rank() < CallStatus::Ringing.rank());
        assert!(CallStatus::Ringing.rank() < CallStatus::InProgress.rank());
        for terminal in [
            CallStatus::Completed,
            CallStatus::NoAnswer,
            CallStatus::Busy,
            CallStatus::Voicemail,
            CallStatus::Failed,
            CallStatus::Cancelled,
        ] {
            assert!(terminal.is_terminal());
            assert_eq!(terminal.rank(), 4);
        }
        assert!(!CallStatus::InProgress.is_terminal());
    }

    #[test]
    fn test_failed_counter_classification() {
        assert!(CallStatus::Failed.counts_as_failed());
        assert!(CallStatus::NoAnswer.counts_as_failed());
        assert!(CallStatus::Busy.counts_as_failed());
        assert!(!CallStatus::Completed.counts_as_failed());
        assert!(!CallStatus::Voicemail.counts_as_failed());
    }
}
