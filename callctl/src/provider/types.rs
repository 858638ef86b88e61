//! Wire types for the voice provider's REST API.
//!
//! Field names follow the provider's camelCase JSON. Everything optional on
//! the wire stays optional here; the lifecycle layer decides what missing
//! fields mean.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Parameters for placing an outbound call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCallParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<String>,
    pub phone_number_id: String,
    pub customer: CustomerRef,
    /// Carries the local call id so webhook events can be correlated even if
    /// the provider call id mapping is lost.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Customer (callee/caller) reference on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerRef {
    pub number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A call as the provider reports it.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCall {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub ended_reason: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cost: Option<Decimal>,
    #[serde(default)]
    pub customer: Option<CustomerRef>,
    #[serde(default)]
    pub assistant_id: Option<String>,
    #[serde(default)]
    pub artifact: Option<CallArtifact>,
    #[serde(default)]
    pub analysis: Option<CallAnalysis>,
}

impl ProviderCall {
    /// Whether the provider considers this call finished.
    pub fn is_ended(&self) -> bool {
        matches!(self.status.as_deref(), Some("ended")) || self.ended_at.is_some()
    }

    /// Call duration derived from the provider timestamps.
    pub fn duration_secs(&self) -> Option<i32> {
        match (self.started_at, self.ended_at) {
            (Some(started), Some(ended)) => Some((ended - started).num_seconds().max(0) as i32),
            _ => None,
        }
    }
}

/// Recording/transcript artifact attached to an ended call.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallArtifact {
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub messages: Vec<ArtifactMessage>,
    #[serde(default)]
    pub recording_url: Option<String>,
    #[serde(default)]
    pub recording_duration: Option<f64>,
}

/// One conversation message inside an artifact.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactMessage {
    pub role: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub seconds_from_start: Option<f64>,
}

/// Provider-side analysis of an ended call.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallAnalysis {
    #[serde(default)]
    pub summary: Option<String>,
    /// The provider reports this as a stringly-typed "true"/"false" on some
    /// API versions and a boolean on others.
    #[serde(default)]
    pub success_evaluation: Option<serde_json::Value>,
    #[serde(default)]
    pub structured_data: Option<serde_json::Value>,
}

impl CallAnalysis {
    /// Normalize the success evaluation to a boolean, if present.
    pub fn success(&self) -> Option<bool> {
        match self.success_evaluation.as_ref()? {
            serde_json::Value::Bool(b) => Some(*b),
            serde_json::Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "pass" => Some(true),
                "false" | "fail" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

/// A provider phone number usable as an outbound line.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhoneNumber {
    pub id: String,
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_evaluation_normalization() {
        let mut analysis = CallAnalysis::default();
        assert_eq!(analysis.success(), None);

        analysis.success_evaluation = Some(serde_json::json!(true));
        assert_eq!(analysis.success(), Some(true));

        analysis.success_evaluation = Some(serde_json::json!("false"));
        assert_eq!(analysis.success(), Some(false));

        analysis.success_evaluation = Some(serde_json::json!("maybe"));
        assert_eq!(analysis.success(), None);
    }

    #[test]
    fn test_provider_call_duration() {
        let call: ProviderCall = serde_json::from_value(serde_json::json!({
            "id": "call-1",
            "status": "ended",
            "startedAt": "2026-03-02T10:00:00Z",
            "endedAt": "2026-03-02T10:02:30Z"
        }))
        .unwrap();
        assert!(call.is_ended());
        assert_eq!(call.duration_secs(), Some(150));
    }

    #[test]
    fn test_provider_call_tolerates_missing_fields() {
        let call: ProviderCall = serde_json::from_value(serde_json::json!({"id": "call-2"})).unwrap();
        assert!(!call.is_ended());
        assert_eq!(call.duration_secs(), None);
        assert!(call.artifact.is_none());
    }
}
