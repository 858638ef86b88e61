//! Inbound webhook event envelope.
//!
//! The provider posts `{ "message": { "type": ..., ... } }`. The message is
//! modeled as a tagged union keyed by the event type so handling is
//! exhaustive at compile time instead of probing optional fields. Event
//! types this build doesn't know about fall into [`ProviderEvent::Unknown`];
//! they are still logged and acknowledged.

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::provider::types::{CallAnalysis, CallArtifact, CustomerRef, ProviderCall};

/// Envelope wrapper around one provider event.
#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    pub message: ProviderEvent,
}

/// One provider push event, keyed by `type`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProviderEvent {
    /// Provider-side status change for a call.
    #[serde(rename_all = "camelCase")]
    StatusUpdate {
        #[serde(default)]
        call: Option<ProviderCall>,
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        ended_reason: Option<String>,
    },

    /// Conversation state advanced; the call is live even if no in-progress
    /// status update was ever delivered.
    ConversationUpdate {
        #[serde(default)]
        call: Option<ProviderCall>,
    },

    /// Speech started/stopped; same liveness signal as conversation updates.
    SpeechUpdate {
        #[serde(default)]
        call: Option<ProviderCall>,
    },

    /// Incremental transcript chunk, pushed through to connected clients.
    #[serde(rename_all = "camelCase")]
    Transcript {
        #[serde(default)]
        call: Option<ProviderCall>,
        #[serde(default)]
        role: Option<String>,
        #[serde(default)]
        transcript: Option<String>,
        #[serde(default)]
        transcript_type: Option<String>,
    },

    /// The customer hung up; no report will necessarily follow.
    Hang {
        #[serde(default)]
        call: Option<ProviderCall>,
    },

    /// Terminal report with the full artifact and analysis.
    #[serde(rename_all = "camelCase")]
    EndOfCallReport {
        #[serde(default)]
        call: Option<ProviderCall>,
        #[serde(default)]
        artifact: Option<CallArtifact>,
        #[serde(default)]
        analysis: Option<CallAnalysis>,
        #[serde(default)]
        ended_reason: Option<String>,
        #[serde(default)]
        cost: Option<Decimal>,
        #[serde(default)]
        duration_seconds: Option<f64>,
    },

    /// Request/response event: the provider asks which assistant should take
    /// an inbound call and waits (briefly) for the answer.
    AssistantRequest {
        #[serde(default)]
        call: Option<ProviderCall>,
        #[serde(default)]
        customer: Option<CustomerRef>,
    },

    /// Any event type this build doesn't handle.
    #[serde(other)]
    Unknown,
}

impl ProviderEvent {
    /// Stable name for log fields.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StatusUpdate { .. } => "status-update",
            Self::ConversationUpdate { .. } => "conversation-update",
            Self::SpeechUpdate { .. } => "speech-update",
            Self::Transcript { .. } => "transcript",
            Self::Hang { .. } => "hang",
            Self::EndOfCallReport { .. } => "end-of-call-report",
            Self::AssistantRequest { .. } => "assistant-request",
            Self::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_update_parses() {
        let envelope: WebhookEnvelope = serde_json::from_value(serde_json::json!({
            "message": {
                "type": "status-update",
                "status": "in-progress",
                "call": {"id": "call-1"}
            }
        }))
        .unwrap();

        match envelope.message {
            ProviderEvent::StatusUpdate { call, status, .. } => {
                assert_eq!(call.unwrap().id, "call-1");
                assert_eq!(status.as_deref(), Some("in-progress"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_end_of_call_report_parses_artifact_and_analysis() {
        let envelope: WebhookEnvelope = serde_json::from_value(serde_json::json!({
            "message": {
                "type": "end-of-call-report",
                "endedReason": "customer-ended-call",
                "call": {"id": "call-2"},
                "artifact": {
                    "transcript": "AI: Hello.\nUser: Hi.",
                    "messages": [
                        {"role": "assistant", "message": "Hello.", "secondsFromStart": 1.5}
                    ],
                    "recordingUrl": "https://recordings.example/call-2.wav"
                },
                "analysis": {
                    "summary": "Short greeting.",
                    "successEvaluation": "true",
                    "structuredData": {"outcome": "success"}
                }
            }
        }))
        .unwrap();

        match envelope.message {
            ProviderEvent::EndOfCallReport {
                call,
                artifact,
                analysis,
                ended_reason,
                ..
            } => {
                assert_eq!(call.unwrap().id, "call-2");
                assert_eq!(ended_reason.as_deref(), Some("customer-ended-call"));
                let artifact = artifact.unwrap();
                assert_eq!(artifact.messages.len(), 1);
                assert_eq!(analysis.unwrap().success(), Some(true));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_type_is_tolerated() {
        let envelope: WebhookEnvelope = serde_json::from_value(serde_json::json!({
            "message": {"type": "model-output", "output": "..."}
        }))
        .unwrap();
        assert!(matches!(envelope.message, ProviderEvent::Unknown));
        assert_eq!(envelope.message.event_type(), "unknown");
    }

    #[test]
    fn test_missing_type_is_an_error() {
        let result = serde_json::from_value::<WebhookEnvelope>(serde_json::json!({
            "message": {"call": {"id": "call-3"}}
        }));
        assert!(result.is_err());
    }
}
