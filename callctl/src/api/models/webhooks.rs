//! Response models for the provider webhook endpoint.

use serde::Serialize;

/// Acknowledgement returned for every webhook delivery.
///
/// Always paired with HTTP 200: surfacing a non-2xx would trigger
/// provider-side retry storms for events we already logged.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Synchronous answer to an assistant-request event.
#[derive(Debug, Serialize)]
pub struct AssistantSelection {
    pub assistant: serde_json::Value,
}
