//! HTTP handler for inbound provider webhooks.

use axum::{
    body::Bytes,
    extract::State,
    response::{IntoResponse, Response},
    Json,
};

use crate::api::models::webhooks::{AssistantSelection, WebhookAck};
use crate::ingest::IngestResponse;
use crate::AppState;

// POST /webhooks/vapi - receive one provider event
//
// The body is taken as raw bytes rather than Json<_> so even an unparseable
// payload gets a 200 acknowledgement; a rejection here would put the
// provider into a retry loop for an event we can never process.
pub async fn provider_webhook(State(state): State<AppState>, body: Bytes) -> Response {
    let payload = match serde_json::from_slice::<serde_json::Value>(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(error = %e, "Webhook body is not valid JSON");
            return Json(WebhookAck {
                received: true,
                error: Some(format!("invalid JSON body: {e}")),
            })
            .into_response();
        }
    };

    match state.ingestor.ingest(payload).await {
        IngestResponse::Ack { error } => Json(WebhookAck { received: true, error }).into_response(),
        IngestResponse::Assistant { assistant } => Json(AssistantSelection { assistant }).into_response(),
    }
}
