//! Response models for call endpoints.

use serde::Serialize;

use crate::store::models::{Call, CallAnalytics, Transcript};

/// Operator view of one call with its satellite records.
#[derive(Debug, Serialize)]
pub struct CallDetail {
    #[serde(flatten)]
    pub call: Call,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<Transcript>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analytics: Option<CallAnalytics>,
}

/// Result of force-syncing a single call.
#[derive(Debug, Serialize)]
pub struct CallSyncResult {
    /// Whether provider state was pulled and applied. `false` means the call
    /// was already terminal or the provider still reports it active.
    pub synced: bool,
    pub status: String,
}
