//! Voice-call provider abstraction layer.
//!
//! This module defines the `VoiceProvider` trait which wraps the external
//! voice-call provider's REST API (create call, fetch call state, list phone
//! numbers, fetch assistants). Implementations exist for the Vapi-style API
//! and a dummy provider used by tests and local development.

use async_trait::async_trait;

use crate::config::ProviderConfig;

pub mod dummy;
pub mod types;
pub mod vapi;

pub use types::{CreateCallParams, PhoneNumber, ProviderCall};

/// Create a voice provider from configuration.
///
/// This is the single point where config becomes a provider instance; adding
/// a new provider means adding a match arm here.
pub fn create_provider(config: &ProviderConfig) -> std::sync::Arc<dyn VoiceProvider> {
    match config {
        ProviderConfig::Vapi(vapi_config) => std::sync::Arc::new(vapi::VapiProvider::new(vapi_config.clone())),
        ProviderConfig::Dummy => std::sync::Arc::new(dummy::DummyProvider::new()),
    }
}

/// Result type for provider operations
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors that can occur when talking to the voice provider
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Provider request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected provider response: {0}")]
    InvalidResponse(String),

    #[error("Call {0} not found at provider")]
    CallNotFound(String),
}

impl ProviderError {
    /// Transient errors are left for the reconciliation poller's next pass;
    /// nothing in this crate retries them synchronously.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Network(_) => true,
            ProviderError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Abstract voice-call provider interface.
#[async_trait]
pub trait VoiceProvider: Send + Sync {
    /// Place an outbound call. Returns the provider's call record, whose id
    /// correlates all later webhook events.
    async fn create_call(&self, params: CreateCallParams) -> Result<ProviderCall>;

    /// Fetch the authoritative state of a call.
    async fn get_call(&self, provider_call_id: &str) -> Result<ProviderCall>;

    /// List phone numbers available for outbound calls.
    async fn list_phone_numbers(&self) -> Result<Vec<PhoneNumber>>;

    /// Fetch an assistant (call configuration object) by id. Returned
    /// verbatim; the assistant-request webhook echoes it to the provider.
    async fn get_assistant(&self, assistant_id: &str) -> Result<serde_json::Value>;
}
