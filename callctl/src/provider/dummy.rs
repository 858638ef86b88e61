//! Dummy voice provider for tests and local development.
//!
//! Accepts every call immediately (unless the number is in the configured
//! reject set) and remembers the calls it was asked to place so tests can
//! script what `get_call` returns later.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use uuid::Uuid;

use crate::provider::types::{CreateCallParams, PhoneNumber, ProviderCall};
use crate::provider::{ProviderError, Result, VoiceProvider};

#[derive(Default)]
pub struct DummyProvider {
    reject_numbers: HashSet<String>,
    calls: Mutex<HashMap<String, ProviderCall>>,
}

impl DummyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Numbers in this set fail dispatch with a provider rejection.
    pub fn with_rejected_numbers<I: IntoIterator<Item = String>>(numbers: I) -> Self {
        Self {
            reject_numbers: numbers.into_iter().collect(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Overwrite the stored state for a call so a later `get_call` sees it.
    pub fn set_call_state(&self, call: ProviderCall) {
        self.calls.lock().unwrap().insert(call.id.clone(), call);
    }

    /// Number of calls placed through this provider.
    pub fn placed_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl VoiceProvider for DummyProvider {
    async fn create_call(&self, params: CreateCallParams) -> Result<ProviderCall> {
        if self.reject_numbers.contains(&params.customer.number) {
            return Err(ProviderError::Api {
                status: 400,
                message: format!("number {} rejected", params.customer.number),
            });
        }

        let call = ProviderCall {
            id: format!("dummy-{}", Uuid::new_v4()),
            status: Some("queued".to_string()),
            ended_reason: None,
            started_at: None,
            ended_at: None,
            cost: None,
            customer: Some(params.customer),
            assistant_id: params.assistant_id,
            artifact: None,
            analysis: None,
        };
        self.calls.lock().unwrap().insert(call.id.clone(), call.clone());
        Ok(call)
    }

    async fn get_call(&self, provider_call_id: &str) -> Result<ProviderCall> {
        self.calls
            .lock()
            .unwrap()
            .get(provider_call_id)
            .cloned()
            .ok_or_else(|| ProviderError::CallNotFound(provider_call_id.to_string()))
    }

    async fn list_phone_numbers(&self) -> Result<Vec<PhoneNumber>> {
        Ok(vec![PhoneNumber {
            id: "dummy-line".to_string(),
            number: Some("+15550100000".to_string()),
            name: Some("dummy".to_string()),
        }])
    }

    async fn get_assistant(&self, assistant_id: &str) -> Result<serde_json::Value> {
        Ok(serde_json::json!({ "id": assistant_id, "name": "dummy assistant" }))
    }
}
