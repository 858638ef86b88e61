//! Vapi voice provider implementation.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::config::VapiConfig;
use crate::provider::types::{CreateCallParams, PhoneNumber, ProviderCall};
use crate::provider::{ProviderError, Result, VoiceProvider};

/// Client for the Vapi REST API.
pub struct VapiProvider {
    http: Client,
    base_url: String,
    api_key: String,
}

impl VapiProvider {
    pub fn new(config: VapiConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .expect("Failed to create provider HTTP client");

        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Turn a non-2xx response into a `ProviderError`, reading the body for
    /// the provider's error message.
    async fn error_for(response: reqwest::Response) -> ProviderError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_else(|_| "<unreadable body>".to_string());
        ProviderError::Api { status, message }
    }
}

#[async_trait]
impl VoiceProvider for VapiProvider {
    async fn create_call(&self, params: CreateCallParams) -> Result<ProviderCall> {
        let response = self
            .http
            .post(self.url("/call"))
            .bearer_auth(&self.api_key)
            .json(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        let call = response.json::<ProviderCall>().await?;
        tracing::debug!(provider_call_id = %call.id, "Provider accepted outbound call");
        Ok(call)
    }

    async fn get_call(&self, provider_call_id: &str) -> Result<ProviderCall> {
        let response = self
            .http
            .get(self.url(&format!("/call/{}", provider_call_id)))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if response.status().as_u16() == 404 {
            return Err(ProviderError::CallNotFound(provider_call_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        Ok(response.json::<ProviderCall>().await?)
    }

    async fn list_phone_numbers(&self) -> Result<Vec<PhoneNumber>> {
        let response = self
            .http
            .get(self.url("/phone-number"))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        Ok(response.json::<Vec<PhoneNumber>>().await?)
    }

    async fn get_assistant(&self, assistant_id: &str) -> Result<serde_json::Value> {
        let response = self
            .http
            .get(self.url(&format!("/assistant/{}", assistant_id)))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        Ok(response.json::<serde_json::Value>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::types::CustomerRef;
    use wiremock::matchers::{bearer_token, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> VapiProvider {
        VapiProvider::new(VapiConfig {
            api_key: "vapi_test_key".to_string(),
            base_url: server.uri(),
            phone_number_id: None,
            default_assistant_id: None,
            request_timeout_secs: 5,
        })
    }

    #[tokio::test]
    async fn test_create_call_sends_auth_and_customer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/call"))
            .and(bearer_token("vapi_test_key"))
            .and(body_partial_json(serde_json::json!({
                "phoneNumberId": "pn-1",
                "customer": {"number": "+15551230001"}
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "id": "call-abc",
                "status": "queued"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let call = provider
            .create_call(CreateCallParams {
                assistant_id: Some("asst-1".to_string()),
                phone_number_id: "pn-1".to_string(),
                customer: CustomerRef {
                    number: "+15551230001".to_string(),
                    name: None,
                },
                metadata: None,
            })
            .await
            .unwrap();

        assert_eq!(call.id, "call-abc");
        assert_eq!(call.status.as_deref(), Some("queued"));
    }

    #[tokio::test]
    async fn test_create_call_surfaces_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/call"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid phone number"))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider
            .create_call(CreateCallParams {
                assistant_id: None,
                phone_number_id: "pn-1".to_string(),
                customer: CustomerRef {
                    number: "not-a-number".to_string(),
                    name: None,
                },
                metadata: None,
            })
            .await
            .unwrap_err();

        match err {
            ProviderError::Api { status, message } => {
                assert_eq!(status, 400);
                assert!(message.contains("invalid phone number"));
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_call_maps_404_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/call/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider.get_call("missing").await.unwrap_err();
        assert!(matches!(err, ProviderError::CallNotFound(_)));
    }

    #[tokio::test]
    async fn test_list_phone_numbers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/phone-number"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": "pn-1", "number": "+15550000001"},
                {"id": "pn-2", "number": "+15550000002"}
            ])))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let numbers = provider.list_phone_numbers().await.unwrap();
        assert_eq!(numbers.len(), 2);
        assert_eq!(numbers[0].id, "pn-1");
    }

    #[tokio::test]
    async fn test_transient_classification() {
        let err = ProviderError::Api {
            status: 503,
            message: "unavailable".into(),
        };
        assert!(err.is_transient());

        let err = ProviderError::Api {
            status: 400,
            message: "bad".into(),
        };
        assert!(!err.is_transient());
    }
}
