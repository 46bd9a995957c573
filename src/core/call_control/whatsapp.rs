//! WhatsApp Business calling API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};
use url::Url;
use zeroize::Zeroize;

use super::base::{ActionOutcome, CallAction, CallControl, CallControlError};
use super::messages::{CallActionRequest, CallActionResponse, MESSAGING_PRODUCT, SessionBody};

const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
const USER_AGENT: &str = concat!("callbridge-gateway/", env!("CARGO_PKG_VERSION"));

/// Settings for [`WhatsAppCallClient`].
#[derive(Clone)]
pub struct WhatsAppConfig {
    /// Graph API base, e.g. `https://graph.facebook.com/v18.0`
    pub api_base: String,
    pub phone_number_id: String,
    pub access_token: String,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for WhatsAppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhatsAppConfig")
            .field("api_base", &self.api_base)
            .field("phone_number_id", &self.phone_number_id)
            .field("access_token", &"[REDACTED]")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Drop for WhatsAppConfig {
    fn drop(&mut self) {
        self.access_token.zeroize();
    }
}

/// Sends call actions to `{api_base}/{phone_number_id}/calls`.
pub struct WhatsAppCallClient {
    http: Client,
    endpoint: Url,
    access_token: String,
}

impl Drop for WhatsAppCallClient {
    fn drop(&mut self) {
        self.access_token.zeroize();
    }
}

impl WhatsAppCallClient {
    pub fn new(config: &WhatsAppConfig) -> Result<Self, CallControlError> {
        let endpoint = Url::parse(&format!(
            "{}/{}/calls",
            config.api_base.trim_end_matches('/'),
            config.phone_number_id
        ))
        .map_err(|e| CallControlError::Configuration(format!("Invalid calls endpoint: {e}")))?;

        let http = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                CallControlError::Configuration(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            http,
            endpoint,
            access_token: config.access_token.clone(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn post_action(
        &self,
        call_id: &str,
        action: CallAction,
        sdp: Option<&str>,
    ) -> Result<(), CallControlError> {
        if call_id.is_empty() {
            return Err(CallControlError::MissingCallId);
        }

        let session = match (action.carries_session(), sdp) {
            (true, Some(sdp)) => Some(SessionBody::answer(sdp)),
            (true, None) => return Err(CallControlError::MissingSdp(action)),
            (false, _) => None,
        };

        let request = CallActionRequest {
            messaging_product: MESSAGING_PRODUCT,
            call_id,
            action,
            session,
        };

        debug!(call_id, %action, "Sending call action");

        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| CallControlError::Transport(e.to_string()))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| CallControlError::Transport(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            let body = serde_json::from_str::<CallActionResponse>(&response_text)
                .ok()
                .and_then(|r| r.error)
                .and_then(|e| e.message)
                .unwrap_or(response_text);
            return Err(CallControlError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: CallActionResponse = serde_json::from_str(&response_text)
            .map_err(|e| CallControlError::InvalidResponse(e.to_string()))?;

        match parsed.success {
            Some(true) => Ok(()),
            Some(false) => Err(CallControlError::NotSuccessful(
                parsed
                    .error
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| "success=false".to_string()),
            )),
            None => Err(CallControlError::NotSuccessful(
                "response carried no success flag".to_string(),
            )),
        }
    }
}

#[async_trait]
impl CallControl for WhatsAppCallClient {
    async fn send_action(
        &self,
        call_id: &str,
        action: CallAction,
        sdp: Option<&str>,
    ) -> ActionOutcome {
        match self.post_action(call_id, action, sdp).await {
            Ok(()) => {
                info!(call_id, %action, "Call action succeeded");
                ActionOutcome::succeeded(action, call_id)
            }
            Err(e) => {
                warn!(call_id, %action, error = %e, "Call action failed");
                ActionOutcome::failed(action, call_id, e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(api_base: &str) -> WhatsAppConfig {
        WhatsAppConfig {
            api_base: api_base.to_string(),
            phone_number_id: "1234567890".to_string(),
            access_token: "token".to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_endpoint() {
        let client = WhatsAppCallClient::new(&config("https://graph.facebook.com/v18.0/")).unwrap();
        assert_eq!(
            client.endpoint().as_str(),
            "https://graph.facebook.com/v18.0/1234567890/calls"
        );
    }

    #[test]
    fn test_invalid_base() {
        assert!(matches!(
            WhatsAppCallClient::new(&config("not a url")),
            Err(CallControlError::Configuration(_))
        ));
    }

    #[test]
    fn test_debug_redacts_token() {
        let debug = format!("{:?}", config("https://example.com"));
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("\"token\""));
    }

    #[tokio::test]
    async fn test_missing_call_id_fails_without_request() {
        // Unroutable endpoint: any network attempt would fail differently.
        let client = WhatsAppCallClient::new(&config("http://127.0.0.1:9")).unwrap();
        let outcome = client.reject("").await;
        assert!(!outcome.is_success());
        assert!(matches!(outcome.error, Some(CallControlError::MissingCallId)));
    }
}
