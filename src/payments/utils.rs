use crate::payments::error::{GatewayError, GatewayResult};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use sha2::Sha512;
use std::time::Duration;
use tracing::debug;

type HmacSha512 = Hmac<Sha512>;

/// Thin JSON client for gateway calls. Exactly one attempt per request: a
/// repeated charge or payout is worse than an unknown outcome.
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    timeout: Duration,
    provider: &'static str,
}

impl PaymentHttpClient {
    pub fn new(provider: &'static str, timeout: Duration) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::NetworkError {
                message: format!("failed to initialize HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            timeout,
            provider,
        })
    }

    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        bearer_token: &str,
        body: Option<&JsonValue>,
    ) -> GatewayResult<T> {
        let mut request = self
            .client
            .request(method.clone(), url)
            .timeout(self.timeout)
            .bearer_auth(bearer_token);
        if let Some(payload) = body {
            request = request.json(payload);
        }

        debug!(provider = self.provider, method = %method, url = url, "gateway request");

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::TimeoutError {
                    timeout_secs: self.timeout.as_secs(),
                }
            } else {
                GatewayError::NetworkError {
                    message: format!("gateway request failed: {}", e),
                }
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::NetworkError {
                message: format!("failed to read gateway response: {}", e),
            })?;

        if status.is_success() {
            return serde_json::from_str::<T>(&text).map_err(|e| GatewayError::InvalidResponse {
                message: format!("invalid gateway JSON response: {}", e),
            });
        }

        if status.as_u16() == 429 {
            return Err(GatewayError::RateLimitError {
                message: upstream_message(&text).unwrap_or_else(|| "rate limit exceeded".into()),
                retry_after_seconds: None,
            });
        }

        if status.is_client_error() {
            return Err(GatewayError::ValidationError {
                message: upstream_message(&text).unwrap_or_else(|| format!("HTTP {}", status)),
                field: None,
            });
        }

        Err(GatewayError::ProviderError {
            provider: self.provider.to_string(),
            message: upstream_message(&text).unwrap_or_else(|| format!("HTTP {}: {}", status, text)),
            provider_code: Some(status.as_u16().to_string()),
            retryable: status.is_server_error(),
        })
    }
}

/// Pulls `message` out of an error envelope when the body is JSON.
fn upstream_message(body: &str) -> Option<String> {
    serde_json::from_str::<JsonValue>(body)
        .ok()?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

/// Checks a hex-encoded HMAC-SHA512 signature of `payload` in constant time.
pub fn verify_hmac_sha512_hex(payload: &[u8], secret: &str, signature: &str) -> bool {
    let expected = match hex::decode(signature.trim()) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let mut mac = match HmacSha512::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

pub fn sign_hmac_sha512_hex(payload: &[u8], secret: &str) -> String {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}
