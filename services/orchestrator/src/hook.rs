//! Pre-start hook client.
//!
//! A template may declare a URL that is called once before its container is
//! created. The hook answers with extra environment variables, typically
//! short-lived credentials the server needs at boot:
//!
//! ```json
//! { "env": { "AUTH_TOKEN": "..." } }
//! ```
//!
//! A missing `env` field or an unparseable body means "nothing to add".

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

/// Hook call errors.
#[derive(Debug, Error)]
pub enum HookError {
    /// The HTTP client could not be constructed.
    #[error("failed to build hook client: {0}")]
    Client(#[source] reqwest::Error),

    /// The request failed before a response arrived (connect, timeout, ...).
    #[error("hook request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The hook answered with a non-success status.
    #[error("hook {url} returned {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
}

#[derive(Debug, Default, Deserialize)]
struct HookResponse {
    #[serde(default)]
    env: BTreeMap<String, String>,
}

/// HTTP client for pre-start hooks.
#[derive(Debug, Clone)]
pub struct HookClient {
    client: reqwest::Client,
}

impl HookClient {
    /// Create a hook client whose calls give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, HookError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(HookError::Client)?;

        Ok(Self { client })
    }

    /// Call a pre-start hook and return the environment it supplies.
    pub async fn pre_start(&self, url: &str) -> Result<BTreeMap<String, String>, HookError> {
        info!(url, "Calling pre-start hook");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| HookError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HookError::Status {
                url: url.to_string(),
                status,
            });
        }

        let body = response.bytes().await.map_err(|source| HookError::Request {
            url: url.to_string(),
            source,
        })?;

        let env = match serde_json::from_slice::<HookResponse>(&body) {
            Ok(parsed) => parsed.env,
            Err(e) => {
                debug!(url, error = %e, "Hook body is not a JSON env object, ignoring");
                BTreeMap::new()
            }
        };

        // Values may be secrets; log keys only.
        debug!(url, keys = ?env.keys().collect::<Vec<_>>(), "Pre-start hook returned env");
        Ok(env)
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn client() -> HookClient {
        HookClient::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_hook_returns_env() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hook"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "env": { "AUTH_TOKEN": "t0k3n", "REGION": "eu" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let env = client()
            .pre_start(&format!("{}/hook", server.uri()))
            .await
            .unwrap();

        assert_eq!(env.get("AUTH_TOKEN").map(String::as_str), Some("t0k3n"));
        assert_eq!(env.get("REGION").map(String::as_str), Some("eu"));
    }

    #[tokio::test]
    async fn test_hook_malformed_body_is_empty_env() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let env = client().pre_start(&server.uri()).await.unwrap();
        assert!(env.is_empty());
    }

    #[tokio::test]
    async fn test_hook_missing_env_field_is_empty_env() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ready"
            })))
            .mount(&server)
            .await;

        let env = client().pre_start(&server.uri()).await.unwrap();
        assert!(env.is_empty());
    }

    #[tokio::test]
    async fn test_hook_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = client().pre_start(&server.uri()).await.unwrap_err();
        assert!(matches!(
            err,
            HookError::Status { status, .. } if status == reqwest::StatusCode::BAD_GATEWAY
        ));
    }

    #[tokio::test]
    async fn test_hook_unreachable() {
        // Nothing listens on the discard port.
        let err = client().pre_start("http://127.0.0.1:9/hook").await.unwrap_err();
        assert!(matches!(err, HookError::Request { .. }));
    }

    #[tokio::test]
    async fn test_hook_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let client = HookClient::new(Duration::from_millis(100)).unwrap();
        let err = client.pre_start(&server.uri()).await.unwrap_err();
        assert!(matches!(err, HookError::Request { .. }));
    }
}
