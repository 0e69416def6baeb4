use axum::{
    extract::rejection::JsonRejection,
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::provider::ProviderError;
use crate::provision::ProvisionError;

/// Seconds a client should wait before retrying after pool exhaustion.
const POOL_RETRY_AFTER_SECONDS: u32 = 5;

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub code: String,
    pub retryable: bool,
    pub retry_after_seconds: u32,
}

impl ProblemDetails {
    fn new(status: StatusCode, code: impl Into<String>, detail: impl Into<String>) -> Self {
        let code = code.into();
        let title = status
            .canonical_reason()
            .unwrap_or("Unknown Error")
            .to_string();
        Self {
            r#type: format!("https://arena.dev/problems/{code}"),
            title,
            status: status.as_u16(),
            detail: detail.into(),
            code,
            retryable: false,
            retry_after_seconds: 0,
        }
    }

    fn set_retry_after_seconds(&mut self, seconds: u32) {
        self.retry_after_seconds = seconds;
        if seconds > 0 {
            self.retryable = true;
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub problem: Box<ProblemDetails>,
}

impl ApiError {
    fn with_status(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        let problem = Box::new(ProblemDetails::new(status, code, message));
        Self { status, problem }
    }

    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::NOT_FOUND, code, message)
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_status(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }

    pub fn service_unavailable(code: impl Into<String>, message: impl Into<String>) -> Self {
        let mut err = Self::with_status(StatusCode::SERVICE_UNAVAILABLE, code, message);
        err.problem.retryable = true;
        err
    }

    pub fn with_retry_after_seconds(mut self, seconds: u32) -> Self {
        self.problem.set_retry_after_seconds(seconds);
        self
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(id) => {
                ApiError::not_found("server_not_found", format!("server {id} not found"))
            }
            ProviderError::Transient(_) => {
                let mut api = ApiError::internal("provider_unavailable", err.to_string());
                api.problem.retryable = true;
                api
            }
            ProviderError::Permanent(_) => ApiError::internal("provider_error", err.to_string()),
        }
    }
}

impl From<ProvisionError> for ApiError {
    fn from(err: ProvisionError) -> Self {
        match err {
            ProvisionError::TemplateNotFound(name) => {
                ApiError::not_found("template_not_found", format!("template {name} not found"))
            }
            ProvisionError::ResourcePoolExhausted(e) => {
                ApiError::service_unavailable("resource_pool_exhausted", e.to_string())
                    .with_retry_after_seconds(POOL_RETRY_AFTER_SECONDS)
            }
            ProvisionError::HookFailed(e) => ApiError::internal("hook_failed", e.to_string()),
            ProvisionError::Provider(e) => e.into(),
            err @ (ProvisionError::Pool(_) | ProvisionError::InvalidServerId(_)) => {
                error!(error = %err, "Provisioning misconfiguration");
                ApiError::internal("internal_error", err.to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request("invalid_request", rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.problem)).into_response();
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use arena_networking::PoolError;
    use rstest::rstest;

    use super::*;
    use crate::hook::HookError;

    fn exhausted() -> PoolError {
        PoolError::Exhausted {
            kind: "port",
            start: "5521".to_string(),
            end: "5599".to_string(),
        }
    }

    #[rstest]
    #[case(ProvisionError::TemplateNotFound("lobby".into()), StatusCode::NOT_FOUND, "template_not_found")]
    #[case(ProvisionError::ResourcePoolExhausted(exhausted()), StatusCode::SERVICE_UNAVAILABLE, "resource_pool_exhausted")]
    #[case(
        ProvisionError::HookFailed(HookError::Status {
            url: "http://hook".into(),
            status: reqwest::StatusCode::BAD_GATEWAY,
        }),
        StatusCode::INTERNAL_SERVER_ERROR,
        "hook_failed"
    )]
    #[case(ProvisionError::Provider(ProviderError::NotFound("abc".into())), StatusCode::NOT_FOUND, "server_not_found")]
    #[case(ProvisionError::Provider(ProviderError::Permanent("bad image".into())), StatusCode::INTERNAL_SERVER_ERROR, "provider_error")]
    fn test_provision_error_mapping(
        #[case] err: ProvisionError,
        #[case] status: StatusCode,
        #[case] code: &str,
    ) {
        let api: ApiError = err.into();
        assert_eq!(api.status, status);
        assert_eq!(api.problem.code, code);
    }

    #[test]
    fn test_pool_exhaustion_is_retryable() {
        let api: ApiError = ProvisionError::ResourcePoolExhausted(exhausted()).into();
        assert!(api.problem.retryable);
        assert_eq!(api.problem.retry_after_seconds, POOL_RETRY_AFTER_SECONDS);
    }

    #[tokio::test]
    async fn test_problem_json_content_type() {
        let response = ApiError::not_found("server_not_found", "nope").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/problem+json"
        );
    }
}
