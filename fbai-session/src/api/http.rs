//! reqwest-backed client for the auth endpoints

use super::envelope::{self, failure_message};
use super::{AuthApi, LoginOutcome, RefreshedTokens};
use async_trait::async_trait;
use fbai_core::{ApiConfig, Credentials, ErrorContext, FbaiError, FbaiResult, UserProjection};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{RequestBuilder, StatusCode};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

/// HTTP implementation of [`AuthApi`]
pub struct HttpAuthApi {
    client: reqwest::Client,
    config: ApiConfig,
}

fn create_http_client(config: &ApiConfig) -> FbaiResult<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&config.user_agent).map_err(|e| FbaiError::Config {
            message: format!("Invalid user agent: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("http_client").with_operation("create_client"),
        })?,
    );
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_millis(config.request_timeout_ms))
        .build()
        .map_err(|e| FbaiError::Config {
            message: format!("Failed to create HTTP client: {}", e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("http_client").with_operation("create_client"),
        })
}

impl HttpAuthApi {
    pub fn new(config: ApiConfig) -> FbaiResult<Self> {
        let client = create_http_client(&config)?;
        info!(base_url = %config.base_url, "Created auth API client");
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Send the request and return the body of a 2xx response
    async fn send(&self, request: RequestBuilder, operation: &str) -> FbaiResult<String> {
        let response = request.send().await.map_err(|e| self.transport_error(e, operation))?;
        let status = response.status();
        debug!(operation, status = status.as_u16(), "Auth API responded");

        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e, operation))?;

        if status.is_success() {
            return Ok(body);
        }

        let message = failure_message(&body)
            .or_else(|| status.canonical_reason().map(str::to_string))
            .unwrap_or_else(|| "Unknown error".to_string());
        let context = ErrorContext::new("auth_api")
            .with_operation(operation)
            .with_metadata("status", &status.as_u16().to_string());

        if status == StatusCode::UNAUTHORIZED {
            Err(FbaiError::Unauthorized {
                message,
                context: context.with_suggestion("Log in again"),
            })
        } else {
            Err(FbaiError::Http {
                status: status.as_u16(),
                message,
                context,
            })
        }
    }

    fn transport_error(&self, error: reqwest::Error, operation: &str) -> FbaiError {
        if error.is_timeout() {
            FbaiError::Timeout {
                operation: operation.to_string(),
                duration_ms: self.config.request_timeout_ms,
                context: ErrorContext::new("auth_api").with_operation(operation),
            }
        } else {
            FbaiError::Network {
                message: format!("Request to {} failed: {}", self.config.base_url, error),
                source: Some(Box::new(error)),
                context: ErrorContext::new("auth_api")
                    .with_operation(operation)
                    .with_suggestion("Check network connectivity and the API base URL"),
            }
        }
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, credentials: &Credentials) -> FbaiResult<LoginOutcome> {
        let request = self
            .client
            .post(self.config.endpoint(&self.config.login_path))
            .json(credentials);
        let body = self.send(request, "login").await?;
        envelope::parse_login(&body).map_err(envelope::login_rejected)
    }

    async fn fetch_profile(&self, access_token: &str) -> FbaiResult<UserProjection> {
        let request = self
            .client
            .get(self.config.endpoint(&self.config.profile_path))
            .bearer_auth(access_token);
        let body = self.send(request, "fetch_profile").await?;
        envelope::parse_profile(&body)
    }

    async fn refresh(&self, refresh_token: &str) -> FbaiResult<RefreshedTokens> {
        let request = self
            .client
            .post(self.config.endpoint(&self.config.refresh_path))
            .json(&json!({ "refreshToken": refresh_token }));
        let body = self.send(request, "refresh").await?;
        envelope::parse_refresh(&body)
    }

    async fn logout(&self, access_token: &str) -> FbaiResult<()> {
        let request = self
            .client
            .post(self.config.endpoint(&self.config.logout_path))
            .bearer_auth(access_token);
        self.send(request, "logout").await.map(|_| ())
    }
}
