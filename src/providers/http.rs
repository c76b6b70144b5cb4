use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::ProviderError;

/// Default outbound request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 180;

/// Multiplier applied to the timeout of heavy endpoints.
pub const HEAVY_TIMEOUT_FACTOR: u32 = 3;

/// Build a client whose every request carries `timeout`.
pub fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to build HTTP client with timeout, using defaults");
            Client::new()
        })
}

/// Send a request and fail on non-success statuses.
///
/// A timeout surfaces as `ProviderError::Transport` like any other I/O error.
pub async fn send(provider: &'static str, request: RequestBuilder) -> Result<Response, ProviderError> {
    let response = request
        .header("accept", "application/json")
        .send()
        .await
        .map_err(|e| ProviderError::transport(provider, e))?;

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderError::RateLimited { provider });
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Status {
            provider,
            status: status.as_u16(),
            body,
        });
    }

    Ok(response)
}

/// Send a request and decode the JSON body.
pub async fn send_json<T: DeserializeOwned>(
    provider: &'static str,
    request: RequestBuilder,
) -> Result<T, ProviderError> {
    let response = send(provider, request).await?;
    response
        .json::<T>()
        .await
        .map_err(|e| ProviderError::decode(provider, e.to_string()))
}
