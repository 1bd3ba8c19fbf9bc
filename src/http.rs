//! JSON-over-HTTP calls with retry and exponential backoff.
//!
//! Shared by the remote embedding and generation providers:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

/// A single JSON POST endpoint with its retry policy.
pub(crate) struct JsonEndpoint<'a> {
    pub label: &'a str,
    pub url: String,
    pub bearer: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl JsonEndpoint<'_> {
    /// POST `body` and return the decoded JSON response. Errors are rendered
    /// as strings so each caller can wrap them in its own error variant.
    pub async fn post(&self, body: &serde_json::Value) -> Result<serde_json::Value, String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| e.to_string())?;

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::debug!(endpoint = self.label, attempt, ?delay, "retrying request");
                tokio::time::sleep(delay).await;
            }

            let mut request = client
                .post(&self.url)
                .header("Content-Type", "application/json")
                .json(body);
            if let Some(token) = &self.bearer {
                request = request.header("Authorization", format!("Bearer {}", token));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response
                            .json::<serde_json::Value>()
                            .await
                            .map_err(|e| format!("invalid JSON response: {}", e));
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(format!("{} API error {}: {}", self.label, status, body_text));
                        continue;
                    }

                    return Err(format!("{} API error {}: {}", self.label, status, body_text));
                }
                Err(e) => {
                    last_err = Some(format!(
                        "{} connection error ({}): {}",
                        self.label, self.url, e
                    ));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| format!("{} request failed after retries", self.label)))
    }
}
