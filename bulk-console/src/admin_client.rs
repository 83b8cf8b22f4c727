use std::time::Duration;

use bulk::{BatchError, BatchRequest, OperationKind, PageFetcher, PageResult};
use tracing::{debug, warn};
use url::Url;

use crate::logging::category_batch;

const MIN_REQUEST_TIMEOUT_MS: u64 = 100;
const MAX_REQUEST_TIMEOUT_MS: u64 = 600_000;

#[derive(Clone, Debug)]
pub struct AdminClientConfig {
    pub admin_url: String,
    pub auth_token: Option<String>,
    pub request_timeout_ms: u64,
}

/// Admin API client that applies one batch page per call.
#[derive(Clone)]
pub struct AdminClient {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
    request_timeout: Duration,
}

impl AdminClient {
    pub fn new(config: AdminClientConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.admin_url.trim_end_matches('/').to_string(),
            auth_token: config
                .auth_token
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty()),
            request_timeout: Duration::from_millis(
                config
                    .request_timeout_ms
                    .clamp(MIN_REQUEST_TIMEOUT_MS, MAX_REQUEST_TIMEOUT_MS),
            ),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn endpoint_url(&self, operation: OperationKind) -> String {
        format!("{}/query/invocations/{}", self.base_url, operation.endpoint())
    }
}

impl PageFetcher for AdminClient {
    async fn fetch_page(
        &self,
        operation: OperationKind,
        request: &BatchRequest,
        page_size: u32,
    ) -> Result<Option<PageResult>, BatchError> {
        let url = self.endpoint_url(operation);
        let mut outbound = self
            .client
            .post(&url)
            .timeout(self.request_timeout)
            .json(&request.to_page_body(page_size));
        if let Some(token) = &self.auth_token {
            outbound = outbound.bearer_auth(token);
        }

        let response = outbound
            .send()
            .await
            .map_err(|err| BatchError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                "{} admin api rejected {} page status={}",
                category_batch(),
                operation,
                status
            );
            return Err(BatchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|err| BatchError::Transport(err.to_string()))?;
        debug!(
            "{} {} page answered {} bytes",
            category_batch(),
            operation,
            body.len()
        );
        Ok(decode_page_body(&body))
    }
}

/// Decodes a 2xx page body. Empty, `null` and undecodable bodies all yield `None`.
pub fn decode_page_body(body: &[u8]) -> Option<PageResult> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    match serde_json::from_slice::<Option<PageResult>>(body) {
        Ok(page) => page,
        Err(err) => {
            warn!(
                "{} ignoring undecodable batch page body: {err}",
                category_batch()
            );
            None
        }
    }
}

/// Validates an admin API base URL and strips trailing slashes.
pub fn normalize_admin_url(raw: &str) -> Result<String, String> {
    let trimmed = raw.trim();
    let parsed = Url::parse(trimmed).map_err(|err| format!("invalid admin url {trimmed}: {err}"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(format!(
            "admin url must use http or https, got: {}",
            parsed.scheme()
        ));
    }
    if parsed.host_str().is_none() {
        return Err(format!("admin url has no host: {trimmed}"));
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}
