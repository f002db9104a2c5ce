//! HTTP ledger gateway client
//!
//! `POST {base}/settlements` with the request as JSON and the idempotency key
//! in the `Idempotency-Key` header. Connect failures, timeouts, 429 and 5xx
//! are transient; any other non-success status is a rejection.

use crate::error::LedgerError;
use crate::ledger::{SettlementLedger, SettlementRequest};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Deserialize)]
struct SettlementResponse {
    reference: String,
}

pub struct HttpSettlementLedger {
    client: Client,
    endpoint: Url,
}

/// Map a non-success status to a ledger error
pub fn classify_status(status: StatusCode, body: &str) -> LedgerError {
    let detail = format!("{status} {body}");
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::REQUEST_TIMEOUT {
        LedgerError::Transient(detail)
    } else {
        LedgerError::Rejected(detail)
    }
}

impl HttpSettlementLedger {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LedgerError> {
        let mut base = Url::parse(base_url)
            .map_err(|e| LedgerError::Rejected(format!("invalid ledger url {base_url}: {e}")))?;
        // join replaces the last segment unless the base ends in '/'
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base
            .join("settlements")
            .map_err(|e| LedgerError::Rejected(format!("invalid ledger url {base_url}: {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Rejected(format!("http client: {e}")))?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl SettlementLedger for HttpSettlementLedger {
    fn name(&self) -> &str {
        "http"
    }

    async fn submit(&self, request: &SettlementRequest) -> Result<String, LedgerError> {
        debug!(
            endpoint = %self.endpoint,
            key = %request.idempotency_key,
            transfers = request.transfers.len(),
            "submitting settlement"
        );
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(IDEMPOTENCY_HEADER, &request.idempotency_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() || e.is_request() {
                    LedgerError::Transient(e.to_string())
                } else {
                    LedgerError::Rejected(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = classify_status(status, &body);
            warn!(key = %request.idempotency_key, error = %error, "ledger refused settlement");
            return Err(error);
        }

        // the body is lost on a broken read; resubmitting under the same key is safe
        let parsed: SettlementResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::Transient(format!("unreadable ledger response: {e}")))?;
        Ok(parsed.reference)
    }
}
