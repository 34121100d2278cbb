//! HTTP ledger client.
//!
//! Wire contract:
//! - `POST {base}/entries` → `201`/`200` with optional `{"sequence": n}`;
//!   `409` is a duplicate immutable hash; `400`/`422` a rejected entry.
//! - `GET {base}/entries?limit=&offset=` → JSON array in insertion order.
//! - `GET {base}/entries/{immutable_hash}` → entry, or `404`.
//!
//! Writes are never retried: a conflict is final and a transport failure is
//! surfaced to the caller.

use async_trait::async_trait;
use chrono::Utc;
use modelprov_core::{LedgerEntry, ProvenanceError, Result};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use super::{Ledger, WriteResult, conflict, validate_for_write};

#[derive(Debug, Clone)]
pub struct RemoteLedger {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WriteAck {
    sequence: Option<u64>,
}

impl RemoteLedger {
    pub fn new(endpoint: &str, api_token: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = endpoint.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ProvenanceError::configuration(format!(
                "ledger endpoint must be an http(s) URL: {endpoint}"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("modelprov/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(http_error)?;
        Ok(Self {
            client,
            base_url,
            api_token,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Map a non-success status to the matching error.
    fn map_http_error(status: StatusCode, body_text: &str, entry: &LedgerEntry) -> ProvenanceError {
        match status.as_u16() {
            409 => conflict(entry),
            400 | 422 => ProvenanceError::validation(format!(
                "ledger rejected entry: {}",
                server_message(body_text)
            )),
            _ => ProvenanceError::ledger(format!(
                "HTTP {status} from ledger: {}",
                server_message(body_text)
            )),
        }
    }
}

/// Pull `error`/`message` out of a JSON error body, else the raw text.
fn server_message(body_text: &str) -> String {
    serde_json::from_str::<Value>(body_text)
        .ok()
        .and_then(|v| {
            v.get("error")
                .or_else(|| v.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body_text.trim().to_string())
}

fn http_error(e: reqwest::Error) -> ProvenanceError {
    ProvenanceError::ledger(format!("ledger request failed: {e}"))
}

#[async_trait]
impl Ledger for RemoteLedger {
    fn backend(&self) -> &'static str {
        "remote"
    }

    async fn write(&self, entry: &LedgerEntry) -> Result<WriteResult> {
        validate_for_write(entry)?;
        let url = format!("{}/entries", self.base_url);
        debug!(url = %url, hash = %entry.immutable_hash, "Posting ledger entry");

        let response = self
            .authorized(self.client.post(&url))
            .json(entry)
            .send()
            .await
            .map_err(http_error)?;
        let status = response.status();
        let body_text = response.text().await.map_err(http_error)?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &body_text, entry));
        }

        let sequence = serde_json::from_str::<WriteAck>(&body_text)
            .ok()
            .and_then(|ack| ack.sequence);
        info!(hash = %entry.immutable_hash, ?sequence, "Ledger entry written (remote)");
        Ok(WriteResult {
            immutable_hash: entry.immutable_hash.clone(),
            sequence,
            written_at: Utc::now(),
        })
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<LedgerEntry>> {
        let url = format!("{}/entries", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .query(&[("limit", limit), ("offset", offset)])
            .send()
            .await
            .map_err(http_error)?;
        let status = response.status();
        let body_text = response.text().await.map_err(http_error)?;
        if !status.is_success() {
            return Err(ProvenanceError::ledger(format!(
                "HTTP {status} listing ledger entries: {}",
                server_message(&body_text)
            )));
        }
        serde_json::from_str(&body_text)
            .map_err(|e| ProvenanceError::ledger(format!("invalid ledger listing: {e}")))
    }

    async fn get(&self, immutable_hash: &str) -> Result<Option<LedgerEntry>> {
        let url = format!("{}/entries/{immutable_hash}", self.base_url);
        let response = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(http_error)?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body_text = response.text().await.map_err(http_error)?;
        if !status.is_success() {
            return Err(ProvenanceError::ledger(format!(
                "HTTP {status} fetching ledger entry: {}",
                server_message(&body_text)
            )));
        }
        serde_json::from_str(&body_text)
            .map(Some)
            .map_err(|e| ProvenanceError::ledger(format!("invalid ledger entry: {e}")))
    }
}
