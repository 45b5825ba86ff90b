use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tracing::debug;

use control_plane::metrics::{Metrics, RestoreOutcome};

const SLOT_TIMEOUT: Duration = Duration::from_secs(60);

/// Snapshot filename for a prefix: sentinel stripped, `.bin` appended.
/// `@code` -> `code.bin`.
pub fn cache_filename(prefix: &str) -> String {
    format!("{}.bin", prefix.strip_prefix('@').unwrap_or(prefix))
}

#[derive(Debug, Error)]
pub enum KvCacheError {
    /// 404 on restore: the snapshot was never saved. Expected on the
    /// first ever touch of a template; callers treat it as benign.
    #[error("cache file not found")]
    NotFound,
    #[error("request failed: {0}")]
    Request(String),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Thin client for the backend's per-slot save/restore API. One POST per
/// operation, no retries; retry policy belongs to the caller.
pub struct KvCacheClient {
    base_url: String,
    client: reqwest::Client,
    metrics: Arc<Metrics>,
}

impl KvCacheClient {
    pub fn new(base_url: &str, metrics: Arc<Metrics>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(SLOT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            metrics,
        }
    }

    /// Restores the slot snapshot stored under `filename`.
    pub async fn restore(&self, prefix: &str, filename: &str) -> Result<(), KvCacheError> {
        let result = match self.post_slot("restore", filename).await {
            Ok((status, _)) if (200..300).contains(&status) => Ok(()),
            Ok((404, _)) => Err(KvCacheError::NotFound),
            Ok((status, body)) => Err(KvCacheError::Status { status, body }),
            Err(err) => Err(err),
        };
        let outcome = match &result {
            Ok(()) => RestoreOutcome::Success,
            Err(KvCacheError::NotFound) => RestoreOutcome::NotFound,
            Err(_) => RestoreOutcome::Error,
        };
        self.metrics.record_kv_cache_restore(prefix, outcome);
        if result.is_ok() {
            debug!(filename, "kv cache restored");
        }
        result
    }

    /// Saves the current slot snapshot under `filename`.
    pub async fn save(&self, prefix: &str, filename: &str) -> Result<(), KvCacheError> {
        match self.post_slot("save", filename).await {
            Ok((status, _)) if (200..300).contains(&status) => {
                self.metrics.record_kv_cache_save(prefix);
                debug!(filename, "kv cache saved");
                Ok(())
            }
            Ok((status, body)) => Err(KvCacheError::Status { status, body }),
            Err(err) => Err(err),
        }
    }

    async fn post_slot(&self, action: &str, filename: &str) -> Result<(u16, String), KvCacheError> {
        let url = format!("{}/slots/0?action={action}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "filename": filename }))
            .send()
            .await
            .map_err(|err| KvCacheError::Request(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok((status, body))
    }
}
