//! Platform API calls
//!
//! The request/response side of the workflow: a GraphQL endpoint over
//! HTTP. The trigger mutation starts a run and returns the run id the
//! event correlator matches against; the staged-upload mutations reserve
//! a destination for file bytes and confirm the transfer afterwards.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::VigilError;

const TRIGGER_RUN: &str =
    "mutation TriggerRun($key: String!, $variables: JSON) { triggerRun(key: $key, variables: $variables) { runId } }";

const UPLOAD_TARGET_CREATE: &str =
    "mutation UploadTargetCreate($filename: String!, $sizeBytes: Int!) { uploadTargetCreate(filename: $filename, sizeBytes: $sizeBytes) { url uploadId expiresAt } }";

const UPLOAD_COMPLETE: &str =
    "mutation UploadComplete($uploadId: ID!, $sizeBytes: Int!, $checksum: String!) { uploadComplete(uploadId: $uploadId, sizeBytes: $sizeBytes, checksum: $checksum) { accepted } }";

/// Receipt from a successful trigger call.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReceipt {
    pub run_id: String,
}

/// Time-limited destination for a staged upload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTarget {
    pub url: String,
    pub upload_id: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GraphQLResponse {
    data: Option<Value>,
    errors: Option<Vec<GraphQLError>>,
}

#[derive(Debug, Deserialize)]
struct GraphQLError {
    message: String,
}

/// GraphQL-over-HTTP client carrying the bearer token.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
}

impl ApiClient {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            token: token.into(),
        }
    }

    /// Trigger a run of the named operation. The returned run id is the
    /// correlation token for the streaming side.
    pub async fn trigger_run(&self, key: &str, variables: Value) -> Result<RunReceipt, VigilError> {
        let data = self
            .graphql(TRIGGER_RUN, json!({"key": key, "variables": variables}))
            .await?;
        let receipt: RunReceipt = serde_json::from_value(
            data.get("triggerRun")
                .cloned()
                .ok_or_else(|| VigilError::Api("triggerRun missing from response".into()))?,
        )?;
        debug!(run_id = %receipt.run_id, key = %key, "run triggered");
        Ok(receipt)
    }

    /// Reserve a staged-upload destination for a file of the given size.
    pub async fn create_upload_target(&self, filename: &str, size_bytes: u64) -> Result<UploadTarget, VigilError> {
        let data = self
            .graphql(
                UPLOAD_TARGET_CREATE,
                json!({"filename": filename, "sizeBytes": size_bytes}),
            )
            .await?;
        let target: UploadTarget = serde_json::from_value(
            data.get("uploadTargetCreate")
                .cloned()
                .ok_or_else(|| VigilError::Api("uploadTargetCreate missing from response".into()))?,
        )?;
        debug!(upload_id = %target.upload_id, "upload target reserved");
        Ok(target)
    }

    /// Confirm a finished upload with its observed size and checksum.
    pub async fn confirm_upload(&self, upload_id: &str, size_bytes: u64, checksum: &str) -> Result<(), VigilError> {
        let data = self
            .graphql(
                UPLOAD_COMPLETE,
                json!({"uploadId": upload_id, "sizeBytes": size_bytes, "checksum": checksum}),
            )
            .await?;
        let accepted = data
            .get("uploadComplete")
            .and_then(|v| v.get("accepted"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !accepted {
            return Err(VigilError::Upload(format!(
                "server did not accept upload {upload_id}"
            )));
        }
        Ok(())
    }

    /// POST one GraphQL document and return the `data` object. GraphQL
    /// errors come back as a single API error with the messages joined.
    async fn graphql(&self, query: &str, variables: Value) -> Result<Value, VigilError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&json!({"query": query, "variables": variables}))
            .send()
            .await?
            .error_for_status()?;

        let body: GraphQLResponse = response.json().await?;
        if let Some(errors) = body.errors {
            if !errors.is_empty() {
                let joined = errors
                    .into_iter()
                    .map(|e| e.message)
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(VigilError::Api(joined));
            }
        }
        body.data
            .ok_or_else(|| VigilError::Api("response carried neither data nor errors".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_receipt_parses() {
        let receipt: RunReceipt = serde_json::from_value(json!({"runId": "R-42"})).unwrap();
        assert_eq!(receipt.run_id, "R-42");
    }

    #[test]
    fn test_upload_target_parses_with_expiry() {
        let target: UploadTarget = serde_json::from_value(json!({
            "url": "https://blobs.example/put/abc",
            "uploadId": "U-7",
            "expiresAt": "2026-08-07T12:00:00Z"
        }))
        .unwrap();
        assert_eq!(target.upload_id, "U-7");
        assert!(target.expires_at.is_some());
    }

    #[test]
    fn test_upload_target_expiry_is_optional() {
        let target: UploadTarget = serde_json::from_value(json!({
            "url": "https://blobs.example/put/abc",
            "uploadId": "U-8"
        }))
        .unwrap();
        assert!(target.expires_at.is_none());
    }
}
