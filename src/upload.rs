//! Staged file transfer
//!
//! Moves file bytes to a pre-authorized destination: reserve a
//! time-limited target, PUT the bytes directly to it (the target URL is
//! already authorized, so no bearer token is attached), then confirm the
//! transfer with the observed size and SHA-256 checksum.

use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::api::ApiClient;
use crate::error::VigilError;

/// What was transferred, for the confirmation call and the trigger.
#[derive(Debug, Clone)]
pub struct UploadReport {
    pub upload_id: String,
    pub size_bytes: u64,
    pub checksum: String,
}

/// Upload one file through the staged flow and confirm it.
pub async fn upload_file(api: &ApiClient, path: &Path) -> Result<UploadReport, VigilError> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| VigilError::Upload(format!("not a usable file path: {}", path.display())))?;

    let bytes = tokio::fs::read(path).await?;
    let size_bytes = bytes.len() as u64;
    let checksum = hex::encode(Sha256::digest(&bytes));

    let target = api.create_upload_target(filename, size_bytes).await?;
    if let Some(expires_at) = target.expires_at {
        if expires_at <= chrono::Utc::now() {
            warn!(upload_id = %target.upload_id, "upload target is already expired; attempting anyway");
        }
    }

    // The destination is pre-authorized; the bearer token must not leak to it.
    let response = reqwest::Client::new()
        .put(&target.url)
        .body(bytes)
        .send()
        .await?;
    if !response.status().is_success() {
        return Err(VigilError::Upload(format!(
            "destination rejected the bytes: {}",
            response.status()
        )));
    }

    api.confirm_upload(&target.upload_id, size_bytes, &checksum).await?;

    info!(
        upload_id = %target.upload_id,
        size = size_bytes,
        "file uploaded and confirmed"
    );

    Ok(UploadReport {
        upload_id: target.upload_id,
        size_bytes,
        checksum,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_hex_sha256() {
        let checksum = hex::encode(Sha256::digest(b"hello world"));
        assert_eq!(
            checksum,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
