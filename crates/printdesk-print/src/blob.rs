// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Content-addressed payload storage.
//
// Each blob is written once under its SHA-256 hex digest and never modified,
// so a job's `PayloadRef` stays valid (and its bytes unchanged) for as long as
// the blob directory exists.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use printdesk_core::error::{PrintdeskError, Result};
use printdesk_core::types::PayloadRef;

/// Compute the SHA-256 hash of `data` and return it as a lowercase hex string.
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Write-once blob directory keyed by content hash.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Use `root` as the blob directory, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        debug!(path = %root.display(), "blob store opened");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store `data` and return its reference.  Storing the same bytes twice
    /// returns the same reference and leaves the first copy untouched.
    #[instrument(skip_all, fields(len = data.len()))]
    pub fn put(&self, data: &[u8]) -> Result<PayloadRef> {
        let digest = hash_bytes(data);
        let path = self.root.join(&digest);

        if !path.exists() {
            // Write beside the target and rename so readers never observe a
            // partially written blob.
            let tmp = self.root.join(format!(".{digest}.tmp"));
            std::fs::write(&tmp, data)?;
            std::fs::rename(&tmp, &path)?;
            info!(payload_ref = %digest, "payload stored");
        }

        Ok(PayloadRef::new(digest))
    }

    /// [`put`](Self::put) on the blocking pool, for async callers.
    pub async fn write(&self, data: Vec<u8>) -> Result<PayloadRef> {
        let blobs = self.clone();
        tokio::task::spawn_blocking(move || blobs.put(&data))
            .await
            .map_err(|e| PrintdeskError::Blob(format!("blob write task failed: {e}")))?
    }

    pub fn contains(&self, payload_ref: &PayloadRef) -> bool {
        self.path_for(payload_ref)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    /// Read a blob's bytes.
    pub async fn read(&self, payload_ref: &PayloadRef) -> Result<Vec<u8>> {
        let path = self.path_for(payload_ref)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| PrintdeskError::Blob(format!("read {payload_ref}: {e}")))
    }

    /// Resolve a reference to its file, refusing anything that is not a
    /// SHA-256 hex digest (and so cannot escape the blob directory).
    fn path_for(&self, payload_ref: &PayloadRef) -> Result<PathBuf> {
        let digest = payload_ref.as_str();
        let well_formed = digest.len() == 64 && digest.bytes().all(|b| b.is_ascii_hexdigit());
        if !well_formed {
            return Err(PrintdeskError::Blob(format!(
                "malformed payload reference '{digest}'"
            )));
        }
        Ok(self.root.join(digest.to_ascii_lowercase()))
    }
}
