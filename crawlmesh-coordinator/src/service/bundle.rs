//! Bundle Store
//!
//! Persists uploaded bundles under the container directory: one archive per
//! client (`<client_id>.zip`) and the unpacked bundle next to it
//! (`<client_id>/`). Uploads land in `.incoming/` until they are checked;
//! client ids never start with a dot, so it cannot clash with a client.

use axum::body::Bytes;
use crawlmesh_core::{BundleError, BundleManifest, unpack_archive};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::AsyncWriteExt;

const INCOMING_DIR: &str = ".incoming";

/// Service error type
#[derive(Debug)]
pub enum BundleStoreError {
    InvalidClientId(String),
    ClientMismatch { expected: String, found: String },
    Upload(String),
    Io(std::io::Error),
    Bundle(BundleError),
}

impl std::fmt::Display for BundleStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BundleStoreError::InvalidClientId(id) => write!(f, "invalid client id '{}'", id),
            BundleStoreError::ClientMismatch { expected, found } => write!(
                f,
                "manifest belongs to client '{}', pushed as '{}'",
                found, expected
            ),
            BundleStoreError::Upload(msg) => write!(f, "upload interrupted: {}", msg),
            BundleStoreError::Io(err) => write!(f, "I/O error: {}", err),
            BundleStoreError::Bundle(err) => write!(f, "{}", err),
        }
    }
}

impl From<std::io::Error> for BundleStoreError {
    fn from(err: std::io::Error) -> Self {
        BundleStoreError::Io(err)
    }
}

impl From<BundleError> for BundleStoreError {
    fn from(err: BundleError) -> Self {
        BundleStoreError::Bundle(err)
    }
}

/// On-disk bundle storage with per-client push serialization
pub struct BundleStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl BundleStore {
    /// Opens the store, creating the container directory if needed
    pub fn open(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn archive_path(&self, client_id: &str) -> PathBuf {
        self.root.join(format!("{}.zip", client_id))
    }

    pub fn bundle_dir(&self, client_id: &str) -> PathBuf {
        self.root.join(client_id)
    }

    /// Lock serializing pushes and teardown of one client
    pub fn client_lock(&self, client_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(client_id.to_string())
            .or_default()
            .clone()
    }

    /// Persist an uploaded archive, unpack it and read its manifest
    ///
    /// The upload is received and unpacked under the incoming directory and
    /// only moved over the live archive and bundle once its manifest checks
    /// out. A rejected upload leaves the current bundle of `client_id`
    /// untouched.
    ///
    /// Callers must hold [`BundleStore::client_lock`] for `client_id`.
    pub async fn store<S, E>(&self, client_id: &str, body: S) -> Result<BundleManifest, BundleStoreError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        validate_client_id(client_id)?;

        let incoming = self.root.join(INCOMING_DIR);
        tokio::fs::create_dir_all(&incoming).await?;
        let partial = incoming.join(format!("{}.zip", client_id));
        let unpacked = incoming.join(format!("{}.unpacked", client_id));

        let stored = match self.receive(client_id, body, &partial, &unpacked).await {
            Ok(manifest) => self
                .publish(client_id, &partial, &unpacked)
                .await
                .map(|()| manifest),
            Err(e) => Err(e),
        };

        if stored.is_err() {
            let _ = tokio::fs::remove_file(&partial).await;
            let _ = tokio::fs::remove_dir_all(&unpacked).await;
        }
        stored
    }

    /// Write the upload to `partial`, unpack it into `unpacked` and check its manifest
    async fn receive<S, E>(
        &self,
        client_id: &str,
        body: S,
        partial: &Path,
        unpacked: &Path,
    ) -> Result<BundleManifest, BundleStoreError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: std::fmt::Display,
    {
        let written = write_stream(partial, body).await?;
        tracing::debug!("Received {} bytes for client {}", written, client_id);

        let archive = partial.to_path_buf();
        let bundle_dir = unpacked.to_path_buf();
        let manifest = tokio::task::spawn_blocking(move || {
            unpack_archive(&archive, &bundle_dir)?;
            BundleManifest::load(&bundle_dir)
        })
        .await
        .map_err(|e| BundleStoreError::Upload(format!("unpack task failed: {}", e)))??;

        if manifest.client_id != client_id {
            return Err(BundleStoreError::ClientMismatch {
                expected: client_id.to_string(),
                found: manifest.client_id,
            });
        }

        Ok(manifest)
    }

    /// Move a checked upload over the live bundle of `client_id`
    ///
    /// The archive is replaced last.
    async fn publish(&self, client_id: &str, partial: &Path, unpacked: &Path) -> Result<(), BundleStoreError> {
        let bundle_dir = self.bundle_dir(client_id);
        match tokio::fs::remove_dir_all(&bundle_dir).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        tokio::fs::rename(unpacked, &bundle_dir).await?;
        tokio::fs::rename(partial, self.archive_path(client_id)).await?;
        Ok(())
    }

    /// Delete the archive and unpacked bundle of a client
    pub async fn remove(&self, client_id: &str) -> Result<(), BundleStoreError> {
        validate_client_id(client_id)?;

        match tokio::fs::remove_file(self.archive_path(client_id)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        match tokio::fs::remove_dir_all(self.bundle_dir(client_id)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }

        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(client_id);

        Ok(())
    }
}

async fn write_stream<S, E>(path: &Path, mut body: S) -> Result<u64, BundleStoreError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| BundleStoreError::Upload(e.to_string()))?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    Ok(written)
}

/// Client ids name files, so they are restricted to a safe alphabet
pub fn validate_client_id(client_id: &str) -> Result<(), BundleStoreError> {
    let valid = !client_id.is_empty()
        && client_id.len() <= 128
        && !client_id.starts_with('.')
        && !client_id.ends_with(".zip")
        && client_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(BundleStoreError::InvalidClientId(client_id.to_string()))
    }
}
