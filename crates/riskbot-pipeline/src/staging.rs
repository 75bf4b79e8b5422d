//! Temp file store: exclusive, request-scoped staging of uploaded files.
//!
//! Each request owns one directory under the root, `{request_id}/`, holding
//! a single file named `{request_id}.{ext}`. Creating that directory is the
//! exclusive claim on the request id, whatever the extension. Nothing from
//! the sender's filename except a sanitised extension ever reaches the
//! filesystem.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use riskbot_core::{defaults, file_extension, Error, Result};

/// Configuration for the temp file store.
#[derive(Debug, Clone)]
pub struct StagingConfig {
    /// Directory holding staged files. Created on demand.
    pub root: PathBuf,
    /// Uploads larger than this are refused.
    pub max_upload_bytes: usize,
    /// Files older than this are treated as crash leftovers by the sweep.
    pub orphan_grace: Duration,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(defaults::TEMP_FILE_PATH),
            max_upload_bytes: defaults::MAX_UPLOAD_BYTES,
            orphan_grace: Duration::from_secs(defaults::ORPHAN_GRACE_SECS),
        }
    }
}

impl StagingConfig {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }
}

/// Filesystem-backed store for files awaiting extraction.
#[derive(Debug, Clone)]
pub struct TempFileStore {
    config: StagingConfig,
}

impl TempFileStore {
    pub fn new(config: StagingConfig) -> Self {
        Self { config }
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn config(&self) -> &StagingConfig {
        &self.config
    }

    /// Directory owned by one request while its file is staged.
    pub fn request_dir(&self, request_id: Uuid) -> PathBuf {
        self.config.root.join(request_id.to_string())
    }

    /// Path a request's file is staged at.
    pub fn path_for(&self, request_id: Uuid, extension: Option<&str>) -> PathBuf {
        let dir = self.request_dir(request_id);
        match extension {
            Some(ext) => dir.join(format!("{}.{}", request_id, ext)),
            None => dir.join(request_id.to_string()),
        }
    }

    /// Create the root and verify it can write, read and delete files.
    ///
    /// Run once at startup so permission or mount problems surface before
    /// the first upload.
    pub async fn ensure_ready(&self) -> Result<()> {
        let root = &self.config.root;
        fs::create_dir_all(root)
            .await
            .map_err(|e| storage_error("create_dir_all", root, e))?;

        let check = root.join(format!(".health-{}", Uuid::new_v4()));
        let data = b"staging-health-check";
        fs::write(&check, data)
            .await
            .map_err(|e| storage_error("write", &check, e))?;
        let read_back = fs::read(&check)
            .await
            .map_err(|e| storage_error("read", &check, e))?;
        fs::remove_file(&check)
            .await
            .map_err(|e| storage_error("remove_file", &check, e))?;
        if read_back != data {
            return Err(Error::Storage(format!(
                "read-back mismatch in {}",
                root.display()
            )));
        }

        debug!(subsystem = "staging", root = %root.display(), "Staging directory ready");
        Ok(())
    }

    /// Persist an upload for one request.
    ///
    /// The request directory is created before anything is written and is
    /// owned by the returned guard from that point on, so a run that is
    /// dropped part-way leaves nothing behind. Bytes go to a temporary file
    /// that is moved into place only once fully written. Fails if the
    /// request id already has a staged file, whatever its extension.
    pub async fn stage(
        &self,
        request_id: Uuid,
        source_filename: &str,
        bytes: &[u8],
    ) -> Result<StagedFile> {
        if bytes.len() > self.config.max_upload_bytes {
            return Err(Error::Storage(format!(
                "upload of {} bytes exceeds the {} byte limit",
                bytes.len(),
                self.config.max_upload_bytes
            )));
        }

        fs::create_dir_all(&self.config.root)
            .await
            .map_err(|e| storage_error("create_dir_all", &self.config.root, e))?;

        // Synchronous so the claim and its guard appear together.
        let dir = self.request_dir(request_id);
        std::fs::create_dir(&dir).map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => Error::Storage(format!(
                "request {} already has a staged file",
                request_id
            )),
            _ => storage_error("create_dir", &dir, e),
        })?;

        let extension = file_extension(source_filename);
        let staged = StagedFile {
            path: self.path_for(request_id, extension.as_deref()),
            dir,
            request_id,
            source_name: source_filename.to_string(),
            extension,
            released: false,
        };

        let temp = tempfile::Builder::new()
            .prefix(".upload-")
            .suffix(&format!(".{}", defaults::PARTIAL_SUFFIX))
            .tempfile_in(&staged.dir)
            .map_err(|e| storage_error("create", &staged.dir, e))?;
        // The temp path removes the partial file if this future is dropped.
        let (file, temp_path) = temp.into_parts();
        let mut file = fs::File::from_std(file);
        file.write_all(bytes)
            .await
            .map_err(|e| storage_error("write", &temp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| storage_error("sync", &temp_path, e))?;
        drop(file);

        temp_path
            .persist_noclobber(&staged.path)
            .map_err(|e| storage_error("persist", &staged.path, e.error))?;

        debug!(
            subsystem = "staging",
            request_id = %request_id,
            bytes = bytes.len(),
            path = %staged.path.display(),
            "File staged"
        );
        Ok(staged)
    }

    /// Remove request directories and stray files in the root older than
    /// `grace`.
    ///
    /// Returns the number of entries removed. A missing root is not an error.
    pub async fn sweep_orphans(&self, grace: Duration) -> Result<usize> {
        let root = &self.config.root;
        let mut entries = match fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(storage_error("read_dir", root, e)),
        };

        let now = SystemTime::now();
        let mut removed = 0usize;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_error("read_dir", root, e))?
        {
            let metadata = match entry.metadata().await {
                Ok(m) if m.is_file() || m.is_dir() => m,
                _ => continue,
            };
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or(Duration::ZERO);
            if age <= grace {
                continue;
            }

            let path = entry.path();
            let removal = if metadata.is_dir() {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_file(&path).await
            };
            match removal {
                Ok(()) => {
                    removed += 1;
                    info!(
                        subsystem = "staging",
                        path = %path.display(),
                        age_secs = age.as_secs(),
                        "Removed orphaned staged file"
                    );
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(
                        subsystem = "staging",
                        path = %path.display(),
                        error = %e,
                        "Failed to remove orphaned file"
                    );
                }
            }
        }

        if removed > 0 {
            info!(subsystem = "staging", removed, "Orphan sweep complete");
        }
        Ok(removed)
    }
}

fn storage_error(op: &str, path: &Path, e: std::io::Error) -> Error {
    let detail = match e.kind() {
        ErrorKind::PermissionDenied => "directory not writable".to_string(),
        _ => e.to_string(),
    };
    Error::Storage(format!("{}({}): {}", op, path.display(), detail))
}

/// A file staged for exactly one request.
///
/// Removed from disk, together with its request directory, by
/// [`StagedFile::release`] or, failing that, when the guard is dropped.
/// Dropping covers early returns, panics and cancellation of the task that
/// owns it.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    dir: PathBuf,
    request_id: Uuid,
    source_name: String,
    extension: Option<String>,
    released: bool,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Filename the sender used.
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Sanitised, lower-cased extension.
    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Delete the staged file and its request directory.
    ///
    /// Returns `Ok(true)` if this call removed them and `Ok(false)` if they
    /// were already gone or released. Safe to call any number of times.
    pub fn release(&mut self) -> Result<bool> {
        if self.released {
            return Ok(false);
        }
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => {
                self.released = true;
                debug!(
                    subsystem = "staging",
                    request_id = %self.request_id,
                    "Staged file released"
                );
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.released = true;
                Ok(false)
            }
            Err(e) => Err(storage_error("remove_dir_all", &self.dir, e)),
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(
                subsystem = "staging",
                request_id = %self.request_id,
                error = %e,
                "Failed to release staged file; the startup sweep will remove it"
            );
        }
    }
}
