//! On-disk artifacts: raw catalog snapshot, problem document, refresh stamp.
//!
//! Every file is written atomically (temp file, then rename) so readers never
//! observe a half-written document. The refresh stamp is a small sidecar next
//! to the document recording when and by which job it was produced.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use catalogsync_shared::{ArtifactPaths, CatalogSyncError, Make, ProblemDocument, Result};

/// Sidecar written alongside every successfully persisted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshStamp {
    pub refreshed_at: DateTime<Utc>,
    pub job_id: Uuid,
    pub option_count: usize,
    pub document_sha256: String,
}

/// Reads and writes the pipeline's output files.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    paths: ArtifactPaths,
}

impl ArtifactStore {
    pub fn new(paths: ArtifactPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    /// `auto.json` → `auto.stamp.json`
    pub fn stamp_path(&self) -> PathBuf {
        self.paths.document_path.with_extension("stamp.json")
    }

    /// Persist the raw catalog tree, replacing the previous snapshot.
    #[instrument(skip_all, fields(path = %self.paths.raw_path.display(), makes = makes.len()))]
    pub fn write_raw(&self, makes: &[Make]) -> Result<()> {
        let bytes = write_json(&self.paths.raw_path, makes)?;
        info!(bytes, "raw snapshot written");
        Ok(())
    }

    /// Load the last raw snapshot.
    pub fn read_raw(&self) -> Result<Vec<Make>> {
        read_json(&self.paths.raw_path)
    }

    /// Persist the problem document together with its refresh stamp.
    ///
    /// Both files are staged before either is renamed into place. The stamp
    /// goes first: if the document rename then fails, the stamp's digest no
    /// longer matches and [`last_refresh`](Self::last_refresh) ignores it.
    #[instrument(skip_all, fields(path = %self.paths.document_path.display(), job_id = %job_id))]
    pub fn write_document(
        &self,
        document: &ProblemDocument,
        job_id: Uuid,
        refreshed_at: DateTime<Utc>,
    ) -> Result<RefreshStamp> {
        let json = to_pretty_json(document)?;
        let stamp = RefreshStamp {
            refreshed_at,
            job_id,
            option_count: document.options.len(),
            document_sha256: sha256_hex(json.as_bytes()),
        };

        let document_path = &self.paths.document_path;
        let stamp_path = self.stamp_path();
        let staged_document = stage(document_path, json.as_bytes())?;
        let staged_stamp = match to_pretty_json(&stamp)
            .and_then(|json| stage(&stamp_path, json.as_bytes()))
        {
            Ok(temp) => temp,
            Err(e) => {
                discard(&staged_document);
                return Err(e);
            }
        };

        if let Err(e) = commit(&staged_stamp, &stamp_path) {
            discard(&staged_document);
            return Err(e);
        }
        commit(&staged_document, document_path)?;

        info!(
            options = stamp.option_count,
            sha256 = %stamp.document_sha256,
            "problem document written"
        );
        Ok(stamp)
    }

    /// Load the current problem document, if one has been written.
    pub fn read_document(&self) -> Result<Option<ProblemDocument>> {
        if !self.paths.document_path.exists() {
            return Ok(None);
        }
        read_json(&self.paths.document_path).map(Some)
    }

    /// When the document was last refreshed.
    ///
    /// Reads the stamp when its digest matches the document on disk;
    /// otherwise falls back to the document's modification time; without a
    /// document, the Unix epoch.
    pub fn last_refresh(&self) -> DateTime<Utc> {
        let document_path = &self.paths.document_path;
        let stamp_path = self.stamp_path();
        if stamp_path.exists() {
            match read_json::<RefreshStamp>(&stamp_path) {
                Ok(stamp) => match std::fs::read(document_path) {
                    Ok(bytes) if sha256_hex(&bytes) == stamp.document_sha256 => {
                        return stamp.refreshed_at;
                    }
                    Ok(_) => warn!(
                        job_id = %stamp.job_id,
                        "refresh stamp does not match document, using document mtime"
                    ),
                    Err(_) => debug!("refresh stamp without a document"),
                },
                Err(e) => warn!(error = %e, "unreadable refresh stamp, using document mtime"),
            }
        }

        match std::fs::metadata(document_path).and_then(|m| m.modified()) {
            Ok(modified) => DateTime::<Utc>::from(modified),
            Err(_) => {
                debug!(path = %document_path.display(), "no document yet");
                DateTime::<Utc>::UNIX_EPOCH
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn to_pretty_json<T: Serialize + ?Sized>(data: &T) -> Result<String> {
    serde_json::to_string_pretty(data)
        .map_err(|e| CatalogSyncError::validation(format!("JSON serialization failed: {e}")))
}

/// Pretty-print `data` to `path` atomically. Returns the byte count.
fn write_json<T: Serialize + ?Sized>(path: &Path, data: &T) -> Result<usize> {
    let json = to_pretty_json(data)?;
    write_atomic(path, json.as_bytes())?;
    Ok(json.len())
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let temp = stage(path, content)?;
    commit(&temp, path)
}

/// Write `content` to a uniquely named temp file beside `path`.
fn stage(path: &Path, content: &[u8]) -> Result<PathBuf> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(|e| CatalogSyncError::io(&parent, e))?;

    let filename = path
        .file_name()
        .ok_or_else(|| CatalogSyncError::validation(format!("not a file path: {}", path.display())))?
        .to_string_lossy();
    let temp = parent.join(format!(".{filename}.{}.tmp", Uuid::now_v7()));

    std::fs::write(&temp, content).map_err(|e| CatalogSyncError::io(&temp, e))?;
    Ok(temp)
}

/// Rename a staged temp file over `path`. The temp file is removed on failure.
fn commit(temp: &Path, path: &Path) -> Result<()> {
    if let Err(e) = std::fs::rename(temp, path) {
        discard(temp);
        return Err(CatalogSyncError::io(path, e));
    }
    debug!(path = %path.display(), "wrote JSON file");
    Ok(())
}

fn discard(temp: &Path) {
    if let Err(e) = std::fs::remove_file(temp) {
        debug!(path = %temp.display(), error = %e, "temp file not removed");
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| CatalogSyncError::io(path, e))?;
    serde_json::from_str(&content).map_err(|e| {
        CatalogSyncError::validation(format!("invalid JSON in {}: {e}", path.display()))
    })
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
