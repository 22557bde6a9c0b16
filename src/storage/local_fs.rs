use super::*;
use chrono::Utc;
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Sidecar record kept next to every blob.
#[derive(Debug, Serialize, Deserialize)]
struct Metadata {
    original_name: String,
    content_type: Option<String>,
    size: u64,
}

struct Dirs {
    blob_dir: PathBuf,
    meta_dir: PathBuf,
    public_url: String,
}

/// Stores blobs under `{root}/{namespace}` and their metadata under
/// `{root}/.meta/{namespace}`, so the blob directory can be served as-is.
pub struct LocalFileStorage {
    dirs: Arc<Dirs>,
}

impl LocalFileStorage {
    pub fn new(
        root: PathBuf,
        namespace: &str,
        public_url: impl Into<String>,
    ) -> Result<Self, StorageError> {
        let blob_dir = root.join(namespace);
        let meta_dir = root.join(".meta").join(namespace);
        std::fs::create_dir_all(&blob_dir)?;
        std::fs::create_dir_all(&meta_dir)?;

        Ok(Self {
            dirs: Arc::new(Dirs {
                blob_dir,
                meta_dir,
                public_url: public_url.into().trim_end_matches('/').to_string(),
            }),
        })
    }

    /// Directory holding the raw uploaded bytes.
    pub fn blob_dir(&self) -> &Path {
        &self.dirs.blob_dir
    }
}

impl Dirs {
    fn meta_path(&self, public_id: &str) -> PathBuf {
        self.meta_dir.join(format!("{public_id}.json"))
    }

    fn record(&self, public_id: String, meta: Metadata) -> StoredFile {
        let content_type = meta.content_type.and_then(|ct| ct.parse::<Mime>().ok());
        StoredFile {
            original_name: meta.original_name,
            url: format!("{}/{}", self.public_url, public_id),
            resource_type: Some(resource_type_of(content_type.as_ref()).to_string()),
            content_type: content_type.map(|m| m.to_string()),
            size_bytes: Some(meta.size),
            public_id,
        }
    }

    /// Claims a fresh blob named after the upload time, bumping the timestamp on collision.
    async fn claim(&self, extension: Option<&str>) -> Result<(String, fs::File), StorageError> {
        let mut millis = Utc::now().timestamp_millis();
        loop {
            let public_id = match extension {
                Some(ext) => format!("{millis}.{ext}"),
                None => millis.to_string(),
            };
            let opened = fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.blob_dir.join(&public_id))
                .await;

            match opened {
                Ok(file) => return Ok((public_id, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => millis += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Writes blob then sidecar; on any failure both are removed again.
    async fn write(&self, file_data: FileData) -> Result<StoredFile, StorageError> {
        let extension = file_data.extension();
        let FileData {
            bytes,
            content_type,
            filename,
        } = file_data;

        let (public_id, mut file) = self.claim(extension.as_deref()).await?;
        let meta_path = self.meta_path(&public_id);

        let meta = Metadata {
            original_name: filename,
            content_type: content_type.map(|m| m.to_string()),
            size: bytes.len() as u64,
        };

        let written: Result<(), StorageError> = async {
            file.write_all(&bytes).await?;
            file.flush().await?;
            fs::write(&meta_path, serde_json::to_vec(&meta)?).await?;
            Ok(())
        }
        .await;

        if let Err(e) = written {
            // Never leave a blob the catalog cannot describe.
            self.remove(&public_id).await;
            return Err(e);
        }

        debug!(public_id = %public_id, size = meta.size, "file written");
        Ok(self.record(public_id, meta))
    }

    async fn remove(&self, public_id: &str) {
        let _ = fs::remove_file(self.blob_dir.join(public_id)).await;
        let _ = fs::remove_file(self.meta_path(public_id)).await;
    }
}

/// A write running on its own task. Dropped before [`PendingWrite::finish`]
/// returns (caller timed out or went away), it waits for the task and removes
/// whatever it committed.
struct PendingWrite {
    task: Option<JoinHandle<Result<StoredFile, StorageError>>>,
    dirs: Arc<Dirs>,
}

impl PendingWrite {
    async fn finish(mut self) -> Result<StoredFile, StorageError> {
        let joined = match self.task.as_mut() {
            Some(task) => task.await,
            None => return Err(StorageError::Unavailable("write already collected".into())),
        };
        self.task = None;
        joined.map_err(|e| StorageError::Unavailable(format!("write task failed: {e}")))?
    }
}

impl Drop for PendingWrite {
    fn drop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let dirs = self.dirs.clone();
        runtime.spawn(async move {
            if let Ok(Ok(record)) = task.await {
                warn!(public_id = %record.public_id, "store abandoned, rolling back");
                dirs.remove(&record.public_id).await;
            }
        });
    }
}

/// Ids produced by this backend are plain file names.
fn is_valid_id(public_id: &str) -> bool {
    !public_id.is_empty()
        && !public_id.starts_with('.')
        && !public_id.contains(['/', '\\', '\0'])
}

#[async_trait]
impl Storage for LocalFileStorage {
    async fn store(&self, file_data: FileData) -> Result<StoredFile, StorageError> {
        let dirs = self.dirs.clone();
        let pending = PendingWrite {
            task: Some(tokio::spawn(async move { dirs.write(file_data).await })),
            dirs: self.dirs.clone(),
        };
        pending.finish().await
    }

    async fn list(&self, limit: usize) -> Result<Vec<StoredFile>, StorageError> {
        let dirs = &self.dirs;
        let mut entries = fs::read_dir(&dirs.meta_dir).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if let Some(public_id) = file_name.strip_suffix(".json") {
                ids.push(public_id.to_string());
            }
        }
        ids.sort();

        let mut files = Vec::new();
        for public_id in ids {
            if files.len() >= limit {
                break;
            }

            let raw = match fs::read(dirs.meta_path(&public_id)).await {
                Ok(raw) => raw,
                // Deleted between the directory scan and now.
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if !fs::try_exists(dirs.blob_dir.join(&public_id)).await? {
                warn!(public_id = %public_id, "metadata without blob, skipping");
                continue;
            }

            let meta: Metadata = serde_json::from_slice(&raw)?;
            files.push(dirs.record(public_id, meta));
        }

        Ok(files)
    }

    async fn delete(&self, public_id: &str) -> Result<bool, StorageError> {
        if !is_valid_id(public_id) {
            return Ok(false);
        }

        match fs::remove_file(self.dirs.blob_dir.join(public_id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        match fs::remove_file(self.dirs.meta_path(public_id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(public_id = %public_id, error = %e, "failed to remove metadata"),
        }
        Ok(true)
    }
}
