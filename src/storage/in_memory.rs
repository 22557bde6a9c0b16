use super::*;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

struct Entry {
    record: StoredFile,
    #[cfg(test)]
    bytes: Vec<u8>,
}

/// Process-local backend. Nothing survives a restart.
#[derive(Clone)]
pub struct InMemoryStorage {
    namespace: String,
    files: Arc<RwLock<Vec<Entry>>>,
}

impl InMemoryStorage {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            files: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Stored bytes for `public_id`, if present.
    #[cfg(test)]
    pub async fn contents(&self, public_id: &str) -> Option<Vec<u8>> {
        self.files
            .read()
            .await
            .iter()
            .find(|entry| entry.record.public_id == public_id)
            .map(|entry| entry.bytes.clone())
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn store(&self, file_data: FileData) -> Result<StoredFile, StorageError> {
        let public_id = format!("{}/{}", self.namespace, Uuid::new_v4().simple());
        let record = StoredFile {
            original_name: file_data.filename,
            url: format!("memory://{public_id}"),
            public_id,
            resource_type: Some(resource_type_of(file_data.content_type.as_ref()).to_string()),
            content_type: file_data.content_type.map(|m| m.to_string()),
            size_bytes: Some(file_data.bytes.len() as u64),
        };

        self.files.write().await.push(Entry {
            record: record.clone(),
            #[cfg(test)]
            bytes: file_data.bytes,
        });
        Ok(record)
    }

    async fn list(&self, limit: usize) -> Result<Vec<StoredFile>, StorageError> {
        Ok(self
            .files
            .read()
            .await
            .iter()
            .take(limit)
            .map(|entry| entry.record.clone())
            .collect())
    }

    async fn delete(&self, public_id: &str) -> Result<bool, StorageError> {
        let mut files = self.files.write().await;
        match files.iter().position(|entry| entry.record.public_id == public_id) {
            Some(index) => {
                files.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note() -> FileData {
        FileData {
            bytes: b"0123456789".to_vec(),
            content_type: Some(mime::TEXT_PLAIN),
            filename: "note.txt".to_string(),
        }
    }

    #[tokio::test]
    async fn store_list_delete() {
        let storage = InMemoryStorage::new("uploads");
        let stored = storage.store(note()).await.unwrap();

        assert!(stored.public_id.starts_with("uploads/"));
        assert_eq!(stored.original_name, "note.txt");
        assert_eq!(stored.size_bytes, Some(10));
        assert_eq!(stored.resource_type.as_deref(), Some("raw"));
        assert_eq!(
            storage.contents(&stored.public_id).await.as_deref(),
            Some(&b"0123456789"[..])
        );

        let listed = storage.list(MAX_PAGE_SIZE).await.unwrap();
        assert_eq!(listed, vec![stored.clone()]);

        assert!(storage.delete(&stored.public_id).await.unwrap());
        assert!(!storage.delete(&stored.public_id).await.unwrap());
        assert!(storage.list(MAX_PAGE_SIZE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reuploads_never_overwrite() {
        let storage = InMemoryStorage::new("uploads");
        let first = storage.store(note()).await.unwrap();
        let second = storage.store(note()).await.unwrap();

        assert_ne!(first.public_id, second.public_id);
        assert_eq!(storage.list(MAX_PAGE_SIZE).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn list_respects_limit_and_order() {
        let storage = InMemoryStorage::new("uploads");
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(storage.store(note()).await.unwrap().public_id);
        }

        let listed: Vec<_> = storage
            .list(2)
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.public_id)
            .collect();
        assert_eq!(listed, ids[..2]);
    }

    #[tokio::test]
    async fn concurrent_deletes_succeed_once() {
        let storage = InMemoryStorage::new("uploads");
        let stored = storage.store(note()).await.unwrap();

        let (a, b) = tokio::join!(
            storage.delete(&stored.public_id),
            storage.delete(&stored.public_id)
        );
        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort();
        assert_eq!(outcomes, vec![false, true]);
    }
}
