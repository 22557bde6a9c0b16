use super::*;
use std::future::Future;

/// Bounds every call into the wrapped backend with a deadline.
pub struct TimeoutStorage<S> {
    inner: S,
    limit: Duration,
}

impl<S: Storage> TimeoutStorage<S> {
    pub fn new(inner: S, limit: Duration) -> Self {
        Self { inner, limit }
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, StorageError>>,
    ) -> Result<T, StorageError> {
        tokio::time::timeout(self.limit, call)
            .await
            .map_err(|_| StorageError::Timeout(self.limit))?
    }
}

#[async_trait]
impl<S: Storage> Storage for TimeoutStorage<S> {
    async fn store(&self, file_data: FileData) -> Result<StoredFile, StorageError> {
        self.bounded(self.inner.store(file_data)).await
    }

    async fn list(&self, limit: usize) -> Result<Vec<StoredFile>, StorageError> {
        self.bounded(self.inner.list(limit)).await
    }

    async fn delete(&self, public_id: &str) -> Result<bool, StorageError> {
        self.bounded(self.inner.delete(public_id)).await
    }
}
