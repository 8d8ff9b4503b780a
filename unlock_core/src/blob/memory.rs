use crate::blob::traits::{BlobStore, PutMode};
use crate::blob::{validate_path, validate_prefix};
use crate::models::TenantId;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-process blob store for tests and local development.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<(TenantId, String), Bytes>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    #[tracing::instrument(level = "debug", skip(self, data))]
    async fn put(&self, tenant_id: TenantId, path: &str, data: Bytes, mode: PutMode) -> Result<()> {
        validate_path(path)?;
        let mut blobs = self.blobs.write().await;
        let key = (tenant_id, path.to_string());
        if mode == PutMode::Create && blobs.contains_key(&key) {
            return Err(Error::Conflict(format!("blob already exists: {path}")));
        }
        blobs.insert(key, data);
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get(&self, tenant_id: TenantId, path: &str) -> Result<Option<Bytes>> {
        validate_path(path)?;
        Ok(self
            .blobs
            .read()
            .await
            .get(&(tenant_id, path.to_string()))
            .cloned())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn exists(&self, tenant_id: TenantId, path: &str) -> Result<bool> {
        validate_path(path)?;
        Ok(self
            .blobs
            .read()
            .await
            .contains_key(&(tenant_id, path.to_string())))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list(&self, tenant_id: TenantId, prefix: &str) -> Result<Vec<String>> {
        validate_prefix(prefix)?;
        let mut out: Vec<String> = self
            .blobs
            .read()
            .await
            .keys()
            .filter(|(t, p)| *t == tenant_id && p.starts_with(prefix))
            .map(|(_, p)| p.clone())
            .collect();
        out.sort();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_mode_refuses_overwrite() {
        let store = MemoryBlobStore::new();
        let tenant = TenantId::new();
        assert!(store.is_empty().await);
        store
            .put(tenant, "a/1.json", Bytes::from_static(b"one"), PutMode::Create)
            .await
            .unwrap();
        let err = store
            .put(tenant, "a/1.json", Bytes::from_static(b"two"), PutMode::Create)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(
            store.get(tenant, "a/1.json").await.unwrap(),
            Some(Bytes::from_static(b"one"))
        );

        store
            .put(tenant, "a/1.json", Bytes::from_static(b"two"), PutMode::Overwrite)
            .await
            .unwrap();
        assert_eq!(
            store.get(tenant, "a/1.json").await.unwrap(),
            Some(Bytes::from_static(b"two"))
        );
        assert_eq!(store.len().await, 1);
        assert!(!store.is_empty().await);
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let store = MemoryBlobStore::new();
        let a = TenantId::new();
        let b = TenantId::new();
        store
            .put(a, "x/1.json", Bytes::from_static(b"{}"), PutMode::Create)
            .await
            .unwrap();
        assert_eq!(store.get(b, "x/1.json").await.unwrap(), None);
        assert!(!store.exists(b, "x/1.json").await.unwrap());
        assert!(store.list(b, "x/").await.unwrap().is_empty());
        assert_eq!(store.list(a, "").await.unwrap(), vec!["x/1.json".to_string()]);
    }
}
