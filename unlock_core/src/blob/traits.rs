use crate::Result;
use crate::models::TenantId;
use async_trait::async_trait;
use bytes::Bytes;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PutMode {
    /// Fail with `Error::Conflict` if the path already holds a blob.
    Create,
    /// Replace whatever is stored at the path.
    Overwrite,
}

/// Key -> bytes object storage, physically scoped per tenant.
///
/// Paths are the unscoped convention paths recorded on rows; each backend prefixes
/// them with the tenant. Content is opaque.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, tenant_id: TenantId, path: &str, data: Bytes, mode: PutMode)
    -> Result<()>;

    async fn get(&self, tenant_id: TenantId, path: &str) -> Result<Option<Bytes>>;

    async fn exists(&self, tenant_id: TenantId, path: &str) -> Result<bool>;

    /// Paths under `prefix`, relative to the tenant root, sorted.
    async fn list(&self, tenant_id: TenantId, prefix: &str) -> Result<Vec<String>>;
}
