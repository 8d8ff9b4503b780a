use crate::lifecycle::models::{ResourceQuery, ResourceRow};
use crate::models::TenantId;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Relational backend for lifecycle resources.
///
/// Every method is tenant scoped and treats soft-deleted rows as absent. Writes are
/// compare-and-swap only: implementations must never retry internally and must apply
/// each accepted write atomically.
#[async_trait]
pub trait ResourceDb: Send + Sync {
    /// Insert a brand-new row. `row.version` is stored as given (1 for new resources).
    async fn insert(&self, row: &ResourceRow) -> Result<()>;

    async fn find(&self, kind: &str, tenant_id: TenantId, id: Uuid)
    -> Result<Option<ResourceRow>>;

    /// Overwrite status, fields, metadata and index columns of `next` if the stored
    /// version equals `expected_version`, bumping the version by exactly one.
    ///
    /// Returns rows affected; zero means the predicate did not match.
    async fn compare_and_swap(&self, expected_version: i64, next: &ResourceRow) -> Result<u64>;

    async fn list(
        &self,
        kind: &str,
        tenant_id: TenantId,
        query: &ResourceQuery,
    ) -> Result<Vec<ResourceRow>>;

    /// Set `deleted_at` under the same version predicate as `compare_and_swap`.
    async fn soft_delete(
        &self,
        kind: &str,
        tenant_id: TenantId,
        id: Uuid,
        expected_version: i64,
        at: DateTime<Utc>,
    ) -> Result<u64>;
}
