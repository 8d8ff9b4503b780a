use crate::lifecycle::models::{ResourceQuery, ResourceRow, SortOrder};
use crate::lifecycle::traits::ResourceDb;
use crate::models::TenantId;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory `ResourceDb` for local development and unit tests.
///
/// Rows are keyed by `(kind, id)`; every CAS runs under the write lock so the
/// version predicate behaves like a row-level conditional update.
#[derive(Clone, Default)]
pub struct MemoryResourceDb {
    rows: Arc<RwLock<HashMap<(String, Uuid), ResourceRow>>>,
}

impl MemoryResourceDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw row including soft-deleted ones (primarily for tests).
    pub async fn raw(&self, kind: &str, id: Uuid) -> Option<ResourceRow> {
        self.rows.read().await.get(&(kind.to_string(), id)).cloned()
    }
}

#[async_trait]
impl ResourceDb for MemoryResourceDb {
    #[tracing::instrument(level = "debug", skip_all)]
    async fn insert(&self, row: &ResourceRow) -> Result<()> {
        let mut rows = self.rows.write().await;
        let key = (row.kind.clone(), row.id);
        if rows.contains_key(&key) {
            return Err(Error::Conflict("resource id already allocated".to_string()));
        }
        rows.insert(key, row.clone());
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn find(
        &self,
        kind: &str,
        tenant_id: TenantId,
        id: Uuid,
    ) -> Result<Option<ResourceRow>> {
        let rows = self.rows.read().await;
        Ok(rows
            .get(&(kind.to_string(), id))
            .filter(|r| r.tenant_id == tenant_id && r.deleted_at.is_none())
            .cloned())
    }

    #[tracing::instrument(level = "debug", skip(self, next), fields(kind = %next.kind, id = %next.id))]
    async fn compare_and_swap(&self, expected_version: i64, next: &ResourceRow) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let Some(current) = rows.get_mut(&(next.kind.clone(), next.id)) else {
            return Ok(0);
        };
        if current.tenant_id != next.tenant_id
            || current.deleted_at.is_some()
            || current.version != expected_version
        {
            return Ok(0);
        }
        current.version = expected_version + 1;
        current.status = next.status.clone();
        current.fields = next.fields.clone();
        current.metadata = next.metadata.clone();
        current.parent_id = next.parent_id;
        current.sort_at = next.sort_at;
        current.updated_at = next.updated_at;
        Ok(1)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list(
        &self,
        kind: &str,
        tenant_id: TenantId,
        query: &ResourceQuery,
    ) -> Result<Vec<ResourceRow>> {
        query.validate()?;
        let rows = self.rows.read().await;
        let mut out: Vec<ResourceRow> = rows
            .values()
            .filter(|r| r.kind == kind && r.tenant_id == tenant_id && r.deleted_at.is_none())
            .filter(|r| query.matches(r))
            .cloned()
            .collect();

        // Option<DateTime> orders None first, which is the ascending contract.
        // uuid::Uuid ordering is only used as a final tiebreaker.
        out.sort_by(|a, b| {
            (a.sort_at, a.created_at, a.id).cmp(&(b.sort_at, b.created_at, b.id))
        });
        if query.order == SortOrder::Desc {
            out.reverse();
        }
        out.truncate(query.limit);
        Ok(out)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn soft_delete(
        &self,
        kind: &str,
        tenant_id: TenantId,
        id: Uuid,
        expected_version: i64,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut rows = self.rows.write().await;
        let Some(current) = rows.get_mut(&(kind.to_string(), id)) else {
            return Ok(0);
        };
        if current.tenant_id != tenant_id
            || current.deleted_at.is_some()
            || current.version != expected_version
        {
            return Ok(0);
        }
        current.version = expected_version + 1;
        current.deleted_at = Some(at);
        current.updated_at = at;
        Ok(1)
    }
}
