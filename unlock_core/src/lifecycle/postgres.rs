use crate::lifecycle::models::{ResourceQuery, ResourceRow, SortOrder};
use crate::lifecycle::traits::ResourceDb;
use crate::models::{Metadata, TenantId};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

const COLUMNS: &str = "id, kind, tenant_id, version, status, fields, metadata, parent_id, sort_at, created_at, updated_at, deleted_at";

/// Postgres-backed `ResourceDb`. All kinds live in the `resources` table.
#[derive(Clone)]
pub struct PostgresResourceDb {
    pool: PgPool,
}

impl PostgresResourceDb {
    #[tracing::instrument(level = "debug", skip(pool))]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[tracing::instrument(level = "debug", skip(row))]
    fn resource_from_row(row: &PgRow) -> Result<ResourceRow> {
        let metadata: serde_json::Value = row
            .try_get("metadata")
            .map_err(|e| Error::backend("metadata", e))?;
        let metadata: Metadata = match metadata {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => Metadata::new(),
            other => {
                return Err(Error::BackendMessage(format!(
                    "resources.metadata must be an object, got {other}"
                )));
            }
        };

        Ok(ResourceRow {
            id: row.try_get("id").map_err(|e| Error::backend("id", e))?,
            tenant_id: TenantId(
                row.try_get::<Uuid, _>("tenant_id")
                    .map_err(|e| Error::backend("tenant_id", e))?,
            ),
            kind: row.try_get("kind").map_err(|e| Error::backend("kind", e))?,
            version: row
                .try_get("version")
                .map_err(|e| Error::backend("version", e))?,
            status: row
                .try_get("status")
                .map_err(|e| Error::backend("status", e))?,
            fields: row
                .try_get("fields")
                .map_err(|e| Error::backend("fields", e))?,
            metadata,
            parent_id: row
                .try_get("parent_id")
                .map_err(|e| Error::backend("parent_id", e))?,
            sort_at: row
                .try_get("sort_at")
                .map_err(|e| Error::backend("sort_at", e))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| Error::backend("created_at", e))?,
            updated_at: row
                .try_get("updated_at")
                .map_err(|e| Error::backend("updated_at", e))?,
            deleted_at: row
                .try_get("deleted_at")
                .map_err(|e| Error::backend("deleted_at", e))?,
        })
    }
}

#[async_trait]
impl ResourceDb for PostgresResourceDb {
    #[tracing::instrument(level = "debug", skip_all, fields(kind = %row.kind, id = %row.id))]
    async fn insert(&self, row: &ResourceRow) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO resources
  (id, kind, tenant_id, version, status, fields, metadata, parent_id, sort_at,
   created_at, updated_at, deleted_at)
VALUES
  ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
"#,
        )
        .bind(row.id)
        .bind(&row.kind)
        .bind(row.tenant_id.0)
        .bind(row.version)
        .bind(&row.status)
        .bind(&row.fields)
        .bind(serde_json::Value::Object(row.metadata.clone()))
        .bind(row.parent_id)
        .bind(row.sort_at)
        .bind(row.created_at)
        .bind(row.updated_at)
        .bind(row.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::backend("insert resource", e))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn find(
        &self,
        kind: &str,
        tenant_id: TenantId,
        id: Uuid,
    ) -> Result<Option<ResourceRow>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM resources WHERE kind = $1 AND tenant_id = $2 AND id = $3 AND deleted_at IS NULL"
        );
        let row = sqlx::query(&sql)
            .bind(kind)
            .bind(tenant_id.0)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::backend("find resource", e))?;
        row.as_ref().map(Self::resource_from_row).transpose()
    }

    #[tracing::instrument(level = "debug", skip(self, next), fields(kind = %next.kind, id = %next.id))]
    async fn compare_and_swap(&self, expected_version: i64, next: &ResourceRow) -> Result<u64> {
        let res = sqlx::query(
            r#"
UPDATE resources
SET version = version + 1,
    status = $5,
    fields = $6,
    metadata = $7,
    parent_id = $8,
    sort_at = $9,
    updated_at = $10
WHERE kind = $1 AND tenant_id = $2 AND id = $3 AND version = $4 AND deleted_at IS NULL
"#,
        )
        .bind(&next.kind)
        .bind(next.tenant_id.0)
        .bind(next.id)
        .bind(expected_version)
        .bind(&next.status)
        .bind(&next.fields)
        .bind(serde_json::Value::Object(next.metadata.clone()))
        .bind(next.parent_id)
        .bind(next.sort_at)
        .bind(next.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::backend("compare and swap resource", e))?;
        Ok(res.rows_affected())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list(
        &self,
        kind: &str,
        tenant_id: TenantId,
        query: &ResourceQuery,
    ) -> Result<Vec<ResourceRow>> {
        query.validate()?;

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM resources WHERE kind = "));
        qb.push_bind(kind.to_string());
        qb.push(" AND tenant_id = ").push_bind(tenant_id.0);
        qb.push(" AND deleted_at IS NULL");

        if let Some(status) = &query.status {
            qb.push(" AND status = ").push_bind(status.clone());
        }
        if let Some(parent_id) = query.parent_id {
            qb.push(" AND parent_id = ").push_bind(parent_id);
        }

        qb.push(" AND (");
        if query.include_unsorted {
            qb.push("sort_at IS NULL OR ");
        }
        qb.push("(sort_at IS NOT NULL");
        if let Some(from) = query.sort_from {
            qb.push(" AND sort_at >= ").push_bind(from);
        }
        if let Some(until) = query.sort_until {
            qb.push(" AND sort_at <= ").push_bind(until);
        }
        qb.push("))");

        match query.order {
            SortOrder::Asc => {
                qb.push(" ORDER BY sort_at ASC NULLS FIRST, created_at ASC, id ASC");
            }
            SortOrder::Desc => {
                qb.push(" ORDER BY sort_at DESC NULLS LAST, created_at DESC, id DESC");
            }
        }
        qb.push(" LIMIT ").push_bind(query.limit as i64);

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::backend("list resources", e))?;
        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            out.push(Self::resource_from_row(&r)?);
        }
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
        let res = sqlx::query(
            r#"
UPDATE resources
SET version = version + 1, deleted_at = $5, updated_at = $5
WHERE kind = $1 AND tenant_id = $2 AND id = $3 AND version = $4 AND deleted_at IS NULL
"#,
        )
        .bind(kind)
        .bind(tenant_id.0)
        .bind(id)
        .bind(expected_version)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::backend("soft delete resource", e))?;
        Ok(res.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceAccessConfig;
    use crate::sources::{OnboardOptions, SourceAccess, SourceStatus};
    use crate::test_support::TestInfra;
    use std::sync::Arc;

    #[tokio::test]
    async fn postgres_cas_and_tenant_scoping() {
        let Some(infra) = TestInfra::from_env().await else {
            return;
        };
        let db = Arc::new(PostgresResourceDb::new(infra.pool().await));
        let access = SourceAccess::new(db.clone(), SourceAccessConfig::default());
        let tenant = TenantId::new();

        let id = access
            .onboard_source(
                tenant,
                "Riverside Hall",
                "https://riverside.example/events",
                OnboardOptions::default(),
            )
            .await
            .unwrap();
        access.commission_source(tenant, id).await.unwrap();
        access.commission_source(tenant, id).await.unwrap();
        let source = access.store().find(tenant, id).await.unwrap();
        assert_eq!(source.status, SourceStatus::Active);
        assert_eq!(source.version, 2);

        let stale = db.find("source", tenant, id).await.unwrap().unwrap();
        access.decommission_source(tenant, id).await.unwrap();
        let mut next = stale.clone();
        next.status = "retired".to_string();
        next.version = stale.version + 1;
        assert_eq!(db.compare_and_swap(stale.version, &next).await.unwrap(), 0);
        assert_eq!(
            access.store().find(tenant, id).await.unwrap().status,
            SourceStatus::Inactive
        );

        assert!(matches!(
            access.store().find(TenantId::new(), id).await,
            Err(Error::NotFound(_))
        ));

        let listed = db
            .list("source", tenant, &ResourceQuery::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
    }
}
