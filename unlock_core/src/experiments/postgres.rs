use crate::experiments::models::{
    AnalysisRequest, AnalysisStatus, BudgetEntry, BudgetStrategy, BudgetUsage, Experiment,
    ExperimentPhase, ExperimentStatus, OutcomeRecord,
};
use crate::experiments::traits::ExperimentDb;
use crate::models::{Metadata, TenantId};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

const EXPERIMENT_COLUMNS: &str = "id, tenant_id, source_id, name, notes, version, phase, status, budget_strategy, program, metadata, created_at, updated_at";
const REQUEST_COLUMNS: &str = "id, tenant_id, experiment_id, version, status, snapshot_path, context_path, verdict_path, created_at, updated_at";

#[derive(Clone)]
pub struct PostgresExperimentDb {
    pool: PgPool,
}

impl PostgresExperimentDb {
    #[tracing::instrument(level = "debug", skip(pool))]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[tracing::instrument(level = "debug", skip(row))]
    fn experiment_from_row(row: &PgRow) -> Result<Experiment> {
        let metadata: serde_json::Value = row
            .try_get("metadata")
            .map_err(|e| Error::backend("metadata", e))?;
        let metadata = match metadata {
            serde_json::Value::Object(map) => map,
            _ => Metadata::new(),
        };
        let phase: String = row.try_get("phase").map_err(|e| Error::backend("phase", e))?;
        let status: String = row
            .try_get("status")
            .map_err(|e| Error::backend("status", e))?;
        let strategy: String = row
            .try_get("budget_strategy")
            .map_err(|e| Error::backend("budget_strategy", e))?;

        Ok(Experiment {
            id: row.try_get("id").map_err(|e| Error::backend("id", e))?,
            tenant_id: TenantId(
                row.try_get::<Uuid, _>("tenant_id")
                    .map_err(|e| Error::backend("tenant_id", e))?,
            ),
            source_id: row
                .try_get("source_id")
                .map_err(|e| Error::backend("source_id", e))?,
            name: row.try_get("name").map_err(|e| Error::backend("name", e))?,
            notes: row.try_get("notes").map_err(|e| Error::backend("notes", e))?,
            version: row
                .try_get("version")
                .map_err(|e| Error::backend("version", e))?,
            phase: ExperimentPhase::parse(&phase)?,
            status: ExperimentStatus::parse(&status)?,
            budget_strategy: BudgetStrategy::parse(&strategy)?,
            program: row
                .try_get("program")
                .map_err(|e| Error::backend("program", e))?,
            metadata,
            created_at: row
                .try_get("created_at")
                .map_err(|e| Error::backend("created_at", e))?,
            updated_at: row
                .try_get("updated_at")
                .map_err(|e| Error::backend("updated_at", e))?,
        })
    }

    #[tracing::instrument(level = "debug", skip(row))]
    fn request_from_row(row: &PgRow) -> Result<AnalysisRequest> {
        let status: String = row
            .try_get("status")
            .map_err(|e| Error::backend("status", e))?;
        Ok(AnalysisRequest {
            id: row.try_get("id").map_err(|e| Error::backend("id", e))?,
            tenant_id: TenantId(
                row.try_get::<Uuid, _>("tenant_id")
                    .map_err(|e| Error::backend("tenant_id", e))?,
            ),
            experiment_id: row
                .try_get("experiment_id")
                .map_err(|e| Error::backend("experiment_id", e))?,
            version: row
                .try_get("version")
                .map_err(|e| Error::backend("version", e))?,
            status: AnalysisStatus::parse(&status)?,
            snapshot_path: row
                .try_get("snapshot_path")
                .map_err(|e| Error::backend("snapshot_path", e))?,
            context_path: row
                .try_get("context_path")
                .map_err(|e| Error::backend("context_path", e))?,
            verdict_path: row
                .try_get("verdict_path")
                .map_err(|e| Error::backend("verdict_path", e))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| Error::backend("created_at", e))?,
            updated_at: row
                .try_get("updated_at")
                .map_err(|e| Error::backend("updated_at", e))?,
        })
    }

    #[tracing::instrument(level = "debug", skip(row))]
    fn budget_from_row(row: &PgRow) -> Result<BudgetEntry> {
        Ok(BudgetEntry {
            experiment_id: row
                .try_get("experiment_id")
                .map_err(|e| Error::backend("experiment_id", e))?,
            platform: row
                .try_get("platform")
                .map_err(|e| Error::backend("platform", e))?,
            dimension: row
                .try_get("dimension")
                .map_err(|e| Error::backend("dimension", e))?,
            total: row.try_get("total").map_err(|e| Error::backend("total", e))?,
            used: row.try_get("used").map_err(|e| Error::backend("used", e))?,
            unit: row.try_get("unit").map_err(|e| Error::backend("unit", e))?,
        })
    }
}

#[async_trait]
impl ExperimentDb for PostgresExperimentDb {
    #[tracing::instrument(level = "debug", skip_all, fields(id = %experiment.id))]
    async fn insert_experiment(
        &self,
        experiment: &Experiment,
        budget: &[BudgetEntry],
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::backend("begin insert experiment", e))?;

        sqlx::query(
            r#"
INSERT INTO experiments
  (id, tenant_id, source_id, name, notes, version, phase, status, budget_strategy,
   program, metadata, created_at, updated_at)
VALUES
  ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
"#,
        )
        .bind(experiment.id)
        .bind(experiment.tenant_id.0)
        .bind(experiment.source_id)
        .bind(&experiment.name)
        .bind(&experiment.notes)
        .bind(experiment.version)
        .bind(experiment.phase.as_str())
        .bind(experiment.status.as_str())
        .bind(experiment.budget_strategy.as_str())
        .bind(&experiment.program)
        .bind(serde_json::Value::Object(experiment.metadata.clone()))
        .bind(experiment.created_at)
        .bind(experiment.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::backend("insert experiment", e))?;

        for entry in budget {
            sqlx::query(
                r#"
INSERT INTO experiment_budgets
  (tenant_id, experiment_id, platform, dimension, total, used, unit)
VALUES
  ($1, $2, $3, $4, $5, $6, $7)
"#,
            )
            .bind(experiment.tenant_id.0)
            .bind(entry.experiment_id)
            .bind(&entry.platform)
            .bind(&entry.dimension)
            .bind(entry.total)
            .bind(entry.used)
            .bind(&entry.unit)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::backend("insert experiment budget", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::backend("commit insert experiment", e))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_experiment(&self, tenant_id: TenantId, id: Uuid) -> Result<Option<Experiment>> {
        let sql = format!("SELECT {EXPERIMENT_COLUMNS} FROM experiments WHERE tenant_id = $1 AND id = $2");
        let row = sqlx::query(&sql)
            .bind(tenant_id.0)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::backend("get experiment", e))?;
        row.as_ref().map(Self::experiment_from_row).transpose()
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn update_phase(
        &self,
        tenant_id: TenantId,
        id: Uuid,
        expected_version: i64,
        phase: ExperimentPhase,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let res = sqlx::query(
            r#"
UPDATE experiments
SET phase = $4, version = version + 1, updated_at = $5
WHERE tenant_id = $1 AND id = $2 AND version = $3
"#,
        )
        .bind(tenant_id.0)
        .bind(id)
        .bind(expected_version)
        .bind(phase.as_str())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::backend("update experiment phase", e))?;
        Ok(res.rows_affected())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn update_status(
        &self,
        tenant_id: TenantId,
        id: Uuid,
        expected_version: i64,
        status: ExperimentStatus,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let res = sqlx::query(
            r#"
UPDATE experiments
SET status = $4, version = version + 1, updated_at = $5
WHERE tenant_id = $1 AND id = $2 AND version = $3 AND status = 'active'
"#,
        )
        .bind(tenant_id.0)
        .bind(id)
        .bind(expected_version)
        .bind(status.as_str())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::backend("update experiment status", e))?;
        Ok(res.rows_affected())
    }

    #[tracing::instrument(level = "debug", skip(self, program))]
    async fn record_program(
        &self,
        tenant_id: TenantId,
        id: Uuid,
        expected_version: i64,
        program: &serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let res = sqlx::query(
            r#"
UPDATE experiments
SET program = $4, version = version + 1, updated_at = $5
WHERE tenant_id = $1 AND id = $2 AND version = $3
"#,
        )
        .bind(tenant_id.0)
        .bind(id)
        .bind(expected_version)
        .bind(program)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::backend("record experiment program", e))?;
        Ok(res.rows_affected())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(id = %request.id))]
    async fn insert_analysis_request(&self, request: &AnalysisRequest) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO analysis_requests
  (id, tenant_id, experiment_id, version, status, snapshot_path, context_path,
   verdict_path, created_at, updated_at)
VALUES
  ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
"#,
        )
        .bind(request.id)
        .bind(request.tenant_id.0)
        .bind(request.experiment_id)
        .bind(request.version)
        .bind(request.status.as_str())
        .bind(&request.snapshot_path)
        .bind(&request.context_path)
        .bind(&request.verdict_path)
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::backend("insert analysis request", e))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_analysis_request(
        &self,
        tenant_id: TenantId,
        id: Uuid,
    ) -> Result<Option<AnalysisRequest>> {
        let sql =
            format!("SELECT {REQUEST_COLUMNS} FROM analysis_requests WHERE tenant_id = $1 AND id = $2");
        let row = sqlx::query(&sql)
            .bind(tenant_id.0)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::backend("get analysis request", e))?;
        row.as_ref().map(Self::request_from_row).transpose()
    }

    #[tracing::instrument(level = "debug", skip(self, next), fields(id = %next.id))]
    async fn advance_analysis_request(
        &self,
        from: AnalysisStatus,
        next: &AnalysisRequest,
    ) -> Result<u64> {
        let res = sqlx::query(
            r#"
UPDATE analysis_requests
SET status = $5, context_path = $6, verdict_path = $7, version = $8, updated_at = $9
WHERE tenant_id = $1 AND id = $2 AND status = $3 AND version = $4
"#,
        )
        .bind(next.tenant_id.0)
        .bind(next.id)
        .bind(from.as_str())
        .bind(next.version - 1)
        .bind(next.status.as_str())
        .bind(&next.context_path)
        .bind(&next.verdict_path)
        .bind(next.version)
        .bind(next.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::backend("advance analysis request", e))?;
        Ok(res.rows_affected())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_budget(
        &self,
        tenant_id: TenantId,
        experiment_id: Uuid,
    ) -> Result<Vec<BudgetEntry>> {
        let rows = sqlx::query(
            r#"
SELECT experiment_id, platform, dimension, total, used, unit
FROM experiment_budgets
WHERE tenant_id = $1 AND experiment_id = $2
ORDER BY platform ASC, dimension ASC
"#,
        )
        .bind(tenant_id.0)
        .bind(experiment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::backend("list experiment budget", e))?;
        rows.iter().map(Self::budget_from_row).collect()
    }

    #[tracing::instrument(level = "debug", skip(self, usage))]
    async fn consume_budget(
        &self,
        tenant_id: TenantId,
        experiment_id: Uuid,
        usage: &[BudgetUsage],
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::backend("begin consume budget", e))?;

        for u in usage {
            let res = sqlx::query(
                r#"
UPDATE experiment_budgets
SET used = used + $5
WHERE tenant_id = $1 AND experiment_id = $2 AND platform = $3 AND dimension = $4
"#,
            )
            .bind(tenant_id.0)
            .bind(experiment_id)
            .bind(&u.platform)
            .bind(&u.dimension)
            .bind(u.amount)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::backend("consume budget", e))?;

            if res.rows_affected() == 0 {
                tx.rollback()
                    .await
                    .map_err(|e| Error::backend("rollback consume budget", e))?;
                return Err(Error::UnknownBudgetDimension {
                    platform: u.platform.clone(),
                    dimension: u.dimension.clone(),
                });
            }
        }

        tx.commit()
            .await
            .map_err(|e| Error::backend("commit consume budget", e))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(id = %outcome.id))]
    async fn append_outcome(&self, outcome: &OutcomeRecord) -> Result<()> {
        sqlx::query(
            r#"
INSERT INTO experiment_outcomes (id, tenant_id, experiment_id, outcome_path, created_at)
VALUES ($1, $2, $3, $4, $5)
"#,
        )
        .bind(outcome.id)
        .bind(outcome.tenant_id.0)
        .bind(outcome.experiment_id)
        .bind(&outcome.outcome_path)
        .bind(outcome.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::backend("append outcome", e))?;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_outcomes(
        &self,
        tenant_id: TenantId,
        experiment_id: Uuid,
    ) -> Result<Vec<OutcomeRecord>> {
        let rows = sqlx::query(
            r#"
SELECT id, tenant_id, experiment_id, outcome_path, created_at
FROM experiment_outcomes
WHERE tenant_id = $1 AND experiment_id = $2
ORDER BY seq ASC
"#,
        )
        .bind(tenant_id.0)
        .bind(experiment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::backend("list outcomes", e))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(OutcomeRecord {
                id: row.try_get("id").map_err(|e| Error::backend("id", e))?,
                tenant_id: TenantId(
                    row.try_get::<Uuid, _>("tenant_id")
                        .map_err(|e| Error::backend("tenant_id", e))?,
                ),
                experiment_id: row
                    .try_get("experiment_id")
                    .map_err(|e| Error::backend("experiment_id", e))?,
                outcome_path: row
                    .try_get("outcome_path")
                    .map_err(|e| Error::backend("outcome_path", e))?,
                created_at: row
                    .try_get("created_at")
                    .map_err(|e| Error::backend("created_at", e))?,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::memory::MemoryBlobStore;
    use crate::experiments::models::{BudgetAllocation, BudgetConfig, ExperimentConfig};
    use crate::experiments::pipeline::ExperimentPipeline;
    use crate::test_support::TestInfra;
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn postgres_pipeline_and_ledger() {
        let Some(infra) = TestInfra::from_env().await else {
            return;
        };
        let db = Arc::new(PostgresExperimentDb::new(infra.pool().await));
        let pipeline = ExperimentPipeline::new(db.clone(), Arc::new(MemoryBlobStore::new()));
        let tenant = TenantId::new();

        let exp = pipeline
            .begin_experiment(
                tenant,
                Uuid::new_v4(),
                ExperimentConfig {
                    name: "pg ledger".to_string(),
                    notes: None,
                    budget: BudgetConfig {
                        strategy: BudgetStrategy::HardCap,
                        allocations: vec![BudgetAllocation {
                            platform: "openai".to_string(),
                            dimension: "tokens".to_string(),
                            total: Decimal::new(100050, 2),
                            unit: "tokens".to_string(),
                        }],
                    },
                    metadata: Default::default(),
                },
            )
            .await
            .unwrap();

        let summary = pipeline
            .consume_budget(
                tenant,
                exp.id,
                &[BudgetUsage {
                    platform: "openai".to_string(),
                    dimension: "tokens".to_string(),
                    amount: Decimal::new(25, 2),
                }],
            )
            .await
            .unwrap();
        assert_eq!(summary.entries[0].remaining, Decimal::new(100025, 2));

        let err = pipeline
            .consume_budget(
                tenant,
                exp.id,
                &[
                    BudgetUsage {
                        platform: "openai".to_string(),
                        dimension: "tokens".to_string(),
                        amount: Decimal::ONE,
                    },
                    BudgetUsage {
                        platform: "openai".to_string(),
                        dimension: "images".to_string(),
                        amount: Decimal::ONE,
                    },
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownBudgetDimension { .. }));
        let after = pipeline.budget_summary(tenant, exp.id).await.unwrap();
        assert_eq!(after.entries[0].used, Decimal::new(25, 2));

        let req = pipeline
            .submit_for_analysis(tenant, exp.id, json!({"html": "<p/>"}))
            .await
            .unwrap();
        pipeline
            .prepare_analysis_context(tenant, req.id)
            .await
            .unwrap();
        let stale = AnalysisRequest {
            status: AnalysisStatus::ContextPrepared,
            version: req.version + 1,
            ..req.clone()
        };
        assert_eq!(
            db.advance_analysis_request(AnalysisStatus::Pending, &stale)
                .await
                .unwrap(),
            0
        );

        pipeline.record_outcome(tenant, exp.id, json!({"n": 1})).await.unwrap();
        pipeline.record_outcome(tenant, exp.id, json!({"n": 2})).await.unwrap();
        assert_eq!(pipeline.list_outcomes(tenant, exp.id).await.unwrap().len(), 2);

        assert_eq!(pipeline.complete_experiment(tenant, exp.id).await.unwrap(), None);
        assert_eq!(
            db.update_status(tenant, exp.id, 1, ExperimentStatus::Failed, Utc::now())
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn postgres_concurrent_consumers_lose_no_updates() {
        let Some(infra) = TestInfra::from_env().await else {
            return;
        };
        let pipeline = ExperimentPipeline::new(
            Arc::new(PostgresExperimentDb::new(infra.pool().await)),
            Arc::new(MemoryBlobStore::new()),
        );
        let tenant = TenantId::new();
        let exp = pipeline
            .begin_experiment(
                tenant,
                Uuid::new_v4(),
                ExperimentConfig {
                    name: "pg contention".to_string(),
                    notes: None,
                    budget: BudgetConfig {
                        strategy: BudgetStrategy::SoftLimit,
                        allocations: vec![BudgetAllocation {
                            platform: "browserbase".to_string(),
                            dimension: "minutes".to_string(),
                            total: Decimal::from(100),
                            unit: "min".to_string(),
                        }],
                    },
                    metadata: Default::default(),
                },
            )
            .await
            .unwrap();

        let experiment_id = exp.id;
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let pipeline = pipeline.clone();
            tasks.push(tokio::spawn(async move {
                pipeline
                    .consume_budget(
                        tenant,
                        experiment_id,
                        &[BudgetUsage {
                            platform: "browserbase".to_string(),
                            dimension: "minutes".to_string(),
                            amount: Decimal::ONE,
                        }],
                    )
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        let summary = pipeline.budget_summary(tenant, exp.id).await.unwrap();
        assert_eq!(summary.entries[0].used, Decimal::from(16));
    }
}
