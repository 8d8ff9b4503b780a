use crate::Result;
use crate::experiments::models::{
    AnalysisRequest, AnalysisStatus, BudgetEntry, BudgetUsage, Experiment, ExperimentPhase,
    ExperimentStatus, OutcomeRecord,
};
use crate::models::TenantId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Relational backend for experiments, analysis requests, the budget ledger and the
/// outcome log.
///
/// Conditional writes return rows affected; zero means the predicate did not match
/// and nothing changed.
#[async_trait]
pub trait ExperimentDb: Send + Sync {
    /// Insert the experiment and its ledger rows in one unit of work.
    async fn insert_experiment(&self, experiment: &Experiment, budget: &[BudgetEntry])
    -> Result<()>;

    async fn get_experiment(&self, tenant_id: TenantId, id: Uuid) -> Result<Option<Experiment>>;

    /// `SET phase, version = version + 1 WHERE version = expected_version`.
    async fn update_phase(
        &self,
        tenant_id: TenantId,
        id: Uuid,
        expected_version: i64,
        phase: ExperimentPhase,
        at: DateTime<Utc>,
    ) -> Result<u64>;

    /// `SET status, version = version + 1 WHERE version = expected_version AND status = 'active'`.
    async fn update_status(
        &self,
        tenant_id: TenantId,
        id: Uuid,
        expected_version: i64,
        status: ExperimentStatus,
        at: DateTime<Utc>,
    ) -> Result<u64>;

    async fn record_program(
        &self,
        tenant_id: TenantId,
        id: Uuid,
        expected_version: i64,
        program: &serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<u64>;

    async fn insert_analysis_request(&self, request: &AnalysisRequest) -> Result<()>;

    async fn get_analysis_request(
        &self,
        tenant_id: TenantId,
        id: Uuid,
    ) -> Result<Option<AnalysisRequest>>;

    /// Write `next`'s status and paths if the stored row is still at `from` and
    /// `next.version - 1`.
    async fn advance_analysis_request(
        &self,
        from: AnalysisStatus,
        next: &AnalysisRequest,
    ) -> Result<u64>;

    /// Ledger rows for one experiment, ordered by `(platform, dimension)`.
    async fn list_budget(&self, tenant_id: TenantId, experiment_id: Uuid)
    -> Result<Vec<BudgetEntry>>;

    /// Add each `amount` to `used` atomically. An unknown `(platform, dimension)`
    /// aborts the whole call with `Error::UnknownBudgetDimension` and no effect.
    async fn consume_budget(
        &self,
        tenant_id: TenantId,
        experiment_id: Uuid,
        usage: &[BudgetUsage],
    ) -> Result<()>;

    async fn append_outcome(&self, outcome: &OutcomeRecord) -> Result<()>;

    /// Outcomes in insertion order.
    async fn list_outcomes(
        &self,
        tenant_id: TenantId,
        experiment_id: Uuid,
    ) -> Result<Vec<OutcomeRecord>>;
}
