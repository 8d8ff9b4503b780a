use crate::experiments::models::{
    AnalysisRequest, AnalysisStatus, BudgetEntry, BudgetUsage, Experiment, ExperimentPhase,
    ExperimentStatus, OutcomeRecord,
};
use crate::experiments::traits::ExperimentDb;
use crate::models::TenantId;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    experiments: HashMap<Uuid, Experiment>,
    requests: HashMap<Uuid, AnalysisRequest>,
    budgets: Vec<(TenantId, BudgetEntry)>,
    outcomes: Vec<OutcomeRecord>,
}

/// In-memory `ExperimentDb`. One lock covers all tables so multi-row writes are atomic.
#[derive(Clone, Default)]
pub struct MemoryExperimentDb {
    state: Arc<RwLock<State>>,
}

impl MemoryExperimentDb {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExperimentDb for MemoryExperimentDb {
    #[tracing::instrument(level = "debug", skip_all, fields(id = %experiment.id))]
    async fn insert_experiment(
        &self,
        experiment: &Experiment,
        budget: &[BudgetEntry],
    ) -> Result<()> {
        let mut state = self.state.write().await;
        if state.experiments.contains_key(&experiment.id) {
            return Err(Error::Conflict(format!(
                "experiment {} already exists",
                experiment.id
            )));
        }
        state.experiments.insert(experiment.id, experiment.clone());
        for entry in budget {
            state.budgets.push((experiment.tenant_id, entry.clone()));
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_experiment(&self, tenant_id: TenantId, id: Uuid) -> Result<Option<Experiment>> {
        Ok(self
            .state
            .read()
            .await
            .experiments
            .get(&id)
            .filter(|e| e.tenant_id == tenant_id)
            .cloned())
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
        let mut state = self.state.write().await;
        let Some(exp) = state.experiments.get_mut(&id) else {
            return Ok(0);
        };
        if exp.tenant_id != tenant_id || exp.version != expected_version {
            return Ok(0);
        }
        exp.phase = phase;
        exp.version += 1;
        exp.updated_at = at;
        Ok(1)
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
        let mut state = self.state.write().await;
        let Some(exp) = state.experiments.get_mut(&id) else {
            return Ok(0);
        };
        if exp.tenant_id != tenant_id
            || exp.version != expected_version
            || exp.status != ExperimentStatus::Active
        {
            return Ok(0);
        }
        exp.status = status;
        exp.version += 1;
        exp.updated_at = at;
        Ok(1)
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
        let mut state = self.state.write().await;
        let Some(exp) = state.experiments.get_mut(&id) else {
            return Ok(0);
        };
        if exp.tenant_id != tenant_id || exp.version != expected_version {
            return Ok(0);
        }
        exp.program = Some(program.clone());
        exp.version += 1;
        exp.updated_at = at;
        Ok(1)
    }

    #[tracing::instrument(level = "debug", skip_all, fields(id = %request.id))]
    async fn insert_analysis_request(&self, request: &AnalysisRequest) -> Result<()> {
        let mut state = self.state.write().await;
        if state.requests.contains_key(&request.id) {
            return Err(Error::Conflict(format!(
                "analysis request {} already exists",
                request.id
            )));
        }
        state.requests.insert(request.id, request.clone());
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_analysis_request(
        &self,
        tenant_id: TenantId,
        id: Uuid,
    ) -> Result<Option<AnalysisRequest>> {
        Ok(self
            .state
            .read()
            .await
            .requests
            .get(&id)
            .filter(|r| r.tenant_id == tenant_id)
            .cloned())
    }

    #[tracing::instrument(level = "debug", skip(self, next), fields(id = %next.id))]
    async fn advance_analysis_request(
        &self,
        from: AnalysisStatus,
        next: &AnalysisRequest,
    ) -> Result<u64> {
        let mut state = self.state.write().await;
        let Some(current) = state.requests.get_mut(&next.id) else {
            return Ok(0);
        };
        if current.tenant_id != next.tenant_id
            || current.status != from
            || current.version != next.version - 1
        {
            return Ok(0);
        }
        current.status = next.status;
        current.context_path = next.context_path.clone();
        current.verdict_path = next.verdict_path.clone();
        current.version = next.version;
        current.updated_at = next.updated_at;
        Ok(1)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_budget(
        &self,
        tenant_id: TenantId,
        experiment_id: Uuid,
    ) -> Result<Vec<BudgetEntry>> {
        let state = self.state.read().await;
        let mut out: Vec<BudgetEntry> = state
            .budgets
            .iter()
            .filter(|(t, e)| *t == tenant_id && e.experiment_id == experiment_id)
            .map(|(_, e)| e.clone())
            .collect();
        out.sort_by(|a, b| (&a.platform, &a.dimension).cmp(&(&b.platform, &b.dimension)));
        Ok(out)
    }

    #[tracing::instrument(level = "debug", skip(self, usage))]
    async fn consume_budget(
        &self,
        tenant_id: TenantId,
        experiment_id: Uuid,
        usage: &[BudgetUsage],
    ) -> Result<()> {
        let mut state = self.state.write().await;

        // Resolve every line before touching any of them.
        let mut targets = Vec::with_capacity(usage.len());
        for u in usage {
            let idx = state
                .budgets
                .iter()
                .position(|(t, e)| {
                    *t == tenant_id
                        && e.experiment_id == experiment_id
                        && e.platform == u.platform
                        && e.dimension == u.dimension
                })
                .ok_or_else(|| Error::UnknownBudgetDimension {
                    platform: u.platform.clone(),
                    dimension: u.dimension.clone(),
                })?;
            targets.push((idx, u.amount));
        }
        for (idx, amount) in targets {
            state.budgets[idx].1.used += amount;
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(id = %outcome.id))]
    async fn append_outcome(&self, outcome: &OutcomeRecord) -> Result<()> {
        let mut state = self.state.write().await;
        if state.outcomes.iter().any(|o| o.id == outcome.id) {
            return Err(Error::Conflict(format!("outcome {} already exists", outcome.id)));
        }
        state.outcomes.push(outcome.clone());
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn list_outcomes(
        &self,
        tenant_id: TenantId,
        experiment_id: Uuid,
    ) -> Result<Vec<OutcomeRecord>> {
        Ok(self
            .state
            .read()
            .await
            .outcomes
            .iter()
            .filter(|o| o.tenant_id == tenant_id && o.experiment_id == experiment_id)
            .cloned()
            .collect())
    }
}
