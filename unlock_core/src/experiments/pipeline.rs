use crate::blob::{self, BlobStore, PutMode, paths};
use crate::experiments::models::{
    AnalysisContext, AnalysisRequest, AnalysisStatus, BudgetEntry, BudgetLine, BudgetSummary,
    BudgetUsage, ContextExperiment, Experiment, ExperimentConfig, ExperimentPhase,
    ExperimentStatus, OutcomeRecord,
};
use crate::experiments::traits::ExperimentDb;
use crate::models::TenantId;
use crate::{Error, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

const EXPERIMENT: &str = "experiment";
const ANALYSIS_REQUEST: &str = "analysis_request";

/// Experiment lifecycle, analysis hand-off stages, budget ledger and outcome log.
///
/// Every stage writes its blob first and advances the relational row second. A failed
/// upload leaves the row untouched; a failed row update leaves an unreferenced blob.
#[derive(Clone)]
pub struct ExperimentPipeline {
    db: Arc<dyn ExperimentDb>,
    blobs: Arc<dyn BlobStore>,
}

impl ExperimentPipeline {
    pub fn new(db: Arc<dyn ExperimentDb>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { db, blobs }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_experiment(&self, tenant_id: TenantId, experiment_id: Uuid) -> Result<Experiment> {
        self.db
            .get_experiment(tenant_id, experiment_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("experiment {experiment_id}")))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_analysis_request(
        &self,
        tenant_id: TenantId,
        analysis_id: Uuid,
    ) -> Result<AnalysisRequest> {
        self.db
            .get_analysis_request(tenant_id, analysis_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("analysis request {analysis_id}")))
    }

    #[tracing::instrument(level = "info", skip(self, config), fields(name = %config.name))]
    pub async fn begin_experiment(
        &self,
        tenant_id: TenantId,
        source_id: Uuid,
        config: ExperimentConfig,
    ) -> Result<Experiment> {
        config.validate()?;
        let now = Utc::now();
        let experiment = Experiment {
            id: Uuid::new_v4(),
            tenant_id,
            source_id,
            name: config.name,
            notes: config.notes,
            version: 1,
            phase: ExperimentPhase::Exploration,
            status: ExperimentStatus::Active,
            budget_strategy: config.budget.strategy,
            program: None,
            metadata: config.metadata,
            created_at: now,
            updated_at: now,
        };
        let budget: Vec<BudgetEntry> = config
            .budget
            .allocations
            .into_iter()
            .map(|a| BudgetEntry {
                experiment_id: experiment.id,
                platform: a.platform,
                dimension: a.dimension,
                total: a.total,
                used: Decimal::ZERO,
                unit: a.unit,
            })
            .collect();

        self.db.insert_experiment(&experiment, &budget).await?;
        tracing::info!(experiment_id = %experiment.id, lines = budget.len(), "experiment begun");
        Ok(experiment)
    }

    #[tracing::instrument(level = "info", skip(self, snapshot))]
    pub async fn submit_for_analysis(
        &self,
        tenant_id: TenantId,
        experiment_id: Uuid,
        snapshot: serde_json::Value,
    ) -> Result<AnalysisRequest> {
        let experiment = self.get_experiment(tenant_id, experiment_id).await?;
        let snapshot_path = paths::snapshot(experiment.id, Uuid::new_v4());
        blob::upload_json(
            self.blobs.as_ref(),
            tenant_id,
            &snapshot_path,
            &snapshot,
            PutMode::Create,
        )
        .await?;

        let now = Utc::now();
        let request = AnalysisRequest {
            id: Uuid::new_v4(),
            tenant_id,
            experiment_id: experiment.id,
            version: 1,
            status: AnalysisStatus::Pending,
            snapshot_path,
            context_path: None,
            verdict_path: None,
            created_at: now,
            updated_at: now,
        };
        self.db.insert_analysis_request(&request).await?;
        Ok(request)
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn prepare_analysis_context(
        &self,
        tenant_id: TenantId,
        analysis_id: Uuid,
    ) -> Result<AnalysisContext> {
        let request = self.get_analysis_request(tenant_id, analysis_id).await?;
        require_stage(&request, AnalysisStatus::ContextPrepared)?;

        let experiment = self.get_experiment(tenant_id, request.experiment_id).await?;
        let budget = self.db.list_budget(tenant_id, experiment.id).await?;
        let snapshot: serde_json::Value =
            blob::download_json(self.blobs.as_ref(), tenant_id, &request.snapshot_path).await?;

        let context = AnalysisContext {
            experiment: ContextExperiment {
                name: experiment.name,
                notes: experiment.notes,
                phase: experiment.phase,
                budget_strategy: experiment.budget_strategy,
                program: experiment.program,
            },
            budget: budget.iter().map(BudgetLine::from).collect(),
            snapshot,
        };
        let context_path = paths::context(request.experiment_id, request.id, Uuid::new_v4());
        blob::upload_json(
            self.blobs.as_ref(),
            tenant_id,
            &context_path,
            &context,
            PutMode::Create,
        )
        .await?;

        let next = AnalysisRequest {
            status: AnalysisStatus::ContextPrepared,
            context_path: Some(context_path),
            ..request.clone()
        };
        self.advance(&request, next).await?;
        Ok(context)
    }

    #[tracing::instrument(level = "info", skip(self, decision))]
    pub async fn provide_verdict(
        &self,
        tenant_id: TenantId,
        analysis_id: Uuid,
        decision: serde_json::Value,
    ) -> Result<()> {
        let request = self.get_analysis_request(tenant_id, analysis_id).await?;
        require_stage(&request, AnalysisStatus::VerdictProvided)?;

        let verdict_path = paths::verdict(request.experiment_id, request.id, Uuid::new_v4());
        blob::upload_json(
            self.blobs.as_ref(),
            tenant_id,
            &verdict_path,
            &decision,
            PutMode::Create,
        )
        .await?;

        let next = AnalysisRequest {
            status: AnalysisStatus::VerdictProvided,
            verdict_path: Some(verdict_path),
            ..request.clone()
        };
        self.advance(&request, next).await
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn accept_verdict(
        &self,
        tenant_id: TenantId,
        analysis_id: Uuid,
    ) -> Result<serde_json::Value> {
        let request = self.get_analysis_request(tenant_id, analysis_id).await?;
        require_stage(&request, AnalysisStatus::Accepted)?;

        let verdict_path = request.verdict_path.clone().ok_or_else(|| {
            Error::BackendMessage(format!("analysis request {analysis_id} has no verdict path"))
        })?;
        let verdict: serde_json::Value =
            blob::download_json(self.blobs.as_ref(), tenant_id, &verdict_path).await?;

        let next = AnalysisRequest {
            status: AnalysisStatus::Accepted,
            ..request.clone()
        };
        self.advance(&request, next).await?;
        Ok(verdict)
    }

    #[tracing::instrument(level = "info", skip(self, outcome))]
    pub async fn record_outcome(
        &self,
        tenant_id: TenantId,
        experiment_id: Uuid,
        outcome: serde_json::Value,
    ) -> Result<OutcomeRecord> {
        let experiment = self.get_experiment(tenant_id, experiment_id).await?;
        let id = Uuid::new_v4();
        let outcome_path = paths::outcome(experiment.id, id);
        blob::upload_json(
            self.blobs.as_ref(),
            tenant_id,
            &outcome_path,
            &outcome,
            PutMode::Create,
        )
        .await?;

        let record = OutcomeRecord {
            id,
            tenant_id,
            experiment_id: experiment.id,
            outcome_path,
            created_at: Utc::now(),
        };
        self.db.append_outcome(&record).await?;
        Ok(record)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn list_outcomes(
        &self,
        tenant_id: TenantId,
        experiment_id: Uuid,
    ) -> Result<Vec<OutcomeRecord>> {
        let experiment = self.get_experiment(tenant_id, experiment_id).await?;
        self.db.list_outcomes(tenant_id, experiment.id).await
    }

    /// Move the experiment forward to `phase`. Re-requesting the current phase is a no-op.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn advance_phase(
        &self,
        tenant_id: TenantId,
        experiment_id: Uuid,
        phase: ExperimentPhase,
    ) -> Result<()> {
        let experiment = self.get_experiment(tenant_id, experiment_id).await?;
        if experiment.status != ExperimentStatus::Active {
            return Err(Error::invalid_transition(
                EXPERIMENT,
                experiment.status.as_str(),
                phase.as_str(),
            ));
        }
        if experiment.phase == phase {
            return Ok(());
        }
        if phase < experiment.phase {
            return Err(Error::invalid_transition(
                EXPERIMENT,
                experiment.phase.as_str(),
                phase.as_str(),
            ));
        }

        let affected = self
            .db
            .update_phase(tenant_id, experiment.id, experiment.version, phase, Utc::now())
            .await?;
        if affected == 0 {
            return Err(Error::conflict_at(EXPERIMENT, experiment.id, experiment.version));
        }
        Ok(())
    }

    #[tracing::instrument(level = "info", skip(self, program))]
    pub async fn record_program(
        &self,
        tenant_id: TenantId,
        experiment_id: Uuid,
        program: serde_json::Value,
    ) -> Result<()> {
        let experiment = self.get_experiment(tenant_id, experiment_id).await?;
        let affected = self
            .db
            .record_program(tenant_id, experiment.id, experiment.version, &program, Utc::now())
            .await?;
        if affected == 0 {
            return Err(Error::conflict_at(EXPERIMENT, experiment.id, experiment.version));
        }
        Ok(())
    }

    /// Close an active experiment and hand back its recorded program, if any.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn complete_experiment(
        &self,
        tenant_id: TenantId,
        experiment_id: Uuid,
    ) -> Result<Option<serde_json::Value>> {
        let experiment = self.get_experiment(tenant_id, experiment_id).await?;
        if experiment.status != ExperimentStatus::Active {
            return Err(Error::invalid_transition(
                EXPERIMENT,
                experiment.status.as_str(),
                ExperimentStatus::Completed.as_str(),
            ));
        }
        self.close(&experiment, ExperimentStatus::Completed).await?;
        Ok(experiment.program)
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn cancel_experiment(&self, tenant_id: TenantId, experiment_id: Uuid) -> Result<()> {
        self.end_early(tenant_id, experiment_id, ExperimentStatus::Cancelled)
            .await
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn fail_experiment(&self, tenant_id: TenantId, experiment_id: Uuid) -> Result<()> {
        self.end_early(tenant_id, experiment_id, ExperimentStatus::Failed)
            .await
    }

    /// Charge usage against the ledger and return the refreshed summary.
    #[tracing::instrument(level = "info", skip(self, usage), fields(lines = usage.len()))]
    pub async fn consume_budget(
        &self,
        tenant_id: TenantId,
        experiment_id: Uuid,
        usage: &[BudgetUsage],
    ) -> Result<BudgetSummary> {
        if let Some(u) = usage.iter().find(|u| u.amount.is_sign_negative()) {
            return Err(Error::InvalidInput(format!(
                "budget usage {}/{} has a negative amount",
                u.platform, u.dimension
            )));
        }
        let experiment = self.get_experiment(tenant_id, experiment_id).await?;
        self.db
            .consume_budget(tenant_id, experiment.id, usage)
            .await?;
        self.summarize(&experiment).await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn budget_summary(
        &self,
        tenant_id: TenantId,
        experiment_id: Uuid,
    ) -> Result<BudgetSummary> {
        let experiment = self.get_experiment(tenant_id, experiment_id).await?;
        self.summarize(&experiment).await
    }

    async fn summarize(&self, experiment: &Experiment) -> Result<BudgetSummary> {
        let entries = self
            .db
            .list_budget(experiment.tenant_id, experiment.id)
            .await?;
        Ok(BudgetSummary {
            strategy: experiment.budget_strategy,
            entries: entries.iter().map(BudgetLine::from).collect(),
        })
    }

    async fn end_early(
        &self,
        tenant_id: TenantId,
        experiment_id: Uuid,
        target: ExperimentStatus,
    ) -> Result<()> {
        let experiment = self.get_experiment(tenant_id, experiment_id).await?;
        if experiment.status == target {
            return Ok(());
        }
        if experiment.status != ExperimentStatus::Active {
            return Err(Error::invalid_transition(
                EXPERIMENT,
                experiment.status.as_str(),
                target.as_str(),
            ));
        }
        self.close(&experiment, target).await
    }

    async fn close(&self, experiment: &Experiment, target: ExperimentStatus) -> Result<()> {
        let affected = self
            .db
            .update_status(
                experiment.tenant_id,
                experiment.id,
                experiment.version,
                target,
                Utc::now(),
            )
            .await?;
        if affected == 0 {
            return Err(Error::conflict_at(EXPERIMENT, experiment.id, experiment.version));
        }
        tracing::info!(experiment_id = %experiment.id, status = target.as_str(), "experiment closed");
        Ok(())
    }

    async fn advance(&self, current: &AnalysisRequest, mut next: AnalysisRequest) -> Result<()> {
        next.version = current.version + 1;
        next.updated_at = Utc::now();
        let affected = self
            .db
            .advance_analysis_request(current.status, &next)
            .await?;
        if affected == 0 {
            return Err(Error::conflict_at(ANALYSIS_REQUEST, current.id, current.version));
        }
        tracing::info!(
            analysis_id = %current.id,
            from = current.status.as_str(),
            to = next.status.as_str(),
            "analysis request advanced"
        );
        Ok(())
    }
}

fn require_stage(request: &AnalysisRequest, target: AnalysisStatus) -> Result<()> {
    if request.status.next() == Some(target) {
        Ok(())
    } else {
        Err(Error::invalid_transition(
            ANALYSIS_REQUEST,
            request.status.as_str(),
            target.as_str(),
        ))
    }
}
