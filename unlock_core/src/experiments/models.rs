use crate::models::{Metadata, TenantId};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Convergence phase. Ordering is the only legal direction of travel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentPhase {
    Exploration,
    Refinement,
    Optimization,
    Production,
}

impl ExperimentPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exploration => "exploration",
            Self::Refinement => "refinement",
            Self::Optimization => "optimization",
            Self::Production => "production",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "exploration" => Ok(Self::Exploration),
            "refinement" => Ok(Self::Refinement),
            "optimization" => Ok(Self::Optimization),
            "production" => Ok(Self::Production),
            other => Err(Error::BackendMessage(format!(
                "invalid experiment phase in db: {other}"
            ))),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl ExperimentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(Error::BackendMessage(format!(
                "invalid experiment status in db: {other}"
            ))),
        }
    }
}

/// Recorded with the experiment; the ledger itself does not enforce it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStrategy {
    HardCap,
    SoftLimit,
    Elastic,
}

impl BudgetStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HardCap => "hard_cap",
            Self::SoftLimit => "soft_limit",
            Self::Elastic => "elastic",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "hard_cap" => Ok(Self::HardCap),
            "soft_limit" => Ok(Self::SoftLimit),
            "elastic" => Ok(Self::Elastic),
            other => Err(Error::BackendMessage(format!(
                "invalid budget strategy in db: {other}"
            ))),
        }
    }
}

/// Analysis request stages, strictly in declaration order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Pending,
    ContextPrepared,
    VerdictProvided,
    Accepted,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::ContextPrepared => "context_prepared",
            Self::VerdictProvided => "verdict_provided",
            Self::Accepted => "accepted",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "context_prepared" => Ok(Self::ContextPrepared),
            "verdict_provided" => Ok(Self::VerdictProvided),
            "accepted" => Ok(Self::Accepted),
            other => Err(Error::BackendMessage(format!(
                "invalid analysis status in db: {other}"
            ))),
        }
    }

    /// The only stage reachable from this one.
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::ContextPrepared),
            Self::ContextPrepared => Some(Self::VerdictProvided),
            Self::VerdictProvided => Some(Self::Accepted),
            Self::Accepted => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetAllocation {
    pub platform: String,
    pub dimension: String,
    pub total: Decimal,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub strategy: BudgetStrategy,
    pub allocations: Vec<BudgetAllocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub name: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub budget: BudgetConfig,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ExperimentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidInput("experiment name is empty".to_string()));
        }
        let mut seen = HashSet::new();
        for a in &self.budget.allocations {
            if a.platform.trim().is_empty() || a.dimension.trim().is_empty() {
                return Err(Error::InvalidInput(
                    "budget allocation requires platform and dimension".to_string(),
                ));
            }
            if a.unit.trim().is_empty() {
                return Err(Error::InvalidInput(format!(
                    "budget allocation {}/{} has no unit",
                    a.platform, a.dimension
                )));
            }
            if a.total.is_sign_negative() {
                return Err(Error::InvalidInput(format!(
                    "budget allocation {}/{} has a negative total",
                    a.platform, a.dimension
                )));
            }
            if !seen.insert((a.platform.as_str(), a.dimension.as_str())) {
                return Err(Error::InvalidInput(format!(
                    "duplicate budget allocation {}/{}",
                    a.platform, a.dimension
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub source_id: Uuid,
    pub name: String,
    pub notes: Option<String>,
    pub version: i64,
    pub phase: ExperimentPhase,
    pub status: ExperimentStatus,
    pub budget_strategy: BudgetStrategy,
    /// Synthesized navigation program, once one has been recorded.
    pub program: Option<serde_json::Value>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub experiment_id: Uuid,
    pub version: i64,
    pub status: AnalysisStatus,
    pub snapshot_path: String,
    pub context_path: Option<String>,
    pub verdict_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetEntry {
    pub experiment_id: Uuid,
    pub platform: String,
    pub dimension: String,
    pub total: Decimal,
    pub used: Decimal,
    pub unit: String,
}

impl BudgetEntry {
    pub fn remaining(&self) -> Decimal {
        self.total - self.used
    }
}

/// Ledger line as reported to callers, with `remaining` derived at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetLine {
    pub platform: String,
    pub dimension: String,
    pub total: Decimal,
    pub used: Decimal,
    pub remaining: Decimal,
    pub unit: String,
}

impl From<&BudgetEntry> for BudgetLine {
    fn from(e: &BudgetEntry) -> Self {
        Self {
            platform: e.platform.clone(),
            dimension: e.dimension.clone(),
            total: e.total,
            used: e.used,
            remaining: e.remaining(),
            unit: e.unit.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetSummary {
    pub strategy: BudgetStrategy,
    pub entries: Vec<BudgetLine>,
}

impl BudgetSummary {
    pub fn line(&self, platform: &str, dimension: &str) -> Option<&BudgetLine> {
        self.entries
            .iter()
            .find(|l| l.platform == platform && l.dimension == dimension)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetUsage {
    pub platform: String,
    pub dimension: String,
    pub amount: Decimal,
}

/// Append-only pointer to an outcome blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub experiment_id: Uuid,
    pub outcome_path: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextExperiment {
    pub name: String,
    pub notes: Option<String>,
    pub phase: ExperimentPhase,
    pub budget_strategy: BudgetStrategy,
    pub program: Option<serde_json::Value>,
}

/// Document assembled by `prepare_analysis_context` and stored as the context blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisContext {
    pub experiment: ContextExperiment,
    pub budget: Vec<BudgetLine>,
    pub snapshot: serde_json::Value,
}
