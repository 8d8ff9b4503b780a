pub mod memory;
pub mod models;
pub mod pipeline;
pub mod postgres;
pub mod traits;

pub use models::{
    AnalysisContext, AnalysisRequest, AnalysisStatus, BudgetAllocation, BudgetConfig,
    BudgetEntry, BudgetLine, BudgetStrategy, BudgetSummary, BudgetUsage, Experiment,
    ExperimentConfig, ExperimentPhase, ExperimentStatus, OutcomeRecord,
};
pub use pipeline::ExperimentPipeline;
pub use traits::ExperimentDb;
