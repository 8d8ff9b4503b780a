//! Unlock core library: tenant-scoped lifecycle store, experiment pipeline with budget
//! ledger and blob content store, and the navigation scheduler.

pub mod blob;
pub mod captures;
pub mod config;
pub mod error;
pub mod events;
pub mod experiments;
pub mod lifecycle;
pub mod models;
pub mod o11y;
pub mod postgres;
pub mod scheduler;
pub mod sources;

#[cfg(test)]
mod test_support;

pub use blob::{BlobStore, PutMode};
pub use captures::CaptureAccess;
pub use config::{BlobConfig, PostgresConfig, S3Config, SchedulerConfig, SourceAccessConfig, UnlockConfig};
pub use error::{Error, Result};
pub use events::EventAccess;
pub use experiments::{ExperimentDb, ExperimentPipeline};
pub use lifecycle::{LifecycleStore, ResourceDb};
pub use models::{Metadata, TenantId};
pub use scheduler::{NavigationScheduler, ScheduleStore};
pub use sources::SourceAccess;
