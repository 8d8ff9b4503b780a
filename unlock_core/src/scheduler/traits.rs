use crate::Result;
use crate::scheduler::models::SourceSchedule;
use async_trait::async_trait;
use uuid::Uuid;

/// Persistence for per-source navigation schedules. `put` replaces the whole record.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn get(&self, source_id: Uuid) -> Result<Option<SourceSchedule>>;

    async fn put(&self, schedule: &SourceSchedule) -> Result<()>;
}
