use crate::Result;
use crate::scheduler::models::SourceSchedule;
use crate::scheduler::traits::ScheduleStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Per-instance schedule map. Concurrent writers to one source are last-write-wins.
#[derive(Clone, Default)]
pub struct MemoryScheduleStore {
    inner: Arc<RwLock<HashMap<Uuid, SourceSchedule>>>,
}

impl MemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleStore for MemoryScheduleStore {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn get(&self, source_id: Uuid) -> Result<Option<SourceSchedule>> {
        Ok(self.inner.read().await.get(&source_id).cloned())
    }

    #[tracing::instrument(level = "debug", skip_all, fields(source_id = %schedule.source_id))]
    async fn put(&self, schedule: &SourceSchedule) -> Result<()> {
        self.inner
            .write()
            .await
            .insert(schedule.source_id, schedule.clone());
        Ok(())
    }
}
