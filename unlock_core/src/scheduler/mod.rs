pub mod engine;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod traits;

pub use engine::NavigationScheduler;
pub use models::{CadenceAdjustment, CadenceFrequency, RosterEntry, SourceSchedule};
pub use traits::ScheduleStore;
