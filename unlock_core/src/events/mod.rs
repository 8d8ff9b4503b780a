pub mod access;
pub mod models;

pub use access::EventAccess;
pub use models::{Event, EventData, EventFields, EventSchedule, EventStatus};
