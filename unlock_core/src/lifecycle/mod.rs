pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;
pub mod traits;

pub use models::{LifecycleStatus, Resource, ResourceKind, ResourceQuery, ResourceRow, SortOrder};
pub use store::LifecycleStore;
pub use traits::ResourceDb;
