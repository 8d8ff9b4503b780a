pub mod access;
pub mod models;

pub use access::SourceAccess;
pub use models::{NavigationBrief, OnboardOptions, Source, SourceCategory, SourceFields, SourceStatus};
