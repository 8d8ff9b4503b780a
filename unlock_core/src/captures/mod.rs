pub mod access;
pub mod models;

pub use access::CaptureAccess;
pub use models::{
    Capture, CaptureFields, CaptureStatus, DriftSignal, EnvironmentDrift, ObservationBundle,
};
