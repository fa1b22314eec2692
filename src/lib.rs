//! Focus Flux - On-device engagement monitoring engine
//!
//! Flux turns per-frame attention signals into engagement states and
//! per-session analytics through a deterministic pipeline: signal adaptation
//! → hysteresis classification → scoring → session aggregation → encoding.
//!
//! ## Modules
//!
//! - **Classifier**: time-based hysteresis over eyes, mouth, gaze and presence
//!   with a weighted 0-100 score and rolling history
//! - **Session**: lifecycle, pause handling, nudge gating and per-session records
//! - **Runner**: tokio tick loop driving a processor from a signal source

pub mod adapter;
pub mod classifier;
pub mod config;
pub mod encoder;
pub mod error;
pub mod history;
pub mod pipeline;
pub mod runner;
pub mod session;
pub mod store;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use adapter::{
    DetectorSource, FaceDetector, HandDetector, ObservationFrame, SignalAdapter, SignalSource,
};
pub use classifier::EngagementClassifier;
pub use config::{ConfigPatch, EngagementConfig};
pub use encoder::{SessionEncoder, AGGREGATE_SCHEMA_VERSION};
pub use error::FocusError;
pub use pipeline::{replay_to_aggregate, FocusProcessor, TickOutcome};
pub use runner::SessionRunner;
pub use session::SessionAggregator;
pub use store::{InMemorySessionStore, SessionStore, StoreError};
pub use types::{EngagementMetrics, EngagementState, FrameSample, SessionAggregate};

/// Flux version embedded in all session aggregates
pub const FLUX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for session aggregates
pub const PRODUCER_NAME: &str = "focus-flux";
