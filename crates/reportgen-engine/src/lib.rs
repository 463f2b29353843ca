//! Report Generator Engine
//!
//! ```text
//! generate(request) ─▶ Received ─▶ Fetching ─▶ Processing ─▶ Rendering ─┬─▶ Completed
//!                         │        (fan-out,                            └─▶ Delivering ─▶ Completed
//!                         │         join all)
//!                         └──────────── any step ───────────▶ Failed
//! ```
//!
//! `generate` returns a [`ReportHandle`] at once; the run continues on a
//! spawned task and is observed through [`ReportEngine::status`] or
//! [`ReportEngine::wait`]. Concurrent runs share nothing mutable except the
//! processor's fetch cache.
//!
//! Finished runs and their artifacts stay until [`ReportEngine::forget`] or
//! until `retention_secs` has passed since they finished.

pub mod engine;
pub mod state;
pub mod status;
pub mod store;

pub use engine::{ReportEngine, ReportEngineBuilder};
pub use state::ReportState;
pub use status::{ReportHandle, ReportStatus, StateChange, StatusRegistry};
pub use store::{ArtifactStore, InMemoryArtifactStore};

pub use reportgen_core::{
    Artifact, ArtifactRef, EngineConfig, ErrorKind, OutputFormat, ReportError, ReportRequest,
    SourceConfig, TemplateRef,
};
pub use reportgen_delivery::DeliveryOutcome;
