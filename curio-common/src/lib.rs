//! # Curio Common Library
//!
//! Shared code for the Curio data-curation console services including:
//! - Criterion and analysis-result models (`criteria`)
//! - Job commands and typed push events (`events`)
//! - Real-time topic vocabulary and payload decoding (`topics`)
//! - The boolean query grammar codec (`query`)
//! - Bootstrap configuration loading (`config`)

pub mod config;
pub mod criteria;
pub mod error;
pub mod events;
pub mod query;
pub mod topics;

pub use criteria::{
    AnalysisResult, CriteriaKind, CriterionState, FileTarget, JobOperation, ProjectCriterion, RunAction,
};
pub use error::{Error, Result};
pub use events::{
    CurioEvent, EventBus, JobCommand, JobKind, OutboundCommand, PushEvent, PushSignal, SurfaceKind,
};
