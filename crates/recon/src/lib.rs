//! `leadgrid-recon` — Multi-source business-entity reconciliation engine.
//!
//! Pure engine crate: receives pre-collected records, clusters duplicates,
//! reconciles every field across sources and scores the result. Loading
//! helpers in [`ingest`] parse collector output; nothing else touches IO.

pub mod cancel;
pub mod cluster;
pub mod completeness;
pub mod confidence;
pub mod config;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod ingest;
pub mod matcher;
pub mod model;
pub mod normalize;
pub mod reconcile;
pub mod registry;

pub use cancel::Cancellation;
pub use config::ReconConfig;
pub use engine::{run, Pipeline, RunState};
pub use error::ReconError;
pub use model::{CanonicalEntity, RawRecord, ReconResult, ReconciledField, ReviewEntry};
pub use registry::SourceRegistry;
