//! # tessera-host
//!
//! Host-boundary adapters for the tessera component pipeline:
//!
//! - **Origin ingestion** — the three collaborators that hand source
//!   text to the pipeline (AI generation, remote-URL import, the
//!   built-in component library), each producing a `ComponentRecord`.
//! - **Reference host** — [`ProbingHost`], a structural
//!   implementation of the pipeline's `ModuleHost` seam that validates
//!   units and probes rewritten locators without evaluating code.
//!
//! Engine-backed canvas hosts implement `ModuleHost` themselves and
//! only use the ingestion half of this crate.

pub mod error;
pub mod ingest;
pub mod probe;

pub use error::{HostError, Result};
pub use ingest::{
    GeneratedSubmission, LibraryComponent, RemoteImporter, ingest_generated, ingest_library,
};
pub use probe::{ConstructorSpec, ProbingHost};
