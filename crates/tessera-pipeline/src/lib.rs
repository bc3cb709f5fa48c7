// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # tessera-pipeline
//!
//! The dynamic code ingestion and execution pipeline behind the
//! tessera canvas host. Component source text arriving from any origin
//! — AI generation, remote import, or the built-in library — is
//! processed into one uniform kind of loadable unit:
//!
//! 1. **Detect** the module dialect (standard module vs. legacy bare
//!    script; legacy sources are wrapped with a synthetic default
//!    export).
//! 2. **Rewrite** external dependency references to fully resolvable
//!    registry locators, leaving the configured singleton set for
//!    host-level redirection, and inserting imports for framework
//!    hooks the source uses implicitly.
//! 3. **Transpile** inline markup into plain nested factory calls.
//! 4. **Cache** compiled units by content hash with LRU eviction and
//!    in-flight coalescing.
//! 5. **Load** through the [`ModuleHost`] seam, returning the
//!    default-export constructor and a revocable loadable reference.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use tessera_pipeline::{
//!     ComponentRecord, Origin, Pipeline, PipelineConfig, RedirectionTable, RequestOptions,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::new(vec!["react".into(), "react-dom".into()]);
//!     let mut redirections = RedirectionTable::new();
//!     redirections.bind("react", "host:react");
//!     redirections.bind("react-dom", "host:react-dom");
//!
//!     let pipeline = Pipeline::new(config, my_engine_host, redirections);
//!     let mut record = ComponentRecord::new(
//!         Origin::Generated { prompt: None },
//!         "const Card = () => <div>Hi</div>;",
//!     );
//!     let executable = pipeline
//!         .request_executable(&mut record, RequestOptions::default())
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! Rewriting and transpilation are purely textual; source text is
//! never executed before the host loads it. Loaded code shares the
//! host's privilege level — this crate is not a sandbox.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod detect;
pub mod error;
pub mod loader;
pub mod pipeline;
pub mod record;
pub mod rewrite;
mod scan;
pub mod transpile;

// Re-exports
pub use cache::{CacheEntry, CacheManager};
pub use config::{DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_REGISTRY_BASE, PipelineConfig, RequestOptions};
pub use detect::{Dialect, detect, wrap_legacy};
pub use error::{PipelineError, Result, SourceSpan};
pub use loader::{
    Executable, HostFailure, LoadContext, LoadableRef, MaterializedUnit, ModuleHost, ModuleLoader,
    ModuleStore, RedirectionTable,
};
pub use pipeline::{CompiledUnit, Pipeline, compile_source};
pub use record::{CompileMetrics, ComponentRecord, ContentHash, Origin, RecordId};
pub use rewrite::{FRAMEWORK_HOOKS, ImportDecl, RewriteOutcome, rewrite_imports, scan_imports};
pub use transpile::MarkupTranspiler;

/// Version of the pipeline crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
