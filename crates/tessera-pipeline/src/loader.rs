// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module materialization and loading.
//!
//! Compiled text is materialized into an ephemeral, revocable
//! in-memory unit, then dynamically loaded through the [`ModuleHost`]
//! seam. Singleton resolution reaches the host through an explicit
//! [`RedirectionTable`] in the load context — a configuration input,
//! not ambient global state.

use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Backoff before the single retry of a failed load.
pub const LOAD_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Opaque, revocable reference to an ephemeral in-memory module.
///
/// The reference is a handle only; the unit itself lives in the
/// [`ModuleStore`] until revoked. Never persisted across sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoadableRef(Uuid);

impl LoadableRef {
    /// The underlying unit id.
    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for LoadableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loadable:{}", self.0)
    }
}

/// In-memory store of materialized units.
#[derive(Debug, Default)]
pub struct ModuleStore {
    units: DashMap<LoadableRef, Arc<str>>,
}

impl ModuleStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Materialize compiled text into an ephemeral unit. The returned
    /// reference stays valid until revoked.
    pub fn materialize(&self, compiled_source: &str) -> LoadableRef {
        let loadable = LoadableRef(Uuid::new_v4());
        self.units.insert(loadable.clone(), Arc::from(compiled_source));
        tracing::debug!(%loadable, bytes = compiled_source.len(), "materialized unit");
        loadable
    }

    /// The unit's compiled text, or `None` once revoked.
    pub fn source(&self, loadable: &LoadableRef) -> Option<Arc<str>> {
        self.units.get(loadable).map(|entry| Arc::clone(entry.value()))
    }

    /// Revoke a unit, freeing its text.
    ///
    /// Returns `false` when the reference was already revoked — each
    /// reference must be revoked exactly once (on cache eviction or on
    /// record destruction, never both), so a `false` here means the
    /// call site holds a stale reference.
    pub fn revoke(&self, loadable: &LoadableRef) -> bool {
        let live = self.units.remove(loadable).is_some();
        if live {
            tracing::debug!(%loadable, "revoked unit");
        } else {
            tracing::warn!(%loadable, "revoke of already-revoked loadable reference");
        }
        live
    }

    /// Whether a reference is still backed by a unit.
    pub fn is_live(&self, loadable: &LoadableRef) -> bool {
        self.units.contains_key(loadable)
    }

    /// Number of live units.
    pub fn live_count(&self) -> usize {
        self.units.len()
    }
}

/// Host-level redirection for singleton specifiers.
///
/// Maps a specifier (or a sub-path of one) to the host's key for its
/// shared runtime instance. Passed into every load so singleton
/// resolution is explicit configuration rather than a process-wide
/// global.
#[derive(Debug, Clone, Default)]
pub struct RedirectionTable {
    bindings: HashMap<String, String>,
}

impl RedirectionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a specifier to the host's module key.
    pub fn bind(&mut self, specifier: impl Into<String>, host_key: impl Into<String>) {
        self.bindings.insert(specifier.into(), host_key.into());
    }

    /// Resolve a specifier; sub-paths resolve through their package
    /// root binding.
    pub fn resolve(&self, specifier: &str) -> Option<&str> {
        if let Some(key) = self.bindings.get(specifier) {
            return Some(key);
        }
        self.bindings.iter().find_map(|(bound, key)| {
            specifier
                .strip_prefix(bound.as_str())
                .filter(|rest| rest.starts_with('/'))
                .map(|_| key.as_str())
        })
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether the table has no bindings.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl FromIterator<(String, String)> for RedirectionTable {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            bindings: iter.into_iter().collect(),
        }
    }
}

/// Load context handed to the host for each instantiation.
pub struct LoadContext<'a> {
    /// Singleton redirection table for this session
    pub redirections: &'a RedirectionTable,
}

/// A unit handed to the host for dynamic loading.
pub struct MaterializedUnit<'a> {
    /// Reference to the unit being loaded
    pub loadable: &'a LoadableRef,
    /// The compiled text
    pub source: &'a str,
}

/// Failure classification reported by a [`ModuleHost`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostFailure {
    /// Network or security failure loading the unit (retryable)
    #[error("{0}")]
    Load(String),
    /// The unit loaded but failed during module-body evaluation
    /// (never retried)
    #[error("{0}")]
    Runtime(String),
}

impl From<HostFailure> for PipelineError {
    fn from(failure: HostFailure) -> Self {
        match failure {
            HostFailure::Load(reason) => PipelineError::Load { reason },
            HostFailure::Runtime(reason) => PipelineError::Runtime { reason },
        }
    }
}

/// The seam between the pipeline and the executing engine.
///
/// Implementations dynamically load a materialized unit and hand back
/// the default-export component constructor. Loaded code shares the
/// host's privilege level; this trait is not a sandbox boundary.
#[async_trait]
pub trait ModuleHost: Send + Sync {
    /// Handle for the extracted default-export constructor.
    type Constructor: Clone + Send + Sync;

    /// Dynamically load `unit`, resolving singleton specifiers through
    /// `ctx`, and extract the default export.
    async fn instantiate(
        &self,
        unit: MaterializedUnit<'_>,
        ctx: &LoadContext<'_>,
    ) -> std::result::Result<Self::Constructor, HostFailure>;
}

/// A loaded component: the constructor plus the unit backing it.
#[derive(Debug, Clone)]
pub struct Executable<C> {
    /// The default-export component constructor
    pub constructor: C,
    /// The unit the constructor was loaded from
    pub loadable: LoadableRef,
}

/// Materializes units and drives the host, applying the retry policy.
pub struct ModuleLoader<H: ModuleHost> {
    host: H,
    store: Arc<ModuleStore>,
    redirections: RedirectionTable,
}

impl<H: ModuleHost> ModuleLoader<H> {
    /// Create a loader around a host and its session redirection table.
    pub fn new(host: H, redirections: RedirectionTable) -> Self {
        Self {
            host,
            store: Arc::new(ModuleStore::new()),
            redirections,
        }
    }

    /// The backing unit store.
    pub fn store(&self) -> &ModuleStore {
        &self.store
    }

    /// Materialize and dynamically load compiled text.
    ///
    /// A failed load revokes its unit before the error surfaces, so
    /// failures leak nothing. Load failures are retried exactly once
    /// after a short backoff; runtime failures are never retried.
    pub async fn load(&self, compiled_source: &str) -> Result<Executable<H::Constructor>> {
        let loadable = self.store.materialize(compiled_source);
        match self.instantiate_with_retry(&loadable, compiled_source).await {
            Ok(constructor) => Ok(Executable {
                constructor,
                loadable,
            }),
            Err(err) => {
                self.store.revoke(&loadable);
                Err(err)
            }
        }
    }

    async fn instantiate_with_retry(
        &self,
        loadable: &LoadableRef,
        source: &str,
    ) -> Result<H::Constructor> {
        let ctx = LoadContext {
            redirections: &self.redirections,
        };

        let unit = MaterializedUnit { loadable, source };
        match self.host.instantiate(unit, &ctx).await {
            Ok(constructor) => Ok(constructor),
            Err(HostFailure::Load(reason)) => {
                tracing::warn!(%loadable, %reason, "load failed, retrying once");
                tokio::time::sleep(LOAD_RETRY_BACKOFF).await;
                let unit = MaterializedUnit { loadable, source };
                self.host.instantiate(unit, &ctx).await.map_err(PipelineError::from)
            }
            Err(failure @ HostFailure::Runtime(_)) => Err(failure.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Host that fails the first `fail_loads` calls with a load
    /// failure, then succeeds.
    struct FlakyHost {
        calls: AtomicUsize,
        fail_loads: usize,
    }

    impl FlakyHost {
        fn new(fail_loads: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_loads,
            }
        }
    }

    #[async_trait]
    impl ModuleHost for FlakyHost {
        type Constructor = String;

        async fn instantiate(
            &self,
            unit: MaterializedUnit<'_>,
            _ctx: &LoadContext<'_>,
        ) -> std::result::Result<String, HostFailure> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_loads {
                return Err(HostFailure::Load("registry unreachable".into()));
            }
            Ok(format!("ctor:{}", unit.loadable.id()))
        }
    }

    struct RuntimeFailHost {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModuleHost for RuntimeFailHost {
        type Constructor = String;

        async fn instantiate(
            &self,
            _unit: MaterializedUnit<'_>,
            _ctx: &LoadContext<'_>,
        ) -> std::result::Result<String, HostFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(HostFailure::Runtime("threw in module body".into()))
        }
    }

    #[tokio::test]
    async fn test_successful_load_keeps_unit_live() {
        let loader = ModuleLoader::new(FlakyHost::new(0), RedirectionTable::new());
        let executable = loader.load("export default 1;").await.unwrap();
        assert!(loader.store().is_live(&executable.loadable));
        assert_eq!(loader.store().live_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_failure_retried_exactly_once() {
        let loader = ModuleLoader::new(FlakyHost::new(1), RedirectionTable::new());
        let executable = loader.load("export default 1;").await.unwrap();
        assert_eq!(loader.host.calls.load(Ordering::SeqCst), 2);
        assert!(loader.store().is_live(&executable.loadable));
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_load_failure_surfaces_and_revokes() {
        let loader = ModuleLoader::new(FlakyHost::new(2), RedirectionTable::new());
        let err = loader.load("export default 1;").await.unwrap_err();
        assert!(matches!(err, PipelineError::Load { .. }));
        assert_eq!(loader.host.calls.load(Ordering::SeqCst), 2);
        assert_eq!(loader.store().live_count(), 0);
    }

    #[tokio::test]
    async fn test_runtime_failure_not_retried() {
        let loader = ModuleLoader::new(
            RuntimeFailHost {
                calls: AtomicUsize::new(0),
            },
            RedirectionTable::new(),
        );
        let err = loader.load("throw new Error('boom');").await.unwrap_err();
        assert!(matches!(err, PipelineError::Runtime { .. }));
        assert_eq!(loader.host.calls.load(Ordering::SeqCst), 1);
        assert_eq!(loader.store().live_count(), 0);
    }

    #[test]
    fn test_revoke_is_exactly_once() {
        let store = ModuleStore::new();
        let loadable = store.materialize("export default 1;");
        assert!(store.revoke(&loadable));
        assert!(!store.revoke(&loadable));
        assert!(!store.is_live(&loadable));
    }

    #[test]
    fn test_redirection_resolves_subpaths() {
        let mut table = RedirectionTable::new();
        table.bind("react", "host:react");
        table.bind("react-dom", "host:react-dom");

        assert_eq!(table.resolve("react"), Some("host:react"));
        assert_eq!(table.resolve("react-dom/client"), Some("host:react-dom"));
        assert_eq!(table.resolve("react-router"), None);
        assert_eq!(table.resolve("left-pad"), None);
    }
}
