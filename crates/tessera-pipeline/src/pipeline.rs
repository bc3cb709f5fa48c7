// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Pipeline orchestration.
//!
//! For a single record the stages run strictly in order: Detector →
//! Rewriter → Transpiler → Cache → Loader. The compile stages are pure
//! CPU work; only loading suspends, and only the requesting call path.
//! Requests for the same compiled hash are coalesced so no two loads
//! of identical text run in parallel.

use crate::cache::{CacheEntry, CacheManager, FlightTicket, InFlightMap, await_flight};
use crate::config::{PipelineConfig, RequestOptions};
use crate::detect::{self, Dialect};
use crate::error::{PipelineError, Result};
use crate::loader::{Executable, ModuleHost, ModuleLoader, ModuleStore, RedirectionTable};
use crate::record::{ComponentRecord, ContentHash, Origin};
use crate::rewrite;
use crate::transpile::MarkupTranspiler;
use std::time::Instant;

/// Output of the pure compile stages.
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    /// Detected dialect of the input
    pub dialect: Dialect,
    /// Compiled text: wrapped, rewritten, transpiled
    pub source: String,
    /// Content hash of the compiled text; the cache key
    pub hash: ContentHash,
    /// External dependencies the compiled text declares
    pub dependencies: Vec<String>,
}

/// Run the pure stages — detect, wrap, rewrite, transpile — without
/// touching cache or loader.
///
/// Deterministic: the same source under the same configuration always
/// produces the same compiled text and hash.
pub fn compile_source(source: &str, config: &PipelineConfig) -> Result<CompiledUnit> {
    compile_with(source, config, &MarkupTranspiler::from_config(config))
}

fn compile_with(
    source: &str,
    config: &PipelineConfig,
    transpiler: &MarkupTranspiler,
) -> Result<CompiledUnit> {
    let dialect = detect::detect(source);
    let module_source = match dialect {
        Dialect::StandardModule => source.to_string(),
        Dialect::Legacy => detect::wrap_legacy(source)?,
    };
    let rewritten = rewrite::rewrite_imports(&module_source, config)?;
    let compiled = transpiler.transpile(&rewritten.source)?;
    let hash = ContentHash::of(&compiled);
    tracing::debug!(?dialect, %hash, deps = rewritten.dependencies.len(), "compiled source");
    Ok(CompiledUnit {
        dialect,
        source: compiled,
        hash,
        dependencies: rewritten.dependencies,
    })
}

/// The component source pipeline.
///
/// Owns the only shared mutable state in the core — the cache, the
/// in-flight map, and the module store — and guarantees every loadable
/// reference it creates is revoked exactly once: by LRU eviction, by
/// cancellation discard, or by record destruction.
pub struct Pipeline<H: ModuleHost> {
    config: PipelineConfig,
    transpiler: MarkupTranspiler,
    cache: CacheManager<H::Constructor>,
    inflight: InFlightMap<H::Constructor>,
    loader: ModuleLoader<H>,
}

impl<H: ModuleHost> Pipeline<H> {
    /// Build a pipeline for one session.
    pub fn new(config: PipelineConfig, host: H, redirections: RedirectionTable) -> Self {
        let transpiler = MarkupTranspiler::from_config(&config);
        let cache = CacheManager::new(config.cache_max_entries);
        Self {
            transpiler,
            cache,
            inflight: InFlightMap::new(),
            loader: ModuleLoader::new(host, redirections),
            config,
        }
    }

    /// The session configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The compiled-unit cache.
    pub fn cache(&self) -> &CacheManager<H::Constructor> {
        &self.cache
    }

    /// The module store backing every loadable reference.
    pub fn store(&self) -> &ModuleStore {
        self.loader.store()
    }

    /// Compile, cache, and load a record, returning its executable.
    ///
    /// Errors carry the offending offset or specifier and never
    /// propagate as panics; the rendering collaborator is expected to
    /// show a fallback state.
    pub async fn request_executable(
        &self,
        record: &mut ComponentRecord,
        options: RequestOptions,
    ) -> Result<Executable<H::Constructor>> {
        let started = Instant::now();
        let compiled = self.compile_record(record)?;
        record.metrics.compile_time = Some(started.elapsed());
        record.metrics.dependency_count = compiled.dependencies.len();
        record.metrics.cache_hit = false;
        record.compiled_source = Some(compiled.source.clone());
        record.compiled_hash = Some(compiled.hash.clone());

        if options.force_recompile {
            // A forced request wants a fresh unit: bypass the cache and
            // coalescing without evicting the existing entry. The fresh
            // loadable belongs to this record alone and is revoked on
            // record destruction.
            let executable = self.loader.load(&compiled.source).await?;
            record.loadable = Some(executable.loadable.clone());
            return Ok(executable);
        }

        if let Some(hit) = self.cache.get(&compiled.hash) {
            tracing::debug!(record = %record.id, hash = %compiled.hash, "cache hit");
            record.metrics.cache_hit = true;
            record.loadable = Some(hit.loadable.clone());
            return Ok(Executable {
                constructor: hit.constructor,
                loadable: hit.loadable,
            });
        }

        match self.inflight.begin(&compiled.hash) {
            FlightTicket::Follower(rx) => {
                tracing::debug!(hash = %compiled.hash, "coalescing with in-flight load");
                let executable = await_flight(rx).await?;
                record.loadable = Some(executable.loadable.clone());
                Ok(executable)
            }
            FlightTicket::Leader(guard) => match self.loader.load(&compiled.source).await {
                Ok(executable) => {
                    if guard.is_cancelled() {
                        // The owning node went away mid-load: discard
                        // the result and revoke immediately instead of
                        // caching.
                        tracing::debug!(hash = %compiled.hash, "discarding cancelled load");
                        self.store().revoke(&executable.loadable);
                        guard.finish(Err(PipelineError::Cancelled));
                        return Err(PipelineError::Cancelled);
                    }
                    let entry = CacheEntry {
                        compiled_source: compiled.source.clone(),
                        loadable: executable.loadable.clone(),
                        constructor: executable.constructor.clone(),
                        created_at: Instant::now(),
                        size_estimate: compiled.source.len(),
                    };
                    if let Some(evicted) = self.cache.put(compiled.hash.clone(), entry) {
                        tracing::debug!(loadable = %evicted.loadable, "evicted least recently used entry");
                        self.store().revoke(&evicted.loadable);
                    }
                    record.loadable = Some(executable.loadable.clone());
                    guard.finish(Ok(executable.clone()));
                    Ok(executable)
                }
                Err(err) => {
                    guard.finish(Err(err.clone()));
                    Err(err)
                }
            },
        }
    }

    /// Mark the in-flight load for `record` cancelled. When the load
    /// settles, its result is discarded and its loadable revoked
    /// rather than cached. Returns whether a load was in flight.
    pub fn cancel(&self, record: &ComponentRecord) -> bool {
        match &record.compiled_hash {
            Some(hash) => self.cancel_in_flight(hash),
            None => false,
        }
    }

    /// Mark the in-flight load for a content hash cancelled.
    pub fn cancel_in_flight(&self, hash: &ContentHash) -> bool {
        self.inflight.cancel(hash)
    }

    /// Destroy a record: cancel any in-flight load, drop its cache
    /// entry, and revoke its loadable references.
    pub fn destroy_record(&self, record: &mut ComponentRecord) {
        if let Some(hash) = &record.compiled_hash {
            self.inflight.cancel(hash);
            if let Some(entry) = self.cache.remove(hash) {
                self.store().revoke(&entry.loadable);
                if record.loadable.as_ref() == Some(&entry.loadable) {
                    record.loadable = None;
                }
            }
        }
        // A force-recompiled loadable is owned by the record alone and
        // was not revoked by the cache removal above. A loadable shared
        // with an already-destroyed record may be dead; skip it rather
        // than revoke twice.
        if let Some(loadable) = record.loadable.take() {
            if self.store().is_live(&loadable) {
                self.store().revoke(&loadable);
            }
        }
        record.compiled_source = None;
        record.compiled_hash = None;
        tracing::debug!(record = %record.id, "destroyed record");
    }

    fn compile_record(&self, record: &ComponentRecord) -> Result<CompiledUnit> {
        // Built-in library components may ship precompiled text; the
        // pipeline then skips straight to the cache.
        if let Origin::BuiltinLibrary {
            precompiled: Some(precompiled),
        } = &record.origin
        {
            tracing::debug!(record = %record.id, "using precompiled library text");
            return Ok(CompiledUnit {
                dialect: Dialect::StandardModule,
                source: precompiled.clone(),
                hash: ContentHash::of(precompiled),
                dependencies: Vec::new(),
            });
        }
        compile_with(record.original_source(), &self.config, &self.transpiler)
    }
}
