// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Component records and content identity.

use crate::loader::LoadableRef;
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

/// Stable identity for a component record, assigned at ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Generate a fresh record id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Hex-encoded SHA-256 digest of normalized source text.
///
/// Content hashes are the cache key: two sources that normalize to the
/// same bytes share one compiled unit and one loadable reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    /// Digest the normalized form of `source`.
    pub fn of(source: &str) -> Self {
        let digest = Sha256::digest(normalize_source(source).as_bytes());
        Self(hex::encode(digest))
    }

    /// The hex digest string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize source text for hashing: CRLF to LF, trailing whitespace
/// stripped per line, exactly one trailing newline.
pub fn normalize_source(source: &str) -> String {
    let mut out = String::with_capacity(source.len() + 1);
    for line in source.lines() {
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

/// Where a component's source text came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Produced by the AI generation collaborator.
    Generated {
        /// Prompt the source was derived from, when known
        prompt: Option<String>,
    },
    /// Imported from a remote URL.
    RemoteImport {
        /// The network locator the source was fetched from
        locator: Url,
    },
    /// Shipped with the host's built-in library.
    BuiltinLibrary {
        /// Precompiled text, when the library ships one. Lets the
        /// pipeline skip detection/rewriting/transpilation and go
        /// straight to the cache.
        precompiled: Option<String>,
    },
}

/// Per-compile measurements attached to a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileMetrics {
    /// Wall time of the most recent compile (detect + rewrite +
    /// transpile), absent until first compile
    pub compile_time: Option<Duration>,
    /// Number of external dependencies declared by the compiled source
    pub dependency_count: usize,
    /// Whether the most recent request was served from the cache
    pub cache_hit: bool,
}

/// The unit of work and storage tracked per loadable component.
#[derive(Debug, Clone)]
pub struct ComponentRecord {
    /// Stable identity, assigned at ingestion
    pub id: RecordId,
    /// Origin of the source text
    pub origin: Origin,
    /// Per-compile measurements
    pub metrics: CompileMetrics,
    /// Derived text after rewriting/transpilation; absent until first
    /// compile
    pub compiled_source: Option<String>,
    /// Digest of the compiled text; the cache key
    pub compiled_hash: Option<ContentHash>,
    /// Reference to the ephemeral in-memory unit for this record; never
    /// persisted across sessions
    pub loadable: Option<LoadableRef>,
    original_source: String,
    original_hash: ContentHash,
}

impl ComponentRecord {
    /// Create a record for source text arriving from `origin`.
    pub fn new(origin: Origin, source: impl Into<String>) -> Self {
        let original_source = source.into();
        let original_hash = ContentHash::of(&original_source);
        Self {
            id: RecordId::new(),
            origin,
            metrics: CompileMetrics::default(),
            compiled_source: None,
            compiled_hash: None,
            loadable: None,
            original_source,
            original_hash,
        }
    }

    /// The source text as received. Immutable except through
    /// [`ComponentRecord::replace_source`].
    pub fn original_source(&self) -> &str {
        &self.original_source
    }

    /// Digest of the original source, used for change detection.
    pub fn original_hash(&self) -> &ContentHash {
        &self.original_hash
    }

    /// Replace the source text, clearing every derived field so the
    /// next request recompiles.
    pub fn replace_source(&mut self, source: impl Into<String>) {
        self.original_source = source.into();
        self.original_hash = ContentHash::of(&self.original_source);
        self.compiled_source = None;
        self.compiled_hash = None;
        self.loadable = None;
        self.metrics = CompileMetrics::default();
    }

    /// Whether `source` differs from what this record was built from.
    pub fn source_changed(&self, source: &str) -> bool {
        ContentHash::of(source) != self.original_hash
    }
}
