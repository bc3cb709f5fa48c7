// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Pipeline configuration.

use url::Url;

/// Default package-delivery network for rewritten specifiers.
pub const DEFAULT_REGISTRY_BASE: &str = "https://esm.sh";

/// Default cache capacity.
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 128;

/// Session-level configuration for the pipeline.
///
/// The singleton dependency set is immutable for the lifetime of a
/// session; `PipelineConfig` is consumed by [`crate::Pipeline::new`] and
/// never handed back out mutably.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// External specifiers that must never be rewritten to a concrete
    /// locator. Resolution of these is delegated to the host's
    /// redirection table so every loaded unit shares one instance.
    pub singleton_dependencies: Vec<String>,
    /// Base locator for the package-delivery network used for all
    /// non-singleton specifiers.
    pub package_registry_base: Url,
    /// Maximum number of cache entries before LRU eviction.
    pub cache_max_entries: usize,
    /// Abort compilation on a malformed import declaration instead of
    /// leaving the specifier as-is.
    pub strict_import_resolution: bool,
    /// Factory call that markup elements compile into.
    pub markup_factory: String,
    /// Identifier emitted for fragment (`<>...</>`) elements.
    pub markup_fragment: String,
}

impl PipelineConfig {
    /// Configuration with the given singleton set and defaults for
    /// everything else.
    pub fn new(singleton_dependencies: Vec<String>) -> Self {
        Self {
            singleton_dependencies,
            package_registry_base: Url::parse(DEFAULT_REGISTRY_BASE)
                .expect("default registry base is a valid URL"),
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            strict_import_resolution: false,
            markup_factory: "h".to_string(),
            markup_fragment: "Fragment".to_string(),
        }
    }

    /// Whether a specifier names (or is a sub-path of) a singleton
    /// dependency.
    pub fn is_singleton(&self, specifier: &str) -> bool {
        self.singleton_dependencies.iter().any(|dep| {
            specifier == dep || specifier.strip_prefix(dep.as_str()).is_some_and(|rest| rest.starts_with('/'))
        })
    }

    /// The module that supplies framework-convention helpers, used as
    /// the import source for inference repair. By convention this is
    /// the first singleton entry.
    pub fn framework_module(&self) -> Option<&str> {
        self.singleton_dependencies.first().map(String::as_str)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new(vec!["react".to_string(), "react-dom".to_string()])
    }
}

/// Per-request options for [`crate::Pipeline::request_executable`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
    /// Bypass the cache for this one request without evicting the
    /// existing entry. The fresh loadable belongs to the requesting
    /// record and is revoked on record destruction.
    pub force_recompile: bool,
}
