// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Dependency rewriting.
//!
//! Scans a standard-module source's import declarations and rewrites
//! every non-singleton external specifier into a fully resolvable
//! locator on the configured package-delivery network. Singleton
//! specifiers are left untouched so host-level redirection applies and
//! every loaded unit shares one runtime instance. Rewriting is purely
//! textual — the source is never executed.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use regex::Regex;
use std::collections::HashSet;
use std::ops::Range;
use url::Url;

/// Framework hook identifiers conventionally supplied by the UI
/// runtime's singleton module.
pub const FRAMEWORK_HOOKS: &[&str] = &[
    "useState",
    "useEffect",
    "useMemo",
    "useCallback",
    "useRef",
    "useContext",
    "useReducer",
];

/// A scanned import-like declaration.
#[derive(Debug, Clone)]
pub struct ImportDecl {
    /// The module specifier as written
    pub specifier: String,
    /// Byte range of the specifier text (between the quotes)
    pub specifier_range: Range<usize>,
    /// Binding clause between `import` and `from`, when present
    pub clause: Option<String>,
}

/// Result of a rewrite pass.
#[derive(Debug, Clone)]
pub struct RewriteOutcome {
    /// The source with non-singleton specifiers rewritten
    pub source: String,
    /// External dependencies declared by the source (singletons
    /// included), in declaration order, deduplicated
    pub dependencies: Vec<String>,
}

/// Scan the static import declarations and `from`-clause re-exports of
/// a standard-module source, in source order.
pub fn scan_imports(source: &str) -> Vec<ImportDecl> {
    let import_re = Regex::new(
        r#"(?m)^[ \t]*import\s+(?:([^'"]+?)\s+from\s+)?['"]([^'"]*)['"]"#,
    )
    .unwrap();
    let reexport_re = Regex::new(
        r#"(?m)^[ \t]*export\s+(?:\*(?:\s+as\s+\w+)?|\{[^}]*\})\s*from\s+['"]([^'"]*)['"]"#,
    )
    .unwrap();

    let mut decls = Vec::new();

    for cap in import_re.captures_iter(source) {
        let spec = cap.get(2).expect("specifier group");
        decls.push(ImportDecl {
            specifier: spec.as_str().to_string(),
            specifier_range: spec.range(),
            clause: cap.get(1).map(|m| m.as_str().to_string()),
        });
    }

    for cap in reexport_re.captures_iter(source) {
        let spec = cap.get(1).expect("specifier group");
        decls.push(ImportDecl {
            specifier: spec.as_str().to_string(),
            specifier_range: spec.range(),
            clause: None,
        });
    }

    decls.sort_by_key(|d| d.specifier_range.start);
    decls
}

/// Rewrite external dependency references, then report the declared
/// dependency set.
///
/// Performs inference repair first (see [`infer_missing_imports`]), so
/// an inserted hook import participates in dependency reporting like
/// any user-authored line.
pub fn rewrite_imports(source: &str, config: &PipelineConfig) -> Result<RewriteOutcome> {
    let source = match infer_missing_imports(source, config) {
        Some(import_line) => format!("{import_line}\n{source}"),
        None => source.to_string(),
    };

    check_malformed_imports(&source, config)?;

    let decls = scan_imports(&source);
    let mut dependencies = Vec::new();
    let mut seen = HashSet::new();
    let mut rewritten = String::with_capacity(source.len());
    let mut last = 0;

    for decl in &decls {
        let spec = decl.specifier.as_str();
        if is_external(spec) && seen.insert(spec.to_string()) {
            dependencies.push(spec.to_string());
        }

        let replacement = match rewrite_specifier(spec, config) {
            Ok(replacement) => replacement,
            Err(err) if config.strict_import_resolution => return Err(err),
            Err(err) => {
                // Best-effort mode: leave the specifier as written.
                tracing::warn!(specifier = spec, %err, "leaving unresolved specifier as-is");
                None
            }
        };

        if let Some(new_spec) = replacement {
            rewritten.push_str(&source[last..decl.specifier_range.start]);
            rewritten.push_str(&new_spec);
            last = decl.specifier_range.end;
        }
    }
    rewritten.push_str(&source[last..]);

    Ok(RewriteOutcome {
        source: rewritten,
        dependencies,
    })
}

/// Map one specifier to its rewritten form, or `None` to leave it
/// untouched (singletons, relative paths, already-absolute locators).
fn rewrite_specifier(specifier: &str, config: &PipelineConfig) -> Result<Option<String>> {
    if specifier.is_empty() {
        return Err(PipelineError::import(specifier, "empty specifier"));
    }
    if config.is_singleton(specifier) {
        tracing::debug!(specifier, "singleton specifier left for host redirection");
        return Ok(None);
    }
    if specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/') {
        return Ok(None);
    }
    if specifier.contains("://") || specifier.starts_with("data:") {
        return Ok(None);
    }

    registry_locator(&config.package_registry_base, specifier).map(Some)
}

/// Build a fully qualified registry locator for a bare specifier,
/// carrying any embedded version and sub-path:
/// `name@1.2.3/sub` becomes `<base>/name@1.2.3/sub`.
fn registry_locator(base: &Url, specifier: &str) -> Result<String> {
    let (name, version, subpath) = split_specifier(specifier)?;

    let mut locator = base.as_str().trim_end_matches('/').to_string();
    locator.push('/');
    locator.push_str(&name);
    if let Some(version) = version {
        locator.push('@');
        locator.push_str(version);
    }
    if let Some(subpath) = subpath {
        locator.push('/');
        locator.push_str(subpath);
    }
    Ok(locator)
}

/// Split a bare specifier into package name, embedded version, and
/// sub-path. Scoped packages keep their scope in the name.
fn split_specifier(specifier: &str) -> Result<(String, Option<&str>, Option<&str>)> {
    let (name_segment_count, rest) = if specifier.starts_with('@') {
        (2, specifier)
    } else {
        (1, specifier)
    };

    let mut segments = rest.splitn(name_segment_count + 1, '/');
    let mut name = String::new();
    let mut version = None;

    for i in 0..name_segment_count {
        let Some(segment) = segments.next() else {
            return Err(PipelineError::import(specifier, "missing package name"));
        };
        if segment.is_empty() {
            return Err(PipelineError::import(specifier, "empty package name segment"));
        }
        if i > 0 {
            name.push('/');
        }
        // A version suffix rides on the last name segment.
        if i == name_segment_count - 1 {
            if let Some((head, ver)) = segment.split_once('@').filter(|(head, _)| !head.is_empty())
            {
                name.push_str(head);
                version = Some(ver);
                continue;
            }
        }
        name.push_str(segment);
    }

    let subpath = segments.next().filter(|s| !s.is_empty());
    Ok((name, version, subpath))
}

/// Surface malformed import declarations: an `import` statement line
/// that is neither a dynamic import nor a parseable declaration.
fn check_malformed_imports(source: &str, config: &PipelineConfig) -> Result<()> {
    let line_re = Regex::new(r"(?m)^[ \t]*import\b").unwrap();
    let import_re = Regex::new(
        r#"(?m)^[ \t]*import\s+(?:([^'"]+?)\s+from\s+)?['"]([^'"]*)['"]"#,
    )
    .unwrap();

    for m in line_re.find_iter(source) {
        let rest = source[m.end()..].trim_start();
        if rest.starts_with('(') || rest.starts_with('.') {
            continue;
        }
        let parses = import_re
            .find_at(source, m.start())
            .is_some_and(|decl| decl.start() == m.start());
        if !parses {
            let line = source[m.start()..].lines().next().unwrap_or_default().trim();
            let err = PipelineError::import(line, "malformed import declaration");
            if config.strict_import_resolution {
                return Err(err);
            }
            tracing::warn!(declaration = line, "skipping malformed import declaration");
        }
    }
    Ok(())
}

/// Insert imports for framework hooks the source calls without
/// importing or declaring.
///
/// Returns the import line to prepend, or `None` when nothing is
/// missing. Detection is textual and top-level only: a hook counts as
/// locally declared when any `const`/`let`/`var`/`function` binding of
/// that name appears in the text. Known limitation: user code that
/// shadows a hook name in an inner scope still triggers insertion; the
/// inserted import is then shadowed at use sites and harmless at module
/// scope, but the dependency report gains a phantom entry.
pub fn infer_missing_imports(source: &str, config: &PipelineConfig) -> Option<String> {
    let framework = config.framework_module()?;
    let imported = imported_bindings(source);

    let mut missing = Vec::new();
    for &hook in FRAMEWORK_HOOKS {
        if imported.contains(hook) || declares_binding(source, hook) {
            continue;
        }
        let call_re = Regex::new(&format!(r"(^|[^.\w$]){hook}\s*\(")).unwrap();
        if call_re.is_match(source) {
            missing.push(hook);
        }
    }

    if missing.is_empty() {
        return None;
    }
    tracing::debug!(hooks = ?missing, module = framework, "inserting inferred hook imports");
    Some(format!(
        "import {{ {} }} from '{}';",
        missing.join(", "),
        framework
    ))
}

/// Names bound by the source's static import clauses.
fn imported_bindings(source: &str) -> HashSet<String> {
    let mut names = HashSet::new();
    for decl in scan_imports(source) {
        let Some(clause) = decl.clause else { continue };
        // Split the clause into comma pieces, inside and outside the
        // brace group alike; the binding is the last word of each
        // piece (`a as b` binds `b`, `* as ns` binds `ns`).
        for piece in clause
            .replace(['{', '}'], ",")
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
        {
            if let Some(name) = piece.split_whitespace().last() {
                names.insert(name.to_string());
            }
        }
    }
    names
}

fn declares_binding(source: &str, name: &str) -> bool {
    Regex::new(&format!(r"\b(?:const|let|var|function)\s+{name}\b"))
        .unwrap()
        .is_match(source)
}

/// Whether a specifier names an external dependency (rather than a
/// relative file or an already-absolute locator).
fn is_external(specifier: &str) -> bool {
    !specifier.is_empty()
        && !specifier.starts_with("./")
        && !specifier.starts_with("../")
        && !specifier.starts_with('/')
        && !specifier.contains("://")
        && !specifier.starts_with("data:")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_registry(base: &str) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.package_registry_base = Url::parse(base).unwrap();
        config
    }

    #[test]
    fn test_singleton_specifier_left_untouched() {
        let config = PipelineConfig::new(vec!["ui-runtime".into()]);
        let source = "import { useState } from 'ui-runtime';\nexport default () => useState(0);";
        let outcome = rewrite_imports(source, &config).unwrap();
        assert!(outcome.source.contains("from 'ui-runtime'"));
        assert_eq!(outcome.dependencies, vec!["ui-runtime"]);
    }

    #[test]
    fn test_bare_specifier_rewritten_to_registry() {
        let config = config_with_registry("https://registry.example/");
        let source = "import pad from 'left-pad';";
        let outcome = rewrite_imports(source, &config).unwrap();
        assert!(outcome.source.contains("from 'https://registry.example/left-pad'"));
    }

    #[test]
    fn test_version_scope_and_subpath_carried() {
        let config = config_with_registry("https://registry.example");
        let outcome =
            rewrite_imports("import x from '@scope/pkg@2.1.0/lib/util';", &config).unwrap();
        assert!(outcome
            .source
            .contains("'https://registry.example/@scope/pkg@2.1.0/lib/util'"));

        let outcome = rewrite_imports("import y from 'lodash@4.17.21';", &config).unwrap();
        assert!(outcome.source.contains("'https://registry.example/lodash@4.17.21'"));
    }

    #[test]
    fn test_relative_and_absolute_left_untouched() {
        let config = PipelineConfig::default();
        let source =
            "import a from './local.js';\nimport b from 'https://cdn.example/x.js';";
        let outcome = rewrite_imports(source, &config).unwrap();
        assert!(outcome.source.contains("'./local.js'"));
        assert!(outcome.source.contains("'https://cdn.example/x.js'"));
        assert!(outcome.dependencies.is_empty());
    }

    #[test]
    fn test_reexport_specifier_rewritten() {
        let config = config_with_registry("https://registry.example");
        let outcome = rewrite_imports("export { get } from 'lodash';", &config).unwrap();
        assert!(outcome.source.contains("from 'https://registry.example/lodash'"));
    }

    #[test]
    fn test_side_effect_import_rewritten() {
        let config = config_with_registry("https://registry.example");
        let outcome = rewrite_imports("import 'normalize.css';", &config).unwrap();
        assert!(outcome.source.contains("import 'https://registry.example/normalize.css'"));
    }

    #[test]
    fn test_infers_missing_hook_import() {
        let config = PipelineConfig::default();
        let source = "export default () => { const [n] = useState(0); return n; };";
        let outcome = rewrite_imports(source, &config).unwrap();
        assert!(outcome.source.starts_with("import { useState } from 'react';"));
        assert_eq!(outcome.dependencies, vec!["react"]);
    }

    #[test]
    fn test_no_inference_when_imported_or_declared() {
        let config = PipelineConfig::default();

        let source = "import { useState } from 'react';\nexport default () => useState(0);";
        assert!(infer_missing_imports(source, &config).is_none());

        let source = "const useState = () => [0];\nexport default () => useState();";
        assert!(infer_missing_imports(source, &config).is_none());
    }

    #[test]
    fn test_no_inference_for_member_calls() {
        let config = PipelineConfig::default();
        let source = "import React from 'react';\nexport default () => React.useState(0);";
        assert!(infer_missing_imports(source, &config).is_none());
    }

    #[test]
    fn test_aliased_import_binds_alias() {
        let config = PipelineConfig::default();
        // `useState` aliased away: the local name `useState` is unbound,
        // so inference still fires.
        let source = "import { useState as useS } from 'react';\nexport default () => useState(0);";
        let inserted = infer_missing_imports(source, &config).unwrap();
        assert!(inserted.contains("useState"));
    }

    #[test]
    fn test_malformed_import_strict_vs_lenient() {
        let mut config = PipelineConfig::default();
        let source = "import { broken } from\nexport default 1;";

        let outcome = rewrite_imports(source, &config).unwrap();
        assert!(outcome.source.contains("import { broken } from"));

        config.strict_import_resolution = true;
        let err = rewrite_imports(source, &config).unwrap_err();
        match err {
            PipelineError::ImportResolution { specifier, .. } => {
                assert!(specifier.starts_with("import { broken }"));
            }
            other => panic!("expected import error, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_specifier_is_malformed() {
        let mut config = PipelineConfig::default();
        config.strict_import_resolution = true;
        let err = rewrite_imports("import x from '';", &config).unwrap_err();
        assert!(matches!(err, PipelineError::ImportResolution { .. }));
    }

    #[test]
    fn test_dependencies_deduplicated_in_order() {
        let config = PipelineConfig::default();
        let source = "import a from 'left-pad';\nimport b from 'dayjs';\nimport c from 'left-pad';";
        let outcome = rewrite_imports(source, &config).unwrap();
        assert_eq!(outcome.dependencies, vec!["left-pad", "dayjs"]);
    }

    #[test]
    fn test_split_specifier() {
        assert_eq!(
            split_specifier("lodash").unwrap(),
            ("lodash".to_string(), None, None)
        );
        assert_eq!(
            split_specifier("lodash@4.17.21/get").unwrap(),
            ("lodash".to_string(), Some("4.17.21"), Some("get"))
        );
        assert_eq!(
            split_specifier("@types/node").unwrap(),
            ("@types/node".to_string(), None, None)
        );
        assert_eq!(
            split_specifier("@babel/core@7.0.0/lib/index").unwrap(),
            ("@babel/core".to_string(), Some("7.0.0"), Some("lib/index"))
        );
    }
}
