//! Reference module host.
//!
//! [`ProbingHost`] performs a structural "load" of a materialized
//! unit: every bare specifier must resolve through the session's
//! redirection table, absolute locators are optionally probed with an
//! HTTP HEAD request, and the default export is extracted as the
//! constructor handle. Engine-backed hosts replace this with actual
//! module evaluation; the pipeline-facing contract is the same.

use async_trait::async_trait;
use std::time::Duration;
use tessera_pipeline::{HostFailure, LoadContext, MaterializedUnit, ModuleHost, scan_imports};
use tracing::debug;

use crate::error::Result;

/// Constructor handle produced by a structural load: the expression
/// the unit's default export names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructorSpec {
    /// Identifier of the default export, or `"(anonymous)"` for
    /// expression exports
    pub default_export: String,
}

/// Structural reference implementation of [`ModuleHost`].
pub struct ProbingHost {
    client: Option<reqwest::Client>,
}

impl ProbingHost {
    /// Host that HEAD-probes absolute locators over HTTP. An
    /// unreachable rewritten locator surfaces as a load failure, which
    /// the pipeline retries once.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .user_agent(format!("tessera/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client: Some(client),
        })
    }

    /// Host that skips network probes entirely (structural checks
    /// only). Suitable for offline inspection and tests.
    pub fn structural() -> Self {
        Self { client: None }
    }
}

#[async_trait]
impl ModuleHost for ProbingHost {
    type Constructor = ConstructorSpec;

    async fn instantiate(
        &self,
        unit: MaterializedUnit<'_>,
        ctx: &LoadContext<'_>,
    ) -> std::result::Result<ConstructorSpec, HostFailure> {
        for decl in scan_imports(unit.source) {
            let specifier = decl.specifier.as_str();
            if specifier.starts_with("./") || specifier.starts_with("../") {
                continue;
            }
            if specifier.contains("://") {
                if let Some(client) = &self.client {
                    probe_locator(client, specifier).await?;
                }
                continue;
            }
            // A bare specifier surviving the rewriter must be a
            // singleton with a host binding.
            match ctx.redirections.resolve(specifier) {
                Some(host_key) => {
                    debug!(specifier, host_key, "resolved singleton through redirection table");
                }
                None => {
                    return Err(HostFailure::Load(format!(
                        "no host binding for '{specifier}'"
                    )));
                }
            }
        }

        match default_export_expr(unit.source) {
            Some(default_export) => Ok(ConstructorSpec { default_export }),
            None => Err(HostFailure::Runtime(
                "module has no default export".to_string(),
            )),
        }
    }
}

async fn probe_locator(client: &reqwest::Client, locator: &str) -> std::result::Result<(), HostFailure> {
    debug!(locator, "probing rewritten locator");
    let response = client
        .head(locator)
        .send()
        .await
        .map_err(|err| HostFailure::Load(format!("locator '{locator}' unreachable: {err}")))?;
    if !response.status().is_success() {
        return Err(HostFailure::Load(format!(
            "locator '{locator}' answered HTTP {}",
            response.status().as_u16()
        )));
    }
    Ok(())
}

/// Extract the name a `export default` exports without a full parse:
/// the following identifier when there is one, `"(anonymous)"` for
/// expression exports.
fn default_export_expr(source: &str) -> Option<String> {
    for line in source.lines() {
        let trimmed = line.trim_start();
        let Some(rest) = strip_keyword(trimmed, "export") else {
            continue;
        };
        let Some(mut rest) = strip_keyword(rest, "default") else {
            continue;
        };
        for keyword in ["async", "function*", "function", "class"] {
            if let Some(after) = rest.strip_prefix(keyword) {
                rest = after.trim_start();
            }
        }
        let name: String = rest
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '$')
            .collect();
        if name.is_empty() || name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            return Some("(anonymous)".to_string());
        }
        return Some(name);
    }
    None
}

/// Strip a leading keyword followed by whitespace (so `exports` never
/// matches `export`).
fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(keyword)?;
    if rest.starts_with(char::is_whitespace) {
        Some(rest.trim_start())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_pipeline::{ModuleStore, RedirectionTable};

    fn context(table: &RedirectionTable) -> LoadContext<'_> {
        LoadContext {
            redirections: table,
        }
    }

    async fn instantiate(
        host: &ProbingHost,
        table: &RedirectionTable,
        source: &str,
    ) -> std::result::Result<ConstructorSpec, HostFailure> {
        let store = ModuleStore::new();
        let loadable = store.materialize(source);
        host.instantiate(
            MaterializedUnit {
                loadable: &loadable,
                source,
            },
            &context(table),
        )
        .await
    }

    #[tokio::test]
    async fn test_singleton_resolves_through_redirection() {
        let host = ProbingHost::structural();
        let mut table = RedirectionTable::new();
        table.bind("react", "host:react");

        let spec = instantiate(
            &host,
            &table,
            "import { useState } from 'react';\nexport default Counter;\n",
        )
        .await
        .unwrap();
        assert_eq!(spec.default_export, "Counter");
    }

    #[tokio::test]
    async fn test_unbound_bare_specifier_is_load_failure() {
        let host = ProbingHost::structural();
        let table = RedirectionTable::new();

        let err = instantiate(
            &host,
            &table,
            "import { useState } from 'react';\nexport default Counter;\n",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, HostFailure::Load(reason) if reason.contains("react")));
    }

    #[tokio::test]
    async fn test_missing_default_export_is_runtime_failure() {
        let host = ProbingHost::structural();
        let table = RedirectionTable::new();

        let err = instantiate(&host, &table, "const x = 1;\n").await.unwrap_err();
        assert!(matches!(err, HostFailure::Runtime(_)));
    }

    #[test]
    fn test_default_export_extraction() {
        assert_eq!(
            default_export_expr("export default Component;\n").as_deref(),
            Some("Component")
        );
        assert_eq!(
            default_export_expr("export default function App() {}\n").as_deref(),
            Some("App")
        );
        assert_eq!(
            default_export_expr("export default () => null;\n").as_deref(),
            Some("(anonymous)")
        );
        assert_eq!(default_export_expr("export const x = 1;\n"), None);
    }
}
