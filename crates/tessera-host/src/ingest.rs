//! Origin ingestion adapters.
//!
//! Each collaborator hands the pipeline a [`ComponentRecord`]: the AI
//! generation workflow submits source with its prompt metadata, the
//! remote importer fetches source over HTTP, and the built-in library
//! ships source (optionally precompiled) with the host.

use std::time::Duration;
use tessera_pipeline::{ComponentRecord, Origin};
use tracing::{debug, instrument};
use url::Url;

use crate::error::{HostError, Result};

/// Content types accepted for remote component source.
const ACCEPTED_CONTENT_TYPES: &[&str] = &[
    "application/javascript",
    "text/javascript",
    "application/x-javascript",
    "text/jsx",
    "text/plain",
];

/// Submission from the AI generation collaborator.
#[derive(Debug, Clone)]
pub struct GeneratedSubmission {
    /// The generated source text
    pub source_text: String,
    /// The prompt the source was derived from
    pub prompt: Option<String>,
}

/// Ingest a generated submission into a component record.
pub fn ingest_generated(submission: GeneratedSubmission) -> ComponentRecord {
    ComponentRecord::new(
        Origin::Generated {
            prompt: submission.prompt,
        },
        submission.source_text,
    )
}

/// A component shipped with the host's built-in library.
#[derive(Debug, Clone)]
pub struct LibraryComponent {
    /// The library source text
    pub source_text: String,
    /// Precompiled text, when the library ships one; lets the pipeline
    /// skip straight to the cache
    pub precompiled_text: Option<String>,
}

/// Ingest a built-in library component into a component record.
pub fn ingest_library(component: LibraryComponent) -> ComponentRecord {
    ComponentRecord::new(
        Origin::BuiltinLibrary {
            precompiled: component.precompiled_text,
        },
        component.source_text,
    )
}

/// Fetches remote component source over HTTP.
#[derive(Clone)]
pub struct RemoteImporter {
    client: reqwest::Client,
}

impl RemoteImporter {
    /// Create an importer with sane transport timeouts.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(format!("tessera/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Fetch component source from a locator, producing a record with
    /// [`Origin::RemoteImport`].
    ///
    /// The response content type must be a JavaScript or text type;
    /// anything else is rejected before the body is read.
    #[instrument(skip(self))]
    pub async fn fetch(&self, locator: Url) -> Result<ComponentRecord> {
        debug!("fetching remote component source");

        let response = self.client.get(locator.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HostError::Status {
                locator: locator.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !is_supported_content_type(&content_type) {
            return Err(HostError::UnsupportedContentType {
                locator: locator.to_string(),
                content_type,
            });
        }

        let source_text = response.text().await?;
        debug!(bytes = source_text.len(), "fetched remote component source");

        Ok(ComponentRecord::new(
            Origin::RemoteImport { locator },
            source_text,
        ))
    }
}

/// Whether a `Content-Type` header value (parameters ignored) names an
/// accepted source type.
fn is_supported_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    ACCEPTED_CONTENT_TYPES.contains(&essence.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_content_types() {
        assert!(is_supported_content_type("text/javascript"));
        assert!(is_supported_content_type("application/javascript; charset=utf-8"));
        assert!(is_supported_content_type("Text/JavaScript"));
        assert!(!is_supported_content_type("text/html"));
        assert!(!is_supported_content_type("application/wasm"));
        assert!(!is_supported_content_type(""));
    }

    #[test]
    fn test_generated_submission_carries_prompt() {
        let record = ingest_generated(GeneratedSubmission {
            source_text: "const A = 1;".into(),
            prompt: Some("a counter".into()),
        });
        match &record.origin {
            Origin::Generated { prompt } => assert_eq!(prompt.as_deref(), Some("a counter")),
            other => panic!("unexpected origin {other:?}"),
        }
        assert_eq!(record.original_source(), "const A = 1;");
    }

    #[test]
    fn test_library_component_keeps_precompiled_text() {
        let record = ingest_library(LibraryComponent {
            source_text: "export default () => null;".into(),
            precompiled_text: Some("export default () => null;".into()),
        });
        assert!(matches!(
            &record.origin,
            Origin::BuiltinLibrary { precompiled: Some(_) }
        ));
    }
}
