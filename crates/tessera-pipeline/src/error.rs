// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Error types for the component pipeline.
//!
//! Every error carries owned payloads so pipeline results stay `Clone`;
//! coalesced requests broadcast one result to every waiter.

use std::fmt;
use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// A half-open byte range into a source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceSpan {
    /// Start byte offset (inclusive)
    pub start: usize,
    /// End byte offset (exclusive)
    pub end: usize,
}

impl SourceSpan {
    /// Create a span covering `start..end`.
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

impl fmt::Display for SourceSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Errors that can occur while compiling and loading a component
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// Source dialect is unrecognizable or cannot be wrapped
    #[error("format error at {span}: {reason}")]
    Format {
        /// The unparseable span
        span: SourceSpan,
        /// Reason for failure
        reason: String,
    },

    /// Import declaration malformed, or unresolvable under strict mode
    #[error("cannot resolve import '{specifier}': {reason}")]
    ImportResolution {
        /// The offending specifier (or the raw declaration when no
        /// specifier could be read out of it)
        specifier: String,
        /// Reason for failure
        reason: String,
    },

    /// Inline markup is syntactically invalid
    #[error("markup error at offset {offset}: {reason}")]
    Transpile {
        /// Byte offset of the offending markup
        offset: usize,
        /// Reason for failure
        reason: String,
    },

    /// The materialized unit could not be loaded (network/security)
    #[error("load failed: {reason}")]
    Load {
        /// Reason for failure
        reason: String,
    },

    /// The unit loaded but failed during module-body evaluation
    #[error("component evaluation failed: {reason}")]
    Runtime {
        /// Reason for failure
        reason: String,
    },

    /// The request was cancelled before the load settled
    #[error("request cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Create a format error.
    pub fn format(span: SourceSpan, reason: impl Into<String>) -> Self {
        Self::Format {
            span,
            reason: reason.into(),
        }
    }

    /// Create an import resolution error.
    pub fn import(specifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ImportResolution {
            specifier: specifier.into(),
            reason: reason.into(),
        }
    }

    /// Create a transpile error.
    pub fn transpile(offset: usize, reason: impl Into<String>) -> Self {
        Self::Transpile {
            offset,
            reason: reason.into(),
        }
    }

    /// Create a load error.
    pub fn load(reason: impl Into<String>) -> Self {
        Self::Load {
            reason: reason.into(),
        }
    }

    /// Create a runtime error.
    pub fn runtime(reason: impl Into<String>) -> Self {
        Self::Runtime {
            reason: reason.into(),
        }
    }

    /// Whether the loader may retry after this error.
    ///
    /// Only [`PipelineError::Load`] is retried, exactly once. Retrying a
    /// runtime failure would execute user code again with identical
    /// inputs and an identical outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Load { .. })
    }
}
