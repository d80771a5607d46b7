//! Error types for retagging.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for retag operations.
pub type Result<T> = std::result::Result<T, RetagError>;

/// Why a single annotation could not be relocated.
///
/// A failed retag never changes the annotation, so every variant describes a
/// result that was thrown away.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetagError {
    /// No usable response from the language model.
    #[error("language model request failed: {0}")]
    Model(String),

    /// Response is not JSON.
    #[error("model response is not valid JSON: {message}")]
    JsonParse { message: String, response: String },

    /// Response is JSON but not the expected object.
    #[error("model response has the wrong shape: {message}")]
    JsonValidation { message: String, response: String },

    /// Relocated text could not be found in the reported lines.
    #[error("relocated text not found in lines {start_line}-{end_line}")]
    SnippetMatching {
        text: String,
        start_line: usize,
        end_line: usize,
    },

    /// Resolved offsets do not form a non-empty span of the document.
    #[error("resolved span {start}..{end} is invalid for a document of {len} bytes")]
    InvalidPosition { start: usize, end: usize, len: usize },

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RetagError {
    pub fn kind(&self) -> RetagErrorKind {
        match self {
            Self::Model(_) => RetagErrorKind::Model,
            Self::JsonParse { .. } => RetagErrorKind::JsonParse,
            Self::JsonValidation { .. } => RetagErrorKind::JsonValidation,
            Self::SnippetMatching { .. } => RetagErrorKind::SnippetMatching,
            Self::InvalidPosition { .. } => RetagErrorKind::InvalidPosition,
            Self::Internal(_) => RetagErrorKind::Internal,
        }
    }

    /// Raw model output, when the failure happened after a response arrived.
    pub fn model_output(&self) -> Option<&str> {
        match self {
            Self::JsonParse { response, .. } | Self::JsonValidation { response, .. } => {
                Some(response)
            }
            _ => None,
        }
    }
}

impl From<ModelError> for RetagError {
    fn from(e: ModelError) -> Self {
        Self::Model(e.to_string())
    }
}

impl From<tether_anchors::AnchorError> for RetagError {
    fn from(e: tether_anchors::AnchorError) -> Self {
        Self::Internal(e.to_string())
    }
}

/// Closed classification of retag failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetagErrorKind {
    Model,
    JsonParse,
    JsonValidation,
    SnippetMatching,
    InvalidPosition,
    Internal,
}

impl RetagErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::JsonParse => "json-parse",
            Self::JsonValidation => "json-validation",
            Self::SnippetMatching => "snippet-matching",
            Self::InvalidPosition => "invalid-position",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for RetagErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by language model backends.
#[derive(Error, Debug)]
pub enum ModelError {
    /// Backend has no credentials.
    #[error("language model provider not configured")]
    ProviderNotConfigured,

    /// API request failed.
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Response did not have the expected structure.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Response had no text.
    #[error("empty response from language model")]
    EmptyResponse,

    /// Request took longer than allowed.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
