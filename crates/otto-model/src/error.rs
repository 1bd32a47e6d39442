// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Provider error classification.
//!
//! Every backend reports failures in its own shape; the agent loop only
//! branches on three kinds.  This module maps wire errors (an HTTP status
//! plus an optional `{code, type, message}` body) into that taxonomy so
//! the loop never inspects provider-specific strings itself.

use serde::{Deserialize, Serialize};

/// Keywords that mark an invalid-request error as a context overflow when
/// the provider does not use a recognisable error code.
const OVERFLOW_KEYWORDS: &[&str] = &["context", "token", "length", "exceeded", "too long"];

/// A provider failure, classified for the agent loop.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// The request exceeded the model's context window.  Recoverable by
    /// compacting history and retrying the same provider once.
    #[error("context window exceeded: {0}")]
    ContextOverflow(String),
    /// HTTP 401/429 or an equivalent typed error.  Recoverable by
    /// advancing to the next configured provider.
    #[error("rate limited or unauthorized: {0}")]
    RateLimitOrAuth(String),
    /// Transport failures, parse failures, 5xx.  Fatal to the run.
    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ContextOverflow(_) => ErrorKind::ContextOverflow,
            Self::RateLimitOrAuth(_) => ErrorKind::RateLimitOrAuth,
            Self::Other(_) => ErrorKind::Provider,
        }
    }
}

impl From<&ProviderError> for ErrorEvent {
    fn from(e: &ProviderError) -> Self {
        ErrorEvent::new(e.kind(), e.to_string())
    }
}

/// Taxonomy tag carried on terminal `error` stream events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ContextOverflow,
    RateLimitOrAuth,
    /// Transport / parse / 5xx provider failures.
    Provider,
    Cancelled,
    IterationCap,
    ProvidersExhausted,
    Store,
}

/// The payload of a terminal `error` stream event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorEvent {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "run cancelled")
    }
}

impl std::fmt::Display for ErrorEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Error body shape most chat-completion backends return:
/// `{"error": {"code": …, "type": …, "message": …}}`, sometimes flattened.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default, rename = "type")]
    pub error_type: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl WireError {
    /// Parse a response body, accepting both the nested and flat layouts.
    /// Unparseable bodies produce an empty `WireError`; classification then
    /// falls back to the raw text.
    pub fn from_body(body: &str) -> Self {
        #[derive(Deserialize)]
        struct Nested {
            error: WireError,
        }
        if let Ok(n) = serde_json::from_str::<Nested>(body) {
            return n.error;
        }
        serde_json::from_str::<WireError>(body).unwrap_or_default()
    }
}

/// Classify an HTTP-level failure from a chat-completion endpoint.
pub fn classify_http_error(status: u16, body: &str) -> ProviderError {
    let wire = WireError::from_body(body);
    let message = wire
        .message
        .clone()
        .unwrap_or_else(|| format!("HTTP {status}: {body}"));

    if status == 401 || status == 429 {
        return ProviderError::RateLimitOrAuth(message);
    }
    classify_wire_error(&wire, status == 400, &message)
}

/// Classify a typed wire error (used for both HTTP bodies and in-stream
/// `error` payloads, where no status code exists).
pub fn classify_wire_error(
    wire: &WireError,
    invalid_request: bool,
    message: &str,
) -> ProviderError {
    let code = wire.code.as_deref().unwrap_or("");
    let error_type = wire.error_type.as_deref().unwrap_or("");
    let lower = message.to_lowercase();

    // Explicitly named overflow codes win outright.
    if code.contains("context_length")
        || error_type.contains("context_length")
        || error_type.contains("exceed_context")
    {
        return ProviderError::ContextOverflow(message.to_string());
    }

    if code.contains("rate_limit")
        || error_type.contains("rate_limit")
        || error_type.contains("authentication")
        || code.contains("insufficient_quota")
    {
        return ProviderError::RateLimitOrAuth(message.to_string());
    }

    // Substring heuristics only apply to the invalid-request class; a 500
    // that happens to mention "tokens" is not an overflow.
    let invalid = invalid_request
        || error_type.contains("invalid_request")
        || code.contains("invalid_request");
    if invalid && OVERFLOW_KEYWORDS.iter().filter(|k| lower.contains(**k)).count() >= 2 {
        return ProviderError::ContextOverflow(message.to_string());
    }

    ProviderError::Other(message.to_string())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
