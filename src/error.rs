//! Error types for ledger subscriptions.

use crate::types::TemplateId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Main error type for subscription and query operations.
///
/// These are returned synchronously at the call site. Stream problems that
/// are retried automatically never show up here; they are reported as
/// [`ErrorInfo`] in the subscription status instead.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Stream could not be opened: {0}")]
    StreamOpen(String),

    #[error("Ledger query failed: {0}")]
    Query(String),

    #[error("No acting parties for template {0}")]
    NoActingParties(TemplateId),

    #[error("Invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Subscription not started")]
    NotStarted,

    #[error("Unknown template: {0}")]
    UnknownTemplate(TemplateId),

    #[error("Contract not found: {0}")]
    ContractNotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Which stage of a subscription failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The handle could not be created or started, or failed before going live.
    Setup,
    /// The handle reported a failure after going live.
    Stream,
    /// The handle closed without being asked to.
    Closed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Setup => "setup",
            ErrorKind::Stream => "stream",
            ErrorKind::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Error detail surfaced to consumers through the subscription status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn setup(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Setup, message)
    }

    pub fn stream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Stream, message)
    }

    pub fn closed() -> Self {
        Self::new(ErrorKind::Closed, "stream closed unexpectedly")
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

impl From<&LedgerError> for ErrorInfo {
    fn from(e: &LedgerError) -> Self {
        ErrorInfo::setup(e.to_string())
    }
}
