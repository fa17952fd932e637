//! Error types for the reconnaissance core.
//!
//! Each error kind gets its own small struct carrying just the context
//! needed to log or report it, collected into one top-level enum per
//! concern. There is no `thiserror`/`anyhow` here by design — every `From`
//! conversion is written out explicitly.

use std::fmt;

/// Result alias using [`CoreError`] as the error type.
pub type Result<T> = std::result::Result<T, CoreError>;

/// A DNS query failed in a way that should be retried on another resolver
/// rather than surfaced to the caller (timeout, SERVFAIL, socket error).
///
/// Never escapes the resolver pool as an error the rest of the pipeline has
/// to handle; it only ever affects a resolver's score.
#[derive(Debug)]
pub struct TransientDnsError {
    pub resolver: String,
    pub msg: String,
}

impl fmt::Display for TransientDnsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transient DNS failure via {}: {}", self.resolver, self.msg)
    }
}

/// A candidate name or address failed a scope predicate and was dropped.
///
/// Carried as an error only so call sites can log-and-continue uniformly;
/// it is never propagated out of the pipeline.
#[derive(Debug)]
pub struct ScopeViolationError {
    pub value: String,
    pub reason: &'static str,
}

impl fmt::Display for ScopeViolationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is out of scope: {}", self.value, self.reason)
    }
}

/// A data-source plugin's HTTP request or response parse failed.
///
/// Logged via the `Log` topic; the plugin keeps running for its remaining
/// lifetime.
#[derive(Debug)]
pub struct SourceFailureError {
    pub source: String,
    pub msg: String,
}

impl fmt::Display for SourceFailureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source {} failed: {}", self.source, self.msg)
    }
}

/// Fatal at bring-up: a missing wordlist, empty resolver list, or malformed
/// UUID. The only error kind that aborts enumeration start.
#[derive(Debug)]
pub struct ConfigErrorStruct {
    pub field: &'static str,
    pub msg: String,
}

impl fmt::Display for ConfigErrorStruct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid configuration for {}: {}", self.field, self.msg)
    }
}

/// A graph store write failed. Logged; enumeration continues with whatever
/// made it into memory.
#[derive(Debug)]
pub struct StoreErrorStruct {
    pub op: &'static str,
    pub msg: String,
}

impl fmt::Display for StoreErrorStruct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph store {} failed: {}", self.op, self.msg)
    }
}

/// The enumeration's root context was cancelled. Carries no data; callers
/// match on the variant and unwind without further I/O.
#[derive(Debug)]
pub struct CancellationError;

impl fmt::Display for CancellationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "enumeration was cancelled")
    }
}

/// Unified error type for the reconnaissance core.
#[derive(Debug)]
pub enum CoreError {
    TransientDns(TransientDnsError),
    ScopeViolation(ScopeViolationError),
    SourceFailure(SourceFailureError),
    Config(ConfigErrorStruct),
    Store(StoreErrorStruct),
    Cancelled(CancellationError),
}

impl CoreError {
    pub fn config(field: &'static str, msg: impl Into<String>) -> Self {
        Self::Config(ConfigErrorStruct {
            field,
            msg: msg.into(),
        })
    }

    pub fn store(op: &'static str, msg: impl Into<String>) -> Self {
        Self::Store(StoreErrorStruct {
            op,
            msg: msg.into(),
        })
    }

    pub fn scope(value: impl Into<String>, reason: &'static str) -> Self {
        Self::ScopeViolation(ScopeViolationError {
            value: value.into(),
            reason,
        })
    }

    pub fn source_failure(source: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::SourceFailure(SourceFailureError {
            source: source.into(),
            msg: msg.into(),
        })
    }

    pub fn cancelled() -> Self {
        Self::Cancelled(CancellationError)
    }

    /// True for the kinds the engine treats as fatal at enumeration bring-up.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransientDns(e) => write!(f, "{e}"),
            Self::ScopeViolation(e) => write!(f, "{e}"),
            Self::SourceFailure(e) => write!(f, "{e}"),
            Self::Config(e) => write!(f, "{e}"),
            Self::Store(e) => write!(f, "{e}"),
            Self::Cancelled(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<hickory_resolver::ResolveError> for CoreError {
    fn from(error: hickory_resolver::ResolveError) -> Self {
        CoreError::TransientDns(TransientDnsError {
            resolver: "unknown".to_string(),
            msg: error.to_string(),
        })
    }
}

impl From<regex::Error> for CoreError {
    fn from(error: regex::Error) -> Self {
        CoreError::Config(ConfigErrorStruct {
            field: "scope regex",
            msg: error.to_string(),
        })
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for CoreError {
    fn from(error: tokio::sync::mpsc::error::SendError<T>) -> Self {
        CoreError::Store(StoreErrorStruct {
            op: "bus publish",
            msg: error.to_string(),
        })
    }
}
