//! # Error Types
//!
//! Defines error types used across the hub crates.
//!
//! Errors are signals, not faults: the hub converts every failure into a
//! logged warning plus, where the caller supplied an error callback, an
//! explicit error value. Nothing here ever crosses the public API as a
//! panic.

use thiserror::Error;

/// Errors surfaced by hub operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    /// A module could not be registered (empty name, failed factory).
    #[error("Invalid module: {0}")]
    InvalidModule(String),

    /// A module with the same case-insensitive name is already registered.
    #[error("Duplicate module: {name} is already registered")]
    DuplicateModule { name: String },

    /// An event failed validation before dispatch.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// A one-time listener's timer expired before a response arrived.
    #[error("Callback timed out after {timeout_ms} ms")]
    CallbackTimeout { timeout_ms: u64 },

    /// The hub worker has been shut down.
    #[error("Event hub is shut down")]
    Shutdown,
}

/// Errors raised while interpreting a rule or consequence payload.
///
/// These are per-item: one malformed consequence never aborts the
/// surrounding rule or event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    /// The consequence carries no type.
    #[error("Consequence {id} has no type")]
    MissingConsequenceType { id: String },

    /// The consequence detail lacks a required field.
    #[error("Consequence {id} is missing detail field '{field}'")]
    MissingDetailField { id: String, field: String },

    /// A consequence detail field carries an unusable value.
    #[error("Consequence {id} has invalid detail field '{field}'")]
    InvalidDetailField { id: String, field: String },

    /// A condition definition could not be interpreted.
    #[error("Invalid condition: {0}")]
    InvalidCondition(String),
}
