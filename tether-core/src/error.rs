//! Error types for the dispatch registry.
//!
//! Registration-shape errors (`NotRegistered`, `DoubleUnregister`,
//! `ConflictingRegistration`) indicate API misuse and are always surfaced to
//! the caller, never silently recovered. Best-effort remote failures during
//! teardown and acknowledgment are not errors here; they are logged and
//! swallowed so teardown and ordered chains always make progress.

use std::path::PathBuf;

use thiserror::Error;

use crate::audit::LeakReport;
use crate::remote::HandleAlreadyDead;
use crate::types::{CallSite, CallbackId, CallbackKind};

/// Convenience result alias used throughout the crate.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Top-level error type for the dispatch registry. All errors are explicit
/// variants - no catch-all or generic handling.
#[derive(Debug, Error)]
pub enum DispatchError {
    // =========================================================================
    // Registration-shape errors - API misuse, always surfaced
    // =========================================================================
    #[error("{kind} not registered: {callback}")]
    NotRegistered {
        kind: CallbackKind,
        callback: CallbackId,
    },

    #[error("{kind} {callback} was already unregistered at {first_unregistered_at}")]
    DoubleUnregister {
        kind: CallbackKind,
        callback: CallbackId,
        /// Where the first, successful unregistration happened.
        first_unregistered_at: CallSite,
    },

    #[error(
        "{kind} {callback} re-registered with a differing {mismatch} \
         (originally registered at {registered_at})"
    )]
    ConflictingRegistration {
        kind: CallbackKind,
        callback: CallbackId,
        /// Which part of the registration differed.
        mismatch: &'static str,
        registered_at: CallSite,
    },

    // =========================================================================
    // Delivery and liveness errors
    // =========================================================================
    #[error(transparent)]
    HandleAlreadyDead(#[from] HandleAlreadyDead),

    #[error("{callback} failed during delivery")]
    CallbackFailure {
        callback: CallbackId,
        #[source]
        source: CallbackError,
    },

    #[error(transparent)]
    LeakDetected(#[from] LeakReport),

    // =========================================================================
    // Validation and configuration errors
    // =========================================================================
    #[error("Invalid endpoint name {name:?}: {reason}")]
    InvalidEndpointName { name: String, reason: String },

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// An error raised by a user callback during a marshaled invocation. Opaque
/// to the registry; it is offered to the [`ExceptionHook`] and escalated if
/// unhandled.
///
/// [`ExceptionHook`]: crate::receiver::ExceptionHook
#[derive(Debug, Error)]
#[error("{message}")]
pub struct CallbackError {
    message: String,
}

impl CallbackError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
