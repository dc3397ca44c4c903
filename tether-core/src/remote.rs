// SPDX-License-Identifier: Apache-2.0

//! Collaborator interfaces toward the remote coordinator and its endpoints.
//!
//! The registry does not implement the transport. It talks to the outside
//! world through these narrow traits: the coordinator completes ordered
//! calls and revokes registrations, remote handles accept death monitors.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::types::{DeliveryResult, StubId};

/// A remote call failed at the transport layer. Best-effort paths log this
/// and continue; it is never fatal to the local process.
#[derive(Debug, Error)]
#[error("remote call failed: {message}")]
pub struct RemoteError {
    message: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Registering a death monitor raced with the remote endpoint dying.
#[derive(Debug, Error)]
#[error("remote handle is already dead")]
pub struct HandleAlreadyDead;

/// The external coordinator that owns the cross-process side of every
/// registration.
pub trait RemoteCoordinator: Send + Sync {
    /// Complete one ordered inbound call for the given stub, carrying the
    /// (possibly mutated) result state and the abort flag.
    fn acknowledge(
        &self,
        stub: StubId,
        result: DeliveryResult,
        abort: bool,
    ) -> Result<(), RemoteError>;

    /// Revoke a leaked receiver registration during owner teardown.
    fn revoke_receiver(&self, stub: StubId) -> Result<(), RemoteError>;

    /// Unbind a leaked connection registration during owner teardown.
    fn unbind_connection(&self, stub: StubId) -> Result<(), RemoteError>;
}

/// Notified when a remote endpoint becomes unreachable. Death notifications
/// are unordered relative to connects, so recipients must re-check identity
/// before acting.
pub trait DeathRecipient: Send + Sync {
    fn on_remote_death(&self);
}

/// A live handle to a remote endpoint, capable of hosting death monitors.
pub trait RemoteHandle: Send + Sync {
    /// Register a death monitor. Fails if the endpoint is already dead.
    fn register_death_monitor(
        &self,
        recipient: Arc<dyn DeathRecipient>,
    ) -> Result<(), HandleAlreadyDead>;

    /// Unregister a previously registered death monitor. Unknown recipients
    /// are ignored.
    fn unregister_death_monitor(&self, recipient: &Arc<dyn DeathRecipient>);
}

/// Identity of a remote handle, taken from its `Arc` pointer. Used to tell
/// a stale death notification for a replaced handle from a live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleId(usize);

impl HandleId {
    pub fn of(handle: &Arc<dyn RemoteHandle>) -> Self {
        Self(Arc::as_ptr(handle).cast::<()>() as usize)
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle-{:#x}", self.0)
    }
}
