// SPDX-License-Identifier: Apache-2.0

//! Identity and value types used across the dispatch registry.
//!
//! Owners, callbacks, and stubs are identity-compared, never value-compared:
//! the ids here are minted from atomic counters or pointer identity so that
//! two distinct registrations can never collide.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

/// Maximum length of an endpoint name in characters.
const MAX_ENDPOINT_NAME_LEN: usize = 256;

static NEXT_OWNER_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_STUB_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a registration scope. Minted by [`OwnerScope::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(u64);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner-{}", self.0)
    }
}

/// A logical registration scope (a session). The registry never owns the
/// scope; it only keys its maps by the scope's [`OwnerId`]. Dropping the
/// scope without calling `teardown_owner` is what the leak audit detects.
#[derive(Debug)]
pub struct OwnerScope {
    id: OwnerId,
}

impl OwnerScope {
    /// Mint a new scope with a process-unique id.
    pub fn new() -> Self {
        Self {
            id: OwnerId(NEXT_OWNER_ID.fetch_add(1, Ordering::Relaxed)),
        }
    }

    /// Get the scope's identity.
    pub fn id(&self) -> OwnerId {
        self.id
    }
}

impl Default for OwnerScope {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity of a callback object, taken from its `Arc` pointer. Two clones
/// of the same `Arc` compare equal; two separately allocated callbacks never
/// do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(usize);

impl CallbackId {
    /// Capture the identity of a callback `Arc`.
    pub fn of<T: ?Sized>(callback: &Arc<T>) -> Self {
        Self(Arc::as_ptr(callback).cast::<()>() as usize)
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "callback-{:#x}", self.0)
    }
}

/// Identity of a remote-facing stub, process-unique. This is the token the
/// remote coordinator uses to complete ordered calls and revoke
/// registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StubId(u64);

impl StubId {
    pub(crate) fn next() -> Self {
        Self(NEXT_STUB_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for StubId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stub-{}", self.0)
    }
}

/// Which capability a registration carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    /// A notification receiver.
    Receiver,
    /// A connection-lifecycle listener.
    Connection,
}

impl CallbackKind {
    /// Get the kind name for error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Receiver => "receiver",
            Self::Connection => "connection listener",
        }
    }
}

impl fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Validated name of a remote endpoint (the service being connected to).
/// Must be non-empty, at most 256 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EndpointName(String);

impl EndpointName {
    /// Create a new EndpointName with validation.
    pub fn new(name: impl Into<String>) -> Result<Self, DispatchError> {
        let name = name.into();
        if name.is_empty() {
            return Err(DispatchError::InvalidEndpointName {
                name,
                reason: "endpoint name cannot be empty".to_string(),
            });
        }
        if name.len() > MAX_ENDPOINT_NAME_LEN {
            let reason = format!(
                "endpoint name too long: {} chars (max {})",
                name.len(),
                MAX_ENDPOINT_NAME_LEN
            );
            return Err(DispatchError::InvalidEndpointName { name, reason });
        }
        Ok(Self(name))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for EndpointName {
    type Error = DispatchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EndpointName> for String {
    fn from(name: EndpointName) -> Self {
        name.0
    }
}

/// The call site of a registration or unregistration, captured through
/// `#[track_caller]`. Carried in leak reports and double-unregister errors
/// so the original registration can be found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    file: &'static str,
    line: u32,
    column: u32,
}

impl CallSite {
    /// Capture the caller's location.
    #[track_caller]
    pub fn here() -> Self {
        Self::from(Location::caller())
    }

    pub fn file(&self) -> &'static str {
        self.file
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn column(&self) -> u32 {
        self.column
    }
}

impl From<&'static Location<'static>> for CallSite {
    fn from(location: &'static Location<'static>) -> Self {
        Self {
            file: location.file(),
            line: location.line(),
            column: location.column(),
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// An inbound notification. The registry owns no wire format; this is the
/// already-decoded form handed over by the external RPC layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// What the notification is about (the broadcast action).
    pub topic: String,
    /// Opaque payload bytes.
    pub body: Vec<u8>,
}

impl Notification {
    pub fn new(topic: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            body: body.into(),
        }
    }
}

/// Mutable result state threaded through an ordered delivery chain. Each
/// receiver in the chain sees the previous receiver's result and may mutate
/// it before the acknowledgment carries it back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryResult {
    /// Result code, starts at the producer's initial code.
    pub code: i32,
    /// Optional result data string.
    pub data: Option<String>,
    /// Extra key/value results.
    pub extras: BTreeMap<String, String>,
}

impl DeliveryResult {
    pub fn with_code(code: i32) -> Self {
        Self {
            code,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_ids_are_unique() {
        let a = OwnerScope::new();
        let b = OwnerScope::new();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn callback_id_follows_arc_identity() {
        let first: Arc<str> = Arc::from("x");
        let clone = Arc::clone(&first);
        let other: Arc<str> = Arc::from("x");

        assert_eq!(CallbackId::of(&first), CallbackId::of(&clone));
        assert_ne!(CallbackId::of(&first), CallbackId::of(&other));
    }

    #[test]
    fn endpoint_name_validation() {
        assert!(EndpointName::new("svc.compute").is_ok());
        assert!(EndpointName::new("").is_err());
        assert!(EndpointName::new("x".repeat(257)).is_err());
    }

    #[test]
    fn call_site_captures_this_file() {
        let site = CallSite::here();
        assert!(site.file().ends_with("types.rs"));
        assert!(site.line() > 0);
        assert!(site.to_string().contains("types.rs"));
    }
}
