// SPDX-License-Identifier: Apache-2.0

//! Leak audit: what happens when an owner scope ends with registrations
//! still live.
//!
//! Teardown is detection and cleanup, never a correctness gate: every remote
//! revocation is best-effort and a failure is logged and skipped, because
//! the local scope is going away regardless.

use thiserror::Error;

use crate::registry::DispatchRegistry;
use crate::types::{CallSite, CallbackId, CallbackKind, OwnerId, OwnerScope};

/// One registration that was still live when its owner was torn down.
/// Points at the original registration site so the missing unregister call
/// can be found.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "{owner} leaked a {kind} ({callback}) originally registered at {registered_at}; \
     is an unregister call missing?"
)]
pub struct LeakReport {
    pub kind: CallbackKind,
    pub owner: OwnerId,
    pub callback: CallbackId,
    pub registered_at: CallSite,
}

impl DispatchRegistry {
    /// Tear down an owner scope: drain every live dispatcher registered
    /// under it, emit a leak report per dispatcher, and best-effort revoke
    /// the remote side of each registration. Forensic records for the owner
    /// are dropped as well.
    ///
    /// Returns the leak reports; an empty vector means the owner had
    /// unregistered everything properly.
    pub fn teardown_owner(&self, owner: &OwnerScope) -> Vec<LeakReport> {
        let mut reports = Vec::new();

        if let Some((_, receivers)) = self.receivers.remove(&owner.id()) {
            for (callback, entry) in receivers {
                let report = LeakReport {
                    kind: CallbackKind::Receiver,
                    owner: owner.id(),
                    callback,
                    registered_at: entry.dispatcher.registered_at(),
                };
                tracing::error!(owner = %owner.id(), callback = %callback, "{report}");
                if let Err(error) = self.coordinator().revoke_receiver(entry.stub.id()) {
                    tracing::warn!(
                        stub = %entry.stub.id(),
                        error = %error,
                        "could not revoke leaked receiver registration"
                    );
                }
                reports.push(report);
            }
        }
        self.unregistered_receivers.remove(&owner.id());

        if let Some((_, services)) = self.services.remove(&owner.id()) {
            for (callback, entry) in services {
                let report = LeakReport {
                    kind: CallbackKind::Connection,
                    owner: owner.id(),
                    callback,
                    registered_at: entry.dispatcher.bound_at(),
                };
                tracing::error!(owner = %owner.id(), callback = %callback, "{report}");
                if let Err(error) = self.coordinator().unbind_connection(entry.stub.id()) {
                    tracing::warn!(
                        stub = %entry.stub.id(),
                        error = %error,
                        "could not unbind leaked connection registration"
                    );
                }
                entry.dispatcher.force_revoke_all();
                reports.push(report);
            }
        }
        self.unbound_services.remove(&owner.id());

        reports
    }
}
