// SPDX-License-Identifier: Apache-2.0

//! Connection dispatch: per-endpoint tracking of remote handles and their
//! death monitors.
//!
//! Each dispatcher owns one connection listener and a map of named endpoints
//! to live handles. Death notifications are unordered relative to connects,
//! so every removal re-checks handle identity under the dispatcher's own
//! lock before acting. Connect/disconnect callbacks run outside that lock,
//! marshaled onto the owner's execution context when one was supplied.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use crate::context::ExecutionContext;
use crate::error::{DispatchError, DispatchResult};
use crate::remote::{DeathRecipient, HandleAlreadyDead, HandleId, RemoteHandle};
use crate::types::{CallSite, CallbackId, CallbackKind, EndpointName, OwnerId, StubId};

/// A local callback observing the lifecycle of named remote endpoints.
pub trait ConnectionListener: Send + Sync {
    fn on_connected(&self, endpoint: &EndpointName, handle: &Arc<dyn RemoteHandle>);
    fn on_disconnected(&self, endpoint: &EndpointName);
}

/// One live connection: the current handle plus the death monitor registered
/// on it. Replacing the handle unregisters the old monitor first.
struct ConnectionInfo {
    handle: Arc<dyn RemoteHandle>,
    monitor: Arc<dyn DeathRecipient>,
}

/// Fires when a watched handle dies. Holds the dispatcher weakly and the
/// handle by identity only, so it keeps neither alive.
struct DeathMonitor {
    endpoint: EndpointName,
    handle: HandleId,
    dispatcher: Weak<ServiceDispatcher>,
}

impl DeathRecipient for DeathMonitor {
    fn on_remote_death(&self) {
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.death(&self.endpoint, self.handle);
        }
    }
}

/// Per-(owner, callback) dispatcher for connection listeners.
pub(crate) struct ServiceDispatcher {
    stub_id: StubId,
    owner: OwnerId,
    listener: Arc<dyn ConnectionListener>,
    /// `None` selects the synchronous inline fallback.
    context: Option<Arc<dyn ExecutionContext>>,
    bound_at: CallSite,
    unbound_at: Mutex<Option<CallSite>>,
    /// Own lock, distinct from the registry maps, so death-monitor
    /// (un)registration never happens under the global lock.
    connections: Mutex<HashMap<EndpointName, ConnectionInfo>>,
}

impl ServiceDispatcher {
    pub(crate) fn new(
        owner: OwnerId,
        listener: Arc<dyn ConnectionListener>,
        context: Option<Arc<dyn ExecutionContext>>,
        bound_at: CallSite,
    ) -> (Arc<Self>, Arc<ConnectionStub>) {
        let dispatcher = Arc::new(Self {
            stub_id: StubId::next(),
            owner,
            listener,
            context,
            bound_at,
            unbound_at: Mutex::new(None),
            connections: Mutex::new(HashMap::new()),
        });
        let stub = Arc::new(ConnectionStub {
            id: dispatcher.stub_id,
            dispatcher: Arc::downgrade(&dispatcher),
        });
        (dispatcher, stub)
    }

    fn callback_id(&self) -> CallbackId {
        CallbackId::of(&self.listener)
    }

    pub(crate) fn bound_at(&self) -> CallSite {
        self.bound_at
    }

    pub(crate) fn set_unbind_site(&self, site: CallSite) {
        *self.unbound_at.lock().unwrap() = Some(site);
    }

    pub(crate) fn unbind_site(&self) -> Option<CallSite> {
        *self.unbound_at.lock().unwrap()
    }

    /// Check a re-binding against this dispatcher.
    pub(crate) fn validate(
        &self,
        context: &Option<Arc<dyn ExecutionContext>>,
    ) -> DispatchResult<()> {
        let same = match (&self.context, context) {
            (None, None) => true,
            (Some(ours), Some(theirs)) => Arc::ptr_eq(ours, theirs),
            _ => false,
        };
        if !same {
            return Err(DispatchError::ConflictingRegistration {
                kind: CallbackKind::Connection,
                callback: self.callback_id(),
                mismatch: "execution context",
                registered_at: self.bound_at,
            });
        }
        Ok(())
    }

    /// Marshal a connect (or clean disconnect, when `handle` is `None`) onto
    /// the owner's context.
    pub(crate) fn connected(
        self: &Arc<Self>,
        endpoint: EndpointName,
        handle: Option<Arc<dyn RemoteHandle>>,
    ) {
        match &self.context {
            Some(context) => {
                let dispatcher = Arc::clone(self);
                let posted =
                    context.post(Box::new(move || dispatcher.do_connected(&endpoint, handle)));
                if !posted {
                    tracing::warn!(
                        stub = %self.stub_id,
                        owner = %self.owner,
                        "execution context rejected connect notification"
                    );
                }
            }
            None => self.do_connected(&endpoint, handle),
        }
    }

    fn do_connected(
        self: &Arc<Self>,
        endpoint: &EndpointName,
        handle: Option<Arc<dyn RemoteHandle>>,
    ) {
        let old;
        {
            let mut connections = self.connections.lock().unwrap();
            old = connections
                .get(endpoint)
                .map(|info| (Arc::clone(&info.handle), Arc::clone(&info.monitor)));

            if let (Some((old_handle, _)), Some(new_handle)) = (&old, &handle) {
                if HandleId::of(old_handle) == HandleId::of(new_handle) {
                    // Duplicate connect for the handle we already track.
                    return;
                }
            }

            match &handle {
                Some(new_handle) => {
                    let monitor: Arc<dyn DeathRecipient> = Arc::new(DeathMonitor {
                        endpoint: endpoint.clone(),
                        handle: HandleId::of(new_handle),
                        dispatcher: Arc::downgrade(self),
                    });
                    match new_handle.register_death_monitor(Arc::clone(&monitor)) {
                        Ok(()) => {
                            connections.insert(
                                endpoint.clone(),
                                ConnectionInfo {
                                    handle: Arc::clone(new_handle),
                                    monitor,
                                },
                            );
                        }
                        Err(HandleAlreadyDead) => {
                            // The handle died before we could watch it.
                            // Drop the entry and treat the connect as if it
                            // never happened.
                            connections.remove(endpoint);
                            tracing::debug!(
                                stub = %self.stub_id,
                                endpoint = %endpoint,
                                "connect raced with remote death, ignoring"
                            );
                            return;
                        }
                    }
                }
                None => {
                    // The named endpoint is disconnecting cleanly.
                    connections.remove(endpoint);
                }
            }

            if let Some((old_handle, old_monitor)) = &old {
                old_handle.unregister_death_monitor(old_monitor);
            }
        }

        // Callbacks run outside the lock: the replaced handle is
        // disconnected first, then the new one connected.
        if old.is_some() {
            self.listener.on_disconnected(endpoint);
        }
        if let Some(new_handle) = &handle {
            tracing::debug!(
                stub = %self.stub_id,
                owner = %self.owner,
                endpoint = %endpoint,
                "remote endpoint connected"
            );
            self.listener.on_connected(endpoint, new_handle);
        }
    }

    /// Handle a death notification. Removal happens synchronously on the
    /// transport thread; the disconnect callback is marshaled.
    pub(crate) fn death(self: &Arc<Self>, endpoint: &EndpointName, handle: HandleId) {
        {
            let mut connections = self.connections.lock().unwrap();
            let matches = connections
                .get(endpoint)
                .is_some_and(|info| HandleId::of(&info.handle) == handle);
            if !matches {
                // Death for a handle we already replaced or dropped.
                tracing::debug!(
                    stub = %self.stub_id,
                    endpoint = %endpoint,
                    "ignoring stale death notification"
                );
                return;
            }
            if let Some(info) = connections.remove(endpoint) {
                info.handle.unregister_death_monitor(&info.monitor);
            }
        }

        tracing::debug!(
            stub = %self.stub_id,
            owner = %self.owner,
            endpoint = %endpoint,
            "remote endpoint died"
        );

        match &self.context {
            Some(context) => {
                let dispatcher = Arc::clone(self);
                let endpoint = endpoint.clone();
                let posted = context.post(Box::new(move || {
                    dispatcher.listener.on_disconnected(&endpoint);
                }));
                if !posted {
                    tracing::warn!(
                        stub = %self.stub_id,
                        "execution context rejected death notification"
                    );
                }
            }
            None => self.listener.on_disconnected(endpoint),
        }
    }

    /// Teardown path: unlink every death monitor and clear the map without
    /// invoking callbacks. The owner is gone.
    pub(crate) fn force_revoke_all(&self) {
        let mut connections = self.connections.lock().unwrap();
        for info in connections.values() {
            info.handle.unregister_death_monitor(&info.monitor);
        }
        connections.clear();
    }
}

/// The remote-facing proxy for a connection registration.
#[derive(Debug)]
pub struct ConnectionStub {
    id: StubId,
    dispatcher: Weak<ServiceDispatcher>,
}

impl ConnectionStub {
    /// The token the remote coordinator knows this registration by.
    pub fn id(&self) -> StubId {
        self.id
    }

    /// Transport entry point: a named endpoint connected (`Some`) or
    /// disconnected cleanly (`None`). No-op once the registration is gone.
    pub fn receive_connected(
        &self,
        endpoint: EndpointName,
        handle: Option<Arc<dyn RemoteHandle>>,
    ) {
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.connected(endpoint, handle);
        }
    }

    /// Transport entry point: a named endpoint's handle died.
    pub fn receive_died(&self, endpoint: &EndpointName, handle: &Arc<dyn RemoteHandle>) {
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.death(endpoint, HandleId::of(handle));
        }
    }
}
