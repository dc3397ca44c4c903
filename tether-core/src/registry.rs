//! The process-wide registration registry.
//!
//! Two independent map families, receivers and connection listeners, each a
//! two-level owner -> callback map with a parallel "recently unregistered"
//! map for leak forensics. All mutation happens under the owning shard's
//! lock; remote calls never do.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::RegistryConfig;
use crate::context::ExecutionContext;
use crate::error::{DispatchError, DispatchResult};
use crate::receiver::{ExceptionHook, NotificationReceiver, ReceiverDispatcher, ReceiverStub};
use crate::remote::RemoteCoordinator;
use crate::service::{ConnectionListener, ConnectionStub, ServiceDispatcher};
use crate::types::{CallSite, CallbackId, CallbackKind, OwnerId, OwnerScope};

pub(crate) struct ReceiverEntry {
    pub(crate) dispatcher: Arc<ReceiverDispatcher>,
    pub(crate) stub: Arc<ReceiverStub>,
}

pub(crate) struct ServiceEntry {
    pub(crate) dispatcher: Arc<ServiceDispatcher>,
    pub(crate) stub: Arc<ConnectionStub>,
}

/// The dispatch registry: one per loaded module instance.
///
/// Registration is idempotent per (owner, callback) pair; unregistration is
/// strictly one-shot. The registry holds the only strong reference to each
/// tracked dispatcher, so dropping an entry is what eventually makes its
/// stub inert.
pub struct DispatchRegistry {
    coordinator: Arc<dyn RemoteCoordinator>,
    hook: Option<Arc<dyn ExceptionHook>>,
    pub(crate) config: RegistryConfig,
    pub(crate) receivers: DashMap<OwnerId, HashMap<CallbackId, ReceiverEntry>>,
    pub(crate) unregistered_receivers: DashMap<OwnerId, HashMap<CallbackId, Arc<ReceiverDispatcher>>>,
    pub(crate) services: DashMap<OwnerId, HashMap<CallbackId, ServiceEntry>>,
    pub(crate) unbound_services: DashMap<OwnerId, HashMap<CallbackId, Arc<ServiceDispatcher>>>,
}

impl DispatchRegistry {
    /// Create a new registry talking to the given coordinator.
    pub fn new(coordinator: Arc<dyn RemoteCoordinator>, config: RegistryConfig) -> Self {
        Self {
            coordinator,
            hook: None,
            config,
            receivers: DashMap::new(),
            unregistered_receivers: DashMap::new(),
            services: DashMap::new(),
            unbound_services: DashMap::new(),
        }
    }

    /// Install an exception hook consulted before a callback failure is
    /// escalated.
    pub fn with_exception_hook(mut self, hook: Arc<dyn ExceptionHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub(crate) fn coordinator(&self) -> &Arc<dyn RemoteCoordinator> {
        &self.coordinator
    }

    /// Register a notification receiver under an owner scope.
    ///
    /// Idempotent: re-registering the same callback under the same owner
    /// returns the existing stub, after validating that the execution
    /// context matches the original registration.
    #[track_caller]
    pub fn register_receiver(
        &self,
        owner: &OwnerScope,
        receiver: Arc<dyn NotificationReceiver>,
        context: Arc<dyn ExecutionContext>,
    ) -> DispatchResult<Arc<ReceiverStub>> {
        let site = CallSite::here();
        let callback = CallbackId::of(&receiver);

        let mut map = self.receivers.entry(owner.id()).or_default();
        if let Some(entry) = map.get(&callback) {
            entry.dispatcher.validate(&context)?;
            return Ok(Arc::clone(&entry.stub));
        }

        let (dispatcher, stub) = ReceiverDispatcher::new(
            owner.id(),
            receiver,
            context,
            Arc::clone(&self.coordinator),
            self.hook.clone(),
            true,
            site,
        );
        tracing::debug!(
            owner = %owner.id(),
            callback = %callback,
            stub = %stub.id(),
            "registered notification receiver"
        );
        map.insert(
            callback,
            ReceiverEntry {
                dispatcher,
                stub: Arc::clone(&stub),
            },
        );
        Ok(stub)
    }

    /// Create an untracked, one-shot receiver stub. The registry never
    /// indexes it; the stub keeps the dispatcher alive on its own and never
    /// acknowledges.
    #[track_caller]
    pub fn one_shot_receiver(
        &self,
        owner: &OwnerScope,
        receiver: Arc<dyn NotificationReceiver>,
        context: Arc<dyn ExecutionContext>,
    ) -> Arc<ReceiverStub> {
        let (_dispatcher, stub) = ReceiverDispatcher::new(
            owner.id(),
            receiver,
            context,
            Arc::clone(&self.coordinator),
            self.hook.clone(),
            false,
            CallSite::here(),
        );
        stub
    }

    /// Unregister a receiver. Strictly one-shot: a second call fails with
    /// `DoubleUnregister` (when forensics are enabled) or `NotRegistered`.
    #[track_caller]
    pub fn unregister_receiver(
        &self,
        owner: &OwnerScope,
        receiver: &Arc<dyn NotificationReceiver>,
    ) -> DispatchResult<Arc<ReceiverStub>> {
        let site = CallSite::here();
        let callback = CallbackId::of(receiver);

        if let Some(mut map) = self.receivers.get_mut(&owner.id()) {
            if let Some(entry) = map.remove(&callback) {
                drop(map);
                self.receivers.remove_if(&owner.id(), |_, m| m.is_empty());

                if self.config.track_unregistered_receivers {
                    entry.dispatcher.set_unregister_site(site);
                    self.unregistered_receivers
                        .entry(owner.id())
                        .or_default()
                        .insert(callback, Arc::clone(&entry.dispatcher));
                }
                tracing::debug!(
                    owner = %owner.id(),
                    callback = %callback,
                    "unregistered notification receiver"
                );
                return Ok(entry.stub);
            }
        }

        if let Some(map) = self.unregistered_receivers.get(&owner.id()) {
            if let Some(first) = map.get(&callback).and_then(|rd| rd.unregister_site()) {
                return Err(DispatchError::DoubleUnregister {
                    kind: CallbackKind::Receiver,
                    callback,
                    first_unregistered_at: first,
                });
            }
        }

        Err(DispatchError::NotRegistered {
            kind: CallbackKind::Receiver,
            callback,
        })
    }

    /// Bind a connection listener under an owner scope. `context = None`
    /// selects the synchronous inline fallback for lifecycle callbacks.
    ///
    /// Idempotent with the same validation shape as receivers.
    #[track_caller]
    pub fn bind_connection(
        &self,
        owner: &OwnerScope,
        listener: Arc<dyn ConnectionListener>,
        context: Option<Arc<dyn ExecutionContext>>,
    ) -> DispatchResult<Arc<ConnectionStub>> {
        let site = CallSite::here();
        let callback = CallbackId::of(&listener);

        let mut map = self.services.entry(owner.id()).or_default();
        if let Some(entry) = map.get(&callback) {
            entry.dispatcher.validate(&context)?;
            return Ok(Arc::clone(&entry.stub));
        }

        let (dispatcher, stub) = ServiceDispatcher::new(owner.id(), listener, context, site);
        tracing::debug!(
            owner = %owner.id(),
            callback = %callback,
            stub = %stub.id(),
            "bound connection listener"
        );
        map.insert(
            callback,
            ServiceEntry {
                dispatcher,
                stub: Arc::clone(&stub),
            },
        );
        Ok(stub)
    }

    /// Unbind a connection listener, force-revoking its live connections
    /// (death monitors unlinked, no callbacks).
    #[track_caller]
    pub fn unbind_connection(
        &self,
        owner: &OwnerScope,
        listener: &Arc<dyn ConnectionListener>,
    ) -> DispatchResult<Arc<ConnectionStub>> {
        let site = CallSite::here();
        let callback = CallbackId::of(listener);

        if let Some(mut map) = self.services.get_mut(&owner.id()) {
            if let Some(entry) = map.remove(&callback) {
                drop(map);
                self.services.remove_if(&owner.id(), |_, m| m.is_empty());

                entry.dispatcher.force_revoke_all();
                if self.config.track_unbound_connections {
                    entry.dispatcher.set_unbind_site(site);
                    self.unbound_services
                        .entry(owner.id())
                        .or_default()
                        .insert(callback, Arc::clone(&entry.dispatcher));
                }
                tracing::debug!(
                    owner = %owner.id(),
                    callback = %callback,
                    "unbound connection listener"
                );
                return Ok(entry.stub);
            }
        }

        if let Some(map) = self.unbound_services.get(&owner.id()) {
            if let Some(first) = map.get(&callback).and_then(|sd| sd.unbind_site()) {
                return Err(DispatchError::DoubleUnregister {
                    kind: CallbackKind::Connection,
                    callback,
                    first_unregistered_at: first,
                });
            }
        }

        Err(DispatchError::NotRegistered {
            kind: CallbackKind::Connection,
            callback,
        })
    }

    /// Number of live receiver registrations for an owner.
    pub fn receiver_count(&self, owner: &OwnerScope) -> usize {
        self.receivers
            .get(&owner.id())
            .map_or(0, |map| map.len())
    }

    /// Number of live connection registrations for an owner.
    pub fn connection_count(&self, owner: &OwnerScope) -> usize {
        self.services.get(&owner.id()).map_or(0, |map| map.len())
    }
}
