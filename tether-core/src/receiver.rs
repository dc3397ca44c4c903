//! Receiver dispatch: marshaling inbound notifications onto the owner's
//! execution context and completing the ordered-acknowledgment protocol.
//!
//! A dispatcher owns one local receiver. Its stub is what the remote side
//! holds; the stub references the dispatcher weakly, so an unregistered
//! dispatcher can be reclaimed while the stub keeps satisfying the ordered
//! protocol on its behalf.

use std::sync::{Arc, Mutex, Weak};

use crate::context::{ExecutionContext, Task};
use crate::error::{CallbackError, DispatchError, DispatchResult};
use crate::remote::RemoteCoordinator;
use crate::types::{CallSite, CallbackId, CallbackKind, DeliveryResult, Notification, OwnerId, StubId};

/// A local callback receiving notifications from the remote coordinator.
///
/// Invocations are marshaled onto the execution context declared at
/// registration. Returning `Err` offers the failure to the registry's
/// [`ExceptionHook`]; an unhandled failure is fatal, mirroring an uncaught
/// exception on an event loop.
pub trait NotificationReceiver: Send + Sync {
    fn on_receive(
        &self,
        notification: &Notification,
        delivery: &mut Delivery<'_>,
    ) -> Result<(), CallbackError>;
}

/// Decides whether a callback failure is survivable. Modeled on an external
/// instrumentation hook: returning `true` suppresses escalation.
pub trait ExceptionHook: Send + Sync {
    fn on_callback_error(&self, callback: CallbackId, error: &CallbackError) -> bool;
}

/// One in-flight invocation as seen by the receiver: the mutable result
/// state plus the ordered/sticky hints of the inbound call.
pub struct Delivery<'a> {
    result: &'a mut DeliveryResult,
    abort: bool,
    ordered: bool,
    sticky: bool,
}

impl Delivery<'_> {
    /// The result state as left by the previous receiver in the chain.
    pub fn result(&self) -> &DeliveryResult {
        self.result
    }

    /// Mutate the result state carried back in the acknowledgment.
    pub fn result_mut(&mut self) -> &mut DeliveryResult {
        self.result
    }

    /// Whether this delivery is part of an ordered chain.
    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    /// Whether this is the initial replay of a sticky notification.
    pub fn is_initial_sticky(&self) -> bool {
        self.sticky
    }

    /// Stop the ordered chain after this receiver. Ignored for unordered
    /// deliveries.
    pub fn abort_chain(&mut self) {
        if self.ordered {
            self.abort = true;
        }
    }
}

/// Per-(owner, callback) dispatcher for notification receivers.
pub(crate) struct ReceiverDispatcher {
    stub_id: StubId,
    owner: OwnerId,
    receiver: Arc<dyn NotificationReceiver>,
    context: Arc<dyn ExecutionContext>,
    coordinator: Arc<dyn RemoteCoordinator>,
    hook: Option<Arc<dyn ExceptionHook>>,
    /// True for tracked registrations; one-shot dispatchers never
    /// acknowledge.
    registered: bool,
    registered_at: CallSite,
    unregistered_at: Mutex<Option<CallSite>>,
}

impl ReceiverDispatcher {
    pub(crate) fn new(
        owner: OwnerId,
        receiver: Arc<dyn NotificationReceiver>,
        context: Arc<dyn ExecutionContext>,
        coordinator: Arc<dyn RemoteCoordinator>,
        hook: Option<Arc<dyn ExceptionHook>>,
        registered: bool,
        registered_at: CallSite,
    ) -> (Arc<Self>, Arc<ReceiverStub>) {
        let dispatcher = Arc::new(Self {
            stub_id: StubId::next(),
            owner,
            receiver,
            context,
            coordinator: Arc::clone(&coordinator),
            hook,
            registered,
            registered_at,
            unregistered_at: Mutex::new(None),
        });

        let target = if registered {
            StubTarget::Tracked(Arc::downgrade(&dispatcher))
        } else {
            StubTarget::OneShot(Arc::clone(&dispatcher))
        };
        let stub = Arc::new(ReceiverStub {
            id: dispatcher.stub_id,
            target,
            coordinator,
        });

        (dispatcher, stub)
    }

    fn callback_id(&self) -> CallbackId {
        CallbackId::of(&self.receiver)
    }

    pub(crate) fn registered_at(&self) -> CallSite {
        self.registered_at
    }

    pub(crate) fn set_unregister_site(&self, site: CallSite) {
        *self.unregistered_at.lock().unwrap() = Some(site);
    }

    pub(crate) fn unregister_site(&self) -> Option<CallSite> {
        *self.unregistered_at.lock().unwrap()
    }

    /// Check a re-registration against this dispatcher. The owner already
    /// matched (it is the map key); the execution context must be the same
    /// instance.
    pub(crate) fn validate(&self, context: &Arc<dyn ExecutionContext>) -> DispatchResult<()> {
        if !Arc::ptr_eq(&self.context, context) {
            return Err(DispatchError::ConflictingRegistration {
                kind: CallbackKind::Receiver,
                callback: self.callback_id(),
                mismatch: "execution context",
                registered_at: self.registered_at,
            });
        }
        Ok(())
    }

    /// Marshal one inbound notification onto the execution context.
    pub(crate) fn perform_receive(
        self: &Arc<Self>,
        notification: Notification,
        result: DeliveryResult,
        ordered: bool,
        sticky: bool,
    ) {
        tracing::debug!(
            stub = %self.stub_id,
            owner = %self.owner,
            topic = %notification.topic,
            ordered,
            "enqueueing notification"
        );

        // Keep the inbound result for the dead-context fallback; the task
        // consumes the original.
        let fallback = (self.registered && ordered).then(|| result.clone());

        let dispatcher = Arc::clone(self);
        let task: Task =
            Box::new(move || dispatcher.run_delivery(notification, result, ordered, sticky));

        if !self.context.post(task) {
            // The target context has shut down. An ordered chain must never
            // stall on a dead target, so finish with the original result.
            if let Some(result) = fallback {
                self.acknowledge(result, false);
            }
        }
    }

    /// Runs on the execution context: invoke the receiver, then acknowledge
    /// exactly once if the inbound call was ordered and this dispatcher is
    /// the registered kind.
    fn run_delivery(
        &self,
        notification: Notification,
        mut result: DeliveryResult,
        ordered: bool,
        sticky: bool,
    ) {
        tracing::debug!(
            stub = %self.stub_id,
            topic = %notification.topic,
            "dispatching notification"
        );

        let must_ack = self.registered && ordered;
        let mut delivery = Delivery {
            result: &mut result,
            abort: false,
            ordered,
            sticky,
        };

        match self.receiver.on_receive(&notification, &mut delivery) {
            Ok(()) => {
                let abort = delivery.abort;
                if must_ack {
                    self.acknowledge(result, abort);
                }
            }
            Err(error) => {
                // The acknowledgment goes out first, with the last-known
                // result state, so the chain is not blocked by the failure.
                if must_ack {
                    self.acknowledge(result, false);
                }
                let callback = self.callback_id();
                let handled = self
                    .hook
                    .as_ref()
                    .is_some_and(|hook| hook.on_callback_error(callback, &error));
                if !handled {
                    let failure = DispatchError::CallbackFailure {
                        callback,
                        source: error,
                    };
                    tracing::error!(
                        stub = %self.stub_id,
                        topic = %notification.topic,
                        "{failure}"
                    );
                    panic!("{failure}");
                }
            }
        }
    }

    fn acknowledge(&self, result: DeliveryResult, abort: bool) {
        tracing::debug!(
            stub = %self.stub_id,
            code = result.code,
            abort,
            "finishing ordered notification"
        );
        if let Err(error) = self.coordinator.acknowledge(self.stub_id, result, abort) {
            tracing::warn!(
                stub = %self.stub_id,
                error = %error,
                "remote coordinator rejected acknowledgment"
            );
        }
    }
}

enum StubTarget {
    /// Tracked registration: the registry owns the dispatcher, the stub must
    /// not keep it alive.
    Tracked(Weak<ReceiverDispatcher>),
    /// One-shot: the stub is the dispatcher's only owner.
    OneShot(Arc<ReceiverDispatcher>),
}

impl StubTarget {
    fn get(&self) -> Option<Arc<ReceiverDispatcher>> {
        match self {
            Self::Tracked(weak) => weak.upgrade(),
            Self::OneShot(strong) => Some(Arc::clone(strong)),
        }
    }
}

/// The remote-facing proxy for a receiver registration. Handed to the
/// external coordinator in place of the receiver itself.
pub struct ReceiverStub {
    id: StubId,
    target: StubTarget,
    coordinator: Arc<dyn RemoteCoordinator>,
}

impl std::fmt::Debug for ReceiverStub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiverStub")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl ReceiverStub {
    /// The token the remote coordinator knows this registration by.
    pub fn id(&self) -> StubId {
        self.id
    }

    /// Transport entry point: one inbound notification for this stub.
    pub fn receive_notification(
        &self,
        notification: Notification,
        result: DeliveryResult,
        ordered: bool,
        sticky: bool,
    ) {
        match self.target.get() {
            Some(dispatcher) => dispatcher.perform_receive(notification, result, ordered, sticky),
            None => {
                // The coordinator dispatched to a receiver that was
                // unregistered and reclaimed in the meantime. Acknowledge on
                // its behalf so the ordered sequence can continue.
                if ordered {
                    tracing::debug!(stub = %self.id, "finishing notification for unregistered receiver");
                    if let Err(error) = self.coordinator.acknowledge(self.id, result, false) {
                        tracing::warn!(
                            stub = %self.id,
                            error = %error,
                            "could not finish notification for unregistered receiver"
                        );
                    }
                }
            }
        }
    }
}
