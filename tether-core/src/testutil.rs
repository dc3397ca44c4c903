//! Recording doubles shared by the unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::context::{ExecutionContext, Task};
use crate::error::CallbackError;
use crate::receiver::{Delivery, ExceptionHook, NotificationReceiver};
use crate::remote::{
    DeathRecipient, HandleAlreadyDead, RemoteCoordinator, RemoteError, RemoteHandle,
};
use crate::service::ConnectionListener;
use crate::types::{CallbackId, DeliveryResult, EndpointName, Notification, StubId};

/// Runs posted tasks inline, so tests observe deliveries synchronously.
pub(crate) struct InlineContext;

impl ExecutionContext for InlineContext {
    fn post(&self, task: Task) -> bool {
        task();
        true
    }
}

/// Rejects every post, simulating a context that has shut down.
pub(crate) struct DeadContext;

impl ExecutionContext for DeadContext {
    fn post(&self, _task: Task) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AckRecord {
    pub stub: StubId,
    pub result: DeliveryResult,
    pub abort: bool,
}

/// Records every coordinator call; can be told to fail acknowledgments.
#[derive(Default)]
pub(crate) struct RecordingCoordinator {
    pub acks: Mutex<Vec<AckRecord>>,
    pub revoked_receivers: Mutex<Vec<StubId>>,
    pub unbound_connections: Mutex<Vec<StubId>>,
    pub fail_remote_calls: AtomicBool,
}

impl RecordingCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn ack_count(&self) -> usize {
        self.acks.lock().unwrap().len()
    }

    fn check_liveness(&self) -> Result<(), RemoteError> {
        if self.fail_remote_calls.load(Ordering::SeqCst) {
            Err(RemoteError::new("coordinator unreachable"))
        } else {
            Ok(())
        }
    }
}

impl RemoteCoordinator for RecordingCoordinator {
    fn acknowledge(
        &self,
        stub: StubId,
        result: DeliveryResult,
        abort: bool,
    ) -> Result<(), RemoteError> {
        self.check_liveness()?;
        self.acks.lock().unwrap().push(AckRecord {
            stub,
            result,
            abort,
        });
        Ok(())
    }

    fn revoke_receiver(&self, stub: StubId) -> Result<(), RemoteError> {
        self.check_liveness()?;
        self.revoked_receivers.lock().unwrap().push(stub);
        Ok(())
    }

    fn unbind_connection(&self, stub: StubId) -> Result<(), RemoteError> {
        self.check_liveness()?;
        self.unbound_connections.lock().unwrap().push(stub);
        Ok(())
    }
}

/// Receiver that records invocations and optionally mutates the result,
/// aborts the chain, or fails.
#[derive(Default)]
pub(crate) struct RecordingReceiver {
    pub seen: Mutex<Vec<Notification>>,
    pub hints: Mutex<Vec<(bool, bool)>>,
    pub set_code: Option<i32>,
    pub abort: bool,
    pub fail_with: Option<&'static str>,
}

impl RecordingReceiver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn mutating(code: i32) -> Arc<Self> {
        Arc::new(Self {
            set_code: Some(code),
            ..Self::default()
        })
    }

    pub fn failing(message: &'static str) -> Arc<Self> {
        Arc::new(Self {
            fail_with: Some(message),
            ..Self::default()
        })
    }

    pub fn seen_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

impl NotificationReceiver for RecordingReceiver {
    fn on_receive(
        &self,
        notification: &Notification,
        delivery: &mut Delivery<'_>,
    ) -> Result<(), CallbackError> {
        self.seen.lock().unwrap().push(notification.clone());
        self.hints
            .lock()
            .unwrap()
            .push((delivery.is_ordered(), delivery.is_initial_sticky()));
        if let Some(code) = self.set_code {
            delivery.result_mut().code = code;
        }
        if self.abort {
            delivery.abort_chain();
        }
        match self.fail_with {
            Some(message) => Err(CallbackError::new(message)),
            None => Ok(()),
        }
    }
}

/// Exception hook that records offers and answers with a fixed verdict.
pub(crate) struct RecordingHook {
    pub handled: bool,
    pub offers: Mutex<Vec<(CallbackId, String)>>,
}

impl RecordingHook {
    pub fn handling() -> Arc<Self> {
        Arc::new(Self {
            handled: true,
            offers: Mutex::new(Vec::new()),
        })
    }
}

impl ExceptionHook for RecordingHook {
    fn on_callback_error(&self, callback: CallbackId, error: &CallbackError) -> bool {
        self.offers
            .lock()
            .unwrap()
            .push((callback, error.message().to_string()));
        self.handled
    }
}

/// Remote handle double with a controllable death switch.
pub(crate) struct FakeHandle {
    dead: AtomicBool,
    recipients: Mutex<Vec<Arc<dyn DeathRecipient>>>,
}

impl FakeHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            dead: AtomicBool::new(false),
            recipients: Mutex::new(Vec::new()),
        })
    }

    pub fn new_dead() -> Arc<Self> {
        let handle = Self::new();
        handle.dead.store(true, Ordering::SeqCst);
        handle
    }

    /// Fire every registered death monitor, as the transport would.
    pub fn fire_death(&self) {
        self.dead.store(true, Ordering::SeqCst);
        let recipients: Vec<_> = self.recipients.lock().unwrap().drain(..).collect();
        for recipient in recipients {
            recipient.on_remote_death();
        }
    }

    pub fn monitor_count(&self) -> usize {
        self.recipients.lock().unwrap().len()
    }
}

impl RemoteHandle for FakeHandle {
    fn register_death_monitor(
        &self,
        recipient: Arc<dyn DeathRecipient>,
    ) -> Result<(), HandleAlreadyDead> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(HandleAlreadyDead);
        }
        self.recipients.lock().unwrap().push(recipient);
        Ok(())
    }

    fn unregister_death_monitor(&self, recipient: &Arc<dyn DeathRecipient>) {
        self.recipients
            .lock()
            .unwrap()
            .retain(|known| !Arc::ptr_eq(known, recipient));
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ConnEvent {
    Connected(EndpointName),
    Disconnected(EndpointName),
}

/// Connection listener that records lifecycle events in order.
#[derive(Default)]
pub(crate) struct RecordingListener {
    pub events: Mutex<Vec<ConnEvent>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<ConnEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ConnectionListener for RecordingListener {
    fn on_connected(&self, endpoint: &EndpointName, _handle: &Arc<dyn RemoteHandle>) {
        self.events
            .lock()
            .unwrap()
            .push(ConnEvent::Connected(endpoint.clone()));
    }

    fn on_disconnected(&self, endpoint: &EndpointName) {
        self.events
            .lock()
            .unwrap()
            .push(ConnEvent::Disconnected(endpoint.clone()));
    }
}

pub(crate) fn endpoint(name: &str) -> EndpointName {
    EndpointName::new(name).unwrap()
}
