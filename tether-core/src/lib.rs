//! tether-core: cross-process callback dispatch registry.
//!
//! A process registers local callback objects (notification receivers,
//! connection-lifecycle listeners) under an owner scope and hands the
//! returned stub to a remote coordinator. Inbound notifications flow
//! stub -> dispatcher -> owner's execution context -> callback, and ordered
//! notifications are acknowledged back to the coordinator exactly once per
//! inbound call. When an owner scope ends with registrations still live,
//! [`DispatchRegistry::teardown_owner`] detects the leaks, revokes the
//! remote side best-effort, and reports the original registration sites.

pub mod audit;
pub mod config;
pub mod context;
pub mod error;
pub mod receiver;
pub mod registry;
pub mod remote;
pub mod service;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types
pub use audit::LeakReport;
pub use config::RegistryConfig;
pub use context::{EventQueue, ExecutionContext, Task};
pub use error::{CallbackError, DispatchError, DispatchResult};
pub use receiver::{Delivery, ExceptionHook, NotificationReceiver, ReceiverStub};
pub use registry::DispatchRegistry;
pub use remote::{
    DeathRecipient, HandleAlreadyDead, HandleId, RemoteCoordinator, RemoteError, RemoteHandle,
};
pub use service::{ConnectionListener, ConnectionStub};
pub use types::{
    CallSite, CallbackId, CallbackKind, DeliveryResult, EndpointName, Notification, OwnerId,
    OwnerScope, StubId,
};
