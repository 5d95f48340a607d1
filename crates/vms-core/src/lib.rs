//! ---
//! vms_section: "03-dispatch-runtime"
//! vms_subsection: "module"
//! vms_type: "source"
//! vms_scope: "code"
//! vms_description: "Dispatcher runtime for the VMS bus."
//! vms_version: "v0.0.0-prealpha"
//! vms_owner: "tbd"
//! ---
//! Subscription state, layer availability, and the dispatcher task that
//! applies bus traffic and notifies in-process listeners.

pub mod availability;
pub mod client;
pub mod dispatcher;
pub mod listener;
pub mod ownership;
pub mod service;
pub mod subscriptions;

pub use availability::{resolve, AvailabilityResolver};
pub use client::GatedClient;
pub use dispatcher::{DispatchError, Dispatcher, DispatcherSnapshot};
pub use listener::{
    ErrorObserver, ListenerEvent, ListenerId, ListenerRegistry, RecordingListener,
    TracingErrorObserver, VmsListener,
};
pub use ownership::{ContextOwner, OwnershipError, OwnershipGate};
pub use service::{DispatcherHandle, DispatcherService};
pub use subscriptions::SubscriptionStore;
