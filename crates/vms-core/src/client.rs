//! ---
//! vms_section: "03-dispatch-runtime"
//! vms_subsection: "module"
//! vms_type: "source"
//! vms_scope: "code"
//! vms_description: "Per-caller client that enforces context ownership."
//! vms_version: "v0.0.0-prealpha"
//! vms_owner: "tbd"
//! ---
use std::sync::Arc;

use bytes::Bytes;
use indexmap::IndexSet;
use tracing::warn;
use vms_msg::{AvailableLayers, Layer, Offering};

use crate::dispatcher::{DispatchError, DispatcherSnapshot};
use crate::ownership::{ContextOwner, OwnershipGate};
use crate::service::DispatcherHandle;

/// Dispatcher client bound to one caller identity.
///
/// Data-plane calls succeed only while `caller` is the context owner; the
/// check happens on every call, so a client created before another process
/// claimed ownership stops working at that point. Queries are not gated.
#[derive(Clone)]
pub struct GatedClient {
    handle: DispatcherHandle,
    gate: Arc<OwnershipGate>,
    caller: ContextOwner,
}

impl GatedClient {
    pub fn new(handle: DispatcherHandle, gate: Arc<OwnershipGate>, caller: ContextOwner) -> Self {
        Self {
            handle,
            gate,
            caller,
        }
    }

    /// Claim ownership for this client's caller and return the client.
    pub fn claim(handle: DispatcherHandle, gate: Arc<OwnershipGate>, caller: ContextOwner) -> Self {
        gate.claim(caller);
        Self::new(handle, gate, caller)
    }

    pub fn caller(&self) -> ContextOwner {
        self.caller
    }

    fn authorize(&self, operation: &'static str) -> Result<(), DispatchError> {
        self.gate.check(self.caller).map_err(|err| {
            warn!(operation, caller = %self.caller, error = %err, "rejected data-plane call");
            DispatchError::from(err)
        })
    }

    pub async fn publish(&self, layer: Layer, payload: Bytes) -> Result<(), DispatchError> {
        self.authorize("publish")?;
        self.handle.publish(layer, payload).await
    }

    pub async fn publish_offering(&self, offerings: Vec<Offering>) -> Result<(), DispatchError> {
        self.authorize("publish_offering")?;
        self.handle.publish_offering(offerings).await
    }

    pub async fn subscribe(&self, layer: Layer) -> Result<(), DispatchError> {
        self.authorize("subscribe")?;
        self.handle.subscribe(layer).await
    }

    pub async fn unsubscribe(&self, layer: Layer) -> Result<(), DispatchError> {
        self.authorize("unsubscribe")?;
        self.handle.unsubscribe(layer).await
    }

    pub async fn subscribe_all(&self) -> Result<(), DispatchError> {
        self.authorize("subscribe_all")?;
        self.handle.subscribe_all().await
    }

    pub async fn unsubscribe_all(&self) -> Result<(), DispatchError> {
        self.authorize("unsubscribe_all")?;
        self.handle.unsubscribe_all().await
    }

    pub async fn available_layers(&self) -> Result<AvailableLayers, DispatchError> {
        self.handle.available_layers().await
    }

    pub async fn current_subscriptions(&self) -> Result<IndexSet<Layer>, DispatchError> {
        self.handle.current_subscriptions().await
    }

    pub async fn snapshot(&self) -> Result<DispatcherSnapshot, DispatchError> {
        self.handle.snapshot().await
    }
}
