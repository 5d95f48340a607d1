//! ---
//! vms_section: "03-dispatch-runtime"
//! vms_subsection: "module"
//! vms_type: "source"
//! vms_scope: "code"
//! vms_description: "Single-owner state machine applying bus messages."
//! vms_version: "v0.0.0-prealpha"
//! vms_owner: "tbd"
//! ---
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use tracing::debug;
use vms_common::{DispatcherConfig, SubscribeAllScope};
use vms_msg::{
    log_message, AvailableLayers, ChannelAdapter, ChannelError, CodecError, Layer,
    MessageDirection, MessagingError, MessagingMetrics, Offering, RawMessage, VmsMessage,
};

use crate::availability::AvailabilityResolver;
use crate::listener::{ErrorObserver, ListenerId, ListenerRegistry, TracingErrorObserver, VmsListener};
use crate::ownership::{ContextOwner, OwnershipError, OwnershipGate};
use crate::subscriptions::SubscriptionStore;

/// Failure returned to the caller of a dispatcher operation.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Messaging(#[from] MessagingError),
    #[error(transparent)]
    Unauthorized(#[from] OwnershipError),
    #[error("dispatcher queue is full")]
    QueueFull,
    #[error("dispatcher is no longer running")]
    QueueClosed,
}

/// Serializable view of dispatcher state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherSnapshot {
    pub captured_at: DateTime<Utc>,
    pub channel: String,
    pub explicit_subscriptions: Vec<Layer>,
    pub subscribe_all: bool,
    pub effective_subscriptions: Vec<Layer>,
    pub offering_count: usize,
    pub available_layers: Vec<Layer>,
    pub listener_count: usize,
    pub context_owner: Option<ContextOwner>,
}

/// Applies bus messages to the subscription store and offering table.
///
/// Not shared: one task owns it and feeds it events in channel order. See
/// [`crate::service::DispatcherService`].
pub struct Dispatcher {
    adapter: ChannelAdapter,
    resolver: AvailabilityResolver,
    subscriptions: SubscriptionStore,
    listeners: ListenerRegistry,
    observer: Arc<dyn ErrorObserver>,
    scope: SubscribeAllScope,
    metrics: Option<Arc<MessagingMetrics>>,
    ownership: Option<Arc<OwnershipGate>>,
    // set once listeners have heard about the loss; cleared by the next good write
    channel_lost: bool,
}

impl Dispatcher {
    pub fn new(adapter: ChannelAdapter, config: &DispatcherConfig) -> Self {
        Self {
            adapter,
            resolver: AvailabilityResolver::new(),
            subscriptions: SubscriptionStore::new(),
            listeners: ListenerRegistry::new(),
            observer: Arc::new(TracingErrorObserver),
            scope: config.subscribe_all_scope,
            metrics: None,
            ownership: None,
            channel_lost: false,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MessagingMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_error_observer(mut self, observer: Arc<dyn ErrorObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Gate whose owner is reported in snapshots.
    pub fn with_ownership(mut self, gate: Arc<OwnershipGate>) -> Self {
        self.ownership = Some(gate);
        self
    }

    /// Decode and apply one inbound channel value. Malformed values are
    /// reported to the error observer and dropped.
    pub fn handle_channel_event(&mut self, raw: &RawMessage) -> Result<(), DispatchError> {
        let message = match self.adapter.codec().decode(raw) {
            Ok(message) => message,
            Err(err) => {
                self.observer.on_malformed_message(&err, raw);
                if let Some(metrics) = &self.metrics {
                    metrics.observe_malformed();
                }
                return Err(err.into());
            }
        };
        log_message(MessageDirection::Inbound, &message);
        if let Some(metrics) = &self.metrics {
            metrics.observe_received(message.kind());
        }
        self.apply(message)
    }

    /// Apply an already decoded message.
    pub fn apply(&mut self, message: VmsMessage) -> Result<(), DispatchError> {
        match message {
            VmsMessage::Subscribe(layer) => self.subscribe(layer),
            VmsMessage::Unsubscribe(layer) => self.unsubscribe(layer),
            VmsMessage::SubscribeAll => self.subscribe_all(),
            VmsMessage::UnsubscribeAll => self.unsubscribe_all(),
            VmsMessage::Offering(offerings) => {
                self.replace_offerings(offerings);
                Ok(())
            }
            VmsMessage::Data { layer, payload } => {
                self.deliver(layer, &payload);
                Ok(())
            }
            VmsMessage::SubscriptionRequest => self.answer_subscription_request(),
            VmsMessage::SubscriptionResponse {
                sequence_number, ..
            } => {
                debug!(sequence_number, "ignoring inbound subscription response");
                Ok(())
            }
        }
    }

    pub fn subscribe(&mut self, layer: Layer) -> Result<(), DispatchError> {
        if !self.subscriptions.subscribe(layer) {
            debug!(layer = %layer, "layer already subscribed");
        }
        self.write(&VmsMessage::Subscribe(layer))
    }

    pub fn unsubscribe(&mut self, layer: Layer) -> Result<(), DispatchError> {
        if !self.subscriptions.unsubscribe(layer) {
            debug!(layer = %layer, "layer was not subscribed");
        }
        self.write(&VmsMessage::Unsubscribe(layer))
    }

    pub fn subscribe_all(&mut self) -> Result<(), DispatchError> {
        self.subscriptions.subscribe_all();
        self.write(&VmsMessage::SubscribeAll)
    }

    pub fn unsubscribe_all(&mut self) -> Result<(), DispatchError> {
        self.subscriptions.unsubscribe_all();
        self.write(&VmsMessage::UnsubscribeAll)
    }

    /// Write DATA outward. Local listeners only see it if the channel
    /// delivers it back.
    pub fn publish(&mut self, layer: Layer, payload: Bytes) -> Result<(), DispatchError> {
        self.write(&VmsMessage::Data { layer, payload })
    }

    /// Write a full offering table outward.
    pub fn publish_offering(&mut self, offerings: Vec<Offering>) -> Result<(), DispatchError> {
        self.write(&VmsMessage::Offering(offerings))
    }

    pub fn available_layers(&self) -> AvailableLayers {
        self.resolver.available().clone()
    }

    pub fn current_subscriptions(&self) -> IndexSet<Layer> {
        self.subscriptions
            .current_subscriptions(self.resolver.available())
    }

    pub fn register_listener(&mut self, listener: Arc<dyn VmsListener>) -> ListenerId {
        let id = self.listeners.register(listener);
        debug!(listener = %id, total = self.listeners.len(), "listener registered");
        id
    }

    pub fn unregister_listener(&mut self, id: ListenerId) -> bool {
        let removed = self.listeners.unregister(id);
        debug!(listener = %id, removed, "listener unregistered");
        removed
    }

    /// Tell every listener the shared channel is gone. Also triggered by the
    /// first write that finds the channel closed.
    pub fn connection_lost(&mut self) {
        self.channel_lost = true;
        tracing::warn!(channel = self.adapter.name(), "shared channel lost");
        for listener in self.listeners.iter() {
            listener.on_connection_lost();
        }
    }

    pub fn snapshot(&self) -> DispatcherSnapshot {
        let available = self.resolver.available();
        DispatcherSnapshot {
            captured_at: Utc::now(),
            channel: self.adapter.name().to_owned(),
            explicit_subscriptions: self.subscriptions.explicit().iter().copied().collect(),
            subscribe_all: self.subscriptions.is_subscribe_all(),
            effective_subscriptions: self
                .subscriptions
                .current_subscriptions(available)
                .into_iter()
                .collect(),
            offering_count: self.resolver.offering_count(),
            available_layers: available.iter().copied().collect(),
            listener_count: self.listeners.len(),
            context_owner: self.ownership.as_ref().and_then(|gate| gate.owner()),
        }
    }

    fn replace_offerings(&mut self, offerings: Vec<Offering>) {
        let Some(available) = self.resolver.replace_offerings(offerings) else {
            return;
        };
        debug!(available = available.len(), "layer availability changed");
        if let Some(metrics) = &self.metrics {
            metrics.observe_availability_change();
        }
        for listener in self.listeners.iter() {
            listener.on_layers_availability_change(&available);
        }
    }

    fn deliver(&self, layer: Layer, payload: &Bytes) {
        let subscribed =
            self.subscriptions
                .is_subscribed(layer, self.resolver.available(), self.scope);
        if !subscribed {
            debug!(layer = %layer, "dropping data for unsubscribed layer");
            if let Some(metrics) = &self.metrics {
                metrics.observe_data_dropped();
            }
            return;
        }
        for listener in self.listeners.iter() {
            listener.on_data_received(layer, payload);
        }
        if let Some(metrics) = &self.metrics {
            metrics.observe_data_delivered();
        }
    }

    fn answer_subscription_request(&mut self) -> Result<(), DispatchError> {
        let current = self.current_subscriptions();
        self.write(&VmsMessage::subscription_response(current))
    }

    fn write(&mut self, message: &VmsMessage) -> Result<(), DispatchError> {
        match self.adapter.send(message) {
            Ok(()) => {
                self.channel_lost = false;
                Ok(())
            }
            Err(err) => {
                self.observer.on_write_failure(&err);
                let closed = matches!(err, MessagingError::Channel(ChannelError::Closed(_)));
                if closed && !self.channel_lost {
                    self.connection_lost();
                }
                Err(err.into())
            }
        }
    }
}
