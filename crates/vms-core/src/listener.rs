//! ---
//! vms_section: "03-dispatch-runtime"
//! vms_subsection: "module"
//! vms_type: "source"
//! vms_scope: "code"
//! vms_description: "Listener registration and protocol error observers."
//! vms_version: "v0.0.0-prealpha"
//! vms_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;
use vms_msg::{AvailableLayers, CodecError, Layer, MessagingError, RawMessage};

/// In-process consumer of bus events.
///
/// Callbacks run synchronously on the dispatcher task in event order. An
/// implementation that needs to do real work should hand it off (for example
/// through its own channel) and return promptly, since every other event
/// waits behind it.
pub trait VmsListener: Send + Sync {
    /// DATA arrived for a subscribed layer.
    fn on_data_received(&self, layer: Layer, payload: &Bytes);

    /// The availability set changed. Called once per change.
    fn on_layers_availability_change(&self, available: &AvailableLayers);

    /// The shared channel went away. Fired when the lower layer calls
    /// `DispatcherHandle::connection_lost`, and once when a write first finds
    /// the channel closed.
    fn on_connection_lost(&self) {}
}

/// Handle returned by [`ListenerRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenerId(Uuid);

impl ListenerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Listeners in registration order.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: IndexMap<ListenerId, Arc<dyn VmsListener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Arc<dyn VmsListener>) -> ListenerId {
        let id = ListenerId::new();
        self.listeners.insert(id, listener);
        id
    }

    /// Returns false for an unknown or already removed id.
    pub fn unregister(&mut self, id: ListenerId) -> bool {
        self.listeners.shift_remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn VmsListener>> {
        self.listeners.values()
    }
}

/// Receives protocol failures the dispatcher does not surface to a caller.
pub trait ErrorObserver: Send + Sync {
    fn on_malformed_message(&self, error: &CodecError, raw: &RawMessage);
    fn on_write_failure(&self, error: &MessagingError);
}

/// Default observer: one warning per failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorObserver;

impl ErrorObserver for TracingErrorObserver {
    fn on_malformed_message(&self, error: &CodecError, raw: &RawMessage) {
        warn!(
            error = %error,
            values = raw.values.len(),
            payload_len = raw.payload.len(),
            "dropping malformed message"
        );
    }

    fn on_write_failure(&self, error: &MessagingError) {
        warn!(error = %error, "channel write failed");
    }
}

/// Event captured by [`RecordingListener`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ListenerEvent {
    DataReceived {
        layer: Layer,
        payload: String,
    },
    AvailabilityChanged {
        layers: Vec<Layer>,
    },
    ConnectionLost,
}

/// Listener that keeps every callback for later inspection.
#[derive(Debug, Clone, Default)]
pub struct RecordingListener {
    events: Arc<Mutex<Vec<ListenerEvent>>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ListenerEvent> {
        self.events.lock().clone()
    }

    pub fn take_events(&self) -> Vec<ListenerEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// DATA callbacks only, as `(layer, payload)` pairs.
    pub fn data_events(&self) -> Vec<(Layer, String)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ListenerEvent::DataReceived { layer, payload } => Some((*layer, payload.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn availability_events(&self) -> Vec<Vec<Layer>> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ListenerEvent::AvailabilityChanged { layers } => Some(layers.clone()),
                _ => None,
            })
            .collect()
    }
}

impl VmsListener for RecordingListener {
    fn on_data_received(&self, layer: Layer, payload: &Bytes) {
        self.events.lock().push(ListenerEvent::DataReceived {
            layer,
            payload: hex::encode(payload),
        });
    }

    fn on_layers_availability_change(&self, available: &AvailableLayers) {
        self.events.lock().push(ListenerEvent::AvailabilityChanged {
            layers: available.iter().copied().collect(),
        });
    }

    fn on_connection_lost(&self) {
        self.events.lock().push(ListenerEvent::ConnectionLost);
    }
}
