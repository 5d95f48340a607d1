//! ---
//! vms_section: "03-dispatch-runtime"
//! vms_subsection: "module"
//! vms_type: "source"
//! vms_scope: "code"
//! vms_description: "Local subscription set and subscribe-all flag."
//! vms_version: "v0.0.0-prealpha"
//! vms_owner: "tbd"
//! ---
use indexmap::IndexSet;
use vms_common::SubscribeAllScope;
use vms_msg::{AvailableLayers, Layer};

/// Layers explicitly requested by this process plus the subscribe-all flag.
///
/// The two are independent: leaving subscribe-all keeps explicit layers, and
/// unsubscribing a layer does not leave subscribe-all.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionStore {
    layers: IndexSet<Layer>,
    subscribe_all: bool,
}

impl SubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the layer was already subscribed.
    pub fn subscribe(&mut self, layer: Layer) -> bool {
        self.layers.insert(layer)
    }

    /// Returns false when the layer was not subscribed.
    pub fn unsubscribe(&mut self, layer: Layer) -> bool {
        self.layers.shift_remove(&layer)
    }

    pub fn subscribe_all(&mut self) {
        self.subscribe_all = true;
    }

    pub fn unsubscribe_all(&mut self) {
        self.subscribe_all = false;
    }

    pub fn is_subscribe_all(&self) -> bool {
        self.subscribe_all
    }

    pub fn explicit(&self) -> &IndexSet<Layer> {
        &self.layers
    }

    /// Whether DATA for `layer` should reach listeners.
    pub fn is_subscribed(
        &self,
        layer: Layer,
        available: &AvailableLayers,
        scope: SubscribeAllScope,
    ) -> bool {
        if self.layers.contains(&layer) {
            return true;
        }
        self.subscribe_all
            && match scope {
                SubscribeAllScope::Available => available.contains(&layer),
                SubscribeAllScope::Any => true,
            }
    }

    /// Explicit layers, followed by every available layer when subscribe-all
    /// is active.
    pub fn current_subscriptions(&self, available: &AvailableLayers) -> IndexSet<Layer> {
        let mut current = self.layers.clone();
        if self.subscribe_all {
            current.extend(available.iter().copied());
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn available(layers: &[Layer]) -> AvailableLayers {
        layers.iter().copied().collect()
    }

    #[test]
    fn five_subscriptions_are_reported() {
        let layers = [
            Layer::new(8, 3),
            Layer::new(5, 1),
            Layer::new(3, 9),
            Layer::new(2, 7),
            Layer::new(9, 1),
        ];
        let mut store = SubscriptionStore::new();
        for layer in layers {
            assert!(store.subscribe(layer));
        }
        let current = store.current_subscriptions(&AvailableLayers::new());
        assert_eq!(current.len(), 5);
        assert_eq!(current, layers.iter().copied().collect::<IndexSet<_>>());
    }

    #[test]
    fn duplicate_subscribe_and_missing_unsubscribe_are_noops() {
        let mut store = SubscriptionStore::new();
        assert!(store.subscribe(Layer::new(2, 3)));
        assert!(!store.subscribe(Layer::new(2, 3)));
        assert!(store.unsubscribe(Layer::new(2, 3)));
        assert!(!store.unsubscribe(Layer::new(2, 3)));
        assert!(store.explicit().is_empty());
    }

    #[test]
    fn subscribe_all_covers_available_layers_only() {
        let mut store = SubscriptionStore::new();
        store.subscribe_all();
        let available = available(&[Layer::new(2, 3)]);
        assert!(store.is_subscribed(Layer::new(2, 3), &available, SubscribeAllScope::Available));
        assert!(!store.is_subscribed(Layer::new(4, 5), &available, SubscribeAllScope::Available));
        assert!(store.is_subscribed(Layer::new(4, 5), &available, SubscribeAllScope::Any));
    }

    #[test]
    fn explicit_and_subscribe_all_are_independent() {
        let mut store = SubscriptionStore::new();
        store.subscribe(Layer::new(1, 1));
        store.subscribe_all();
        let available = available(&[Layer::new(2, 3), Layer::new(1, 1)]);
        let current = store.current_subscriptions(&available);
        assert_eq!(current.len(), 2);

        store.unsubscribe_all();
        assert!(store.is_subscribed(Layer::new(1, 1), &available, SubscribeAllScope::Available));
        assert!(!store.is_subscribed(Layer::new(2, 3), &available, SubscribeAllScope::Available));

        store.subscribe_all();
        store.unsubscribe(Layer::new(1, 1));
        assert!(store.is_subscribe_all());
        assert!(store.is_subscribed(Layer::new(1, 1), &available, SubscribeAllScope::Available));
    }
}
