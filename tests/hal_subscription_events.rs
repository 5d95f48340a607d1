//! ---
//! vms_section: "15-testing-qa-runbook"
//! vms_subsection: "integration-tests"
//! vms_type: "source"
//! vms_scope: "code"
//! vms_description: "Channel-level subscription request and response flows."
//! vms_version: "v0.0.0-prealpha"
//! vms_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::sync::Arc;

use vms_common::AppConfig;
use vms_core::{DispatcherHandle, DispatcherService};
use vms_msg::{InMemoryChannel, Layer, MessageType, RawMessage};

const FIRST_LAYER: usize = 3;

struct Hal {
    channel: Arc<InMemoryChannel>,
    handle: DispatcherHandle,
}

impl Hal {
    fn start() -> Self {
        let channel = Arc::new(InMemoryChannel::new());
        let handle = DispatcherService::start(channel.clone(), &AppConfig::default(), None, None)
            .expect("start dispatcher");
        Self { channel, handle }
    }

    /// Inject a value and return what the dispatcher wrote back, if anything.
    async fn inject(&self, values: Vec<i32>) -> Option<RawMessage> {
        self.handle
            .on_channel_event(RawMessage::from_values(values))
            .await
            .expect("queue event");
        self.handle.available_layers().await.expect("drain queue");
        self.channel.pop_written()
    }

    async fn subscribe(&self, layer: Layer) {
        let written = self
            .inject(vec![
                MessageType::Subscribe.tag(),
                layer.id as i32,
                layer.version as i32,
            ])
            .await
            .expect("subscribe is written through");
        assert_eq!(written.values[0], MessageType::Subscribe.tag());
        assert_eq!(written.values[1], layer.id as i32);
        assert_eq!(written.values[2], layer.version as i32);
    }
}

async fn subscription_round_trip(layers: &[Layer]) {
    let hal = Hal::start();
    for layer in layers {
        hal.subscribe(*layer).await;
    }
    let response = hal
        .inject(vec![MessageType::SubscriptionRequest.tag()])
        .await
        .expect("subscription response");
    let values = response.values;
    assert_eq!(values[0], MessageType::SubscriptionResponse.tag());
    assert_eq!(values[1], layers.len() as i32, "sequence number");
    assert_eq!(values[2], layers.len() as i32, "number of layers");

    let end = FIRST_LAYER + 2 * layers.len();
    assert_eq!(values.len(), end);
    let received: HashSet<Layer> = values[FIRST_LAYER..end]
        .chunks(2)
        .map(|pair| Layer::new(pair[0] as u32, pair[1] as u32))
        .collect();
    let expected: HashSet<Layer> = layers.iter().copied().collect();
    assert_eq!(received, expected);
    hal.handle.shutdown().await;
}

#[tokio::test]
async fn empty_subscriptions() {
    subscription_round_trip(&[]).await;
}

#[tokio::test]
async fn one_subscription() {
    subscription_round_trip(&[Layer::new(8, 3)]).await;
}

const FIVE_LAYERS: [Layer; 5] = [
    Layer::new(8, 3),
    Layer::new(5, 1),
    Layer::new(3, 9),
    Layer::new(2, 7),
    Layer::new(9, 3),
];

#[tokio::test]
async fn many_subscriptions() {
    subscription_round_trip(&FIVE_LAYERS).await;
}

#[tokio::test]
async fn many_subscriptions_in_any_order() {
    let mut reversed = FIVE_LAYERS;
    reversed.reverse();
    let mut rotated = FIVE_LAYERS;
    rotated.rotate_left(2);
    for order in [reversed, rotated] {
        subscription_round_trip(&order).await;
    }
}

#[tokio::test]
async fn unsubscribe_shrinks_the_response() {
    let hal = Hal::start();
    hal.subscribe(Layer::new(8, 3)).await;
    hal.subscribe(Layer::new(5, 1)).await;
    let echoed = hal
        .inject(vec![MessageType::Unsubscribe.tag(), 8, 3])
        .await
        .expect("unsubscribe is written through");
    assert_eq!(echoed.values, vec![MessageType::Unsubscribe.tag(), 8, 3]);

    let response = hal
        .inject(vec![MessageType::SubscriptionRequest.tag()])
        .await
        .expect("subscription response");
    assert_eq!(
        response.values,
        vec![MessageType::SubscriptionResponse.tag(), 1, 1, 5, 1]
    );
    hal.handle.shutdown().await;
}

#[tokio::test]
async fn malformed_values_produce_no_write() {
    let hal = Hal::start();
    assert!(hal.inject(vec![]).await.is_none());
    assert!(hal.inject(vec![MessageType::Subscribe.tag(), 8]).await.is_none());
    assert!(hal.inject(vec![99, 1, 2]).await.is_none());
    // the dispatcher keeps serving after bad input
    hal.subscribe(Layer::new(8, 3)).await;
    hal.handle.shutdown().await;
}
