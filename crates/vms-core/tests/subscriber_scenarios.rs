//! ---
//! vms_section: "03-dispatch-runtime"
//! vms_subsection: "integration-tests"
//! vms_type: "source"
//! vms_scope: "code"
//! vms_description: "Subscriber-side flows through the dispatcher task."
//! vms_version: "v0.0.0-prealpha"
//! vms_owner: "tbd"
//! ---
use std::sync::Arc;

use bytes::Bytes;
use vms_common::{AppConfig, SubscribeAllScope};
use vms_core::{DispatcherHandle, DispatcherService, RecordingListener};
use vms_msg::{encode, InMemoryChannel, Layer, Offering, VmsMessage};

const SUBSCRIPTION_LAYER: Layer = Layer::new(2, 3);
const DEPENDANT_LAYER_1: Layer = Layer::new(4, 5);
const DEPENDANT_LAYER_2: Layer = Layer::new(6, 7);
const UNSUPPORTED_LAYER: Layer = Layer::new(100, 200);

async fn start(config: AppConfig) -> (Arc<InMemoryChannel>, DispatcherHandle, RecordingListener) {
    let channel = Arc::new(InMemoryChannel::new());
    let handle = DispatcherService::start(channel.clone(), &config, None, None)
        .expect("start dispatcher");
    let listener = RecordingListener::new();
    handle
        .register_listener(Arc::new(listener.clone()))
        .await
        .expect("register listener");
    (channel, handle, listener)
}

async fn inject(handle: &DispatcherHandle, message: VmsMessage) {
    handle
        .on_channel_event(encode(&message).expect("encode"))
        .await
        .expect("queue event");
}

fn data(layer: Layer) -> VmsMessage {
    VmsMessage::Data {
        layer,
        payload: Bytes::from_static(&[0xa, 0xb]),
    }
}

#[tokio::test]
async fn subscribed_layer_receives_injected_data() {
    let (_channel, handle, listener) = start(AppConfig::default()).await;
    handle.subscribe(SUBSCRIPTION_LAYER).await.expect("subscribe");
    inject(&handle, data(SUBSCRIPTION_LAYER)).await;

    handle.snapshot().await.expect("drain queue");
    assert_eq!(
        listener.data_events(),
        vec![(SUBSCRIPTION_LAYER, "0a0b".to_owned())]
    );
    handle.shutdown().await;
}

#[tokio::test]
async fn subscribe_all_with_any_scope_receives_unoffered_data() {
    let mut config = AppConfig::default();
    config.dispatcher.subscribe_all_scope = SubscribeAllScope::Any;
    let (_channel, handle, listener) = start(config).await;
    handle.subscribe_all().await.expect("subscribe all");
    inject(&handle, data(SUBSCRIPTION_LAYER)).await;

    handle.snapshot().await.expect("drain queue");
    assert_eq!(listener.data_events().len(), 1);
    handle.shutdown().await;
}

#[tokio::test]
async fn subscribe_all_with_available_scope_waits_for_offering() {
    let (_channel, handle, listener) = start(AppConfig::default()).await;
    handle.subscribe_all().await.expect("subscribe all");
    inject(&handle, data(SUBSCRIPTION_LAYER)).await;
    inject(
        &handle,
        VmsMessage::Offering(vec![Offering::new(SUBSCRIPTION_LAYER)]),
    )
    .await;
    inject(&handle, data(SUBSCRIPTION_LAYER)).await;

    handle.snapshot().await.expect("drain queue");
    assert_eq!(listener.data_events().len(), 1);
    handle.shutdown().await;
}

#[tokio::test]
async fn simple_offering_announces_layer() {
    let (_channel, handle, listener) = start(AppConfig::default()).await;
    handle.subscribe(SUBSCRIPTION_LAYER).await.expect("subscribe");
    inject(
        &handle,
        VmsMessage::Offering(vec![Offering::new(SUBSCRIPTION_LAYER)]),
    )
    .await;

    handle.snapshot().await.expect("drain queue");
    assert_eq!(listener.availability_events(), vec![vec![SUBSCRIPTION_LAYER]]);
    handle.shutdown().await;
}

#[tokio::test]
async fn complex_offering_announces_satisfied_layers() {
    let (_channel, handle, listener) = start(AppConfig::default()).await;
    handle.subscribe(SUBSCRIPTION_LAYER).await.expect("subscribe");
    inject(
        &handle,
        VmsMessage::Offering(vec![
            Offering::new(SUBSCRIPTION_LAYER),
            Offering::with_dependencies(DEPENDANT_LAYER_1, [SUBSCRIPTION_LAYER]),
            Offering::with_dependencies(
                DEPENDANT_LAYER_2,
                [SUBSCRIPTION_LAYER, DEPENDANT_LAYER_1],
            ),
            Offering::with_dependencies(DEPENDANT_LAYER_2, [UNSUPPORTED_LAYER]),
        ]),
    )
    .await;

    let available = handle.available_layers().await.expect("query");
    assert_eq!(
        available.into_iter().collect::<Vec<_>>(),
        vec![SUBSCRIPTION_LAYER, DEPENDANT_LAYER_1, DEPENDANT_LAYER_2]
    );
    assert_eq!(listener.availability_events().len(), 1);
    handle.shutdown().await;
}

#[tokio::test]
async fn unregistered_listener_stops_receiving() {
    let (_channel, handle, listener) = start(AppConfig::default()).await;
    let late = RecordingListener::new();
    let id = handle
        .register_listener(Arc::new(late.clone()))
        .await
        .expect("register");
    handle.subscribe(SUBSCRIPTION_LAYER).await.expect("subscribe");
    inject(&handle, data(SUBSCRIPTION_LAYER)).await;
    assert!(handle.unregister_listener(id).await.expect("unregister"));
    inject(&handle, data(SUBSCRIPTION_LAYER)).await;
    handle.connection_lost().await.expect("connection lost");

    assert_eq!(listener.data_events().len(), 2);
    assert_eq!(late.data_events().len(), 1);
    assert_eq!(listener.events().len(), 3);
    assert_eq!(late.events().len(), 1);
    handle.shutdown().await;
}
