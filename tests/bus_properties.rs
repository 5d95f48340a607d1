//! ---
//! vms_section: "15-testing-qa-runbook"
//! vms_subsection: "integration-tests"
//! vms_type: "source"
//! vms_scope: "code"
//! vms_description: "End-to-end bus properties across codec, dispatcher, and listeners."
//! vms_version: "v0.0.0-prealpha"
//! vms_owner: "tbd"
//! ---
use std::sync::Arc;

use bytes::Bytes;
use prometheus::Registry;
use vms_common::AppConfig;
use vms_core::{
    resolve, ContextOwner, DispatchError, DispatcherHandle, DispatcherService, GatedClient,
    OwnershipGate, RecordingListener,
};
use vms_msg::{decode, encode, InMemoryChannel, Layer, Offering, VmsMessage};

async fn bus(config: &AppConfig) -> (Arc<InMemoryChannel>, DispatcherHandle, RecordingListener) {
    let channel = Arc::new(InMemoryChannel::new());
    let handle =
        DispatcherService::start(channel.clone(), config, None, None).expect("start dispatcher");
    let listener = RecordingListener::new();
    handle
        .register_listener(Arc::new(listener.clone()))
        .await
        .expect("register listener");
    (channel, handle, listener)
}

async fn deliver(handle: &DispatcherHandle, message: VmsMessage) {
    handle
        .on_channel_event(encode(&message).expect("encode"))
        .await
        .expect("queue event");
}

fn data(layer: Layer, byte: u8) -> VmsMessage {
    VmsMessage::Data {
        layer,
        payload: Bytes::from(vec![byte]),
    }
}

#[test]
fn zero_dependency_offerings_are_always_available() {
    let table = vec![
        Offering::new(Layer::new(1, 0)),
        Offering::with_dependencies(Layer::new(2, 0), [Layer::new(77, 0)]),
        Offering::new(Layer::new(3, 0)),
    ];
    let available = resolve(&table);
    assert!(available.contains(&Layer::new(1, 0)));
    assert!(available.contains(&Layer::new(3, 0)));
    assert!(!available.contains(&Layer::new(2, 0)));
    assert_eq!(resolve(&table), available);
}

#[test]
fn alternative_offerings_are_or_combined() {
    let base = Layer::new(2, 3);
    let target = Layer::new(6, 7);
    let table = vec![
        Offering::with_dependencies(target, [Layer::new(100, 200)]),
        Offering::new(base),
        Offering::with_dependencies(target, [base]),
    ];
    assert!(resolve(&table).contains(&target));
    assert!(!resolve(&table[..1]).contains(&target));
}

#[tokio::test]
async fn data_gating_follows_subscription_changes() {
    let (_channel, handle, listener) = bus(&AppConfig::default()).await;
    let layer = Layer::new(2, 3);

    deliver(&handle, data(layer, 1)).await;
    deliver(&handle, VmsMessage::Subscribe(layer)).await;
    deliver(&handle, data(layer, 2)).await;
    deliver(&handle, VmsMessage::Unsubscribe(layer)).await;
    deliver(&handle, data(layer, 3)).await;
    handle.snapshot().await.expect("drain queue");

    assert_eq!(listener.data_events(), vec![(layer, "02".to_owned())]);
    handle.shutdown().await;
}

#[tokio::test]
async fn availability_is_announced_once_per_change() {
    let (_channel, handle, listener) = bus(&AppConfig::default()).await;
    let table = vec![
        Offering::new(Layer::new(2, 3)),
        Offering::with_dependencies(Layer::new(4, 5), [Layer::new(2, 3)]),
    ];
    deliver(&handle, VmsMessage::Offering(table.clone())).await;
    deliver(&handle, VmsMessage::Offering(table)).await;
    deliver(&handle, VmsMessage::Offering(Vec::new())).await;
    handle.snapshot().await.expect("drain queue");

    assert_eq!(
        listener.availability_events(),
        vec![vec![Layer::new(2, 3), Layer::new(4, 5)], Vec::new()]
    );
    handle.shutdown().await;
}

#[tokio::test]
async fn subscribe_all_response_is_union_with_available_layers() {
    let (channel, handle, _listener) = bus(&AppConfig::default()).await;
    handle.subscribe(Layer::new(8, 3)).await.expect("subscribe");
    handle.subscribe_all().await.expect("subscribe all");
    deliver(
        &handle,
        VmsMessage::Offering(vec![Offering::new(Layer::new(2, 3)), Offering::new(Layer::new(8, 3))]),
    )
    .await;
    deliver(&handle, VmsMessage::SubscriptionRequest).await;
    handle.snapshot().await.expect("drain queue");

    let response = channel
        .take_written()
        .into_iter()
        .map(|raw| decode(&raw).expect("decode"))
        .last()
        .expect("response written");
    assert_eq!(
        response,
        VmsMessage::SubscriptionResponse {
            sequence_number: 2,
            layers: vec![Layer::new(8, 3), Layer::new(2, 3)],
        }
    );
    handle.shutdown().await;
}

#[tokio::test]
async fn configured_retries_hide_transient_write_failures() {
    let mut config = AppConfig::default();
    config.channel.write_retries = 2;
    let (channel, handle, _listener) = bus(&config).await;

    channel.fail_next_writes(2);
    handle.subscribe(Layer::new(8, 3)).await.expect("third attempt lands");
    assert_eq!(channel.written_len(), 1);

    channel.fail_next_writes(3);
    let err = handle.subscribe(Layer::new(5, 1)).await.unwrap_err();
    assert!(matches!(err, DispatchError::Messaging(_)));
    handle.shutdown().await;
}

#[tokio::test]
async fn metrics_track_delivery_and_drops() {
    let registry = Registry::new();
    let channel = Arc::new(InMemoryChannel::new());
    let handle = DispatcherService::start(
        channel.clone(),
        &AppConfig::default(),
        Some(&registry),
        None,
    )
    .expect("start dispatcher");
    let layer = Layer::new(2, 3);
    deliver(&handle, data(layer, 1)).await;
    deliver(&handle, VmsMessage::Subscribe(layer)).await;
    deliver(&handle, data(layer, 2)).await;
    handle
        .on_channel_event(vms_msg::RawMessage::from_values(vec![6, 9]))
        .await
        .expect("queue malformed");
    handle.snapshot().await.expect("drain queue");

    let value = |name: &str| -> f64 {
        registry
            .gather()
            .iter()
            .find(|family| family.get_name() == name)
            .map(|family| family.get_metric()[0].get_counter().get_value())
            .unwrap_or_default()
    };
    assert_eq!(value("vms_data_delivered_total"), 1.0);
    assert_eq!(value("vms_data_dropped_total"), 1.0);
    assert_eq!(value("vms_malformed_messages_total"), 1.0);
    handle.shutdown().await;
}

#[tokio::test]
async fn ownership_gate_guards_publishers() {
    let channel = Arc::new(InMemoryChannel::new());
    let gate = Arc::new(OwnershipGate::new());
    let handle = DispatcherService::start(
        channel.clone(),
        &AppConfig::default(),
        None,
        Some(gate.clone()),
    )
    .expect("start dispatcher");

    let stranger = GatedClient::new(handle.clone(), gate.clone(), ContextOwner::new(10, 1));
    assert!(matches!(
        stranger.publish_offering(Vec::new()).await,
        Err(DispatchError::Unauthorized(_))
    ));

    let owner = GatedClient::claim(handle.clone(), gate, ContextOwner::new(10, 2));
    owner
        .publish_offering(vec![Offering::new(Layer::new(2, 3))])
        .await
        .expect("owner publishes");
    let written = decode(&channel.pop_written().expect("offering written")).expect("decode");
    assert_eq!(
        written,
        VmsMessage::Offering(vec![Offering::new(Layer::new(2, 3))])
    );
    handle.shutdown().await;
}
