//! ---
//! vms_section: "03-dispatch-runtime"
//! vms_subsection: "module"
//! vms_type: "source"
//! vms_scope: "code"
//! vms_description: "Control task owning the dispatcher and its client handle."
//! vms_version: "v0.0.0-prealpha"
//! vms_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use indexmap::IndexSet;
use parking_lot::Mutex;
use prometheus::Registry;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use vms_common::AppConfig;
use vms_msg::{
    AvailableLayers, ChannelAdapter, Codec, Layer, MessagingMetrics, Offering, RawMessage,
    VmsChannel,
};

use crate::dispatcher::{DispatchError, Dispatcher, DispatcherSnapshot};
use crate::listener::{ListenerId, VmsListener};
use crate::ownership::OwnershipGate;

type Call = Box<dyn FnOnce(&mut Dispatcher) + Send>;

enum Command {
    ChannelEvent(RawMessage),
    Call(Call),
}

/// Spawns the control task that owns a [`Dispatcher`].
pub struct DispatcherService;

impl DispatcherService {
    /// Move `dispatcher` onto its own task. Must be called inside a tokio
    /// runtime.
    pub fn spawn(dispatcher: Dispatcher, queue_capacity: usize) -> DispatcherHandle {
        let (commands, receiver) = mpsc::channel(queue_capacity.max(1));
        let (shutdown, shutdown_rx) = broadcast::channel(4);
        let task = tokio::spawn(run_control_loop(dispatcher, receiver, shutdown_rx));
        info!(queue_capacity, "dispatcher started");
        DispatcherHandle {
            commands,
            shutdown,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Build a dispatcher for `channel` from configuration and spawn it.
    ///
    /// Metrics are registered on `registry` when one is given and metrics are
    /// enabled in `config`.
    pub fn start(
        channel: Arc<dyn VmsChannel>,
        config: &AppConfig,
        registry: Option<&Registry>,
        ownership: Option<Arc<OwnershipGate>>,
    ) -> Result<DispatcherHandle> {
        config.validate()?;
        let metrics = match registry {
            Some(registry) if config.metrics.enabled => Some(Arc::new(
                MessagingMetrics::register(registry, &config.metrics.namespace)
                    .context("failed to register bus metrics")?,
            )),
            _ => None,
        };

        let mut adapter = ChannelAdapter::new(
            channel,
            Codec::new(config.dispatcher.trailing_data),
            config.channel.clone(),
        );
        if let Some(metrics) = &metrics {
            adapter = adapter.with_metrics(metrics.clone());
        }
        let mut dispatcher = Dispatcher::new(adapter, &config.dispatcher);
        if let Some(metrics) = metrics {
            dispatcher = dispatcher.with_metrics(metrics);
        }
        if let Some(gate) = ownership {
            dispatcher = dispatcher.with_ownership(gate);
        }
        Ok(Self::spawn(dispatcher, config.dispatcher.queue_capacity))
    }
}

async fn run_control_loop(
    mut dispatcher: Dispatcher,
    mut commands: mpsc::Receiver<Command>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                debug!("dispatcher shutdown signal received");
                break;
            }
            command = commands.recv() => {
                let Some(command) = command else {
                    debug!("every dispatcher handle dropped");
                    break;
                };
                match command {
                    Command::ChannelEvent(raw) => {
                        // already reported to the error observer
                        if let Err(err) = dispatcher.handle_channel_event(&raw) {
                            debug!(error = %err, "inbound event not applied");
                        }
                    }
                    Command::Call(call) => call(&mut dispatcher),
                }
            }
        }
    }
    info!("dispatcher stopped");
}

/// Cloneable client of the dispatcher task.
#[derive(Clone)]
pub struct DispatcherHandle {
    commands: mpsc::Sender<Command>,
    shutdown: broadcast::Sender<()>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl DispatcherHandle {
    async fn call<T, F>(&self, f: F) -> Result<T, DispatchError>
    where
        F: FnOnce(&mut Dispatcher) -> T + Send + 'static,
        T: Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        let call: Call = Box::new(move |dispatcher| {
            let _ = reply.send(f(dispatcher));
        });
        self.commands
            .send(Command::Call(call))
            .await
            .map_err(|_| DispatchError::QueueClosed)?;
        response.await.map_err(|_| DispatchError::QueueClosed)
    }

    /// Queue an inbound channel value, waiting for queue space.
    pub async fn on_channel_event(&self, raw: RawMessage) -> Result<(), DispatchError> {
        self.commands
            .send(Command::ChannelEvent(raw))
            .await
            .map_err(|_| DispatchError::QueueClosed)
    }

    /// Queue an inbound channel value from a synchronous callback.
    pub fn try_on_channel_event(&self, raw: RawMessage) -> Result<(), DispatchError> {
        self.commands
            .try_send(Command::ChannelEvent(raw))
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => DispatchError::QueueClosed,
            })
    }

    pub async fn subscribe(&self, layer: Layer) -> Result<(), DispatchError> {
        self.call(move |dispatcher| dispatcher.subscribe(layer)).await?
    }

    pub async fn unsubscribe(&self, layer: Layer) -> Result<(), DispatchError> {
        self.call(move |dispatcher| dispatcher.unsubscribe(layer)).await?
    }

    pub async fn subscribe_all(&self) -> Result<(), DispatchError> {
        self.call(|dispatcher| dispatcher.subscribe_all()).await?
    }

    pub async fn unsubscribe_all(&self) -> Result<(), DispatchError> {
        self.call(|dispatcher| dispatcher.unsubscribe_all()).await?
    }

    pub async fn publish(&self, layer: Layer, payload: Bytes) -> Result<(), DispatchError> {
        self.call(move |dispatcher| dispatcher.publish(layer, payload))
            .await?
    }

    pub async fn publish_offering(&self, offerings: Vec<Offering>) -> Result<(), DispatchError> {
        self.call(move |dispatcher| dispatcher.publish_offering(offerings))
            .await?
    }

    pub async fn available_layers(&self) -> Result<AvailableLayers, DispatchError> {
        self.call(|dispatcher| dispatcher.available_layers()).await
    }

    pub async fn current_subscriptions(&self) -> Result<IndexSet<Layer>, DispatchError> {
        self.call(|dispatcher| dispatcher.current_subscriptions())
            .await
    }

    pub async fn snapshot(&self) -> Result<DispatcherSnapshot, DispatchError> {
        self.call(|dispatcher| dispatcher.snapshot()).await
    }

    pub async fn register_listener(
        &self,
        listener: Arc<dyn VmsListener>,
    ) -> Result<ListenerId, DispatchError> {
        self.call(move |dispatcher| dispatcher.register_listener(listener))
            .await
    }

    pub async fn unregister_listener(&self, id: ListenerId) -> Result<bool, DispatchError> {
        self.call(move |dispatcher| dispatcher.unregister_listener(id))
            .await
    }

    pub async fn connection_lost(&self) -> Result<(), DispatchError> {
        self.call(|dispatcher| dispatcher.connection_lost()).await
    }

    /// Stop the control task and wait for it. Commands still queued are
    /// dropped; their callers see [`DispatchError::QueueClosed`].
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(());
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                error!(error = %err, "dispatcher task join error");
            }
        }
    }
}
