//! ---
//! vms_section: "05-networking-external-interfaces"
//! vms_subsection: "binary"
//! vms_type: "source"
//! vms_scope: "code"
//! vms_description: "Control CLI for operators inspecting VMS bus traffic."
//! vms_version: "v0.0.0-prealpha"
//! vms_owner: "tbd"
//! ---
//! Replay files hold one JSON record per line:
//! `{"delay_ms": 5, "message": {"values": [5, 2, 3], "payload": "0a0b"}}`.
//! Output is one JSON object per line: listener events, channel writes and
//! malformed inputs tagged with the record number, then the final snapshot.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use parking_lot::Mutex;
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use vms_common::AppConfig;
use vms_core::{
    Dispatcher, DispatcherHandle, DispatcherService, ErrorObserver, RecordingListener,
    TracingErrorObserver,
};
use vms_msg::{
    ChannelAdapter, Codec, CodecError, InMemoryChannel, MessagingError, MessagingMetrics,
    RawMessage,
};

#[derive(Debug, Args)]
pub struct ReplayCommand {
    /// Newline-delimited JSON replay records.
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Skip recorded delays.
    #[arg(long)]
    no_delay: bool,

    /// Print Prometheus metrics after the snapshot. Ignored when metrics are
    /// disabled in the configuration.
    #[arg(long)]
    metrics: bool,
}

#[derive(Debug, Deserialize)]
struct ReplayRecord {
    #[serde(default)]
    delay_ms: Option<u64>,
    message: RawMessage,
}

/// Keeps malformed-input reports for printing, and still logs them.
#[derive(Default)]
struct CollectingObserver {
    malformed: Mutex<Vec<String>>,
}

impl ErrorObserver for CollectingObserver {
    fn on_malformed_message(&self, error: &CodecError, raw: &RawMessage) {
        TracingErrorObserver.on_malformed_message(error, raw);
        self.malformed.lock().push(error.to_string());
    }

    fn on_write_failure(&self, error: &MessagingError) {
        TracingErrorObserver.on_write_failure(error);
    }
}

impl ReplayCommand {
    pub fn execute(self, config: AppConfig) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .context("unable to build replay runtime")?;
        runtime.block_on(self.run(config))
    }

    async fn run(self, config: AppConfig) -> Result<()> {
        let file = File::open(&self.file)
            .with_context(|| format!("unable to open replay file {}", self.file.display()))?;

        let registry = Registry::new();
        let metrics = if config.metrics.enabled {
            Some(Arc::new(
                MessagingMetrics::register(&registry, &config.metrics.namespace)
                    .context("failed to register bus metrics")?,
            ))
        } else {
            None
        };
        let channel = Arc::new(InMemoryChannel::new());
        let observer = Arc::new(CollectingObserver::default());
        let mut adapter = ChannelAdapter::new(
            channel.clone(),
            Codec::new(config.dispatcher.trailing_data),
            config.channel.clone(),
        );
        if let Some(metrics) = &metrics {
            adapter = adapter.with_metrics(metrics.clone());
        }
        let mut dispatcher =
            Dispatcher::new(adapter, &config.dispatcher).with_error_observer(observer.clone());
        if let Some(metrics) = metrics.clone() {
            dispatcher = dispatcher.with_metrics(metrics);
        }
        let handle = DispatcherService::spawn(dispatcher, config.dispatcher.queue_capacity);

        let listener = RecordingListener::new();
        handle.register_listener(Arc::new(listener.clone())).await?;

        let outcome = self
            .feed(BufReader::new(file), &handle, &channel, &listener, &observer)
            .await;
        let snapshot = handle.snapshot().await;
        handle.shutdown().await;
        outcome?;
        let snapshot = snapshot?;

        println!("{}", json!({ "kind": "snapshot", "snapshot": snapshot }));
        if self.metrics && metrics.is_some() {
            let mut buffer = Vec::new();
            TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
            print!("{}", String::from_utf8(buffer)?);
        }
        Ok(())
    }

    async fn feed(
        &self,
        reader: impl BufRead,
        handle: &DispatcherHandle,
        channel: &InMemoryChannel,
        listener: &RecordingListener,
        observer: &CollectingObserver,
    ) -> Result<()> {
        let mut record_number = 0usize;
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: ReplayRecord = serde_json::from_str(&line).with_context(|| {
                format!("invalid replay record on line {}", index + 1)
            })?;
            record_number += 1;
            if let Some(delay) = record.delay_ms.filter(|_| !self.no_delay) {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            handle.on_channel_event(record.message).await?;
            // round trip through the queue so the record has been applied
            handle.available_layers().await?;

            for error in observer.malformed.lock().drain(..) {
                println!(
                    "{}",
                    json!({ "kind": "malformed", "record": record_number, "error": error })
                );
            }
            for event in listener.take_events() {
                println!(
                    "{}",
                    json!({ "kind": "event", "record": record_number, "event": event })
                );
            }
            for written in channel.take_written() {
                let message = Codec::default()
                    .decode(&written)
                    .map(|message| json!(message))
                    .unwrap_or_else(|_| json!(written));
                println!(
                    "{}",
                    json!({ "kind": "write", "record": record_number, "message": message })
                );
            }
        }
        Ok(())
    }
}
