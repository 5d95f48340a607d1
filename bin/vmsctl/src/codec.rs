//! ---
//! vms_section: "05-networking-external-interfaces"
//! vms_subsection: "binary"
//! vms_type: "source"
//! vms_scope: "code"
//! vms_description: "Control CLI for operators inspecting VMS bus traffic."
//! vms_version: "v0.0.0-prealpha"
//! vms_owner: "tbd"
//! ---
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Args;
use vms_common::{AppConfig, TrailingDataPolicy};
use vms_core::resolve;
use vms_msg::{encode, Codec, Layer, Offering, RawMessage, VmsMessage};

#[derive(Debug, Args)]
pub struct EncodeCommand {
    /// Message as JSON, e.g. '{"type":"subscribe","data":{"id":8,"version":3}}'.
    #[arg(value_name = "JSON")]
    message: String,
}

impl EncodeCommand {
    pub fn execute(self) -> Result<()> {
        let message: VmsMessage =
            serde_json::from_str(&self.message).context("message is not valid JSON")?;
        let raw = encode(&message)
            .with_context(|| format!("unable to encode {} message", message.kind()))?;
        println!("{}", serde_json::to_string(&raw)?);
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct DecodeCommand {
    /// Comma separated integer words, tag first.
    #[arg(
        long,
        value_name = "INTS",
        value_delimiter = ',',
        allow_negative_numbers = true,
        required = true
    )]
    values: Vec<i32>,

    /// Payload bytes as hex.
    #[arg(long, value_name = "HEX")]
    payload: Option<String>,

    /// Drop integers or bytes left over after the declared layout.
    #[arg(long)]
    allow_trailing: bool,
}

impl DecodeCommand {
    pub fn execute(self, config: &AppConfig) -> Result<()> {
        let payload = match &self.payload {
            Some(text) => Bytes::from(hex::decode(text.trim()).context("payload is not valid hex")?),
            None => Bytes::new(),
        };
        let policy = if self.allow_trailing {
            TrailingDataPolicy::Ignore
        } else {
            config.dispatcher.trailing_data
        };
        let raw = RawMessage::new(self.values, payload);
        let message = Codec::new(policy)
            .decode(&raw)
            .context("channel values do not form a valid message")?;
        println!("{}", serde_json::to_string(&message)?);
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct ResolveCommand {
    /// JSON array of offerings: [{"layer":{"id":2,"version":3},"dependencies":[...]}].
    #[arg(value_name = "FILE")]
    file: PathBuf,
}

impl ResolveCommand {
    pub fn execute(self) -> Result<()> {
        let contents = fs::read_to_string(&self.file)
            .with_context(|| format!("unable to read offering table {}", self.file.display()))?;
        let offerings: Vec<Offering> = serde_json::from_str(&contents)
            .with_context(|| format!("invalid offering table {}", self.file.display()))?;
        let available: Vec<Layer> = resolve(&offerings).into_iter().collect();
        println!("{}", serde_json::to_string(&available)?);
        Ok(())
    }
}
