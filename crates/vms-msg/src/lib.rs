//! ---
//! vms_section: "02-messaging-protocol"
//! vms_subsection: "module"
//! vms_type: "source"
//! vms_scope: "code"
//! vms_description: "Layer types, wire codec, and channel adapter."
//! vms_version: "v0.0.0-prealpha"
//! vms_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Wire protocol for the VMS bus.
//!
//! Every message travels over the shared channel as a flat sequence of
//! signed 32-bit integers (index 0 is the message-type tag) plus an optional
//! byte payload that only DATA messages carry.

pub mod codec;
pub mod layer;
pub mod logging;
pub mod transport;

/// Shared result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;

/// Failure while moving a message onto the shared channel.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// The message could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The channel rejected the write after all configured attempts.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

pub use codec::{decode, encode, Codec, CodecError, MalformedMessage, MessageType, VmsMessage};
pub use layer::{AvailableLayers, Layer, Offering};
pub use logging::{log_message, MessageDirection, MessagingMetrics};
pub use transport::{ChannelAdapter, ChannelError, InMemoryChannel, RawMessage, VmsChannel};
