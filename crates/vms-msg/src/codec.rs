//! ---
//! vms_section: "02-messaging-protocol"
//! vms_subsection: "module"
//! vms_type: "source"
//! vms_scope: "code"
//! vms_description: "Layer types, wire codec, and channel adapter."
//! vms_version: "v0.0.0-prealpha"
//! vms_owner: "tbd"
//! ---
//! Integer layouts, index 0 always being the type tag:
//!
//! | kind                    | layout                                                          |
//! |-------------------------|-----------------------------------------------------------------|
//! | subscribe / unsubscribe | `[type, id, version]`                                           |
//! | subscribe_all / unsubscribe_all / subscription_request | `[type]`                         |
//! | data                    | `[type, id, version]` + payload bytes                           |
//! | offering                | `[type, n, n x (id, version, deps, deps x (id, version))]`      |
//! | subscription_response   | `[type, sequence, n, n x (id, version)]`                        |

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};
use vms_common::TrailingDataPolicy;

use crate::layer::{Layer, Offering};
use crate::transport::{hex_payload, RawMessage};

/// Message-type tag carried at index 0. Values are part of the wire contract;
/// new kinds get new tags, existing layouts are never redefined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
#[repr(i32)]
pub enum MessageType {
    /// Request to receive DATA for a layer.
    Subscribe = 1,
    /// Withdraw a previous subscribe.
    Unsubscribe = 2,
    /// Request DATA for every available layer.
    SubscribeAll = 3,
    /// Withdraw subscribe-all.
    UnsubscribeAll = 4,
    /// Published layer data.
    Data = 5,
    /// Full snapshot of publisher offerings.
    Offering = 6,
    /// Query for the current subscription set.
    SubscriptionRequest = 7,
    /// Answer to a subscription request.
    SubscriptionResponse = 8,
}

impl MessageType {
    /// Integer written at index 0.
    pub fn tag(self) -> i32 {
        self as i32
    }

    /// Stable lowercase label for logs and metrics.
    pub fn label(self) -> &'static str {
        self.into()
    }

    /// Resolve a wire tag.
    pub fn from_tag(tag: i32) -> Option<Self> {
        Self::iter().find(|kind| kind.tag() == tag)
    }
}

/// Typed message multiplexed over the shared channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum VmsMessage {
    /// Subscribe to one layer.
    Subscribe(Layer),
    /// Unsubscribe from one layer.
    Unsubscribe(Layer),
    /// Subscribe to every available layer.
    SubscribeAll,
    /// Leave subscribe-all mode.
    UnsubscribeAll,
    /// Layer data with an opaque payload.
    Data {
        /// Layer the payload belongs to.
        layer: Layer,
        /// Opaque payload bytes.
        #[serde(default, with = "hex_payload")]
        payload: Bytes,
    },
    /// Complete offering table; replaces any previous one.
    Offering(Vec<Offering>),
    /// Ask for the current subscriptions.
    SubscriptionRequest,
    /// Current subscriptions.
    SubscriptionResponse {
        /// Number of subscribed layers when the response was built.
        sequence_number: u32,
        /// Subscribed layers.
        layers: Vec<Layer>,
    },
}

impl VmsMessage {
    /// Wire tag of this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            VmsMessage::Subscribe(_) => MessageType::Subscribe,
            VmsMessage::Unsubscribe(_) => MessageType::Unsubscribe,
            VmsMessage::SubscribeAll => MessageType::SubscribeAll,
            VmsMessage::UnsubscribeAll => MessageType::UnsubscribeAll,
            VmsMessage::Data { .. } => MessageType::Data,
            VmsMessage::Offering(_) => MessageType::Offering,
            VmsMessage::SubscriptionRequest => MessageType::SubscriptionRequest,
            VmsMessage::SubscriptionResponse { .. } => MessageType::SubscriptionResponse,
        }
    }

    /// Convenience accessor returning the kind label.
    pub fn kind(&self) -> &'static str {
        self.message_type().label()
    }

    /// Layer addressed by single-layer messages.
    pub fn layer(&self) -> Option<Layer> {
        match self {
            VmsMessage::Subscribe(layer)
            | VmsMessage::Unsubscribe(layer)
            | VmsMessage::Data { layer, .. } => Some(*layer),
            _ => None,
        }
    }

    /// Build a subscription response; the sequence number is the layer count.
    pub fn subscription_response(layers: impl IntoIterator<Item = Layer>) -> Self {
        let layers: Vec<Layer> = layers.into_iter().collect();
        VmsMessage::SubscriptionResponse {
            sequence_number: u32::try_from(layers.len()).unwrap_or(u32::MAX),
            layers,
        }
    }
}

/// Why an inbound value could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedMessage {
    /// No integers at all, so no type tag.
    #[error("message carries no integer values")]
    Empty,
    /// Index 0 is not a known tag.
    #[error("unknown message type tag {0}")]
    UnknownType(i32),
    /// Fewer integers than the declared counts require.
    #[error("message truncated: need at least {expected} values, got {actual}")]
    Truncated {
        /// Minimum number of integers required.
        expected: usize,
        /// Number of integers present.
        actual: usize,
    },
    /// A count, id or version was negative.
    #[error("negative value {value} at index {index}")]
    NegativeValue {
        /// Position in the integer sequence.
        index: usize,
        /// Offending value.
        value: i32,
    },
    /// Integers left over after the declared layout.
    #[error("trailing data: layout ends after {expected} values, got {actual}")]
    TrailingData {
        /// Length implied by the layout.
        expected: usize,
        /// Number of integers present.
        actual: usize,
    },
    /// A byte payload on a message kind that never carries one.
    #[error("unexpected {0}-byte payload on a non-data message")]
    UnexpectedPayload(usize),
    /// An offering lists the same dependency twice.
    #[error("duplicate offering dependency at index {index}")]
    DuplicateDependency {
        /// Position of the repeated layer's id.
        index: usize,
    },
}

/// Codec failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Inbound value does not follow any known layout.
    #[error("malformed message: {0}")]
    Malformed(#[from] MalformedMessage),
    /// Outbound value does not fit the signed 32-bit wire word.
    #[error("value {0} does not fit the 32-bit wire word")]
    ValueOutOfRange(u64),
}

/// Encoder/decoder bound to a trailing-data policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Codec {
    trailing: TrailingDataPolicy,
}

impl Codec {
    /// Create a codec with the given trailing-data policy.
    pub fn new(trailing: TrailingDataPolicy) -> Self {
        Self { trailing }
    }

    /// Policy applied to leftover integers or unexpected payload bytes.
    pub fn trailing_policy(&self) -> TrailingDataPolicy {
        self.trailing
    }

    /// Encode a message into its wire form.
    pub fn encode(&self, message: &VmsMessage) -> Result<RawMessage, CodecError> {
        let mut writer = Writer::with_type(message.message_type());
        let mut payload = Bytes::new();
        match message {
            VmsMessage::Subscribe(layer) | VmsMessage::Unsubscribe(layer) => {
                writer.layer(layer)?;
            }
            VmsMessage::SubscribeAll
            | VmsMessage::UnsubscribeAll
            | VmsMessage::SubscriptionRequest => {}
            VmsMessage::Data {
                layer,
                payload: bytes,
            } => {
                writer.layer(layer)?;
                payload = bytes.clone();
            }
            VmsMessage::Offering(offerings) => {
                writer.count(offerings.len())?;
                for offering in offerings {
                    writer.layer(&offering.layer)?;
                    writer.count(offering.dependencies.len())?;
                    for dependency in &offering.dependencies {
                        writer.layer(dependency)?;
                    }
                }
            }
            VmsMessage::SubscriptionResponse {
                sequence_number,
                layers,
            } => {
                writer.word(*sequence_number)?;
                writer.count(layers.len())?;
                for layer in layers {
                    writer.layer(layer)?;
                }
            }
        }
        Ok(RawMessage::new(writer.values, payload))
    }

    /// Decode a wire value, reading exactly the declared counts.
    pub fn decode(&self, raw: &RawMessage) -> Result<VmsMessage, CodecError> {
        let mut reader = Reader::new(&raw.values);
        let tag = reader.tag()?;
        let kind = MessageType::from_tag(tag).ok_or(MalformedMessage::UnknownType(tag))?;

        let message = match kind {
            MessageType::Subscribe => VmsMessage::Subscribe(reader.layer()?),
            MessageType::Unsubscribe => VmsMessage::Unsubscribe(reader.layer()?),
            MessageType::SubscribeAll => VmsMessage::SubscribeAll,
            MessageType::UnsubscribeAll => VmsMessage::UnsubscribeAll,
            MessageType::SubscriptionRequest => VmsMessage::SubscriptionRequest,
            MessageType::Data => VmsMessage::Data {
                layer: reader.layer()?,
                payload: raw.payload.clone(),
            },
            MessageType::Offering => {
                // smallest offering: id, version, zero dependency count
                let count = reader.count(3)?;
                let mut offerings = Vec::with_capacity(count);
                for _ in 0..count {
                    let layer = reader.layer()?;
                    let dependency_count = reader.count(2)?;
                    let mut offering = Offering::new(layer);
                    for _ in 0..dependency_count {
                        let index = reader.position();
                        let dependency = reader.layer()?;
                        if !offering.dependencies.insert(dependency)
                            && self.trailing == TrailingDataPolicy::Reject
                        {
                            return Err(MalformedMessage::DuplicateDependency { index }.into());
                        }
                    }
                    offerings.push(offering);
                }
                VmsMessage::Offering(offerings)
            }
            MessageType::SubscriptionResponse => {
                let sequence_number = reader.word()?;
                let count = reader.count(2)?;
                let mut layers = Vec::with_capacity(count);
                for _ in 0..count {
                    layers.push(reader.layer()?);
                }
                VmsMessage::SubscriptionResponse {
                    sequence_number,
                    layers,
                }
            }
        };

        if self.trailing == TrailingDataPolicy::Reject {
            if !reader.is_exhausted() {
                return Err(MalformedMessage::TrailingData {
                    expected: reader.position(),
                    actual: raw.values.len(),
                }
                .into());
            }
            if kind != MessageType::Data && !raw.payload.is_empty() {
                return Err(MalformedMessage::UnexpectedPayload(raw.payload.len()).into());
            }
        }
        Ok(message)
    }
}

/// Encode with the default codec.
pub fn encode(message: &VmsMessage) -> Result<RawMessage, CodecError> {
    Codec::default().encode(message)
}

/// Decode with the default (rejecting) codec.
pub fn decode(raw: &RawMessage) -> Result<VmsMessage, CodecError> {
    Codec::default().decode(raw)
}

struct Writer {
    values: Vec<i32>,
}

impl Writer {
    fn with_type(kind: MessageType) -> Self {
        Self {
            values: vec![kind.tag()],
        }
    }

    fn word(&mut self, value: u32) -> Result<(), CodecError> {
        let value = i32::try_from(value).map_err(|_| CodecError::ValueOutOfRange(value.into()))?;
        self.values.push(value);
        Ok(())
    }

    fn count(&mut self, count: usize) -> Result<(), CodecError> {
        let value = i32::try_from(count).map_err(|_| CodecError::ValueOutOfRange(count as u64))?;
        self.values.push(value);
        Ok(())
    }

    fn layer(&mut self, layer: &Layer) -> Result<(), CodecError> {
        self.word(layer.id)?;
        self.word(layer.version)
    }
}

struct Reader<'a> {
    values: &'a [i32],
    position: usize,
}

impl<'a> Reader<'a> {
    fn new(values: &'a [i32]) -> Self {
        Self {
            values,
            position: 0,
        }
    }

    fn position(&self) -> usize {
        self.position
    }

    fn is_exhausted(&self) -> bool {
        self.position >= self.values.len()
    }

    fn require(&self, needed: usize) -> Result<(), MalformedMessage> {
        let remaining = self.values.len().saturating_sub(self.position);
        if remaining < needed {
            return Err(MalformedMessage::Truncated {
                expected: self.position.saturating_add(needed),
                actual: self.values.len(),
            });
        }
        Ok(())
    }

    fn tag(&mut self) -> Result<i32, MalformedMessage> {
        let Some(&tag) = self.values.first() else {
            return Err(MalformedMessage::Empty);
        };
        self.position = 1;
        Ok(tag)
    }

    fn word(&mut self) -> Result<u32, MalformedMessage> {
        self.require(1)?;
        let index = self.position;
        let value = self.values[index];
        let word = u32::try_from(value)
            .map_err(|_| MalformedMessage::NegativeValue { index, value })?;
        self.position += 1;
        Ok(word)
    }

    /// Read a count and check that `count * min_width` integers follow.
    fn count(&mut self, min_width: usize) -> Result<usize, MalformedMessage> {
        let count = self.word()? as usize;
        self.require(count.saturating_mul(min_width))?;
        Ok(count)
    }

    fn layer(&mut self) -> Result<Layer, MalformedMessage> {
        self.require(2)?;
        let id = self.word()?;
        let version = self.word()?;
        Ok(Layer::new(id, version))
    }
}
