//! ---
//! vms_section: "02-messaging-protocol"
//! vms_subsection: "module"
//! vms_type: "source"
//! vms_scope: "code"
//! vms_description: "Layer types, wire codec, and channel adapter."
//! vms_version: "v0.0.0-prealpha"
//! vms_owner: "tbd"
//! ---
use std::fmt;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

/// Insertion ordered set of layers. Equality ignores order.
pub type AvailableLayers = IndexSet<Layer>;

/// A named, versioned unit of publishable data.
///
/// Two layers that differ only by version are distinct. Both components must
/// fit the signed 32-bit wire word to be encodable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Layer {
    /// Layer identifier.
    pub id: u32,
    /// Layer version.
    pub version: u32,
}

impl Layer {
    /// Construct a layer from its identity pair.
    pub const fn new(id: u32, version: u32) -> Self {
        Self { id, version }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.id, self.version)
    }
}

impl From<(u32, u32)> for Layer {
    fn from((id, version): (u32, u32)) -> Self {
        Self::new(id, version)
    }
}

/// A publisher's declaration that it can supply `layer` once every layer in
/// `dependencies` is itself available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offering {
    /// The offered layer.
    pub layer: Layer,
    /// Prerequisite layers; empty means unconditionally available. A set, so
    /// a lenient decode merges repeated wire entries and a strict one rejects
    /// them.
    #[serde(default)]
    pub dependencies: IndexSet<Layer>,
}

impl Offering {
    /// Offering with no prerequisites.
    pub fn new(layer: Layer) -> Self {
        Self {
            layer,
            dependencies: IndexSet::new(),
        }
    }

    /// Offering that requires every layer in `dependencies`.
    pub fn with_dependencies(layer: Layer, dependencies: impl IntoIterator<Item = Layer>) -> Self {
        Self {
            layer,
            dependencies: dependencies.into_iter().collect(),
        }
    }

    /// True when the offering has no prerequisites.
    pub fn is_unconditional(&self) -> bool {
        self.dependencies.is_empty()
    }
}
