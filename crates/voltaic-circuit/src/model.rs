// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Circuit model types.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ops::EditOperation;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Borrow the raw id text.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_id!(
    /// Identifier of a component instance, unique within the circuit.
    ComponentId
);
string_id!(
    /// Identifier of a pin, conventionally `"<component>.<pin>"`.
    PinId
);
string_id!(
    /// Identifier of a net.
    NetId
);
string_id!(
    /// Identifier of a named block.
    BlockId
);

/// The logical kind of a component instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentClass {
    /// Constant bit-pattern driver.
    Constant,
    /// Single-bit pass-through.
    Buffer,
    /// Single-bit inverter.
    Not,
    /// Two-input AND.
    And,
    /// Two-input OR.
    Or,
    /// Two-input XOR.
    Xor,
    /// Clocked register (sequential boundary).
    Register,
    /// Multi-stage CDC synchronizer (sequential, crossing-legal).
    Synchronizer,
    /// Observation probe.
    Probe,
    /// Constant analog level.
    DcSource,
    /// First-order analog RC low-pass.
    RcLowPass,
    /// An application-defined class; pins must be declared explicitly.
    Custom(String),
}

impl ComponentClass {
    /// Whether instances of this class form a sequential boundary (their
    /// outputs depend on the previous cycle, not combinationally on inputs).
    #[must_use]
    pub fn is_sequential(&self) -> bool {
        matches!(self, Self::Register | Self::Synchronizer)
    }
}

/// Direction of a pin relative to its component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinDirection {
    /// The component reads this pin.
    Input,
    /// The component drives this pin.
    Output,
    /// Either, negotiated at elaboration time.
    Bidirectional,
}

/// A property value, typed per the class registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValue {
    /// Signed integer.
    Int(i64),
    /// Floating point.
    Float(f64),
    /// Boolean flag.
    Bool(bool),
    /// Free text (clock names, labels).
    Text(String),
}

impl PropertyValue {
    /// The text payload, when textual.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The integer payload, when integral.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }
}

/// A typed component instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// Unique instance id.
    pub id: ComponentId,
    /// Logical kind.
    pub class: ComponentClass,
    /// Class-validated properties.
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
    /// Pins owned by this component, in declaration order.
    #[serde(default)]
    pub pins: Vec<PinId>,
    /// Optional placement coordinates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<(i64, i64)>,
}

/// A named port on a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pin {
    /// Unique pin id (`"<component>.<pin>"` by construction).
    pub id: PinId,
    /// Owning component.
    pub component: ComponentId,
    /// Pin name within the component.
    pub name: String,
    /// Direction relative to the component.
    pub direction: PinDirection,
    /// Width in bits.
    pub width: u8,
    /// Net this pin is attached to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net: Option<NetId>,
}

/// A set of electrically connected pins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Net {
    /// Unique net id.
    pub id: NetId,
    /// Attached pins.
    pub pins: BTreeSet<PinId>,
}

/// A named subgraph with port pins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Unique block id.
    pub id: BlockId,
    /// Human-readable name.
    pub name: String,
    /// Member components.
    pub components: BTreeSet<ComponentId>,
    /// Port pins exposed at the block boundary.
    #[serde(default)]
    pub ports: Vec<PinId>,
}

/// One applied edit, as recorded in the append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionEntry {
    /// Revision produced by this edit (1-based; revision 0 is the empty
    /// circuit).
    pub revision: u64,
    /// The edit, in its applied (cascade-enriched) form.
    pub op: EditOperation,
}

/// The declarative circuit: components, pins, nets, blocks, and the revision
/// chain that produced them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Circuit {
    /// Component instances by id.
    pub(crate) components: BTreeMap<ComponentId, Component>,
    /// Pins by id.
    pub(crate) pins: BTreeMap<PinId, Pin>,
    /// Nets by id.
    pub(crate) nets: BTreeMap<NetId, Net>,
    /// Declared blocks by id.
    pub(crate) blocks: BTreeMap<BlockId, Block>,
    /// Current revision (count of applied edits since the empty circuit).
    pub(crate) revision: u64,
    /// Append-only edit log; `log[i].revision == i + 1`.
    pub(crate) log: Vec<RevisionEntry>,
}

impl Circuit {
    /// The empty circuit at revision 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current revision number.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The append-only edit log.
    #[must_use]
    pub fn log(&self) -> &[RevisionEntry] {
        &self.log
    }

    /// Edit operations in the half-open revision range `(from, to]`.
    #[must_use]
    pub fn ops_between(&self, from: u64, to: u64) -> Vec<RevisionEntry> {
        self.log
            .iter()
            .filter(|e| e.revision > from && e.revision <= to)
            .cloned()
            .collect()
    }

    /// Components in id order.
    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }

    /// Pins in id order.
    pub fn pins(&self) -> impl Iterator<Item = &Pin> {
        self.pins.values()
    }

    /// Nets in id order.
    pub fn nets(&self) -> impl Iterator<Item = &Net> {
        self.nets.values()
    }

    /// Blocks in id order.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    /// Looks up a component.
    #[must_use]
    pub fn component(&self, id: &ComponentId) -> Option<&Component> {
        self.components.get(id)
    }

    /// Looks up a pin.
    #[must_use]
    pub fn pin(&self, id: &PinId) -> Option<&Pin> {
        self.pins.get(id)
    }

    /// Looks up a net.
    #[must_use]
    pub fn net(&self, id: &NetId) -> Option<&Net> {
        self.nets.get(id)
    }

    /// Looks up a block.
    #[must_use]
    pub fn block(&self, id: &BlockId) -> Option<&Block> {
        self.blocks.get(id)
    }

    /// Number of components.
    #[must_use]
    pub fn component_count(&self) -> usize {
        self.components.len()
    }
}
