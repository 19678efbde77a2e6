// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! voltaic-circuit: the declarative circuit model.
//!
//! A [`Circuit`] is a serializable graph of typed components, their pins,
//! the nets connecting them, and optional named blocks - independent of any
//! live simulation machine. All adjacency lives in the owning circuit:
//! components hold pin ids, pins hold an optional net id, nets hold pin id
//! sets. Removal cascades are enforced by the circuit, never by reference
//! counting.
//!
//! The circuit carries a revision number and an append-only log of the
//! [`EditOperation`]s that produced it from the empty circuit. Edits are
//! validated against the current state and are all-or-nothing: a failed edit
//! leaves the circuit bit-identical to its pre-state.

mod classes;
mod file;
mod merge;
mod model;
mod ops;

pub use classes::{pin_templates, property_specs, PinTemplate, PropertyKind, PropertySpec};
pub use file::{load_circuit, save_circuit, CircuitFileError, CIRCUIT_SCHEMA_VERSION};
pub use merge::{three_way_merge, ConflictReason, MergeResult, OpConflict};
pub use model::{
    Block, BlockId, Circuit, Component, ComponentClass, ComponentId, Net, NetId, Pin, PinDirection,
    PinId, PropertyValue, RevisionEntry,
};
pub use ops::{CustomPin, EditError, EditOperation, EntityKind};
