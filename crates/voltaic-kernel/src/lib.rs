// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! voltaic-kernel: deterministic tick-driven circuit simulation kernel.
//!
//! The kernel executes mixed digital/analog boards one atomic tick at a time:
//! a tick first propagates every source connector along its links ("snap the
//! wires"), then evaluates every node from its latched inputs. Outputs
//! therefore lag inputs by exactly one tick; there is no fixed-point
//! iteration inside a tick, and combinational loops degrade into one-tick
//! delays rather than hangs.
//!
//! State is content-addressable: [`Machine::state_hash`] produces a canonical
//! BLAKE3 digest over every node's class tag and state blob in a stable
//! traversal order, and the snapshot codec round-trips the same state
//! through the versioned `PVMS` binary format with a CRC32 trailer.

mod board;
mod codec;
mod config;
mod connector;
mod hash;
mod machine;
mod node;
mod signal;

/// Analog node support: ODE integration and the analog part catalog.
pub mod analog;
/// Built-in digital part catalog (constants, gates, registers, probes).
pub mod parts;

/// Board container: owns nodes and links, drives one evaluation pass.
pub use board::{Board, Endpoint, Link, LinkError, NodeIndex, TickFault, TickReport};
/// Snapshot codec: `PVMS` framing, strict decode, strict restore.
pub use codec::{
    decode_snapshot, encode_image, encode_snapshot, image_of, restore_snapshot, BoardImage,
    CodecError, NodeImage, SnapshotImage, SNAPSHOT_MAGIC, SNAPSHOT_SCHEMA_VERSION,
};
/// Kernel-wide configuration threaded to node constructors.
pub use config::KernelConfig;
/// Canonical 256-bit state hash type.
pub use hash::Hash;
/// Top-level simulation container owning boards and the tick counter.
pub use machine::Machine;
/// Node wrapper, behavior seam, and the component contract.
pub use node::{ConnectorLayout, ContractError, Node, NodeBehavior, NodeImpl, ProcessKind};
/// Connector (pin) descriptors and identifiers.
pub use connector::{Connector, ConnectorId, ConnectorRole};
/// Latched connector values.
pub use signal::Signal;
