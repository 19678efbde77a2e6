// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Node wrapper and the component contract.
//!
//! A node is a closed enum of built-in behaviors plus one open
//! [`NodeBehavior::Custom`] escape hatch. The wrapper owns the connector
//! table (fixed at construction, declaration-order ids) and validates the
//! contract - range, role, width - before delegating to the behavior, so
//! individual parts can assume well-formed calls.
//!
//! Contract faults are values, never panics: an out-of-range `conn_id`, a
//! width mismatch, or a write to a non-source connector is a
//! [`ContractError`] the board records while the rest of the tick proceeds.

use core::ops::Range;

use bytes::Bytes;
use thiserror::Error;

use crate::analog::{DcSource, RcLowPass};
use crate::connector::{Connector, ConnectorId};
use crate::parts::{AndGate, Buffer, Constant, NotGate, OrGate, Probe, RegisterBit, XorGate};
use crate::signal::Signal;

/// Operations a node can be asked to perform against another node.
///
/// Only `Write` is defined today; the variant space is reserved for
/// tri-state negotiation and bus arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    /// Propagate this node's current output to the target's sink.
    Write,
}

/// Component-contract violation. Recorded per tick; never aborts the pass.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContractError {
    /// `conn_id` is outside the node's connector table.
    #[error("connector {conn} out of range (node has {count})")]
    UnknownConnector {
        /// The offending id.
        conn: ConnectorId,
        /// Number of connectors on the node.
        count: u16,
    },

    /// The latched value's width disagrees with the connector's declared width.
    #[error("width mismatch on connector {conn}: declared {declared}, got {got}")]
    WidthMismatch {
        /// The target connector.
        conn: ConnectorId,
        /// Declared width in bits.
        declared: u8,
        /// Width of the arriving signal.
        got: u8,
    },

    /// A value arrived at a connector that cannot latch.
    #[error("connector {conn} is not a sink")]
    NotASink {
        /// The offending connector.
        conn: ConnectorId,
    },

    /// A read was issued against a connector that cannot drive.
    #[error("connector {conn} is not a source")]
    NotASource {
        /// The offending connector.
        conn: ConnectorId,
    },

    /// The behavior rejected a restored state blob.
    #[error("state blob rejected: expected {expected} bytes, got {got}")]
    BadState {
        /// Size the behavior requires.
        expected: usize,
        /// Size that arrived.
        got: usize,
    },
}

/// Behavior seam implemented by every simulation element.
///
/// Implementations may assume the wrapper has already validated connector
/// range, role, and width. `tick` must be idempotent when called twice
/// without intervening `put`s, and getters (`read`, `state_bytes`) must be
/// pure - any cached derivation is refreshed inside `tick`.
pub trait NodeImpl: core::fmt::Debug {
    /// Stable class tag used by the snapshot codec and state hash.
    fn class_tag(&self) -> &'static str;

    /// Connector declarations, in id order: sinks, then sources, then flag
    /// sources at the tail.
    fn connectors(&self) -> Vec<Connector>;

    /// Recompute outputs from latched inputs (one simulation step).
    fn tick(&mut self) -> Result<(), ContractError>;

    /// Latch `value` on sink connector `conn`.
    fn put(&mut self, conn: ConnectorId, value: &Signal) -> Result<(), ContractError>;

    /// Current output on source connector `conn`.
    fn read(&self, conn: ConnectorId) -> Result<Signal, ContractError>;

    /// Opaque private state, canonical encoding. Feeds the state hash and
    /// the snapshot codec.
    fn state_bytes(&self) -> Bytes;

    /// Strict inverse of [`NodeImpl::state_bytes`]; any size mismatch fails.
    fn restore_state(&mut self, bytes: &[u8]) -> Result<(), ContractError>;
}

/// Closed set of built-in behaviors plus the custom escape hatch.
#[derive(Debug)]
pub enum NodeBehavior {
    /// Constant bit-pattern driver.
    Constant(Constant),
    /// Single-bit pass-through (one-tick delay, like everything else).
    Buffer(Buffer),
    /// Single-bit inverter.
    Not(NotGate),
    /// Two-input AND.
    And(AndGate),
    /// Two-input OR.
    Or(OrGate),
    /// Two-input XOR.
    Xor(XorGate),
    /// One-tick latch with enable and clear.
    Register(RegisterBit),
    /// Records the last value latched on its input.
    Probe(Probe),
    /// First-order analog RC low-pass (RK4-integrated).
    RcLowPass(RcLowPass),
    /// Constant analog level driver.
    DcSource(DcSource),
    /// Application-supplied behavior.
    Custom(Box<dyn NodeImpl>),
}

impl NodeBehavior {
    fn as_impl(&self) -> &dyn NodeImpl {
        match self {
            Self::Constant(p) => p,
            Self::Buffer(p) => p,
            Self::Not(p) => p,
            Self::And(p) => p,
            Self::Or(p) => p,
            Self::Xor(p) => p,
            Self::Register(p) => p,
            Self::Probe(p) => p,
            Self::RcLowPass(p) => p,
            Self::DcSource(p) => p,
            Self::Custom(p) => p.as_ref(),
        }
    }

    fn as_impl_mut(&mut self) -> &mut dyn NodeImpl {
        match self {
            Self::Constant(p) => p,
            Self::Buffer(p) => p,
            Self::Not(p) => p,
            Self::And(p) => p,
            Self::Or(p) => p,
            Self::Xor(p) => p,
            Self::Register(p) => p,
            Self::Probe(p) => p,
            Self::RcLowPass(p) => p,
            Self::DcSource(p) => p,
            Self::Custom(p) => p.as_mut(),
        }
    }
}

/// Contiguous connector-range metadata for a node.
///
/// Inputs occupy `0..n_in`, outputs follow, and flag outputs (single-bit
/// status sources such as carry/zero) sit at the tail. Both inputs and
/// outputs enumerate in declaration order - there is no reversed range
/// anywhere in the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorLayout {
    /// Sink connector ids.
    pub inputs: Range<u16>,
    /// Source connector ids (data).
    pub outputs: Range<u16>,
    /// Source connector ids (status flags), possibly empty.
    pub flags: Range<u16>,
}

/// One simulation element: stable class tag, human name, fixed connector
/// table, and private behavior state. Always owned by exactly one board.
#[derive(Debug)]
pub struct Node {
    name: String,
    connectors: Vec<Connector>,
    behavior: NodeBehavior,
}

impl Node {
    /// Wraps `behavior` under `name`, capturing its connector table.
    #[must_use]
    pub fn new(name: impl Into<String>, behavior: NodeBehavior) -> Self {
        let connectors = behavior.as_impl().connectors();
        Self {
            name: name.into(),
            connectors,
            behavior,
        }
    }

    /// Human-readable node name, unique within its board by convention.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stable class tag (snapshot codec key).
    #[must_use]
    pub fn class_tag(&self) -> &'static str {
        self.behavior.as_impl().class_tag()
    }

    /// The connector table, in declaration order.
    #[must_use]
    pub fn connectors(&self) -> &[Connector] {
        &self.connectors
    }

    /// Looks up a connector id by pin name.
    #[must_use]
    pub fn connector_named(&self, name: &str) -> Option<ConnectorId> {
        self.connectors
            .iter()
            .position(|c| c.name == name)
            .and_then(|i| u16::try_from(i).ok())
            .map(ConnectorId)
    }

    /// Connector-range metadata: inputs, then outputs, then flags.
    ///
    /// Flag outputs are the trailing run of width-1 sources that follow at
    /// least one wider (or earlier) source; for nodes with a single source
    /// the flags range is empty.
    #[must_use]
    pub fn layout(&self) -> ConnectorLayout {
        let n = self.connectors.len();
        let n_in = self
            .connectors
            .iter()
            .take_while(|c| c.role.can_latch() && !c.role.can_drive())
            .count();
        // Trailing width-1 sources after the first (data) source are flags.
        let mut flags_start = n;
        if n - n_in > 1 {
            while flags_start > n_in + 1 && self.connectors[flags_start - 1].width == 1 {
                flags_start -= 1;
            }
        }
        let n_in = u16::try_from(n_in).unwrap_or(u16::MAX);
        let flags_start = u16::try_from(flags_start).unwrap_or(u16::MAX);
        let n = u16::try_from(n).unwrap_or(u16::MAX);
        ConnectorLayout {
            inputs: 0..n_in,
            outputs: n_in..flags_start,
            flags: flags_start..n,
        }
    }

    fn connector(&self, conn: ConnectorId) -> Result<&Connector, ContractError> {
        self.connectors
            .get(conn.index())
            .ok_or(ContractError::UnknownConnector {
                conn,
                count: u16::try_from(self.connectors.len()).unwrap_or(u16::MAX),
            })
    }

    /// Recomputes internal outputs from latched inputs.
    ///
    /// Idempotent when no `put` intervened.
    pub fn tick(&mut self) -> Result<(), ContractError> {
        self.behavior.as_impl_mut().tick()
    }

    /// Latches `value` on sink (or bidirectional) connector `conn`.
    pub fn put(&mut self, conn: ConnectorId, value: &Signal) -> Result<(), ContractError> {
        let c = self.connector(conn)?;
        if !c.role.can_latch() {
            return Err(ContractError::NotASink { conn });
        }
        if value.width() != c.width {
            return Err(ContractError::WidthMismatch {
                conn,
                declared: c.width,
                got: value.width(),
            });
        }
        self.behavior.as_impl_mut().put(conn, value)
    }

    /// Current output on source (or bidirectional) connector `conn`.
    pub fn read(&self, conn: ConnectorId) -> Result<Signal, ContractError> {
        let c = self.connector(conn)?;
        if !c.role.can_drive() {
            return Err(ContractError::NotASource { conn });
        }
        self.behavior.as_impl().read(conn)
    }

    /// Node-to-node write contract: propagates this node's output on `conn`
    /// to `target`'s connector by invoking `target.put`.
    pub fn process(
        &self,
        kind: ProcessKind,
        conn: ConnectorId,
        target: &mut Node,
        target_conn: ConnectorId,
    ) -> Result<(), ContractError> {
        match kind {
            ProcessKind::Write => {
                let value = self.read(conn)?;
                target.put(target_conn, &value)
            }
        }
    }

    /// Canonical private-state blob for hashing and snapshots.
    #[must_use]
    pub fn state_bytes(&self) -> Bytes {
        self.behavior.as_impl().state_bytes()
    }

    /// Strict state restore; any size mismatch fails without partial effect.
    pub fn restore_state(&mut self, bytes: &[u8]) -> Result<(), ContractError> {
        self.behavior.as_impl_mut().restore_state(bytes)
    }
}
