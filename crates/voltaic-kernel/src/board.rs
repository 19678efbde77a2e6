// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Board: owns nodes and their link topology, drives one evaluation pass.
//!
//! A tick pass is two strictly ordered phases:
//! 1. **Propagate** - every driving connector, in stable enumeration order
//!    (nodes in declaration order, connectors in id order, links in
//!    insertion order), writes its current output to the linked sink via the
//!    node-to-node write contract.
//! 2. **Evaluate** - every node's `tick`, in declaration order.
//!
//! Propagation before evaluation is the kernel's semantics: a tick computes
//! outputs from inputs latched in the *previous* tick. There is no
//! fixed-point iteration; combinational loops manifest as one-tick delays
//! and are the analyzer's business to flag.

use thiserror::Error;

use crate::connector::ConnectorId;
use crate::node::{ContractError, Node, ProcessKind};

/// Index of a node within its owning board.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeIndex(pub u32);

impl NodeIndex {
    /// The raw arena index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One end of a link: `(node, connector)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Endpoint {
    /// Node within the board.
    pub node: NodeIndex,
    /// Connector on that node.
    pub conn: ConnectorId,
}

/// Directed wire between a driving connector and a latching connector on the
/// same board. Links store no value; values flow during propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    /// Driving end.
    pub from: Endpoint,
    /// Latching end.
    pub to: Endpoint,
}

/// Structural error while wiring a board.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// Endpoint references a node outside this board.
    #[error("unknown node index {0:?}")]
    UnknownNode(NodeIndex),

    /// Endpoint references a connector the node does not have.
    #[error("node {node:?} has no connector {conn}")]
    UnknownConnector {
        /// The node in question.
        node: NodeIndex,
        /// The missing connector id.
        conn: ConnectorId,
    },

    /// The `from` end cannot drive, or the `to` end cannot latch.
    #[error("role mismatch: {from:?} -> {to:?}")]
    RoleMismatch {
        /// Driving end.
        from: Endpoint,
        /// Latching end.
        to: Endpoint,
    },

    /// Declared widths disagree across the link.
    #[error("width mismatch: {from_width} -> {to_width}")]
    WidthMismatch {
        /// Width at the driving end.
        from_width: u8,
        /// Width at the latching end.
        to_width: u8,
    },

    /// Two links joining the same unordered endpoint pair are illegal.
    #[error("duplicate link between {a:?} and {b:?}")]
    DuplicateLink {
        /// One endpoint.
        a: Endpoint,
        /// The other endpoint.
        b: Endpoint,
    },

    /// A non-multi connector already has its one allowed link.
    #[error("connector {at:?} does not allow multiple links")]
    Occupied {
        /// The saturated endpoint.
        at: Endpoint,
    },
}

/// One component-contract fault recorded during a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickFault {
    /// Node that violated (or was asked to violate) the contract.
    pub node: NodeIndex,
    /// Its human name, for diagnostics.
    pub node_name: String,
    /// The violation.
    pub error: ContractError,
}

/// Outcome of one or more tick passes.
///
/// Faults never abort a pass; they mark it degraded and the rest of the
/// board proceeds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Contract faults, in discovery order.
    pub faults: Vec<TickFault>,
}

impl TickReport {
    /// True when at least one fault was recorded.
    #[must_use]
    pub fn degraded(&self) -> bool {
        !self.faults.is_empty()
    }

    /// Folds `other` into this report.
    pub fn merge(&mut self, other: TickReport) {
        self.faults.extend(other.faults);
    }
}

/// Ordered collection of nodes plus a link table.
///
/// The board exclusively owns its nodes; destroying the board destroys them.
/// Every link's endpoints reference nodes on this board - cross-board
/// references cannot be expressed.
#[derive(Debug, Default)]
pub struct Board {
    name: String,
    nodes: Vec<Node>,
    links: Vec<Link>,
}

impl Board {
    /// An empty board.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            links: Vec::new(),
        }
    }

    /// Board name (netlist export key).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a node; the returned index is its stable identity on this board.
    pub fn add_node(&mut self, node: Node) -> NodeIndex {
        let idx = NodeIndex(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX));
        self.nodes.push(node);
        idx
    }

    /// Nodes in declaration order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Mutable access to a node (test stimulus, probe readback).
    pub fn node_mut(&mut self, idx: NodeIndex) -> Option<&mut Node> {
        self.nodes.get_mut(idx.index())
    }

    /// Shared access to a node.
    #[must_use]
    pub fn node(&self, idx: NodeIndex) -> Option<&Node> {
        self.nodes.get(idx.index())
    }

    /// Links in insertion order.
    #[must_use]
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    fn check_endpoint(&self, ep: Endpoint) -> Result<&crate::connector::Connector, LinkError> {
        let node = self
            .nodes
            .get(ep.node.index())
            .ok_or(LinkError::UnknownNode(ep.node))?;
        node.connectors()
            .get(ep.conn.index())
            .ok_or(LinkError::UnknownConnector {
                node: ep.node,
                conn: ep.conn,
            })
    }

    /// Count of links touching `ep` in either role.
    fn degree(&self, ep: Endpoint) -> usize {
        self.links
            .iter()
            .filter(|l| l.from == ep || l.to == ep)
            .count()
    }

    /// Wires `from` to `to`, validating the full link contract.
    pub fn link(&mut self, from: Endpoint, to: Endpoint) -> Result<(), LinkError> {
        let from_conn = self.check_endpoint(from)?;
        let to_conn = self.check_endpoint(to)?;

        if !from_conn.role.can_drive() || !to_conn.role.can_latch() {
            return Err(LinkError::RoleMismatch { from, to });
        }
        if from_conn.width != to_conn.width {
            return Err(LinkError::WidthMismatch {
                from_width: from_conn.width,
                to_width: to_conn.width,
            });
        }
        if self
            .links
            .iter()
            .any(|l| (l.from == from && l.to == to) || (l.from == to && l.to == from))
        {
            return Err(LinkError::DuplicateLink { a: from, b: to });
        }
        if !from_conn.multi && self.degree(from) >= 1 {
            return Err(LinkError::Occupied { at: from });
        }
        if !to_conn.multi && self.degree(to) >= 1 {
            return Err(LinkError::Occupied { at: to });
        }

        self.links.push(Link { from, to });
        Ok(())
    }

    /// Convenience wiring by pin name.
    pub fn link_named(
        &mut self,
        from: NodeIndex,
        from_pin: &str,
        to: NodeIndex,
        to_pin: &str,
    ) -> Result<(), LinkError> {
        let from_conn = self
            .nodes
            .get(from.index())
            .ok_or(LinkError::UnknownNode(from))?
            .connector_named(from_pin)
            .ok_or(LinkError::UnknownConnector {
                node: from,
                conn: ConnectorId(u16::MAX),
            })?;
        let to_conn = self
            .nodes
            .get(to.index())
            .ok_or(LinkError::UnknownNode(to))?
            .connector_named(to_pin)
            .ok_or(LinkError::UnknownConnector {
                node: to,
                conn: ConnectorId(u16::MAX),
            })?;
        self.link(
            Endpoint {
                node: from,
                conn: from_conn,
            },
            Endpoint {
                node: to,
                conn: to_conn,
            },
        )
    }

    /// One tick pass: propagate, then evaluate.
    pub fn tick(&mut self, report: &mut TickReport) {
        // Phase 1: propagate. Stable order: node declaration order, connector
        // id order, link insertion order.
        for node_idx in 0..self.nodes.len() {
            let conn_count = self.nodes[node_idx].connectors().len();
            for conn_idx in 0..conn_count {
                let from_ep = Endpoint {
                    node: NodeIndex(u32::try_from(node_idx).unwrap_or(u32::MAX)),
                    conn: ConnectorId(u16::try_from(conn_idx).unwrap_or(u16::MAX)),
                };
                if !self.nodes[node_idx].connectors()[conn_idx].role.can_drive() {
                    continue;
                }
                // Collect first: the link table is not mutated during a tick,
                // but the borrow of `self.links` must end before node access.
                let outgoing: Vec<Link> = self
                    .links
                    .iter()
                    .filter(|l| l.from == from_ep)
                    .copied()
                    .collect();
                for link in outgoing {
                    self.process_link(link, report);
                }
            }
        }

        // Phase 2: evaluate, declaration order.
        for (idx, node) in self.nodes.iter_mut().enumerate() {
            if let Err(error) = node.tick() {
                report.faults.push(TickFault {
                    node: NodeIndex(u32::try_from(idx).unwrap_or(u32::MAX)),
                    node_name: node.name().to_owned(),
                    error,
                });
            }
        }
    }

    fn process_link(&mut self, link: Link, report: &mut TickReport) {
        let src = link.from.node.index();
        let dst = link.to.node.index();
        let result = if src == dst {
            // Self-link: read the owned value out, then latch it back in.
            match self.nodes[src].read(link.from.conn) {
                Ok(value) => self.nodes[src].put(link.to.conn, &value),
                Err(e) => Err(e),
            }
        } else {
            let (a, b) = if src < dst {
                let (head, tail) = self.nodes.split_at_mut(dst);
                (&head[src], &mut tail[0])
            } else {
                let (head, tail) = self.nodes.split_at_mut(src);
                (&tail[0], &mut head[dst])
            };
            a.process(ProcessKind::Write, link.from.conn, b, link.to.conn)
        };
        if let Err(error) = result {
            report.faults.push(TickFault {
                node: link.from.node,
                node_name: self.nodes[src].name().to_owned(),
                error,
            });
        }
    }
}
