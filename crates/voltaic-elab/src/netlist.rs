// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Netlist export: a stable text rendering of one board's topology.

use std::fmt::Write as _;

use voltaic_kernel::Machine;

/// Renders board `pcb_id` of `machine` as a text netlist.
///
/// Returns `None` when the board does not exist. The format is line-based
/// and stable - consumers diff it across revisions:
///
/// ```text
/// # netlist <board> nodes=<n> links=<m>
/// node <idx> <class> <name>
/// link <from_idx>:<from_pin> -> <to_idx>:<to_pin>
/// ```
#[must_use]
pub fn export_netlist(machine: &Machine, pcb_id: usize) -> Option<String> {
    let board = machine.boards().get(pcb_id)?;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "# netlist {} nodes={} links={}",
        board.name(),
        board.nodes().len(),
        board.links().len()
    );
    for (idx, node) in board.nodes().iter().enumerate() {
        let _ = writeln!(out, "node {} {} {}", idx, node.class_tag(), node.name());
    }
    for link in board.links() {
        let pin_name = |node_idx: voltaic_kernel::NodeIndex, conn: voltaic_kernel::ConnectorId| {
            board
                .node(node_idx)
                .and_then(|n| n.connectors().get(conn.index()))
                .map_or("?", |c| c.name.as_str())
                .to_owned()
        };
        let _ = writeln!(
            out,
            "link {}:{} -> {}:{}",
            link.from.node.0,
            pin_name(link.from.node, link.from.conn),
            link.to.node.0,
            pin_name(link.to.node, link.to.conn),
        );
    }
    Some(out)
}
