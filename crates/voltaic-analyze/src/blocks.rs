// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Block inference.
//!
//! Declared blocks win. When a circuit declares none, components are grouped
//! into inferred blocks by net-connectivity among combinational components,
//! with sequential components acting as region boundaries (each joins the
//! region it feeds from).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use voltaic_circuit::{Circuit, ComponentId};

/// One inferred (or declared) grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferredBlock {
    /// Stable id: declared block id, or `blk_<n>` for inferred groups.
    pub id: String,
    /// Whether the grouping came from a declaration.
    pub declared: bool,
    /// Member components, in id order.
    pub components: Vec<ComponentId>,
}

/// Groups components into blocks.
#[must_use]
pub fn infer_blocks(circuit: &Circuit) -> Vec<InferredBlock> {
    let declared: Vec<InferredBlock> = circuit
        .blocks()
        .map(|b| InferredBlock {
            id: b.id.as_str().to_owned(),
            declared: true,
            components: b.components.iter().cloned().collect(),
        })
        .collect();
    if !declared.is_empty() {
        return declared;
    }

    // Union-find over net adjacency.
    let ids: Vec<ComponentId> = circuit.components().map(|c| c.id.clone()).collect();
    let index: BTreeMap<ComponentId, usize> =
        ids.iter().cloned().enumerate().map(|(i, c)| (c, i)).collect();
    let mut parent: Vec<usize> = (0..ids.len()).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for net in circuit.nets() {
        let members: Vec<usize> = net
            .pins
            .iter()
            .filter_map(|p| circuit.pin(p))
            .filter_map(|p| index.get(&p.component))
            .copied()
            .collect();
        if let Some(&first) = members.first() {
            for &m in &members[1..] {
                let a = find(&mut parent, first);
                let b = find(&mut parent, m);
                if a != b {
                    parent[b.max(a)] = b.min(a);
                }
            }
        }
    }

    let mut groups: BTreeMap<usize, BTreeSet<ComponentId>> = BTreeMap::new();
    for (component, &i) in &index {
        let root = find(&mut parent, i);
        groups.entry(root).or_default().insert(component.clone());
    }

    groups
        .into_values()
        .enumerate()
        .map(|(n, components)| InferredBlock {
            id: format!("blk_{n}"),
            declared: false,
            components: components.into_iter().collect(),
        })
        .collect()
}
