// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Settled-behavior observation and comparison.
//!
//! Rewrites that add or remove nodes shift tick latency (every node is a
//! one-tick stage in this kernel), so cycle-exact comparison would reject
//! perfectly sound rewrites. Equivalence is therefore judged on *settled*
//! observations: run each machine until its observable state stops changing,
//! then compare observables shared by both circuits - probe captures and
//! register outputs, keyed by component id.

use std::collections::BTreeMap;

use voltaic_circuit::{Circuit, ComponentClass, ComponentId};
use voltaic_kernel::{KernelConfig, Signal};

use crate::elaborate::{elaborate, ElabError};

/// Settled observable values keyed by component id.
pub type Observation = BTreeMap<ComponentId, Signal>;

/// Ticks past the structural settle bound, for latches with enables.
const SETTLE_SLACK: u64 = 4;

/// Runs `circuit` until settled and samples its observables.
///
/// Observables are probe captures and register (`q`) outputs. The settle
/// bound is `2 * node_count + SETTLE_SLACK` ticks - enough for any signal to
/// traverse every node twice in this one-tick-per-node kernel.
pub fn settled_observation(
    circuit: &Circuit,
    config: &KernelConfig,
) -> Result<Observation, ElabError> {
    let elab = elaborate(circuit, config)?;
    let mut machine = elab.machine;
    let node_count = u64::try_from(machine.boards()[0].nodes().len()).unwrap_or(u64::MAX);
    let settle = 2 * node_count + SETTLE_SLACK;
    let _ = machine.run(settle);

    let mut observation = Observation::new();
    for component in circuit.components() {
        let Some(&node_idx) = elab.nodes.get(&component.id) else {
            continue;
        };
        let board = &machine.boards()[0];
        let Some(node) = board.node(node_idx) else {
            continue;
        };
        match component.class {
            ComponentClass::Register | ComponentClass::Synchronizer => {
                if let Some(q) = node.connector_named("q") {
                    if let Ok(value) = node.read(q) {
                        observation.insert(component.id.clone(), value);
                    }
                }
            }
            ComponentClass::Probe => {
                if let Some(value) = decode_probe(&node.state_bytes()) {
                    observation.insert(component.id.clone(), value);
                }
            }
            _ => {}
        }
    }
    Ok(observation)
}

fn decode_probe(blob: &[u8]) -> Option<Signal> {
    let mut payload = [0u8; 8];
    payload.copy_from_slice(blob.get(1..9)?);
    let raw = u64::from_le_bytes(payload);
    match blob.first()? {
        1 => Some(Signal::Bits {
            value: raw,
            width: *blob.get(9)?,
        }),
        2 => Some(Signal::Analog(f64::from_bits(raw))),
        _ => None,
    }
}

/// Compares settled observables shared by `before` and `after`.
///
/// Returns the verdict plus a human-readable diagnostic. Observables present
/// in only one circuit are ignored (a rewrite may legitimately delete an
/// internal probe); an empty shared set is reported as vacuously equivalent.
pub fn behavior_equivalent(
    before: &Circuit,
    after: &Circuit,
    config: &KernelConfig,
) -> Result<(bool, String), ElabError> {
    let obs_before = settled_observation(before, config)?;
    let obs_after = settled_observation(after, config)?;

    let mut shared = 0usize;
    for (id, value_before) in &obs_before {
        let Some(value_after) = obs_after.get(id) else {
            continue;
        };
        shared += 1;
        if !signals_agree(*value_before, *value_after) {
            return Ok((
                false,
                format!("observable '{id}' diverges: {value_before:?} vs {value_after:?}"),
            ));
        }
    }
    if shared == 0 {
        return Ok((true, "no shared observables; vacuously equivalent".to_owned()));
    }
    Ok((true, format!("{shared} shared observables agree")))
}

fn signals_agree(a: Signal, b: Signal) -> bool {
    match (a, b) {
        (Signal::Analog(x), Signal::Analog(y)) => (x - y).abs() < 1e-9,
        _ => a == b,
    }
}
