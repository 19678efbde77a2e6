// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Property tests for edit-operation atomicity: a failed edit leaves the
//! circuit bit-identical to its pre-state, and every successful edit
//! advances the revision by exactly one.

#![allow(clippy::unwrap_used)]

use proptest::prelude::*;
use voltaic_circuit::{Circuit, ComponentClass, EditOperation};

/// A pool of ops over a small id space; many are deliberately invalid
/// against most circuit states.
fn arb_op() -> impl Strategy<Value = EditOperation> {
    let comp = prop::sample::select(vec!["a", "b", "c", "d"]);
    let class = prop::sample::select(vec![
        ComponentClass::Constant,
        ComponentClass::Not,
        ComponentClass::Buffer,
        ComponentClass::And,
        ComponentClass::Register,
    ]);
    let pin = prop::sample::select(vec![
        "a.out", "a.in", "b.out", "b.in", "c.out", "c.in", "d.q", "d.d",
    ]);

    prop_oneof![
        (comp.clone(), class).prop_map(|(id, class)| EditOperation::AddComponent {
            id: id.into(),
            class,
            properties: std::collections::BTreeMap::new(),
            custom_pins: Vec::new(),
        }),
        (comp.clone(), any::<bool>()).prop_map(|(id, cascade)| {
            EditOperation::RemoveComponent {
                id: id.into(),
                cascade,
                detached: Vec::new(),
            }
        }),
        (pin.clone(), pin.clone()).prop_map(|(a, b)| EditOperation::Connect {
            a: a.into(),
            b: b.into(),
        }),
        (pin.clone(), pin).prop_map(|(a, b)| EditOperation::Disconnect {
            a: a.into(),
            b: b.into(),
        }),
        (comp, any::<i64>()).prop_map(|(id, x)| EditOperation::MoveComponent {
            component: id.into(),
            x,
            y: x.wrapping_add(1),
        }),
    ]
}

proptest! {
    #[test]
    fn failed_edits_never_mutate_and_successes_advance_by_one(
        ops in proptest::collection::vec(arb_op(), 1..40)
    ) {
        let mut circuit = Circuit::new();
        for op in ops {
            let before = circuit.clone();
            let revision_before = circuit.revision();
            match circuit.apply(op) {
                Ok(revision) => {
                    prop_assert_eq!(revision, revision_before + 1);
                    prop_assert_eq!(circuit.revision(), revision);
                    prop_assert_eq!(circuit.log().len() as u64, revision);
                }
                Err(_) => {
                    prop_assert_eq!(&circuit, &before);
                }
            }
        }
    }

    #[test]
    fn successful_histories_replay_identically(
        ops in proptest::collection::vec(arb_op(), 1..40)
    ) {
        let mut circuit = Circuit::new();
        for op in ops {
            let _ = circuit.apply(op);
        }
        let history: Vec<EditOperation> = circuit.log().iter().map(|e| e.op.clone()).collect();
        let replayed = Circuit::replay(history).unwrap();
        prop_assert_eq!(replayed, circuit);
    }
}
