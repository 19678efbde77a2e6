// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Three-way merge over edit-operation sequences.
//!
//! Given the op sequences two branches applied since their common base, the
//! merge classifies every cross-branch op pair: two ops conflict when they
//! touch the same entity with mutually exclusive effects - both remove it,
//! both set the same property to different values, or one removes a
//! component the other connects a pin on. Everything else interleaves
//! cleanly: target ops first (they are already in the target's history),
//! then source ops.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::model::{ComponentId, PinId};
use crate::ops::{EditOperation, EntityKind};

/// Why a pair of ops cannot be merged automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    /// Both branches removed the same entity.
    DoubleRemove,
    /// Both branches set the same property to different values.
    DivergentProperty,
    /// One branch removed a component the other connected.
    RemoveVsConnect,
    /// Both branches renamed the same entity to different names.
    DivergentRename,
}

/// One conflicting cross-branch op pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpConflict {
    /// The op applied on the source branch.
    pub source_op: EditOperation,
    /// The op applied on the target branch.
    pub target_op: EditOperation,
    /// Classification.
    pub reason: ConflictReason,
}

/// Outcome of a three-way merge attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeResult {
    /// Target applied nothing since the base; advancing its head over the
    /// source ops suffices.
    FastForward {
        /// Ops the target's head moves over.
        ops: Vec<EditOperation>,
    },
    /// No conflicting pairs; the source ops append cleanly after the
    /// target's.
    Clean {
        /// Source-side ops to append onto the target.
        ops: Vec<EditOperation>,
    },
    /// At least one mutually exclusive pair.
    Conflicts(Vec<OpConflict>),
}

/// Entities an op touches, for conflict detection.
fn touched_components(op: &EditOperation) -> BTreeSet<ComponentId> {
    let mut set = BTreeSet::new();
    match op {
        EditOperation::AddComponent { id, .. } | EditOperation::RemoveComponent { id, .. } => {
            set.insert(id.clone());
        }
        EditOperation::SetProperty { component, .. }
        | EditOperation::MoveComponent { component, .. } => {
            set.insert(component.clone());
        }
        EditOperation::Connect { a, b } | EditOperation::Disconnect { a, b } => {
            set.insert(pin_component(a));
            set.insert(pin_component(b));
        }
        EditOperation::CreateNet { pins, .. } => {
            for p in pins {
                set.insert(pin_component(p));
            }
        }
        EditOperation::RenameEntity {
            kind: EntityKind::Component,
            from,
            ..
        } => {
            set.insert(ComponentId(from.clone()));
        }
        EditOperation::MergeNets { .. }
        | EditOperation::RenameEntity { .. }
        | EditOperation::AddBlock { .. }
        | EditOperation::RemoveBlock { .. } => {}
    }
    set
}

/// Pin ids are `"<component>.<pin>"` by construction.
fn pin_component(pin: &PinId) -> ComponentId {
    let comp = pin.as_str().split('.').next().unwrap_or(pin.as_str());
    ComponentId(comp.to_owned())
}

fn classify(source: &EditOperation, target: &EditOperation) -> Option<ConflictReason> {
    match (source, target) {
        (
            EditOperation::RemoveComponent { id: a, .. },
            EditOperation::RemoveComponent { id: b, .. },
        ) if a == b => Some(ConflictReason::DoubleRemove),

        (EditOperation::RemoveBlock { id: a }, EditOperation::RemoveBlock { id: b }) if a == b => {
            Some(ConflictReason::DoubleRemove)
        }

        (
            EditOperation::SetProperty {
                component: ca,
                name: na,
                value: va,
            },
            EditOperation::SetProperty {
                component: cb,
                name: nb,
                value: vb,
            },
        ) if ca == cb && na == nb && va != vb => Some(ConflictReason::DivergentProperty),

        (
            EditOperation::RenameEntity {
                kind: ka,
                from: fa,
                to: ta,
            },
            EditOperation::RenameEntity {
                kind: kb,
                from: fb,
                to: tb,
            },
        ) if ka == kb && fa == fb && ta != tb => Some(ConflictReason::DivergentRename),

        (EditOperation::RemoveComponent { id, .. }, other)
            if touches_pins_of(other, id) => Some(ConflictReason::RemoveVsConnect),

        (other, EditOperation::RemoveComponent { id, .. })
            if touches_pins_of(other, id) => Some(ConflictReason::RemoveVsConnect),

        _ => None,
    }
}

fn touches_pins_of(op: &EditOperation, component: &ComponentId) -> bool {
    matches!(
        op,
        EditOperation::Connect { .. } | EditOperation::Disconnect { .. } | EditOperation::CreateNet { .. }
    ) && touched_components(op).contains(component)
}

/// Merges the ops two branches applied since their common base.
///
/// `source_ops` and `target_ops` are each branch's edits in application
/// order. The result is fast-forward when the target is unchanged, clean
/// when no cross-branch pair conflicts, and the full conflict list
/// otherwise.
#[must_use]
pub fn three_way_merge(
    source_ops: &[EditOperation],
    target_ops: &[EditOperation],
) -> MergeResult {
    if target_ops.is_empty() {
        return MergeResult::FastForward {
            ops: source_ops.to_vec(),
        };
    }

    let mut conflicts = Vec::new();
    for s in source_ops {
        for t in target_ops {
            if let Some(reason) = classify(s, t) {
                conflicts.push(OpConflict {
                    source_op: s.clone(),
                    target_op: t.clone(),
                    reason,
                });
            }
        }
    }
    if conflicts.is_empty() {
        MergeResult::Clean {
            ops: source_ops.to_vec(),
        }
    } else {
        MergeResult::Conflicts(conflicts)
    }
}
