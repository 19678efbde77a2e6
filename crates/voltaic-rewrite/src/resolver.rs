// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Merge conflict resolver.
//!
//! Consumed by branch merge when the caller allows automatic resolution.
//! Policy: divergent property writes take the source branch's value, double
//! removes collapse to one, and structural conflicts (remove vs connect,
//! divergent renames) stay unresolvable - those always surface as merge
//! conflicts to the caller.

use voltaic_circuit::{ConflictReason, EditOperation, OpConflict};

/// Attempts to turn `conflicts` into a compound edit list.
///
/// Returns `Some(ops)` - the source-side ops to append, one per resolved
/// conflict - when every conflict is resolvable, `None` otherwise.
#[must_use]
pub fn resolve_conflicts(conflicts: &[OpConflict]) -> Option<Vec<EditOperation>> {
    let mut ops = Vec::new();
    for conflict in conflicts {
        match conflict.reason {
            ConflictReason::DivergentProperty => {
                // Source branch wins the property write.
                ops.push(conflict.source_op.clone());
            }
            ConflictReason::DoubleRemove => {
                // The entity is already gone on the target; nothing to add.
            }
            ConflictReason::RemoveVsConnect | ConflictReason::DivergentRename => return None,
        }
    }
    Some(ops)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use voltaic_circuit::PropertyValue;

    fn set_prop(v: i64) -> EditOperation {
        EditOperation::SetProperty {
            component: "k".into(),
            name: "width".into(),
            value: PropertyValue::Int(v),
        }
    }

    #[test]
    fn divergent_property_resolves_to_source_value() {
        let conflicts = vec![OpConflict {
            source_op: set_prop(8),
            target_op: set_prop(4),
            reason: ConflictReason::DivergentProperty,
        }];
        let ops = resolve_conflicts(&conflicts).unwrap();
        assert_eq!(ops, vec![set_prop(8)]);
    }

    #[test]
    fn double_remove_resolves_to_nothing() {
        let remove = EditOperation::RemoveComponent {
            id: "k".into(),
            cascade: true,
            detached: Vec::new(),
        };
        let conflicts = vec![OpConflict {
            source_op: remove.clone(),
            target_op: remove,
            reason: ConflictReason::DoubleRemove,
        }];
        assert_eq!(resolve_conflicts(&conflicts), Some(Vec::new()));
    }

    #[test]
    fn structural_conflicts_stay_unresolvable() {
        let conflicts = vec![OpConflict {
            source_op: EditOperation::RemoveComponent {
                id: "k".into(),
                cascade: true,
                detached: Vec::new(),
            },
            target_op: EditOperation::Connect {
                a: "k.out".into(),
                b: "b.in".into(),
            },
            reason: ConflictReason::RemoveVsConnect,
        }];
        assert!(resolve_conflicts(&conflicts).is_none());
    }
}
