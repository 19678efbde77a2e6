// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Behavior-preservation verification.

use thiserror::Error;
use voltaic_circuit::{Circuit, EditError};
use voltaic_elab::ElabError;
use voltaic_kernel::KernelConfig;

use crate::transform::{TransformationEngine, TransformationPlan};

/// Why verification could not run (distinct from a `false` verdict).
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The plan's ops do not apply to this circuit.
    #[error("plan does not apply: {0}")]
    Apply(#[from] EditError),

    /// Either circuit failed to elaborate.
    #[error("elaboration failed: {0}")]
    Elab(#[from] ElabError),
}

/// Applies `plan` to a scratch copy of `circuit` and compares settled
/// observable behavior between the original and the rewrite.
///
/// Returns the verdict plus a diagnostic. Comparison is modulo latency: the
/// kernel charges one tick per node, so structural rewrites legitimately
/// shift timing; see [`voltaic_elab::behavior_equivalent`].
pub fn verify_behavior_preserved(
    circuit: &Circuit,
    plan: &TransformationPlan,
    config: &KernelConfig,
) -> Result<(bool, String), VerifyError> {
    let ops = TransformationEngine::materialize(plan);
    let mut rewritten = circuit.clone();
    rewritten.apply_all(ops)?;
    Ok(voltaic_elab::behavior_equivalent(circuit, &rewritten, config)?)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::transform::testutil::double_inversion_circuit;
    use crate::transform::TransformationKind;

    #[test]
    fn double_inversion_plan_verifies() {
        let circuit = double_inversion_circuit();
        let plans = TransformationEngine::propose_for_circuit(&circuit, 8);
        let plan = plans
            .iter()
            .find(|p| p.kind == TransformationKind::SimplifyDoubleInversion)
            .unwrap();
        let (verdict, diagnostic) =
            verify_behavior_preserved(&circuit, plan, &KernelConfig::default()).unwrap();
        assert!(verdict, "{diagnostic}");
    }
}
