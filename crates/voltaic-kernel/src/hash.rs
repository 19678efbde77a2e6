// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Canonical state hashing.
//!
//! Determinism contract
//! - The state hash is a BLAKE3 digest over a canonical byte stream covering
//!   every node's class tag and state blob, visited in stable traversal
//!   order: boards in declaration order, nodes in declaration order.
//! - Encoding is fixed-size and architecture-independent: counts and lengths
//!   are little-endian (`u32` counts, `u64` blob lengths), tags are
//!   length-prefixed UTF-8.
//! - The tick counter is *excluded*: the hash addresses state content, and
//!   equal states reached at different ticks must collide (the model checker
//!   depends on it for cycle detection).

use blake3::Hasher;

use crate::machine::Machine;

/// Canonical 256-bit hash used for state addressing, equivalence checks, and
/// snapshot integrity.
pub type Hash = [u8; 32];

/// Domain prefix for the machine state hash stream.
pub(crate) const STATE_HASH_V1: &[u8] = b"voltaic:state:v1";

/// Computes the canonical state hash for `machine`.
pub(crate) fn machine_state_hash(machine: &Machine) -> Hash {
    let mut hasher = Hasher::new();
    hasher.update(STATE_HASH_V1);
    hasher.update(&u32::try_from(machine.boards().len()).unwrap_or(u32::MAX).to_le_bytes());
    for board in machine.boards() {
        hasher.update(&u32::try_from(board.nodes().len()).unwrap_or(u32::MAX).to_le_bytes());
        for node in board.nodes() {
            let tag = node.class_tag().as_bytes();
            hasher.update(&u16::try_from(tag.len()).unwrap_or(u16::MAX).to_le_bytes());
            hasher.update(tag);
            let state = node.state_bytes();
            hasher.update(&(state.len() as u64).to_le_bytes());
            hasher.update(&state);
        }
    }
    hasher.finalize().into()
}
