// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Machine: top-level simulation container.

use crate::board::{Board, TickReport};
use crate::hash::{machine_state_hash, Hash};

/// Ordered collection of boards plus the global tick counter.
///
/// The machine exclusively owns its boards. A tick is atomic: no API exposes
/// partial-tick state, and `total_ticks` increases by exactly one per
/// [`Machine::tick`].
#[derive(Debug, Default)]
pub struct Machine {
    boards: Vec<Board>,
    total_ticks: u64,
}

impl Machine {
    /// An empty machine at tick zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a board; boards tick in the order they were added.
    pub fn add_board(&mut self, board: Board) -> usize {
        self.boards.push(board);
        self.boards.len() - 1
    }

    /// Boards in declaration order.
    #[must_use]
    pub fn boards(&self) -> &[Board] {
        &self.boards
    }

    /// Mutable board access (test stimulus, restore).
    pub fn board_mut(&mut self, idx: usize) -> Option<&mut Board> {
        self.boards.get_mut(idx)
    }

    /// Monotonic tick counter.
    #[must_use]
    pub fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    /// Overwrites the tick counter. Restricted to snapshot restore.
    pub(crate) fn set_total_ticks(&mut self, ticks: u64) {
        self.total_ticks = ticks;
    }

    /// Drives one global tick: every board's pass in declaration order.
    pub fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        for board in &mut self.boards {
            board.tick(&mut report);
        }
        self.total_ticks += 1;
        report
    }

    /// Runs `n` ticks, folding the per-tick reports together.
    pub fn run(&mut self, n: u64) -> TickReport {
        let mut report = TickReport::default();
        for _ in 0..n {
            report.merge(self.tick());
        }
        report
    }

    /// Canonical content hash over all node states, in stable traversal
    /// order. Deterministic: equal `put`/`tick` sequences yield equal hashes.
    #[must_use]
    pub fn state_hash(&self) -> Hash {
        machine_state_hash(self)
    }
}
