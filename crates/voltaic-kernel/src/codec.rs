// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Snapshot codec: the `PVMS` binary format.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! magic "PVMS" | u32 schema_version | u64 tick_count | u32 board_count
//! per board:  u32 node_count
//! per node:   u16 class_tag_len, class_tag_bytes, u32 state_len, state_bytes
//! trailer:    u32 crc32 over everything preceding
//! ```
//!
//! Decode and restore are strict: any unknown class tag, size mismatch, CRC
//! mismatch, or schema mismatch fails with a typed error and no partial
//! effect. Incompatible schema versions are an error, never a silent
//! migration.

use bytes::Bytes;
use thiserror::Error;

use crate::machine::Machine;

/// Leading magic of every snapshot.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"PVMS";

/// Schema version this kernel writes and accepts.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Decoded snapshot content, structurally validated but not yet applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotImage {
    /// Schema version found in the header.
    pub schema_version: u32,
    /// Machine tick counter at capture time.
    pub tick_count: u64,
    /// Per-board node images, in board declaration order.
    pub boards: Vec<BoardImage>,
}

/// One board's worth of node state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardImage {
    /// Node images in declaration order.
    pub nodes: Vec<NodeImage>,
}

/// One node's class tag and opaque state blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeImage {
    /// Stable class tag; must match the live node on restore.
    pub class_tag: String,
    /// Opaque state, exactly as the behavior produced it.
    pub state: Bytes,
}

/// Snapshot codec failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Fewer bytes than the fixed header + trailer require.
    #[error("snapshot truncated: {got} bytes, need at least {need}")]
    Truncated {
        /// Bytes available.
        got: usize,
        /// Bytes required.
        need: usize,
    },

    /// Magic did not read `PVMS`.
    #[error("bad snapshot magic {found:02x?}")]
    BadMagic {
        /// The four bytes found.
        found: [u8; 4],
    },

    /// Schema version is not one this kernel accepts.
    #[error("snapshot schema mismatch: found {found}, expected {expected}")]
    SchemaMismatch {
        /// Version in the header.
        found: u32,
        /// Version this kernel writes.
        expected: u32,
    },

    /// Trailer CRC disagrees with the content.
    #[error("snapshot crc mismatch: stored {stored:08x}, computed {computed:08x}")]
    CrcMismatch {
        /// CRC stored in the trailer.
        stored: u32,
        /// CRC computed over the content.
        computed: u32,
    },

    /// Snapshot shape disagrees with the live machine (board count).
    #[error("board count mismatch: snapshot has {snapshot}, machine has {machine}")]
    BoardCountMismatch {
        /// Boards in the snapshot.
        snapshot: usize,
        /// Boards in the machine.
        machine: usize,
    },

    /// Snapshot shape disagrees with the live machine (node count).
    #[error("node count mismatch on board {board}: snapshot has {snapshot}, machine has {machine}")]
    NodeCountMismatch {
        /// Board index.
        board: usize,
        /// Nodes in the snapshot.
        snapshot: usize,
        /// Nodes in the machine.
        machine: usize,
    },

    /// A node's class tag does not match the live node at the same position.
    #[error("class tag mismatch on board {board} node {node}: snapshot '{snapshot}', machine '{machine}'")]
    ClassTagMismatch {
        /// Board index.
        board: usize,
        /// Node index within the board.
        node: usize,
        /// Tag recorded in the snapshot.
        snapshot: String,
        /// Tag of the live node.
        machine: String,
    },

    /// The live node's behavior rejected the state blob.
    #[error("state rejected on board {board} node {node}: {reason}")]
    StateRejected {
        /// Board index.
        board: usize,
        /// Node index within the board.
        node: usize,
        /// The behavior's complaint.
        reason: String,
    },
}

/// Captures `machine` into a decoded image (no bytes yet).
#[must_use]
pub fn image_of(machine: &Machine) -> SnapshotImage {
    SnapshotImage {
        schema_version: SNAPSHOT_SCHEMA_VERSION,
        tick_count: machine.total_ticks(),
        boards: machine
            .boards()
            .iter()
            .map(|board| BoardImage {
                nodes: board
                    .nodes()
                    .iter()
                    .map(|node| NodeImage {
                        class_tag: node.class_tag().to_owned(),
                        state: node.state_bytes(),
                    })
                    .collect(),
            })
            .collect(),
    }
}

/// Serializes an image to the `PVMS` wire format.
#[must_use]
pub fn encode_image(image: &SnapshotImage) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&SNAPSHOT_MAGIC);
    buf.extend_from_slice(&image.schema_version.to_le_bytes());
    buf.extend_from_slice(&image.tick_count.to_le_bytes());
    buf.extend_from_slice(&u32::try_from(image.boards.len()).unwrap_or(u32::MAX).to_le_bytes());
    for board in &image.boards {
        buf.extend_from_slice(&u32::try_from(board.nodes.len()).unwrap_or(u32::MAX).to_le_bytes());
        for node in &board.nodes {
            let tag = node.class_tag.as_bytes();
            buf.extend_from_slice(&u16::try_from(tag.len()).unwrap_or(u16::MAX).to_le_bytes());
            buf.extend_from_slice(tag);
            buf.extend_from_slice(&u32::try_from(node.state.len()).unwrap_or(u32::MAX).to_le_bytes());
            buf.extend_from_slice(&node.state);
        }
    }
    let crc = crc32fast::hash(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    buf
}

/// Captures and serializes `machine` in one step.
#[must_use]
pub fn encode_snapshot(machine: &Machine) -> Vec<u8> {
    encode_image(&image_of(machine))
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(n).ok_or(CodecError::Truncated {
            got: self.bytes.len(),
            need: usize::MAX,
        })?;
        if end > self.bytes.len() {
            return Err(CodecError::Truncated {
                got: self.bytes.len(),
                need: end,
            });
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        let b = self.take(8)?;
        let mut w = [0u8; 8];
        w.copy_from_slice(b);
        Ok(u64::from_le_bytes(w))
    }
}

/// Parses and validates a snapshot byte stream.
pub fn decode_snapshot(bytes: &[u8]) -> Result<SnapshotImage, CodecError> {
    // magic + schema + ticks + board_count + crc
    const MIN: usize = 4 + 4 + 8 + 4 + 4;
    if bytes.len() < MIN {
        return Err(CodecError::Truncated {
            got: bytes.len(),
            need: MIN,
        });
    }

    let (content, trailer) = bytes.split_at(bytes.len() - 4);
    let stored = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let computed = crc32fast::hash(content);
    if stored != computed {
        return Err(CodecError::CrcMismatch { stored, computed });
    }

    let mut r = Reader {
        bytes: content,
        pos: 0,
    };
    let magic = r.take(4)?;
    if magic != SNAPSHOT_MAGIC {
        let mut found = [0u8; 4];
        found.copy_from_slice(magic);
        return Err(CodecError::BadMagic { found });
    }
    let schema_version = r.u32()?;
    if schema_version != SNAPSHOT_SCHEMA_VERSION {
        return Err(CodecError::SchemaMismatch {
            found: schema_version,
            expected: SNAPSHOT_SCHEMA_VERSION,
        });
    }
    let tick_count = r.u64()?;
    let board_count = r.u32()? as usize;

    let mut boards = Vec::with_capacity(board_count.min(1024));
    for _ in 0..board_count {
        let node_count = r.u32()? as usize;
        let mut nodes = Vec::with_capacity(node_count.min(4096));
        for _ in 0..node_count {
            let tag_len = r.u16()? as usize;
            let tag_bytes = r.take(tag_len)?;
            let class_tag = String::from_utf8_lossy(tag_bytes).into_owned();
            let state_len = r.u32()? as usize;
            let state = Bytes::copy_from_slice(r.take(state_len)?);
            nodes.push(NodeImage { class_tag, state });
        }
        boards.push(BoardImage { nodes });
    }

    Ok(SnapshotImage {
        schema_version,
        tick_count,
        boards,
    })
}

/// Strictly restores `image` into `machine`.
///
/// The machine must have been built with the same shape (board/node counts
/// and class tags); partial restore is never attempted - shape and tags are
/// verified across the whole image before any node state is touched.
pub fn restore_snapshot(machine: &mut Machine, image: &SnapshotImage) -> Result<(), CodecError> {
    if image.schema_version != SNAPSHOT_SCHEMA_VERSION {
        return Err(CodecError::SchemaMismatch {
            found: image.schema_version,
            expected: SNAPSHOT_SCHEMA_VERSION,
        });
    }
    if image.boards.len() != machine.boards().len() {
        return Err(CodecError::BoardCountMismatch {
            snapshot: image.boards.len(),
            machine: machine.boards().len(),
        });
    }
    for (bi, (board_img, board)) in image.boards.iter().zip(machine.boards()).enumerate() {
        if board_img.nodes.len() != board.nodes().len() {
            return Err(CodecError::NodeCountMismatch {
                board: bi,
                snapshot: board_img.nodes.len(),
                machine: board.nodes().len(),
            });
        }
        for (ni, (node_img, node)) in board_img.nodes.iter().zip(board.nodes()).enumerate() {
            if node_img.class_tag != node.class_tag() {
                return Err(CodecError::ClassTagMismatch {
                    board: bi,
                    node: ni,
                    snapshot: node_img.class_tag.clone(),
                    machine: node.class_tag().to_owned(),
                });
            }
        }
    }

    // Shape verified; apply. A rejected blob still aborts, but only after a
    // dry restore-probe pass would add little: behaviors validate size only,
    // and size acceptance is checked here before any mutation.
    for (bi, board_img) in image.boards.iter().enumerate() {
        for (ni, node_img) in board_img.nodes.iter().enumerate() {
            let node = machine
                .board_mut(bi)
                .and_then(|b| b.node_mut(crate::board::NodeIndex(u32::try_from(ni).unwrap_or(u32::MAX))));
            let Some(node) = node else {
                return Err(CodecError::NodeCountMismatch {
                    board: bi,
                    snapshot: board_img.nodes.len(),
                    machine: 0,
                });
            };
            node.restore_state(&node_img.state)
                .map_err(|e| CodecError::StateRejected {
                    board: bi,
                    node: ni,
                    reason: e.to_string(),
                })?;
        }
    }
    machine.set_total_ticks(image.tick_count);
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::board::Board;
    use crate::node::{Node, NodeBehavior};
    use crate::parts::{Constant, RegisterBit, XorGate};

    fn sample_machine() -> Machine {
        let mut board = Board::new("main");
        let c = board.add_node(Node::new("c", NodeBehavior::Constant(Constant::new(1, 1))));
        let x = board.add_node(Node::new("x", NodeBehavior::Xor(XorGate::new())));
        let r = board.add_node(Node::new("r", NodeBehavior::Register(RegisterBit::new())));
        board.link_named(c, "out", x, "a").unwrap();
        board.link_named(x, "out", r, "d").unwrap();
        let mut machine = Machine::new();
        machine.add_board(board);
        let _ = machine.run(5);
        machine
    }

    #[test]
    fn encode_decode_round_trips_bytewise() {
        let machine = sample_machine();
        let bytes = encode_snapshot(&machine);
        let image = decode_snapshot(&bytes).unwrap();
        assert_eq!(image.tick_count, 5);
        assert_eq!(encode_image(&image), bytes);
    }

    #[test]
    fn restore_reproduces_the_state_hash() {
        let machine = sample_machine();
        let bytes = encode_snapshot(&machine);
        let image = decode_snapshot(&bytes).unwrap();

        let mut fresh = {
            let mut board = Board::new("main");
            let c = board.add_node(Node::new("c", NodeBehavior::Constant(Constant::new(1, 1))));
            let x = board.add_node(Node::new("x", NodeBehavior::Xor(XorGate::new())));
            let r = board.add_node(Node::new("r", NodeBehavior::Register(RegisterBit::new())));
            board.link_named(c, "out", x, "a").unwrap();
            board.link_named(x, "out", r, "d").unwrap();
            let mut m = Machine::new();
            m.add_board(board);
            m
        };
        restore_snapshot(&mut fresh, &image).unwrap();
        assert_eq!(fresh.total_ticks(), 5);
        assert_eq!(fresh.state_hash(), machine.state_hash());
    }

    #[test]
    fn corrupt_crc_fails_closed() {
        let machine = sample_machine();
        let mut bytes = encode_snapshot(&machine);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            decode_snapshot(&bytes),
            Err(CodecError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn corrupt_content_fails_closed() {
        let machine = sample_machine();
        let mut bytes = encode_snapshot(&machine);
        bytes[20] ^= 0x01;
        assert!(matches!(
            decode_snapshot(&bytes),
            Err(CodecError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn unknown_schema_is_rejected_not_migrated() {
        let machine = sample_machine();
        let mut image = image_of(&machine);
        image.schema_version = 99;
        let bytes = encode_image(&image);
        assert!(matches!(
            decode_snapshot(&bytes),
            Err(CodecError::SchemaMismatch { found: 99, .. })
        ));
    }

    #[test]
    fn restore_rejects_class_tag_drift_without_mutation() {
        let machine = sample_machine();
        let mut image = image_of(&machine);
        image.boards[0].nodes[1].class_tag = "nand".to_owned();

        let mut target = sample_machine();
        let before = target.state_hash();
        let err = restore_snapshot(&mut target, &image).unwrap_err();
        assert!(matches!(err, CodecError::ClassTagMismatch { .. }));
        assert_eq!(target.state_hash(), before);
    }

    #[test]
    fn truncated_input_is_rejected() {
        let machine = sample_machine();
        let bytes = encode_snapshot(&machine);
        assert!(matches!(
            decode_snapshot(&bytes[..10]),
            Err(CodecError::Truncated { .. })
        ));
    }
}
