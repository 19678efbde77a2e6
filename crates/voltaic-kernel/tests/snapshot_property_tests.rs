// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Property tests for the snapshot codec.

#![allow(clippy::unwrap_used)]

use bytes::Bytes;
use proptest::prelude::*;
use voltaic_kernel::{decode_snapshot, encode_image, BoardImage, NodeImage, SnapshotImage};

fn arb_node() -> impl Strategy<Value = NodeImage> {
    ("[a-z_]{1,16}", proptest::collection::vec(any::<u8>(), 0..64)).prop_map(|(tag, state)| {
        NodeImage {
            class_tag: tag,
            state: Bytes::from(state),
        }
    })
}

fn arb_image() -> impl Strategy<Value = SnapshotImage> {
    (
        any::<u64>(),
        proptest::collection::vec(proptest::collection::vec(arb_node(), 0..8), 0..4),
    )
        .prop_map(|(tick_count, boards)| SnapshotImage {
            schema_version: voltaic_kernel::SNAPSHOT_SCHEMA_VERSION,
            tick_count,
            boards: boards
                .into_iter()
                .map(|nodes| BoardImage { nodes })
                .collect(),
        })
}

proptest! {
    /// save(load(snapshot)) == snapshot, bytewise, for codec-produced bytes.
    #[test]
    fn encode_decode_encode_is_identity(image in arb_image()) {
        let bytes = encode_image(&image);
        let decoded = decode_snapshot(&bytes).unwrap();
        prop_assert_eq!(&decoded, &image);
        prop_assert_eq!(encode_image(&decoded), bytes);
    }

    /// Flipping any single byte of the content is detected by the trailer.
    #[test]
    fn single_byte_corruption_is_detected(image in arb_image(), flip in any::<prop::sample::Index>()) {
        let mut bytes = encode_image(&image);
        let idx = flip.index(bytes.len());
        bytes[idx] ^= 0x01;
        // Either the CRC catches it, or (if the flipped byte is inside the
        // trailer itself) the stored CRC no longer matches.
        prop_assert!(decode_snapshot(&bytes).is_err());
    }
}
