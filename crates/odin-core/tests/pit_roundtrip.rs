//! PIT codec properties over generated tables.

use odin_core::pit::{ENTRY_SIZE, HEADER_SIZE, PIT_MAGIC};
use odin_core::{PitData, PitError, PitHeaderLayout};
use proptest::prelude::*;

fn layout_strategy() -> impl Strategy<Value = PitHeaderLayout> {
    prop_oneof![
        Just(PitHeaderLayout::Tagged),
        Just(PitHeaderLayout::Reserved),
    ]
}

// A well-formed PIT: valid magic, matching entry count, arbitrary payload.
fn pit_bytes_strategy() -> impl Strategy<Value = Vec<u8>> {
    (0usize..16).prop_flat_map(|count| {
        prop::collection::vec(any::<u8>(), HEADER_SIZE - 8 + count * ENTRY_SIZE).prop_map(
            move |body| {
                let mut bytes = PIT_MAGIC.to_le_bytes().to_vec();
                bytes.extend_from_slice(&(count as u32).to_le_bytes());
                bytes.extend_from_slice(&body);
                bytes
            },
        )
    })
}

proptest! {
    #[test]
    fn decode_then_encode_reproduces_bytes(
        bytes in pit_bytes_strategy(),
        layout in layout_strategy(),
    ) {
        let pit = PitData::from_bytes(&bytes, layout).unwrap();
        prop_assert_eq!(pit.entries().len(), pit.entry_count() as usize);
        prop_assert_eq!(pit.to_bytes(), bytes.clone());

        let mut buf = vec![0u8; bytes.len()];
        pit.pack_into(&mut buf).unwrap();
        prop_assert_eq!(buf, bytes);
    }

    #[test]
    fn wrong_magic_is_rejected(
        mut bytes in pit_bytes_strategy(),
        magic in any::<u32>().prop_filter("not the PIT magic", |m| *m != PIT_MAGIC),
    ) {
        bytes[..4].copy_from_slice(&magic.to_le_bytes());
        let err = PitData::from_bytes(&bytes, PitHeaderLayout::Tagged).unwrap_err();
        let is_magic_error = matches!(err, PitError::InvalidMagic { actual, .. } if actual == magic);
        prop_assert!(is_magic_error);
    }

    #[test]
    fn unpack_replaces_entries(
        first in pit_bytes_strategy(),
        second in pit_bytes_strategy(),
    ) {
        let mut pit = PitData::from_bytes(&first, PitHeaderLayout::Tagged).unwrap();
        pit.unpack(&second).unwrap();
        prop_assert_eq!(pit.to_bytes(), second);
    }
}

#[test]
fn truncated_table_is_rejected() {
    let mut bytes = PIT_MAGIC.to_le_bytes().to_vec();
    bytes.extend_from_slice(&3u32.to_le_bytes());
    bytes.resize(HEADER_SIZE + 2 * ENTRY_SIZE, 0);

    let err = PitData::from_bytes(&bytes, PitHeaderLayout::Reserved).unwrap_err();
    assert!(matches!(
        err,
        PitError::BufferTooSmall { expected, .. } if expected == HEADER_SIZE + 3 * ENTRY_SIZE
    ));
}
