//! PIT (Partition Information Table) codec.
//!
//! A PIT is a 28-byte header followed by `entry_count` fixed 132-byte
//! entries. Decoding a table and packing it into a buffer of the same
//! length reproduces the original bytes exactly.

pub mod data;
pub mod entry;

use thiserror::Error;

pub use data::{
    HEADER_SIZE, MAX_PIT_SIZE, PADDED_SIZE_MULTIPLE, PIT_MAGIC, PitData, PitHeader, PitHeaderLayout,
};
pub use entry::{
    BinaryType, DeviceType, ENTRY_SIZE, EntryAttributes, NAME_FIELD_LEN, PitEntry,
    UpdateAttributes,
};

#[derive(Error, Debug)]
pub enum PitError {
    #[error("Invalid PIT magic: expected 0x{expected:08X}, got 0x{actual:08X}")]
    InvalidMagic { expected: u32, actual: u32 },

    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },

    #[error("PIT size {size} outside {min}..={max} bytes")]
    SizeOutOfRange { size: u32, min: usize, max: usize },

    #[error("Entry count {0} does not fit in memory")]
    EntryCountOverflow(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
