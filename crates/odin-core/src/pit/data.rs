//! PIT header and entry table.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use super::PitError;
use super::entry::{ENTRY_SIZE, PitEntry};
use crate::text::{decode_nul_padded, encode_nul_padded};

/// Magic identifier at offset 0 of every PIT.
pub const PIT_MAGIC: u32 = 0x1234_9876;
/// Bytes before the first entry.
pub const HEADER_SIZE: usize = 28;
/// PIT files are padded up to a multiple of this size.
pub const PADDED_SIZE_MULTIPLE: usize = 4096;
/// Largest PIT a device may announce before a download.
pub const MAX_PIT_SIZE: usize = 1024 * 1024;

const MAGIC_OFFSET: usize = 0;
const ENTRY_COUNT_OFFSET: usize = 4;
const FILE_TYPE_OFFSET: usize = 8;
const BOARD_TYPE_OFFSET: usize = 16;
const LUN_COUNT_OFFSET: usize = 24;
const RESERVED_WORDS_OFFSET: usize = 8;
const RESERVED_HALVES_OFFSET: usize = 16;

/// Which of the two observed header shapes to read and write.
///
/// The shapes cannot be told apart from content, so this is always chosen
/// by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PitHeaderLayout {
    /// File-type tag, board-type tag and LUN count.
    #[default]
    Tagged,
    /// Eight reserved fields.
    Reserved,
}

/// Header metadata between the entry count and the first entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PitHeader {
    /// `file_type` @8 (8 bytes), `board_type` @16 (12 bytes), `lun_count`
    /// @24 (u16). The LUN count occupies the tail of the board-type field
    /// and is written after it.
    Tagged {
        file_type: [u8; 8],
        board_type: [u8; 12],
        lun_count: u16,
    },
    /// Two u32 @8 and @12, then six u16 @16..28.
    Reserved { words: [u32; 2], halves: [u16; 6] },
}

impl PitHeader {
    pub fn empty(layout: PitHeaderLayout) -> Self {
        match layout {
            PitHeaderLayout::Tagged => PitHeader::Tagged {
                file_type: [0; 8],
                board_type: [0; 12],
                lun_count: 0,
            },
            PitHeaderLayout::Reserved => PitHeader::Reserved {
                words: [0; 2],
                halves: [0; 6],
            },
        }
    }

    pub fn tagged(file_type: &str, board_type: &str, lun_count: u16) -> Self {
        PitHeader::Tagged {
            file_type: encode_nul_padded(file_type),
            board_type: encode_nul_padded(board_type),
            lun_count,
        }
    }

    pub fn layout(&self) -> PitHeaderLayout {
        match self {
            PitHeader::Tagged { .. } => PitHeaderLayout::Tagged,
            PitHeader::Reserved { .. } => PitHeaderLayout::Reserved,
        }
    }

    /// `data` must hold at least [`HEADER_SIZE`] bytes.
    fn read(data: &[u8], layout: PitHeaderLayout) -> Self {
        match layout {
            PitHeaderLayout::Tagged => {
                let mut file_type = [0u8; 8];
                let mut board_type = [0u8; 12];
                file_type.copy_from_slice(&data[FILE_TYPE_OFFSET..FILE_TYPE_OFFSET + 8]);
                board_type.copy_from_slice(&data[BOARD_TYPE_OFFSET..BOARD_TYPE_OFFSET + 12]);
                PitHeader::Tagged {
                    file_type,
                    board_type,
                    lun_count: LittleEndian::read_u16(&data[LUN_COUNT_OFFSET..]),
                }
            }
            PitHeaderLayout::Reserved => {
                let mut words = [0u32; 2];
                let mut halves = [0u16; 6];
                LittleEndian::read_u32_into(
                    &data[RESERVED_WORDS_OFFSET..RESERVED_HALVES_OFFSET],
                    &mut words,
                );
                LittleEndian::read_u16_into(
                    &data[RESERVED_HALVES_OFFSET..HEADER_SIZE],
                    &mut halves,
                );
                PitHeader::Reserved { words, halves }
            }
        }
    }

    fn write(&self, buf: &mut [u8]) {
        match self {
            PitHeader::Tagged {
                file_type,
                board_type,
                lun_count,
            } => {
                buf[FILE_TYPE_OFFSET..FILE_TYPE_OFFSET + 8].copy_from_slice(file_type);
                buf[BOARD_TYPE_OFFSET..BOARD_TYPE_OFFSET + 12].copy_from_slice(board_type);
                LittleEndian::write_u16(&mut buf[LUN_COUNT_OFFSET..], *lun_count);
            }
            PitHeader::Reserved { words, halves } => {
                LittleEndian::write_u32_into(
                    words,
                    &mut buf[RESERVED_WORDS_OFFSET..RESERVED_HALVES_OFFSET],
                );
                LittleEndian::write_u16_into(
                    halves,
                    &mut buf[RESERVED_HALVES_OFFSET..HEADER_SIZE],
                );
            }
        }
    }
}

/// A decoded partition information table.
///
/// The entry count on the wire is always `entries().len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PitData {
    header: PitHeader,
    entries: Vec<PitEntry>,
}

impl Default for PitData {
    fn default() -> Self {
        Self::new(PitHeaderLayout::default())
    }
}

impl PitData {
    /// An empty table using `layout` for its header.
    pub fn new(layout: PitHeaderLayout) -> Self {
        Self {
            header: PitHeader::empty(layout),
            entries: Vec::new(),
        }
    }

    pub fn with_header(header: PitHeader) -> Self {
        Self {
            header,
            entries: Vec::new(),
        }
    }

    /// Check a device-announced PIT size before a buffer is allocated for
    /// it. Anything shorter than a header or longer than [`MAX_PIT_SIZE`]
    /// is rejected.
    pub fn check_file_size(size: u32) -> Result<usize, PitError> {
        let len = size as usize;
        if !(HEADER_SIZE..=MAX_PIT_SIZE).contains(&len) {
            return Err(PitError::SizeOutOfRange {
                size,
                min: HEADER_SIZE,
                max: MAX_PIT_SIZE,
            });
        }
        Ok(len)
    }

    /// Decode a PIT. The magic is checked before anything else is read.
    pub fn from_bytes(data: &[u8], layout: PitHeaderLayout) -> Result<Self, PitError> {
        if data.len() < ENTRY_COUNT_OFFSET {
            return Err(PitError::BufferTooSmall {
                expected: ENTRY_COUNT_OFFSET,
                actual: data.len(),
            });
        }
        let magic = LittleEndian::read_u32(&data[MAGIC_OFFSET..]);
        if magic != PIT_MAGIC {
            return Err(PitError::InvalidMagic {
                expected: PIT_MAGIC,
                actual: magic,
            });
        }
        if data.len() < HEADER_SIZE {
            return Err(PitError::BufferTooSmall {
                expected: HEADER_SIZE,
                actual: data.len(),
            });
        }

        let entry_count = LittleEndian::read_u32(&data[ENTRY_COUNT_OFFSET..]) as usize;
        let required = entry_count
            .checked_mul(ENTRY_SIZE)
            .and_then(|n| n.checked_add(HEADER_SIZE))
            .ok_or(PitError::EntryCountOverflow(entry_count))?;
        if data.len() < required {
            return Err(PitError::BufferTooSmall {
                expected: required,
                actual: data.len(),
            });
        }

        let header = PitHeader::read(data, layout);
        let entries = data[HEADER_SIZE..required]
            .chunks_exact(ENTRY_SIZE)
            .map(PitEntry::from_bytes)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { header, entries })
    }

    /// Replace this table wholesale with the one decoded from `data`, using
    /// the current header layout. On error the table is left untouched.
    pub fn unpack(&mut self, data: &[u8]) -> Result<(), PitError> {
        *self = Self::from_bytes(data, self.layout())?;
        Ok(())
    }

    /// Encode into the start of `buf`; bytes past [`Self::data_size`] are
    /// left as they are.
    pub fn pack_into(&self, buf: &mut [u8]) -> Result<(), PitError> {
        let size = self.data_size();
        if buf.len() < size {
            return Err(PitError::BufferTooSmall {
                expected: size,
                actual: buf.len(),
            });
        }
        self.write_into(&mut buf[..size]);
        Ok(())
    }

    /// Encode into a buffer of exactly [`Self::data_size`] bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.data_size()];
        self.write_into(&mut buf);
        buf
    }

    /// Encode into a zero-filled buffer of [`Self::padded_size`] bytes.
    pub fn to_padded_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.padded_size()];
        self.write_into(&mut buf[..self.data_size()]);
        buf
    }

    // `buf` is exactly data_size() bytes long.
    fn write_into(&self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len(), self.data_size());
        LittleEndian::write_u32(&mut buf[MAGIC_OFFSET..], PIT_MAGIC);
        LittleEndian::write_u32(&mut buf[ENTRY_COUNT_OFFSET..], self.entry_count());
        self.header.write(buf);

        for (entry, chunk) in self
            .entries
            .iter()
            .zip(buf[HEADER_SIZE..].chunks_exact_mut(ENTRY_SIZE))
        {
            entry.write_to(chunk);
        }
    }

    pub fn layout(&self) -> PitHeaderLayout {
        self.header.layout()
    }

    pub fn header(&self) -> &PitHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut PitHeader {
        &mut self.header
    }

    pub fn entry_count(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn entries(&self) -> &[PitEntry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> Option<&PitEntry> {
        self.entries.get(index)
    }

    pub fn push_entry(&mut self, entry: PitEntry) {
        self.entries.push(entry);
    }

    /// First flashable entry whose partition name equals `name`.
    pub fn find_entry_by_name(&self, name: &str) -> Option<&PitEntry> {
        self.entries
            .iter()
            .find(|e| e.is_flashable() && e.partition_name() == name)
    }

    /// First flashable entry with the given identifier.
    pub fn find_entry_by_identifier(&self, identifier: u32) -> Option<&PitEntry> {
        self.entries
            .iter()
            .find(|e| e.is_flashable() && e.identifier == identifier)
    }

    /// Drop every entry and reset the header, keeping the layout.
    pub fn clear(&mut self) {
        self.header = PitHeader::empty(self.layout());
        self.entries.clear();
    }

    /// Header plus entries, without padding.
    pub fn data_size(&self) -> usize {
        HEADER_SIZE + self.entries.len() * ENTRY_SIZE
    }

    /// [`Self::data_size`] rounded up to [`PADDED_SIZE_MULTIPLE`].
    pub fn padded_size(&self) -> usize {
        self.data_size().div_ceil(PADDED_SIZE_MULTIPLE) * PADDED_SIZE_MULTIPLE
    }

    pub fn file_type(&self) -> Option<String> {
        match &self.header {
            PitHeader::Tagged { file_type, .. } => Some(decode_nul_padded(file_type)),
            PitHeader::Reserved { .. } => None,
        }
    }

    pub fn board_type(&self) -> Option<String> {
        match &self.header {
            PitHeader::Tagged { board_type, .. } => Some(decode_nul_padded(board_type)),
            PitHeader::Reserved { .. } => None,
        }
    }

    pub fn lun_count(&self) -> Option<u16> {
        match &self.header {
            PitHeader::Tagged { lun_count, .. } => Some(*lun_count),
            PitHeader::Reserved { .. } => None,
        }
    }
}

impl fmt::Display for PitData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.header {
            PitHeader::Tagged { lun_count, .. } => writeln!(
                f,
                "PIT ({} entries) file type '{}', board '{}', LUNs {}",
                self.entries.len(),
                self.file_type().unwrap_or_default(),
                self.board_type().unwrap_or_default(),
                lun_count
            )?,
            PitHeader::Reserved { words, halves } => writeln!(
                f,
                "PIT ({} entries) reserved {:08X?} {:04X?}",
                self.entries.len(),
                words,
                halves
            )?,
        }
        for entry in &self.entries {
            writeln!(f, "  {}", entry)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(layout: PitHeaderLayout) -> PitData {
        let header = match layout {
            PitHeaderLayout::Tagged => PitHeader::tagged("COM_TAR2", "SMDK4210", 1),
            PitHeaderLayout::Reserved => PitHeader::Reserved {
                words: [1, 0xF0],
                halves: [0x4E, 0x59, 0, 0, 0x1F, 0x0A],
            },
        };
        let mut pit = PitData::with_header(header);
        for (id, name, file) in [
            (0u32, "GANG", ""),
            (1, "PIT", ""),
            (6, "KERNEL", "zImage"),
            (7, "RECOVERY", "recovery.img"),
            (9, "", ""),
        ] {
            let mut entry = PitEntry::new();
            entry.identifier = id;
            entry.device_type = 2;
            entry.block_size_or_offset = id * 0x800;
            entry.block_count = 0x400;
            entry.set_partition_name(name);
            entry.set_flash_filename(file);
            pit.push_entry(entry);
        }
        pit
    }

    #[test]
    fn test_tagged_roundtrip() {
        let bytes = sample(PitHeaderLayout::Tagged).to_padded_bytes();
        assert_eq!(bytes.len(), 4096);

        let pit = PitData::from_bytes(&bytes, PitHeaderLayout::Tagged).unwrap();
        assert_eq!(pit.entry_count(), 5);
        assert_eq!(pit.file_type().as_deref(), Some("COM_TAR2"));
        assert_eq!(pit.lun_count(), Some(1));

        let mut repacked = vec![0u8; bytes.len()];
        pit.pack_into(&mut repacked).unwrap();
        assert_eq!(repacked, bytes);
    }

    #[test]
    fn test_reserved_roundtrip() {
        let original = sample(PitHeaderLayout::Reserved);
        let bytes = original.to_bytes();
        assert_eq!(&bytes[8..12], &1u32.to_le_bytes());
        assert_eq!(&bytes[26..28], &0x0Au16.to_le_bytes());

        let pit = PitData::from_bytes(&bytes, PitHeaderLayout::Reserved).unwrap();
        assert_eq!(pit, original);
        assert_eq!(pit.to_bytes(), bytes);
        assert_eq!(pit.board_type(), None);
    }

    #[test]
    fn test_lun_count_shares_board_tail() {
        let mut bytes = sample(PitHeaderLayout::Tagged).to_bytes();
        bytes[16..28].copy_from_slice(b"BOARDNAME\x03\x00X");
        let pit = PitData::from_bytes(&bytes, PitHeaderLayout::Tagged).unwrap();
        assert_eq!(pit.lun_count(), Some(3));
        assert_eq!(pit.to_bytes(), bytes);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = sample(PitHeaderLayout::Tagged).to_bytes();
        bytes[0] ^= 0xFF;
        assert!(matches!(
            PitData::from_bytes(&bytes, PitHeaderLayout::Tagged),
            Err(PitError::InvalidMagic {
                expected: PIT_MAGIC,
                ..
            })
        ));

        // Only the magic is looked at before failing.
        let garbage = [0u8; 4];
        assert!(matches!(
            PitData::from_bytes(&garbage, PitHeaderLayout::Tagged),
            Err(PitError::InvalidMagic { actual: 0, .. })
        ));
    }

    #[test]
    fn test_truncated_entries() {
        let bytes = sample(PitHeaderLayout::Tagged).to_bytes();
        let err = PitData::from_bytes(&bytes[..bytes.len() - 1], PitHeaderLayout::Tagged);
        assert!(matches!(err, Err(PitError::BufferTooSmall { .. })));
    }

    #[test]
    fn test_unpack_replaces_entries() {
        let mut pit = sample(PitHeaderLayout::Tagged);
        let mut smaller = PitData::with_header(PitHeader::tagged("X", "Y", 0));
        smaller.push_entry(PitEntry::new());
        pit.unpack(&smaller.to_bytes()).unwrap();
        assert_eq!(pit.entry_count(), 1);

        assert!(pit.unpack(&[0u8; 64]).is_err());
        assert_eq!(pit.entry_count(), 1);
    }

    #[test]
    fn test_lookup() {
        let pit = sample(PitHeaderLayout::Tagged);
        assert_eq!(pit.find_entry_by_name("KERNEL").map(|e| e.identifier), Some(6));
        assert!(pit.find_entry_by_name("MISSING").is_none());
        assert_eq!(
            pit.find_entry_by_identifier(7).map(|e| e.partition_name()),
            Some("RECOVERY".to_string())
        );
        // Entry 9 has no name and is not flashable.
        assert!(pit.find_entry_by_identifier(9).is_none());
        assert_eq!(pit.entry(4).map(|e| e.identifier), Some(9));
    }

    #[test]
    fn test_pack_into_leaves_tail_and_rejects_short_buffer() {
        let pit = sample(PitHeaderLayout::Tagged);
        let mut buf = vec![0xAA; pit.data_size() + 8];
        pit.pack_into(&mut buf).unwrap();
        assert_eq!(&buf[..pit.data_size()], pit.to_bytes().as_slice());
        assert_eq!(&buf[pit.data_size()..], &[0xAA; 8]);

        let mut short = vec![0u8; pit.data_size() - 1];
        assert!(matches!(
            pit.pack_into(&mut short),
            Err(PitError::BufferTooSmall { expected, .. }) if expected == pit.data_size()
        ));

        let padded = pit.to_padded_bytes();
        assert_eq!(&padded[..pit.data_size()], pit.to_bytes().as_slice());
        assert!(padded[pit.data_size()..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_check_file_size() {
        assert_eq!(PitData::check_file_size(28).unwrap(), HEADER_SIZE);
        assert_eq!(PitData::check_file_size(4096).unwrap(), 4096);
        assert!(PitData::check_file_size(MAX_PIT_SIZE as u32).is_ok());

        for size in [0, 27, MAX_PIT_SIZE as u32 + 1, u32::MAX] {
            assert!(matches!(
                PitData::check_file_size(size),
                Err(PitError::SizeOutOfRange { size: s, .. }) if s == size
            ));
        }
    }

    #[test]
    fn test_sizes_and_clear() {
        let mut pit = sample(PitHeaderLayout::Tagged);
        assert_eq!(pit.data_size(), 28 + 5 * 132);
        assert_eq!(pit.padded_size(), 4096);

        pit.clear();
        assert_eq!(pit.entry_count(), 0);
        assert_eq!(pit.layout(), PitHeaderLayout::Tagged);
        assert_eq!(pit.file_type().as_deref(), Some(""));
        assert_eq!(pit.padded_size(), 4096);
    }
}
