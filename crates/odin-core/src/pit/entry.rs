//! A single PIT partition descriptor (132 bytes).

use std::fmt;
use std::io::Cursor;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};

use super::PitError;
use crate::text::{decode_nul_padded, encode_nul_padded};

/// On-disk size of one entry.
pub const ENTRY_SIZE: usize = 132;
/// Width of each of the three text fields.
pub const NAME_FIELD_LEN: usize = 32;

const NAMES_OFFSET: usize = 36;

/// Processor the partition belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryType {
    ApplicationProcessor,
    CommunicationProcessor,
}

impl BinaryType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::ApplicationProcessor),
            1 => Some(Self::CommunicationProcessor),
            _ => None,
        }
    }
}

/// Storage backing the partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    OneNand,
    /// FAT file.
    File,
    Mmc,
    All,
}

impl DeviceType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::OneNand),
            1 => Some(Self::File),
            2 => Some(Self::Mmc),
            3 => Some(Self::All),
            _ => None,
        }
    }
}

/// Partition attribute bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryAttributes(pub u32);

impl EntryAttributes {
    pub const WRITE: u32 = 1;
    pub const STL: u32 = 1 << 1;

    pub fn is_writable(self) -> bool {
        self.0 & Self::WRITE != 0
    }

    pub fn is_stl(self) -> bool {
        self.0 & Self::STL != 0
    }
}

/// Update attribute bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateAttributes(pub u32);

impl UpdateAttributes {
    pub const FOTA: u32 = 1;
    pub const SECURE: u32 = 1 << 1;

    pub fn is_fota(self) -> bool {
        self.0 & Self::FOTA != 0
    }

    pub fn is_secure(self) -> bool {
        self.0 & Self::SECURE != 0
    }
}

/// One partition descriptor.
///
/// Numeric fields are kept raw so that codes this crate does not know
/// survive a decode/encode cycle; typed views are available through the
/// accessor methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PitEntry {
    pub binary_type: u32,
    pub device_type: u32,
    pub identifier: u32,
    pub attributes: EntryAttributes,
    pub update_attributes: UpdateAttributes,
    pub block_size_or_offset: u32,
    pub block_count: u32,
    /// Obsolete.
    pub file_offset: u32,
    /// Obsolete.
    pub file_size: u32,
    partition_name: [u8; NAME_FIELD_LEN],
    flash_filename: [u8; NAME_FIELD_LEN],
    fota_filename: [u8; NAME_FIELD_LEN],
}

impl Default for PitEntry {
    fn default() -> Self {
        Self {
            binary_type: 0,
            device_type: 0,
            identifier: 0,
            attributes: EntryAttributes(EntryAttributes::WRITE),
            update_attributes: UpdateAttributes(UpdateAttributes::FOTA),
            block_size_or_offset: 0,
            block_count: 0,
            file_offset: 0,
            file_size: 0,
            partition_name: [0; NAME_FIELD_LEN],
            flash_filename: [0; NAME_FIELD_LEN],
            fota_filename: [0; NAME_FIELD_LEN],
        }
    }
}

impl PitEntry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read one entry; `data` must hold at least [`ENTRY_SIZE`] bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, PitError> {
        if data.len() < ENTRY_SIZE {
            return Err(PitError::BufferTooSmall {
                expected: ENTRY_SIZE,
                actual: data.len(),
            });
        }
        let mut cursor = Cursor::new(data);
        let mut entry = Self {
            binary_type: cursor.read_u32::<LittleEndian>()?,
            device_type: cursor.read_u32::<LittleEndian>()?,
            identifier: cursor.read_u32::<LittleEndian>()?,
            attributes: EntryAttributes(cursor.read_u32::<LittleEndian>()?),
            update_attributes: UpdateAttributes(cursor.read_u32::<LittleEndian>()?),
            block_size_or_offset: cursor.read_u32::<LittleEndian>()?,
            block_count: cursor.read_u32::<LittleEndian>()?,
            file_offset: cursor.read_u32::<LittleEndian>()?,
            file_size: cursor.read_u32::<LittleEndian>()?,
            ..Self::default()
        };
        let names = &data[NAMES_OFFSET..ENTRY_SIZE];
        entry.partition_name.copy_from_slice(&names[..NAME_FIELD_LEN]);
        entry
            .flash_filename
            .copy_from_slice(&names[NAME_FIELD_LEN..2 * NAME_FIELD_LEN]);
        entry
            .fota_filename
            .copy_from_slice(&names[2 * NAME_FIELD_LEN..]);
        Ok(entry)
    }

    /// Write the entry into the first [`ENTRY_SIZE`] bytes of `buf`.
    pub fn write_to(&self, buf: &mut [u8]) {
        let words = [
            self.binary_type,
            self.device_type,
            self.identifier,
            self.attributes.0,
            self.update_attributes.0,
            self.block_size_or_offset,
            self.block_count,
            self.file_offset,
            self.file_size,
        ];
        LittleEndian::write_u32_into(&words, &mut buf[..NAMES_OFFSET]);

        let names = &mut buf[NAMES_OFFSET..ENTRY_SIZE];
        names[..NAME_FIELD_LEN].copy_from_slice(&self.partition_name);
        names[NAME_FIELD_LEN..2 * NAME_FIELD_LEN].copy_from_slice(&self.flash_filename);
        names[2 * NAME_FIELD_LEN..].copy_from_slice(&self.fota_filename);
    }

    /// An entry is flashable when it has a partition name.
    pub fn is_flashable(&self) -> bool {
        !self.partition_name().is_empty()
    }

    pub fn binary(&self) -> Option<BinaryType> {
        BinaryType::from_raw(self.binary_type)
    }

    pub fn device(&self) -> Option<DeviceType> {
        DeviceType::from_raw(self.device_type)
    }

    pub fn partition_name(&self) -> String {
        decode_nul_padded(&self.partition_name)
    }

    pub fn set_partition_name(&mut self, name: &str) {
        self.partition_name = encode_nul_padded(name);
    }

    pub fn flash_filename(&self) -> String {
        decode_nul_padded(&self.flash_filename)
    }

    pub fn set_flash_filename(&mut self, name: &str) {
        self.flash_filename = encode_nul_padded(name);
    }

    pub fn fota_filename(&self) -> String {
        decode_nul_padded(&self.fota_filename)
    }

    pub fn set_fota_filename(&mut self, name: &str) {
        self.fota_filename = encode_nul_padded(name);
    }
}

impl fmt::Display for PitEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let binary = match self.binary() {
            Some(BinaryType::ApplicationProcessor) => "AP".to_string(),
            Some(BinaryType::CommunicationProcessor) => "CP".to_string(),
            None => format!("{:#x}", self.binary_type),
        };
        let device = match self.device() {
            Some(DeviceType::OneNand) => "OneNAND".to_string(),
            Some(DeviceType::File) => "File".to_string(),
            Some(DeviceType::Mmc) => "MMC".to_string(),
            Some(DeviceType::All) => "All".to_string(),
            None => format!("{:#x}", self.device_type),
        };
        write!(
            f,
            "{:>3}  {:<16} {:<3} {:<8} blocks {:>8}+{:<8} attr {:#04x}/{:#04x}  {}",
            self.identifier,
            self.partition_name(),
            binary,
            device,
            self.block_size_or_offset,
            self.block_count,
            self.attributes.0,
            self.update_attributes.0,
            self.flash_filename(),
        )
    }
}
