//! Outbound packet layouts.
//!
//! Packets are layered: a control frame holds the control type at offset 0,
//! each family adds its request code right after it, and leaf packets add
//! their own fields after the family header. Every layer exposes the offset
//! of each field it owns and a `DATA_SIZE` marking where the next layer
//! starts, so all offsets are compile-time constants.
//!
//! ```text
//! ControlPacket            type @0
//! ├─ SessionSetupPacket    request @4
//! │  ├─ BeginSessionPacket      version @8
//! │  ├─ TotalBytesPacket        total @8
//! │  └─ FilePartSizePacket      part size @8
//! ├─ PitFilePacket         request @4
//! │  └─ DumpPartPitFilePacket   index @8
//! ├─ FileTransferPacket    request @4
//! │  ├─ FlashPartFileTransferPacket  byte count @8
//! │  └─ EndFileTransferPacket   dest @8, count @12, reserved @16, device @20
//! │     ├─ EndPhoneFileTransferPacket  identifier @24, eof @28
//! │     └─ EndModemFileTransferPacket  eof @24
//! └─ EndSessionPacket      request @4
//! ```
//!
//! Encoding never fails; it is pure layout into a zeroed buffer.

use byteorder::{ByteOrder, LittleEndian};

use super::constants::{
    CONTROL_PACKET_SIZE, ControlType, EndSessionRequest, FileTransferDestination,
    FileTransferRequest, PROTOCOL_VERSION, PitFileRequest, SessionRequest,
};

/// A packet the host writes to the bulk OUT endpoint.
pub trait OutboundPacket {
    /// Short name used in logs and packet events.
    fn name(&self) -> &'static str;

    /// Total number of bytes on the wire.
    fn size(&self) -> usize {
        CONTROL_PACKET_SIZE
    }

    /// Write every field into `buf`, which is zeroed and exactly `size()` long.
    fn pack(&self, buf: &mut [u8]);

    /// Allocate a zeroed frame and pack into it.
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.size()];
        self.pack(&mut buf);
        buf
    }
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    LittleEndian::write_u32(&mut buf[offset..offset + 4], value);
}

/// Root layer shared by every control frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlPacket {
    pub control_type: ControlType,
}

impl ControlPacket {
    pub const CONTROL_TYPE_OFFSET: usize = 0;
    pub const DATA_SIZE: usize = Self::CONTROL_TYPE_OFFSET + 4;

    pub const fn new(control_type: ControlType) -> Self {
        Self { control_type }
    }

    fn pack_fields(&self, buf: &mut [u8]) {
        put_u32(buf, Self::CONTROL_TYPE_OFFSET, self.control_type.value());
    }
}

// ---------------------------------------------------------------------------
// Session setup family (0x64)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSetupPacket {
    pub control: ControlPacket,
    pub request: SessionRequest,
}

impl SessionSetupPacket {
    pub const REQUEST_OFFSET: usize = ControlPacket::DATA_SIZE;
    pub const DATA_SIZE: usize = Self::REQUEST_OFFSET + 4;

    pub const fn new(request: SessionRequest) -> Self {
        Self {
            control: ControlPacket::new(ControlType::Session),
            request,
        }
    }

    /// Ask the device for its device type.
    pub const fn device_type() -> Self {
        Self::new(SessionRequest::DeviceType)
    }

    /// Ask the device to wipe its userdata partition.
    pub const fn erase_userdata() -> Self {
        Self::new(SessionRequest::EraseUserdata)
    }

    /// Enable T-Flash (SD card) mode.
    pub const fn enable_tflash() -> Self {
        Self::new(SessionRequest::EnableTFlash)
    }

    fn pack_fields(&self, buf: &mut [u8]) {
        self.control.pack_fields(buf);
        put_u32(buf, Self::REQUEST_OFFSET, self.request.value());
    }
}

impl OutboundPacket for SessionSetupPacket {
    fn name(&self) -> &'static str {
        match self.request {
            SessionRequest::BeginSession => "BeginSession",
            SessionRequest::DeviceType => "DeviceType",
            SessionRequest::TotalBytes => "TotalBytes",
            SessionRequest::FilePartSize => "FilePartSize",
            SessionRequest::EraseUserdata => "EraseUserdata",
            SessionRequest::EnableTFlash => "EnableTFlash",
        }
    }

    fn pack(&self, buf: &mut [u8]) {
        self.pack_fields(buf);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeginSessionPacket {
    pub setup: SessionSetupPacket,
    pub protocol_version: u32,
}

impl BeginSessionPacket {
    pub const PROTOCOL_VERSION_OFFSET: usize = SessionSetupPacket::DATA_SIZE;
    pub const DATA_SIZE: usize = Self::PROTOCOL_VERSION_OFFSET + 4;

    pub const fn new() -> Self {
        Self {
            setup: SessionSetupPacket::new(SessionRequest::BeginSession),
            protocol_version: PROTOCOL_VERSION,
        }
    }
}

impl Default for BeginSessionPacket {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboundPacket for BeginSessionPacket {
    fn name(&self) -> &'static str {
        "BeginSession"
    }

    fn pack(&self, buf: &mut [u8]) {
        self.setup.pack_fields(buf);
        put_u32(buf, Self::PROTOCOL_VERSION_OFFSET, self.protocol_version);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TotalBytesPacket {
    pub setup: SessionSetupPacket,
    pub total_bytes: u32,
}

impl TotalBytesPacket {
    pub const TOTAL_BYTES_OFFSET: usize = SessionSetupPacket::DATA_SIZE;
    pub const DATA_SIZE: usize = Self::TOTAL_BYTES_OFFSET + 4;

    pub const fn new(total_bytes: u32) -> Self {
        Self {
            setup: SessionSetupPacket::new(SessionRequest::TotalBytes),
            total_bytes,
        }
    }
}

impl OutboundPacket for TotalBytesPacket {
    fn name(&self) -> &'static str {
        "TotalBytes"
    }

    fn pack(&self, buf: &mut [u8]) {
        self.setup.pack_fields(buf);
        put_u32(buf, Self::TOTAL_BYTES_OFFSET, self.total_bytes);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePartSizePacket {
    pub setup: SessionSetupPacket,
    pub file_part_size: u32,
}

impl FilePartSizePacket {
    pub const FILE_PART_SIZE_OFFSET: usize = SessionSetupPacket::DATA_SIZE;
    pub const DATA_SIZE: usize = Self::FILE_PART_SIZE_OFFSET + 4;

    pub const fn new(file_part_size: u32) -> Self {
        Self {
            setup: SessionSetupPacket::new(SessionRequest::FilePartSize),
            file_part_size,
        }
    }
}

impl OutboundPacket for FilePartSizePacket {
    fn name(&self) -> &'static str {
        "FilePartSize"
    }

    fn pack(&self, buf: &mut [u8]) {
        self.setup.pack_fields(buf);
        put_u32(buf, Self::FILE_PART_SIZE_OFFSET, self.file_part_size);
    }
}

// ---------------------------------------------------------------------------
// PIT file family (0x65)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PitFilePacket {
    pub control: ControlPacket,
    pub request: PitFileRequest,
}

impl PitFilePacket {
    pub const REQUEST_OFFSET: usize = ControlPacket::DATA_SIZE;
    pub const DATA_SIZE: usize = Self::REQUEST_OFFSET + 4;

    pub const fn new(request: PitFileRequest) -> Self {
        Self {
            control: ControlPacket::new(ControlType::PitFile),
            request,
        }
    }

    fn pack_fields(&self, buf: &mut [u8]) {
        self.control.pack_fields(buf);
        put_u32(buf, Self::REQUEST_OFFSET, self.request.value());
    }
}

impl OutboundPacket for PitFilePacket {
    fn name(&self) -> &'static str {
        match self.request {
            PitFileRequest::Flash => "PitFlash",
            PitFileRequest::Dump => "PitDump",
            PitFileRequest::Part => "PitPart",
            PitFileRequest::EndTransfer => "PitEndTransfer",
        }
    }

    fn pack(&self, buf: &mut [u8]) {
        self.pack_fields(buf);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpPartPitFilePacket {
    pub pit: PitFilePacket,
    pub part_index: u32,
}

impl DumpPartPitFilePacket {
    pub const PART_INDEX_OFFSET: usize = PitFilePacket::DATA_SIZE;
    pub const DATA_SIZE: usize = Self::PART_INDEX_OFFSET + 4;

    pub const fn new(part_index: u32) -> Self {
        Self {
            pit: PitFilePacket::new(PitFileRequest::Part),
            part_index,
        }
    }
}

impl OutboundPacket for DumpPartPitFilePacket {
    fn name(&self) -> &'static str {
        "PitDumpPart"
    }

    fn pack(&self, buf: &mut [u8]) {
        self.pit.pack_fields(buf);
        put_u32(buf, Self::PART_INDEX_OFFSET, self.part_index);
    }
}

// ---------------------------------------------------------------------------
// File transfer family (0x66)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTransferPacket {
    pub control: ControlPacket,
    pub request: FileTransferRequest,
}

impl FileTransferPacket {
    pub const REQUEST_OFFSET: usize = ControlPacket::DATA_SIZE;
    pub const DATA_SIZE: usize = Self::REQUEST_OFFSET + 4;

    pub const fn new(request: FileTransferRequest) -> Self {
        Self {
            control: ControlPacket::new(ControlType::FileTransfer),
            request,
        }
    }

    fn pack_fields(&self, buf: &mut [u8]) {
        self.control.pack_fields(buf);
        put_u32(buf, Self::REQUEST_OFFSET, self.request.value());
    }
}

impl OutboundPacket for FileTransferPacket {
    fn name(&self) -> &'static str {
        match self.request {
            FileTransferRequest::Flash => "FileTransferFlash",
            FileTransferRequest::Dump => "FileTransferDump",
            FileTransferRequest::Part => "FileTransferPart",
            FileTransferRequest::End => "FileTransferEnd",
        }
    }

    fn pack(&self, buf: &mut [u8]) {
        self.pack_fields(buf);
    }
}

/// Announces the byte count of the sequence about to be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashPartFileTransferPacket {
    pub transfer: FileTransferPacket,
    pub sequence_byte_count: u32,
}

impl FlashPartFileTransferPacket {
    pub const SEQUENCE_BYTE_COUNT_OFFSET: usize = FileTransferPacket::DATA_SIZE;
    pub const DATA_SIZE: usize = Self::SEQUENCE_BYTE_COUNT_OFFSET + 4;

    pub const fn new(sequence_byte_count: u32) -> Self {
        Self {
            transfer: FileTransferPacket::new(FileTransferRequest::Part),
            sequence_byte_count,
        }
    }
}

impl OutboundPacket for FlashPartFileTransferPacket {
    fn name(&self) -> &'static str {
        "FlashPart"
    }

    fn pack(&self, buf: &mut [u8]) {
        self.transfer.pack_fields(buf);
        put_u32(buf, Self::SEQUENCE_BYTE_COUNT_OFFSET, self.sequence_byte_count);
    }
}

/// Common body of both end-of-sequence requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndFileTransferPacket {
    pub transfer: FileTransferPacket,
    pub destination: FileTransferDestination,
    pub sequence_byte_count: u32,
    /// Always zero on the wire.
    pub reserved: u32,
    pub device_type: u32,
}

impl EndFileTransferPacket {
    pub const DESTINATION_OFFSET: usize = FileTransferPacket::DATA_SIZE;
    pub const SEQUENCE_BYTE_COUNT_OFFSET: usize = Self::DESTINATION_OFFSET + 4;
    pub const RESERVED_OFFSET: usize = Self::SEQUENCE_BYTE_COUNT_OFFSET + 4;
    pub const DEVICE_TYPE_OFFSET: usize = Self::RESERVED_OFFSET + 4;
    pub const DATA_SIZE: usize = Self::DEVICE_TYPE_OFFSET + 4;

    pub const fn new(
        destination: FileTransferDestination,
        sequence_byte_count: u32,
        device_type: u32,
    ) -> Self {
        Self {
            transfer: FileTransferPacket::new(FileTransferRequest::End),
            destination,
            sequence_byte_count,
            reserved: 0,
            device_type,
        }
    }

    fn pack_fields(&self, buf: &mut [u8]) {
        self.transfer.pack_fields(buf);
        put_u32(buf, Self::DESTINATION_OFFSET, self.destination.value());
        put_u32(buf, Self::SEQUENCE_BYTE_COUNT_OFFSET, self.sequence_byte_count);
        put_u32(buf, Self::RESERVED_OFFSET, self.reserved);
        put_u32(buf, Self::DEVICE_TYPE_OFFSET, self.device_type);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndPhoneFileTransferPacket {
    pub end: EndFileTransferPacket,
    pub file_identifier: u32,
    pub end_of_file: bool,
}

impl EndPhoneFileTransferPacket {
    pub const FILE_IDENTIFIER_OFFSET: usize = EndFileTransferPacket::DATA_SIZE;
    pub const END_OF_FILE_OFFSET: usize = Self::FILE_IDENTIFIER_OFFSET + 4;
    pub const DATA_SIZE: usize = Self::END_OF_FILE_OFFSET + 4;

    pub const fn new(
        sequence_byte_count: u32,
        device_type: u32,
        file_identifier: u32,
        end_of_file: bool,
    ) -> Self {
        Self {
            end: EndFileTransferPacket::new(
                FileTransferDestination::Phone,
                sequence_byte_count,
                device_type,
            ),
            file_identifier,
            end_of_file,
        }
    }
}

impl OutboundPacket for EndPhoneFileTransferPacket {
    fn name(&self) -> &'static str {
        "EndPhoneFileTransfer"
    }

    fn pack(&self, buf: &mut [u8]) {
        self.end.pack_fields(buf);
        put_u32(buf, Self::FILE_IDENTIFIER_OFFSET, self.file_identifier);
        put_u32(buf, Self::END_OF_FILE_OFFSET, u32::from(self.end_of_file));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndModemFileTransferPacket {
    pub end: EndFileTransferPacket,
    pub end_of_file: bool,
}

impl EndModemFileTransferPacket {
    pub const END_OF_FILE_OFFSET: usize = EndFileTransferPacket::DATA_SIZE;
    pub const DATA_SIZE: usize = Self::END_OF_FILE_OFFSET + 4;

    pub const fn new(sequence_byte_count: u32, device_type: u32, end_of_file: bool) -> Self {
        Self {
            end: EndFileTransferPacket::new(
                FileTransferDestination::Modem,
                sequence_byte_count,
                device_type,
            ),
            end_of_file,
        }
    }
}

impl OutboundPacket for EndModemFileTransferPacket {
    fn name(&self) -> &'static str {
        "EndModemFileTransfer"
    }

    fn pack(&self, buf: &mut [u8]) {
        self.end.pack_fields(buf);
        put_u32(buf, Self::END_OF_FILE_OFFSET, u32::from(self.end_of_file));
    }
}

/// Raw chunk of file data, zero-padded to the negotiated packet size.
#[derive(Debug, Clone, Copy)]
pub struct SendFilePartPacket<'a> {
    pub data: &'a [u8],
    pub packet_size: usize,
}

impl<'a> SendFilePartPacket<'a> {
    /// `data` longer than `packet_size` is cut at the packet boundary.
    pub fn new(data: &'a [u8], packet_size: usize) -> Self {
        let len = data.len().min(packet_size);
        Self {
            data: &data[..len],
            packet_size,
        }
    }
}

impl OutboundPacket for SendFilePartPacket<'_> {
    fn name(&self) -> &'static str {
        "SendFilePart"
    }

    fn size(&self) -> usize {
        self.packet_size
    }

    fn pack(&self, buf: &mut [u8]) {
        buf[..self.data.len()].copy_from_slice(self.data);
    }
}

// ---------------------------------------------------------------------------
// End session family (0x67)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndSessionPacket {
    pub control: ControlPacket,
    pub request: EndSessionRequest,
}

impl EndSessionPacket {
    pub const REQUEST_OFFSET: usize = ControlPacket::DATA_SIZE;
    pub const DATA_SIZE: usize = Self::REQUEST_OFFSET + 4;

    pub const fn new(request: EndSessionRequest) -> Self {
        Self {
            control: ControlPacket::new(ControlType::EndSession),
            request,
        }
    }
}

impl OutboundPacket for EndSessionPacket {
    fn name(&self) -> &'static str {
        match self.request {
            EndSessionRequest::EndSession => "EndSession",
            EndSessionRequest::RebootDevice => "RebootDevice",
        }
    }

    fn pack(&self, buf: &mut [u8]) {
        self.control.pack_fields(buf);
        put_u32(buf, Self::REQUEST_OFFSET, self.request.value());
    }
}
