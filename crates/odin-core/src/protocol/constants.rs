//! Odin wire constants.
//!
//! Every control frame the host sends is a fixed 1024-byte buffer; every
//! response the device returns is an 8-byte `{type, payload}` pair, except
//! PIT parts which arrive as raw chunks of at most 500 bytes.

/// Challenge sent by the host right after claiming the interface.
pub const HANDSHAKE_REQUEST: &[u8; 4] = b"ODIN";
/// Expected reply, compared after stripping NUL bytes.
pub const HANDSHAKE_RESPONSE: &str = "LOKE";
/// Number of bytes read back for the handshake reply.
pub const HANDSHAKE_RESPONSE_LEN: usize = 7;

/// Size of every outbound control frame.
pub const CONTROL_PACKET_SIZE: usize = 1024;
/// Size of every fixed inbound response.
pub const RESPONSE_PACKET_SIZE: usize = 8;
/// Upper bound for a single PIT part received during a dump.
pub const PIT_PART_SIZE: usize = 500;

/// Protocol version advertised in the begin-session request.
pub const PROTOCOL_VERSION: u32 = 4;

/// `beginSession` results at or above this value allow packet-size negotiation.
pub const NEGOTIATION_MIN_RESULT: u32 = 2;
/// Packet size requested once negotiation is available (1 MiB).
pub const NEGOTIATED_PACKET_SIZE: u32 = 1024 * 1024;
/// Parts per sequence used together with [`NEGOTIATED_PACKET_SIZE`].
pub const NEGOTIATED_SEQUENCE_LENGTH: u32 = 30;

/// Conservative packet size used when the device cannot negotiate (128 KiB).
pub const DEFAULT_PACKET_SIZE: u32 = 128 * 1024;
/// Parts per sequence in the long-sequence default set.
pub const STANDARD_SEQUENCE_LENGTH: u32 = 800;
/// Parts per sequence in the short-sequence default set.
pub const COMPACT_SEQUENCE_LENGTH: u32 = 240;

// USB identification
pub const SAMSUNG_VENDOR_ID: u16 = 0x04E8;
pub const PRODUCT_GALAXY_S: u16 = 0x6601;
pub const PRODUCT_GALAXY_S2: u16 = 0x685D;
pub const PRODUCT_DROID_CHARGE: u16 = 0x68C3;
pub const SUPPORTED_PIDS: &[u16] = &[PRODUCT_GALAXY_S, PRODUCT_GALAXY_S2, PRODUCT_DROID_CHARGE];

/// Interface class carrying the Odin bulk endpoints (CDC data).
pub const USB_CLASS_CDC_DATA: u8 = 0x0A;
/// Configuration selected when the device reports none active.
pub const DEFAULT_CONFIGURATION: u8 = 1;

/// Top-level family of a control frame, stored at offset 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ControlType {
    Session = 0x64,
    PitFile = 0x65,
    FileTransfer = 0x66,
    EndSession = 0x67,
}

/// Requests of the [`ControlType::Session`] family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SessionRequest {
    BeginSession = 0x00,
    DeviceType = 0x01,
    TotalBytes = 0x02,
    FilePartSize = 0x05,
    EraseUserdata = 0x07,
    EnableTFlash = 0x08,
}

/// Requests of the [`ControlType::PitFile`] family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PitFileRequest {
    Flash = 0x00,
    Dump = 0x01,
    Part = 0x02,
    EndTransfer = 0x03,
}

/// Requests of the [`ControlType::FileTransfer`] family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FileTransferRequest {
    Flash = 0x00,
    Dump = 0x01,
    Part = 0x02,
    End = 0x03,
}

/// Requests of the [`ControlType::EndSession`] family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EndSessionRequest {
    EndSession = 0x00,
    RebootDevice = 0x01,
}

/// Where an end-of-sequence request routes the uploaded data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FileTransferDestination {
    Phone = 0x00,
    Modem = 0x01,
}

/// Tag stored at offset 0 of every fixed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ResponseType {
    SendFilePart = 0x00,
    SessionSetup = 0x64,
    PitFile = 0x65,
    FileTransfer = 0x66,
    EndSession = 0x67,
}

/// Well-known file identifiers used by phone-destination transfers.
///
/// PIT entries carry the identifier to use; these are only the values
/// seen on early devices.
pub mod file_identifier {
    pub const PRIMARY_BOOTLOADER: u32 = 0x00;
    /// Never flash the PIT through a file transfer.
    pub const PIT: u32 = 0x01;
    pub const SECONDARY_BOOTLOADER: u32 = 0x03;
    pub const SECONDARY_BOOTLOADER_BACKUP: u32 = 0x04;
    pub const KERNEL: u32 = 0x06;
    pub const RECOVERY: u32 = 0x07;
    pub const TABLET_MODEM: u32 = 0x08;
    pub const MODEM: u32 = 0x0B;
    pub const EFS: u32 = 0x14;
    pub const PARAM_LFS: u32 = 0x15;
    pub const FACTORY_FILESYSTEM: u32 = 0x16;
    pub const DATABASE_DATA: u32 = 0x17;
    pub const CACHE: u32 = 0x18;
}

macro_rules! impl_wire_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $ty {
                /// Raw little-endian wire value.
                pub const fn value(self) -> u32 {
                    self as u32
                }
            }
        )*
    };
}

impl_wire_value!(
    ControlType,
    SessionRequest,
    PitFileRequest,
    FileTransferRequest,
    EndSessionRequest,
    FileTransferDestination,
    ResponseType,
);
