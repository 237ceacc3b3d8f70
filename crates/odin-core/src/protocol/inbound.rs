//! Inbound packet layouts.
//!
//! Fixed responses are 8 bytes: response type @0 and a type-specific
//! payload word @4. PIT parts are raw, variable-length chunks. Size checks
//! are done once in [`decode`] from each type's [`ResponseSize`]; the
//! per-type `unpack` only reads fields.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use super::constants::{PIT_PART_SIZE, RESPONSE_PACKET_SIZE, ResponseType};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Incorrect response size: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Response too large: at most {max} bytes, got {actual}")]
    TooLarge { max: usize, actual: usize },

    #[error("Requested and received response types differ: expected 0x{expected:02X}, received 0x{received:02X}")]
    TypeMismatch { expected: u32, received: u32 },
}

/// Declared size of an inbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSize {
    /// The device must send exactly this many bytes.
    Fixed(usize),
    /// The device may send anything up to this many bytes.
    Variable(usize),
}

impl ResponseSize {
    /// Number of bytes to request from the transport.
    pub const fn max_len(self) -> usize {
        match self {
            ResponseSize::Fixed(n) | ResponseSize::Variable(n) => n,
        }
    }

    pub fn check(self, actual: usize) -> Result<(), PacketError> {
        match self {
            ResponseSize::Fixed(expected) if actual != expected => {
                Err(PacketError::SizeMismatch { expected, actual })
            }
            ResponseSize::Variable(max) if actual > max => {
                Err(PacketError::TooLarge { max, actual })
            }
            _ => Ok(()),
        }
    }
}

/// A packet the host reads from the bulk IN endpoint.
pub trait InboundPacket: Sized {
    const NAME: &'static str;
    const SIZE: ResponseSize;

    /// Read fields from `data`, whose length already passed [`ResponseSize::check`].
    fn unpack(data: &[u8]) -> Result<Self, PacketError>;
}

/// Validate the length of `data` against `P::SIZE`, then unpack it.
pub fn decode<P: InboundPacket>(data: &[u8]) -> Result<P, PacketError> {
    P::SIZE.check(data.len())?;
    P::unpack(data)
}

/// Shared layout of every 8-byte response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponsePacket {
    pub response_type: u32,
    pub payload: u32,
}

impl ResponsePacket {
    pub const RESPONSE_TYPE_OFFSET: usize = 0;
    pub const PAYLOAD_OFFSET: usize = 4;
    pub const SIZE: ResponseSize = ResponseSize::Fixed(RESPONSE_PACKET_SIZE);

    pub fn read(data: &[u8]) -> Self {
        Self {
            response_type: LittleEndian::read_u32(&data[Self::RESPONSE_TYPE_OFFSET..]),
            payload: LittleEndian::read_u32(&data[Self::PAYLOAD_OFFSET..]),
        }
    }

    /// Read the header and insist on `expected`; the received tag is kept
    /// in the error so both values can be reported.
    pub fn read_expecting(data: &[u8], expected: ResponseType) -> Result<Self, PacketError> {
        let packet = Self::read(data);
        if packet.response_type != expected.value() {
            return Err(PacketError::TypeMismatch {
                expected: expected.value(),
                received: packet.response_type,
            });
        }
        Ok(packet)
    }
}

macro_rules! response_packet {
    ($(#[$meta:meta])* $name:ident, $ty:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name;

        impl InboundPacket for $name {
            const NAME: &'static str = stringify!($name);
            const SIZE: ResponseSize = ResponsePacket::SIZE;

            fn unpack(data: &[u8]) -> Result<Self, PacketError> {
                ResponsePacket::read_expecting(data, $ty)?;
                Ok(Self)
            }
        }
    };
    ($(#[$meta:meta])* $name:ident, $ty:expr, $field:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name {
            pub $field: u32,
        }

        impl InboundPacket for $name {
            const NAME: &'static str = stringify!($name);
            const SIZE: ResponseSize = ResponsePacket::SIZE;

            fn unpack(data: &[u8]) -> Result<Self, PacketError> {
                let header = ResponsePacket::read_expecting(data, $ty)?;
                Ok(Self {
                    $field: header.payload,
                })
            }
        }
    };
}

response_packet!(
    /// Reply to any session-setup request; `result` is request-specific.
    SessionSetupResponse,
    ResponseType::SessionSetup,
    result
);

response_packet!(
    /// Reply to PIT requests; after a dump request it carries the PIT size.
    PitFileResponse,
    ResponseType::PitFile,
    file_size
);

response_packet!(
    /// Acknowledges a file part and reports the index the device received.
    SendFilePartResponse,
    ResponseType::SendFilePart,
    part_index
);

response_packet!(
    /// Acknowledges file-transfer control requests.
    FileTransferResponse,
    ResponseType::FileTransfer
);

response_packet!(
    /// Acknowledges end-session and reboot requests.
    EndSessionResponse,
    ResponseType::EndSession
);

/// One raw chunk of the PIT during a dump.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReceiveFilePartPacket {
    pub data: Vec<u8>,
}

impl ReceiveFilePartPacket {
    /// Bytes actually received, as opposed to the declared maximum.
    pub fn received_size(&self) -> usize {
        self.data.len()
    }
}

impl InboundPacket for ReceiveFilePartPacket {
    const NAME: &'static str = "ReceiveFilePart";
    const SIZE: ResponseSize = ResponseSize::Variable(PIT_PART_SIZE);

    fn unpack(data: &[u8]) -> Result<Self, PacketError> {
        Ok(Self {
            data: data.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(response_type: u32, payload: u32) -> Vec<u8> {
        let mut bytes = response_type.to_le_bytes().to_vec();
        bytes.extend_from_slice(&payload.to_le_bytes());
        bytes
    }

    #[test]
    fn test_session_setup_result() {
        let parsed: SessionSetupResponse = decode(&response(0x64, 3)).unwrap();
        assert_eq!(parsed.result, 3);
    }

    #[test]
    fn test_send_file_part_index() {
        let parsed: SendFilePartResponse = decode(&response(0x00, 17)).unwrap();
        assert_eq!(parsed.part_index, 17);
    }

    #[test]
    fn test_fixed_size_rejected() {
        let mut bytes = response(0x66, 0);
        bytes.push(0);
        assert_eq!(
            decode::<FileTransferResponse>(&bytes),
            Err(PacketError::SizeMismatch {
                expected: 8,
                actual: 9
            })
        );
        assert!(decode::<FileTransferResponse>(&bytes[..4]).is_err());
    }

    #[test]
    fn test_type_mismatch_keeps_received_tag() {
        let err = decode::<PitFileResponse>(&response(0x67, 0)).unwrap_err();
        assert_eq!(
            err,
            PacketError::TypeMismatch {
                expected: 0x65,
                received: 0x67
            }
        );
    }

    #[test]
    fn test_variable_part() {
        let part: ReceiveFilePartPacket = decode(&[1u8; 120]).unwrap();
        assert_eq!(part.received_size(), 120);

        let empty: ReceiveFilePartPacket = decode(&[]).unwrap();
        assert_eq!(empty.received_size(), 0);

        assert_eq!(
            decode::<ReceiveFilePartPacket>(&[0u8; 501]),
            Err(PacketError::TooLarge {
                max: 500,
                actual: 501
            })
        );
    }
}
