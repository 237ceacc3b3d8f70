//! Protocol module - Odin packet definitions.

pub mod constants;
pub mod inbound;
pub mod outbound;

pub use constants::*;
pub use inbound::{
    EndSessionResponse, FileTransferResponse, InboundPacket, PacketError, PitFileResponse,
    ReceiveFilePartPacket, ResponsePacket, ResponseSize, SendFilePartResponse,
    SessionSetupResponse, decode,
};
pub use outbound::{
    BeginSessionPacket, ControlPacket, DumpPartPitFilePacket, EndFileTransferPacket,
    EndModemFileTransferPacket, EndPhoneFileTransferPacket, EndSessionPacket,
    FilePartSizePacket, FileTransferPacket, FlashPartFileTransferPacket, OutboundPacket,
    PitFilePacket, SendFilePartPacket, SessionSetupPacket, TotalBytesPacket,
};
