//! Session setup and teardown exchanges.

use std::time::Duration;

use tracing::{info, instrument};

use super::OdinDevice;
use crate::error::{OdinError, Result};
use crate::events::{OdinEvent, OdinObserver};
use crate::protocol::constants::{
    EndSessionRequest, NEGOTIATED_PACKET_SIZE, NEGOTIATED_SEQUENCE_LENGTH, NEGOTIATION_MIN_RESULT,
};
use crate::protocol::{
    BeginSessionPacket, EndSessionPacket, EndSessionResponse, FilePartSizePacket,
    SessionSetupPacket, SessionSetupResponse, TotalBytesPacket,
};
use crate::state::{DeviceState, FlashSession};
use crate::transport::{EmptyTransfer, UsbTransport};

impl<T: UsbTransport, O: OdinObserver> OdinDevice<T, O> {
    /// Start a session and negotiate flash sizing.
    ///
    /// Does nothing if a session is already active, unless `force` is set.
    /// A result of 2 or more means the device accepts larger packets; the
    /// flash deadline is raised and 1 MiB parts are requested.
    ///
    /// The current session is only replaced once the whole exchange
    /// succeeds; a failed begin leaves it untouched.
    #[instrument(skip(self))]
    pub fn begin_session(&mut self, force: bool) -> Result<()> {
        if self.session.active && !force {
            return Ok(());
        }

        let result = self.negotiate_session();
        self.session = self.track(result)?;
        info!(
            packet_size = self.session.packet_size,
            sequence_length = self.session.sequence_length,
            flash_timeout_ms = self.session.flash_timeout_ms,
            "Session negotiated"
        );
        self.observer.on_event(&OdinEvent::SessionNegotiated {
            packet_size: self.session.packet_size,
            sequence_length: self.session.sequence_length,
        });
        self.goto(DeviceState::SessionActive);
        Ok(())
    }

    fn negotiate_session(&self) -> Result<FlashSession> {
        let mut session = FlashSession::from_options(&self.options);

        self.send(&BeginSessionPacket::new(), None, EmptyTransfer::After)?;
        let response: SessionSetupResponse = self.receive(None, EmptyTransfer::None)?;
        info!(result = response.result, "Session started");

        if response.result >= NEGOTIATION_MIN_RESULT {
            self.request_packet_size(NEGOTIATED_PACKET_SIZE)?;
            session.packet_size = NEGOTIATED_PACKET_SIZE;
            session.sequence_length = NEGOTIATED_SEQUENCE_LENGTH;
            session.flash_timeout_ms = self.options.negotiated_flash_timeout_ms;
        }

        session.active = true;
        Ok(session)
    }

    /// Ask the device to accept parts of `packet_size` bytes, sent in
    /// sequences of `sequence_length` parts. Both must be non-zero.
    pub fn set_flash_packet_size(&mut self, packet_size: u32, sequence_length: u32) -> Result<()> {
        if packet_size == 0 {
            return Err(OdinError::InvalidArgument {
                name: "packet size",
            });
        }
        if sequence_length == 0 {
            return Err(OdinError::InvalidArgument {
                name: "sequence length",
            });
        }

        let result = self.request_packet_size(packet_size);
        self.track(result)?;

        self.session.packet_size = packet_size;
        self.session.sequence_length = sequence_length;
        Ok(())
    }

    fn request_packet_size(&self, packet_size: u32) -> Result<()> {
        self.send(
            &FilePartSizePacket::new(packet_size),
            None,
            EmptyTransfer::After,
        )?;
        self.expect_zero_result("set flash packet size", None)
    }

    /// Announce the size of the upcoming upload.
    pub fn set_flash_total_size(&mut self, total_size: u64) -> Result<()> {
        let total = u32::try_from(total_size).map_err(|_| OdinError::FileTooLarge {
            size: total_size,
        })?;
        let result = self
            .send(&TotalBytesPacket::new(total), None, EmptyTransfer::After)
            .and_then(|()| self.expect_zero_result("set flash total size", None));
        self.track(result)
    }

    /// End the session, optionally rebooting the device.
    ///
    /// Does nothing if no session is active, unless `force` is set.
    #[instrument(skip(self))]
    pub fn end_session(&mut self, reboot: bool, force: bool) -> Result<()> {
        if !self.session.active && !force {
            return Ok(());
        }

        let request = if reboot {
            EndSessionRequest::RebootDevice
        } else {
            EndSessionRequest::EndSession
        };
        let result = self
            .send(&EndSessionPacket::new(request), None, EmptyTransfer::After)
            .and_then(|()| self.receive::<EndSessionResponse>(None, EmptyTransfer::None));
        self.track(result)?;

        self.session.active = false;
        info!(reboot, "Session ended");
        self.goto(DeviceState::SessionEnded);
        Ok(())
    }

    /// End whatever session exists and reboot into normal mode.
    pub fn reboot(&mut self) -> Result<()> {
        self.end_session(true, true)
    }

    /// Wipe the user data partition. The device answers with result 0.
    ///
    /// The device formats before answering, so the flash deadline applies.
    #[instrument(skip(self))]
    pub fn erase_userdata(&mut self) -> Result<()> {
        let timeout = Some(self.session.flash_timeout());
        let result = self
            .send(&SessionSetupPacket::erase_userdata(), None, EmptyTransfer::After)
            .and_then(|()| self.expect_zero_result("erase userdata", timeout));
        self.track(result)?;
        info!("User data erased");
        Ok(())
    }

    /// Query the device type code.
    pub fn request_device_type(&mut self) -> Result<u32> {
        let result = self
            .send(&SessionSetupPacket::device_type(), None, EmptyTransfer::After)
            .and_then(|()| self.receive::<SessionSetupResponse>(None, EmptyTransfer::None))
            .map(|response| response.result);
        self.track(result)
    }

    /// Route subsequent flashes to the external SD card.
    pub fn enable_tflash(&mut self) -> Result<()> {
        let result = self
            .send(&SessionSetupPacket::enable_tflash(), None, EmptyTransfer::After)
            .and_then(|()| self.expect_zero_result("enable T-Flash", None));
        self.track(result)
    }

    fn expect_zero_result(&self, operation: &'static str, timeout: Option<Duration>) -> Result<()> {
        let response: SessionSetupResponse = self.receive(timeout, EmptyTransfer::None)?;
        if response.result != 0 {
            return Err(OdinError::UnexpectedResult {
                operation,
                expected: 0,
                received: response.result,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::initialized;
    use crate::config::{DeviceOptions, SequenceDefaults};
    use crate::error::{ErrorKind, OdinError};
    use crate::protocol::PacketError;
    use crate::protocol::constants::ResponseType;
    use crate::state::DeviceState;

    const SESSION: u32 = ResponseType::SessionSetup as u32;
    const END_SESSION: u32 = ResponseType::EndSession as u32;

    fn u32_at(frame: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes([
            frame[offset],
            frame[offset + 1],
            frame[offset + 2],
            frame[offset + 3],
        ])
    }

    #[test]
    fn test_begin_session_without_negotiation() {
        let (mock, mut device) = initialized(DeviceOptions::default());
        mock.queue_u32_pair(SESSION, 0);
        device.begin_session(false).unwrap();

        let session = device.session();
        assert!(session.active);
        assert_eq!(session.packet_size, 131_072);
        assert_eq!(session.sequence_length, 800);
        assert_eq!(session.flash_timeout_ms, 30_000);
        assert_eq!(device.state(), DeviceState::SessionActive);

        let writes = mock.data_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(u32_at(&writes[0], 0), 0x64);
        assert_eq!(u32_at(&writes[0], 4), 0x00);
        assert_eq!(u32_at(&writes[0], 8), 4);
        assert_eq!(mock.zero_length_writes(), 1);
    }

    #[test]
    fn test_begin_session_negotiates_packet_size() {
        let (mock, mut device) = initialized(DeviceOptions::default());
        mock.queue_u32_pair(SESSION, 3);
        mock.queue_u32_pair(SESSION, 0);
        device.begin_session(false).unwrap();

        let session = device.session();
        assert_eq!(session.packet_size, 1024 * 1024);
        assert_eq!(session.sequence_length, 30);
        assert_eq!(session.flash_timeout_ms, 120_000);

        let writes = mock.data_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(u32_at(&writes[1], 4), 0x05);
        assert_eq!(u32_at(&writes[1], 8), 1024 * 1024);
    }

    #[test]
    fn test_begin_session_is_idempotent_unless_forced() {
        let options = DeviceOptions {
            sequence_defaults: SequenceDefaults::Compact,
            ..Default::default()
        };
        let (mock, mut device) = initialized(options);
        mock.queue_u32_pair(SESSION, 0);
        device.begin_session(false).unwrap();
        device.begin_session(false).unwrap();
        assert_eq!(mock.data_writes().len(), 1);
        assert_eq!(device.session().sequence_length, 240);

        mock.queue_u32_pair(SESSION, 0);
        device.begin_session(true).unwrap();
        assert_eq!(mock.data_writes().len(), 2);
    }

    #[test]
    fn test_rejected_packet_size_keeps_defaults() {
        let (mock, mut device) = initialized(DeviceOptions::default());
        mock.queue_u32_pair(SESSION, 2);
        mock.queue_u32_pair(SESSION, 1);

        let err = device.begin_session(false).unwrap_err();
        assert!(matches!(
            err,
            OdinError::UnexpectedResult {
                expected: 0,
                received: 1,
                ..
            }
        ));
        assert_eq!(err.kind(), ErrorKind::ProtocolMismatch);
        assert!(!device.session().active);
        assert_eq!(device.session().packet_size, 131_072);
    }

    #[test]
    fn test_failed_forced_begin_keeps_active_session() {
        let (mock, mut device) = initialized(DeviceOptions::default());
        mock.queue_u32_pair(SESSION, 3);
        mock.queue_u32_pair(SESSION, 0);
        device.begin_session(false).unwrap();

        let err = device.begin_session(true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(device.state(), DeviceState::SessionActive);
        let session = device.session();
        assert!(session.active);
        assert_eq!(session.packet_size, 1024 * 1024);
        assert_eq!(session.sequence_length, 30);
        assert_eq!(session.flash_timeout_ms, 120_000);
    }

    #[test]
    fn test_oversized_session_reply_is_rejected() {
        let (mock, mut device) = initialized(DeviceOptions::default());
        let mut reply = vec![0x64, 0, 0, 0, 0, 0, 0, 0];
        reply.resize(16, 0);
        mock.queue_response(&reply);

        let err = device.begin_session(false).unwrap_err();
        assert!(matches!(
            err,
            OdinError::Packet {
                source: PacketError::SizeMismatch {
                    expected: 8,
                    actual: 16
                },
                ..
            }
        ));
        assert_eq!(err.kind(), ErrorKind::ProtocolMismatch);
        assert!(!device.session().active);
        assert_eq!(device.state(), DeviceState::Handshaked);
    }

    #[test]
    fn test_zero_packet_size_is_rejected() {
        let (mock, mut device) = initialized(DeviceOptions::default());
        for (packet_size, sequence_length, name) in
            [(0, 30, "packet size"), (1024, 0, "sequence length")]
        {
            let err = device
                .set_flash_packet_size(packet_size, sequence_length)
                .unwrap_err();
            assert!(matches!(err, OdinError::InvalidArgument { name: n } if n == name));
            assert_eq!(err.kind(), ErrorKind::Precondition);
        }
        assert!(mock.get_writes().is_empty());
        assert_eq!(device.session().packet_size, 131_072);
        assert_eq!(device.session().sequence_length, 800);
    }

    #[test]
    fn test_wrong_response_type_reports_both_tags() {
        let (mock, mut device) = initialized(DeviceOptions::default());
        mock.queue_u32_pair(END_SESSION, 0);
        let err = device.begin_session(false).unwrap_err();
        assert_eq!(err.response_types(), Some((0x64, 0x67)));
    }

    #[test]
    fn test_set_flash_total_size() {
        let (mock, mut device) = initialized(DeviceOptions::default());
        mock.queue_u32_pair(SESSION, 0);
        device.set_flash_total_size(1_500_000).unwrap();
        let writes = mock.data_writes();
        assert_eq!(u32_at(&writes[0], 4), 0x02);
        assert_eq!(u32_at(&writes[0], 8), 1_500_000);

        let err = device.set_flash_total_size(u64::from(u32::MAX) + 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Precondition);
    }

    #[test]
    fn test_end_session_and_reboot() {
        let (mock, mut device) = initialized(DeviceOptions::default());
        device.end_session(false, false).unwrap();
        assert!(mock.data_writes().is_empty());

        mock.queue_u32_pair(SESSION, 0);
        device.begin_session(false).unwrap();
        mock.queue_u32_pair(END_SESSION, 0);
        device.end_session(false, false).unwrap();
        assert!(!device.session().active);
        assert_eq!(device.state(), DeviceState::SessionEnded);

        mock.clear_writes();
        mock.queue_u32_pair(END_SESSION, 0);
        device.reboot().unwrap();
        let writes = mock.data_writes();
        assert_eq!(u32_at(&writes[0], 0), 0x67);
        assert_eq!(u32_at(&writes[0], 4), 0x01);
    }

    #[test]
    fn test_erase_userdata_and_device_type() {
        let (mock, mut device) = initialized(DeviceOptions::default());
        mock.queue_u32_pair(SESSION, 0);
        device.erase_userdata().unwrap();
        mock.queue_u32_pair(SESSION, 0x1F);
        assert_eq!(device.request_device_type().unwrap(), 0x1F);
        mock.queue_u32_pair(SESSION, 0);
        device.enable_tflash().unwrap();

        let requests: Vec<u32> = mock.data_writes().iter().map(|w| u32_at(w, 4)).collect();
        assert_eq!(requests, vec![0x07, 0x01, 0x08]);
    }

    #[test]
    fn test_erase_userdata_rejects_nonzero_result() {
        let (mock, mut device) = initialized(DeviceOptions::default());
        mock.queue_u32_pair(SESSION, 1);
        let err = device.erase_userdata().unwrap_err();
        assert!(matches!(
            err,
            OdinError::UnexpectedResult {
                operation: "erase userdata",
                expected: 0,
                received: 1
            }
        ));
    }
}
