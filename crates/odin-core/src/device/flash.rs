//! File upload and partition flashing.

use std::time::Duration;

use tracing::{debug, info, instrument};

use super::OdinDevice;
use crate::error::{OdinError, Result};
use crate::events::{OdinEvent, OdinObserver, Operation};
use crate::protocol::constants::{FileTransferDestination, FileTransferRequest};
use crate::protocol::{
    EndModemFileTransferPacket, EndPhoneFileTransferPacket, FileTransferPacket,
    FileTransferResponse, FlashPartFileTransferPacket, OutboundPacket, SendFilePartPacket,
    SendFilePartResponse,
};
use crate::state::DeviceState;
use crate::transfer::{SequencePlan, TransferPlan};
use crate::transport::{EmptyTransfer, UsbTransport};

fn wire_u32(value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| OdinError::FileTooLarge { size: value })
}

impl<T: UsbTransport, O: OdinObserver> OdinDevice<T, O> {
    /// Upload `data` in sequences of parts.
    ///
    /// Each part must be acknowledged with its own index; any other index
    /// aborts the transfer. Modem uploads need a non-zero
    /// `file_identifier`.
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub fn send_file(
        &mut self,
        data: &[u8],
        destination: FileTransferDestination,
        device_type: u32,
        file_identifier: u32,
    ) -> Result<()> {
        if destination == FileTransferDestination::Modem && file_identifier == 0 {
            return Err(OdinError::MissingModemIdentifier);
        }

        let previous = self.state;
        self.goto(DeviceState::Transferring);
        let result = self.upload(data, destination, device_type, file_identifier);
        let result = self.track(result);
        if self.state == DeviceState::Transferring {
            self.goto(previous);
        }
        result
    }

    fn upload(
        &self,
        data: &[u8],
        destination: FileTransferDestination,
        device_type: u32,
        file_identifier: u32,
    ) -> Result<()> {
        let flash_timeout = self.session.flash_timeout();
        let plan = TransferPlan::new(
            data.len() as u64,
            self.session.packet_size,
            self.session.sequence_length,
        );
        info!(
            total = plan.total_bytes,
            sequences = plan.sequence_count,
            parts = plan.part_count(),
            "Starting file transfer"
        );

        self.send(
            &FileTransferPacket::new(FileTransferRequest::Flash),
            None,
            EmptyTransfer::After,
        )?;
        let _: FileTransferResponse = self.receive(None, EmptyTransfer::None)?;

        for sequence in plan.sequences() {
            self.send_sequence(data, &plan, &sequence, flash_timeout)?;

            let effective = wire_u32(sequence.effective_byte_count)?;
            let end: Box<dyn OutboundPacket> = match destination {
                FileTransferDestination::Phone => Box::new(EndPhoneFileTransferPacket::new(
                    effective,
                    device_type,
                    file_identifier,
                    sequence.is_last,
                )),
                FileTransferDestination::Modem => Box::new(EndModemFileTransferPacket::new(
                    effective,
                    device_type,
                    sequence.is_last,
                )),
            };
            self.send(end.as_ref(), None, EmptyTransfer::Both)?;
            let _: FileTransferResponse =
                self.receive(Some(flash_timeout), EmptyTransfer::None)?;
            debug!(
                sequence = sequence.index,
                effective_bytes = effective,
                last = sequence.is_last,
                "Sequence complete"
            );
        }

        if self.options.final_transfer_ack {
            let _: FileTransferResponse =
                self.receive(Some(flash_timeout), EmptyTransfer::None)?;
        }

        info!(total = plan.total_bytes, "File transfer complete");
        Ok(())
    }

    fn send_sequence(
        &self,
        data: &[u8],
        plan: &TransferPlan,
        sequence: &SequencePlan,
        flash_timeout: Duration,
    ) -> Result<()> {
        let byte_count = wire_u32(sequence.byte_count)?;
        debug!(
            sequence = sequence.index,
            parts = sequence.size,
            byte_count,
            "Announcing sequence"
        );
        self.send(
            &FlashPartFileTransferPacket::new(byte_count),
            Some(flash_timeout),
            EmptyTransfer::After,
        )?;
        let _: FileTransferResponse = self.receive(Some(flash_timeout), EmptyTransfer::None)?;

        let packet_size = plan.packet_size as usize;
        for part in 0..sequence.size {
            if part != 0 {
                self.transport
                    .empty_send()
                    .discard("empty send between file parts");
            }

            let (start, end) = sequence.part_range(plan, part);
            let chunk = &data[start as usize..end as usize];
            self.send(
                &SendFilePartPacket::new(chunk, packet_size),
                Some(flash_timeout),
                EmptyTransfer::None,
            )?;

            let response: SendFilePartResponse =
                self.receive(Some(flash_timeout), EmptyTransfer::None)?;
            let expected = part as u32;
            if response.part_index != expected {
                return Err(OdinError::PartIndexMismatch {
                    expected,
                    received: response.part_index,
                });
            }

            self.observer.on_event(&OdinEvent::Progress {
                operation: Operation::FileTransfer,
                current: end,
                total: plan.total_bytes,
            });
        }
        Ok(())
    }

    /// Flash `data` to the partition named `partition_name`.
    ///
    /// Begins a session if needed, downloads the PIT unless one is cached,
    /// then ends the session once the upload is acknowledged.
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub fn flash_partition(&mut self, partition_name: &str, data: &[u8]) -> Result<()> {
        self.begin_session(false)?;

        if self.pit.is_none() {
            self.get_pit_data()?;
        }
        let entry = self
            .pit
            .as_ref()
            .and_then(|pit| pit.find_entry_by_name(partition_name))
            .cloned()
            .ok_or_else(|| OdinError::PartitionNotFound(partition_name.to_string()))?;

        info!(
            partition = partition_name,
            identifier = entry.identifier,
            device_type = entry.device_type,
            "Flashing partition"
        );

        self.set_flash_total_size(data.len() as u64)?;
        self.send_file(
            data,
            FileTransferDestination::Phone,
            entry.device_type,
            entry.identifier,
        )?;
        self.end_session(false, false)?;

        self.observer.on_event(&OdinEvent::Complete {
            operation: Operation::FileTransfer,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::config::DeviceOptions;
    use crate::device::pit::tests::{sample_pit, script_download};
    use crate::device::tests::initialized;
    use crate::error::ErrorKind;
    use crate::events::testing::RecordingObserver;
    use crate::protocol::constants::ResponseType;
    use crate::transport::MockTransport;

    const PART: u32 = ResponseType::SendFilePart as u32;
    const SESSION: u32 = ResponseType::SessionSetup as u32;
    const PIT_FILE: u32 = ResponseType::PitFile as u32;
    const TRANSFER: u32 = ResponseType::FileTransfer as u32;
    const END_SESSION: u32 = ResponseType::EndSession as u32;

    fn u32_at(frame: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes([
            frame[offset],
            frame[offset + 1],
            frame[offset + 2],
            frame[offset + 3],
        ])
    }

    fn script_sequence(mock: &MockTransport, parts: u32) {
        mock.queue_u32_pair(TRANSFER, 0);
        for part in 0..parts {
            mock.queue_u32_pair(PART, part);
        }
        mock.queue_u32_pair(TRANSFER, 0);
    }

    #[test]
    fn test_send_file_single_partial_sequence() {
        let (mock, mut device) = initialized(DeviceOptions::default());
        let data: Vec<u8> = (0..1_500_000u32).map(|i| (i % 251) as u8).collect();

        mock.queue_u32_pair(TRANSFER, 0);
        script_sequence(&mock, 12);
        mock.queue_u32_pair(TRANSFER, 0);

        device
            .send_file(&data, FileTransferDestination::Phone, 2, 6)
            .unwrap();
        assert_eq!(mock.pending_replies(), 0);

        let writes = mock.data_writes();
        // Flash begin, announce, 12 parts, end of sequence.
        assert_eq!(writes.len(), 15);
        assert_eq!(u32_at(&writes[0], 0), 0x66);
        assert_eq!(u32_at(&writes[1], 4), 0x02);
        assert_eq!(u32_at(&writes[1], 8), 12 * 131_072);

        let last_part = &writes[13];
        assert_eq!(last_part.len(), 131_072);
        assert_eq!(&last_part[..58_208], &data[11 * 131_072..]);
        assert!(last_part[58_208..].iter().all(|&b| b == 0));

        let end = &writes[14];
        assert_eq!(u32_at(end, 4), 0x03);
        assert_eq!(u32_at(end, 8), 0);
        assert_eq!(u32_at(end, 12), 1_500_000);
        assert_eq!(u32_at(end, 20), 2);
        assert_eq!(u32_at(end, 24), 6);
        assert_eq!(u32_at(end, 28), 1);

        // After begin, after announce, 11 between parts, around the end.
        assert_eq!(mock.zero_length_writes(), 15);
    }

    #[test]
    fn test_send_file_multiple_sequences() {
        let (mock, mut device) = initialized(DeviceOptions::default());
        mock.queue_u32_pair(SESSION, 0);
        device.set_flash_packet_size(16, 2).unwrap();
        mock.clear_writes();

        let data = [0xAB; 40];
        mock.queue_u32_pair(TRANSFER, 0);
        script_sequence(&mock, 2);
        script_sequence(&mock, 1);
        mock.queue_u32_pair(TRANSFER, 0);

        device
            .send_file(&data, FileTransferDestination::Modem, 0, 0x0B)
            .unwrap();

        let ends: Vec<_> = mock
            .data_writes()
            .into_iter()
            .filter(|w| w.len() == 1024 && u32_at(w, 4) == 0x03)
            .collect();
        assert_eq!(ends.len(), 2);
        assert_eq!(u32_at(&ends[0], 8), 1);
        assert_eq!(u32_at(&ends[0], 12), 32);
        assert_eq!(u32_at(&ends[0], 24), 0);
        assert_eq!(u32_at(&ends[1], 12), 8);
        assert_eq!(u32_at(&ends[1], 24), 1);
    }

    #[test]
    fn test_part_index_mismatch_aborts() {
        let (mock, mut device) = initialized(DeviceOptions::default());
        mock.queue_u32_pair(TRANSFER, 0);
        mock.queue_u32_pair(TRANSFER, 0);
        mock.queue_u32_pair(PART, 1);

        let err = device
            .send_file(&[1u8; 100], FileTransferDestination::Phone, 2, 6)
            .unwrap_err();
        assert!(matches!(
            err,
            OdinError::PartIndexMismatch {
                expected: 0,
                received: 1
            }
        ));
        assert_eq!(err.kind(), ErrorKind::ProtocolMismatch);
        assert_eq!(device.state(), DeviceState::Handshaked);
    }

    #[test]
    fn test_disconnect_mid_transfer_invalidates_device() {
        let mock = MockTransport::new();
        let observer = Arc::new(RecordingObserver::default());
        let mut device =
            OdinDevice::with_observer(mock.clone(), DeviceOptions::default(), Arc::clone(&observer));
        mock.queue_handshake();
        device.initialize().unwrap();
        mock.queue_u32_pair(SESSION, 0);
        device.begin_session(false).unwrap();
        script_download(&mock, &sample_pit().to_bytes());
        mock.queue_u32_pair(PIT_FILE, 0);
        device.get_pit_data().unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        device.on_disconnect(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        mock.queue_u32_pair(TRANSFER, 0);
        mock.queue_u32_pair(TRANSFER, 0);
        mock.queue_u32_pair(PART, 0);
        mock.queue_disconnect();

        let err = device
            .send_file(&[0x11; 3 * 131_072], FileTransferDestination::Phone, 2, 6)
            .unwrap_err();
        assert!(err.is_disconnect());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(device.state(), DeviceState::Disconnected);
        assert!(!device.session().active);
        assert!(device.pit_data().is_none());
        assert_eq!(
            observer
                .events()
                .iter()
                .filter(|e| matches!(e, OdinEvent::DeviceDisconnected))
                .count(),
            1
        );

        assert!(matches!(
            device.begin_session(true),
            Err(OdinError::NotInitialized)
        ));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_modem_requires_identifier() {
        let (mock, mut device) = initialized(DeviceOptions::default());
        let err = device
            .send_file(&[0u8; 10], FileTransferDestination::Modem, 0, 0)
            .unwrap_err();
        assert!(matches!(err, OdinError::MissingModemIdentifier));
        assert!(mock.get_writes().is_empty());
    }

    #[test]
    fn test_final_ack_can_be_skipped() {
        let options = DeviceOptions {
            final_transfer_ack: false,
            ..Default::default()
        };
        let (mock, mut device) = initialized(options);
        mock.queue_u32_pair(TRANSFER, 0);
        script_sequence(&mock, 1);

        device
            .send_file(&[7u8; 10], FileTransferDestination::Phone, 2, 6)
            .unwrap();
        assert_eq!(mock.pending_replies(), 0);
    }

    #[test]
    fn test_flash_partition() {
        let mock = MockTransport::new();
        let observer = Arc::new(RecordingObserver::default());
        let mut device =
            OdinDevice::with_observer(mock.clone(), DeviceOptions::default(), Arc::clone(&observer));
        mock.queue_handshake();
        device.initialize().unwrap();

        mock.queue_u32_pair(SESSION, 0);
        script_download(&mock, &sample_pit().to_bytes());
        mock.queue_u32_pair(PIT_FILE, 0);
        mock.queue_u32_pair(SESSION, 0);
        mock.queue_u32_pair(TRANSFER, 0);
        script_sequence(&mock, 1);
        mock.queue_u32_pair(TRANSFER, 0);
        mock.queue_u32_pair(END_SESSION, 0);

        device.flash_partition("KERNEL", &[0x5A; 100]).unwrap();
        assert_eq!(mock.pending_replies(), 0);
        assert_eq!(device.state(), DeviceState::SessionEnded);

        let events = observer.events();
        assert!(events.iter().any(|e| matches!(
            e,
            OdinEvent::Progress {
                operation: Operation::FileTransfer,
                current: 100,
                total: 100
            }
        )));
        assert!(matches!(
            events.last(),
            Some(OdinEvent::Complete {
                operation: Operation::FileTransfer
            })
        ));
    }

    #[test]
    fn test_flash_unknown_partition() {
        let (mock, mut device) = initialized(DeviceOptions::default());
        mock.queue_u32_pair(SESSION, 0);
        script_download(&mock, &sample_pit().to_bytes());
        mock.queue_u32_pair(PIT_FILE, 0);

        let err = device.flash_partition("SYSTEM", &[0u8; 4]).unwrap_err();
        assert!(matches!(err, OdinError::PartitionNotFound(ref name) if name == "SYSTEM"));
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert!(device.pit_data().is_some());
    }
}
