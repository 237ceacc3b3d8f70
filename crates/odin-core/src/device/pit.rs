//! Partition table download.

use tracing::{debug, info, instrument};

use super::OdinDevice;
use crate::error::Result;
use crate::events::{OdinEvent, OdinObserver, Operation};
use crate::pit::PitData;
use crate::protocol::constants::PitFileRequest;
use crate::protocol::{DumpPartPitFilePacket, PitFilePacket, PitFileResponse, ReceiveFilePartPacket};
use crate::transfer::pit_part_count;
use crate::transport::{Advisory, EmptyTransfer, UsbTransport};

impl<T: UsbTransport, O: OdinObserver> OdinDevice<T, O> {
    /// Download and decode the device's PIT, caching the result.
    ///
    /// The announced size is checked against [`crate::pit::MAX_PIT_SIZE`]
    /// before any buffer is allocated. The closing end-transfer exchange is
    /// advisory: once every part has arrived its failure is logged and the
    /// table is still returned.
    #[instrument(skip(self))]
    pub fn get_pit_data(&mut self) -> Result<&PitData> {
        let result = self.download_pit();
        let pit = self.track(result)?;
        info!(entries = pit.entry_count(), "PIT downloaded");
        self.observer.on_event(&OdinEvent::Complete {
            operation: Operation::PitDownload,
        });
        Ok(&*self.pit.insert(pit))
    }

    fn download_pit(&self) -> Result<PitData> {
        self.send(
            &PitFilePacket::new(PitFileRequest::Dump),
            None,
            EmptyTransfer::After,
        )?;
        let response: PitFileResponse = self.receive(None, EmptyTransfer::None)?;
        let file_size = response.file_size;
        let size = PitData::check_file_size(file_size)?;
        let parts = pit_part_count(file_size);
        info!(file_size, parts, "Downloading PIT");

        let mut buffer = vec![0u8; size];
        let mut offset = 0usize;
        for index in 0..parts {
            self.send(&DumpPartPitFilePacket::new(index), None, EmptyTransfer::None)?;
            let part: ReceiveFilePartPacket = self.receive(None, EmptyTransfer::None)?;

            let len = part.received_size().min(buffer.len() - offset);
            buffer[offset..offset + len].copy_from_slice(&part.data[..len]);
            offset += len;
            debug!(index, received = part.received_size(), offset, "PIT part");

            self.observer.on_event(&OdinEvent::Progress {
                operation: Operation::PitDownload,
                current: u64::from(index) + 1,
                total: u64::from(parts),
            });
        }

        // The device may or may not send a trailing short packet.
        self.transport
            .empty_receive()
            .discard("empty receive after PIT parts");

        let end_transfer: Advisory<_> = self.end_pit_transfer().into();
        end_transfer.discard("PIT end transfer");

        if offset < buffer.len() {
            debug!(received = offset, expected = buffer.len(), "Short PIT download");
        }

        Ok(PitData::from_bytes(&buffer, self.options.pit_layout)?)
    }

    fn end_pit_transfer(&self) -> Result<()> {
        self.send(
            &PitFilePacket::new(PitFileRequest::EndTransfer),
            None,
            EmptyTransfer::After,
        )?;
        let _: PitFileResponse = self.receive(None, EmptyTransfer::None)?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::DeviceOptions;
    use crate::device::tests::initialized;
    use crate::error::{ErrorKind, OdinError};
    use crate::pit::{MAX_PIT_SIZE, PitEntry, PitError, PitHeader};
    use crate::protocol::constants::{PIT_PART_SIZE, ResponseType};
    use crate::transport::MockTransport;

    const PIT_FILE: u32 = ResponseType::PitFile as u32;

    pub(crate) fn script_download(mock: &MockTransport, bytes: &[u8]) {
        mock.queue_u32_pair(PIT_FILE, bytes.len() as u32);
        for chunk in bytes.chunks(PIT_PART_SIZE) {
            mock.queue_response(chunk);
        }
    }

    pub(crate) fn sample_pit() -> PitData {
        let mut pit = PitData::with_header(PitHeader::tagged("COM_TAR2", "SMDK4210", 0));
        for (identifier, name) in [(1, "PIT"), (6, "KERNEL"), (7, "RECOVERY"), (11, "MODEM")] {
            let mut entry = PitEntry::new();
            entry.identifier = identifier;
            entry.device_type = 2;
            entry.set_partition_name(name);
            entry.set_flash_filename(&format!("{}.img", name.to_lowercase()));
            pit.push_entry(entry);
        }
        pit
    }

    #[test]
    fn test_pit_download() {
        let (mock, mut device) = initialized(DeviceOptions::default());
        let expected = sample_pit();
        let bytes = expected.to_bytes();
        assert_eq!(bytes.len(), 28 + 4 * 132);

        script_download(&mock, &bytes);
        mock.queue_zero_length();
        mock.queue_u32_pair(PIT_FILE, 0);

        let pit = device.get_pit_data().unwrap();
        assert_eq!(*pit, expected);
        assert_eq!(pit.find_entry_by_name("KERNEL").map(|e| e.identifier), Some(6));
        assert_eq!(mock.pending_replies(), 0);
        assert!(device.pit_data().is_some());

        // Dump, 2 part requests, end transfer.
        let writes = mock.data_writes();
        assert_eq!(writes.len(), 4);
        assert_eq!(&writes[1][..12], &[0x65, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&writes[2][8..12], &[1, 0, 0, 0]);
    }

    #[test]
    fn test_pit_end_transfer_is_advisory() {
        let (mock, mut device) = initialized(DeviceOptions::default());
        let bytes = sample_pit().to_bytes();
        script_download(&mock, &bytes);
        mock.queue_u32_pair(0x66, 0);

        let pit = device.get_pit_data().unwrap();
        assert_eq!(pit.entry_count(), 4);
    }

    #[test]
    fn test_pit_download_bad_magic() {
        let (mock, mut device) = initialized(DeviceOptions::default());
        let mut bytes = sample_pit().to_bytes();
        bytes[0] ^= 0xFF;
        script_download(&mock, &bytes);
        mock.queue_u32_pair(PIT_FILE, 0);

        let err = device.get_pit_data().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(device.pit_data().is_none());
    }

    #[test]
    fn test_pit_announced_size_is_bounded() {
        for size in [u32::MAX, MAX_PIT_SIZE as u32 + 1, 0, 12] {
            let (mock, mut device) = initialized(DeviceOptions::default());
            mock.queue_u32_pair(PIT_FILE, size);

            let err = device.get_pit_data().unwrap_err();
            assert!(
                matches!(err, OdinError::Format(PitError::SizeOutOfRange { size: s, .. }) if s == size),
                "size {size}: {err}"
            );
            assert_eq!(err.kind(), ErrorKind::Format);
            // Only the dump request went out; no part was asked for.
            assert_eq!(mock.data_writes().len(), 1);
            assert!(device.pit_data().is_none());
        }
    }

    #[test]
    fn test_pit_part_timeout_aborts() {
        let (mock, mut device) = initialized(DeviceOptions::default());
        mock.queue_u32_pair(PIT_FILE, 1024);
        mock.queue_response(&[0u8; 500]);
        mock.queue_timeout();

        let err = device.get_pit_data().unwrap_err();
        assert!(matches!(err, OdinError::Timeout { .. }));
    }
}
