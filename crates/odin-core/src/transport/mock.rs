//! Mock USB transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::traits::{
    ConfigurationInfo, Direction, EndpointInfo, EndpointKind, InterfaceInfo, TransportError,
    UsbTransport,
};
use crate::protocol::constants::{PRODUCT_GALAXY_S2, SAMSUNG_VENDOR_ID, USB_CLASS_CDC_DATA};

/// Endpoint addresses of the default mock configuration.
pub const MOCK_IN_ENDPOINT: u8 = 0x81;
pub const MOCK_OUT_ENDPOINT: u8 = 0x02;

#[derive(Debug, Clone)]
enum MockReply {
    Data(Vec<u8>),
    ZeroLength,
    Timeout,
    Fail(String),
    Disconnect,
}

/// One captured OUT transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockWrite {
    pub endpoint: u8,
    pub data: Vec<u8>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock transport for unit testing the engine.
///
/// Clones share state, so a test can keep a handle while the engine owns
/// another. IN transfers pop scripted replies in order; an empty queue
/// behaves like a silent device and times out. Single-byte reads are
/// empty-packet reads: they consume a queued zero-length reply if one is
/// at the head and otherwise time out without touching the queue.
#[derive(Clone)]
pub struct MockTransport {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    write_log: Arc<Mutex<Vec<MockWrite>>>,
    /// Lifecycle calls (open, claim, ...) in order.
    call_log: Arc<Mutex<Vec<String>>>,
    configuration: Arc<Mutex<Option<ConfigurationInfo>>>,
    connected: Arc<Mutex<bool>>,
    vid: u16,
    pid: u16,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            replies: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            call_log: Arc::new(Mutex::new(Vec::new())),
            configuration: Arc::new(Mutex::new(Some(Self::cdc_configuration()))),
            connected: Arc::new(Mutex::new(true)),
            vid: SAMSUNG_VENDOR_ID,
            pid: PRODUCT_GALAXY_S2,
        }
    }

    /// Interface 0 is a CDC control interface; interface 1 carries the bulk
    /// pair on alternate 0.
    pub fn cdc_configuration() -> ConfigurationInfo {
        ConfigurationInfo {
            value: 1,
            interfaces: vec![
                InterfaceInfo {
                    interface_number: 0,
                    alternate_setting: 0,
                    class: 0x02,
                    endpoints: vec![EndpointInfo {
                        address: 0x83,
                        direction: Direction::In,
                        kind: EndpointKind::Interrupt,
                        max_packet_size: 16,
                    }],
                },
                InterfaceInfo {
                    interface_number: 1,
                    alternate_setting: 0,
                    class: USB_CLASS_CDC_DATA,
                    endpoints: vec![
                        EndpointInfo {
                            address: MOCK_IN_ENDPOINT,
                            direction: Direction::In,
                            kind: EndpointKind::Bulk,
                            max_packet_size: 512,
                        },
                        EndpointInfo {
                            address: MOCK_OUT_ENDPOINT,
                            direction: Direction::Out,
                            kind: EndpointKind::Bulk,
                            max_packet_size: 512,
                        },
                    ],
                },
            ],
        }
    }

    /// Replace the reported configuration; `None` simulates an
    /// unconfigured device.
    pub fn set_configuration(&self, configuration: Option<ConfigurationInfo>) {
        *lock(&self.configuration) = configuration;
    }

    /// Queue raw bytes to be returned on the next read.
    pub fn queue_response(&self, bytes: &[u8]) {
        lock(&self.replies).push_back(MockReply::Data(bytes.to_vec()));
    }

    /// Queue an 8-byte response frame.
    pub fn queue_u32_pair(&self, response_type: u32, payload: u32) {
        let mut bytes = response_type.to_le_bytes().to_vec();
        bytes.extend_from_slice(&payload.to_le_bytes());
        self.queue_response(&bytes);
    }

    /// Queue the device's handshake answer.
    pub fn queue_handshake(&self) {
        self.queue_response(b"LOKE\0\0\0");
    }

    /// Queue a zero-length packet for the next empty-packet read.
    pub fn queue_zero_length(&self) {
        lock(&self.replies).push_back(MockReply::ZeroLength);
    }

    /// Queue a read that times out.
    pub fn queue_timeout(&self) {
        lock(&self.replies).push_back(MockReply::Timeout);
    }

    /// Queue a read that fails with a transfer error.
    pub fn queue_failure(&self, message: &str) {
        lock(&self.replies).push_back(MockReply::Fail(message.to_string()));
    }

    /// Queue a read during which the device drops off the bus. The mock
    /// stays disconnected afterwards.
    pub fn queue_disconnect(&self) {
        lock(&self.replies).push_back(MockReply::Disconnect);
    }

    /// Number of scripted replies not yet consumed.
    pub fn pending_replies(&self) -> usize {
        lock(&self.replies).len()
    }

    /// Get all captured writes, zero-length packets included.
    pub fn get_writes(&self) -> Vec<MockWrite> {
        lock(&self.write_log).clone()
    }

    /// Captured writes that carried data.
    pub fn data_writes(&self) -> Vec<Vec<u8>> {
        lock(&self.write_log)
            .iter()
            .filter(|w| !w.data.is_empty())
            .map(|w| w.data.clone())
            .collect()
    }

    /// Number of zero-length packets sent.
    pub fn zero_length_writes(&self) -> usize {
        lock(&self.write_log)
            .iter()
            .filter(|w| w.data.is_empty())
            .count()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        lock(&self.write_log).clear();
    }

    /// Lifecycle calls made so far, e.g. `claim_interface(1)`.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.call_log).clone()
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        *lock(&self.connected) = false;
    }

    /// Simulate device reconnect.
    pub fn reconnect(&self) {
        *lock(&self.connected) = true;
    }

    /// Set VID/PID reported by the mock.
    pub fn set_ids(&mut self, vid: u16, pid: u16) {
        self.vid = vid;
        self.pid = pid;
    }

    fn record(&self, call: String) -> Result<(), TransportError> {
        self.ensure_connected()?;
        lock(&self.call_log).push(call);
        Ok(())
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if *lock(&self.connected) {
            Ok(())
        } else {
            Err(TransportError::Disconnected)
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbTransport for MockTransport {
    fn open(&self) -> Result<(), TransportError> {
        self.record("open".to_string())
    }

    fn active_configuration(&self) -> Result<Option<ConfigurationInfo>, TransportError> {
        self.ensure_connected()?;
        Ok(lock(&self.configuration).clone())
    }

    fn select_configuration(&self, configuration: u8) -> Result<(), TransportError> {
        self.record(format!("select_configuration({configuration})"))?;
        let mut current = lock(&self.configuration);
        if current.is_none() {
            *current = Some(Self::cdc_configuration());
        }
        Ok(())
    }

    fn claim_interface(&self, interface: u8) -> Result<(), TransportError> {
        self.record(format!("claim_interface({interface})"))
    }

    fn select_alternate_interface(
        &self,
        interface: u8,
        alternate: u8,
    ) -> Result<(), TransportError> {
        self.record(format!("select_alternate_interface({interface}, {alternate})"))
    }

    fn transfer_out(
        &self,
        endpoint: u8,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.ensure_connected()?;
        lock(&self.write_log).push(MockWrite {
            endpoint,
            data: data.to_vec(),
        });
        Ok(data.len())
    }

    fn transfer_in(
        &self,
        _endpoint: u8,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        self.ensure_connected()?;
        let mut replies = lock(&self.replies);

        if max_len <= 1 {
            return match replies.front() {
                Some(MockReply::ZeroLength) => {
                    replies.pop_front();
                    Ok(Vec::new())
                }
                _ => Err(TransportError::timeout(timeout)),
            };
        }

        match replies.pop_front() {
            // Returned whole, like the nusb backend, even past `max_len`.
            Some(MockReply::Data(bytes)) => Ok(bytes),
            Some(MockReply::ZeroLength) => Ok(Vec::new()),
            Some(MockReply::Fail(message)) => Err(TransportError::ReadFailed(message)),
            Some(MockReply::Disconnect) => {
                *lock(&self.connected) = false;
                Err(TransportError::Disconnected)
            }
            Some(MockReply::Timeout) | None => Err(TransportError::timeout(timeout)),
        }
    }

    fn reset(&self) -> Result<(), TransportError> {
        self.record("reset".to_string())
    }

    fn close(&self) -> Result<(), TransportError> {
        lock(&self.call_log).push("close".to_string());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        *lock(&self.connected)
    }

    fn device_id(&self) -> String {
        format!("mock:{:04x}:{:04x}", self.vid, self.pid)
    }

    fn vendor_id(&self) -> u16 {
        self.vid
    }

    fn product_id(&self) -> u16 {
        self.pid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(50);

    #[test]
    fn test_mock_reply_queue() {
        let mock = MockTransport::new();
        mock.queue_u32_pair(0x64, 0);
        mock.queue_response(b"LOKE\0\0\0");

        let first = mock.transfer_in(MOCK_IN_ENDPOINT, 8, TIMEOUT).unwrap();
        assert_eq!(first, vec![0x64, 0, 0, 0, 0, 0, 0, 0]);

        let second = mock.transfer_in(MOCK_IN_ENDPOINT, 7, TIMEOUT).unwrap();
        assert_eq!(&second, b"LOKE\0\0\0");

        // Queue is empty now
        assert!(matches!(
            mock.transfer_in(MOCK_IN_ENDPOINT, 8, TIMEOUT),
            Err(TransportError::Timeout { timeout_ms: 50 })
        ));
    }

    #[test]
    fn test_overlong_reply_is_not_truncated() {
        let mock = MockTransport::new();
        mock.queue_response(&[0x64; 16]);
        let reply = mock.transfer_in(MOCK_IN_ENDPOINT, 8, TIMEOUT).unwrap();
        assert_eq!(reply.len(), 16);
    }

    #[test]
    fn test_scripted_disconnect() {
        let mock = MockTransport::new();
        mock.queue_disconnect();
        mock.queue_u32_pair(0x64, 0);
        assert!(matches!(
            mock.transfer_in(MOCK_IN_ENDPOINT, 8, TIMEOUT),
            Err(TransportError::Disconnected)
        ));
        assert!(!mock.is_connected());
        assert_eq!(mock.pending_replies(), 1);
    }

    #[test]
    fn test_empty_read_leaves_queue_alone() {
        let mock = MockTransport::new();
        mock.queue_u32_pair(0x66, 0);
        assert!(mock.transfer_in(MOCK_IN_ENDPOINT, 1, TIMEOUT).is_err());
        assert_eq!(mock.pending_replies(), 1);

        let mock = MockTransport::new();
        mock.queue_zero_length();
        assert_eq!(mock.transfer_in(MOCK_IN_ENDPOINT, 1, TIMEOUT).unwrap(), vec![]);
        assert_eq!(mock.pending_replies(), 0);
    }

    #[test]
    fn test_mock_write_capture() {
        let mock = MockTransport::new();
        mock.transfer_out(MOCK_OUT_ENDPOINT, b"ODIN", TIMEOUT).unwrap();
        mock.transfer_out(MOCK_OUT_ENDPOINT, &[], TIMEOUT).unwrap();

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].data, b"ODIN");
        assert_eq!(writes[0].endpoint, MOCK_OUT_ENDPOINT);
        assert_eq!(mock.data_writes(), vec![b"ODIN".to_vec()]);
        assert_eq!(mock.zero_length_writes(), 1);
    }

    #[test]
    fn test_mock_disconnect() {
        let mock = MockTransport::new();
        let handle = mock.clone();
        assert!(mock.is_connected());

        handle.disconnect();
        assert!(!mock.is_connected());
        assert!(matches!(
            mock.transfer_out(MOCK_OUT_ENDPOINT, b"test", TIMEOUT),
            Err(TransportError::Disconnected)
        ));
    }

    #[test]
    fn test_unconfigured_device() {
        let mock = MockTransport::new();
        mock.set_configuration(None);
        assert_eq!(mock.active_configuration().unwrap(), None);
        mock.select_configuration(1).unwrap();
        assert!(mock.active_configuration().unwrap().is_some());
        assert_eq!(mock.calls(), vec!["select_configuration(1)".to_string()]);
    }
}
