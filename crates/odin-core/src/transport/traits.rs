//! USB Transport layer abstraction.
//!
//! Defines the `UsbTransport` trait for bulk USB communication,
//! allowing different implementations (nusb, mock, etc.).

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Device is not open")]
    NotOpen,

    #[error("Failed to select configuration {configuration}: {message}")]
    ConfigurationFailed { configuration: u8, message: String },

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Failed to select alternate setting {alternate} on interface {interface}: {message}")]
    AlternateSettingFailed {
        interface: u8,
        alternate: u8,
        message: String,
    },

    #[error("Unable to locate the bulk command endpoints")]
    EndpointNotFound,

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Reset failed: {0}")]
    ResetFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    pub fn timeout(timeout: Duration) -> Self {
        TransportError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

/// Endpoint direction, from the host's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// Snapshot of one endpoint descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    pub address: u8,
    pub direction: Direction,
    pub kind: EndpointKind,
    pub max_packet_size: usize,
}

/// Snapshot of one interface alternate setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub class: u8,
    pub endpoints: Vec<EndpointInfo>,
}

/// Snapshot of the active configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationInfo {
    pub value: u8,
    pub interfaces: Vec<InterfaceInfo>,
}

/// Interface, alternate and endpoint addresses used for every exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointPair {
    pub interface: u8,
    pub alternate: u8,
    pub in_address: u8,
    pub out_address: u8,
}

impl ConfigurationInfo {
    /// First alternate of `class` that has exactly two endpoints, one bulk
    /// IN and one bulk OUT.
    pub fn find_bulk_pair(&self, class: u8) -> Option<EndpointPair> {
        self.interfaces.iter().find_map(|alt| {
            if alt.class != class || alt.endpoints.len() != 2 {
                return None;
            }
            let address = |direction| {
                alt.endpoints
                    .iter()
                    .find(|ep| ep.direction == direction && ep.kind == EndpointKind::Bulk)
                    .map(|ep| ep.address)
            };
            Some(EndpointPair {
                interface: alt.interface_number,
                alternate: alt.alternate_setting,
                in_address: address(Direction::In)?,
                out_address: address(Direction::Out)?,
            })
        })
    }
}

/// Abstract USB transport interface.
///
/// Every method takes `&self`; implementations keep their handles behind
/// interior mutability so a transport can be shared with a disconnect
/// watcher. Transfers take an explicit timeout and must report expiry as
/// [`TransportError::Timeout`].
pub trait UsbTransport: Send + Sync {
    /// Open a handle to the device.
    fn open(&self) -> Result<(), TransportError>;

    /// Descriptor snapshot of the active configuration, `None` if the
    /// device is unconfigured.
    fn active_configuration(&self) -> Result<Option<ConfigurationInfo>, TransportError>;

    fn select_configuration(&self, configuration: u8) -> Result<(), TransportError>;

    fn claim_interface(&self, interface: u8) -> Result<(), TransportError>;

    fn select_alternate_interface(&self, interface: u8, alternate: u8)
    -> Result<(), TransportError>;

    /// Write `data` to a bulk OUT endpoint. An empty slice sends a
    /// zero-length packet.
    fn transfer_out(
        &self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    /// Read at most `max_len` bytes from a bulk IN endpoint.
    fn transfer_in(
        &self,
        endpoint: u8,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError>;

    fn reset(&self) -> Result<(), TransportError>;

    /// Release the interface and the device handle.
    fn close(&self) -> Result<(), TransportError>;

    /// Check if device is still connected.
    fn is_connected(&self) -> bool;

    /// Stable identity used to match disconnect notifications.
    fn device_id(&self) -> String;

    /// Get the current VID.
    fn vendor_id(&self) -> u16;

    /// Get the current PID.
    fn product_id(&self) -> u16;
}
