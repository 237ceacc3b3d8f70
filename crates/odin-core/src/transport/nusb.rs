//! nusb-based USB transport implementation.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nusb::descriptors::TransferType;
use nusb::transfer::{Bulk, Direction as UsbDirection, In, Out, TransferError};
use nusb::{Device, DeviceInfo, Endpoint, Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument, trace};

use super::traits::{
    ConfigurationInfo, Direction, EndpointInfo, EndpointKind, InterfaceInfo, TransportError,
    UsbTransport,
};
use crate::protocol::constants::{SAMSUNG_VENDOR_ID, SUPPORTED_PIDS};

/// How long to wait for a cancelled transfer to be handed back.
const CANCEL_DRAIN_TIMEOUT: Duration = Duration::from_millis(100);

struct ClaimedInterface {
    interface: Interface,
    out_endpoint: Option<Endpoint<Bulk, Out>>,
    in_endpoint: Option<Endpoint<Bulk, In>>,
}

impl ClaimedInterface {
    fn out_endpoint(&mut self, address: u8) -> Result<&mut Endpoint<Bulk, Out>, TransportError> {
        if self
            .out_endpoint
            .as_ref()
            .is_none_or(|ep| ep.endpoint_address() != address)
        {
            self.out_endpoint = None;
            let ep = self
                .interface
                .endpoint::<Bulk, Out>(address)
                .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
            self.out_endpoint = Some(ep);
        }
        self.out_endpoint.as_mut().ok_or(TransportError::EndpointNotFound)
    }

    fn in_endpoint(&mut self, address: u8) -> Result<&mut Endpoint<Bulk, In>, TransportError> {
        if self
            .in_endpoint
            .as_ref()
            .is_none_or(|ep| ep.endpoint_address() != address)
        {
            self.in_endpoint = None;
            let ep = self
                .interface
                .endpoint::<Bulk, In>(address)
                .map_err(|e| TransportError::ReadFailed(e.to_string()))?;
            self.in_endpoint = Some(ep);
        }
        self.in_endpoint.as_mut().ok_or(TransportError::EndpointNotFound)
    }
}

#[derive(Default)]
struct Handles {
    device: Option<Device>,
    claimed: Option<ClaimedInterface>,
}

impl Handles {
    fn device(&self) -> Result<&Device, TransportError> {
        self.device.as_ref().ok_or(TransportError::NotOpen)
    }

    fn claimed(&mut self) -> Result<&mut ClaimedInterface, TransportError> {
        self.claimed.as_mut().ok_or(TransportError::NotOpen)
    }
}

/// nusb-based USB transport.
///
/// Discovery only records the device; nothing is opened until
/// [`UsbTransport::open`] is called.
pub struct NusbTransport {
    info: DeviceInfo,
    handles: Mutex<Handles>,
}

impl NusbTransport {
    /// Every attached device in download mode.
    pub fn detect() -> Result<Vec<Self>, TransportError> {
        let devices = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        Ok(devices
            .filter(|d| {
                d.vendor_id() == SAMSUNG_VENDOR_ID && SUPPORTED_PIDS.contains(&d.product_id())
            })
            .map(Self::from_info)
            .collect())
    }

    /// First Samsung device in download mode (tries all supported PIDs).
    #[instrument(level = "info")]
    pub fn find() -> Result<Self, TransportError> {
        Self::detect()?
            .into_iter()
            .next()
            .ok_or(TransportError::DeviceNotFound {
                vid: SAMSUNG_VENDOR_ID,
                pid: 0,
            })
    }

    /// Find a device with specific VID/PID.
    #[instrument(level = "info", fields(vid = format!("{:04X}", vid), pid = format!("{:04X}", pid)))]
    pub fn find_with_ids(vid: u16, pid: u16) -> Result<Self, TransportError> {
        let device_info = list_devices()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?
            .find(|d| d.vendor_id() == vid && d.product_id() == pid)
            .ok_or(TransportError::DeviceNotFound { vid, pid })?;

        Ok(Self::from_info(device_info))
    }

    fn from_info(info: DeviceInfo) -> Self {
        info!(
            vendor_id = %format!("{:04X}", info.vendor_id()),
            product_id = %format!("{:04X}", info.product_id()),
            "Found device"
        );
        Self {
            info,
            handles: Mutex::new(Handles::default()),
        }
    }

    /// Product string reported by the device, if any.
    pub fn product_string(&self) -> Option<String> {
        self.info.product_string().map(str::to_string)
    }

    fn handles(&self) -> MutexGuard<'_, Handles> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn map_transfer_error(err: TransferError, fail: fn(String) -> TransportError) -> TransportError {
    match err {
        TransferError::Disconnected => TransportError::Disconnected,
        other => fail(other.to_string()),
    }
}

fn endpoint_kind(transfer_type: TransferType) -> EndpointKind {
    match transfer_type {
        TransferType::Control => EndpointKind::Control,
        TransferType::Isochronous => EndpointKind::Isochronous,
        TransferType::Bulk => EndpointKind::Bulk,
        TransferType::Interrupt => EndpointKind::Interrupt,
    }
}

impl UsbTransport for NusbTransport {
    #[instrument(skip(self))]
    fn open(&self) -> Result<(), TransportError> {
        let device = self
            .info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;
        self.handles().device = Some(device);
        debug!("Device handle opened");
        Ok(())
    }

    fn active_configuration(&self) -> Result<Option<ConfigurationInfo>, TransportError> {
        let handles = self.handles();
        let device = handles.device()?;
        let Ok(config) = device.active_configuration() else {
            return Ok(None);
        };

        let mut interfaces = Vec::new();
        for iface in config.interfaces() {
            for alt in iface.alt_settings() {
                interfaces.push(InterfaceInfo {
                    interface_number: alt.interface_number(),
                    alternate_setting: alt.alternate_setting(),
                    class: alt.class(),
                    endpoints: alt
                        .endpoints()
                        .map(|ep| EndpointInfo {
                            address: ep.address(),
                            direction: match ep.direction() {
                                UsbDirection::In => Direction::In,
                                UsbDirection::Out => Direction::Out,
                            },
                            kind: endpoint_kind(ep.transfer_type()),
                            max_packet_size: ep.max_packet_size(),
                        })
                        .collect(),
                });
            }
        }

        Ok(Some(ConfigurationInfo {
            value: config.configuration_value(),
            interfaces,
        }))
    }

    fn select_configuration(&self, configuration: u8) -> Result<(), TransportError> {
        let handles = self.handles();
        handles
            .device()?
            .set_configuration(configuration)
            .wait()
            .map_err(|e| TransportError::ConfigurationFailed {
                configuration,
                message: e.to_string(),
            })
    }

    #[instrument(skip(self))]
    fn claim_interface(&self, interface: u8) -> Result<(), TransportError> {
        let mut handles = self.handles();
        let claimed = handles
            .device()?
            .detach_and_claim_interface(interface)
            .wait()
            .map_err(|e| TransportError::ClaimInterfaceFailed {
                interface,
                message: e.to_string(),
            })?;
        handles.claimed = Some(ClaimedInterface {
            interface: claimed,
            out_endpoint: None,
            in_endpoint: None,
        });
        Ok(())
    }

    fn select_alternate_interface(
        &self,
        interface: u8,
        alternate: u8,
    ) -> Result<(), TransportError> {
        let mut handles = self.handles();
        let claimed = handles.claimed()?;
        if claimed.interface.interface_number() != interface {
            return Err(TransportError::AlternateSettingFailed {
                interface,
                alternate,
                message: "interface not claimed".into(),
            });
        }
        claimed
            .interface
            .set_alt_setting(alternate)
            .wait()
            .map_err(|e| TransportError::AlternateSettingFailed {
                interface,
                alternate,
                message: e.to_string(),
            })
    }

    #[instrument(level = "trace", skip(self, data), fields(len = data.len()))]
    fn transfer_out(
        &self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let mut handles = self.handles();
        let ep = handles.claimed()?.out_endpoint(endpoint)?;

        let mut buffer = ep.allocate(data.len());
        buffer.extend_from_slice(data);
        ep.submit(buffer);

        let Some(completion) = ep.wait_next_complete(timeout) else {
            ep.cancel_all();
            let _ = ep.wait_next_complete(CANCEL_DRAIN_TIMEOUT);
            return Err(TransportError::timeout(timeout));
        };
        completion
            .status
            .map_err(|e| map_transfer_error(e, TransportError::WriteFailed))?;

        trace!(bytes_written = completion.actual_len, "Write complete");
        Ok(completion.actual_len)
    }

    #[instrument(level = "trace", skip(self))]
    fn transfer_in(
        &self,
        endpoint: u8,
        max_len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let mut handles = self.handles();
        let ep = handles.claimed()?.in_endpoint(endpoint)?;

        // IN requests must be a whole number of max-size packets.
        let packet = ep.max_packet_size().max(1);
        let request_len = max_len.div_ceil(packet).max(1) * packet;
        let buffer = ep.allocate(request_len);
        ep.submit(buffer);

        let Some(completion) = ep.wait_next_complete(timeout) else {
            ep.cancel_all();
            let _ = ep.wait_next_complete(CANCEL_DRAIN_TIMEOUT);
            return Err(TransportError::timeout(timeout));
        };
        completion
            .status
            .map_err(|e| map_transfer_error(e, TransportError::ReadFailed))?;

        // Overlong replies are passed through whole so the decoder rejects them.
        let received = completion.actual_len;
        if received > max_len {
            debug!(bytes_read = received, max_len, "Read exceeded requested length");
        }
        trace!(bytes_read = received, "Read complete");
        Ok(completion.buffer[..received].to_vec())
    }

    fn reset(&self) -> Result<(), TransportError> {
        let handles = self.handles();
        handles
            .device()?
            .reset()
            .wait()
            .map_err(|e| TransportError::ResetFailed(e.to_string()))
    }

    fn close(&self) -> Result<(), TransportError> {
        let mut handles = self.handles();
        handles.claimed = None;
        handles.device = None;
        debug!("Device handle closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        // nusb has no direct liveness check; a disconnected device surfaces
        // as a transfer error instead.
        self.handles().device.is_some()
    }

    fn device_id(&self) -> String {
        format!("{:?}", self.info.id())
    }

    fn vendor_id(&self) -> u16 {
        self.info.vendor_id()
    }

    fn product_id(&self) -> u16 {
        self.info.product_id()
    }
}
