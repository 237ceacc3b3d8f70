//! Odin protocol engine.
//!
//! [`OdinDevice`] owns the transport and drives every exchange. The
//! protocol is strictly half-duplex: each request is followed by its
//! response (or a timeout) before anything else is sent. The engine is not
//! internally synchronized; a single owner serializes all calls.

mod flash;
mod pit;
mod session;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::config::DeviceOptions;
use crate::error::{OdinError, Result};
use crate::events::{OdinEvent, OdinObserver, TracingObserver};
use crate::pit::PitData;
use crate::protocol::constants::{
    DEFAULT_CONFIGURATION, HANDSHAKE_REQUEST, HANDSHAKE_RESPONSE, HANDSHAKE_RESPONSE_LEN,
    USB_CLASS_CDC_DATA,
};
use crate::protocol::{InboundPacket, OutboundPacket, decode};
use crate::state::{DeviceState, FlashSession};
use crate::text::decode_nul_padded;
use crate::transport::{BoundedTransport, EmptyTransfer, TransportError, UsbTransport};

/// Handle returned by [`OdinDevice::on_disconnect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type DisconnectListener = Box<dyn FnOnce() + Send>;

/// Client side of one Odin connection.
pub struct OdinDevice<T: UsbTransport, O: OdinObserver = TracingObserver> {
    transport: BoundedTransport<T, O>,
    observer: Arc<O>,
    options: DeviceOptions,
    state: DeviceState,
    session: FlashSession,
    pit: Option<PitData>,
    listeners: Vec<(ListenerId, DisconnectListener)>,
    next_listener: u64,
}

impl<T: UsbTransport> OdinDevice<T, TracingObserver> {
    /// Create an engine that reports events through `tracing`.
    pub fn new(transport: T, options: DeviceOptions) -> Self {
        Self::with_observer(transport, options, Arc::new(TracingObserver))
    }
}

impl<T: UsbTransport, O: OdinObserver> OdinDevice<T, O> {
    /// Create an engine with a custom observer.
    pub fn with_observer(transport: T, options: DeviceOptions, observer: Arc<O>) -> Self {
        Self {
            transport: BoundedTransport::new(
                transport,
                Arc::clone(&observer),
                options.timeout(),
                options.empty_transfer_timeout(),
            ),
            observer,
            session: FlashSession::from_options(&options),
            options,
            state: DeviceState::Disconnected,
            pit: None,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn session(&self) -> &FlashSession {
        &self.session
    }

    pub fn options(&self) -> &DeviceOptions {
        &self.options
    }

    pub fn transport(&self) -> &T {
        self.transport.inner()
    }

    /// PIT cached by the last successful download.
    pub fn pit_data(&self) -> Option<&PitData> {
        self.pit.as_ref()
    }

    pub fn clear_pit_data(&mut self) {
        self.pit = None;
    }

    fn goto(&mut self, to: DeviceState) {
        if self.state == to {
            return;
        }
        info!(from = %self.state, to = %to, "State transition");
        self.observer.on_event(&OdinEvent::StateChanged {
            from: self.state,
            to,
        });
        self.state = to;
    }

    /// Open and claim the device, then perform the handshake.
    #[instrument(skip(self))]
    pub fn initialize(&mut self) -> Result<()> {
        self.transport.call("open", |t| t.open())?;

        let mut configuration = self
            .transport
            .call("active_configuration", |t| t.active_configuration())?;
        if configuration.is_none() {
            self.transport.call("select_configuration", |t| {
                t.select_configuration(DEFAULT_CONFIGURATION)
            })?;
            configuration = self
                .transport
                .call("active_configuration", |t| t.active_configuration())?;
        }
        let configuration = configuration.ok_or(TransportError::ConfigurationFailed {
            configuration: DEFAULT_CONFIGURATION,
            message: "device has no active configuration".into(),
        })?;

        let pair = configuration
            .find_bulk_pair(USB_CLASS_CDC_DATA)
            .ok_or(TransportError::EndpointNotFound)?;
        debug!(
            interface = pair.interface,
            alternate = pair.alternate,
            in_ep = %format!("0x{:02X}", pair.in_address),
            out_ep = %format!("0x{:02X}", pair.out_address),
            "Located bulk endpoints"
        );

        self.transport
            .call("claim_interface", |t| t.claim_interface(pair.interface))?;
        if pair.alternate != 0 {
            self.transport.call("select_alternate_interface", |t| {
                t.select_alternate_interface(pair.interface, pair.alternate)
            })?;
        }

        self.transport.set_endpoints(pair);
        self.goto(DeviceState::Opened);

        self.handshake()
    }

    /// Exchange the fixed `ODIN`/`LOKE` greeting.
    #[instrument(skip(self))]
    pub fn handshake(&mut self) -> Result<()> {
        self.require_endpoints()?;

        let result = self.greet();
        self.track(result)?;

        self.goto(DeviceState::Handshaked);
        let transport = self.transport.inner();
        self.observer.on_event(&OdinEvent::DeviceConnected {
            vid: transport.vendor_id(),
            pid: transport.product_id(),
        });
        Ok(())
    }

    fn greet(&self) -> Result<()> {
        if self.options.reset_on_init {
            self.transport.call("reset", |t| t.reset())?;
        }

        self.transport.send_raw("Handshake", HANDSHAKE_REQUEST, None)?;
        let reply = self
            .transport
            .receive_raw("Handshake", HANDSHAKE_RESPONSE_LEN, None)?;

        let received = decode_nul_padded(&reply);
        if received != HANDSHAKE_RESPONSE {
            return Err(OdinError::HandshakeMismatch { received });
        }
        Ok(())
    }

    /// Release the transport. The session is forgotten, not ended.
    pub fn close(&mut self) -> Result<()> {
        self.transport.call("close", |t| t.close())?;
        self.transport.clear_endpoints();
        self.session = FlashSession::from_options(&self.options);
        self.goto(DeviceState::Disconnected);
        Ok(())
    }

    /// Register a callback fired once when this device disconnects.
    pub fn on_disconnect<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnOnce() + Send + 'static,
    {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn remove_disconnect_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener, _)| *listener != id);
        self.listeners.len() != before
    }

    /// Deliver a disconnect notification. Notifications for other devices
    /// are ignored and return `false`.
    ///
    /// Every listener fires once and is unregistered; the session and the
    /// cached PIT are dropped.
    pub fn handle_disconnect(&mut self, device_id: &str) -> bool {
        if device_id != self.transport.inner().device_id() {
            return false;
        }

        warn!(device = device_id, "Device disconnected");
        for (_, listener) in self.listeners.drain(..) {
            listener();
        }
        self.session.active = false;
        self.pit = None;
        self.transport.clear_endpoints();
        self.goto(DeviceState::Disconnected);
        self.observer.on_event(&OdinEvent::DeviceDisconnected);
        true
    }

    /// Pass `result` through, invalidating the connection first if the
    /// transport reported that the device went away.
    fn track<R>(&mut self, result: Result<R>) -> Result<R> {
        let lost = matches!(&result, Err(e) if e.is_disconnect());
        if lost && self.state != DeviceState::Disconnected {
            let device_id = self.transport.inner().device_id();
            self.handle_disconnect(&device_id);
        }
        result
    }

    fn require_endpoints(&self) -> Result<()> {
        match self.transport.endpoints() {
            Some(_) => Ok(()),
            None => Err(OdinError::NotInitialized),
        }
    }

    fn send<P: OutboundPacket + ?Sized>(
        &self,
        packet: &P,
        timeout: Option<Duration>,
        empty: EmptyTransfer,
    ) -> Result<()> {
        self.require_endpoints()?;
        self.transport.send_packet(packet, timeout, empty)?;
        Ok(())
    }

    fn receive<P: InboundPacket>(
        &self,
        timeout: Option<Duration>,
        empty: EmptyTransfer,
    ) -> Result<P> {
        self.require_endpoints()?;
        let data = self
            .transport
            .receive_packet(P::NAME, P::SIZE.max_len(), timeout, empty)?;
        decode::<P>(&data).map_err(|source| OdinError::Packet {
            packet: P::NAME,
            source,
        })
    }
}
