//! Deadline wrapper around a [`UsbTransport`].
//!
//! Every transfer gets either the default deadline or an explicit one. A
//! call that reports a timeout, or that returns only after its deadline
//! has passed, fails with [`TransportError::Timeout`]. Nothing is retried.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::traits::{EndpointPair, TransportError, UsbTransport};
use crate::events::{OdinEvent, OdinObserver, PacketDirection};
use crate::protocol::OutboundPacket;

/// Bytes requested by an empty-packet receive.
pub const EMPTY_RECEIVE_LEN: usize = 1;

/// Bytes of each packet copied into packet events.
const EVENT_PREVIEW_LEN: usize = 32;

/// Zero-length packets to exchange around a send or receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyTransfer {
    None,
    Before,
    After,
    Both,
}

impl EmptyTransfer {
    pub fn before(self) -> bool {
        matches!(self, EmptyTransfer::Before | EmptyTransfer::Both)
    }

    pub fn after(self) -> bool {
        matches!(self, EmptyTransfer::After | EmptyTransfer::Both)
    }
}

/// Outcome of a best-effort call. Its failure never aborts the caller,
/// but it has to be consumed explicitly.
#[must_use = "advisory results must be discarded explicitly"]
#[derive(Debug)]
pub struct Advisory<E = TransportError>(Result<(), E>);

impl<E: fmt::Display> Advisory<E> {
    pub fn is_ok(&self) -> bool {
        self.0.is_ok()
    }

    /// Drop the result, logging a failure under `context`.
    pub fn discard(self, context: &'static str) {
        if let Err(e) = self.0 {
            warn!(context, error = %e, "Advisory call failed, continuing");
        }
    }

    pub fn into_result(self) -> Result<(), E> {
        self.0
    }
}

impl<E> From<Result<(), E>> for Advisory<E> {
    fn from(result: Result<(), E>) -> Self {
        Advisory(result)
    }
}

/// Transport plus endpoint pair, with every call bounded by a deadline.
pub struct BoundedTransport<T: UsbTransport, O: OdinObserver> {
    inner: T,
    observer: Arc<O>,
    endpoints: Option<EndpointPair>,
    default_timeout: Duration,
    empty_timeout: Duration,
}

impl<T: UsbTransport, O: OdinObserver> BoundedTransport<T, O> {
    pub fn new(
        inner: T,
        observer: Arc<O>,
        default_timeout: Duration,
        empty_timeout: Duration,
    ) -> Self {
        Self {
            inner,
            observer,
            endpoints: None,
            default_timeout,
            empty_timeout,
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Record the endpoint pair resolved during initialization.
    pub fn set_endpoints(&mut self, endpoints: EndpointPair) {
        self.endpoints = Some(endpoints);
    }

    pub fn clear_endpoints(&mut self) {
        self.endpoints = None;
    }

    pub fn endpoints(&self) -> Option<EndpointPair> {
        self.endpoints
    }

    fn pair(&self) -> Result<EndpointPair, TransportError> {
        self.endpoints.ok_or(TransportError::EndpointNotFound)
    }

    /// Run a non-transfer transport call under the default deadline.
    pub fn call<R>(
        &self,
        what: &'static str,
        f: impl FnOnce(&T) -> Result<R, TransportError>,
    ) -> Result<R, TransportError> {
        let timeout = self.default_timeout;
        bounded(what, timeout, || f(&self.inner))
    }

    /// Write raw bytes to the OUT endpoint.
    pub fn send_raw(
        &self,
        packet_type: &'static str,
        data: &[u8],
        timeout: Option<Duration>,
    ) -> Result<(), TransportError> {
        let endpoint = self.pair()?.out_address;
        let timeout = timeout.unwrap_or(self.default_timeout);

        let written = bounded(packet_type, timeout, || {
            self.inner.transfer_out(endpoint, data, timeout)
        })?;
        if written != data.len() {
            return Err(TransportError::WriteFailed(format!(
                "short write: {written} of {} bytes",
                data.len()
            )));
        }

        self.emit(PacketDirection::Tx, packet_type, data);
        Ok(())
    }

    /// Read at most `max_len` bytes from the IN endpoint.
    pub fn receive_raw(
        &self,
        packet_type: &'static str,
        max_len: usize,
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, TransportError> {
        let endpoint = self.pair()?.in_address;
        let timeout = timeout.unwrap_or(self.default_timeout);

        let data = bounded(packet_type, timeout, || {
            self.inner.transfer_in(endpoint, max_len, timeout)
        })?;

        self.emit(PacketDirection::Rx, packet_type, &data);
        Ok(data)
    }

    /// Encode and send a packet, with optional empty sends around it.
    pub fn send_packet<P: OutboundPacket + ?Sized>(
        &self,
        packet: &P,
        timeout: Option<Duration>,
        empty: EmptyTransfer,
    ) -> Result<(), TransportError> {
        if empty.before() {
            self.empty_send().discard("empty send before packet");
        }

        debug!(packet = packet.name(), "Sending packet");
        self.send_raw(packet.name(), &packet.to_bytes(), timeout)?;

        if empty.after() {
            self.empty_send().discard("empty send after packet");
        }
        Ok(())
    }

    /// Receive a response, with optional empty receives around it.
    pub fn receive_packet(
        &self,
        packet_type: &'static str,
        max_len: usize,
        timeout: Option<Duration>,
        empty: EmptyTransfer,
    ) -> Result<Vec<u8>, TransportError> {
        if empty.before() {
            self.empty_receive().discard("empty receive before packet");
        }

        let data = self.receive_raw(packet_type, max_len, timeout)?;
        debug!(packet = packet_type, len = data.len(), "Received packet");

        if empty.after() {
            self.empty_receive().discard("empty receive after packet");
        }
        Ok(data)
    }

    /// Send a zero-length packet.
    pub fn empty_send(&self) -> Advisory {
        let result = self.pair().and_then(|pair| {
            bounded("empty send", self.empty_timeout, || {
                self.inner
                    .transfer_out(pair.out_address, &[], self.empty_timeout)
            })
            .map(|_| ())
        });
        self.advisory("empty send", result)
    }

    /// Wait briefly for a zero-length packet from the device.
    pub fn empty_receive(&self) -> Advisory {
        let result = self.pair().and_then(|pair| {
            bounded("empty receive", self.empty_timeout, || {
                self.inner
                    .transfer_in(pair.in_address, EMPTY_RECEIVE_LEN, self.empty_timeout)
            })
            .map(|_| ())
        });
        self.advisory("empty receive", result)
    }

    fn advisory(&self, context: &'static str, result: Result<(), TransportError>) -> Advisory {
        if let Err(e) = &result {
            self.observer.on_event(&OdinEvent::AdvisoryFailed {
                context,
                message: e.to_string(),
            });
        }
        Advisory::from(result)
    }

    fn emit(&self, direction: PacketDirection, packet_type: &'static str, data: &[u8]) {
        trace!(dir = %direction, len = data.len(), "Transfer complete");
        self.observer.on_event(&OdinEvent::Packet {
            direction,
            packet_type,
            length: data.len(),
            data: Some(data.iter().take(EVENT_PREVIEW_LEN).copied().collect()),
        });
    }
}

/// Run `f` and turn a late return into a timeout.
fn bounded<R>(
    what: &'static str,
    timeout: Duration,
    f: impl FnOnce() -> Result<R, TransportError>,
) -> Result<R, TransportError> {
    let started = Instant::now();
    let result = f();
    let elapsed = started.elapsed();

    match result {
        Err(TransportError::Timeout { .. }) => Err(TransportError::timeout(timeout)),
        Ok(_) if elapsed > timeout => {
            debug!(what, elapsed_ms = elapsed.as_millis() as u64, "Deadline overrun");
            Err(TransportError::timeout(timeout))
        }
        other => other,
    }
}
