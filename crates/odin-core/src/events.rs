//! Event system for UI decoupling.
//!
//! Allows CLI/GUI hosts to follow protocol progress without
//! tight coupling to the engine or to `tracing`.

use std::fmt;

use crate::state::DeviceState;

/// Long-running operations that report progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Downloading the PIT, counted in 500-byte parts.
    PitDownload,
    /// Uploading a file, counted in bytes.
    FileTransfer,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::PitDownload => write!(f, "PIT download"),
            Operation::FileTransfer => write!(f, "File transfer"),
        }
    }
}

/// Events emitted by the engine.
#[derive(Debug, Clone)]
pub enum OdinEvent {
    /// Device opened and answered the handshake.
    DeviceConnected { vid: u16, pid: u16 },
    /// Device went away; the session is gone.
    DeviceDisconnected,
    /// Engine state changed.
    StateChanged { from: DeviceState, to: DeviceState },
    /// Session negotiated with the device.
    SessionNegotiated {
        packet_size: u32,
        sequence_length: u32,
    },
    /// Progress update for current operation.
    Progress {
        operation: Operation,
        current: u64,
        total: u64,
    },
    /// USB Packet sent/received.
    Packet {
        direction: PacketDirection,
        packet_type: &'static str,
        length: usize,
        data: Option<Vec<u8>>,
    },
    /// An advisory call failed and was ignored.
    AdvisoryFailed { context: &'static str, message: String },
    /// Operation completed successfully.
    Complete { operation: Operation },
}

/// USB packet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Transmit (Host -> Device)
    Rx, // Receive (Device -> Host)
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Observer trait for receiving engine events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait OdinObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &OdinEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl OdinObserver for NullObserver {
    fn on_event(&self, _event: &OdinEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl OdinObserver for TracingObserver {
    fn on_event(&self, event: &OdinEvent) {
        match event {
            OdinEvent::DeviceConnected { vid, pid } => {
                tracing::info!(vid = %format!("{:04X}", vid), pid = %format!("{:04X}", pid), "Device connected");
            }
            OdinEvent::DeviceDisconnected => {
                tracing::warn!("Device disconnected");
            }
            OdinEvent::StateChanged { from, to } => {
                tracing::debug!(from = %from, to = %to, "State changed");
            }
            OdinEvent::SessionNegotiated {
                packet_size,
                sequence_length,
            } => {
                tracing::info!(packet_size, sequence_length, "Session negotiated");
            }
            OdinEvent::Progress {
                operation,
                current,
                total,
            } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    0
                };
                tracing::debug!(operation = %operation, progress = %format!("{}%", pct), "Progress");
            }
            OdinEvent::Packet {
                direction,
                packet_type,
                length,
                ..
            } => {
                tracing::trace!(
                    dir = %direction,
                    type_ = %packet_type,
                    len = length,
                    "USB Packet"
                );
            }
            OdinEvent::AdvisoryFailed { context, message } => {
                tracing::debug!(context, "Advisory call failed: {}", message);
            }
            OdinEvent::Complete { operation } => {
                tracing::info!(operation = %operation, "Operation complete");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Observer that keeps every event for later inspection.
    #[derive(Default)]
    pub struct RecordingObserver {
        events: Mutex<Vec<OdinEvent>>,
    }

    impl RecordingObserver {
        pub fn events(&self) -> Vec<OdinEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl OdinObserver for RecordingObserver {
        fn on_event(&self, event: &OdinEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }
}
