//! Odin-Core: Samsung Odin download-mode protocol implementation in Rust.
//!
//! This crate talks to Samsung devices in download mode over USB: it
//! performs the handshake, negotiates a flash session, downloads the
//! partition table (PIT) and uploads partition images.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants and the fixed-layout packet codec
//! - **PIT**: Partition Information Table codec
//! - **Transport**: USB abstraction (nusb, mock) and the deadline wrapper
//! - **Transfer**: Sequence and part arithmetic for uploads
//! - **Device**: The protocol engine and its state machine
//! - **Events**: Observer pattern for UI decoupling
//!
//! # Example
//!
//! ```no_run
//! use odin_core::{DeviceOptions, NusbTransport, OdinDevice};
//!
//! let transport = NusbTransport::find().expect("no device in download mode");
//! let mut device = OdinDevice::new(transport, DeviceOptions::default());
//! device.initialize().expect("handshake failed");
//!
//! let kernel = std::fs::read("zImage").expect("read image");
//! device.flash_partition("KERNEL", &kernel).expect("flash failed");
//! device.reboot().expect("reboot failed");
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod pit;
pub mod protocol;
pub mod state;
pub mod text;
pub mod transfer;
pub mod transport;

// Re-exports for convenience
pub use config::{DeviceOptions, SequenceDefaults};
pub use device::{ListenerId, OdinDevice};
pub use error::{ErrorKind, OdinError, Result};
pub use events::{NullObserver, OdinEvent, OdinObserver, Operation, TracingObserver};
pub use pit::{PitData, PitEntry, PitError, PitHeader, PitHeaderLayout};
pub use protocol::{FileTransferDestination, PacketError};
pub use state::{DeviceState, FlashSession};
pub use transfer::TransferPlan;
pub use transport::{MockTransport, NusbTransport, TransportError, UsbTransport};
