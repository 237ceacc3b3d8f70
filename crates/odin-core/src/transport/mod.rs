//! Transport layer module.

pub mod bounded;
pub mod mock;
pub mod nusb;
pub mod traits;

pub use bounded::{Advisory, BoundedTransport, EmptyTransfer};
pub use mock::MockTransport;
pub use nusb::NusbTransport;
pub use traits::{
    ConfigurationInfo, Direction, EndpointInfo, EndpointKind, EndpointPair, InterfaceInfo,
    TransportError, UsbTransport,
};
