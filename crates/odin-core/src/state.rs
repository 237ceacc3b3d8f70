//! Engine state and session bookkeeping.

use std::fmt;
use std::time::Duration;

use crate::config::DeviceOptions;

/// Lifecycle of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceState {
    /// Initial state, and where every disconnect lands.
    #[default]
    Disconnected,
    /// Transport opened and interface claimed.
    Opened,
    /// Device answered the handshake.
    Handshaked,
    SessionActive,
    /// A file transfer is in flight.
    Transferring,
    SessionEnded,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Disconnected => write!(f, "DISCONNECTED"),
            DeviceState::Opened => write!(f, "OPENED"),
            DeviceState::Handshaked => write!(f, "HANDSHAKED"),
            DeviceState::SessionActive => write!(f, "SESSION_ACTIVE"),
            DeviceState::Transferring => write!(f, "TRANSFERRING"),
            DeviceState::SessionEnded => write!(f, "SESSION_ENDED"),
        }
    }
}

/// Flash parameters, renegotiated at every session start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashSession {
    pub active: bool,
    /// Bytes per part.
    pub packet_size: u32,
    /// Parts per sequence.
    pub sequence_length: u32,
    /// Per-packet deadline for flash exchanges.
    pub flash_timeout_ms: u64,
}

impl FlashSession {
    /// Inactive session with the configured pre-negotiation defaults.
    pub fn from_options(options: &DeviceOptions) -> Self {
        Self {
            active: false,
            packet_size: options.sequence_defaults.packet_size(),
            sequence_length: options.sequence_defaults.sequence_length(),
            flash_timeout_ms: options.flash_timeout_ms,
        }
    }

    pub fn flash_timeout(&self) -> Duration {
        Duration::from_millis(self.flash_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SequenceDefaults;

    #[test]
    fn test_session_defaults_follow_options() {
        let options = DeviceOptions {
            sequence_defaults: SequenceDefaults::Compact,
            ..Default::default()
        };
        let session = FlashSession::from_options(&options);
        assert!(!session.active);
        assert_eq!(session.packet_size, 131_072);
        assert_eq!(session.sequence_length, 240);
        assert_eq!(session.flash_timeout(), Duration::from_secs(30));
    }
}
