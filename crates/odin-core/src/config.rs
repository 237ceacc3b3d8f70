//! Engine configuration.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::pit::PitHeaderLayout;
use crate::protocol::constants::{
    COMPACT_SEQUENCE_LENGTH, DEFAULT_PACKET_SIZE, STANDARD_SEQUENCE_LENGTH,
};

/// Packet size and sequence length used until the device negotiates
/// larger packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SequenceDefaults {
    /// 128 KiB packets, 800 parts per sequence.
    #[default]
    Standard,
    /// 128 KiB packets, 240 parts per sequence.
    Compact,
}

impl SequenceDefaults {
    pub fn packet_size(self) -> u32 {
        DEFAULT_PACKET_SIZE
    }

    pub fn sequence_length(self) -> u32 {
        match self {
            SequenceDefaults::Standard => STANDARD_SEQUENCE_LENGTH,
            SequenceDefaults::Compact => COMPACT_SEQUENCE_LENGTH,
        }
    }
}

/// Options for a [`crate::OdinDevice`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceOptions {
    /// Default deadline for every transport call.
    pub timeout_ms: u64,
    /// Deadline for empty-packet sends and receives.
    pub empty_transfer_timeout_ms: u64,
    /// Per-packet deadline for flash exchanges.
    pub flash_timeout_ms: u64,
    /// Flash deadline once the device supports packet-size negotiation.
    pub negotiated_flash_timeout_ms: u64,
    /// Reset the device before the handshake. Some host USB stacks need it.
    pub reset_on_init: bool,
    pub sequence_defaults: SequenceDefaults,
    pub pit_layout: PitHeaderLayout,
    /// Await one more transfer acknowledgement after the last sequence.
    pub final_transfer_ack: bool,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            empty_transfer_timeout_ms: 100,
            flash_timeout_ms: 30_000,
            negotiated_flash_timeout_ms: 120_000,
            reset_on_init: false,
            sequence_defaults: SequenceDefaults::default(),
            pit_layout: PitHeaderLayout::default(),
            final_transfer_ack: true,
        }
    }
}

impl DeviceOptions {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DeviceOptions = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn empty_transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.empty_transfer_timeout_ms)
    }
}
