//! # Device Configuration
//!
//! Start-time settings. The buffering mode and maximum transfer length are
//! fixed for the life of the device; the transfer profile is only the initial
//! value and can be changed later through the control interface.

use core::fmt;

use hsac_core::{
    Error, Result, TransferProfile, DEFAULT_MAX_TRANSFER_LENGTH, DEFAULT_SLOT_COUNT, PHYS_BUFFER_WINDOW,
};
use hsac_memory::BufferingMode;

/// Device configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Longest single transfer, and the size of each buffer slot
    pub max_transfer_length: usize,
    /// How the buffer pool lays out its slots
    pub buffering: BufferingMode,
    /// Initial transfer profile
    pub profile: TransferProfile,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            max_transfer_length: DEFAULT_MAX_TRANSFER_LENGTH,
            buffering: BufferingMode::MultiDiscrete {
                slots: DEFAULT_SLOT_COUNT,
            },
            profile: TransferProfile::ScatterGather,
        }
    }
}

impl DeviceConfig {
    /// Set the maximum transfer length
    pub fn with_max_transfer_length(mut self, len: usize) -> Self {
        self.max_transfer_length = len;
        self
    }

    /// Set the buffering mode
    pub fn with_buffering(mut self, buffering: BufferingMode) -> Self {
        self.buffering = buffering;
        self
    }

    /// Set the initial transfer profile
    pub fn with_profile(mut self, profile: TransferProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Check the configuration and normalize it
    ///
    /// A zero length or slot count is a `ConfigurationError`. Lengths beyond
    /// the device's physical buffer window are clamped to it.
    pub fn validate(self) -> Result<Self> {
        if self.max_transfer_length == 0 {
            log::error!("HSAC config: maximum transfer length is zero");
            return Err(Error::ConfigurationError);
        }
        self.buffering.validate()?;

        let mut config = self;
        if config.max_transfer_length > PHYS_BUFFER_WINDOW {
            log::warn!(
                "HSAC config: maximum transfer length {} clamped to {}",
                config.max_transfer_length,
                PHYS_BUFFER_WINDOW
            );
            config.max_transfer_length = PHYS_BUFFER_WINDOW;
        }
        Ok(config)
    }
}

impl fmt::Display for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "max transfer {} bytes, {}, {:?} profile",
            self.max_transfer_length, self.buffering, self.profile
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DeviceConfig::default();
        assert_eq!(config.max_transfer_length, 8 * 1024 * 1024);
        assert_eq!(config.buffering, BufferingMode::MultiDiscrete { slots: 64 });
        assert_eq!(config.profile, TransferProfile::ScatterGather);
        assert_eq!(config.validate(), Ok(config));
    }

    #[test]
    fn test_validation() {
        let zero = DeviceConfig::default().with_max_transfer_length(0);
        assert_eq!(zero.validate(), Err(Error::ConfigurationError));

        let no_slots = DeviceConfig::default().with_buffering(BufferingMode::PingPong { slots: 0 });
        assert_eq!(no_slots.validate(), Err(Error::ConfigurationError));

        let huge = DeviceConfig::default()
            .with_max_transfer_length(4 * PHYS_BUFFER_WINDOW)
            .with_profile(TransferProfile::Packet)
            .validate()
            .unwrap();
        assert_eq!(huge.max_transfer_length, PHYS_BUFFER_WINDOW);
        assert_eq!(huge.profile, TransferProfile::Packet);
    }
}
