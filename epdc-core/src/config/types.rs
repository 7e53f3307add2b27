//! Configuration type definitions

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::geometry::{PanelGeometry, Rotation};
use crate::waveform::WaveformModes;

/// Current configuration layout version
pub const CONFIG_VERSION: u8 = 1;

/// Default delay between going idle and cutting panel power
pub const DEFAULT_POWER_DOWN_DELAY_MS: u32 = 80;

/// Default number of consecutive failed power-ups before lockout
pub const DEFAULT_LOCKOUT_THRESHOLD: u8 = 3;

/// How admitted requests reach the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum UpdateScheme {
    /// Process pixels at admission, dispatch in order without merging
    Snapshot,
    /// Queue and dispatch one at a time without merging
    Queue,
    /// Queue and fold compatible requests together
    #[default]
    QueueAndMerge,
}

impl UpdateScheme {
    pub fn merges(self) -> bool {
        self == UpdateScheme::QueueAndMerge
    }
}

/// When to cut panel power after the engine goes idle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PowerDownPolicy {
    /// Keep the panel powered
    Disabled,
    /// Power down after this many milliseconds of idleness
    AfterMs(u32),
}

impl Default for PowerDownPolicy {
    fn default() -> Self {
        PowerDownPolicy::AfterMs(DEFAULT_POWER_DOWN_DELAY_MS)
    }
}

/// Bounded waits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Timeouts {
    /// Co-processor job completion
    pub pipeline_ms: u32,
    /// Frame-end pulse before programming next to a busy last unit
    pub frame_end_ms: u32,
    /// Waiting for a unit or the working buffer before resyncing
    pub resource_ms: u32,
    /// Drain before whitening or reconfiguration
    pub drain_ms: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            pipeline_ms: 500,
            frame_end_ms: 1000,
            resource_ms: 1000,
            drain_ms: 10_000,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EngineConfig {
    /// Config layout version
    pub version: u8,
    /// Native panel resolution
    pub panel: PanelGeometry,
    /// Framebuffer pixel size
    pub bytes_per_pixel: u8,
    /// Physical address of the framebuffer
    pub framebuffer_addr: u32,
    /// Physical address of the first processing buffer
    pub buffer_base: u32,
    /// Distance between processing buffers in bytes
    pub buffer_stride: u32,
    /// Hardware index of each waveform mode
    pub waveform_modes: WaveformModes,
    pub scheme: UpdateScheme,
    pub rotation: Rotation,
    pub power_down: PowerDownPolicy,
    /// Consecutive failed power-ups before the supply is locked out
    pub lockout_threshold: u8,
    /// Wait for the last unit instead of programming beside it
    pub avoid_last_unit: bool,
    /// Panel expects inverted gray levels
    pub grayscale_inverted: bool,
    pub timeouts: Timeouts,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            panel: PanelGeometry {
                width: 800,
                height: 600,
            },
            bytes_per_pixel: 2,
            framebuffer_addr: 0x8000_0000,
            buffer_base: 0x8800_0000,
            buffer_stride: 800 * 600,
            waveform_modes: WaveformModes::default(),
            scheme: UpdateScheme::default(),
            rotation: Rotation::Upright,
            power_down: PowerDownPolicy::default(),
            lockout_threshold: DEFAULT_LOCKOUT_THRESHOLD,
            avoid_last_unit: true,
            grayscale_inverted: false,
            timeouts: Timeouts::default(),
        }
    }
}

/// Configuration consistency errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Blob could not be decoded
    Deserialize,
    /// Blob could not be encoded into the given buffer
    Serialize,
    /// Layout version does not match this build
    VersionMismatch,
    /// Panel has zero width or height
    EmptyPanel,
    /// Framebuffer pixel size is not 1, 2 or 4 bytes
    UnsupportedPixelSize,
    /// Processing buffers cannot hold a full panel frame
    BufferTooSmall,
    /// A full panel frame does not fit a 32-bit address range
    PanelTooLarge,
    /// Lockout threshold of zero would lock on first use
    ZeroLockoutThreshold,
}

impl EngineConfig {
    /// Check internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.panel.width == 0 || self.panel.height == 0 {
            return Err(ConfigError::EmptyPanel);
        }
        if !matches!(self.bytes_per_pixel, 1 | 2 | 4) {
            return Err(ConfigError::UnsupportedPixelSize);
        }
        let frame = self.panel.width as u64 * self.panel.height as u64;
        if frame * self.bytes_per_pixel as u64 > u32::MAX as u64 {
            return Err(ConfigError::PanelTooLarge);
        }
        if (self.buffer_stride as u64) < frame {
            return Err(ConfigError::BufferTooSmall);
        }
        if self.lockout_threshold == 0 {
            return Err(ConfigError::ZeroLockoutThreshold);
        }
        Ok(())
    }
}
