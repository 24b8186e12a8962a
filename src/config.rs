//! Camera configuration.

use std::time::Duration;

/// Frame rate applied when capture starts.
pub const DEFAULT_FRAME_RATE: f32 = 15.0;

/// Upper bound for network packet negotiation, in bytes.
pub const MAX_PACKET_SIZE: u32 = 16456;

/// Period of the serial heartbeat.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);

/// Keep-alive frame sent to the serial peripheral.
pub const HEARTBEAT_FRAME: [u8; 2] = [0xA6, 0x0D];

/// Frame that wakes the serial peripheral after the camera opens.
pub const WAKE_COMMAND: [u8; 2] = [0x6F, 0x0D];

/// Settings for a [`Camera`](crate::Camera).
#[derive(Debug, Clone, PartialEq)]
pub struct CameraConfig {
    /// Frame rate set at capture start.
    pub frame_rate: f32,
    /// Largest packet size to negotiate.
    pub max_packet_size: u32,
    /// Heartbeat period; also how long explicit serial traffic defers it.
    pub heartbeat_interval: Duration,
    /// Bytes of each heartbeat.
    pub heartbeat_frame: [u8; 2],
    /// Bytes written once after opening.
    pub wake_command: [u8; 2],
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            frame_rate: DEFAULT_FRAME_RATE,
            max_packet_size: MAX_PACKET_SIZE,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            heartbeat_frame: HEARTBEAT_FRAME,
            wake_command: WAKE_COMMAND,
        }
    }
}

impl CameraConfig {
    /// Set the capture frame rate.
    #[must_use]
    pub fn with_frame_rate(mut self, frame_rate: f32) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    /// Set the packet size bound.
    #[must_use]
    pub fn with_max_packet_size(mut self, max_packet_size: u32) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    /// Set the heartbeat period.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}
