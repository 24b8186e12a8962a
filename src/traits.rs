//! Core traits and types for the native camera driver abstraction.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::attributes::PixelFormat;
use crate::buffer::FrameBuffer;

/// Opaque reference to an opened camera, assigned by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u32);

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Access level requested when opening a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Read-only access; attributes can be queried but not changed.
    Monitor,
    /// Exclusive control of the camera.
    Master,
}

impl AccessMode {
    /// Bit this mode occupies in a camera's permitted-access mask.
    #[must_use]
    pub const fn mask(self) -> u32 {
        match self {
            Self::Monitor => 0x2,
            Self::Master => 0x4,
        }
    }
}

/// Physical interface a camera is attached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceType {
    /// IEEE 1394.
    Firewire,
    /// GigE Vision.
    Ethernet,
    /// USB video class and similar.
    Usb,
    /// Interface code the crate does not know about.
    Other(u32),
}

/// Immutable descriptor of a discovered camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraIdentity {
    /// Driver-wide unique camera id.
    pub unique_id: u32,
    /// Serial number string.
    pub serial: String,
    /// Hardware part number.
    pub part_number: u32,
    /// Hardware part revision.
    pub part_version: u32,
    /// Id of the host interface the camera was found on.
    pub interface_id: u32,
    /// Kind of host interface.
    pub interface_type: InterfaceType,
    /// Bit mask of [`AccessMode`]s the camera currently permits.
    pub permitted_access: u32,
    /// Human readable name.
    pub display_name: String,
}

impl CameraIdentity {
    /// Whether the permitted-access mask allows `mode`.
    #[must_use]
    pub const fn allows(&self, mode: AccessMode) -> bool {
        self.permitted_access & mode.mask() != 0
    }
}

/// Status codes reported by a failed native driver call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum DriverStatus {
    /// Unexpected camera fault.
    #[error("camera fault")]
    CameraFault,
    /// Unexpected fault inside the driver.
    #[error("internal driver fault")]
    InternalFault,
    /// Handle does not refer to an open camera.
    #[error("bad camera handle")]
    BadHandle,
    /// A parameter was invalid.
    #[error("bad parameter")]
    BadParameter,
    /// Call made in the wrong order.
    #[error("bad call sequence")]
    BadSequence,
    /// Camera or attribute not found.
    #[error("not found")]
    NotFound,
    /// Camera cannot be opened in the requested mode.
    #[error("access denied")]
    AccessDenied,
    /// Camera was unplugged.
    #[error("camera unplugged")]
    Unplugged,
    /// Setup is invalid, for example the region of interest.
    #[error("invalid setup")]
    InvalidSetup,
    /// System resources exhausted.
    #[error("out of resources")]
    Resources,
    /// Not enough bandwidth on the interface.
    #[error("insufficient bandwidth")]
    Bandwidth,
    /// Capture queue is full.
    #[error("capture queue full")]
    QueueFull,
    /// Frame buffer is too small for the current attributes.
    #[error("frame buffer too small")]
    BufferTooSmall,
    /// Frame was cancelled, usually by a queue clear.
    #[error("cancelled")]
    Cancelled,
    /// Data lost during transfer.
    #[error("data lost")]
    DataLost,
    /// Some of the frame's data is missing.
    #[error("data missing")]
    DataMissing,
    /// Call timed out.
    #[error("timed out")]
    Timeout,
    /// Attribute value out of range.
    #[error("value out of range")]
    OutOfRange,
    /// Attribute accessed with the wrong type.
    #[error("wrong attribute type")]
    WrongType,
    /// Attribute is not writable or readable right now.
    #[error("forbidden")]
    Forbidden,
    /// Attribute or feature not available on this camera.
    #[error("unavailable")]
    Unavailable,
    /// Firewall blocked streaming traffic.
    #[error("blocked by firewall")]
    Firewall,
}

const STATUS_CODES: [(DriverStatus, u32); 22] = [
    (DriverStatus::CameraFault, 1),
    (DriverStatus::InternalFault, 2),
    (DriverStatus::BadHandle, 3),
    (DriverStatus::BadParameter, 4),
    (DriverStatus::BadSequence, 5),
    (DriverStatus::NotFound, 6),
    (DriverStatus::AccessDenied, 7),
    (DriverStatus::Unplugged, 8),
    (DriverStatus::InvalidSetup, 9),
    (DriverStatus::Resources, 10),
    (DriverStatus::Bandwidth, 11),
    (DriverStatus::QueueFull, 12),
    (DriverStatus::BufferTooSmall, 13),
    (DriverStatus::Cancelled, 14),
    (DriverStatus::DataLost, 15),
    (DriverStatus::DataMissing, 16),
    (DriverStatus::Timeout, 17),
    (DriverStatus::OutOfRange, 18),
    (DriverStatus::WrongType, 19),
    (DriverStatus::Forbidden, 20),
    (DriverStatus::Unavailable, 21),
    (DriverStatus::Firewall, 22),
];

impl DriverStatus {
    /// Numeric code of this status as reported by the native driver.
    #[must_use]
    pub fn code(self) -> u32 {
        STATUS_CODES
            .iter()
            .find(|(status, _)| *status == self)
            .map_or(0, |(_, code)| *code)
    }

    /// Map a native status code back to a status. Zero (success) and
    /// unknown codes yield `None`.
    #[must_use]
    pub fn from_code(code: u32) -> Option<Self> {
        STATUS_CODES
            .iter()
            .find(|(_, known)| *known == code)
            .map(|(status, _)| *status)
    }
}

/// Result of a raw driver call.
pub type DriverResult<T> = std::result::Result<T, DriverStatus>;

/// Error type for camera operations.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// The operation needs an open camera or an active capture session.
    #[error("camera unavailable: not open or not in the required capture state")]
    Unavailable,
    /// A native driver call failed.
    #[error("driver error: {0} (status {})", .0.code())]
    Driver(#[from] DriverStatus),
    /// An enumerated attribute reported a string with no known mapping.
    #[error("attribute {attribute} reported unknown value {value:?}")]
    AttributeParse {
        /// Attribute name.
        attribute: &'static str,
        /// String the driver returned.
        value: String,
    },
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Fixed-size metadata paired 1:1 with a frame buffer of the capture pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    /// Slot of the pool this descriptor belongs to.
    pub index: usize,
    /// Capture session the pool was allocated for.
    pub generation: u64,
    /// Length of the paired buffer in bytes.
    pub buffer_len: u32,
    /// Length of the ancillary buffer; always zero.
    pub ancillary_len: u32,
}

/// A buffer and its descriptor, handed to the driver's capture queue.
///
/// While the driver holds a `QueuedFrame` it is the buffer's only owner.
#[derive(Debug)]
pub struct QueuedFrame {
    /// Descriptor of the pool slot.
    pub descriptor: FrameDescriptor,
    /// Buffer the driver fills.
    pub buffer: FrameBuffer,
}

impl QueuedFrame {
    /// Finish this frame, producing the value passed to the completion callback.
    #[must_use]
    pub fn complete(self, status: FrameStatus, info: FrameInfo) -> CompletedFrame {
        CompletedFrame {
            descriptor: self.descriptor,
            buffer: self.buffer,
            status,
            info,
        }
    }
}

/// Outcome of a queued frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// The buffer holds a complete image.
    Complete,
    /// The frame was cancelled before it was filled.
    Cancelled,
    /// The frame was filled only partially or not at all.
    Failed(DriverStatus),
}

/// Image metadata the driver reports with a completed frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Pixel format of the image data.
    pub format: PixelFormat,
    /// Camera timestamp of the exposure.
    pub timestamp: Duration,
    /// Frame counter maintained by the camera.
    pub frame_count: u32,
    /// Number of valid image bytes at the start of the buffer.
    pub image_size: u32,
}

/// A frame the driver hands back through the completion callback.
#[derive(Debug)]
pub struct CompletedFrame {
    /// Descriptor the frame was queued with.
    pub descriptor: FrameDescriptor,
    /// The buffer, now owned by the callback.
    pub buffer: FrameBuffer,
    /// Outcome of the capture.
    pub status: FrameStatus,
    /// Image metadata.
    pub info: FrameInfo,
}

/// Completion callback registered with every queued frame.
pub type FrameCallback = Arc<dyn Fn(CompletedFrame) + Send + Sync>;

/// The driver refused to queue a frame; ownership of the frame is returned.
#[derive(Debug, thiserror::Error)]
#[error("driver refused frame slot {}: {status}", .frame.descriptor.index)]
pub struct QueueError {
    /// Why the frame was refused.
    pub status: DriverStatus,
    /// The frame, handed back to the caller.
    pub frame: QueuedFrame,
}

/// Abstraction over a native camera driver.
///
/// All methods take `&self` so one driver can be shared by a camera, its
/// heartbeat thread and the driver's own delivery threads. Implementations
/// must use internal mutability and must never invoke a completion callback
/// while holding a lock that `capture_queue_frame` also takes.
pub trait NativeDriver: Send + Sync {
    /// Enumerate reachable cameras.
    fn list_cameras(&self) -> DriverResult<Vec<CameraIdentity>>;

    /// Open a camera by unique id.
    fn camera_open(&self, unique_id: u32, access: AccessMode) -> DriverResult<DeviceHandle>;

    /// Close an open camera.
    fn camera_close(&self, handle: DeviceHandle) -> DriverResult<()>;

    /// Close whatever handle the driver still holds for a camera id.
    fn camera_release(&self, unique_id: u32) -> DriverResult<()>;

    /// Prepare the camera's capture stream.
    fn capture_start(&self, handle: DeviceHandle) -> DriverResult<()>;

    /// Shut down the capture stream.
    fn capture_end(&self, handle: DeviceHandle) -> DriverResult<()>;

    /// Queue a frame for capture. `callback` runs once the frame is done.
    fn capture_queue_frame(
        &self,
        handle: DeviceHandle,
        frame: QueuedFrame,
        callback: FrameCallback,
    ) -> std::result::Result<(), QueueError>;

    /// Remove every pending frame from the queue and return them.
    ///
    /// Frames the driver is filling at the time of the call are still
    /// delivered through their callback.
    fn capture_queue_clear(&self, handle: DeviceHandle) -> DriverResult<Vec<QueuedFrame>>;

    /// Negotiate the largest network packet size up to `max_size`.
    fn capture_adjust_packet_size(&self, unique_id: u32, max_size: u32) -> DriverResult<()>;

    /// Read a float attribute.
    fn attr_f32_get(&self, handle: DeviceHandle, name: &str) -> DriverResult<f32>;

    /// Write a float attribute.
    fn attr_f32_set(&self, handle: DeviceHandle, name: &str, value: f32) -> DriverResult<()>;

    /// Read an unsigned integer attribute.
    fn attr_u32_get(&self, handle: DeviceHandle, name: &str) -> DriverResult<u32>;

    /// Write an unsigned integer attribute.
    fn attr_u32_set(&self, handle: DeviceHandle, name: &str, value: u32) -> DriverResult<()>;

    /// Read an enumerated attribute as its driver string.
    fn attr_enum_get(&self, handle: DeviceHandle, name: &str) -> DriverResult<String>;

    /// Write an enumerated attribute by driver string.
    fn attr_enum_set(&self, handle: DeviceHandle, name: &str, value: &str) -> DriverResult<()>;

    /// Run a named command such as `AcquisitionStart`.
    fn command_run(&self, handle: DeviceHandle, name: &str) -> DriverResult<()>;

    /// Configure the auxiliary serial channel.
    fn serial_setup(&self, handle: DeviceHandle) -> DriverResult<()>;

    /// Write one frame of bytes to the serial channel.
    fn serial_write(&self, handle: DeviceHandle, bytes: &[u8]) -> DriverResult<()>;

    /// Read pending serial bytes into `buf`, returning how many were read.
    fn serial_read(&self, handle: DeviceHandle, buf: &mut [u8]) -> DriverResult<usize>;
}
