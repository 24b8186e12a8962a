//! Pv-Cam-Capture: machine-vision camera control for a remote vehicle
//!
//! This library drives continuous acquisition through a fixed pool of reusable
//! frame buffers, hands completed frames to observers, exposes typed camera
//! attributes and keeps a serial peripheral behind the camera alive with a
//! heartbeat. Vendor drivers plug in through the [`NativeDriver`] trait; a
//! V4L2 backend is included.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod attributes;
pub mod buffer;
pub mod camera;
pub mod config;
pub mod notify;
pub mod traits;
pub mod v4l2;
pub mod validation;

mod pump;
mod serial;
mod session;

#[cfg(test)]
pub mod mock;

pub use attributes::{
    ColorTransformation, ColorTransformationMode, EnumAttribute, ExposureAlgorithm, ExposureMode,
    ExposureSettings, PixelFormat,
};
pub use buffer::{FrameBuffer, FRAME_POOL_SIZE};
pub use camera::{Camera, CaptureSessionState};
pub use config::CameraConfig;
pub use notify::{Frame, FrameObserver, OwnedFrame, SubscriptionId};
pub use traits::{
    AccessMode, CameraError, CameraIdentity, CompletedFrame, DeviceHandle, DriverStatus,
    FrameCallback, FrameDescriptor, FrameInfo, FrameStatus, InterfaceType, NativeDriver,
    QueueError, QueuedFrame, Result,
};
pub use v4l2::V4l2Driver;

/// Lock a mutex, recovering the guard if another thread panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
