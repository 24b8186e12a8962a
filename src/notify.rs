//! Frame-ready notification: snapshots handed to observers.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::attributes::PixelFormat;
use crate::traits::FrameInfo;

/// A completed frame, borrowed for the duration of an observer call.
///
/// The pixel data belongs to the capture pool and goes back to the driver
/// as soon as every observer has returned; use
/// [`to_owned_frame`](Self::to_owned_frame) to keep it.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    data: &'a [u8],
    info: FrameInfo,
}

impl<'a> Frame<'a> {
    pub(crate) fn new(buffer: &'a [u8], info: FrameInfo) -> Self {
        let data = buffer.get(..info.image_size as usize).unwrap_or(buffer);
        Self { data, info }
    }

    /// Pixel data.
    #[must_use]
    pub const fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.info.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.info.height
    }

    /// Pixel format.
    #[must_use]
    pub const fn format(&self) -> PixelFormat {
        self.info.format
    }

    /// Bits per channel derived from the format.
    #[must_use]
    pub const fn depth(&self) -> u32 {
        self.info.format.depth()
    }

    /// Bytes per pixel derived from the format.
    #[must_use]
    pub fn bytes_per_pixel(&self) -> f32 {
        self.info.format.bytes_per_pixel()
    }

    /// Camera timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> Duration {
        self.info.timestamp
    }

    /// Camera frame counter.
    #[must_use]
    pub const fn frame_count(&self) -> u32 {
        self.info.frame_count
    }

    /// Copy the frame out of the pool.
    #[must_use]
    pub fn to_owned_frame(&self) -> OwnedFrame {
        OwnedFrame {
            data: self.data.to_vec(),
            width: self.info.width,
            height: self.info.height,
            format: self.info.format,
            timestamp: self.info.timestamp,
            frame_count: self.info.frame_count,
        }
    }
}

/// A frame copied out of the capture pool.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedFrame {
    /// Pixel data.
    pub data: Vec<u8>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel format.
    pub format: PixelFormat,
    /// Camera timestamp.
    pub timestamp: Duration,
    /// Camera frame counter.
    pub frame_count: u32,
}

/// Receives completed frames.
///
/// Called synchronously on the driver's delivery thread. Long-running work
/// stalls the buffer it holds; once every buffer is held the driver stops
/// delivering.
pub trait FrameObserver: Send + Sync {
    /// Handle one frame.
    fn on_frame(&self, frame: &Frame<'_>);
}

impl<F> FrameObserver for F
where
    F: Fn(&Frame<'_>) + Send + Sync,
{
    fn on_frame(&self, frame: &Frame<'_>) {
        self(frame);
    }
}

/// Identifies an observer registered with [`Camera::subscribe`](crate::Camera::subscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub(crate) struct Observers {
    next_id: AtomicU64,
    entries: RwLock<Vec<(SubscriptionId, Arc<dyn FrameObserver>)>>,
}

impl Observers {
    pub(crate) fn subscribe(&self, observer: Arc<dyn FrameObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        entries.len() != before
    }

    /// Call every observer in subscription order. A panicking observer is
    /// logged and skipped so the frame's buffer still gets recycled.
    pub(crate) fn dispatch(&self, frame: &Frame<'_>) {
        let observers: Vec<Arc<dyn FrameObserver>> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        for observer in observers {
            if panic::catch_unwind(AssertUnwindSafe(|| observer.on_frame(frame))).is_err() {
                tracing::error!(frame = frame.frame_count(), "frame observer panicked");
            }
        }
    }
}
