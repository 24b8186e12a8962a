//! V4L2 driver backend using the v4l crate.
//!
//! Maps the named-attribute model onto V4L2 formats, stream parameters and
//! controls. Acquisition runs an mmap stream on a pump thread that copies each
//! V4L2 frame into the next queued [`QueuedFrame`] and completes it through
//! its callback.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::control::{Control, Value};
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream as V4lCaptureStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::attributes::{names, EnumAttribute, ExposureMode, PixelFormat};
use crate::lock;
use crate::pump::Pump;
use crate::traits::{
    AccessMode, CameraIdentity, DeviceHandle, DriverResult, DriverStatus, FrameCallback,
    FrameInfo, FrameStatus, InterfaceType, NativeDriver, QueueError, QueuedFrame,
};

/// Kernel buffers requested for the mmap stream.
const STREAM_BUFFERS: u32 = 4;

/// How long the pump blocks in the kernel before checking for shutdown.
const PUMP_POLL: Duration = Duration::from_millis(200);

const CID_EXPOSURE_AUTO: u32 = 0x009a_0901;
const CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;
const EXPOSURE_AUTO: i64 = 0;
const EXPOSURE_MANUAL: i64 = 1;
const EXPOSURE_APERTURE_PRIORITY: i64 = 3;

/// Pixel formats with a V4L2 fourcc counterpart.
const FOURCC_TABLE: [(&[u8; 4], PixelFormat); 11] = [
    (b"GREY", PixelFormat::Mono8),
    (b"Y16 ", PixelFormat::Mono16),
    (b"Y12P", PixelFormat::Mono12Packed),
    (b"BA81", PixelFormat::Bayer8),
    (b"BYR2", PixelFormat::Bayer16),
    (b"RGB3", PixelFormat::Rgb24),
    (b"BGR3", PixelFormat::Bgr24),
    (b"AB24", PixelFormat::Rgba32),
    (b"AR24", PixelFormat::Bgra32),
    (b"411P", PixelFormat::Yuv411),
    (b"YUYV", PixelFormat::Yuv422),
];

fn pixel_format(fourcc: FourCC) -> PixelFormat {
    FOURCC_TABLE
        .iter()
        .find(|(repr, _)| **repr == fourcc.repr)
        .map_or(PixelFormat::Unknown(u32::from_le_bytes(fourcc.repr)), |(_, format)| *format)
}

fn fourcc(format: PixelFormat) -> Option<FourCC> {
    FOURCC_TABLE
        .iter()
        .find(|(_, known)| *known == format)
        .map(|(repr, _)| FourCC::new(repr))
}

/// Map an I/O error from the kernel to a driver status.
fn status_from_io(err: &io::Error) -> DriverStatus {
    const EBUSY: i32 = 16;
    const ENODEV: i32 = 19;

    match (err.kind(), err.raw_os_error()) {
        (_, Some(EBUSY)) => DriverStatus::AccessDenied,
        (_, Some(ENODEV)) => DriverStatus::Unplugged,
        (io::ErrorKind::NotFound, _) => DriverStatus::NotFound,
        (io::ErrorKind::PermissionDenied, _) => DriverStatus::AccessDenied,
        (io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock, _) => DriverStatus::Timeout,
        (io::ErrorKind::InvalidInput, _) => DriverStatus::BadParameter,
        (io::ErrorKind::OutOfMemory, _) => DriverStatus::Resources,
        _ => DriverStatus::InternalFault,
    }
}

fn io_status(context: &'static str) -> impl Fn(io::Error) -> DriverStatus {
    move |err| {
        let status = status_from_io(&err);
        tracing::debug!(%err, %status, context, "v4l2 call failed");
        status
    }
}

type FrameQueue = Arc<Mutex<VecDeque<(QueuedFrame, FrameCallback)>>>;

struct OpenCamera {
    index: usize,
    device: Device,
    capturing: bool,
    queue: FrameQueue,
    pump: Option<Pump>,
}

/// [`NativeDriver`] over Linux V4L2 capture devices.
///
/// A camera's unique id is its `/dev/videoN` index. V4L2 has no serial
/// channel and no packet size negotiation; serial calls fail with
/// [`DriverStatus::Unavailable`] and packet adjustment is accepted as is.
pub struct V4l2Driver {
    cameras: Mutex<HashMap<DeviceHandle, OpenCamera>>,
    next_handle: AtomicU32,
}

impl Default for V4l2Driver {
    fn default() -> Self {
        Self::new()
    }
}

impl V4l2Driver {
    /// Create a driver with no open cameras.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cameras: Mutex::new(HashMap::new()),
            next_handle: AtomicU32::new(1),
        }
    }

    fn cameras(&self) -> MutexGuard<'_, HashMap<DeviceHandle, OpenCamera>> {
        lock(&self.cameras)
    }

    fn with_camera<T>(
        &self,
        handle: DeviceHandle,
        f: impl FnOnce(&mut OpenCamera) -> DriverResult<T>,
    ) -> DriverResult<T> {
        let mut cameras = self.cameras();
        let camera = cameras.get_mut(&handle).ok_or(DriverStatus::BadHandle)?;
        f(camera)
    }

    fn take_pump(&self, handle: DeviceHandle) -> DriverResult<Option<Pump>> {
        self.with_camera(handle, |camera| Ok(camera.pump.take()))
    }

    fn start_pump(&self, handle: DeviceHandle) -> DriverResult<()> {
        let (index, queue) = self.with_camera(handle, |camera| {
            if !camera.capturing || camera.pump.is_some() {
                return Err(DriverStatus::BadSequence);
            }
            Ok((camera.index, Arc::clone(&camera.queue)))
        })?;

        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let pump = Pump::spawn(format!("v4l2-pump-{index}"), move |stop| {
            run_pump(index, &queue, stop, &ready_tx);
        })
        .map_err(io_status("spawn pump"))?;

        let started = ready_rx.recv().unwrap_or(Err(DriverStatus::InternalFault));
        if let Err(status) = started {
            pump.join();
            return Err(status);
        }

        let stored = self.with_camera(handle, |camera| {
            camera.pump = Some(pump);
            Ok(())
        });
        tracing::debug!(%handle, index, "v4l2 acquisition started");
        stored
    }

    fn stop_pump(&self, handle: DeviceHandle) -> DriverResult<()> {
        if let Some(pump) = self.take_pump(handle)? {
            pump.join();
            tracing::debug!(%handle, "v4l2 acquisition stopped");
        }
        Ok(())
    }
}

fn identity(index: usize) -> io::Result<Option<CameraIdentity>> {
    let caps = Device::new(index)?.query_caps()?;
    if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
        return Ok(None);
    }
    let interface_type = if caps.bus.starts_with("usb") {
        InterfaceType::Usb
    } else {
        InterfaceType::Other(0)
    };
    Ok(Some(CameraIdentity {
        unique_id: u32::try_from(index).unwrap_or(u32::MAX),
        serial: caps.bus,
        part_number: 0,
        part_version: 0,
        interface_id: 0,
        interface_type,
        permitted_access: AccessMode::Monitor.mask() | AccessMode::Master.mask(),
        display_name: caps.card,
    }))
}

/// Stream frames from device `index` into queued buffers until `stop` is set.
fn run_pump(
    index: usize,
    queue: &FrameQueue,
    stop: &AtomicBool,
    ready: &mpsc::SyncSender<DriverResult<()>>,
) {
    let device = match Device::new(index) {
        Ok(device) => device,
        Err(err) => {
            let _ = ready.send(Err(io_status("open stream device")(err)));
            return;
        }
    };
    let format = match device.format() {
        Ok(format) => format,
        Err(err) => {
            let _ = ready.send(Err(io_status("query format")(err)));
            return;
        }
    };
    let mut stream = match Stream::with_buffers(&device, Type::VideoCapture, STREAM_BUFFERS) {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready.send(Err(io_status("create stream")(err)));
            return;
        }
    };
    stream.set_timeout(PUMP_POLL);
    let _ = ready.send(Ok(()));

    let pixel_format = pixel_format(format.fourcc);
    while !stop.load(Ordering::Acquire) {
        let (data, meta) = match stream.next() {
            Ok(frame) => frame,
            Err(err) if matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                continue;
            }
            Err(err) => {
                tracing::error!(index, %err, "v4l2 stream failed");
                break;
            }
        };

        let Some((mut frame, callback)) = lock(queue).pop_front() else {
            tracing::trace!(index, sequence = meta.sequence, "no queued buffer, frame dropped");
            continue;
        };

        let used = (meta.bytesused as usize).min(data.len());
        let copied = used.min(frame.buffer.len());
        if let (Some(dst), Some(src)) = (frame.buffer.as_mut_slice().get_mut(..copied), data.get(..copied)) {
            dst.copy_from_slice(src);
        }
        let status = if copied < used {
            FrameStatus::Failed(DriverStatus::BufferTooSmall)
        } else {
            FrameStatus::Complete
        };

        // Safe conversions: V4L2 timestamps are always non-negative in practice
        #[allow(clippy::cast_sign_loss)]
        let secs = meta.timestamp.sec.max(0) as u64;
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let nanos = (meta.timestamp.usec.max(0) as u32).saturating_mul(1000);

        let info = FrameInfo {
            width: format.width,
            height: format.height,
            format: pixel_format,
            timestamp: Duration::new(secs, nanos),
            frame_count: meta.sequence,
            image_size: u32::try_from(copied).unwrap_or(u32::MAX),
        };
        callback(frame.complete(status, info));
    }
}

impl NativeDriver for V4l2Driver {
    fn list_cameras(&self) -> DriverResult<Vec<CameraIdentity>> {
        let mut found = Vec::new();
        for node in v4l::context::enum_devices() {
            match identity(node.index()) {
                Ok(Some(camera)) => found.push(camera),
                Ok(None) => {}
                Err(err) => {
                    tracing::debug!(index = node.index(), %err, "skipping v4l2 node");
                }
            }
        }
        found.sort_by_key(|camera| camera.unique_id);
        Ok(found)
    }

    fn camera_open(&self, unique_id: u32, access: AccessMode) -> DriverResult<DeviceHandle> {
        let index = unique_id as usize;
        let device = Device::new(index).map_err(io_status("open device"))?;
        let handle = DeviceHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.cameras().insert(
            handle,
            OpenCamera {
                index,
                device,
                capturing: false,
                queue: FrameQueue::default(),
                pump: None,
            },
        );
        tracing::debug!(%handle, index, ?access, "v4l2 device opened");
        Ok(handle)
    }

    fn camera_close(&self, handle: DeviceHandle) -> DriverResult<()> {
        let camera = self
            .cameras()
            .remove(&handle)
            .ok_or(DriverStatus::BadHandle)?;
        if let Some(pump) = camera.pump {
            pump.join();
        }
        Ok(())
    }

    fn camera_release(&self, unique_id: u32) -> DriverResult<()> {
        let stale: Vec<DeviceHandle> = self
            .cameras()
            .iter()
            .filter(|(_, camera)| camera.index == unique_id as usize)
            .map(|(handle, _)| *handle)
            .collect();
        for handle in stale {
            self.camera_close(handle)?;
        }
        Ok(())
    }

    fn capture_start(&self, handle: DeviceHandle) -> DriverResult<()> {
        self.with_camera(handle, |camera| {
            if camera.capturing {
                return Err(DriverStatus::BadSequence);
            }
            camera.capturing = true;
            Ok(())
        })
    }

    fn capture_end(&self, handle: DeviceHandle) -> DriverResult<()> {
        self.stop_pump(handle)?;
        self.with_camera(handle, |camera| {
            camera.capturing = false;
            Ok(())
        })
    }

    fn capture_queue_frame(
        &self,
        handle: DeviceHandle,
        frame: QueuedFrame,
        callback: FrameCallback,
    ) -> Result<(), QueueError> {
        let queue = {
            let cameras = self.cameras();
            match cameras.get(&handle) {
                Some(camera) if camera.capturing => Ok(Arc::clone(&camera.queue)),
                Some(_) => Err(DriverStatus::BadSequence),
                None => Err(DriverStatus::BadHandle),
            }
        };
        match queue {
            Ok(queue) => {
                lock(&queue).push_back((frame, callback));
                Ok(())
            }
            Err(status) => Err(QueueError { status, frame }),
        }
    }

    fn capture_queue_clear(&self, handle: DeviceHandle) -> DriverResult<Vec<QueuedFrame>> {
        let queue = self.with_camera(handle, |camera| Ok(Arc::clone(&camera.queue)))?;
        let cleared = lock(&queue).drain(..).map(|(frame, _)| frame).collect();
        Ok(cleared)
    }

    fn capture_adjust_packet_size(&self, _unique_id: u32, _max_size: u32) -> DriverResult<()> {
        Ok(())
    }

    fn attr_f32_get(&self, handle: DeviceHandle, name: &str) -> DriverResult<f32> {
        self.with_camera(handle, |camera| match name {
            names::FRAME_RATE => {
                let params = camera.device.params().map_err(io_status("query params"))?;
                let interval = params.interval;
                if interval.numerator == 0 {
                    return Err(DriverStatus::OutOfRange);
                }
                #[allow(clippy::cast_precision_loss)]
                let fps = interval.denominator as f32 / interval.numerator as f32;
                Ok(fps)
            }
            _ => Err(DriverStatus::NotFound),
        })
    }

    fn attr_f32_set(&self, handle: DeviceHandle, name: &str, value: f32) -> DriverResult<()> {
        self.with_camera(handle, |camera| match name {
            names::FRAME_RATE => {
                if !value.is_finite() || value < 1.0 {
                    return Err(DriverStatus::OutOfRange);
                }
                #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
                let fps = value.round() as u32;
                camera
                    .device
                    .set_params(&Parameters::with_fps(fps))
                    .map_err(io_status("set params"))?;
                Ok(())
            }
            _ => Err(DriverStatus::NotFound),
        })
    }

    fn attr_u32_get(&self, handle: DeviceHandle, name: &str) -> DriverResult<u32> {
        self.with_camera(handle, |camera| match name {
            names::WIDTH | names::HEIGHT | names::TOTAL_BYTES_PER_FRAME => {
                let format = camera.device.format().map_err(io_status("query format"))?;
                Ok(match name {
                    names::WIDTH => format.width,
                    names::HEIGHT => format.height,
                    _ => format.size,
                })
            }
            names::EXPOSURE_VALUE => {
                let control = camera
                    .device
                    .control(CID_EXPOSURE_ABSOLUTE)
                    .map_err(io_status("read exposure"))?;
                match control.value {
                    // V4L2 exposure is in 100 µs units.
                    Value::Integer(units) => u32::try_from(units.saturating_mul(100))
                        .map_err(|_| DriverStatus::OutOfRange),
                    _ => Err(DriverStatus::WrongType),
                }
            }
            _ => Err(DriverStatus::NotFound),
        })
    }

    fn attr_u32_set(&self, handle: DeviceHandle, name: &str, value: u32) -> DriverResult<()> {
        self.with_camera(handle, |camera| match name {
            names::WIDTH | names::HEIGHT => {
                let mut format = camera.device.format().map_err(io_status("query format"))?;
                if name == names::WIDTH {
                    format.width = value;
                } else {
                    format.height = value;
                }
                camera
                    .device
                    .set_format(&format)
                    .map_err(io_status("set format"))?;
                Ok(())
            }
            names::EXPOSURE_VALUE => camera
                .device
                .set_control(Control {
                    id: CID_EXPOSURE_ABSOLUTE,
                    value: Value::Integer(i64::from(value / 100)),
                })
                .map_err(io_status("write exposure")),
            _ => Err(DriverStatus::NotFound),
        })
    }

    fn attr_enum_get(&self, handle: DeviceHandle, name: &str) -> DriverResult<String> {
        self.with_camera(handle, |camera| match name {
            names::PIXEL_FORMAT => {
                let format = camera.device.format().map_err(io_status("query format"))?;
                Ok(pixel_format(format.fourcc)
                    .driver_str()
                    .map_or_else(|| format.fourcc.to_string(), str::to_owned))
            }
            names::EXPOSURE_MODE => {
                let control = camera
                    .device
                    .control(CID_EXPOSURE_AUTO)
                    .map_err(io_status("read exposure mode"))?;
                let mode = match control.value {
                    Value::Integer(EXPOSURE_MANUAL) => ExposureMode::Manual,
                    Value::Integer(_) => ExposureMode::Auto,
                    _ => return Err(DriverStatus::WrongType),
                };
                Ok(mode.driver_str().unwrap_or_default().to_owned())
            }
            names::ACQUISITION_MODE => Ok(names::CONTINUOUS.to_owned()),
            names::FRAME_START_TRIGGER_MODE => Ok(names::FIXED_RATE.to_owned()),
            _ => Err(DriverStatus::NotFound),
        })
    }

    fn attr_enum_set(&self, handle: DeviceHandle, name: &str, value: &str) -> DriverResult<()> {
        self.with_camera(handle, |camera| match name {
            names::PIXEL_FORMAT => {
                let requested = PixelFormat::parse_driver_str(value)
                    .ok()
                    .and_then(fourcc)
                    .ok_or(DriverStatus::OutOfRange)?;
                let mut format = camera.device.format().map_err(io_status("query format"))?;
                format.fourcc = requested;
                let applied = camera
                    .device
                    .set_format(&format)
                    .map_err(io_status("set format"))?;
                if applied.fourcc == requested {
                    Ok(())
                } else {
                    Err(DriverStatus::OutOfRange)
                }
            }
            names::EXPOSURE_MODE => {
                let raw = match ExposureMode::parse_driver_str(value) {
                    Ok(ExposureMode::Manual) => EXPOSURE_MANUAL,
                    Ok(ExposureMode::Auto) => EXPOSURE_APERTURE_PRIORITY,
                    _ => return Err(DriverStatus::OutOfRange),
                };
                camera
                    .device
                    .set_control(Control {
                        id: CID_EXPOSURE_AUTO,
                        value: Value::Integer(raw),
                    })
                    .or_else(|err| {
                        // Some drivers only accept full auto.
                        if raw == EXPOSURE_APERTURE_PRIORITY {
                            camera.device.set_control(Control {
                                id: CID_EXPOSURE_AUTO,
                                value: Value::Integer(EXPOSURE_AUTO),
                            })
                        } else {
                            Err(err)
                        }
                    })
                    .map_err(io_status("write exposure mode"))
            }
            names::ACQUISITION_MODE if value.eq_ignore_ascii_case(names::CONTINUOUS) => Ok(()),
            names::FRAME_START_TRIGGER_MODE if value.eq_ignore_ascii_case(names::FIXED_RATE) => {
                Ok(())
            }
            names::ACQUISITION_MODE | names::FRAME_START_TRIGGER_MODE => {
                Err(DriverStatus::OutOfRange)
            }
            _ => Err(DriverStatus::NotFound),
        })
    }

    fn command_run(&self, handle: DeviceHandle, name: &str) -> DriverResult<()> {
        match name {
            names::ACQUISITION_START => self.start_pump(handle),
            names::ACQUISITION_STOP => self.stop_pump(handle),
            _ => Err(DriverStatus::NotFound),
        }
    }

    fn serial_setup(&self, _handle: DeviceHandle) -> DriverResult<()> {
        Err(DriverStatus::Unavailable)
    }

    fn serial_write(&self, _handle: DeviceHandle, _bytes: &[u8]) -> DriverResult<()> {
        Err(DriverStatus::Unavailable)
    }

    fn serial_read(&self, _handle: DeviceHandle, _buf: &mut [u8]) -> DriverResult<usize> {
        Err(DriverStatus::Unavailable)
    }
}
