//! Mock driver implementation for testing without hardware.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::attributes::{EnumAttribute, PixelFormat};
use crate::lock;
use crate::pump::Pump;
use crate::traits::{
    AccessMode, CameraIdentity, DeviceHandle, DriverResult, DriverStatus, FrameCallback,
    FrameInfo, FrameStatus, InterfaceType, NativeDriver, QueueError, QueuedFrame,
};

/// Driver calls that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOp {
    /// `camera_open`.
    Open,
    /// `camera_close`.
    Close,
    /// `capture_start`.
    CaptureStart,
    /// `capture_end`.
    CaptureEnd,
    /// `capture_queue_frame`.
    QueueFrame,
    /// `capture_queue_clear`.
    QueueClear,
    /// `capture_adjust_packet_size`.
    AdjustPacketSize,
    /// Any attribute read.
    AttrGet,
    /// Any attribute write.
    AttrSet,
    /// `command_run`.
    Command,
    /// `serial_setup`.
    SerialSetup,
    /// `serial_write`.
    SerialWrite,
    /// `serial_read`.
    SerialRead,
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy)]
pub enum TestPattern {
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Every byte set to the given value.
    Solid(u8),
}

#[derive(Debug, Clone, PartialEq)]
enum AttrValue {
    F32(f32),
    U32(u32),
    Enum(String),
}

struct Failure {
    op: MockOp,
    name: Option<String>,
    status: DriverStatus,
}

struct MockState {
    cameras: Vec<CameraIdentity>,
    open: HashMap<DeviceHandle, u32>,
    next_handle: u32,
    released: Vec<u32>,
    attributes: HashMap<String, AttrValue>,
    attr_sets: Vec<String>,
    commands: Vec<String>,
    capture_started: bool,
    acquiring: bool,
    queue: VecDeque<(QueuedFrame, FrameCallback)>,
    failures: Vec<Failure>,
    packet_size: Option<u32>,
    serial_log: Vec<(Instant, Vec<u8>)>,
    serial_rx: VecDeque<u8>,
    frame_count: u32,
    pattern: TestPattern,
    stream_interval: Option<Duration>,
    calls: usize,
}

impl MockState {
    /// Count the call and consume a matching one-shot failure, preferring
    /// one registered for this attribute or command name.
    fn enter(&mut self, op: MockOp, name: Option<&str>) -> DriverResult<()> {
        self.calls += 1;
        let position = self
            .failures
            .iter()
            .position(|f| f.op == op && f.name.is_some() && f.name.as_deref() == name)
            .or_else(|| {
                self.failures
                    .iter()
                    .position(|f| f.op == op && f.name.is_none())
            });
        match position {
            Some(index) => Err(self.failures.remove(index).status),
            None => Ok(()),
        }
    }

    fn check_handle(&self, handle: DeviceHandle) -> DriverResult<()> {
        if self.open.contains_key(&handle) {
            Ok(())
        } else {
            Err(DriverStatus::BadHandle)
        }
    }

    fn attribute(&self, name: &str) -> DriverResult<&AttrValue> {
        self.attributes.get(name).ok_or(DriverStatus::NotFound)
    }

    fn write_attribute(&mut self, name: &str, value: AttrValue) -> DriverResult<()> {
        let same_kind = self.attributes.get(name).map_or(true, |current| {
            std::mem::discriminant(current) == std::mem::discriminant(&value)
        });
        if !same_kind {
            return Err(DriverStatus::WrongType);
        }
        self.attr_sets.push(name.to_owned());
        self.attributes.insert(name.to_owned(), value);
        Ok(())
    }

    fn u32_value(&self, name: &str) -> u32 {
        match self.attributes.get(name) {
            Some(AttrValue::U32(value)) => *value,
            _ => 0,
        }
    }

    fn frame_info(&self, image_size: usize) -> FrameInfo {
        let format = match self.attributes.get("PixelFormat") {
            Some(AttrValue::Enum(raw)) => {
                PixelFormat::parse_driver_str(raw).unwrap_or(PixelFormat::Unknown(0))
            }
            _ => PixelFormat::Unknown(0),
        };
        FrameInfo {
            width: self.u32_value("Width"),
            height: self.u32_value("Height"),
            format,
            timestamp: Duration::from_millis(u64::from(self.frame_count) * 66),
            frame_count: self.frame_count,
            image_size: u32::try_from(image_size).unwrap_or(u32::MAX),
        }
    }
}

/// Complete the oldest queued frame with `status`. The callback runs on the
/// calling thread after the state lock is released.
fn deliver(state: &Mutex<MockState>, status: FrameStatus) -> bool {
    let completed = {
        let mut state = lock(state);
        let Some((mut frame, callback)) = state.queue.pop_front() else {
            return false;
        };
        state.frame_count += 1;
        let width = state.u32_value("Width") as usize;
        fill_pattern(frame.buffer.as_mut_slice(), width, state.pattern);
        let info = state.frame_info(frame.buffer.len());
        (frame.complete(status, info), callback)
    };
    let (frame, callback) = completed;
    callback(frame);
    true
}

/// In-memory driver with failure injection and manual frame delivery.
///
/// With [`stream_frames`](Self::stream_frames), `AcquisitionStart` also
/// spawns a delivery thread, like a hardware backend.
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
    pump: Mutex<Option<Pump>>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    /// Create a driver exposing one 64x48 Mono8 camera.
    #[must_use]
    pub fn new() -> Self {
        let identity = CameraIdentity {
            unique_id: 5001,
            serial: "02-2142A-06109".to_owned(),
            part_number: 2142,
            part_version: 1,
            interface_id: 0,
            interface_type: InterfaceType::Ethernet,
            permitted_access: AccessMode::Monitor.mask() | AccessMode::Master.mask(),
            display_name: "Mock GC1380".to_owned(),
        };

        let mut attributes = HashMap::new();
        let mut put = |name: &str, value: AttrValue| {
            attributes.insert(name.to_owned(), value);
        };
        put("DeviceTemperatureMainboard", AttrValue::F32(41.5));
        put("Width", AttrValue::U32(64));
        put("Height", AttrValue::U32(48));
        put("PixelFormat", AttrValue::Enum("Mono8".to_owned()));
        put("TotalBytesPerFrame", AttrValue::U32(64 * 48));
        put("FrameRate", AttrValue::F32(30.0));
        put("FrameStartTriggerMode", AttrValue::Enum("Freerun".to_owned()));
        put("AcquisitionMode", AttrValue::Enum("SingleFrame".to_owned()));
        put("ColorTransformationMode", AttrValue::Enum("Off".to_owned()));
        for (row, channel) in ["R", "G", "B"].into_iter().enumerate() {
            for (col, source) in ["R", "G", "B"].into_iter().enumerate() {
                let coefficient = if row == col { 1.0 } else { 0.0 };
                put(
                    &format!("ColorTransformationValue{channel}{source}"),
                    AttrValue::F32(coefficient),
                );
            }
        }
        put("ExposureMode", AttrValue::Enum("Manual".to_owned()));
        put("ExposureAutoAlg", AttrValue::Enum("Mean".to_owned()));
        put("ExposureValue", AttrValue::U32(15_000));
        for name in [
            "ExposureAutoAdjustTol",
            "ExposureAutoMax",
            "ExposureAutoMin",
            "ExposureAutoOutliers",
            "ExposureAutoRate",
            "ExposureAutoTarget",
        ] {
            put(name, AttrValue::U32(0));
        }

        Self {
            state: Arc::new(Mutex::new(MockState {
                cameras: vec![identity],
                open: HashMap::new(),
                next_handle: 1,
                released: Vec::new(),
                attributes,
                attr_sets: Vec::new(),
                commands: Vec::new(),
                capture_started: false,
                acquiring: false,
                queue: VecDeque::new(),
                failures: Vec::new(),
                packet_size: None,
                serial_log: Vec::new(),
                serial_rx: VecDeque::new(),
                frame_count: 0,
                pattern: TestPattern::Gradient,
                stream_interval: None,
                calls: 0,
            })),
            pump: Mutex::new(None),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        lock(&self.state)
    }

    /// This driver as a trait object.
    #[must_use]
    pub fn driver(self: &Arc<Self>) -> Arc<dyn NativeDriver> {
        let driver: Arc<Self> = Arc::clone(self);
        driver
    }

    /// Identity of the mock camera.
    #[must_use]
    pub fn identity(&self) -> CameraIdentity {
        self.state().cameras.first().cloned().unwrap_or_else(|| CameraIdentity {
            unique_id: 0,
            serial: String::new(),
            part_number: 0,
            part_version: 0,
            interface_id: 0,
            interface_type: InterfaceType::Other(0),
            permitted_access: 0,
            display_name: String::new(),
        })
    }

    /// Set the pattern written into delivered frames.
    pub fn set_pattern(&self, pattern: TestPattern) {
        self.state().pattern = pattern;
    }

    /// Fail the next call of `op` with `status`.
    pub fn fail_next(&self, op: MockOp, status: DriverStatus) {
        self.state().failures.push(Failure {
            op,
            name: None,
            status,
        });
    }

    /// Fail the next call of `op` on the attribute or command `name`.
    pub fn fail_next_named(&self, op: MockOp, name: &str, status: DriverStatus) {
        self.state().failures.push(Failure {
            op,
            name: Some(name.to_owned()),
            status,
        });
    }

    /// Overwrite an enum attribute without logging it as a write.
    pub fn set_enum(&self, name: &str, value: &str) {
        self.state()
            .attributes
            .insert(name.to_owned(), AttrValue::Enum(value.to_owned()));
    }

    /// Queue bytes for `serial_read`.
    pub fn push_serial_rx(&self, bytes: &[u8]) {
        self.state().serial_rx.extend(bytes);
    }

    /// Complete the oldest queued frame with the current pattern.
    pub fn deliver_frame(&self) -> bool {
        self.deliver_with_status(FrameStatus::Complete)
    }

    /// Complete the oldest queued frame with `status`. The callback runs
    /// on the calling thread after the driver lock is released.
    pub fn deliver_with_status(&self, status: FrameStatus) -> bool {
        deliver(&self.state, status)
    }

    /// Deliver queued frames from a `mock-pump` thread every `interval`
    /// while acquisition runs.
    pub fn stream_frames(&self, interval: Duration) {
        self.state().stream_interval = Some(interval);
    }

    /// Whether a delivery thread is running.
    pub fn streaming(&self) -> bool {
        lock(&self.pump).is_some()
    }

    fn start_stream(&self) -> DriverResult<()> {
        let Some(interval) = self.state().stream_interval else {
            return Ok(());
        };
        let state = Arc::clone(&self.state);
        let pump = Pump::spawn("mock-pump".to_owned(), move |stop| {
            while !stop.load(Ordering::Acquire) {
                deliver(&state, FrameStatus::Complete);
                thread::sleep(interval);
            }
        })
        .map_err(|_| DriverStatus::Resources)?;
        *lock(&self.pump) = Some(pump);
        Ok(())
    }

    fn stop_stream(&self) {
        let pump = lock(&self.pump).take();
        if let Some(pump) = pump {
            pump.join();
        }
    }

    /// Total number of driver calls made.
    pub fn calls(&self) -> usize {
        self.state().calls
    }

    /// Frames waiting in the capture queue.
    pub fn queued(&self) -> usize {
        self.state().queue.len()
    }

    /// Handles currently open.
    pub fn open_handles(&self) -> usize {
        self.state().open.len()
    }

    /// Camera ids passed to `camera_release`.
    pub fn released(&self) -> Vec<u32> {
        self.state().released.clone()
    }

    /// Whether `capture_start` ran without a matching `capture_end`.
    pub fn capture_active(&self) -> bool {
        self.state().capture_started
    }

    /// Whether `AcquisitionStart` ran without a matching `AcquisitionStop`.
    pub fn acquiring(&self) -> bool {
        self.state().acquiring
    }

    /// Names of attributes written, in order.
    pub fn attr_sets(&self) -> Vec<String> {
        self.state().attr_sets.clone()
    }

    /// Commands run, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    /// Last negotiated packet size bound.
    pub fn packet_size(&self) -> Option<u32> {
        self.state().packet_size
    }

    /// Every serial write with its time.
    pub fn serial_writes(&self) -> Vec<(Instant, Vec<u8>)> {
        self.state().serial_log.clone()
    }

    /// Current value of a float attribute.
    pub fn attr_f32(&self, name: &str) -> Option<f32> {
        match self.state().attributes.get(name) {
            Some(AttrValue::F32(value)) => Some(*value),
            _ => None,
        }
    }

    /// Current value of an enum attribute.
    pub fn attr_enum(&self, name: &str) -> Option<String> {
        match self.state().attributes.get(name) {
            Some(AttrValue::Enum(value)) => Some(value.clone()),
            _ => None,
        }
    }
}

impl NativeDriver for MockDriver {
    fn list_cameras(&self) -> DriverResult<Vec<CameraIdentity>> {
        let mut state = self.state();
        state.calls += 1;
        Ok(state.cameras.clone())
    }

    fn camera_open(&self, unique_id: u32, _access: AccessMode) -> DriverResult<DeviceHandle> {
        let mut state = self.state();
        state.enter(MockOp::Open, None)?;
        if !state.cameras.iter().any(|camera| camera.unique_id == unique_id) {
            return Err(DriverStatus::NotFound);
        }
        let handle = DeviceHandle(state.next_handle);
        state.next_handle += 1;
        state.open.insert(handle, unique_id);
        Ok(handle)
    }

    fn camera_close(&self, handle: DeviceHandle) -> DriverResult<()> {
        let mut state = self.state();
        let checked = state.enter(MockOp::Close, None);
        // The handle is gone even when the close reports a failure.
        state.open.remove(&handle).ok_or(DriverStatus::BadHandle)?;
        checked
    }

    fn camera_release(&self, unique_id: u32) -> DriverResult<()> {
        let mut state = self.state();
        state.calls += 1;
        state.released.push(unique_id);
        state.open.retain(|_, id| *id != unique_id);
        Ok(())
    }

    fn capture_start(&self, handle: DeviceHandle) -> DriverResult<()> {
        let mut state = self.state();
        state.enter(MockOp::CaptureStart, None)?;
        state.check_handle(handle)?;
        state.capture_started = true;
        Ok(())
    }

    fn capture_end(&self, handle: DeviceHandle) -> DriverResult<()> {
        let mut state = self.state();
        state.enter(MockOp::CaptureEnd, None)?;
        state.check_handle(handle)?;
        state.capture_started = false;
        Ok(())
    }

    fn capture_queue_frame(
        &self,
        handle: DeviceHandle,
        frame: QueuedFrame,
        callback: FrameCallback,
    ) -> Result<(), QueueError> {
        let mut state = self.state();
        let accepted = state
            .enter(MockOp::QueueFrame, None)
            .and_then(|()| state.check_handle(handle))
            .and_then(|()| {
                if state.capture_started {
                    Ok(())
                } else {
                    Err(DriverStatus::BadSequence)
                }
            });
        match accepted {
            Ok(()) => {
                state.queue.push_back((frame, callback));
                Ok(())
            }
            Err(status) => Err(QueueError { status, frame }),
        }
    }

    fn capture_queue_clear(&self, handle: DeviceHandle) -> DriverResult<Vec<QueuedFrame>> {
        let mut state = self.state();
        state.enter(MockOp::QueueClear, None)?;
        state.check_handle(handle)?;
        Ok(state.queue.drain(..).map(|(frame, _)| frame).collect())
    }

    fn capture_adjust_packet_size(&self, _unique_id: u32, max_size: u32) -> DriverResult<()> {
        let mut state = self.state();
        state.enter(MockOp::AdjustPacketSize, None)?;
        state.packet_size = Some(max_size);
        Ok(())
    }

    fn attr_f32_get(&self, handle: DeviceHandle, name: &str) -> DriverResult<f32> {
        let mut state = self.state();
        state.enter(MockOp::AttrGet, Some(name))?;
        state.check_handle(handle)?;
        match state.attribute(name)? {
            AttrValue::F32(value) => Ok(*value),
            _ => Err(DriverStatus::WrongType),
        }
    }

    fn attr_f32_set(&self, handle: DeviceHandle, name: &str, value: f32) -> DriverResult<()> {
        let mut state = self.state();
        state.enter(MockOp::AttrSet, Some(name))?;
        state.check_handle(handle)?;
        state.write_attribute(name, AttrValue::F32(value))
    }

    fn attr_u32_get(&self, handle: DeviceHandle, name: &str) -> DriverResult<u32> {
        let mut state = self.state();
        state.enter(MockOp::AttrGet, Some(name))?;
        state.check_handle(handle)?;
        match state.attribute(name)? {
            AttrValue::U32(value) => Ok(*value),
            _ => Err(DriverStatus::WrongType),
        }
    }

    fn attr_u32_set(&self, handle: DeviceHandle, name: &str, value: u32) -> DriverResult<()> {
        let mut state = self.state();
        state.enter(MockOp::AttrSet, Some(name))?;
        state.check_handle(handle)?;
        state.write_attribute(name, AttrValue::U32(value))
    }

    fn attr_enum_get(&self, handle: DeviceHandle, name: &str) -> DriverResult<String> {
        let mut state = self.state();
        state.enter(MockOp::AttrGet, Some(name))?;
        state.check_handle(handle)?;
        match state.attribute(name)? {
            AttrValue::Enum(value) => Ok(value.clone()),
            _ => Err(DriverStatus::WrongType),
        }
    }

    fn attr_enum_set(&self, handle: DeviceHandle, name: &str, value: &str) -> DriverResult<()> {
        let mut state = self.state();
        state.enter(MockOp::AttrSet, Some(name))?;
        state.check_handle(handle)?;
        state.write_attribute(name, AttrValue::Enum(value.to_owned()))
    }

    fn command_run(&self, handle: DeviceHandle, name: &str) -> DriverResult<()> {
        {
            let mut state = self.state();
            state.enter(MockOp::Command, Some(name))?;
            state.check_handle(handle)?;
            match name {
                "AcquisitionStart" => state.acquiring = true,
                "AcquisitionStop" => state.acquiring = false,
                _ => return Err(DriverStatus::NotFound),
            }
            state.commands.push(name.to_owned());
        }
        // The delivery thread takes the state lock, so it is started and
        // stopped without holding it.
        match name {
            "AcquisitionStart" => self.start_stream(),
            _ => {
                self.stop_stream();
                Ok(())
            }
        }
    }

    fn serial_setup(&self, handle: DeviceHandle) -> DriverResult<()> {
        let mut state = self.state();
        state.enter(MockOp::SerialSetup, None)?;
        state.check_handle(handle)
    }

    fn serial_write(&self, handle: DeviceHandle, bytes: &[u8]) -> DriverResult<()> {
        let mut state = self.state();
        state.enter(MockOp::SerialWrite, None)?;
        state.check_handle(handle)?;
        state.serial_log.push((Instant::now(), bytes.to_vec()));
        Ok(())
    }

    fn serial_read(&self, handle: DeviceHandle, buf: &mut [u8]) -> DriverResult<usize> {
        let mut state = self.state();
        state.enter(MockOp::SerialRead, None)?;
        state.check_handle(handle)?;
        let mut received = 0;
        for slot in buf.iter_mut() {
            let Some(byte) = state.serial_rx.pop_front() else {
                break;
            };
            *slot = byte;
            received += 1;
        }
        Ok(received)
    }
}

impl Drop for MockDriver {
    fn drop(&mut self) {
        self.stop_stream();
    }
}

/// Fill a single-channel 8-bit image with a test pattern.
fn fill_pattern(data: &mut [u8], width: usize, pattern: TestPattern) {
    match pattern {
        TestPattern::Gradient => {
            let span = width.saturating_sub(1).max(1);
            for (offset, byte) in data.iter_mut().enumerate() {
                let x = offset % width.max(1);
                *byte = u8::try_from(x * 255 / span).unwrap_or(u8::MAX);
            }
        }
        TestPattern::Solid(value) => data.fill(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferLedger;
    use crate::traits::FrameDescriptor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn frame(ledger: &BufferLedger, index: usize) -> QueuedFrame {
        QueuedFrame {
            descriptor: FrameDescriptor {
                index,
                generation: 1,
                buffer_len: 64 * 48,
                ancillary_len: 0,
            },
            buffer: ledger.allocate(64 * 48),
        }
    }

    #[test]
    fn test_mock_open_close() {
        let mock = MockDriver::new();
        let identity = mock.identity();
        let handle = mock
            .camera_open(identity.unique_id, AccessMode::Master)
            .expect("open should succeed");
        assert_eq!(mock.open_handles(), 1);
        assert_eq!(mock.camera_open(1, AccessMode::Master), Err(DriverStatus::NotFound));

        mock.camera_close(handle).expect("close should succeed");
        assert_eq!(mock.camera_close(handle), Err(DriverStatus::BadHandle));
    }

    #[test]
    fn test_mock_queue_requires_capture_start() {
        let mock = MockDriver::new();
        let ledger = BufferLedger::default();
        let handle = mock
            .camera_open(mock.identity().unique_id, AccessMode::Master)
            .expect("open");
        let noop: FrameCallback = Arc::new(|_| {});

        let rejected = mock
            .capture_queue_frame(handle, frame(&ledger, 0), Arc::clone(&noop))
            .expect_err("not started");
        assert_eq!(rejected.status, DriverStatus::BadSequence);
        assert_eq!(rejected.frame.descriptor.index, 0);

        mock.capture_start(handle).expect("start");
        mock.capture_queue_frame(handle, frame(&ledger, 1), noop)
            .expect("queue");
        assert_eq!(mock.queued(), 1);
        let cleared = mock.capture_queue_clear(handle).expect("clear");
        assert_eq!(cleared.len(), 1);
        assert_eq!(mock.queued(), 0);
    }

    #[test]
    fn test_mock_delivery_fills_gradient() {
        let mock = MockDriver::new();
        let ledger = BufferLedger::default();
        let handle = mock
            .camera_open(mock.identity().unique_id, AccessMode::Master)
            .expect("open");
        mock.capture_start(handle).expect("start");

        let first_row = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&first_row);
        let callback: FrameCallback = Arc::new(move |completed| {
            let row = completed.buffer.as_slice().get(..64).unwrap_or_default().to_vec();
            *sink.lock().expect("sink") = row;
            assert_eq!(completed.info.frame_count, 1);
            assert_eq!(completed.status, FrameStatus::Complete);
        });
        mock.capture_queue_frame(handle, frame(&ledger, 0), callback)
            .expect("queue");

        assert!(mock.deliver_frame());
        assert!(!mock.deliver_frame(), "queue is empty");
        let row = first_row.lock().expect("sink").clone();
        assert_eq!(row.first(), Some(&0));
        assert_eq!(row.last(), Some(&255));
        assert!(row.windows(2).all(|pair| pair.first() <= pair.last()));
    }

    #[test]
    fn test_mock_failure_is_one_shot_and_named() {
        let mock = MockDriver::new();
        let handle = mock
            .camera_open(mock.identity().unique_id, AccessMode::Master)
            .expect("open");
        mock.fail_next_named(MockOp::AttrGet, "Height", DriverStatus::Timeout);

        assert_eq!(mock.attr_u32_get(handle, "Width"), Ok(64));
        assert_eq!(mock.attr_u32_get(handle, "Height"), Err(DriverStatus::Timeout));
        assert_eq!(mock.attr_u32_get(handle, "Height"), Ok(48));
        assert_eq!(mock.attr_f32_get(handle, "Width"), Err(DriverStatus::WrongType));
    }

    #[test]
    fn test_mock_callback_runs_without_driver_lock() {
        let mock = Arc::new(MockDriver::new());
        let ledger = BufferLedger::default();
        let handle = mock
            .camera_open(mock.identity().unique_id, AccessMode::Master)
            .expect("open");
        mock.capture_start(handle).expect("start");

        let requeued = Arc::new(AtomicUsize::new(0));
        let driver = Arc::clone(&mock);
        let count = Arc::clone(&requeued);
        let callback: FrameCallback = Arc::new(move |completed| {
            let frame = QueuedFrame {
                descriptor: completed.descriptor,
                buffer: completed.buffer,
            };
            let again: FrameCallback = Arc::new(|_| {});
            if driver.capture_queue_frame(handle, frame, again).is_ok() {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });
        mock.capture_queue_frame(handle, frame(&ledger, 0), callback)
            .expect("queue");

        assert!(mock.deliver_frame());
        assert_eq!(requeued.load(Ordering::SeqCst), 1);
        assert_eq!(mock.queued(), 1);
    }
}
