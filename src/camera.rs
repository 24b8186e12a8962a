//! The camera object: device handle, attribute access, capture and serial I/O.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::attributes::{
    names, ColorTransformation, ColorTransformationMode, EnumAttribute, ExposureAlgorithm,
    ExposureMode, ExposureSettings, PixelFormat, COLOR_COEFFICIENT_ATTRIBUTES,
};
use crate::config::CameraConfig;
use crate::lock;
use crate::notify::{FrameObserver, Observers, SubscriptionId};
use crate::serial::{Heartbeat, SerialTunnel};
use crate::session::CaptureSession;
use crate::traits::{
    AccessMode, CameraError, CameraIdentity, DeviceHandle, DriverStatus, NativeDriver, Result,
};

/// The camera's open handle, shared with the capture session and the serial
/// tunnel so they observe `close` immediately.
#[derive(Debug, Default)]
pub(crate) struct HandleCell(RwLock<Option<DeviceHandle>>);

impl HandleCell {
    pub(crate) fn get(&self) -> Option<DeviceHandle> {
        *self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn require(&self) -> Result<DeviceHandle> {
        self.get().ok_or(CameraError::Unavailable)
    }

    fn set(&self, handle: DeviceHandle) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    fn take(&self) -> Option<DeviceHandle> {
        self.0.write().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Lifecycle state of a [`Camera`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSessionState {
    /// No device handle.
    Closed,
    /// Handle open, no acquisition.
    Open,
    /// Acquiring into the frame buffer pool.
    Capturing,
}

/// A machine-vision camera driven through a [`NativeDriver`].
///
/// The heartbeat thread starts with the object and stops when it is dropped;
/// it only sends while the camera is open. Dropping an open camera closes it.
pub struct Camera {
    identity: CameraIdentity,
    config: CameraConfig,
    driver: Arc<dyn NativeDriver>,
    handle: Arc<HandleCell>,
    lifecycle: Mutex<()>,
    observers: Arc<Observers>,
    session: Arc<CaptureSession>,
    tunnel: Arc<SerialTunnel>,
    _heartbeat: Heartbeat,
}

impl Camera {
    /// Create a closed camera for `identity` with the default configuration.
    #[must_use]
    pub fn new(driver: Arc<dyn NativeDriver>, identity: CameraIdentity) -> Self {
        Self::with_config(driver, identity, CameraConfig::default())
    }

    /// Create a closed camera with an explicit configuration.
    #[must_use]
    pub fn with_config(
        driver: Arc<dyn NativeDriver>,
        identity: CameraIdentity,
        config: CameraConfig,
    ) -> Self {
        let handle = Arc::new(HandleCell::default());
        let observers = Arc::new(Observers::default());
        let session = Arc::new(CaptureSession::new(
            Arc::clone(&driver),
            Arc::clone(&handle),
            Arc::clone(&observers),
        ));
        let tunnel = Arc::new(SerialTunnel::new(
            Arc::clone(&driver),
            Arc::clone(&handle),
            config.heartbeat_interval,
            config.heartbeat_frame,
        ));
        let heartbeat = Heartbeat::spawn(Arc::clone(&tunnel));

        Self {
            identity,
            config,
            driver,
            handle,
            lifecycle: Mutex::new(()),
            observers,
            session,
            tunnel,
            _heartbeat: heartbeat,
        }
    }

    /// Identity the camera was discovered with.
    #[must_use]
    pub const fn identity(&self) -> &CameraIdentity {
        &self.identity
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &CameraConfig {
        &self.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> CaptureSessionState {
        if self.handle.get().is_none() {
            CaptureSessionState::Closed
        } else if self.session.is_capturing() {
            CaptureSessionState::Capturing
        } else {
            CaptureSessionState::Open
        }
    }

    /// Whether a device handle is held.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.handle.get().is_some()
    }

    /// The open device handle, if any.
    #[must_use]
    pub fn handle(&self) -> Option<DeviceHandle> {
        self.handle.get()
    }

    /// Open the camera with master access.
    ///
    /// Any handle the driver still holds for this camera is released first.
    /// After opening, the serial channel is set up and the wake command sent;
    /// serial problems are logged and do not fail the open.
    ///
    /// # Errors
    ///
    /// Returns the driver status if the camera cannot be opened.
    pub fn open(&self) -> Result<()> {
        let _lifecycle = lock(&self.lifecycle);
        if self.handle.get().is_some() {
            return Ok(());
        }

        let unique_id = self.identity.unique_id;
        if let Err(status) = self.driver.camera_release(unique_id) {
            tracing::debug!(unique_id, %status, "no stale handle released");
        }
        let handle = self.driver.camera_open(unique_id, AccessMode::Master)?;
        self.handle.set(handle);
        tracing::info!(unique_id, %handle, name = %self.identity.display_name, "camera opened");

        if let Err(status) = self.driver.serial_setup(handle) {
            tracing::debug!(%handle, %status, "serial channel setup failed");
        }
        if !self.tunnel.write(&self.config.wake_command) {
            tracing::debug!(%handle, "wake command not delivered");
        }
        Ok(())
    }

    /// Close the camera, ending any capture first.
    ///
    /// The handle is cleared even when the driver reports an error, so the
    /// camera is always closed afterwards.
    ///
    /// # Errors
    ///
    /// Returns the first error from ending the capture or closing the handle.
    pub fn close(&self) -> Result<()> {
        let _lifecycle = lock(&self.lifecycle);
        if self.handle.get().is_none() {
            return Ok(());
        }

        let ended = if self.session.is_capturing() {
            self.session.end()
        } else {
            Ok(())
        };
        let Some(handle) = self.handle.take() else {
            return ended;
        };
        let closed = self.driver.camera_close(handle);
        tracing::info!(%handle, ok = closed.is_ok(), "camera closed");
        ended.and(closed.map_err(CameraError::from))
    }

    /// Negotiate the largest packet size up to the configured maximum.
    ///
    /// # Errors
    ///
    /// `Unavailable` when closed, or the driver status.
    pub fn adjust_packet_size(&self) -> Result<()> {
        self.handle.require()?;
        let max = self.config.max_packet_size;
        self.driver
            .capture_adjust_packet_size(self.identity.unique_id, max)?;
        tracing::debug!(unique_id = self.identity.unique_id, max, "packet size adjusted");
        Ok(())
    }

    fn f32_get(&self, name: &str) -> Result<f32> {
        let handle = self.handle.require()?;
        Ok(self.driver.attr_f32_get(handle, name)?)
    }

    fn f32_set(&self, name: &str, value: f32) -> Result<()> {
        let handle = self.handle.require()?;
        Ok(self.driver.attr_f32_set(handle, name, value)?)
    }

    fn u32_get(&self, name: &str) -> Result<u32> {
        let handle = self.handle.require()?;
        Ok(self.driver.attr_u32_get(handle, name)?)
    }

    fn u32_set(&self, name: &str, value: u32) -> Result<()> {
        let handle = self.handle.require()?;
        Ok(self.driver.attr_u32_set(handle, name, value)?)
    }

    fn enum_get<T: EnumAttribute>(&self) -> Result<T> {
        let handle = self.handle.require()?;
        let raw = self.driver.attr_enum_get(handle, T::ATTRIBUTE)?;
        T::parse_driver_str(&raw)
    }

    fn enum_set<T: EnumAttribute>(&self, value: T) -> Result<()> {
        let handle = self.handle.require()?;
        let raw = value.driver_str().ok_or(DriverStatus::OutOfRange)?;
        Ok(self.driver.attr_enum_set(handle, T::ATTRIBUTE, raw)?)
    }

    /// Mainboard temperature in degrees Celsius.
    ///
    /// # Errors
    ///
    /// `Unavailable` when closed, or the driver status.
    pub fn temperature(&self) -> Result<f32> {
        self.f32_get(names::TEMPERATURE)
    }

    /// Image width in pixels.
    ///
    /// # Errors
    ///
    /// `Unavailable` when closed, or the driver status.
    pub fn width(&self) -> Result<u32> {
        self.u32_get(names::WIDTH)
    }

    /// Set the image width.
    ///
    /// # Errors
    ///
    /// `Unavailable` when closed, or the driver status.
    pub fn set_width(&self, width: u32) -> Result<()> {
        self.u32_set(names::WIDTH, width)
    }

    /// Image height in pixels.
    ///
    /// # Errors
    ///
    /// `Unavailable` when closed, or the driver status.
    pub fn height(&self) -> Result<u32> {
        self.u32_get(names::HEIGHT)
    }

    /// Set the image height.
    ///
    /// # Errors
    ///
    /// `Unavailable` when closed, or the driver status.
    pub fn set_height(&self, height: u32) -> Result<()> {
        self.u32_set(names::HEIGHT, height)
    }

    /// Current pixel format.
    ///
    /// # Errors
    ///
    /// `Unavailable` when closed, the driver status, or `AttributeParse`
    /// for a format string with no mapping.
    pub fn pixel_format(&self) -> Result<PixelFormat> {
        self.enum_get()
    }

    /// Set the pixel format. `PixelFormat::Unknown` is rejected with
    /// `DriverStatus::OutOfRange` without calling the driver.
    ///
    /// # Errors
    ///
    /// `Unavailable` when closed, or the driver status.
    pub fn set_pixel_format(&self, format: PixelFormat) -> Result<()> {
        self.enum_set(format)
    }

    /// Significant bits per channel of the current pixel format.
    ///
    /// # Errors
    ///
    /// As [`pixel_format`](Self::pixel_format).
    pub fn image_depth(&self) -> Result<u32> {
        self.pixel_format().map(PixelFormat::depth)
    }

    /// Average bytes per pixel of the current pixel format.
    ///
    /// # Errors
    ///
    /// As [`pixel_format`](Self::pixel_format).
    pub fn bytes_per_pixel(&self) -> Result<f32> {
        self.pixel_format().map(PixelFormat::bytes_per_pixel)
    }

    /// Read the color transformation mode and all nine coefficients.
    ///
    /// # Errors
    ///
    /// `Unavailable` when closed, the driver status, or `AttributeParse`.
    pub fn color_transformation(&self) -> Result<ColorTransformation> {
        let mode = self.enum_get::<ColorTransformationMode>()?;
        let mut coefficients = [0.0; 9];
        for (value, name) in coefficients.iter_mut().zip(COLOR_COEFFICIENT_ATTRIBUTES) {
            *value = self.f32_get(name)?;
        }
        Ok(ColorTransformation::from_coefficients(mode, coefficients))
    }

    /// Write the coefficients that are `Some`; the mode is not written.
    ///
    /// # Errors
    ///
    /// `Unavailable` when closed, or the first driver status.
    pub fn set_color_transformation(&self, transform: &ColorTransformation) -> Result<()> {
        self.handle.require()?;
        for (value, name) in transform
            .coefficients()
            .into_iter()
            .zip(COLOR_COEFFICIENT_ATTRIBUTES)
        {
            if let Some(value) = value {
                self.f32_set(name, value)?;
            }
        }
        Ok(())
    }

    /// Write the color transformation mode.
    ///
    /// # Errors
    ///
    /// `Unavailable` when closed, or the driver status.
    pub fn set_color_transformation_mode(&self, mode: ColorTransformationMode) -> Result<()> {
        self.enum_set(mode)
    }

    /// Read every exposure attribute.
    ///
    /// # Errors
    ///
    /// `Unavailable` when closed, the driver status, or `AttributeParse`.
    pub fn exposure(&self) -> Result<ExposureSettings> {
        Ok(ExposureSettings {
            algorithm: self.enum_get::<ExposureAlgorithm>()?,
            mode: self.enum_get::<ExposureMode>()?,
            tolerance: self.u32_get(names::EXPOSURE_AUTO_TOLERANCE)?,
            max: self.u32_get(names::EXPOSURE_AUTO_MAX)?,
            min: self.u32_get(names::EXPOSURE_AUTO_MIN)?,
            outliers: self.u32_get(names::EXPOSURE_AUTO_OUTLIERS)?,
            rate: self.u32_get(names::EXPOSURE_AUTO_RATE)?,
            target: self.u32_get(names::EXPOSURE_AUTO_TARGET)?,
            value: self.u32_get(names::EXPOSURE_VALUE)?,
        })
    }

    /// Write every exposure attribute, enumerations first.
    ///
    /// # Errors
    ///
    /// `Unavailable` when closed, or the first driver status.
    pub fn apply_exposure(&self, settings: &ExposureSettings) -> Result<()> {
        self.enum_set(settings.algorithm)?;
        self.enum_set(settings.mode)?;
        for (name, value) in settings.numeric_attributes() {
            self.u32_set(name, value)?;
        }
        Ok(())
    }

    /// Start continuous acquisition at the configured frame rate.
    ///
    /// # Errors
    ///
    /// `Unavailable` when closed or already capturing, otherwise the status
    /// of the step that failed. Nothing stays allocated or queued on error.
    pub fn begin_capture(&self) -> Result<()> {
        self.session.begin(self.config.frame_rate)
    }

    /// Stop acquisition and release the frame buffer pool. A no-op when open
    /// but not capturing. May be called from inside a frame observer.
    ///
    /// # Errors
    ///
    /// `Unavailable` when closed, otherwise the first teardown error.
    pub fn end_capture(&self) -> Result<()> {
        self.session.end()
    }

    /// Register an observer for completed frames.
    pub fn subscribe(&self, observer: Arc<dyn FrameObserver>) -> SubscriptionId {
        self.observers.subscribe(observer)
    }

    /// Remove an observer. Returns whether it was registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Frame buffers currently allocated, in the pool or elsewhere.
    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.session.live_buffers()
    }

    /// Slots in the active pool; `None` when not capturing.
    #[must_use]
    pub fn pool_len(&self) -> Option<usize> {
        self.session.pool_len()
    }

    /// Write one frame to the serial peripheral. Returns `false` when closed
    /// or when the driver rejects the write.
    pub fn write_serial(&self, bytes: &[u8]) -> bool {
        self.tunnel.write(bytes)
    }

    /// Read pending serial bytes. Returns `None` when closed or on failure.
    pub fn read_serial(&self, buf: &mut [u8]) -> Option<usize> {
        self.tunnel.read(buf)
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(%err, "error closing camera on drop");
        }
    }
}
