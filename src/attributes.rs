//! Camera attribute names, enumerated attribute tables and value types.

use crate::traits::{CameraError, Result};

/// Bit depth reported for 16-bit formats; the ADC resolution of the sensor.
pub const FULL_BIT_DEPTH: u32 = 12;

/// Attribute and command names understood by the native driver.
pub mod names {
    /// Mainboard temperature in degrees Celsius.
    pub const TEMPERATURE: &str = "DeviceTemperatureMainboard";
    /// Image width in pixels.
    pub const WIDTH: &str = "Width";
    /// Image height in pixels.
    pub const HEIGHT: &str = "Height";
    /// Pixel format of captured images.
    pub const PIXEL_FORMAT: &str = "PixelFormat";
    /// Bytes needed to hold one frame at the current settings.
    pub const TOTAL_BYTES_PER_FRAME: &str = "TotalBytesPerFrame";
    /// Frame rate used in fixed-rate trigger mode.
    pub const FRAME_RATE: &str = "FrameRate";
    /// Trigger source for frame starts.
    pub const FRAME_START_TRIGGER_MODE: &str = "FrameStartTriggerMode";
    /// Single, multi or continuous acquisition.
    pub const ACQUISITION_MODE: &str = "AcquisitionMode";
    /// Color transformation mode.
    pub const COLOR_TRANSFORMATION_MODE: &str = "ColorTransformationMode";
    /// Exposure mode.
    pub const EXPOSURE_MODE: &str = "ExposureMode";
    /// Exposure time in microseconds.
    pub const EXPOSURE_VALUE: &str = "ExposureValue";
    /// Auto-exposure algorithm.
    pub const EXPOSURE_AUTO_ALGORITHM: &str = "ExposureAutoAlg";
    /// Auto-exposure tolerance in percent.
    pub const EXPOSURE_AUTO_TOLERANCE: &str = "ExposureAutoAdjustTol";
    /// Auto-exposure upper bound in microseconds.
    pub const EXPOSURE_AUTO_MAX: &str = "ExposureAutoMax";
    /// Auto-exposure lower bound in microseconds.
    pub const EXPOSURE_AUTO_MIN: &str = "ExposureAutoMin";
    /// Auto-exposure outliers ignored, in 0.01 percent.
    pub const EXPOSURE_AUTO_OUTLIERS: &str = "ExposureAutoOutliers";
    /// Auto-exposure adjustment rate in percent.
    pub const EXPOSURE_AUTO_RATE: &str = "ExposureAutoRate";
    /// Auto-exposure target mean in percent.
    pub const EXPOSURE_AUTO_TARGET: &str = "ExposureAutoTarget";
    /// Command that starts streaming frames.
    pub const ACQUISITION_START: &str = "AcquisitionStart";
    /// Command that stops streaming frames.
    pub const ACQUISITION_STOP: &str = "AcquisitionStop";
    /// Enum value of [`FRAME_START_TRIGGER_MODE`] used while capturing.
    pub const FIXED_RATE: &str = "FixedRate";
    /// Enum value of [`ACQUISITION_MODE`] used while capturing.
    pub const CONTINUOUS: &str = "Continuous";
}

/// An attribute whose driver representation is one of a fixed set of strings.
pub trait EnumAttribute: Sized + Copy + PartialEq + 'static {
    /// Driver attribute name.
    const ATTRIBUTE: &'static str;
    /// Every driver string with the value it maps to.
    const TABLE: &'static [(&'static str, Self)];
    /// Prefix the driver may report in front of a table string.
    const PREFIX: &'static str = "";

    /// Parse a driver string, with or without [`PREFIX`](Self::PREFIX).
    /// Matching is exact but ignores ASCII case.
    fn parse_driver_str(value: &str) -> Result<Self> {
        let bare = value
            .get(..Self::PREFIX.len())
            .filter(|head| head.eq_ignore_ascii_case(Self::PREFIX))
            .and_then(|_| value.get(Self::PREFIX.len()..))
            .unwrap_or(value);
        Self::TABLE
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(bare))
            .map(|(_, parsed)| *parsed)
            .ok_or_else(|| CameraError::AttributeParse {
                attribute: Self::ATTRIBUTE,
                value: value.to_owned(),
            })
    }

    /// Canonical driver string, if the value has one.
    fn driver_str(self) -> Option<&'static str> {
        Self::TABLE
            .iter()
            .find(|(_, value)| *value == self)
            .map(|(name, _)| *name)
    }
}

/// Image pixel formats produced by the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8-bit monochrome.
    Mono8,
    /// 16-bit monochrome.
    Mono16,
    /// 8-bit raw Bayer.
    Bayer8,
    /// 16-bit raw Bayer.
    Bayer16,
    /// 8 bits per channel RGB.
    Rgb24,
    /// 16 bits per channel RGB.
    Rgb48,
    /// YUV 4:1:1.
    Yuv411,
    /// YUV 4:2:2.
    Yuv422,
    /// YUV 4:4:4.
    Yuv444,
    /// 8 bits per channel BGR.
    Bgr24,
    /// 8 bits per channel RGBA.
    Rgba32,
    /// 8 bits per channel BGRA.
    Bgra32,
    /// 12-bit monochrome, two pixels in three bytes.
    Mono12Packed,
    /// 12-bit raw Bayer, two pixels in three bytes.
    Bayer12Packed,
    /// A format the driver reported by code that this crate does not know.
    Unknown(u32),
}

impl PixelFormat {
    /// Significant bits per channel; zero for unknown formats.
    #[must_use]
    pub const fn depth(self) -> u32 {
        match self {
            Self::Mono8
            | Self::Bayer8
            | Self::Rgb24
            | Self::Bgr24
            | Self::Yuv411
            | Self::Yuv422
            | Self::Yuv444
            | Self::Rgba32
            | Self::Bgra32 => 8,
            Self::Mono12Packed | Self::Bayer12Packed => 12,
            Self::Mono16 | Self::Bayer16 | Self::Rgb48 => FULL_BIT_DEPTH,
            Self::Unknown(_) => 0,
        }
    }

    /// Average bytes each pixel occupies; zero for unknown formats.
    #[must_use]
    pub fn bytes_per_pixel(self) -> f32 {
        match self {
            Self::Mono8 | Self::Bayer8 => 1.0,
            Self::Yuv411 | Self::Mono12Packed | Self::Bayer12Packed => 1.5,
            Self::Mono16 | Self::Bayer16 | Self::Yuv422 => 2.0,
            Self::Rgb24 | Self::Bgr24 | Self::Yuv444 => 3.0,
            Self::Rgba32 | Self::Bgra32 => 4.0,
            Self::Rgb48 => 6.0,
            Self::Unknown(_) => 0.0,
        }
    }
}

impl EnumAttribute for PixelFormat {
    const ATTRIBUTE: &'static str = names::PIXEL_FORMAT;
    const PREFIX: &'static str = "eFmt";
    const TABLE: &'static [(&'static str, Self)] = &[
        ("Mono8", Self::Mono8),
        ("Mono16", Self::Mono16),
        ("Bayer8", Self::Bayer8),
        ("Bayer16", Self::Bayer16),
        ("Rgb24", Self::Rgb24),
        ("Rgb48", Self::Rgb48),
        ("Yuv411", Self::Yuv411),
        ("Yuv422", Self::Yuv422),
        ("Yuv444", Self::Yuv444),
        ("Bgr24", Self::Bgr24),
        ("Rgba32", Self::Rgba32),
        ("Bgra32", Self::Bgra32),
        ("Mono12Packed", Self::Mono12Packed),
        ("Bayer12Packed", Self::Bayer12Packed),
    ];
}

/// Color transformation modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorTransformationMode {
    /// Identity matrix.
    #[default]
    Off,
    /// User supplied coefficients.
    Manual,
    /// Factory matrix for 6500K lighting.
    Temp6500K,
}

impl EnumAttribute for ColorTransformationMode {
    const ATTRIBUTE: &'static str = names::COLOR_TRANSFORMATION_MODE;
    const TABLE: &'static [(&'static str, Self)] = &[
        ("Off", Self::Off),
        ("Manual", Self::Manual),
        ("Temp6500K", Self::Temp6500K),
    ];
}

/// Auto-exposure algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExposureAlgorithm {
    /// Drive the mean intensity to the target.
    #[default]
    Mean,
    /// Fit the intensity histogram into range.
    FitRange,
}

impl EnumAttribute for ExposureAlgorithm {
    const ATTRIBUTE: &'static str = names::EXPOSURE_AUTO_ALGORITHM;
    const TABLE: &'static [(&'static str, Self)] =
        &[("Mean", Self::Mean), ("FitRange", Self::FitRange)];
}

/// Exposure control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExposureMode {
    /// Fixed exposure value.
    #[default]
    Manual,
    /// Continuous auto exposure.
    Auto,
    /// Auto exposure until settled, then manual.
    AutoOnce,
    /// Exposure controlled by an external trigger.
    External,
}

impl EnumAttribute for ExposureMode {
    const ATTRIBUTE: &'static str = names::EXPOSURE_MODE;
    const TABLE: &'static [(&'static str, Self)] = &[
        ("Manual", Self::Manual),
        ("Auto", Self::Auto),
        ("AutoOnce", Self::AutoOnce),
        ("External", Self::External),
    ];
}

/// Exposure configuration. Read with [`Camera::exposure`] and written with
/// [`Camera::apply_exposure`]; changing the struct alone touches nothing.
///
/// [`Camera::exposure`]: crate::Camera::exposure
/// [`Camera::apply_exposure`]: crate::Camera::apply_exposure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExposureSettings {
    /// Auto-exposure algorithm.
    pub algorithm: ExposureAlgorithm,
    /// Exposure mode.
    pub mode: ExposureMode,
    /// Auto-exposure tolerance.
    pub tolerance: u32,
    /// Auto-exposure upper bound.
    pub max: u32,
    /// Auto-exposure lower bound.
    pub min: u32,
    /// Auto-exposure outliers ignored.
    pub outliers: u32,
    /// Auto-exposure adjustment rate.
    pub rate: u32,
    /// Auto-exposure target.
    pub target: u32,
    /// Manual exposure value.
    pub value: u32,
}

impl ExposureSettings {
    pub(crate) const fn numeric_attributes(&self) -> [(&'static str, u32); 7] {
        [
            (names::EXPOSURE_AUTO_TOLERANCE, self.tolerance),
            (names::EXPOSURE_AUTO_MAX, self.max),
            (names::EXPOSURE_AUTO_MIN, self.min),
            (names::EXPOSURE_AUTO_OUTLIERS, self.outliers),
            (names::EXPOSURE_AUTO_RATE, self.rate),
            (names::EXPOSURE_AUTO_TARGET, self.target),
            (names::EXPOSURE_VALUE, self.value),
        ]
    }
}

/// Color transformation matrix. A `None` coefficient leaves the device
/// value unchanged when written.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ColorTransformation {
    /// Transformation mode; written separately through
    /// [`Camera::set_color_transformation_mode`](crate::Camera::set_color_transformation_mode).
    pub mode: ColorTransformationMode,
    /// Red from red.
    pub rr: Option<f32>,
    /// Red from green.
    pub rg: Option<f32>,
    /// Red from blue.
    pub rb: Option<f32>,
    /// Green from red.
    pub gr: Option<f32>,
    /// Green from green.
    pub gg: Option<f32>,
    /// Green from blue.
    pub gb: Option<f32>,
    /// Blue from red.
    pub br: Option<f32>,
    /// Blue from green.
    pub bg: Option<f32>,
    /// Blue from blue.
    pub bb: Option<f32>,
}

pub(crate) const COLOR_COEFFICIENT_ATTRIBUTES: [&str; 9] = [
    "ColorTransformationValueRR",
    "ColorTransformationValueRG",
    "ColorTransformationValueRB",
    "ColorTransformationValueGR",
    "ColorTransformationValueGG",
    "ColorTransformationValueGB",
    "ColorTransformationValueBR",
    "ColorTransformationValueBG",
    "ColorTransformationValueBB",
];

impl ColorTransformation {
    /// Coefficients in [`COLOR_COEFFICIENT_ATTRIBUTES`] order.
    pub(crate) fn coefficients(&self) -> [Option<f32>; 9] {
        [
            self.rr, self.rg, self.rb, self.gr, self.gg, self.gb, self.br, self.bg, self.bb,
        ]
    }

    pub(crate) fn from_coefficients(
        mode: ColorTransformationMode,
        [rr, rg, rb, gr, gg, gb, br, bg, bb]: [f32; 9],
    ) -> Self {
        Self {
            mode,
            rr: Some(rr),
            rg: Some(rg),
            rb: Some(rb),
            gr: Some(gr),
            gg: Some(gg),
            gb: Some(gb),
            br: Some(br),
            bg: Some(bg),
            bb: Some(bb),
        }
    }
}
