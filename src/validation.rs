//! Frame validation utilities for test pattern verification.
//!
//! This module provides functions to validate that captured frames contain
//! expected test patterns. Useful for integration testing with virtual cameras.

use crate::attributes::PixelFormat;
use crate::notify::OwnedFrame;

/// Minimum brightness change across a row for it to count as a gradient.
const MIN_GRADIENT_SPAN: i32 = 50;

/// Columns skipped between gradient samples.
const SAMPLE_STEP: usize = 8;

/// Why a captured frame or sequence failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// No frames to validate.
    #[error("cannot validate empty frame sequence")]
    EmptySequence,
    /// Frame counters skip or repeat.
    #[error("frame sequence gap at index {index}: expected {expected}, got {actual}")]
    SequenceGap {
        /// Position in the slice.
        index: usize,
        /// Counter that should have followed.
        expected: u32,
        /// Counter found.
        actual: u32,
    },
    /// The check needs a different pixel format.
    #[error("unsupported pixel format {0:?}")]
    UnsupportedFormat(PixelFormat),
    /// Fewer bytes than the frame's dimensions require.
    #[error("frame holds {actual} bytes, expected {expected}")]
    Truncated {
        /// Bytes the dimensions imply.
        expected: usize,
        /// Bytes present.
        actual: usize,
    },
    /// Brightness decreases along the sampled row.
    #[error("gradient not monotonically increasing at x={x}: {value} < previous {previous}")]
    NotMonotonic {
        /// Column of the offending sample.
        x: usize,
        /// Sample value.
        value: u8,
        /// Previous sample value.
        previous: u8,
    },
    /// The row is too flat to be a gradient.
    #[error("insufficient brightness change for gradient: {change} (expected at least 50)")]
    FlatGradient {
        /// Difference between the last and first sample.
        change: i32,
    },
}

/// Validates that frame counters increment by exactly one.
///
/// # Errors
///
/// Returns `EmptySequence` for an empty slice and `SequenceGap` at the first
/// counter that does not follow its predecessor.
pub fn validate_frame_sequence(frames: &[OwnedFrame]) -> Result<(), ValidationError> {
    if frames.is_empty() {
        return Err(ValidationError::EmptySequence);
    }

    for (index, pair) in frames.windows(2).enumerate() {
        let [prev, curr] = pair else {
            continue;
        };
        let expected = prev.frame_count.wrapping_add(1);
        if curr.frame_count != expected {
            return Err(ValidationError::SequenceGap {
                index: index + 1,
                expected,
                actual: curr.frame_count,
            });
        }
    }

    Ok(())
}

/// Validates that a frame holds at least `width * height * bytes_per_pixel`
/// bytes.
///
/// # Errors
///
/// Returns `UnsupportedFormat` for unknown formats and `Truncated` when the
/// data is shorter than the dimensions imply.
pub fn validate_frame_size(frame: &OwnedFrame) -> Result<(), ValidationError> {
    let bytes_per_pixel = frame.format.bytes_per_pixel();
    if bytes_per_pixel <= 0.0 {
        return Err(ValidationError::UnsupportedFormat(frame.format));
    }

    let pixels = u64::from(frame.width) * u64::from(frame.height);
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let expected = (pixels as f64 * f64::from(bytes_per_pixel)).ceil() as usize;
    if frame.data.len() < expected {
        return Err(ValidationError::Truncated {
            expected,
            actual: frame.data.len(),
        });
    }
    Ok(())
}

/// Validates that a Mono8 frame contains a horizontal gradient.
///
/// Samples the center row every few pixels and checks that brightness never
/// drops by more than one step and rises by a significant amount overall.
///
/// # Errors
///
/// Returns `UnsupportedFormat` for formats other than Mono8, `Truncated` if
/// the center row is missing, `NotMonotonic` or `FlatGradient` otherwise.
pub fn validate_mono_gradient(frame: &OwnedFrame) -> Result<(), ValidationError> {
    if frame.format != PixelFormat::Mono8 {
        return Err(ValidationError::UnsupportedFormat(frame.format));
    }
    validate_frame_size(frame)?;

    let width = frame.width as usize;
    let start = (frame.height as usize / 2) * width;
    let row = frame
        .data
        .get(start..start + width)
        .ok_or(ValidationError::Truncated {
            expected: start + width,
            actual: frame.data.len(),
        })?;

    let mut samples = row.iter().copied().enumerate().step_by(SAMPLE_STEP);
    let Some((_, first)) = samples.next() else {
        return Err(ValidationError::FlatGradient { change: 0 });
    };
    let mut previous = first;
    for (x, value) in samples {
        // Allow small decreases due to rounding
        if i32::from(value) < i32::from(previous) - 1 {
            return Err(ValidationError::NotMonotonic { x, value, previous });
        }
        previous = value;
    }

    let change = i32::from(previous) - i32::from(first);
    if change < MIN_GRADIENT_SPAN {
        return Err(ValidationError::FlatGradient { change });
    }
    Ok(())
}
