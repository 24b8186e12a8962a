//! Pv-cam-capture binary for testing camera capture.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use pv_cam_capture::{Camera, CameraConfig, Frame, NativeDriver, OwnedFrame, V4l2Driver};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// V4L2 device index (/dev/videoN)
    #[arg(short, long, default_value_t = 0)]
    device: u32,

    /// Number of frames to capture
    #[arg(short, long, default_value_t = 30)]
    frames: usize,

    /// Capture frame rate
    #[arg(long, default_value_t = 15.0)]
    frame_rate: f32,

    /// List capture devices and exit
    #[arg(long)]
    list: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let driver: Arc<dyn NativeDriver> = Arc::new(V4l2Driver::new());
    if args.list {
        return list(driver.as_ref());
    }
    run(driver, &args)
}

fn list(driver: &dyn NativeDriver) -> Result<()> {
    let cameras = driver.list_cameras().context("Failed to enumerate cameras")?;
    if cameras.is_empty() {
        println!("No capture devices found");
    }
    for camera in cameras {
        println!(
            "{:>3}  {:<32} {}",
            camera.unique_id, camera.display_name, camera.serial
        );
    }
    Ok(())
}

fn run(driver: Arc<dyn NativeDriver>, args: &Args) -> Result<()> {
    let identity = driver
        .list_cameras()
        .context("Failed to enumerate cameras")?
        .into_iter()
        .find(|camera| camera.unique_id == args.device)
        .with_context(|| format!("No capture device with index {}", args.device))?;

    let config = CameraConfig::default().with_frame_rate(args.frame_rate);
    let camera = Camera::with_config(driver, identity, config);
    camera.open().context("Failed to open camera")?;

    println!("Camera: {}", camera.identity().display_name);
    println!(
        "Format: {}x{} {:?}",
        camera.width().context("Failed to read width")?,
        camera.height().context("Failed to read height")?,
        camera.pixel_format().context("Failed to read pixel format")?
    );

    // Frames are copied off the delivery thread; a full channel drops them
    // instead of stalling the driver.
    let (tx, rx) = mpsc::sync_channel::<OwnedFrame>(4);
    camera.subscribe(Arc::new(move |frame: &Frame<'_>| {
        let _ = tx.try_send(frame.to_owned_frame());
    }));

    camera.begin_capture().context("Failed to start capture")?;
    let mut received = 0;
    while received < args.frames {
        let Ok(frame) = rx.recv_timeout(Duration::from_secs(5)) else {
            camera.end_capture().context("Failed to stop capture")?;
            bail!("Timed out after {received} frames");
        };
        received += 1;
        println!(
            "Frame {}: {} bytes, timestamp: {:?}",
            frame.frame_count,
            frame.data.len(),
            frame.timestamp
        );
    }
    camera.end_capture().context("Failed to stop capture")?;
    camera.close().context("Failed to close camera")?;
    Ok(())
}
