// Camera sources: the trait the booth drives plus the continuous (webcam)
// variant fed by a background preview thread.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::errors::CameraError;
use crate::frame_slot::{Frame, FrameSlot};
use crate::storage::shot_filename;

const CAPTURE_ATTEMPTS: usize = 3;
const CAPTURE_RETRY_DELAY: Duration = Duration::from_millis(100);
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(50);
const MAX_CONSECUTIVE_READ_FAILURES: usize = 50;

/// What the booth needs from a camera, whichever kind it is.
pub trait CameraSource: Send {
    /// Acquire the device. Fails with `DeviceUnavailable` when it cannot be used.
    fn open(&mut self) -> Result<(), CameraError>;

    /// Checked before every session so a dead device blocks the countdown.
    fn ensure_ready(&mut self) -> Result<(), CameraError>;

    /// Take one still and store it as `shot_{shot}.jpg` inside `dest_dir`.
    fn capture_still(&mut self, dest_dir: &Path, shot: usize) -> Result<PathBuf, CameraError>;

    /// Period at which the orchestrator should call `poll_preview`, if any.
    fn preview_interval(&self) -> Option<Duration> {
        None
    }

    /// Best-effort preview refresh. Never fails the caller.
    fn poll_preview(&mut self) {}

    fn close(&mut self);

    fn type_name(&self) -> &'static str;
}

/// An open stream of frames from a device.
pub trait FrameReader: Send {
    fn read_frame(&mut self) -> Result<Frame, CameraError>;
}

/// A device that can be opened into a `FrameReader`.
pub trait FrameDevice: Send {
    fn open_reader(&self) -> Result<Box<dyn FrameReader>, CameraError>;

    fn describe(&self) -> String;
}

/// Webcam-style camera. In continuous mode one background thread keeps the
/// frame slot fresh and stills are taken from the slot; in one-shot mode the
/// device is opened for every capture.
pub struct WebcamCamera {
    device: Box<dyn FrameDevice>,
    slot: FrameSlot,
    continuous: bool,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    retry_delay: Duration,
}

impl WebcamCamera {
    pub fn new(device: Box<dyn FrameDevice>, slot: FrameSlot, continuous: bool) -> Self {
        Self {
            device,
            slot,
            continuous,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            retry_delay: CAPTURE_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn is_streaming(&self) -> bool {
        self.worker
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    fn start_preview_thread(&mut self) -> Result<(), CameraError> {
        // Opening on the caller's thread surfaces device errors immediately
        let reader = self.device.open_reader()?;
        // Frames from before a reopen must never be taken as a new shot
        self.slot.clear();
        self.slot.clear_fault();
        self.running.store(true, Ordering::SeqCst);

        let slot = self.slot.clone();
        let running = self.running.clone();
        let description = self.device.describe();
        let handle = std::thread::Builder::new()
            .name("camera-preview".to_string())
            .spawn(move || preview_loop(reader, slot, running, description))
            .map_err(CameraError::Io)?;

        self.worker = Some(handle);
        Ok(())
    }

    fn stop_preview_thread(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("Camera preview thread panicked");
            }
        }
    }

    fn capture_from_slot(&self, out_path: &Path) -> Result<(), CameraError> {
        for attempt in 1..=CAPTURE_ATTEMPTS {
            if let Some(reason) = self.slot.fault() {
                return Err(CameraError::CaptureFailed(reason));
            }
            if let Some(frame) = self.slot.latest() {
                return write_frame(&frame, out_path);
            }
            debug!("No frame in slot yet (attempt {})", attempt);
            std::thread::sleep(self.retry_delay);
        }
        Err(CameraError::NoFrameAvailable)
    }

    fn capture_one_shot(&self, out_path: &Path) -> Result<(), CameraError> {
        let mut reader = self.device.open_reader()?;
        let mut last_error = CameraError::NoFrameAvailable;
        for attempt in 1..=CAPTURE_ATTEMPTS {
            match reader.read_frame() {
                Ok(frame) => {
                    self.slot.publish(frame.clone());
                    return write_frame(&frame, out_path);
                }
                Err(e) => {
                    debug!("Frame read attempt {} failed: {}", attempt, e);
                    last_error = e;
                    std::thread::sleep(self.retry_delay);
                }
            }
        }
        Err(last_error)
    }
}

impl CameraSource for WebcamCamera {
    fn open(&mut self) -> Result<(), CameraError> {
        if !self.continuous {
            // Probe only; one-shot mode reopens per capture
            self.device.open_reader().map(drop)?;
            info!("Webcam {} available (one-shot mode)", self.device.describe());
            return Ok(());
        }
        if self.is_streaming() {
            return Ok(());
        }
        self.stop_preview_thread();
        self.start_preview_thread()?;
        info!("Webcam {} streaming preview", self.device.describe());
        Ok(())
    }

    fn ensure_ready(&mut self) -> Result<(), CameraError> {
        if self.continuous && self.is_streaming() && self.slot.fault().is_none() {
            return Ok(());
        }
        if let Some(reason) = self.slot.fault() {
            warn!("Reopening camera after preview fault: {}", reason);
        }
        self.open()
    }

    fn capture_still(&mut self, dest_dir: &Path, shot: usize) -> Result<PathBuf, CameraError> {
        let out_path = dest_dir.join(shot_filename(shot));
        if self.continuous {
            self.capture_from_slot(&out_path)?;
        } else {
            self.capture_one_shot(&out_path)?;
        }
        info!("Captured shot {}: {:?}", shot, out_path);
        Ok(out_path)
    }

    fn close(&mut self) {
        if self.worker.is_some() {
            info!("Stopping camera preview thread");
        }
        self.stop_preview_thread();
    }

    fn type_name(&self) -> &'static str {
        "Webcam"
    }
}

impl Drop for WebcamCamera {
    fn drop(&mut self) {
        self.stop_preview_thread();
    }
}

fn write_frame(frame: &Frame, out_path: &Path) -> Result<(), CameraError> {
    std::fs::write(out_path, &frame.jpeg)
        .map_err(|e| CameraError::CaptureFailed(format!("save {}: {}", out_path.display(), e)))
}

fn preview_loop(
    mut reader: Box<dyn FrameReader>,
    slot: FrameSlot,
    running: Arc<AtomicBool>,
    description: String,
) {
    let mut frame_count = 0usize;
    let mut consecutive_failures = 0usize;

    while running.load(Ordering::SeqCst) {
        match reader.read_frame() {
            Ok(frame) => {
                consecutive_failures = 0;
                frame_count += 1;
                if frame_count % 300 == 0 {
                    debug!("Captured {} preview frames from {}", frame_count, description);
                }
                slot.publish(frame);
            }
            Err(e) => {
                consecutive_failures += 1;
                if consecutive_failures >= MAX_CONSECUTIVE_READ_FAILURES {
                    error!("Camera {} stopped delivering frames: {}", description, e);
                    slot.set_fault(format!("{} stopped delivering frames: {}", description, e));
                    break;
                }
                std::thread::sleep(READ_ERROR_BACKOFF);
            }
        }
    }

    info!("Preview loop ended after {} frames", frame_count);
}

// V4L2 device access, MJPEG only
#[cfg(target_os = "linux")]
mod v4l_device {
    use bytes::Bytes;
    use v4l::buffer::Type;
    use v4l::io::traits::CaptureStream;
    use v4l::io::userptr;
    use v4l::prelude::*;
    use v4l::video::Capture;
    use v4l::{Format, FourCC};

    use super::{FrameDevice, FrameReader};
    use crate::errors::CameraError;
    use crate::frame_slot::Frame;

    pub struct V4lDevice {
        path: String,
        width: u32,
        height: u32,
    }

    impl V4lDevice {
        pub fn new(path: impl Into<String>, width: u32, height: u32) -> Self {
            Self {
                path: path.into(),
                width,
                height,
            }
        }
    }

    struct V4lReader {
        stream: userptr::Stream,
        width: u32,
        height: u32,
    }

    fn configure_device(dev: &mut Device, width: u32, height: u32) -> Result<Format, String> {
        let mut fmt = dev.format().map_err(|e| format!("format(): {e}"))?;
        fmt.width = width;
        fmt.height = height;
        fmt.fourcc = FourCC::new(b"MJPG");
        let fmt = dev
            .set_format(&fmt)
            .map_err(|e| format!("set_format(): {e}"))?;

        if fmt.fourcc == FourCC::new(b"MJPG") {
            return Ok(fmt);
        }

        Err(format!(
            "Device does not support MJPEG, got {}. Only MJPEG is supported.",
            fmt.fourcc
        ))
    }

    impl FrameDevice for V4lDevice {
        fn open_reader(&self) -> Result<Box<dyn FrameReader>, CameraError> {
            let mut dev = Device::with_path(&self.path).map_err(|e| {
                CameraError::DeviceUnavailable(format!("open {}: {}", self.path, e))
            })?;
            let fmt = configure_device(&mut dev, self.width, self.height)
                .map_err(CameraError::DeviceUnavailable)?;
            let stream = userptr::Stream::with_buffers(&dev, Type::VideoCapture, 4).map_err(|e| {
                CameraError::DeviceUnavailable(format!("create stream on {}: {}", self.path, e))
            })?;

            Ok(Box::new(V4lReader {
                stream,
                width: fmt.width,
                height: fmt.height,
            }))
        }

        fn describe(&self) -> String {
            format!("{} ({}x{})", self.path, self.width, self.height)
        }
    }

    impl FrameReader for V4lReader {
        fn read_frame(&mut self) -> Result<Frame, CameraError> {
            let (buffer, meta) = self.stream.next().map_err(CameraError::Io)?;
            let used = meta.bytesused as usize;
            let data = if used > 0 && used <= buffer.len() {
                &buffer[..used]
            } else {
                buffer
            };
            Ok(Frame {
                jpeg: Bytes::copy_from_slice(data),
                width: self.width,
                height: self.height,
            })
        }
    }
}

#[cfg(target_os = "linux")]
pub use v4l_device::V4lDevice;
