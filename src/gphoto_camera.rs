// Still-only camera driven through the gphoto2 CLI (Canon/Nikon DSLRs over USB).
// Every capture is a one-shot external invocation; there is no persistent
// connection to the camera.

use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::camera::CameraSource;
use crate::errors::CameraError;
use crate::frame_slot::{Frame, FrameSlot};
use crate::storage::shot_filename;

const GPHOTO_BIN: &str = "gphoto2";

/// Result of one external command invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Runs external programs. Swapped for a fake in tests.
pub trait CommandRunner: Send {
    fn run(&self, program: &str, args: &[&str]) -> std::io::Result<CommandOutput>;
}

/// Blocking `std::process::Command` runner.
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> std::io::Result<CommandOutput> {
        let output = Command::new(program).args(args).output()?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

pub struct GPhotoCamera {
    runner: Box<dyn CommandRunner>,
    slot: FrameSlot,
    preview_interval: Option<Duration>,
    preview_count: usize,
}

impl GPhotoCamera {
    /// `preview_interval` of `None` or zero disables preview polling.
    pub fn new(
        runner: Box<dyn CommandRunner>,
        slot: FrameSlot,
        preview_interval: Option<Duration>,
    ) -> Self {
        GPhotoCamera {
            runner,
            slot,
            preview_interval: preview_interval.filter(|interval| !interval.is_zero()),
            preview_count: 0,
        }
    }

    /// Check that gphoto2 sees a camera on USB.
    pub fn check_connection(&self) -> Result<(), CameraError> {
        let output = self
            .runner
            .run(GPHOTO_BIN, &["--auto-detect"])
            .map_err(|e| {
                CameraError::DeviceUnavailable(format!(
                    "Failed to run gphoto2 --auto-detect: {}",
                    e
                ))
            })?;

        let output_str = String::from_utf8_lossy(&output.stdout);
        debug!("Camera detection output: {}", output_str.trim());

        if !output.success || !output_str.contains("usb:") {
            return Err(CameraError::DeviceUnavailable(
                "No camera detected. Please ensure camera is connected and turned on.".to_string(),
            ));
        }
        Ok(())
    }

    fn fetch_preview(&self) -> Result<Frame, String> {
        let output = self
            .runner
            .run(GPHOTO_BIN, &["--capture-preview", "--stdout"])
            .map_err(|e| format!("failed to run preview command: {}", e))?;

        if !output.success {
            return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
        }
        if output.stdout.is_empty() {
            return Err("empty preview".to_string());
        }

        let decoded = image::load_from_memory(&output.stdout)
            .map_err(|e| format!("undecodable preview: {}", e))?;

        Ok(Frame {
            width: decoded.width(),
            height: decoded.height(),
            jpeg: Bytes::from(output.stdout),
        })
    }
}

impl CameraSource for GPhotoCamera {
    fn open(&mut self) -> Result<(), CameraError> {
        info!("Detecting DSLR via gphoto2...");
        self.check_connection()?;
        info!("DSLR detected");
        Ok(())
    }

    fn ensure_ready(&mut self) -> Result<(), CameraError> {
        self.check_connection()
    }

    fn capture_still(&mut self, dest_dir: &Path, shot: usize) -> Result<PathBuf, CameraError> {
        let tempdir = tempfile::Builder::new()
            .prefix("photobooth_")
            .tempdir()
            .map_err(CameraError::Io)?;
        let temp_target = tempdir.path().join("shot.jpg");
        let temp_target_str = temp_target.to_string_lossy().to_string();

        info!("Capturing DSLR shot {}", shot);
        let output = self
            .runner
            .run(
                GPHOTO_BIN,
                &[
                    "--capture-image-and-download",
                    "--filename",
                    &temp_target_str,
                    "--force-overwrite",
                ],
            )
            .map_err(|e| CameraError::CaptureFailed(format!("Failed to run capture command: {}", e)))?;

        if !output.success {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CameraError::CaptureFailed(stderr.trim().to_string()));
        }

        let downloaded = first_jpeg_in(tempdir.path())?.ok_or_else(|| {
            CameraError::CaptureFailed("gphoto2 reported success but no photo was downloaded".to_string())
        })?;

        let dest = dest_dir.join(shot_filename(shot));
        move_file(&downloaded, &dest)?;
        info!("DSLR captured shot {}: {:?}", shot, dest);
        Ok(dest)
    }

    fn preview_interval(&self) -> Option<Duration> {
        self.preview_interval
    }

    fn poll_preview(&mut self) {
        match self.fetch_preview() {
            Ok(frame) => {
                self.preview_count += 1;
                if self.preview_count % 30 == 0 {
                    debug!("Fetched {} DSLR preview frames", self.preview_count);
                }
                self.slot.publish(frame);
            }
            Err(e) => debug!("DSLR preview capture failed: {}", e),
        }
    }

    fn close(&mut self) {
        info!("DSLR camera released");
        self.slot.clear();
    }

    fn type_name(&self) -> &'static str {
        "DSLR (gphoto2)"
    }
}

fn first_jpeg_in(dir: &Path) -> Result<Option<PathBuf>, CameraError> {
    let mut jpegs: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("jpg"))
                .unwrap_or(false)
        })
        .collect();
    jpegs.sort();
    Ok(jpegs.into_iter().next())
}

/// Rename, falling back to copy + remove when the temp dir is on another
/// filesystem.
fn move_file(from: &Path, to: &Path) -> Result<(), CameraError> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to).map_err(|e| {
        CameraError::CaptureFailed(format!("move {:?} -> {:?}: {}", from, to, e))
    })?;
    if let Err(e) = std::fs::remove_file(from) {
        warn!("Failed to remove temporary capture {:?}: {}", from, e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Copy)]
    enum Behaviour {
        Succeed,
        FailExit,
        SucceedWithoutFile,
    }

    struct FakeGphoto {
        behaviour: Behaviour,
        detect_output: &'static str,
        preview: Option<Vec<u8>>,
        calls: Arc<Mutex<Vec<Vec<String>>>>,
    }

    impl CommandRunner for FakeGphoto {
        fn run(&self, program: &str, args: &[&str]) -> std::io::Result<CommandOutput> {
            assert_eq!(program, "gphoto2");
            self.calls
                .lock()
                .unwrap()
                .push(args.iter().map(|a| a.to_string()).collect());

            match args.first().copied() {
                Some("--auto-detect") => Ok(CommandOutput {
                    success: true,
                    stdout: self.detect_output.as_bytes().to_vec(),
                    stderr: vec![],
                }),
                Some("--capture-preview") => match &self.preview {
                    Some(bytes) => Ok(CommandOutput {
                        success: true,
                        stdout: bytes.clone(),
                        stderr: vec![],
                    }),
                    None => Ok(CommandOutput {
                        success: false,
                        stdout: vec![],
                        stderr: b"*** Error: Could not capture preview".to_vec(),
                    }),
                },
                Some("--capture-image-and-download") => match self.behaviour {
                    Behaviour::Succeed => {
                        std::fs::write(args[2], b"\xFF\xD8dslr\xFF\xD9")?;
                        Ok(CommandOutput {
                            success: true,
                            ..Default::default()
                        })
                    }
                    Behaviour::SucceedWithoutFile => Ok(CommandOutput {
                        success: true,
                        ..Default::default()
                    }),
                    Behaviour::FailExit => Ok(CommandOutput {
                        success: false,
                        stdout: vec![],
                        stderr: b"*** Error (-53: 'Could not claim the USB device') ***".to_vec(),
                    }),
                },
                _ => panic!("unexpected gphoto2 invocation: {:?}", args),
            }
        }
    }

    fn camera(behaviour: Behaviour, preview: Option<Vec<u8>>) -> (GPhotoCamera, FrameSlot) {
        let slot = FrameSlot::new();
        let runner = FakeGphoto {
            behaviour,
            detect_output: "Model                          Port\n----------------------------------------------------------\nCanon EOS 2000D                usb:001,004\n",
            preview,
            calls: Arc::new(Mutex::new(Vec::new())),
        };
        (
            GPhotoCamera::new(
                Box::new(runner),
                slot.clone(),
                Some(Duration::from_secs(1)),
            ),
            slot,
        )
    }

    fn tiny_jpeg() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(8, 6, image::Rgb([200, 10, 10]));
        let mut out = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut out, image::ImageOutputFormat::Jpeg(80))
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_open_detects_usb_camera() {
        let (mut cam, _) = camera(Behaviour::Succeed, None);
        assert!(cam.open().is_ok());
    }

    #[test]
    fn test_open_without_camera_is_device_unavailable() {
        let runner = FakeGphoto {
            behaviour: Behaviour::Succeed,
            detect_output: "Model                          Port\n----------------------------------------------------------\n",
            preview: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        };
        let mut cam = GPhotoCamera::new(Box::new(runner), FrameSlot::new(), None);
        assert!(matches!(
            cam.open(),
            Err(CameraError::DeviceUnavailable(_))
        ));
        assert!(cam.preview_interval().is_none());
    }

    #[test]
    fn test_zero_preview_interval_disables_polling() {
        let runner = FakeGphoto {
            behaviour: Behaviour::Succeed,
            detect_output: "",
            preview: Some(tiny_jpeg()),
            calls: Arc::new(Mutex::new(Vec::new())),
        };
        let cam = GPhotoCamera::new(Box::new(runner), FrameSlot::new(), Some(Duration::ZERO));
        assert!(cam.preview_interval().is_none());
    }

    #[test]
    fn test_capture_moves_download_into_session_dir() {
        let dest = tempfile::tempdir().unwrap();
        let (mut cam, _) = camera(Behaviour::Succeed, None);

        let path = cam.capture_still(dest.path(), 2).unwrap();

        assert_eq!(path, dest.path().join("shot_2.jpg"));
        assert_eq!(std::fs::read(&path).unwrap(), b"\xFF\xD8dslr\xFF\xD9");
    }

    #[test]
    fn test_capture_non_zero_exit_is_capture_error() {
        let dest = tempfile::tempdir().unwrap();
        let (mut cam, _) = camera(Behaviour::FailExit, None);

        let err = cam.capture_still(dest.path(), 1).unwrap_err();
        assert!(matches!(err, CameraError::CaptureFailed(ref msg) if msg.contains("USB")));
        assert!(!dest.path().join("shot_1.jpg").exists());
    }

    #[test]
    fn test_capture_without_downloaded_file_is_capture_error() {
        let dest = tempfile::tempdir().unwrap();
        let (mut cam, _) = camera(Behaviour::SucceedWithoutFile, None);
        assert!(matches!(
            cam.capture_still(dest.path(), 1),
            Err(CameraError::CaptureFailed(_))
        ));
    }

    #[test]
    fn test_preview_publishes_decoded_frame() {
        let (mut cam, slot) = camera(Behaviour::Succeed, Some(tiny_jpeg()));
        cam.poll_preview();
        let frame = slot.latest().expect("preview frame");
        assert_eq!((frame.width, frame.height), (8, 6));
    }

    #[test]
    fn test_preview_failure_is_skipped() {
        let (mut cam, slot) = camera(Behaviour::Succeed, None);
        cam.poll_preview();
        assert!(slot.latest().is_none());

        let (mut cam, slot) = camera(Behaviour::Succeed, Some(b"not a jpeg".to_vec()));
        cam.poll_preview();
        assert!(slot.latest().is_none());
    }
}
