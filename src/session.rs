// Capture session state machine.
//
// Idle -> CountingDown -> Capturing -> (AwaitingNextShot -> CountingDown)*
//      -> Composing -> Reviewing | ErrorReview -> Idle
//
// The machine never sleeps or spawns. The owner calls `tick` once per second
// while `wants_ticks` is true and `advance` while `has_pending_step` is true.

use chrono::Local;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::camera::CameraSource;
use crate::config::{Config, ConfigError};
use crate::errors::{AppError, AppResult};
use crate::printers::PrintDispatcher;
use crate::storage::{allocate_session_dir, PRINT_FILENAME};
use crate::templates::Composer;

pub const NO_PHOTOS_MESSAGE: &str = "No photos were captured";
pub const NO_PHOTO_TO_PRINT: &str = "No photo to print";
pub const PRINTING_DISABLED: &str = "Printing is disabled";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShotCount {
    One,
    Three,
}

impl ShotCount {
    pub fn get(self) -> u32 {
        match self {
            ShotCount::One => 1,
            ShotCount::Three => 3,
        }
    }
}

impl TryFrom<u32> for ShotCount {
    type Error = ConfigError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ShotCount::One),
            3 => Ok(ShotCount::Three),
            other => Err(ConfigError::InvalidShotCount(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    CountingDown,
    Capturing,
    AwaitingNextShot,
    Composing,
    Reviewing,
    ErrorReview,
}

/// One countdown -> capture -> compose -> review cycle and its directory.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    dir: PathBuf,
    shot_count: ShotCount,
    attempts: u32,
    captured_paths: Vec<PathBuf>,
    composed_path: Option<PathBuf>,
}

impl Session {
    fn new(dir: PathBuf, shot_count: ShotCount) -> Self {
        let id = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            id,
            dir,
            shot_count,
            attempts: 0,
            captured_paths: Vec::new(),
            composed_path: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn shot_count(&self) -> ShotCount {
        self.shot_count
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn captured_paths(&self) -> &[PathBuf] {
        &self.captured_paths
    }

    pub fn composed_path(&self) -> Option<&Path> {
        self.composed_path.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Captured,
    Composed,
    Error,
    Discarded,
    Printed,
    PrintFailed,
}

impl SessionOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionOutcome::Captured => "captured",
            SessionOutcome::Composed => "composed",
            SessionOutcome::Error => "error",
            SessionOutcome::Discarded => "discarded",
            SessionOutcome::Printed => "printed",
            SessionOutcome::PrintFailed => "print_failed",
        }
    }
}

/// Emitted on every session milestone for the history ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Started {
        session_id: String,
        shot_count: u32,
    },
    Finished {
        session_id: String,
        captured_count: u32,
        composed_path: Option<PathBuf>,
        outcome: SessionOutcome,
    },
    Discarded {
        session_id: String,
    },
    Printed {
        session_id: String,
        copies: u32,
        success: bool,
    },
}

/// What the presentation shell renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoothSnapshot {
    pub state: SessionState,
    pub session_id: Option<String>,
    pub countdown: Option<u32>,
    pub shot: Option<u32>,
    pub shot_count: Option<u32>,
    /// Relative to the session base directory, e.g. `20240517_140309/print.jpg`.
    pub review_image: Option<String>,
    pub error: Option<String>,
    pub status: Option<String>,
    pub controls_enabled: bool,
    pub can_print: bool,
    pub can_reprint: bool,
}

impl Default for BoothSnapshot {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            session_id: None,
            countdown: None,
            shot: None,
            shot_count: None,
            review_image: None,
            error: None,
            status: None,
            controls_enabled: true,
            can_print: false,
            can_reprint: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub countdown_seconds: u32,
    pub capture_delay: u32,
    pub save_dir: PathBuf,
    pub printing_enabled: bool,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            countdown_seconds: config.session.countdown_seconds,
            capture_delay: config.session.capture_delay,
            save_dir: config.images_path(),
            printing_enabled: config.printing.enabled,
        }
    }
}

/// A composed print that can be sent again without recapturing.
#[derive(Debug, Clone, PartialEq)]
pub struct ReprintSource {
    pub session_id: String,
    pub path: PathBuf,
}

pub struct SessionMachine {
    settings: SessionSettings,
    camera: Box<dyn CameraSource>,
    composer: Composer,
    printer: PrintDispatcher,
    state: SessionState,
    session: Option<Session>,
    countdown: u32,
    reprint: Option<ReprintSource>,
    status: Option<String>,
    error: Option<String>,
    events: Vec<SessionEvent>,
}

impl SessionMachine {
    pub fn new(
        settings: SessionSettings,
        camera: Box<dyn CameraSource>,
        composer: Composer,
        printer: PrintDispatcher,
    ) -> Self {
        Self {
            settings,
            camera,
            composer,
            printer,
            state: SessionState::Idle,
            session: None,
            countdown: 0,
            reprint: None,
            status: None,
            error: None,
            events: Vec::new(),
        }
    }

    /// Offer reprint of a print made before this machine existed.
    pub fn seed_reprint(&mut self, source: ReprintSource) {
        if source.path.is_file() {
            info!("Reprint available for session {}", source.session_id);
            self.reprint = Some(source);
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn reprint_source(&self) -> Option<&ReprintSource> {
        self.reprint.as_ref()
    }

    pub fn countdown(&self) -> Option<u32> {
        (self.state == SessionState::CountingDown).then_some(self.countdown)
    }

    pub fn wants_ticks(&self) -> bool {
        self.state == SessionState::CountingDown
    }

    pub fn has_pending_step(&self) -> bool {
        matches!(
            self.state,
            SessionState::Capturing | SessionState::AwaitingNextShot | SessionState::Composing
        )
    }

    /// Start and print controls are only live outside an active capture.
    pub fn controls_enabled(&self) -> bool {
        matches!(
            self.state,
            SessionState::Idle | SessionState::Reviewing | SessionState::ErrorReview
        )
    }

    pub fn can_print(&self) -> bool {
        self.state == SessionState::Reviewing
    }

    pub fn can_reprint(&self) -> bool {
        self.state == SessionState::Idle && self.reprint.is_some()
    }

    pub fn preview_interval(&self) -> Option<std::time::Duration> {
        self.camera.preview_interval()
    }

    pub fn poll_preview(&mut self) {
        self.camera.poll_preview();
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn start_session(&mut self, shots: ShotCount) -> AppResult<()> {
        if self.state != SessionState::Idle {
            let message = "A session is already in progress".to_string();
            self.status = Some(message.clone());
            return Err(AppError::InvalidState(message));
        }

        if let Err(e) = self.camera.ensure_ready() {
            error!("Cannot start session: {}", e);
            self.status = Some(e.to_string());
            return Err(e.into());
        }

        let dir = match allocate_session_dir(&self.settings.save_dir, Local::now().naive_local()) {
            Ok(dir) => dir,
            Err(e) => {
                error!("Cannot start session: {}", e);
                self.status = Some("Could not create a folder for the photos".to_string());
                return Err(e.into());
            }
        };

        let session = Session::new(dir, shots);
        info!(
            "Session {} started with {} shot(s)",
            session.id,
            shots.get()
        );
        self.events.push(SessionEvent::Started {
            session_id: session.id.clone(),
            shot_count: shots.get(),
        });
        self.session = Some(session);
        self.status = None;
        self.error = None;
        self.begin_countdown(self.settings.countdown_seconds);
        Ok(())
    }

    /// One countdown second. The last one moves on to a capture.
    pub fn tick(&mut self) -> bool {
        if self.state != SessionState::CountingDown {
            return false;
        }
        if self.countdown > 1 {
            self.countdown -= 1;
        } else {
            self.countdown = 0;
            self.state = SessionState::Capturing;
        }
        true
    }

    /// Run the transient step the machine is in, if any.
    pub fn advance(&mut self) -> bool {
        match self.state {
            SessionState::Capturing => {
                self.capture_next();
                true
            }
            SessionState::AwaitingNextShot => {
                self.begin_countdown(self.settings.capture_delay);
                true
            }
            SessionState::Composing => {
                self.compose();
                true
            }
            _ => false,
        }
    }

    pub fn discard(&mut self) -> AppResult<()> {
        if !matches!(
            self.state,
            SessionState::Reviewing | SessionState::ErrorReview
        ) {
            return Err(AppError::InvalidState("Nothing to discard".to_string()));
        }

        if let Some(session) = self.session.take() {
            // Files stay on disk; only the in-memory session ends here
            if self.state == SessionState::Reviewing {
                self.retain_for_reprint(&session);
                self.events.push(SessionEvent::Discarded {
                    session_id: session.id.clone(),
                });
            }
            info!("Session {} discarded", session.id);
        }

        self.finish(None);
        Ok(())
    }

    pub fn print(&mut self) -> AppResult<()> {
        match self.state {
            SessionState::Reviewing => {}
            SessionState::ErrorReview => {
                self.status = Some(NO_PHOTO_TO_PRINT.to_string());
                return Err(AppError::InvalidState(NO_PHOTO_TO_PRINT.to_string()));
            }
            _ => return Err(AppError::InvalidState("Nothing to print".to_string())),
        }

        let Some(session) = self.session.take() else {
            self.finish(None);
            return Err(AppError::InvalidState(NO_PHOTO_TO_PRINT.to_string()));
        };
        self.retain_for_reprint(&session);

        let status = if self.settings.printing_enabled {
            match session.composed_path.clone() {
                Some(path) => self.dispatch(&session.id, &path),
                None => NO_PHOTO_TO_PRINT.to_string(),
            }
        } else {
            info!("Print requested while printing is disabled");
            PRINTING_DISABLED.to_string()
        };

        self.finish(Some(status));
        Ok(())
    }

    pub fn reprint(&mut self) -> AppResult<()> {
        if self.state != SessionState::Idle {
            return Err(AppError::InvalidState(
                "Reprint is only available between sessions".to_string(),
            ));
        }

        let Some(source) = self.reprint.clone() else {
            self.status = Some("No photo to reprint".to_string());
            return Err(AppError::InvalidState("No photo to reprint".to_string()));
        };

        if !source.path.is_file() {
            warn!("Reprint source {:?} is gone", source.path);
            self.reprint = None;
            self.status = Some("No photo to reprint".to_string());
            return Err(AppError::InvalidState("No photo to reprint".to_string()));
        }

        let status = if self.settings.printing_enabled {
            self.dispatch(&source.session_id, &source.path)
        } else {
            PRINTING_DISABLED.to_string()
        };
        self.status = Some(status);
        Ok(())
    }

    /// Close the camera. Called once when the booth shuts down.
    pub fn shutdown(&mut self) {
        info!("Closing {} camera", self.camera.type_name());
        self.camera.close();
    }

    pub fn snapshot(&self) -> BoothSnapshot {
        let session = self.session.as_ref();
        let shot = match self.state {
            SessionState::CountingDown | SessionState::Capturing => session
                .map(|s| (s.attempts + 1).min(s.shot_count.get())),
            _ => None,
        };
        let review_image = match self.state {
            SessionState::Reviewing => session
                .filter(|s| s.composed_path.is_some())
                .map(|s| format!("{}/{}", s.id, PRINT_FILENAME)),
            _ => None,
        };

        BoothSnapshot {
            state: self.state,
            session_id: session.map(|s| s.id.clone()),
            countdown: self.countdown(),
            shot,
            shot_count: session.map(|s| s.shot_count.get()),
            review_image,
            error: self.error.clone(),
            status: self.status.clone(),
            controls_enabled: self.controls_enabled(),
            can_print: self.can_print(),
            can_reprint: self.can_reprint(),
        }
    }

    /// A countdown of `seconds` captures on its `seconds`-th tick; zero
    /// captures right away.
    fn begin_countdown(&mut self, seconds: u32) {
        self.countdown = seconds;
        self.state = if seconds == 0 {
            SessionState::Capturing
        } else {
            SessionState::CountingDown
        };
    }

    fn capture_next(&mut self) {
        let Some(session) = self.session.as_mut() else {
            self.finish(None);
            return;
        };

        let shot = session.attempts + 1;
        match self.camera.capture_still(&session.dir, shot as usize) {
            Ok(path) => {
                if session.captured_paths.len() < session.shot_count.get() as usize {
                    info!("Captured shot {} -> {:?}", shot, path);
                    session.captured_paths.push(path);
                }
            }
            Err(e) => {
                warn!("Shot {} skipped: {}", shot, e);
                self.status = Some(format!("Shot {} failed", shot));
            }
        }
        session.attempts += 1;

        self.state = if session.attempts < session.shot_count.get() {
            SessionState::AwaitingNextShot
        } else {
            SessionState::Composing
        };
    }

    fn compose(&mut self) {
        let Some(session) = self.session.as_mut() else {
            self.finish(None);
            return;
        };

        let captured_count = session.captured_paths.len() as u32;
        if session.captured_paths.is_empty() {
            error!("Session {}: {}", session.id, NO_PHOTOS_MESSAGE);
            self.reprint = None;
            self.error = Some(NO_PHOTOS_MESSAGE.to_string());
            self.state = SessionState::ErrorReview;
            self.events.push(SessionEvent::Finished {
                session_id: session.id.clone(),
                captured_count,
                composed_path: None,
                outcome: SessionOutcome::Error,
            });
            return;
        }

        let destination = session.dir.join(PRINT_FILENAME);
        match self.composer.compose(&session.captured_paths, &destination) {
            Ok(path) => {
                session.composed_path = Some(path.clone());
                self.state = SessionState::Reviewing;
                self.events.push(SessionEvent::Finished {
                    session_id: session.id.clone(),
                    captured_count,
                    composed_path: Some(path),
                    outcome: SessionOutcome::Composed,
                });
            }
            Err(e) => {
                error!("Session {}: composition failed: {}", session.id, e);
                self.reprint = None;
                self.error = Some(format!(
                    "{} photo(s) were taken but the print could not be created: {}",
                    captured_count, e
                ));
                self.state = SessionState::ErrorReview;
                self.events.push(SessionEvent::Finished {
                    session_id: session.id.clone(),
                    captured_count,
                    composed_path: None,
                    outcome: SessionOutcome::Error,
                });
            }
        }
    }

    fn dispatch(&mut self, session_id: &str, path: &Path) -> String {
        let copies = self.printer.copies();
        let result = self.printer.print(path);
        self.events.push(SessionEvent::Printed {
            session_id: session_id.to_string(),
            copies,
            success: result.is_ok(),
        });
        match result {
            Ok(job_id) => format!("Printing... (job {})", job_id),
            Err(e) => format!("Print failed: {}", e),
        }
    }

    fn retain_for_reprint(&mut self, session: &Session) {
        if let Some(path) = session.composed_path.as_ref() {
            self.reprint = Some(ReprintSource {
                session_id: session.id.clone(),
                path: path.clone(),
            });
        }
    }

    fn finish(&mut self, status: Option<String>) {
        self.session = None;
        self.error = None;
        self.countdown = 0;
        self.status = status;
        self.state = SessionState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrintConfig;
    use crate::errors::{CameraError, PrinterError};
    use crate::printers::{JobOption, PrintConnection};
    use crate::storage::shot_filename;
    use crate::templates::LayoutSpec;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Succeeds or fails each capture according to a script.
    struct ScriptedCamera {
        outcomes: VecDeque<bool>,
        ready: bool,
        closed: Arc<AtomicUsize>,
    }

    impl CameraSource for ScriptedCamera {
        fn open(&mut self) -> Result<(), CameraError> {
            Ok(())
        }

        fn ensure_ready(&mut self) -> Result<(), CameraError> {
            if self.ready {
                Ok(())
            } else {
                Err(CameraError::DeviceUnavailable("unplugged".to_string()))
            }
        }

        fn capture_still(&mut self, dest_dir: &Path, shot: usize) -> Result<PathBuf, CameraError> {
            if self.outcomes.pop_front().unwrap_or(false) {
                let path = dest_dir.join(shot_filename(shot));
                image::RgbImage::from_pixel(30, 20, image::Rgb([200, 40, 40]))
                    .save(&path)
                    .unwrap();
                Ok(path)
            } else {
                Err(CameraError::CaptureFailed("scripted failure".to_string()))
            }
        }

        fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }

        fn type_name(&self) -> &'static str {
            "Scripted"
        }
    }

    struct CountingConnection {
        calls: Arc<AtomicUsize>,
    }

    impl PrintConnection for CountingConnection {
        fn printer_names(&self) -> Vec<String> {
            vec!["Selphy".to_string()]
        }

        fn submit(
            &mut self,
            _printer: &str,
            _file: &Path,
            _options: &[JobOption],
        ) -> Result<String, PrinterError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("job-{}", n))
        }

        fn type_name(&self) -> &'static str {
            "Counting"
        }
    }

    struct Harness {
        machine: SessionMachine,
        print_calls: Arc<AtomicUsize>,
        camera_closed: Arc<AtomicUsize>,
        _dir: tempfile::TempDir,
    }

    fn harness(outcomes: &[bool], printing_enabled: bool) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let print_calls = Arc::new(AtomicUsize::new(0));
        let camera_closed = Arc::new(AtomicUsize::new(0));
        let settings = SessionSettings {
            countdown_seconds: 2,
            capture_delay: 1,
            save_dir: dir.path().join("sessions"),
            printing_enabled,
        };
        let camera = ScriptedCamera {
            outcomes: outcomes.iter().copied().collect(),
            ready: true,
            closed: camera_closed.clone(),
        };
        let printer = PrintDispatcher::new(
            Box::new(CountingConnection {
                calls: print_calls.clone(),
            }),
            &PrintConfig::default(),
        );
        let composer = Composer::new(LayoutSpec::default().with_canvas(120, 180));
        Harness {
            machine: SessionMachine::new(settings, Box::new(camera), composer, printer),
            print_calls,
            camera_closed,
            _dir: dir,
        }
    }

    fn run_until_review(machine: &mut SessionMachine) {
        for _ in 0..100 {
            if !machine.advance() && !machine.tick() {
                break;
            }
        }
    }

    #[test]
    fn test_shot_count_parsing() {
        assert_eq!(ShotCount::try_from(1).unwrap(), ShotCount::One);
        assert_eq!(ShotCount::try_from(3).unwrap().get(), 3);
        assert!(matches!(
            ShotCount::try_from(2),
            Err(ConfigError::InvalidShotCount(2))
        ));
    }

    #[test]
    fn test_countdown_ticks_then_captures() {
        let mut h = harness(&[true], true);
        h.machine.start_session(ShotCount::One).unwrap();

        assert_eq!(h.machine.state(), SessionState::CountingDown);
        assert_eq!(h.machine.countdown(), Some(2));
        assert!(!h.machine.controls_enabled());

        h.machine.tick();
        assert_eq!(h.machine.countdown(), Some(1));
        assert_eq!(h.machine.session().unwrap().attempts(), 0);

        // two seconds, two ticks
        h.machine.tick();
        assert_eq!(h.machine.state(), SessionState::Capturing);
        h.machine.advance();
        assert_eq!(h.machine.state(), SessionState::Composing);
        assert_eq!(h.machine.session().unwrap().attempts(), 1);
    }

    #[test]
    fn test_inter_shot_countdown_uses_capture_delay() {
        let mut h = harness(&[true, true, true], true);
        h.machine.start_session(ShotCount::Three).unwrap();
        h.machine.tick();
        h.machine.tick();
        h.machine.advance();
        assert_eq!(h.machine.state(), SessionState::AwaitingNextShot);
        h.machine.advance();
        assert_eq!(h.machine.state(), SessionState::CountingDown);
        assert_eq!(h.machine.countdown(), Some(1));
        assert_eq!(h.machine.snapshot().shot, Some(2));
    }

    #[test]
    fn test_full_session_reaches_review() {
        let mut h = harness(&[true, true, true], true);
        h.machine.start_session(ShotCount::Three).unwrap();
        run_until_review(&mut h.machine);

        assert_eq!(h.machine.state(), SessionState::Reviewing);
        let session = h.machine.session().unwrap();
        assert_eq!(session.captured_paths().len(), 3);
        assert!(session.composed_path().unwrap().ends_with(PRINT_FILENAME));

        let snapshot = h.machine.snapshot();
        assert!(snapshot.can_print);
        assert!(snapshot.controls_enabled);
        assert_eq!(
            snapshot.review_image,
            Some(format!("{}/print.jpg", session.id()))
        );
    }

    #[test]
    fn test_failed_shots_still_count_as_attempts() {
        let mut h = harness(&[false, true, false], true);
        h.machine.start_session(ShotCount::Three).unwrap();
        run_until_review(&mut h.machine);

        assert_eq!(h.machine.state(), SessionState::Reviewing);
        let session = h.machine.session().unwrap();
        assert_eq!(session.attempts(), 3);
        assert_eq!(session.captured_paths().len(), 1);
        assert!(session.captured_paths()[0].ends_with("shot_2.jpg"));
    }

    #[test]
    fn test_zero_captures_is_error_review() {
        let mut h = harness(&[false], true);
        h.machine.start_session(ShotCount::One).unwrap();
        run_until_review(&mut h.machine);

        assert_eq!(h.machine.state(), SessionState::ErrorReview);
        assert_eq!(h.machine.error(), Some(NO_PHOTOS_MESSAGE));
        assert!(!h.machine.can_print());

        let err = h.machine.print().unwrap_err();
        assert_eq!(err.to_string(), NO_PHOTO_TO_PRINT);
        assert_eq!(h.machine.state(), SessionState::ErrorReview);
        assert_eq!(h.machine.status(), Some(NO_PHOTO_TO_PRINT));
        assert_eq!(h.print_calls.load(Ordering::SeqCst), 0);

        h.machine.discard().unwrap();
        assert_eq!(h.machine.state(), SessionState::Idle);
        assert!(!h.machine.can_reprint());
    }

    #[test]
    fn test_zero_second_countdown_captures_immediately() {
        let mut h = harness(&[true, true, true], true);
        h.machine.settings.countdown_seconds = 0;
        h.machine.settings.capture_delay = 0;
        h.machine.start_session(ShotCount::Three).unwrap();

        assert_eq!(h.machine.state(), SessionState::Capturing);
        assert!(!h.machine.wants_ticks());
        while h.machine.advance() {}
        assert_eq!(h.machine.state(), SessionState::Reviewing);
        assert_eq!(h.machine.session().unwrap().captured_paths().len(), 3);
    }

    #[test]
    fn test_compose_failure_after_capture_is_error_review() {
        let mut h = harness(&[true], true);
        h.machine.start_session(ShotCount::One).unwrap();
        // a directory where print.jpg should go makes the save fail
        let dir = h.machine.session().unwrap().dir().to_path_buf();
        std::fs::create_dir(dir.join(PRINT_FILENAME)).unwrap();
        run_until_review(&mut h.machine);

        assert_eq!(h.machine.state(), SessionState::ErrorReview);
        let message = h.machine.error().unwrap();
        assert!(message.contains("photo(s) were taken"), "{}", message);
        assert_ne!(message, NO_PHOTOS_MESSAGE);
        assert!(!h.machine.can_print());
        assert!(h.machine.snapshot().review_image.is_none());
        assert!(dir.join(shot_filename(1)).is_file());

        let events = h.machine.drain_events();
        assert!(matches!(
            events.last(),
            Some(SessionEvent::Finished {
                captured_count: 1,
                composed_path: None,
                outcome: SessionOutcome::Error,
                ..
            })
        ));
    }

    #[test]
    fn test_errored_session_withdraws_reprint() {
        let mut h = harness(&[true, false], true);
        h.machine.start_session(ShotCount::One).unwrap();
        run_until_review(&mut h.machine);
        h.machine.discard().unwrap();
        assert!(h.machine.can_reprint());

        h.machine.start_session(ShotCount::One).unwrap();
        run_until_review(&mut h.machine);
        assert_eq!(h.machine.state(), SessionState::ErrorReview);
        h.machine.discard().unwrap();

        assert_eq!(h.machine.state(), SessionState::Idle);
        assert!(!h.machine.can_reprint());
        assert!(!h.machine.snapshot().can_reprint);
        assert!(h.machine.reprint().is_err());
        assert_eq!(h.print_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_start_refused_while_active() {
        let mut h = harness(&[true], true);
        h.machine.start_session(ShotCount::One).unwrap();
        let first = h.machine.session().unwrap().id().to_string();

        assert!(matches!(
            h.machine.start_session(ShotCount::Three),
            Err(AppError::InvalidState(_))
        ));
        assert_eq!(h.machine.session().unwrap().id(), first);
        assert_eq!(h.machine.state(), SessionState::CountingDown);
    }

    #[test]
    fn test_start_refused_when_camera_unavailable() {
        let mut h = harness(&[], true);
        let dir = tempfile::tempdir().unwrap();
        let camera = ScriptedCamera {
            outcomes: VecDeque::new(),
            ready: false,
            closed: Arc::new(AtomicUsize::new(0)),
        };
        h.machine.camera = Box::new(camera);
        h.machine.settings.save_dir = dir.path().join("sessions");

        assert!(matches!(
            h.machine.start_session(ShotCount::One),
            Err(AppError::Camera(CameraError::DeviceUnavailable(_)))
        ));
        assert_eq!(h.machine.state(), SessionState::Idle);
        assert!(!dir.path().join("sessions").exists());
    }

    #[test]
    fn test_print_returns_to_idle_and_offers_reprint() {
        let mut h = harness(&[true], true);
        h.machine.start_session(ShotCount::One).unwrap();
        run_until_review(&mut h.machine);
        let composed = h.machine.session().unwrap().composed_path().unwrap().to_path_buf();

        h.machine.print().unwrap();
        assert_eq!(h.machine.state(), SessionState::Idle);
        assert_eq!(h.print_calls.load(Ordering::SeqCst), 1);
        assert!(h.machine.status().unwrap().contains("job-1"));
        assert!(h.machine.can_reprint());

        h.machine.reprint().unwrap();
        assert_eq!(h.print_calls.load(Ordering::SeqCst), 2);
        assert!(composed.exists());
    }

    #[test]
    fn test_printing_disabled_never_dispatches() {
        let mut h = harness(&[true], false);
        h.machine.start_session(ShotCount::One).unwrap();
        run_until_review(&mut h.machine);

        h.machine.print().unwrap();
        assert_eq!(h.machine.state(), SessionState::Idle);
        assert_eq!(h.machine.status(), Some(PRINTING_DISABLED));

        h.machine.reprint().unwrap();
        assert_eq!(h.machine.status(), Some(PRINTING_DISABLED));
        assert_eq!(h.print_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_discard_keeps_files() {
        let mut h = harness(&[true, true, true], true);
        h.machine.start_session(ShotCount::Three).unwrap();
        run_until_review(&mut h.machine);

        let session = h.machine.session().unwrap().clone();
        h.machine.discard().unwrap();

        assert_eq!(h.machine.state(), SessionState::Idle);
        for path in session.captured_paths() {
            assert!(path.exists());
        }
        assert!(session.composed_path().unwrap().exists());
        assert_eq!(
            h.machine.reprint_source().unwrap().session_id,
            session.id()
        );
    }

    #[test]
    fn test_new_session_resets_paths() {
        let mut h = harness(&[true, true], true);
        h.machine.start_session(ShotCount::One).unwrap();
        run_until_review(&mut h.machine);
        let first = h.machine.session().unwrap().clone();
        h.machine.discard().unwrap();

        h.machine.start_session(ShotCount::One).unwrap();
        assert!(h.machine.session().unwrap().captured_paths().is_empty());
        assert!(!h.machine.can_reprint());
        run_until_review(&mut h.machine);

        let second = h.machine.session().unwrap();
        assert_ne!(second.dir(), first.dir());
        assert_ne!(second.composed_path(), first.composed_path());
    }

    #[test]
    fn test_events_follow_lifecycle() {
        let mut h = harness(&[true], true);
        h.machine.start_session(ShotCount::One).unwrap();
        run_until_review(&mut h.machine);
        h.machine.print().unwrap();

        let events = h.machine.drain_events();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], SessionEvent::Started { shot_count: 1, .. }));
        assert!(matches!(
            events[1],
            SessionEvent::Finished {
                captured_count: 1,
                outcome: SessionOutcome::Composed,
                ..
            }
        ));
        assert!(matches!(
            events[2],
            SessionEvent::Printed {
                copies: 1,
                success: true,
                ..
            }
        ));
        assert!(h.machine.drain_events().is_empty());
    }

    #[test]
    fn test_reprint_requires_idle_and_source() {
        let mut h = harness(&[true], true);
        assert!(h.machine.reprint().is_err());
        assert_eq!(h.machine.status(), Some("No photo to reprint"));

        h.machine.start_session(ShotCount::One).unwrap();
        assert!(h.machine.reprint().is_err());
        assert_eq!(h.print_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_seeded_reprint_ignores_missing_file() {
        let mut h = harness(&[], true);
        h.machine.seed_reprint(ReprintSource {
            session_id: "20240101_000000".to_string(),
            path: PathBuf::from("/nonexistent/print.jpg"),
        });
        assert!(!h.machine.can_reprint());
    }

    #[test]
    fn test_shutdown_closes_camera() {
        let mut h = harness(&[], true);
        h.machine.shutdown();
        assert_eq!(h.camera_closed.load(Ordering::SeqCst), 1);
    }
}
