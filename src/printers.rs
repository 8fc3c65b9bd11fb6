#[cfg(feature = "printer-cups")]
use printers::common::base::job::PrinterJobOptions;
#[cfg(feature = "printer-cups")]
use printers::common::converters::Converter;
use std::path::Path;
use tracing::{info, warn};

use crate::config::PrintConfig;
use crate::errors::PrinterError;

/// One job option as passed to the spooler, e.g. `("copies", "2")`.
pub type JobOption = (String, String);

/// The external print system: lists printers and accepts submissions.
pub trait PrintConnection: Send {
    fn printer_names(&self) -> Vec<String>;

    /// Submit `file` to `printer`; returns the spooler's job id.
    fn submit(
        &mut self,
        printer: &str,
        file: &Path,
        options: &[JobOption],
    ) -> Result<String, PrinterError>;

    fn type_name(&self) -> &'static str;
}

// CUPS through the printers crate
#[cfg(feature = "printer-cups")]
pub struct CupsConnection;

#[cfg(feature = "printer-cups")]
impl PrintConnection for CupsConnection {
    fn printer_names(&self) -> Vec<String> {
        printers::get_printers()
            .into_iter()
            .map(|p| p.name)
            .collect()
    }

    fn submit(
        &mut self,
        printer: &str,
        file: &Path,
        options: &[JobOption],
    ) -> Result<String, PrinterError> {
        let cups_printer = printers::get_printers()
            .into_iter()
            .find(|p| p.name == printer || p.system_name == printer)
            .ok_or_else(|| PrinterError::NotFound {
                name: printer.to_string(),
            })?;

        let job_name = options
            .iter()
            .find(|(k, _)| k == "job-name")
            .map(|(_, v)| v.as_str());
        let raw_props: Vec<(&str, &str)> = options
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let job_options = PrinterJobOptions {
            name: job_name,
            raw_properties: &raw_props,
            converter: Converter::None,
        };

        // The job id only means CUPS accepted the job, not that it printed
        let file_path = file.to_string_lossy();
        cups_printer
            .print_file(&file_path, job_options)
            .map(|job_id| job_id.to_string())
            .map_err(|e| PrinterError::SubmissionFailed(format!("CUPS print error: {}", e.message)))
    }

    fn type_name(&self) -> &'static str {
        "CUPS"
    }
}

/// Stand-in used when no real print system is configured or available.
#[derive(Default)]
pub struct MockConnection {
    submitted: u64,
}

impl PrintConnection for MockConnection {
    fn printer_names(&self) -> Vec<String> {
        vec!["Mock Printer".to_string()]
    }

    fn submit(
        &mut self,
        printer: &str,
        file: &Path,
        _options: &[JobOption],
    ) -> Result<String, PrinterError> {
        self.submitted += 1;
        info!("Mock printer '{}' accepted {:?}", printer, file);
        Ok(format!("mock-job-{}", self.submitted))
    }

    fn type_name(&self) -> &'static str {
        "Mock Printer"
    }
}

/// Pick the connection for this configuration.
pub fn new_connection(config: &PrintConfig) -> Box<dyn PrintConnection> {
    if config.use_mock {
        info!("Using mock printer");
        return Box::new(MockConnection::default());
    }
    system_connection()
}

#[cfg(feature = "printer-cups")]
fn system_connection() -> Box<dyn PrintConnection> {
    let connection = CupsConnection;
    let names = connection.printer_names();
    if names.is_empty() {
        warn!("CUPS reports no printers; jobs will fail until one is added");
    } else {
        info!("Available printers: {}", names.join(", "));
    }
    Box::new(connection)
}

#[cfg(not(feature = "printer-cups"))]
fn system_connection() -> Box<dyn PrintConnection> {
    warn!("Built without CUPS support, using mock printer");
    Box::new(MockConnection::default())
}

/// Sends composed prints to the configured printer.
pub struct PrintDispatcher {
    connection: Box<dyn PrintConnection>,
    printer_name: String,
    fallback_names: Vec<String>,
    copies: u32,
    paper_name: String,
}

impl PrintDispatcher {
    pub fn new(connection: Box<dyn PrintConnection>, config: &PrintConfig) -> Self {
        Self {
            connection,
            printer_name: config.printer_name.trim().to_string(),
            fallback_names: config.fallback_names.clone(),
            copies: config.copies.max(1),
            paper_name: config.paper_name.trim().to_string(),
        }
    }

    pub fn copies(&self) -> u32 {
        self.copies
    }

    /// Resolve which printer receives the job. An empty configured name means
    /// the first printer the connection lists.
    pub fn select_printer(&self) -> Result<String, PrinterError> {
        let available = self.connection.printer_names();

        if self.printer_name.is_empty() {
            return available
                .into_iter()
                .next()
                .ok_or_else(|| PrinterError::NotFound {
                    name: "(no printers available)".to_string(),
                });
        }

        let wanted = std::iter::once(&self.printer_name).chain(self.fallback_names.iter());
        for name in wanted {
            if available.iter().any(|p| p == name) {
                return Ok(name.clone());
            }
            warn!("Printer '{}' not available", name);
        }

        Err(PrinterError::NotFound {
            name: format!(
                "{} (available: {})",
                self.printer_name,
                if available.is_empty() {
                    "none".to_string()
                } else {
                    available.join(", ")
                }
            ),
        })
    }

    pub fn job_options(&self) -> Vec<JobOption> {
        let mut options = vec![
            ("copies".to_string(), self.copies.to_string()),
            ("fit-to-page".to_string(), "true".to_string()),
        ];
        if !self.paper_name.is_empty() {
            options.push(("media".to_string(), self.paper_name.clone()));
        }
        let job_name = format!("PhotoBooth-{}", chrono::Local::now().format("%Y%m%d-%H%M%S"));
        options.push(("job-name".to_string(), job_name));
        options
    }

    pub fn print(&mut self, file: &Path) -> Result<String, PrinterError> {
        if !file.is_file() {
            return Err(PrinterError::SubmissionFailed(format!(
                "File not found: {}",
                file.display()
            )));
        }

        let printer = self.select_printer()?;
        let options = self.job_options();
        info!(
            "Printing {:?} on '{}' via {} ({} copies)",
            file,
            printer,
            self.connection.type_name(),
            self.copies
        );

        match self.connection.submit(&printer, file, &options) {
            Ok(job_id) => {
                info!("Print job submitted with ID: {}", job_id);
                Ok(job_id)
            }
            Err(e) => {
                warn!("Print job failed: {}", e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder {
        jobs: Arc<Mutex<Vec<(String, Vec<JobOption>)>>>,
    }

    struct RecordingConnection {
        names: Vec<String>,
        recorder: Recorder,
        fail: bool,
    }

    impl PrintConnection for RecordingConnection {
        fn printer_names(&self) -> Vec<String> {
            self.names.clone()
        }

        fn submit(
            &mut self,
            printer: &str,
            _file: &Path,
            options: &[JobOption],
        ) -> Result<String, PrinterError> {
            if self.fail {
                return Err(PrinterError::SubmissionFailed("queue paused".to_string()));
            }
            let mut jobs = self.recorder.jobs.lock().unwrap();
            jobs.push((printer.to_string(), options.to_vec()));
            Ok(format!("job-{}", jobs.len()))
        }

        fn type_name(&self) -> &'static str {
            "Recording"
        }
    }

    fn dispatcher(names: &[&str], config: PrintConfig) -> (PrintDispatcher, Recorder) {
        let recorder = Recorder::default();
        let connection = RecordingConnection {
            names: names.iter().map(|s| s.to_string()).collect(),
            recorder: recorder.clone(),
            fail: false,
        };
        (PrintDispatcher::new(Box::new(connection), &config), recorder)
    }

    fn print_file() -> tempfile::NamedTempFile {
        let file = tempfile::Builder::new().suffix(".jpg").tempfile().unwrap();
        std::fs::write(file.path(), b"jpeg").unwrap();
        file
    }

    fn option<'a>(options: &'a [JobOption], key: &str) -> Option<&'a str> {
        options
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_empty_name_uses_first_printer() {
        let (mut dispatcher, recorder) =
            dispatcher(&["Selphy_CP1300", "Office"], PrintConfig::default());
        let file = print_file();

        let job = dispatcher.print(file.path()).unwrap();
        assert_eq!(job, "job-1");
        assert_eq!(recorder.jobs.lock().unwrap()[0].0, "Selphy_CP1300");
    }

    #[test]
    fn test_job_options() {
        let config = PrintConfig {
            copies: 2,
            paper_name: "4x6".to_string(),
            ..Default::default()
        };
        let (mut dispatcher, recorder) = dispatcher(&["Selphy"], config);
        let file = print_file();
        dispatcher.print(file.path()).unwrap();

        let jobs = recorder.jobs.lock().unwrap();
        let options = &jobs[0].1;
        assert_eq!(option(options, "copies"), Some("2"));
        assert_eq!(option(options, "fit-to-page"), Some("true"));
        assert_eq!(option(options, "media"), Some("4x6"));
        assert!(option(options, "job-name").unwrap().starts_with("PhotoBooth-"));
    }

    #[test]
    fn test_no_media_option_without_paper_name() {
        let (dispatcher, _) = dispatcher(&["Selphy"], PrintConfig::default());
        assert!(option(&dispatcher.job_options(), "media").is_none());
    }

    #[test]
    fn test_fallback_names_tried_in_order() {
        let config = PrintConfig {
            printer_name: "XP-8700".to_string(),
            fallback_names: vec!["Missing".to_string(), "Selphy".to_string()],
            ..Default::default()
        };
        let (dispatcher, _) = dispatcher(&["Office", "Selphy"], config);
        assert_eq!(dispatcher.select_printer().unwrap(), "Selphy");
    }

    #[test]
    fn test_named_printer_missing() {
        let config = PrintConfig {
            printer_name: "XP-8700".to_string(),
            ..Default::default()
        };
        let (mut dispatcher, recorder) = dispatcher(&["Office"], config);
        let file = print_file();

        match dispatcher.print(file.path()) {
            Err(PrinterError::NotFound { name }) => {
                assert!(name.contains("XP-8700"));
                assert!(name.contains("Office"));
            }
            other => panic!("expected NotFound, got {:?}", other),
        }
        assert!(recorder.jobs.lock().unwrap().is_empty());
    }

    #[test]
    fn test_no_printers_at_all() {
        let (dispatcher, _) = dispatcher(&[], PrintConfig::default());
        assert!(matches!(
            dispatcher.select_printer(),
            Err(PrinterError::NotFound { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_submission_error() {
        let (mut dispatcher, recorder) = dispatcher(&["Selphy"], PrintConfig::default());
        let result = dispatcher.print(Path::new("/nonexistent/print.jpg"));
        assert!(matches!(result, Err(PrinterError::SubmissionFailed(_))));
        assert!(recorder.jobs.lock().unwrap().is_empty());
    }

    #[test]
    fn test_submission_failure_propagates() {
        let connection = RecordingConnection {
            names: vec!["Selphy".to_string()],
            recorder: Recorder::default(),
            fail: true,
        };
        let mut dispatcher = PrintDispatcher::new(Box::new(connection), &PrintConfig::default());
        let file = print_file();
        assert!(matches!(
            dispatcher.print(file.path()),
            Err(PrinterError::SubmissionFailed(_))
        ));
    }

    #[test]
    fn test_mock_connection_accepts_jobs() {
        let config = PrintConfig {
            use_mock: true,
            ..Default::default()
        };
        let mut dispatcher = PrintDispatcher::new(new_connection(&config), &config);
        let file = print_file();
        assert_eq!(dispatcher.print(file.path()).unwrap(), "mock-job-1");
    }
}
