use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Initialization error: {0}")]
    Initialization(String),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Printer error: {0}")]
    Printer(#[from] PrinterError),

    #[error("Composition error: {0}")]
    Compose(#[from] ComposeError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),

    #[error("{0}")]
    InvalidState(String),

    #[error("Web error: {0}")]
    Web(String),
}

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("Camera device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Failed to capture photo: {0}")]
    CaptureFailed(String),

    #[error("No frame available")]
    NoFrameAvailable,

    #[error("Camera I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("No photos to compose")]
    NoPhotos,

    #[error("Failed to load image {path}: {reason}")]
    ImageLoad { path: String, reason: String },

    #[error("Failed to save composed image {path}: {reason}")]
    Save { path: String, reason: String },

    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),
}

#[derive(Debug, Error)]
pub enum PrinterError {
    #[error("Printer not found: {name}")]
    NotFound { name: String },

    #[error("Print job submission failed: {0}")]
    SubmissionFailed(String),

    #[error("Printer I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid shot count {0}, expected 1 or 3")]
    InvalidShotCount(u32),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to read configuration: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to create directory {path}: {reason}")]
    CreateDirectoryFailed { path: String, reason: String },

    #[error("Storage I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Initialization(_) => 500,
            AppError::Camera(_) => 503,
            AppError::Printer(PrinterError::NotFound { .. }) => 404,
            AppError::Printer(_) => 503,
            AppError::Compose(_) => 500,
            AppError::Config(ConfigError::InvalidShotCount(_)) => 400,
            AppError::Config(_) => 500,
            AppError::Storage(_) => 500,
            AppError::History(_) => 503,
            AppError::InvalidState(_) => 409,
            AppError::Web(_) => 500,
        }
    }

    pub fn error_response(&self) -> serde_json::Value {
        serde_json::json!({
            "ok": false,
            "error": self.to_string(),
            "error_type": self.error_type()
        })
    }

    fn error_type(&self) -> &'static str {
        match self {
            AppError::Initialization(_) => "initialization_error",
            AppError::Camera(_) => "camera_error",
            AppError::Printer(_) => "printer_error",
            AppError::Compose(_) => "composition_error",
            AppError::Config(_) => "config_error",
            AppError::Storage(_) => "storage_error",
            AppError::History(_) => "history_error",
            AppError::InvalidState(_) => "invalid_state",
            AppError::Web(_) => "web_error",
        }
    }
}
