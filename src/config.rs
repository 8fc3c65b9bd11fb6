use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use crate::errors::ConfigError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub camera: CameraConfig,
    pub session: SessionConfig,
    pub printing: PrintConfig,
    pub layout: LayoutConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraMode {
    Webcam,
    Dslr,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub mode: CameraMode,
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub skip_preview: bool,
    pub dslr_preview_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub shots: u32,
    pub countdown_seconds: u32,
    pub capture_delay: u32,
    pub save_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrintConfig {
    pub enabled: bool,
    pub printer_name: String,
    pub fallback_names: Vec<String>,
    pub copies: u32,
    pub paper_name: String,
    pub use_mock: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub base_mask: Option<PathBuf>,
    pub background_mask: Option<PathBuf>,
    pub columns: u32,
    pub caption: Option<String>,
    pub font_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            mode: CameraMode::Webcam,
            device: "/dev/video0".to_string(),
            width: 1280,
            height: 720,
            skip_preview: false,
            dslr_preview_interval_ms: 1000,
        }
    }
}

impl CameraConfig {
    pub fn dslr_preview_interval(&self) -> Duration {
        Duration::from_millis(self.dslr_preview_interval_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shots: 3,
            countdown_seconds: 3,
            capture_delay: 3,
            save_dir: PathBuf::from("sessions"),
        }
    }
}

impl Default for PrintConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            printer_name: String::new(),
            fallback_names: Vec::new(),
            copies: 1,
            paper_name: String::new(),
            use_mock: false,
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            base_mask: None,
            background_mask: None,
            columns: 1,
            caption: None,
            font_path: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("sessions/photobooth.db"),
        }
    }
}

impl DatabaseConfig {
    pub fn connection_string(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.path.display())
    }
}

impl Config {
    /// Load from the JSON file named by `PHOTOBOOTH_CONFIG`, or from the
    /// environment when it is unset.
    pub fn load() -> Result<Self, ConfigError> {
        match std::env::var("PHOTOBOOTH_CONFIG") {
            Ok(path) => Self::from_json_file(Path::new(&path)),
            Err(_) => Self::from_env(),
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let server = ServerConfig {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidPort)?,
        };

        let mode = match std::env::var("CAMERA_MODE")
            .unwrap_or_else(|_| "webcam".to_string())
            .as_str()
        {
            "webcam" => CameraMode::Webcam,
            "dslr" => CameraMode::Dslr,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "CAMERA_MODE".to_string(),
                    value: other.to_string(),
                })
            }
        };

        let camera = CameraConfig {
            mode,
            device: std::env::var("VIDEO_DEVICE").unwrap_or_else(|_| "/dev/video0".to_string()),
            width: env_parse("VIDEO_WIDTH", 1280)?,
            height: env_parse("VIDEO_HEIGHT", 720)?,
            skip_preview: env_parse("SKIP_PREVIEW", false)?,
            dslr_preview_interval_ms: env_parse("DSLR_PREVIEW_INTERVAL_MS", 1000)?,
        };

        let base_path = std::env::var("STORAGE_PATH").unwrap_or_else(|_| "sessions".to_string());
        let session = SessionConfig {
            shots: env_parse("SESSION_SHOTS", 3)?,
            countdown_seconds: env_parse("COUNTDOWN_SECONDS", 3)?,
            capture_delay: env_parse("CAPTURE_DELAY", 3)?,
            save_dir: PathBuf::from(&base_path),
        };

        let printing = PrintConfig {
            enabled: env_parse("PRINT_ENABLED", true)?,
            printer_name: std::env::var("PRINTER_NAME").unwrap_or_default(),
            fallback_names: std::env::var("PRINTER_FALLBACK")
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            copies: env_parse("PRINT_COPIES", 1)?,
            paper_name: std::env::var("PAPER_NAME").unwrap_or_default(),
            use_mock: env_parse("USE_MOCK_PRINTER", false)?,
        };

        let layout = LayoutConfig {
            base_mask: std::env::var("LAYOUT_BASE_MASK").ok().map(PathBuf::from),
            background_mask: std::env::var("LAYOUT_BACKGROUND_MASK")
                .ok()
                .map(PathBuf::from),
            columns: env_parse("LAYOUT_COLUMNS", 1)?,
            caption: std::env::var("LAYOUT_CAPTION").ok(),
            font_path: std::env::var("LAYOUT_FONT").ok().map(PathBuf::from),
        };

        let database = DatabaseConfig {
            path: std::env::var("DATABASE_PATH")
                .unwrap_or_else(|_| format!("{}/photobooth.db", base_path))
                .into(),
        };

        let config = Config {
            server,
            camera,
            session,
            printing,
            layout,
            database,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if !matches!(self.session.shots, 1 | 3) {
            return Err(ConfigError::InvalidShotCount(self.session.shots));
        }
        if self.printing.copies == 0 {
            return Err(invalid("printing.copies", self.printing.copies));
        }
        if !matches!(self.layout.columns, 1 | 2) {
            return Err(invalid("layout.columns", self.layout.columns));
        }
        if self.camera.dslr_preview_interval_ms == 0 {
            return Err(invalid("camera.dslr_preview_interval_ms", 0));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(invalid(
                "camera.resolution",
                format!("{}x{}", self.camera.width, self.camera.height),
            ));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|_| invalid("server.host", &self.server.host))
    }

    pub fn images_path(&self) -> PathBuf {
        self.session.save_dir.clone()
    }

    pub fn base_mask_path(&self) -> Option<PathBuf> {
        self.layout.base_mask.as_deref().map(resolve_asset)
    }

    pub fn background_mask_path(&self) -> Option<PathBuf> {
        self.layout.background_mask.as_deref().map(resolve_asset)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value.trim().parse().map_err(|_| invalid(key, value)),
        Err(_) => Ok(default),
    }
}

fn invalid(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Relative mask paths are resolved against the working directory.
fn resolve_asset(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
