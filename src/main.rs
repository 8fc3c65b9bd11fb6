// Kiosk photo booth: countdown capture, 4x6 print composition and printing.

use actix_files as fs;
use actix_web::{middleware, web, App, HttpServer};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use photo_booth::booth::{Booth, BoothHandle};
use photo_booth::camera::{CameraSource, FrameDevice, WebcamCamera};
use photo_booth::config::{CameraConfig, CameraMode, Config, DatabaseConfig};
use photo_booth::errors::AppError;
use photo_booth::frame_slot::FrameSlot;
use photo_booth::gphoto_camera::{GPhotoCamera, SystemRunner};
use photo_booth::history;
use photo_booth::printers::{new_connection, PrintDispatcher};
use photo_booth::routes;
use photo_booth::session::{SessionMachine, SessionSettings};
use photo_booth::templates::{Composer, LayoutSpec};

// ============================================================================
// Application State
// ============================================================================

/// Everything the HTTP workers share
#[derive(Clone)]
struct AppState {
    config: Config,
    db_pool: SqlitePool,
    slot: FrameSlot,
    booth: BoothHandle,
}

async fn initialize_database(db_config: &DatabaseConfig) -> Result<SqlitePool, AppError> {
    info!("Initializing database at: {:?}", db_config.path);

    if let Some(parent) = db_config.path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            AppError::Initialization(format!("Failed to create database directory: {}", e))
        })?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect(&db_config.connection_string())
        .await
        .map_err(|e| AppError::Initialization(format!("Failed to connect to database: {}", e)))?;

    history::run_migrations(&pool)
        .await
        .map_err(|e| AppError::Initialization(format!("Failed to run migrations: {}", e)))?;

    info!("Database connected and migrations completed");
    Ok(pool)
}

// ============================================================================
// Camera Initialization
// ============================================================================

#[cfg(target_os = "linux")]
fn webcam_device(config: &CameraConfig) -> Result<Box<dyn FrameDevice>, AppError> {
    Ok(Box::new(photo_booth::camera::V4lDevice::new(
        config.device.clone(),
        config.width,
        config.height,
    )))
}

#[cfg(not(target_os = "linux"))]
fn webcam_device(_config: &CameraConfig) -> Result<Box<dyn FrameDevice>, AppError> {
    Err(AppError::Initialization(
        "Webcam capture needs V4L2, which is only available on Linux".to_string(),
    ))
}

fn initialize_camera(
    config: &CameraConfig,
    slot: FrameSlot,
) -> Result<Box<dyn CameraSource>, AppError> {
    info!("Initializing camera with config: {:?}", config);

    let mut camera: Box<dyn CameraSource> = match config.mode {
        CameraMode::Webcam => Box::new(WebcamCamera::new(
            webcam_device(config)?,
            slot,
            !config.skip_preview,
        )),
        CameraMode::Dslr => {
            let interval = (!config.skip_preview).then(|| config.dslr_preview_interval());
            Box::new(GPhotoCamera::new(Box::new(SystemRunner), slot, interval))
        }
    };

    // A missing camera is not fatal; sessions are refused until it shows up
    match camera.open() {
        Ok(()) => info!("{} camera ready", camera.type_name()),
        Err(e) => {
            warn!("Camera not available yet: {}", e);
            warn!("Sessions will be refused until the camera is connected");
        }
    }

    Ok(camera)
}

async fn initialize_booth(
    config: &Config,
    db_pool: &SqlitePool,
    slot: FrameSlot,
) -> Result<(Booth, tokio::task::JoinHandle<()>), AppError> {
    let camera = initialize_camera(&config.camera, slot)?;
    let printer = PrintDispatcher::new(new_connection(&config.printing), &config.printing);
    let composer = Composer::new(LayoutSpec::from_config(config));
    let mut machine = SessionMachine::new(
        SessionSettings::from_config(config),
        camera,
        composer,
        printer,
    );

    match history::last_printable(db_pool).await {
        Ok(Some(source)) => machine.seed_reprint(source),
        Ok(None) => {}
        Err(e) => warn!("Could not look up last print: {}", e),
    }

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(history::run_writer(db_pool.clone(), event_rx));
    let booth = Booth::spawn(machine, event_tx)?;
    Ok((booth, writer))
}

// ============================================================================
// Shutdown Handling
// ============================================================================

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

async fn cleanup_resources(state: AppState, booth: Booth, writer: tokio::task::JoinHandle<()>) {
    info!("Beginning resource cleanup");

    // Joining the booth thread blocks until its camera is closed
    if let Err(e) = tokio::task::spawn_blocking(move || booth.shutdown()).await {
        error!("Booth shutdown failed: {}", e);
    }

    // The booth owned the event sender, so the writer drains and exits
    if tokio::time::timeout(Duration::from_secs(5), writer).await.is_err() {
        warn!("History writer did not finish in time");
    }

    state.db_pool.close().await;
    info!("Database connections closed");
    info!("Resource cleanup complete");
}

fn io_error(context: &str, e: impl std::fmt::Display) -> std::io::Error {
    error!("{}: {}", context, e);
    std::io::Error::new(std::io::ErrorKind::Other, format!("{}: {}", context, e))
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // ========================================
    // Phase 1: Basic Initialization
    // ========================================

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting photo booth application");

    // ========================================
    // Phase 2: Configuration & Database
    // ========================================

    let config = Config::load().map_err(|e| io_error("Failed to load configuration", e))?;
    let socket_addr = config
        .socket_addr()
        .map_err(|e| io_error("Invalid server address", e))?;
    info!("Configuration loaded successfully");
    info!("Server will bind to: {}", socket_addr);

    std::fs::create_dir_all(config.images_path())
        .map_err(|e| io_error("Failed to create session directory", e))?;

    let db_pool = initialize_database(&config.database)
        .await
        .map_err(|e| io_error("Database initialization failed", e))?;

    // ========================================
    // Phase 3: Camera, Printer & Booth
    // ========================================

    let slot = FrameSlot::new();
    let (booth, writer) = initialize_booth(&config, &db_pool, slot.clone())
        .await
        .map_err(|e| io_error("Booth initialization failed", e))?;

    let app_state = AppState {
        config: config.clone(),
        db_pool,
        slot,
        booth: booth.handle(),
    };

    // ========================================
    // Phase 4: HTTP Server Setup
    // ========================================

    let app_state_for_server = app_state.clone();
    let server = HttpServer::new(move || {
        let state = app_state_for_server.clone();
        App::new()
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .app_data(web::Data::new(state.config.clone()))
            .app_data(web::Data::new(state.db_pool.clone()))
            .app_data(web::Data::new(state.slot.clone()))
            .app_data(web::Data::new(state.booth.clone()))
            .configure(routes::configure)
            .service(fs::Files::new("/images", state.config.images_path()))
    })
    .bind(socket_addr)?
    .shutdown_timeout(5)
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    info!("Photo booth server started on {}", socket_addr);
    info!("System ready for operation");

    // ========================================
    // Phase 5: Run Until Shutdown
    // ========================================

    shutdown_signal().await;

    // ========================================
    // Phase 6: Graceful Shutdown
    // ========================================

    info!("Initiating graceful shutdown...");

    // Stop accepting new connections and wait for existing ones to complete
    server_handle.stop(true).await;

    cleanup_resources(app_state, booth, writer).await;

    server_task
        .await
        .map_err(|e| io_error("Server task error", e))??;

    info!("Graceful shutdown complete");
    Ok(())
}
