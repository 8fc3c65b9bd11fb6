// Library module organization

pub mod booth;
pub mod camera;
pub mod config;
pub mod errors;
pub mod frame_slot;
pub mod gphoto_camera;
pub mod history;
pub mod printers;
pub mod routes;
pub mod session;
pub mod storage;
pub mod templates;
pub mod timer;

// Re-export commonly used types for convenience
pub use booth::{Booth, BoothCommand, BoothHandle};
pub use camera::{CameraSource, FrameDevice, FrameReader, WebcamCamera};
pub use config::Config;
pub use errors::{AppError, AppResult};
pub use frame_slot::{Frame, FrameSlot};
pub use gphoto_camera::{CommandOutput, CommandRunner, GPhotoCamera, SystemRunner};
pub use printers::{MockConnection, PrintConnection, PrintDispatcher};
pub use session::{BoothSnapshot, SessionMachine, SessionSettings, SessionState, ShotCount};
pub use templates::{Composer, LayoutSpec};

#[cfg(target_os = "linux")]
pub use camera::V4lDevice;

#[cfg(feature = "printer-cups")]
pub use printers::CupsConnection;
