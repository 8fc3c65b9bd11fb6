// Session directory layout on disk:
//   <base>/<YYYYMMDD_HHMMSS>/shot_N.jpg
//   <base>/<YYYYMMDD_HHMMSS>/print.jpg

use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::errors::StorageError;

pub const PRINT_FILENAME: &str = "print.jpg";

const SESSION_ID_FORMAT: &str = "%Y%m%d_%H%M%S";

/// File name for the 1-based shot index.
pub fn shot_filename(shot: usize) -> String {
    format!("shot_{}.jpg", shot)
}

pub fn session_id_for(now: NaiveDateTime) -> String {
    now.format(SESSION_ID_FORMAT).to_string()
}

/// Create a fresh session directory under `base` named after `now`. A second
/// session within the same second gets a `_2`, `_3`, ... suffix.
pub fn allocate_session_dir(base: &Path, now: NaiveDateTime) -> Result<PathBuf, StorageError> {
    std::fs::create_dir_all(base).map_err(|e| StorageError::CreateDirectoryFailed {
        path: base.display().to_string(),
        reason: e.to_string(),
    })?;

    let stem = session_id_for(now);
    let mut suffix = 1u32;
    loop {
        let name = if suffix == 1 {
            stem.clone()
        } else {
            format!("{}_{}", stem, suffix)
        };
        let candidate = base.join(&name);
        // create_dir (not create_dir_all) fails on an existing directory
        match std::fs::create_dir(&candidate) {
            Ok(()) => {
                info!("Allocated session directory {:?}", candidate);
                return Ok(candidate);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => suffix += 1,
            Err(e) => {
                return Err(StorageError::CreateDirectoryFailed {
                    path: candidate.display().to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}
