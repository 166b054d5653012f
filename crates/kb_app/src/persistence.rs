use std::fs;
use std::path::{Path, PathBuf};

use kb_core::SessionSnapshot;
use kb_engine::{AtomicFileWriter, PersistError};
use kb_logging::{kb_info, kb_warn};

pub const SESSION_FILE: &str = "session.ron";

pub fn session_path(state_dir: &Path) -> PathBuf {
    state_dir.join(SESSION_FILE)
}

/// Loads the snapshot saved by a previous run. A missing or unreadable file
/// starts an empty session.
pub fn load_session(state_dir: &Path) -> Option<SessionSnapshot> {
    let path = session_path(state_dir);
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            kb_warn!("Failed to read session from {}: {}", path.display(), err);
            return None;
        }
    };
    match ron::from_str::<SessionSnapshot>(&text) {
        Ok(snapshot) => {
            kb_info!(
                "Loaded session from {}: {} conversations, {} projects",
                path.display(),
                snapshot.conversations.len(),
                snapshot.projects.len()
            );
            Some(snapshot)
        }
        Err(err) => {
            kb_warn!("Failed to parse session from {}: {}", path.display(), err);
            None
        }
    }
}

pub fn save_session(state_dir: &Path, snapshot: &SessionSnapshot) -> Result<PathBuf, PersistError> {
    let text = ron::ser::to_string_pretty(snapshot, ron::ser::PrettyConfig::new())
        .map_err(|err| PersistError::Encode {
            what: "session",
            message: err.to_string(),
        })?;
    let path = AtomicFileWriter::new(state_dir.to_path_buf()).write(SESSION_FILE, text.as_bytes())?;
    kb_info!("Saved session to {}", path.display());
    Ok(path)
}
