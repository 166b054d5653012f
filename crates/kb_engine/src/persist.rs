//! Local file output: Word exports and the saved session.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use kb_logging::kb_debug;
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("{}: {reason}", path.display())]
    OutputDir { path: PathBuf, reason: String },
    #[error("writing {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot encode {what}: {message}")]
    Encode { what: &'static str, message: String },
}

impl PersistError {
    fn output_dir(path: &Path, reason: impl ToString) -> Self {
        PersistError::OutputDir {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    fn io(path: &Path, source: io::Error) -> Self {
        PersistError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Creates `dir` if needed and checks that a file can be created in it.
pub fn ensure_output_dir(dir: &Path) -> Result<(), PersistError> {
    match fs::metadata(dir) {
        Ok(meta) if !meta.is_dir() => {
            return Err(PersistError::output_dir(dir, "not a directory"));
        }
        Ok(_) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(dir).map_err(|e| PersistError::output_dir(dir, e))?;
        }
        Err(err) => return Err(PersistError::output_dir(dir, err)),
    }
    NamedTempFile::new_in(dir).map_err(|e| PersistError::output_dir(dir, e))?;
    Ok(())
}

/// Writes whole files into one directory through a sibling temp file, so a
/// reader finds either the previous file or the complete new one.
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Replaces `{dir}/{filename}` with `content` and returns its path.
    pub fn write(&self, filename: &str, content: &[u8]) -> Result<PathBuf, PersistError> {
        ensure_output_dir(&self.dir)?;
        let target = self.dir.join(filename);

        let mut staged = NamedTempFile::new_in(&self.dir).map_err(|e| PersistError::io(&target, e))?;
        staged
            .write_all(content)
            .and_then(|()| staged.as_file_mut().sync_all())
            .map_err(|e| PersistError::io(&target, e))?;
        staged
            .persist(&target)
            .map_err(|e| PersistError::io(&target, e.error))?;

        kb_debug!("Wrote {} bytes to {}", content.len(), target.display());
        Ok(target)
    }
}
