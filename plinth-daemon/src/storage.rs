/*!
Media Files

Plain-text notes in the configured media directory. Names are
normalized to a `.txt` suffix and validated before they touch the
filesystem, so a request can never escape the directory.
*/

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{DaemonError, Result};

const TEXT_EXTENSION: &str = "txt";

pub struct StorageManager {
    media_dir: PathBuf,
}

impl StorageManager {
    pub fn new(media_dir: &str) -> Result<Self> {
        let media_dir = PathBuf::from(media_dir);
        if media_dir.is_dir() {
            debug!("Media directory ready: {}", media_dir.display());
        } else {
            fs::create_dir_all(&media_dir)?;
            info!("Created media directory {}", media_dir.display());
        }
        Ok(Self { media_dir })
    }

    pub fn media_dir(&self) -> String {
        self.media_dir.display().to_string()
    }

    /// Names of all text files in the media directory, sorted.
    pub fn list_files(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.media_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if has_text_extension(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Reads one note; the extension may be left off.
    pub fn read_file(&self, name: &str) -> Result<String> {
        validate_name(name)?;
        let name = normalize_filename(name);
        let path = self.media_dir.join(&name);
        if !path.is_file() {
            return Err(DaemonError::FileNotFound(name));
        }
        Ok(fs::read_to_string(path)?)
    }

    /// Writes `content` under the normalized name and returns that name.
    pub fn write_file(&self, name: &str, content: &str) -> Result<String> {
        validate_name(name)?;
        let name = normalize_filename(name);
        fs::write(self.media_dir.join(&name), content)?;
        info!("Wrote {}", name);
        Ok(name)
    }
}

fn has_text_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case(TEXT_EXTENSION))
}

/// Appends the text extension unless the name already carries one.
pub fn normalize_filename(name: &str) -> String {
    if has_text_extension(name) {
        name.to_string()
    } else {
        format!("{}.{}", name, TEXT_EXTENSION)
    }
}

/// Rejects names that are empty or would leave the media directory.
fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(DaemonError::InvalidName("empty name".to_string()));
    }
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(DaemonError::InvalidName(name.to_string()));
    }
    Ok(())
}
