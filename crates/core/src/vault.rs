use crate::error::FilingError;
use crate::models::{VaultEntry, DEFAULT_CATEGORY};
use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Category-keyed archive. Category directories are created on demand.
#[derive(Debug, Clone)]
pub struct VaultFiler {
    root: PathBuf,
}

impl VaultFiler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn file(
        &self,
        source: &Path,
        filename: &str,
        category: &str,
    ) -> Result<VaultEntry, FilingError> {
        self.file_at(source, filename, category, Utc::now())
    }

    pub fn file_at(
        &self,
        source: &Path,
        filename: &str,
        category: &str,
        ingested_at: DateTime<Utc>,
    ) -> Result<VaultEntry, FilingError> {
        if Path::new(filename).file_name().is_none() {
            return Err(FilingError::MissingFileName(filename.to_string()));
        }

        let category = sanitize_category(category);
        let category_dir = self.root.join(&category);
        fs::create_dir_all(&category_dir)?;

        let destination = resolve_destination(&category_dir, filename, ingested_at.timestamp());
        move_file(source, &destination)?;

        Ok(VaultEntry {
            final_path: destination,
            original_filename: filename.to_string(),
            category,
        })
    }

    /// Archived files named exactly `name`, then any whose name contains it
    /// case-insensitively.
    pub fn locate(&self, name: &str) -> Vec<PathBuf> {
        let files = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .collect::<Vec<_>>();

        let mut exact = files
            .iter()
            .filter(|path| file_name(path) == name)
            .cloned()
            .collect::<Vec<_>>();
        exact.sort_unstable();
        if !exact.is_empty() {
            return exact;
        }

        let needle = name.to_lowercase();
        let mut partial = files
            .into_iter()
            .filter(|path| file_name(path).to_lowercase().contains(&needle))
            .collect::<Vec<_>>();
        partial.sort_unstable();
        partial
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Makes a remote-supplied category safe to use as a single directory name.
pub fn sanitize_category(raw: &str) -> String {
    let cleaned = raw
        .trim()
        .chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            ch if ch.is_control() => '_',
            ch => ch,
        })
        .collect::<String>();
    let cleaned = cleaned.trim_matches(|ch: char| ch == '.' || ch.is_whitespace());

    if cleaned.is_empty() {
        DEFAULT_CATEGORY.to_string()
    } else {
        cleaned.to_string()
    }
}

/// `dir/filename`, or `dir/{stem}_{timestamp}{ext}` when that is taken. A
/// counter follows the timestamp if the timestamped name is taken too.
pub fn resolve_destination(dir: &Path, filename: &str, timestamp: i64) -> PathBuf {
    let naive = dir.join(filename);
    if !naive.exists() {
        return naive;
    }

    let as_path = Path::new(filename);
    let stem = as_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());
    let extension = as_path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    let candidate = dir.join(format!("{stem}_{timestamp}{extension}"));
    if !candidate.exists() {
        return candidate;
    }

    let mut counter = 1u32;
    loop {
        let candidate = dir.join(format!("{stem}_{timestamp}_{counter}{extension}"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

fn move_file(source: &Path, destination: &Path) -> io::Result<()> {
    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(error) if is_cross_device(&error) => {
            warn!(
                source = %source.display(),
                destination = %destination.display(),
                "rename crosses devices, copying instead"
            );
            fs::copy(source, destination)?;
            fs::remove_file(source)
        }
        Err(error) => {
            debug!(source = %source.display(), %error, "rename failed");
            Err(error)
        }
    }
}

#[cfg(unix)]
fn is_cross_device(error: &io::Error) -> bool {
    // EXDEV
    error.raw_os_error() == Some(18)
}

#[cfg(windows)]
fn is_cross_device(error: &io::Error) -> bool {
    // ERROR_NOT_SAME_DEVICE
    error.raw_os_error() == Some(17)
}

#[cfg(not(any(unix, windows)))]
fn is_cross_device(_error: &io::Error) -> bool {
    false
}
