use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const DEFAULT_EXTENSION: &str = "jpg";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("upload directory error: {0}")]
    CreateDir(std::io::Error),
    #[error("staged file write error: {0}")]
    Write(std::io::Error),
}

/// An upload persisted under the upload root. The root is append-only:
/// staged files are never rewritten or deleted by this service.
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub file_name: String,
    pub extension: String,
    pub path: PathBuf,
}

#[derive(Clone)]
pub struct UploadStager {
    root: PathBuf,
}

impl UploadStager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lower-cased extension of the client filename, or the fixed fallback
    /// when the name carries none. The content itself is never sniffed.
    fn derive_extension(original_filename: &str) -> String {
        Path::new(original_filename)
            .extension()
            .and_then(OsStr::to_str)
            .map(|ext| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
    }

    /// 128-bit random name; no counter or clock involved, so concurrent
    /// uploads cannot collide.
    fn generate_file_name(extension: &str) -> String {
        format!("{}.{}", Uuid::new_v4().simple(), extension)
    }

    /// Writes the upload to durable storage and returns where it landed.
    /// The file is fully synced before this returns, so the prediction step
    /// never observes a partial write.
    pub fn stage(&self, original_filename: &str, bytes: &[u8]) -> Result<StagedFile, StorageError> {
        fs::create_dir_all(&self.root).map_err(StorageError::CreateDir)?;

        let extension = Self::derive_extension(original_filename);
        let file_name = Self::generate_file_name(&extension);
        let path = self.root.join(&file_name);

        let mut file = File::create(&path).map_err(StorageError::Write)?;
        file.write_all(bytes).map_err(StorageError::Write)?;
        file.sync_all().map_err(StorageError::Write)?;

        Ok(StagedFile {
            file_name,
            extension,
            path,
        })
    }
}
