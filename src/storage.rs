use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::io::{self, ErrorKind};
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tracing::warn;

use crate::staging::is_staging_name;

/// Max entries read per listing; the directory is not enumerated past this.
pub const LIST_BATCH_SIZE: usize = 128;

#[cfg(unix)]
const FOLDER_MODE: u32 = 0o755;

#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

/// A request path after normalization, joined onto the storage root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedPath {
    relative: PathBuf,
    absolute: PathBuf,
}

impl ResolvedPath {
    pub fn is_root(&self) -> bool {
        self.relative.as_os_str().is_empty()
    }

    pub fn relative(&self) -> &Path {
        &self.relative
    }

    pub fn as_path(&self) -> &Path {
        &self.absolute
    }
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Creates the root if needed and pins it to its canonical absolute form.
    pub async fn open(root: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(&root).await?;
        Ok(Self::new(fs::canonicalize(&root).await?))
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, request_path: &str) -> ResolvedPath {
        let relative = normalize(request_path);
        let absolute = self.root.join(&relative);
        ResolvedPath { relative, absolute }
    }

    pub async fn list_dir(&self, target: &Path) -> Result<DirectoryListing, StorageError> {
        let mut dir = fs::read_dir(target).await?;
        let mut listing = DirectoryListing::default();
        let mut seen = 0;

        while seen < LIST_BATCH_SIZE {
            let Some(entry) = dir.next_entry().await? else {
                return Ok(listing);
            };
            seen += 1;
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_staging_name(&name) {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            if metadata.is_dir() {
                listing.directories.push(DirEntry { name });
            } else {
                listing.files.push(FileEntry {
                    mod_time: format_timestamp(metadata.modified().ok()),
                    size: metadata.len(),
                    content_type: content_type_for(&name),
                    name,
                });
            }
        }

        if dir.next_entry().await?.is_some() {
            warn!(
                path = %target.display(),
                limit = LIST_BATCH_SIZE,
                "directory listing truncated"
            );
        }
        Ok(listing)
    }

    pub async fn delete_path(&self, target: &ResolvedPath) -> Result<(), StorageError> {
        if target.is_root() {
            return Err(StorageError::ProtectedRoot);
        }
        let metadata = fs::symlink_metadata(target.as_path()).await?;
        let removed = if metadata.is_dir() {
            fs::remove_dir_all(target.as_path()).await
        } else {
            fs::remove_file(target.as_path()).await
        };
        removed.map_err(StorageError::Remove)
    }

    /// Creates exactly one directory; the parent must already exist.
    pub async fn create_dir(&self, target: &ResolvedPath) -> io::Result<()> {
        let mut builder = fs::DirBuilder::new();
        #[cfg(unix)]
        builder.mode(FOLDER_MODE);
        builder.create(target.as_path()).await
    }
}

/// Collapses `.`, `..` and separators. `..` never climbs above the root.
pub fn normalize(request_path: &str) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in Path::new(request_path).components() {
        match component {
            Component::Normal(segment) => normalized.push(segment),
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    normalized
}

/// Best-effort MIME type from the extension, empty when unknown.
pub fn content_type_for(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| mime_guess::from_ext(ext).first_raw())
        .map(str::to_string)
        .unwrap_or_default()
}

fn format_timestamp(modified: Option<SystemTime>) -> String {
    let datetime: DateTime<Utc> = modified.unwrap_or(UNIX_EPOCH).into();
    datetime.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[derive(Debug)]
pub enum StorageError {
    ProtectedRoot,
    Io(io::Error),
    Remove(io::Error),
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}

#[derive(Debug, Default, Serialize)]
pub struct DirectoryListing {
    pub directories: Vec<DirEntry>,
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Serialize)]
pub struct DirEntry {
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub mod_time: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub content_type: String,
}
