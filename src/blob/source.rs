//! Where blob sets are read from.
//!
//! A blob set is either a group of loose files in a build output directory or a group of
//! entries inside a packaged archive. [`BlobSource`] hides the difference: the reader only
//! enumerates entry names and opens entries.

use std::{
    fs::File,
    io::{Cursor, Read},
    path::{Path, PathBuf},
    sync::Arc,
};

use memmap2::Mmap;
use zip::ZipArchive;

use crate::{file::Input, Error, Result};

/// Base name used inside packaged archives
pub const ARCHIVE_BASE_NAME: &str = "assemblies";

/// A set of named entries holding blob shards and a manifest.
pub trait BlobSource: Send + Sync {
    /// Location of the source, for messages
    fn description(&self) -> String;

    /// Names of the entries belonging to the blob set.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying directory or archive cannot be listed.
    fn entries(&self) -> Result<Vec<String>>;

    /// Opens an entry for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry does not exist or cannot be opened.
    fn open(&self, entry: &str) -> Result<Box<dyn Read + Send + '_>>;

    /// Loads an entry completely.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`BlobSource::open`] and of reading the stream.
    fn load(&self, entry: &str) -> Result<Input> {
        let mut data = Vec::new();
        self.open(entry)?.read_to_end(&mut data)?;
        Ok(Input::from_mem(entry, data))
    }
}

/// Blob files in a directory.
pub struct FilesystemSource {
    dir: PathBuf,
    base_name: String,
}

impl FilesystemSource {
    /// Source over the files in `dir` whose names start with `{base_name}.`
    pub fn new(dir: impl AsRef<Path>, base_name: impl Into<String>) -> Self {
        FilesystemSource {
            dir: dir.as_ref().to_path_buf(),
            base_name: base_name.into(),
        }
    }
}

impl BlobSource for FilesystemSource {
    fn description(&self) -> String {
        self.dir.display().to_string()
    }

    fn entries(&self) -> Result<Vec<String>> {
        let prefix = format!("{}.", self.base_name);
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&prefix) {
                entries.push(name);
            }
        }
        entries.sort();
        Ok(entries)
    }

    fn open(&self, entry: &str) -> Result<Box<dyn Read + Send + '_>> {
        Ok(Box::new(File::open(self.dir.join(entry))?))
    }

    fn load(&self, entry: &str) -> Result<Input> {
        Input::from_file(self.dir.join(entry))
    }
}

/// Archive bytes shared by every handle onto the archive.
#[derive(Clone)]
struct SharedMap(Arc<Mmap>);

impl AsRef<[u8]> for SharedMap {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Blob entries inside an `.apk`, `.aab` or `.zip` archive.
///
/// The archive is mapped once. Each [`BlobSource::open`] works on its own clone of the
/// parsed central directory, so shards are extracted in parallel.
pub struct ArchiveSource {
    path: PathBuf,
    prefix: &'static str,
    archive: ZipArchive<Cursor<SharedMap>>,
    archive_len: usize,
}

impl ArchiveSource {
    /// Opens the archive at `path`; the entry directory depends on the archive type.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Error`] for unknown archive extensions,
    /// [`crate::Error::FileError`] or [`crate::Error::ArchiveError`] if the archive cannot be
    /// opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let prefix = Self::assemblies_dir(path).ok_or_else(|| {
            Error::Error(format!(
                "'{}' is not an .apk, .aab or .zip archive",
                path.display()
            ))
        })?;
        let file = File::open(path)?;
        // read-only; outputs are written to fresh files and renamed into place
        let map = unsafe { Mmap::map(&file) }.map_err(Error::FileError)?;
        let archive_len = map.len();
        let archive = ZipArchive::new(Cursor::new(SharedMap(Arc::new(map))))?;

        Ok(ArchiveSource {
            path: path.to_path_buf(),
            prefix,
            archive,
            archive_len,
        })
    }

    /// Directory holding the blob entries in an archive of this type
    #[must_use]
    pub fn assemblies_dir(path: &Path) -> Option<&'static str> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "apk" => Some("assemblies/"),
            "aab" => Some("base/root/assemblies/"),
            "zip" => Some("root/assemblies/"),
            _ => None,
        }
    }
}

impl BlobSource for ArchiveSource {
    fn description(&self) -> String {
        format!("{}!{}", self.path.display(), self.prefix)
    }

    fn entries(&self) -> Result<Vec<String>> {
        let prefix = format!("{}{}.", self.prefix, ARCHIVE_BASE_NAME);
        let mut entries: Vec<String> = self
            .archive
            .file_names()
            .filter(|name| name.starts_with(&prefix))
            .map(|name| name[self.prefix.len()..].to_string())
            .collect();
        entries.sort();
        Ok(entries)
    }

    fn open(&self, entry: &str) -> Result<Box<dyn Read + Send + '_>> {
        let mut archive = self.archive.clone();
        let mut file = archive.by_name(&format!("{}{}", self.prefix, entry))?;

        // the declared size comes from the central directory and is not trusted
        let declared = usize::try_from(file.size()).unwrap_or(usize::MAX);
        let mut data = Vec::with_capacity(declared.min(self.archive_len));
        file.read_to_end(&mut data)?;
        Ok(Box::new(Cursor::new(data)))
    }
}

/// Selects the source for `path` and the base name of the blob set.
///
/// - archives (`.apk`, `.aab`, `.zip`) use [`ArchiveSource`] with base name `assemblies`
/// - a blob or manifest file uses the files next to it sharing its base name
/// - a directory uses the files named `assemblies.*` inside it
///
/// # Errors
///
/// Returns [`crate::Error::FileError`] if `path` does not exist and the errors of
/// [`ArchiveSource::open`].
pub fn open_source(path: impl AsRef<Path>) -> Result<(Box<dyn BlobSource>, String)> {
    let path = path.as_ref();
    let metadata = std::fs::metadata(path)?;

    if metadata.is_dir() {
        return Ok((
            Box::new(FilesystemSource::new(path, ARCHIVE_BASE_NAME)),
            ARCHIVE_BASE_NAME.to_string(),
        ));
    }

    if ArchiveSource::assemblies_dir(path).is_some() {
        return Ok((
            Box::new(ArchiveSource::open(path)?),
            ARCHIVE_BASE_NAME.to_string(),
        ));
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base_name = file_name
        .split('.')
        .next()
        .filter(|base| !base.is_empty())
        .ok_or_else(|| Error::Error(format!("Cannot derive a blob base name from '{}'", path.display())))?
        .to_string();
    let dir = path.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    log::debug!("reading blob set '{}' from '{}'", base_name, dir.display());
    Ok((Box::new(FilesystemSource::new(dir, base_name.as_str())), base_name))
}
