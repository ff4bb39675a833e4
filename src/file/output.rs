//! Memory-mapped output files and staged batch replacement.
//!
//! [`Output`] creates a file of a known size, maps it writable and lets callers fill it in
//! place. An [`Output`] that is dropped without [`Output::finalize`] deletes its file, so an
//! aborted write never leaves a truncated result behind.
//!
//! [`StagedBatch`] builds on that to replace a set of files as a unit: every file is first
//! written next to its target as `<target>.new`, and only after all of them were written
//! successfully are the originals replaced. If anything fails before [`StagedBatch::commit`],
//! the staged files are removed and the previous outputs are left untouched.

use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};

use crate::{Error, Result};

/// A memory-mapped output file of fixed size.
#[derive(Debug)]
pub struct Output {
    /// Writable mapping, `None` for zero-sized outputs
    mmap: Option<MmapMut>,
    /// Location of the file being written
    target_path: PathBuf,
    /// Set once the content was flushed and the file must be kept
    finalized: bool,
}

impl Output {
    /// Creates (or truncates) `target_path` with `size` bytes and maps it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if the file cannot be created, sized or mapped.
    pub fn create<P: AsRef<Path>>(target_path: P, size: u64) -> Result<Self> {
        let target_path = target_path.as_ref().to_path_buf();

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&target_path)?;

        file.set_len(size)?;

        let mmap = if size == 0 {
            None
        } else {
            Some(unsafe { MmapOptions::new().map_mut(&file)? })
        };

        Ok(Self {
            mmap,
            target_path,
            finalized: false,
        })
    }

    /// Mutable access to the whole file
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match &mut self.mmap {
            Some(mmap) => &mut mmap[..],
            None => &mut [],
        }
    }

    /// Copies `data` into the file at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if the write exceeds the file size.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let slice = self.as_mut_slice();
        let start = usize::try_from(offset).map_err(|_| Error::OutOfBounds)?;
        let Some(end) = start.checked_add(data.len()) else {
            return Err(Error::OutOfBounds);
        };
        if end > slice.len() {
            return Err(Error::OutOfBounds);
        }

        slice[start..end].copy_from_slice(data);
        Ok(())
    }

    /// Size of the file in bytes
    #[must_use]
    pub fn size(&self) -> u64 {
        self.mmap.as_ref().map_or(0, |mmap| mmap.len() as u64)
    }

    /// Path of the file being written
    #[must_use]
    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    /// Flushes the mapping and keeps the file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if flushing fails; the file is removed in that case.
    pub fn finalize(mut self) -> Result<()> {
        if let Some(mmap) = &self.mmap {
            mmap.flush()?;
        }

        self.finalized = true;
        Ok(())
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        if !self.finalized {
            self.mmap = None;
            let _ = std::fs::remove_file(&self.target_path);
        }
    }
}

/// Writes `data` to `path` through an [`Output`].
///
/// # Errors
///
/// Returns [`crate::Error::FileError`] on any I/O failure; no partial file is left behind.
pub fn write_file(path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let mut output = Output::create(path, data.len() as u64)?;
    output.write_at(0, data)?;
    output.finalize()
}

/// Returns the staging path used for `target`: the target path with `.new` appended.
#[must_use]
pub fn staging_path(target: &Path) -> PathBuf {
    let mut staged = target.as_os_str().to_os_string();
    staged.push(".new");
    PathBuf::from(staged)
}

/// A set of output files that replace their targets together.
#[derive(Debug, Default)]
pub struct StagedBatch {
    /// `(staging path, final path)` pairs written so far
    staged: Vec<(PathBuf, PathBuf)>,
    committed: bool,
}

impl StagedBatch {
    /// Creates an empty batch
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `data` to the staging file of `target`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if the staging file cannot be written. Files staged
    /// earlier in the batch are removed when the batch is dropped.
    pub fn stage(&mut self, target: impl AsRef<Path>, data: &[u8]) -> Result<()> {
        let target = target.as_ref().to_path_buf();
        let staged = staging_path(&target);

        write_file(&staged, data)?;
        log::debug!("staged {}", staged.display());

        self.staged.push((staged, target));
        Ok(())
    }

    /// Number of files staged so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    /// Returns true if nothing was staged
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Replaces every target with its staged file.
    ///
    /// Originals are deleted and the staged files renamed into place.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if a replacement fails.
    pub fn commit(mut self) -> Result<Vec<PathBuf>> {
        self.committed = true;

        let staged = std::mem::take(&mut self.staged);
        let mut replaced = Vec::with_capacity(staged.len());
        for (source, target) in staged {
            if target.exists() {
                std::fs::remove_file(&target)?;
            }
            std::fs::rename(&source, &target)?;
            log::debug!("moved {} to {}", source.display(), target.display());
            replaced.push(target);
        }

        Ok(replaced)
    }
}

impl Drop for StagedBatch {
    fn drop(&mut self) {
        if self.committed {
            return;
        }

        for (staged, _) in &self.staged {
            let _ = std::fs::remove_file(staged);
        }
    }
}
