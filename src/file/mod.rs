//! Reading and writing the binary files handled by this crate.
//!
//! Module images and blob shards are read through [`Input`], which either memory-maps a file
//! on disk or owns a buffer that was already loaded, for example an entry extracted from a
//! packaged archive. Either way the bytes are immutable and shared by reference between the
//! parallel read tasks.
//!
//! Writing goes through [`output`]: a single memory-mapped target that removes itself unless
//! finalized, or a [`output::StagedBatch`] replacing several files only after all of them
//! were written.

pub mod io;
pub mod output;

use std::{fs, path::Path};

use memmap2::Mmap;

use crate::{Error::FileError, Result};

enum Storage {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

/// Immutable contents of a file or archive entry, with the name used in error messages.
pub struct Input {
    name: String,
    storage: Storage,
}

impl Input {
    /// Memory-maps a file from disk. Empty files are held as an empty buffer, since they
    /// cannot be mapped on every platform.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Input> {
        let path = path.as_ref();
        let file = fs::File::open(path).map_err(FileError)?;
        let storage = if file.metadata().map_err(FileError)?.len() == 0 {
            Storage::Owned(Vec::new())
        } else {
            // read-only; outputs are written to fresh files and renamed into place
            Storage::Mapped(unsafe { Mmap::map(&file) }.map_err(FileError)?)
        };

        Ok(Input {
            name: path.display().to_string(),
            storage,
        })
    }

    /// Wraps an owned buffer.
    pub fn from_mem(name: impl Into<String>, data: Vec<u8>) -> Input {
        Input {
            name: name.into(),
            storage: Storage::Owned(data),
        }
    }

    /// The path or entry name this input was loaded from
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The complete contents
    #[must_use]
    pub fn data(&self) -> &[u8] {
        match &self.storage {
            Storage::Mapped(mmap) => mmap.as_ref(),
            Storage::Owned(data) => data.as_slice(),
        }
    }

    /// Bounds-checked sub-slice of the contents.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if the range exceeds the input.
    pub fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.data().get(offset..end))
            .ok_or(out_of_bounds_error!())
    }

    /// Size of the input in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data().len()
    }

    /// Returns true for empty inputs
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }
}

impl std::fmt::Debug for Input {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.storage {
            Storage::Mapped(_) => "mapped",
            Storage::Owned(_) => "owned",
        };
        f.debug_struct("Input")
            .field("name", &self.name)
            .field("storage", &kind)
            .field("len", &self.len())
            .finish()
    }
}
