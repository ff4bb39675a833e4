//! On-disk structures of a blob shard.
//!
//! ```text
//! +--------------------------------------+
//! | header (20 bytes)                    |
//! +--------------------------------------+
//! | local entries (32 bytes each)        |
//! +--------------------------------------+
//! | 32-bit hash index (20 bytes each)    |  index shard only
//! | 64-bit hash index (20 bytes each)    |  index shard only
//! +--------------------------------------+
//! | payloads, in local entry order       |
//! +--------------------------------------+
//! ```
//!
//! All integers are little-endian. Payload offsets are relative to the start of the shard.

use bitflags::bitflags;

use crate::{
    file::io::{push_le, read_le_at},
    Error, Result,
};

/// `"XABA"` read as a little-endian `u32`
pub const BLOB_MAGIC: u32 = 0x4142_4158;

/// Newest format version this crate reads and the version it writes
pub const BLOB_VERSION: u32 = 1;

/// Shard id of the shard carrying the global hash index
pub const INDEX_SHARD_ID: u32 = 0;

/// Size of [`BlobHeader`]
pub const HEADER_SIZE: usize = 20;

/// Size of [`LocalEntry`]
pub const LOCAL_ENTRY_SIZE: usize = 32;

/// Size of [`HashEntry`]
pub const HASH_ENTRY_SIZE: usize = 20;

bitflags! {
    /// Flags of a local entry.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct EntryFlags: u32 {
        /// The payload differs between architectures
        const ABI_SPECIFIC = 0x01;
    }
}

/// Fixed shard header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobHeader {
    /// Format version
    pub version: u32,
    /// Number of assemblies stored in this shard
    pub local_entry_count: u32,
    /// Number of entries in each hash index; zero outside the index shard
    pub global_entry_count: u32,
    /// Shard id
    pub shard_id: u32,
}

impl BlobHeader {
    /// Parses and validates the header at the start of `data`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::BlobMagic`] or [`crate::Error::BlobVersion`] naming `path`, and
    /// [`crate::Error::OutOfBounds`] for truncated data.
    pub fn read(data: &[u8], path: &str) -> Result<BlobHeader> {
        let mut offset = 0;
        let magic: u32 = read_le_at(data, &mut offset)?;
        if magic != BLOB_MAGIC {
            return Err(Error::BlobMagic {
                path: path.to_string(),
            });
        }

        let version: u32 = read_le_at(data, &mut offset)?;
        if version == 0 || version > BLOB_VERSION {
            return Err(Error::BlobVersion {
                path: path.to_string(),
                version,
                supported: BLOB_VERSION,
            });
        }

        Ok(BlobHeader {
            version,
            local_entry_count: read_le_at(data, &mut offset)?,
            global_entry_count: read_le_at(data, &mut offset)?,
            shard_id: read_le_at(data, &mut offset)?,
        })
    }

    /// Appends the encoded header
    pub fn write(&self, out: &mut Vec<u8>) {
        push_le(out, BLOB_MAGIC);
        push_le(out, self.version);
        push_le(out, self.local_entry_count);
        push_le(out, self.global_entry_count);
        push_le(out, self.shard_id);
    }

    /// Returns true if this shard carries the global index
    #[must_use]
    pub fn is_index_shard(&self) -> bool {
        self.shard_id == INDEX_SHARD_ID
    }

    /// Offset of the first hash index entry
    #[must_use]
    pub fn index_offset(&self) -> usize {
        HEADER_SIZE + self.local_entry_count as usize * LOCAL_ENTRY_SIZE
    }

    /// Offset of the first payload byte
    #[must_use]
    pub fn data_offset(&self) -> usize {
        self.index_offset() + 2 * self.global_entry_count as usize * HASH_ENTRY_SIZE
    }
}

/// Location of one assembly inside its shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocalEntry {
    /// Offset of the assembly image
    pub data_offset: u32,
    /// Size of the assembly image
    pub data_size: u32,
    /// Offset of the debug information, 0 if absent
    pub debug_data_offset: u32,
    /// Size of the debug information
    pub debug_data_size: u32,
    /// Offset of the assembly config, 0 if absent
    pub config_data_offset: u32,
    /// Size of the assembly config
    pub config_data_size: u32,
    /// CRC32 over image, debug and config data
    pub content_crc32: u32,
    /// Entry flags
    pub flags: EntryFlags,
}

impl LocalEntry {
    /// Reads an entry at `offset`, advancing it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] for truncated data.
    pub fn read(data: &[u8], offset: &mut usize) -> Result<LocalEntry> {
        Ok(LocalEntry {
            data_offset: read_le_at(data, offset)?,
            data_size: read_le_at(data, offset)?,
            debug_data_offset: read_le_at(data, offset)?,
            debug_data_size: read_le_at(data, offset)?,
            config_data_offset: read_le_at(data, offset)?,
            config_data_size: read_le_at(data, offset)?,
            content_crc32: read_le_at(data, offset)?,
            flags: EntryFlags::from_bits_retain(read_le_at(data, offset)?),
        })
    }

    /// Appends the encoded entry
    pub fn write(&self, out: &mut Vec<u8>) {
        push_le(out, self.data_offset);
        push_le(out, self.data_size);
        push_le(out, self.debug_data_offset);
        push_le(out, self.debug_data_size);
        push_le(out, self.config_data_offset);
        push_le(out, self.config_data_size);
        push_le(out, self.content_crc32);
        push_le(out, self.flags.bits());
    }

    /// Returns true if the payload legitimately differs between architectures
    #[must_use]
    pub fn is_abi_specific(&self) -> bool {
        self.flags.contains(EntryFlags::ABI_SPECIFIC)
    }
}

/// Global index entry mapping a name hash to a shard and local index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HashEntry {
    /// Name hash; zero-extended in the 32-bit index
    pub hash: u64,
    /// Position of the assembly in the manifest, shared by both indexes
    pub mapping_index: u32,
    /// Index of the entry inside its shard
    pub local_index: u32,
    /// Shard holding the assembly
    pub shard_id: u32,
}

impl HashEntry {
    /// Reads an entry at `offset`, advancing it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] for truncated data.
    pub fn read(data: &[u8], offset: &mut usize) -> Result<HashEntry> {
        Ok(HashEntry {
            hash: read_le_at(data, offset)?,
            mapping_index: read_le_at(data, offset)?,
            local_index: read_le_at(data, offset)?,
            shard_id: read_le_at(data, offset)?,
        })
    }

    /// Appends the encoded entry
    pub fn write(&self, out: &mut Vec<u8>) {
        push_le(out, self.hash);
        push_le(out, self.mapping_index);
        push_le(out, self.local_index);
        push_le(out, self.shard_id);
    }
}
