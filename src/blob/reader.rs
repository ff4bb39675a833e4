use std::path::Path;

use crate::{
    arch::TargetArch,
    blob::format::{BlobHeader, HashEntry, LocalEntry, HASH_ENTRY_SIZE, HEADER_SIZE, LOCAL_ENTRY_SIZE},
    file::Input,
    Error, Result,
};

/// A parsed shard file.
///
/// Payloads are not copied; [`BlobShard::image`] and friends slice the loaded input.
pub struct BlobShard {
    /// File or archive entry the shard was read from
    pub file_name: String,
    /// Architecture from the file name, [`TargetArch::None`] for the index shard
    pub arch: TargetArch,
    /// Shard header
    pub header: BlobHeader,
    /// Assemblies stored in this shard
    pub entries: Vec<LocalEntry>,
    /// 32-bit hash index; empty outside the index shard
    pub index32: Vec<HashEntry>,
    /// 64-bit hash index; empty outside the index shard
    pub index64: Vec<HashEntry>,
    input: Input,
}

impl BlobShard {
    /// Parses a shard.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::BlobMagic`] / [`crate::Error::BlobVersion`] for foreign files,
    /// [`crate::Error::OutOfBounds`] for truncated tables and [`crate::Error::Malformed`] if a
    /// payload lies outside the file or a data shard carries an index.
    pub fn parse(input: Input, arch: TargetArch) -> Result<BlobShard> {
        let file_name = input.name().to_string();
        let data = input.data();
        let header = BlobHeader::read(data, &file_name)?;

        if !header.is_index_shard() && header.global_entry_count > 0 {
            return Err(malformed_error!(
                "{}: data shard {} carries {} index entries",
                file_name,
                header.shard_id,
                header.global_entry_count
            ));
        }

        // counts come from the file; the tables must fit before anything is allocated for them
        let tables_end = HEADER_SIZE as u64
            + u64::from(header.local_entry_count) * LOCAL_ENTRY_SIZE as u64
            + 2 * u64::from(header.global_entry_count) * HASH_ENTRY_SIZE as u64;
        if tables_end > data.len() as u64 {
            return Err(Error::OutOfBounds);
        }

        let mut offset = HEADER_SIZE;
        let mut entries = Vec::with_capacity(header.local_entry_count as usize);
        for _ in 0..header.local_entry_count {
            entries.push(LocalEntry::read(data, &mut offset)?);
        }

        let mut index32 = Vec::with_capacity(header.global_entry_count as usize);
        for _ in 0..header.global_entry_count {
            index32.push(HashEntry::read(data, &mut offset)?);
        }
        let mut index64 = Vec::with_capacity(header.global_entry_count as usize);
        for _ in 0..header.global_entry_count {
            index64.push(HashEntry::read(data, &mut offset)?);
        }

        for (index, entry) in entries.iter().enumerate() {
            for (what, start, size) in [
                ("image", entry.data_offset, entry.data_size),
                ("debug data", entry.debug_data_offset, entry.debug_data_size),
                ("config data", entry.config_data_offset, entry.config_data_size),
            ] {
                let end = u64::from(start) + u64::from(size);
                if size > 0 && (end > data.len() as u64 || (start as usize) < header.data_offset()) {
                    return Err(malformed_error!(
                        "{}: {} of entry {} at {}+{} lies outside the payload area",
                        file_name,
                        what,
                        index,
                        start,
                        size
                    ));
                }
            }
        }

        log::debug!(
            "read shard {} ({}): {} entries, {} index entries",
            header.shard_id,
            file_name,
            entries.len(),
            index32.len()
        );

        Ok(BlobShard {
            file_name,
            arch,
            header,
            entries,
            index32,
            index64,
            input,
        })
    }

    /// Reads and parses the shard file at `path`; the architecture comes from its name.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if the file cannot be mapped and the errors of
    /// [`BlobShard::parse`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<BlobShard> {
        let path = path.as_ref();
        let arch = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(".blob"))
            .and_then(|n| n.rsplit('.').next())
            .and_then(TargetArch::from_file_component)
            .unwrap_or(TargetArch::None);

        BlobShard::parse(Input::from_file(path)?, arch)
    }

    /// Shard id
    #[must_use]
    pub fn shard_id(&self) -> u32 {
        self.header.shard_id
    }

    /// Returns true if this is the index shard
    #[must_use]
    pub fn is_index_shard(&self) -> bool {
        self.header.is_index_shard()
    }

    /// Assembly image of a local entry
    #[must_use]
    pub fn image(&self, local_index: u32) -> Option<&[u8]> {
        let entry = self.entries.get(local_index as usize)?;
        self.payload(entry.data_offset, entry.data_size)
    }

    /// Debug information of a local entry, if any
    #[must_use]
    pub fn debug_data(&self, local_index: u32) -> Option<&[u8]> {
        let entry = self.entries.get(local_index as usize)?;
        self.payload(entry.debug_data_offset, entry.debug_data_size)
    }

    /// Assembly config of a local entry, if any
    #[must_use]
    pub fn config_data(&self, local_index: u32) -> Option<&[u8]> {
        let entry = self.entries.get(local_index as usize)?;
        self.payload(entry.config_data_offset, entry.config_data_size)
    }

    /// The raw shard bytes
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.input.data()
    }

    fn payload(&self, offset: u32, size: u32) -> Option<&[u8]> {
        if size == 0 {
            return None;
        }
        self.input.data_slice(offset as usize, size as usize).ok()
    }
}

impl std::fmt::Debug for BlobShard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobShard")
            .field("file_name", &self.file_name)
            .field("arch", &self.arch)
            .field("header", &self.header)
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        blob::format::{EntryFlags, BLOB_MAGIC},
        file::io::push_le,
    };

    fn shard(shard_id: u32, global: u32, entry: LocalEntry, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        BlobHeader {
            version: 1,
            local_entry_count: 1,
            global_entry_count: global,
            shard_id,
        }
        .write(&mut out);
        entry.write(&mut out);
        for _ in 0..global * 2 {
            HashEntry {
                hash: 1,
                mapping_index: 0,
                local_index: 0,
                shard_id,
            }
            .write(&mut out);
        }
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn payload_slices() {
        let offset = (HEADER_SIZE + LOCAL_ENTRY_SIZE) as u32;
        let entry = LocalEntry {
            data_offset: offset,
            data_size: 4,
            config_data_offset: offset + 4,
            config_data_size: 2,
            flags: EntryFlags::ABI_SPECIFIC,
            ..LocalEntry::default()
        };
        let data = shard(3, 0, entry, b"MZ..<>");
        let parsed = BlobShard::parse(Input::from_mem("a.3.x86.blob", data), TargetArch::X86).unwrap();

        assert_eq!(parsed.shard_id(), 3);
        assert!(!parsed.is_index_shard());
        assert_eq!(parsed.image(0), Some(&b"MZ.."[..]));
        assert_eq!(parsed.config_data(0), Some(&b"<>"[..]));
        assert_eq!(parsed.debug_data(0), None);
        assert_eq!(parsed.image(1), None);
    }

    #[test]
    fn index_shard_tables() {
        let offset = (HEADER_SIZE + LOCAL_ENTRY_SIZE + 2 * 20) as u32;
        let entry = LocalEntry {
            data_offset: offset,
            data_size: 1,
            ..LocalEntry::default()
        };
        let parsed = BlobShard::parse(Input::from_mem("a.blob", shard(0, 1, entry, b"x")), TargetArch::None).unwrap();
        assert_eq!(parsed.index32.len(), 1);
        assert_eq!(parsed.index64.len(), 1);
        assert_eq!(parsed.image(0), Some(&b"x"[..]));
    }

    #[test]
    fn payload_outside_file() {
        let entry = LocalEntry {
            data_offset: (HEADER_SIZE + LOCAL_ENTRY_SIZE) as u32,
            data_size: 100,
            ..LocalEntry::default()
        };
        let data = shard(1, 0, entry, b"abc");
        match BlobShard::parse(Input::from_mem("bad.blob", data), TargetArch::Arm) {
            Err(Error::Malformed { message, .. }) => assert!(message.starts_with("bad.blob")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn payload_inside_tables() {
        let entry = LocalEntry {
            data_offset: 0,
            data_size: 4,
            ..LocalEntry::default()
        };
        let data = shard(1, 0, entry, b"abcd");
        assert!(matches!(
            BlobShard::parse(Input::from_mem("bad.blob", data), TargetArch::Arm),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn data_shard_with_index() {
        let data = shard(2, 1, LocalEntry::default(), b"");
        assert!(matches!(
            BlobShard::parse(Input::from_mem("bad.blob", data), TargetArch::Arm),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn truncated_tables() {
        let mut data = Vec::new();
        push_le(&mut data, BLOB_MAGIC);
        push_le(&mut data, 1u32);
        push_le(&mut data, 5u32);
        push_le(&mut data, 0u32);
        push_le(&mut data, 1u32);
        assert!(matches!(
            BlobShard::parse(Input::from_mem("short.blob", data), TargetArch::Arm),
            Err(Error::OutOfBounds)
        ));
    }

    fn forged_header(local: u32, global: u32, shard_id: u32) -> Vec<u8> {
        let mut data = Vec::new();
        BlobHeader {
            version: 1,
            local_entry_count: local,
            global_entry_count: global,
            shard_id,
        }
        .write(&mut data);
        data
    }

    #[test]
    fn entry_counts_larger_than_file() {
        for (local, global, shard_id) in [(u32::MAX, 0, 1), (0, u32::MAX, 0), (u32::MAX, u32::MAX, 0)] {
            let data = forged_header(local, global, shard_id);
            assert!(matches!(
                BlobShard::parse(Input::from_mem("forged.blob", data), TargetArch::Arm),
                Err(Error::OutOfBounds)
            ));
        }
    }

    #[test]
    fn arch_from_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assemblies.1.arm64_v8a.blob");
        std::fs::write(&path, shard(1, 0, LocalEntry::default(), b"")).unwrap();
        assert_eq!(BlobShard::from_file(&path).unwrap().arch, TargetArch::Arm64);
    }
}
