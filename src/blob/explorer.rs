//! Reading a complete blob set.
//!
//! [`BlobSet`] loads every shard of a set in parallel, verifies that copies of a data shard
//! written for different architectures agree, and resolves the global hash indexes into a
//! list of [`BlobAssembly`] values. Inconsistencies that leave the set usable are recorded as
//! [`DiagnosticCategory::Blob`] warnings; copies of a shard that disagree on
//! architecture-agnostic content abort with [`crate::Error::ShardDivergence`].

use std::{collections::BTreeMap, path::Path, time::Instant};

use rayon::prelude::*;

use crate::{
    arch::TargetArch,
    blob::{
        format::{HashEntry, INDEX_SHARD_ID},
        manifest::Manifest,
        manifest_file_name, parse_shard_file_name,
        reader::BlobShard,
        source::{open_source, BlobSource},
    },
    metadata::diagnostics::{DiagnosticCategory, Diagnostics},
    utils::hash64,
    Error, Result,
};

/// An assembly resolved through the global index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobAssembly {
    /// Name from the manifest, or the 64-bit hash in hex without one
    pub name: String,
    /// 32-bit name hash, 0 if the 32-bit index has no entry for it
    pub hash32: u32,
    /// 64-bit name hash
    pub hash64: u64,
    /// Shard holding the assembly
    pub shard_id: u32,
    /// Index inside the shard
    pub local_index: u32,
    /// Position in the manifest
    pub mapping_index: u32,
    /// The image differs between architectures
    pub abi_specific: bool,
}

/// All shards of a blob set.
pub struct BlobSet {
    description: String,
    base_name: String,
    shards: BTreeMap<u32, Vec<BlobShard>>,
    index32: Vec<HashEntry>,
    index64: Vec<HashEntry>,
    assemblies: Vec<BlobAssembly>,
    manifest: Option<Manifest>,
    diagnostics: Diagnostics,
}

impl BlobSet {
    /// Opens the blob set at `path`.
    ///
    /// `path` may be a shard or manifest file, a directory containing `assemblies.*` files,
    /// or an `.apk`, `.aab` or `.zip` archive.
    ///
    /// # Errors
    ///
    /// See [`open_source`] and [`BlobSet::from_source`].
    pub fn open(path: impl AsRef<Path>) -> Result<BlobSet> {
        let (source, base_name) = open_source(path)?;
        BlobSet::from_source(source.as_ref(), &base_name)
    }

    /// Reads the blob set named `base_name` from `source`.
    ///
    /// # Errors
    ///
    /// Returns the errors of reading and parsing each shard,
    /// [`crate::Error::Error`] if there is no index shard,
    /// [`crate::Error::Malformed`] if a shard's header disagrees with its file name or the
    /// manifest is not text, and [`crate::Error::ShardDivergence`] if copies of a data
    /// shard differ.
    pub fn from_source(source: &dyn BlobSource, base_name: &str) -> Result<BlobSet> {
        let start = Instant::now();
        let entries = source.entries()?;
        let shard_entries: Vec<(&String, u32, TargetArch)> = entries
            .iter()
            .filter_map(|entry| parse_shard_file_name(base_name, entry).map(|(id, arch)| (entry, id, arch)))
            .collect();

        let loaded = shard_entries
            .par_iter()
            .map(|(entry, id, arch)| {
                let shard = BlobShard::parse(source.load(entry)?, *arch)?;
                if shard.shard_id() != *id {
                    return Err(malformed_error!(
                        "{}: header names shard {}, file name names shard {}",
                        entry,
                        shard.shard_id(),
                        id
                    ));
                }
                Ok(shard)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut shards: BTreeMap<u32, Vec<BlobShard>> = BTreeMap::new();
        for shard in loaded {
            shards.entry(shard.shard_id()).or_default().push(shard);
        }
        for copies in shards.values_mut() {
            copies.sort_by_key(|shard| shard.arch);
        }

        let Some(index_shard) = shards.get(&INDEX_SHARD_ID).and_then(|copies| copies.first()) else {
            return Err(Error::Error(format!(
                "no index shard '{}.blob' in {}",
                base_name,
                source.description()
            )));
        };
        let index32 = index_shard.index32.clone();
        let index64 = index_shard.index64.clone();

        for copies in shards.values() {
            check_copies(copies)?;
        }

        let manifest_name = manifest_file_name(base_name);
        let manifest = if entries.contains(&manifest_name) {
            let input = source.load(&manifest_name)?;
            let text = std::str::from_utf8(input.data())
                .map_err(|_| malformed_error!("{}: manifest is not UTF-8", manifest_name))?;
            Some(Manifest::parse(text, &manifest_name)?)
        } else {
            None
        };

        let mut set = BlobSet {
            description: source.description(),
            base_name: base_name.to_string(),
            shards,
            index32,
            index64,
            assemblies: Vec::new(),
            manifest,
            diagnostics: Diagnostics::new(),
        };
        set.resolve();

        log::info!(
            "read blob set '{}' from {}: {} shard files, {} assemblies in {:?}",
            set.base_name,
            set.description,
            set.shards.values().map(Vec::len).sum::<usize>(),
            set.assemblies.len(),
            start.elapsed()
        );
        Ok(set)
    }

    /// Resolved assemblies in mapping index order
    #[must_use]
    pub fn assemblies(&self) -> &[BlobAssembly] {
        &self.assemblies
    }

    /// Shard copies by shard id, each sorted by architecture
    #[must_use]
    pub fn shards(&self) -> &BTreeMap<u32, Vec<BlobShard>> {
        &self.shards
    }

    /// Warnings recorded while resolving the index
    #[must_use]
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// The manifest, if the set has one
    #[must_use]
    pub fn manifest(&self) -> Option<&Manifest> {
        self.manifest.as_ref()
    }

    /// Base name of the set's files
    #[must_use]
    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// Finds an assembly by its 32-bit name hash
    #[must_use]
    pub fn lookup_by_hash32(&self, hash: u32) -> Option<&BlobAssembly> {
        self.lookup(&self.index32, u64::from(hash))
    }

    /// Finds an assembly by its 64-bit name hash
    #[must_use]
    pub fn lookup_by_hash64(&self, hash: u64) -> Option<&BlobAssembly> {
        self.lookup(&self.index64, hash)
    }

    /// Finds an assembly by name through the 64-bit index
    #[must_use]
    pub fn lookup_by_name(&self, name: &str) -> Option<&BlobAssembly> {
        self.lookup_by_hash64(hash64(name))
    }

    /// Image of `assembly` in the copy of its shard for `arch`.
    ///
    /// The index shard and agnostic lookups ([`TargetArch::None`]) use the first copy.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Error`] if the shard has no copy for `arch` or the entry has no
    /// image.
    pub fn read_image(&self, assembly: &BlobAssembly, arch: TargetArch) -> Result<&[u8]> {
        let copies = self.shards.get(&assembly.shard_id).map(Vec::as_slice).unwrap_or_default();
        let shard = if assembly.shard_id == INDEX_SHARD_ID || arch.is_agnostic() {
            copies.first()
        } else {
            copies.iter().find(|shard| shard.arch == arch)
        }
        .ok_or_else(|| {
            Error::Error(format!(
                "shard {} of '{}' has no copy for {}",
                assembly.shard_id, self.base_name, arch
            ))
        })?;

        shard.image(assembly.local_index).ok_or_else(|| {
            Error::Error(format!(
                "'{}' has no image in {}",
                assembly.name, shard.file_name
            ))
        })
    }

    fn lookup(&self, index: &[HashEntry], hash: u64) -> Option<&BlobAssembly> {
        let position = index.partition_point(|entry| entry.hash < hash);
        let entry = index.get(position).filter(|entry| entry.hash == hash)?;
        self.by_mapping_index(entry.mapping_index)
    }

    fn by_mapping_index(&self, mapping_index: u32) -> Option<&BlobAssembly> {
        self.assemblies
            .binary_search_by_key(&mapping_index, |assembly| assembly.mapping_index)
            .ok()
            .map(|position| &self.assemblies[position])
    }

    fn resolve(&mut self) {
        for (bits, index) in [(32, &mut self.index32), (64, &mut self.index64)] {
            if !index.windows(2).all(|w| w[0].hash <= w[1].hash) {
                warn_diag!(
                    self.diagnostics,
                    DiagnosticCategory::Blob,
                    "{}-bit index of '{}' is not sorted",
                    bits,
                    self.base_name
                );
                index.sort();
            }
        }

        let mut assemblies = Vec::with_capacity(self.index64.len());
        for entry in &self.index64 {
            let Some(local) = self
                .shards
                .get(&entry.shard_id)
                .and_then(|copies| copies.first())
                .and_then(|shard| shard.entries.get(entry.local_index as usize))
            else {
                warn_diag!(
                    self.diagnostics,
                    DiagnosticCategory::Blob,
                    "index entry 0x{:016x} points at missing entry {} of shard {}",
                    entry.hash,
                    entry.local_index,
                    entry.shard_id
                );
                continue;
            };

            assemblies.push(BlobAssembly {
                name: self.manifest_name(entry),
                hash32: 0,
                hash64: entry.hash,
                shard_id: entry.shard_id,
                local_index: entry.local_index,
                mapping_index: entry.mapping_index,
                abi_specific: local.is_abi_specific(),
            });
        }
        assemblies.sort_by_key(|assembly| assembly.mapping_index);

        for entry in &self.index32 {
            let position = assemblies.binary_search_by_key(&entry.mapping_index, |a| a.mapping_index);
            match position {
                Ok(position)
                    if assemblies[position].shard_id == entry.shard_id
                        && assemblies[position].local_index == entry.local_index =>
                {
                    assemblies[position].hash32 = u32::try_from(entry.hash).unwrap_or_default();
                }
                _ => warn_diag!(
                    self.diagnostics,
                    DiagnosticCategory::Blob,
                    "32-bit index entry 0x{:08x} (mapping index {}) does not match the 64-bit index",
                    entry.hash,
                    entry.mapping_index
                ),
            }
        }

        self.assemblies = assemblies;
    }

    /// Name for an index entry, preferring the manifest line with the same hash.
    fn manifest_name(&self, entry: &HashEntry) -> String {
        let fallback = || format!("0x{:016x}", entry.hash);
        let Some(manifest) = &self.manifest else {
            return fallback();
        };

        match manifest.get(entry.mapping_index) {
            Some(line) if line.hash64 == entry.hash => line.name.clone(),
            positional => {
                let by_hash = manifest.by_hash64(entry.hash);
                warn_diag!(
                    self.diagnostics,
                    DiagnosticCategory::Blob,
                    "manifest line {} names '{}', but index entry 0x{:016x} belongs to '{}'",
                    entry.mapping_index,
                    positional.map_or("<none>", |line| line.name.as_str()),
                    entry.hash,
                    by_hash.map_or("<unknown>", |line| line.name.as_str())
                );
                by_hash.map_or_else(fallback, |line| line.name.clone())
            }
        }
    }
}

/// Verifies that the copies of one shard agree on everything not architecture-specific.
fn check_copies(copies: &[BlobShard]) -> Result<()> {
    let Some((reference, others)) = copies.split_first() else {
        return Ok(());
    };

    for other in others {
        let diverges = other.entries.len() != reference.entries.len()
            || reference.entries.iter().zip(&other.entries).any(|(a, b)| {
                a.flags != b.flags || (!a.is_abi_specific() && a.content_crc32 != b.content_crc32)
            });

        if diverges {
            log::error!(
                "shard {}: {} differs from {}",
                reference.shard_id(),
                other.file_name,
                reference.file_name
            );
            return Err(Error::ShardDivergence {
                shard_id: reference.shard_id(),
                arch: other.arch,
            });
        }
    }
    Ok(())
}

impl std::fmt::Debug for BlobSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobSet")
            .field("description", &self.description)
            .field("base_name", &self.base_name)
            .field("shards", &self.shards.len())
            .field("assemblies", &self.assemblies.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        blob::{
            format::{BlobHeader, LocalEntry},
            shard_file_name, BlobAssemblyInput, BlobWriter, FilesystemSource,
        },
        config::BlobWriterConfig,
        utils::hash32,
    };

    fn write_set(dir: &Path, limit: Option<usize>, targets: &[TargetArch], inputs: &[BlobAssemblyInput]) {
        BlobWriter::new(BlobWriterConfig {
            output_dir: dir.to_path_buf(),
            max_assemblies_per_shard: limit,
            target_archs: targets.to_vec(),
            ..BlobWriterConfig::default()
        })
        .write(inputs)
        .unwrap();
    }

    fn agnostic(name: &str) -> BlobAssemblyInput {
        BlobAssemblyInput::new(name, TargetArch::None, name.as_bytes().to_vec())
    }

    #[test]
    fn lookups() {
        let dir = tempfile::tempdir().unwrap();
        let inputs: Vec<_> = ["Mono.Android", "System.Runtime", "App"].map(agnostic).into();
        write_set(dir.path(), Some(2), &[TargetArch::Arm64, TargetArch::X86_64], &inputs);

        let set = BlobSet::open(dir.path()).unwrap();
        assert_eq!(set.assemblies().len(), 3);
        assert!(!set.diagnostics().has_any());

        let app = set.lookup_by_name("App").unwrap();
        assert_eq!(app.name, "App");
        assert_eq!((app.shard_id, app.local_index, app.mapping_index), (2, 0, 2));
        assert_eq!(set.lookup_by_hash32(hash32("App")), Some(app));
        assert_eq!(set.read_image(app, TargetArch::X86_64).unwrap(), b"App");
        assert!(set.read_image(app, TargetArch::Arm).is_err());
        assert!(set.lookup_by_name("Missing").is_none());
    }

    #[test]
    fn without_manifest() {
        let dir = tempfile::tempdir().unwrap();
        write_set(dir.path(), None, &[TargetArch::Arm64], &[agnostic("App")]);
        std::fs::remove_file(dir.path().join("assemblies.manifest")).unwrap();

        let set = BlobSet::open(dir.path().join("assemblies.blob")).unwrap();
        let app = set.lookup_by_name("App").unwrap();
        assert_eq!(app.name, format!("0x{:016x}", hash64("App")));
        assert!(set.manifest().is_none());
    }

    #[test]
    fn diverging_copies() {
        let dir = tempfile::tempdir().unwrap();
        write_set(dir.path(), Some(8), &[TargetArch::Arm64, TargetArch::X86], &[agnostic("App")]);

        // Rewrite the x86 copy with different agnostic content
        let x86 = dir.path().join(shard_file_name("assemblies", 1, TargetArch::X86));
        let mut data = std::fs::read(&x86).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        let header = BlobHeader::read(&data, "x").unwrap();
        let mut offset = crate::blob::format::HEADER_SIZE;
        let mut entry = LocalEntry::read(&data, &mut offset).unwrap();
        entry.content_crc32 ^= 1;
        let mut patched = Vec::new();
        header.write(&mut patched);
        entry.write(&mut patched);
        patched.extend_from_slice(&data[offset..]);
        std::fs::write(&x86, patched).unwrap();

        match BlobSet::open(dir.path()) {
            Err(Error::ShardDivergence { shard_id, arch }) => {
                assert_eq!(shard_id, 1);
                assert_eq!(arch, TargetArch::X86);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn manifest_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        write_set(dir.path(), None, &[TargetArch::Arm64], &[agnostic("A"), agnostic("B")]);
        let manifest_path = dir.path().join("assemblies.manifest");
        let manifest = Manifest::parse(&std::fs::read_to_string(&manifest_path).unwrap(), "m").unwrap();
        let mut swapped = manifest.entries().to_vec();
        swapped.swap(0, 1);
        std::fs::write(&manifest_path, Manifest::new(swapped).render()).unwrap();

        let set = BlobSet::from_source(&FilesystemSource::new(dir.path(), "assemblies"), "assemblies").unwrap();
        assert_eq!(set.lookup_by_name("A").unwrap().name, "A");
        assert_eq!(set.diagnostics().by_category(DiagnosticCategory::Blob).len(), 2);
    }

    #[test]
    fn missing_index_shard() {
        let dir = tempfile::tempdir().unwrap();
        write_set(dir.path(), Some(1), &[TargetArch::Arm64], &[agnostic("A")]);
        std::fs::remove_file(dir.path().join("assemblies.blob")).unwrap();
        assert!(matches!(BlobSet::open(dir.path()), Err(Error::Error(_))));
    }

    #[test]
    fn dangling_index_entry() {
        let dir = tempfile::tempdir().unwrap();
        write_set(dir.path(), Some(1), &[TargetArch::Arm64], &[agnostic("A"), agnostic("B")]);
        std::fs::remove_file(dir.path().join("assemblies.2.arm64_v8a.blob")).unwrap();

        let set = BlobSet::open(dir.path()).unwrap();
        assert_eq!(set.assemblies().len(), 1);
        assert!(set.lookup_by_name("B").is_none());
        assert!(set.diagnostics().has_warnings());
    }
}
