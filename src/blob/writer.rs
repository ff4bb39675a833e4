//! Lays out assemblies into blob shards.
//!
//! Without a shard size limit everything goes into the self-describing index shard. With a
//! limit, shard 0 only carries the hash indexes and the assemblies are distributed over data
//! shards `1..=k` in input order; every data shard is written once per target architecture.

use std::{collections::HashMap, path::PathBuf};

use crate::{
    arch::TargetArch,
    blob::{
        format::{BlobHeader, EntryFlags, HashEntry, LocalEntry, BLOB_VERSION, INDEX_SHARD_ID},
        manifest::{Manifest, ManifestEntry},
        manifest_file_name, shard_file_name,
    },
    config::BlobWriterConfig,
    file::output::StagedBatch,
    utils::{content_checksum, hash32, hash64, to_u32},
    Error, Result,
};

/// One assembly handed to the writer.
///
/// Architecture-specific assemblies are passed once per target architecture under the same
/// name; agnostic assemblies are passed once with [`TargetArch::None`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobAssemblyInput {
    /// Assembly name without extension, as looked up by the runtime
    pub name: String,
    /// Architecture of this copy
    pub arch: TargetArch,
    /// Assembly image
    pub image: Vec<u8>,
    /// Debug information
    pub debug: Option<Vec<u8>>,
    /// Assembly config
    pub config: Option<Vec<u8>>,
}

impl BlobAssemblyInput {
    /// Assembly with only an image
    pub fn new(name: impl Into<String>, arch: TargetArch, image: Vec<u8>) -> Self {
        BlobAssemblyInput {
            name: name.into(),
            arch,
            image,
            debug: None,
            config: None,
        }
    }
}

/// Encoded shard files and manifest of a blob set.
#[derive(Debug, Clone)]
pub struct BlobOutput {
    /// `(file name, content)` of each shard, index shard first
    pub shards: Vec<(String, Vec<u8>)>,
    /// The manifest
    pub manifest: Manifest,
}

/// An assembly and its per-architecture copies.
struct Logical<'a> {
    name: &'a str,
    agnostic: Option<&'a BlobAssemblyInput>,
    specific: Vec<&'a BlobAssemblyInput>,
}

impl<'a> Logical<'a> {
    fn copy_for(&self, arch: TargetArch) -> Option<&'a BlobAssemblyInput> {
        self.agnostic
            .or_else(|| self.specific.iter().copied().find(|input| input.arch == arch))
    }

    fn is_abi_specific(&self) -> bool {
        self.agnostic.is_none()
    }
}

/// Writes blob sets.
pub struct BlobWriter {
    config: BlobWriterConfig,
}

impl BlobWriter {
    /// Creates a writer
    #[must_use]
    pub fn new(config: BlobWriterConfig) -> Self {
        BlobWriter { config }
    }

    /// The configuration
    #[must_use]
    pub fn config(&self) -> &BlobWriterConfig {
        &self.config
    }

    /// Encodes the shards and manifest for `inputs`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Error`] if an assembly is given both agnostic and
    /// architecture-specific, twice for one architecture, for an architecture that is not a
    /// target, or not for every target; or if a single shard is requested for
    /// architecture-specific assemblies of several targets.
    /// Returns [`crate::Error::Malformed`] if a shard exceeds 4 GiB.
    pub fn build(&self, inputs: &[BlobAssemblyInput]) -> Result<BlobOutput> {
        let targets = self.targets()?;
        let assemblies = Self::group(inputs, &targets)?;

        let output = match self.config.max_assemblies_per_shard {
            None => self.build_single(&assemblies, &targets)?,
            Some(0) => {
                return Err(Error::Error(
                    "max_assemblies_per_shard must be at least 1".to_string(),
                ))
            }
            Some(limit) => self.build_sharded(&assemblies, &targets, limit)?,
        };

        log::info!(
            "blob set '{}': {} assemblies in {} files",
            self.config.base_name,
            assemblies.len(),
            output.shards.len()
        );
        Ok(output)
    }

    /// Encodes the blob set and writes it into the output directory.
    ///
    /// Shards and manifest are staged first and replace existing files together.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`BlobWriter::build`] and [`crate::Error::FileError`] if writing
    /// fails; in that case no existing file is replaced.
    pub fn write(&self, inputs: &[BlobAssemblyInput]) -> Result<Vec<PathBuf>> {
        let output = self.build(inputs)?;
        std::fs::create_dir_all(&self.config.output_dir)?;

        let mut batch = StagedBatch::new();
        for (file_name, data) in &output.shards {
            batch.stage(self.config.output_dir.join(file_name), data)?;
        }
        batch.stage(
            self.config.output_dir.join(manifest_file_name(&self.config.base_name)),
            output.manifest.render().as_bytes(),
        )?;

        batch.commit()
    }

    fn targets(&self) -> Result<Vec<TargetArch>> {
        let mut targets: Vec<TargetArch> = self
            .config
            .target_archs
            .iter()
            .copied()
            .filter(|arch| !arch.is_agnostic())
            .collect();
        targets.sort();
        targets.dedup();

        if targets.is_empty() {
            return Err(Error::Error(format!(
                "blob set '{}' has no target architecture",
                self.config.base_name
            )));
        }
        Ok(targets)
    }

    fn group<'a>(inputs: &'a [BlobAssemblyInput], targets: &[TargetArch]) -> Result<Vec<Logical<'a>>> {
        let mut assemblies: Vec<Logical<'a>> = Vec::new();
        let mut positions: HashMap<&'a str, usize> = HashMap::new();

        for input in inputs {
            let position = *positions.entry(input.name.as_str()).or_insert_with(|| {
                assemblies.push(Logical {
                    name: &input.name,
                    agnostic: None,
                    specific: Vec::new(),
                });
                assemblies.len() - 1
            });
            let logical = &mut assemblies[position];

            if input.arch.is_agnostic() {
                if logical.agnostic.is_some() || !logical.specific.is_empty() {
                    return Err(Error::Error(format!(
                        "assembly '{}' is given more than once or both with and without an architecture",
                        input.name
                    )));
                }
                logical.agnostic = Some(input);
                continue;
            }

            if logical.agnostic.is_some() {
                return Err(Error::Error(format!(
                    "assembly '{}' is given both with and without an architecture",
                    input.name
                )));
            }
            if !targets.contains(&input.arch) {
                return Err(Error::Error(format!(
                    "assembly '{}' is built for {}, which is not a target architecture",
                    input.name, input.arch
                )));
            }
            if logical.specific.iter().any(|other| other.arch == input.arch) {
                return Err(Error::Error(format!(
                    "assembly '{}' is given twice for {}",
                    input.name, input.arch
                )));
            }
            logical.specific.push(input);
        }

        for logical in &assemblies {
            if let Some(missing) = targets.iter().find(|arch| logical.copy_for(**arch).is_none()) {
                return Err(Error::Error(format!(
                    "assembly '{}' has no copy for {}",
                    logical.name, missing
                )));
            }
        }

        Ok(assemblies)
    }

    fn build_single(&self, assemblies: &[Logical<'_>], targets: &[TargetArch]) -> Result<BlobOutput> {
        let has_specific = assemblies.iter().any(Logical::is_abi_specific);
        if has_specific && targets.len() > 1 {
            return Err(Error::Error(format!(
                "blob set '{}' holds architecture-specific assemblies for {} architectures; \
                 a single shard can only hold one",
                self.config.base_name,
                targets.len()
            )));
        }

        let arch = targets[0];
        let mut copies = Vec::with_capacity(assemblies.len());
        let mut locations = Vec::with_capacity(assemblies.len());
        for (index, logical) in assemblies.iter().enumerate() {
            copies.push(Self::copy(logical, arch)?);
            locations.push((INDEX_SHARD_ID, to_u32(index)?));
        }

        let (index32, index64, manifest) = Self::indexes(assemblies, &locations)?;
        let data = Self::encode_shard(INDEX_SHARD_ID, &copies, &index32, &index64)?;

        Ok(BlobOutput {
            shards: vec![(
                shard_file_name(&self.config.base_name, INDEX_SHARD_ID, TargetArch::None),
                data,
            )],
            manifest,
        })
    }

    fn build_sharded(&self, assemblies: &[Logical<'_>], targets: &[TargetArch], limit: usize) -> Result<BlobOutput> {
        let mut locations = Vec::with_capacity(assemblies.len());
        for (chunk, members) in assemblies.chunks(limit).enumerate() {
            let shard_id = to_u32(chunk + 1)?;
            for local_index in 0..members.len() {
                locations.push((shard_id, to_u32(local_index)?));
            }
        }

        let (index32, index64, manifest) = Self::indexes(assemblies, &locations)?;
        let mut shards = vec![(
            shard_file_name(&self.config.base_name, INDEX_SHARD_ID, TargetArch::None),
            Self::encode_shard(INDEX_SHARD_ID, &[], &index32, &index64)?,
        )];

        for (chunk, members) in assemblies.chunks(limit).enumerate() {
            let shard_id = to_u32(chunk + 1)?;
            for arch in targets {
                let copies = members
                    .iter()
                    .map(|logical| Self::copy(logical, *arch))
                    .collect::<Result<Vec<_>>>()?;
                shards.push((
                    shard_file_name(&self.config.base_name, shard_id, *arch),
                    Self::encode_shard(shard_id, &copies, &[], &[])?,
                ));
            }
        }

        Ok(BlobOutput { shards, manifest })
    }

    fn copy<'a>(logical: &Logical<'a>, arch: TargetArch) -> Result<(&'a BlobAssemblyInput, EntryFlags)> {
        let input = logical.copy_for(arch).ok_or_else(|| {
            Error::Error(format!("assembly '{}' has no copy for {}", logical.name, arch))
        })?;
        let flags = if logical.is_abi_specific() {
            EntryFlags::ABI_SPECIFIC
        } else {
            EntryFlags::empty()
        };
        Ok((input, flags))
    }

    /// Hash indexes and manifest; `locations[i]` is `(shard_id, local_index)` of assembly `i`.
    fn indexes(assemblies: &[Logical<'_>], locations: &[(u32, u32)]) -> Result<(Vec<HashEntry>, Vec<HashEntry>, Manifest)> {
        let mut index32 = Vec::with_capacity(assemblies.len());
        let mut index64 = Vec::with_capacity(assemblies.len());
        let mut manifest = Vec::with_capacity(assemblies.len());

        for (mapping_index, (logical, (shard_id, local_index))) in assemblies.iter().zip(locations).enumerate() {
            let mapping_index = to_u32(mapping_index)?;
            let name_hash32 = hash32(logical.name);
            let name_hash64 = hash64(logical.name);

            index32.push(HashEntry {
                hash: u64::from(name_hash32),
                mapping_index,
                local_index: *local_index,
                shard_id: *shard_id,
            });
            index64.push(HashEntry {
                hash: name_hash64,
                mapping_index,
                local_index: *local_index,
                shard_id: *shard_id,
            });
            manifest.push(ManifestEntry {
                hash32: name_hash32,
                hash64: name_hash64,
                shard_id: *shard_id,
                local_index: *local_index,
                name: logical.name.to_string(),
            });
        }

        index32.sort();
        index64.sort();
        Ok((index32, index64, Manifest::new(manifest)))
    }

    fn encode_shard(
        shard_id: u32,
        copies: &[(&BlobAssemblyInput, EntryFlags)],
        index32: &[HashEntry],
        index64: &[HashEntry],
    ) -> Result<Vec<u8>> {
        let header = BlobHeader {
            version: BLOB_VERSION,
            local_entry_count: to_u32(copies.len())?,
            global_entry_count: to_u32(index32.len())?,
            shard_id,
        };

        let mut entries = Vec::with_capacity(copies.len());
        let mut payload = Vec::new();
        let data_offset = header.data_offset();
        for (input, flags) in copies {
            let debug = input.debug.as_deref().unwrap_or_default();
            let config = input.config.as_deref().unwrap_or_default();

            let mut place = |part: &[u8]| -> Result<(u32, u32)> {
                if part.is_empty() {
                    return Ok((0, 0));
                }
                let offset = to_u32(data_offset + payload.len())?;
                payload.extend_from_slice(part);
                Ok((offset, to_u32(part.len())?))
            };
            let (image_offset, image_size) = place(&input.image)?;
            let (debug_offset, debug_size) = place(debug)?;
            let (config_offset, config_size) = place(config)?;

            entries.push(LocalEntry {
                data_offset: image_offset,
                data_size: image_size,
                debug_data_offset: debug_offset,
                debug_data_size: debug_size,
                config_data_offset: config_offset,
                config_data_size: config_size,
                content_crc32: content_checksum(&[input.image.as_slice(), debug, config]),
                flags: *flags,
            });
        }

        let mut out = Vec::with_capacity(data_offset + payload.len());
        header.write(&mut out);
        for entry in &entries {
            entry.write(&mut out);
        }
        for entry in index32.iter().chain(index64) {
            entry.write(&mut out);
        }
        out.extend_from_slice(&payload);
        to_u32(out.len())?;
        Ok(out)
    }
}
