//! Blob containers bundling compiled assemblies for the runtime loader.
//!
//! A blob set consists of one or more shard files and a text manifest. Shard 0 is the index
//! shard: besides its own assemblies (if any) it carries a 32-bit and a 64-bit hash index
//! over every assembly in the set, mapping a name hash to the shard and local index holding
//! it. Data shards are written once per target architecture; architecture-agnostic content
//! is replicated and must be byte-identical in every copy.
//!
//! # File names
//!
//! | File                              | Content                                  |
//! |-----------------------------------|------------------------------------------|
//! | `{base}.blob`                     | index shard                              |
//! | `{base}.{shard_id}.{abi}.blob`    | data shard for one architecture          |
//! | `{base}.manifest`                 | names of all assemblies                  |
//!
//! # Key Components
//!
//! - [`BlobWriter`] - Lays out assemblies into shards and writes them
//! - [`BlobShard`] - One parsed shard file
//! - [`BlobSet`] - All shards of a set with integrity checks and lookups
//! - [`BlobSource`] - Loose files or archive entries the set is read from
//!
//! # Example
//!
//! ```rust,no_run
//! use peerweave::blob::BlobSet;
//!
//! let set = BlobSet::open("obj/Release/app/assemblies.blob")?;
//! if let Some(assembly) = set.lookup_by_name("Mono.Android") {
//!     println!("{} in shard {}", assembly.name, assembly.shard_id);
//! }
//! # Ok::<(), peerweave::Error>(())
//! ```

mod explorer;
pub mod format;
mod manifest;
mod reader;
mod source;
mod writer;

pub use explorer::{BlobAssembly, BlobSet};
pub use format::{BlobHeader, EntryFlags, HashEntry, LocalEntry, BLOB_MAGIC, BLOB_VERSION, INDEX_SHARD_ID};
pub use manifest::{Manifest, ManifestEntry, MANIFEST_HEADER};
pub use reader::BlobShard;
pub use source::{open_source, ArchiveSource, BlobSource, FilesystemSource, ARCHIVE_BASE_NAME};
pub use writer::{BlobAssemblyInput, BlobOutput, BlobWriter};

use crate::arch::TargetArch;

/// File name of a shard.
///
/// The index shard has no architecture component; data shards always have one.
#[must_use]
pub fn shard_file_name(base_name: &str, shard_id: u32, arch: TargetArch) -> String {
    match arch.file_component() {
        Some(abi) if shard_id != INDEX_SHARD_ID => format!("{base_name}.{shard_id}.{abi}.blob"),
        _ => format!("{base_name}.blob"),
    }
}

/// File name of the manifest
#[must_use]
pub fn manifest_file_name(base_name: &str) -> String {
    format!("{base_name}.manifest")
}

/// Shard id and architecture encoded in a shard file name, `None` for other files.
#[must_use]
pub fn parse_shard_file_name(base_name: &str, file_name: &str) -> Option<(u32, TargetArch)> {
    let rest = file_name.strip_prefix(base_name)?.strip_suffix(".blob")?;
    if rest.is_empty() {
        return Some((INDEX_SHARD_ID, TargetArch::None));
    }

    let (id, abi) = rest.strip_prefix('.')?.split_once('.')?;
    let id = id.parse::<u32>().ok().filter(|id| *id != INDEX_SHARD_ID)?;
    Some((id, TargetArch::from_file_component(abi)?))
}
