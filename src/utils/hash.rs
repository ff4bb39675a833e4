//! Name hashing shared by the DSO cache and the blob index.
//!
//! Names are hashed as their UTF-8 bytes with seed 0. 32-bit consumers use xxh32, 64-bit
//! consumers use xxh64; where a 32-bit hash is stored in a 64-bit slot it is zero-extended.

use xxhash_rust::{xxh32::xxh32, xxh64::xxh64};

use crate::arch::PointerWidth;

/// xxh32 of the UTF-8 bytes of `name`
#[must_use]
pub fn hash32(name: &str) -> u32 {
    xxh32(name.as_bytes(), 0)
}

/// xxh64 of the UTF-8 bytes of `name`
#[must_use]
pub fn hash64(name: &str) -> u64 {
    xxh64(name.as_bytes(), 0)
}

/// Hash of `name` as used by a native consumer with the given pointer width.
#[must_use]
pub fn hash_for_width(name: &str, width: PointerWidth) -> u64 {
    if width.is_64bit() {
        hash64(name)
    } else {
        u64::from(hash32(name))
    }
}

/// CRC32 over the concatenated parts of an entry payload
#[must_use]
pub fn content_checksum(parts: &[&[u8]]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}
