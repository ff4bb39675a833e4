//! Shared helpers.

pub mod hash;
pub mod math;

pub use hash::{content_checksum, hash32, hash64, hash_for_width};
pub use math::{align_to, log2_exact, to_u32};
