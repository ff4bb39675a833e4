//! Numeric helpers for binary layouts.

use crate::Result;

/// Converts a `usize` to `u32` for serialization, returning an error if the value
/// exceeds `u32::MAX`.
///
/// # Errors
///
/// Returns an error if `value` exceeds `u32::MAX`.
pub fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| malformed_error!("Serialized value {} exceeds u32::MAX", value))
}

/// Rounds `value` up to the next multiple of `alignment`.
///
/// `alignment` must be a power of two.
///
/// ```rust,ignore
/// assert_eq!(align_to(5, 4), 8);
/// assert_eq!(align_to(8, 4), 8);
/// assert_eq!(align_to(0, 4), 0);
/// ```
#[must_use]
pub fn align_to(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

/// Returns `Some(n)` if `value == 2^n`, `None` otherwise.
#[must_use]
#[allow(clippy::cast_possible_truncation)] // trailing_zeros <= 63 for u64
pub fn log2_exact(value: u64) -> Option<u8> {
    if value.is_power_of_two() {
        Some(value.trailing_zeros() as u8)
    } else {
        None
    }
}
