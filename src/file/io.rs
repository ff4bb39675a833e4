//! Little-endian primitives shared by the module image and blob shard formats.
//!
//! Readers advance an offset and fail with [`crate::Error::OutOfBounds`] instead of reading
//! past the end; writers append to a growable buffer.
//!
//! ```rust,ignore
//! use peerweave::file::io::{push_le, push_string, read_le_at, read_string_at};
//!
//! let mut data = Vec::new();
//! push_le(&mut data, 0x0600_0001u32);
//! push_string(&mut data, "n_OnCreate");
//!
//! let mut offset = 0;
//! let token: u32 = read_le_at(&data, &mut offset)?;
//! let name = read_string_at(&data, &mut offset)?;
//! # Ok::<(), peerweave::Error>(())
//! ```

use crate::{Error::OutOfBounds, Result};

/// Fixed-size integers with a little-endian encoding.
pub trait LeBytes: Sized {
    /// Encoded form, `[u8; size_of::<Self>()]`
    type Bytes: AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Decodes a value
    fn decode(bytes: Self::Bytes) -> Self;

    /// Encodes a value
    fn encode(self) -> Self::Bytes;
}

macro_rules! le_bytes {
    ($($ty:ty),*) => {$(
        impl LeBytes for $ty {
            type Bytes = [u8; std::mem::size_of::<$ty>()];

            fn decode(bytes: Self::Bytes) -> Self {
                <$ty>::from_le_bytes(bytes)
            }

            fn encode(self) -> Self::Bytes {
                self.to_le_bytes()
            }
        }
    )*};
}

le_bytes!(u8, i8, u16, i16, u32, i32, u64, i64);

fn take<'a>(data: &'a [u8], offset: &mut usize, len: usize) -> Result<&'a [u8]> {
    let bytes = offset
        .checked_add(len)
        .and_then(|end| data.get(*offset..end))
        .ok_or(OutOfBounds)?;
    *offset += len;
    Ok(bytes)
}

/// Reads a `T` at `offset` and advances past it.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if fewer than `size_of::<T>()` bytes are left.
pub fn read_le_at<T: LeBytes>(data: &[u8], offset: &mut usize) -> Result<T> {
    let bytes = take(data, offset, std::mem::size_of::<T>())?;
    <T::Bytes>::try_from(bytes).map(T::decode).map_err(|_| OutOfBounds)
}

/// Appends `value`
pub fn push_le<T: LeBytes>(data: &mut Vec<u8>, value: T) {
    data.extend_from_slice(value.encode().as_ref());
}

/// Reads a string stored as a `u32` byte length followed by UTF-8 and advances past it.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] for truncated input and [`crate::Error::Malformed`]
/// for invalid UTF-8.
pub fn read_string_at(data: &[u8], offset: &mut usize) -> Result<String> {
    let len = read_le_at::<u32>(data, offset)? as usize;
    let start = *offset;
    let bytes = take(data, offset, len)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|e| malformed_error!("invalid UTF-8 string at offset {}: {}", start, e))
}

/// Appends `value` as read by [`read_string_at`]
pub fn push_string(data: &mut Vec<u8>, value: &str) {
    push_le(data, value.len() as u32);
    data.extend_from_slice(value.as_bytes());
}
