//! Type and method signatures of the managed module model.
//!
//! [`TypeSignature`] mirrors the ECMA-335 element types that can appear in the signature of a
//! native callback. The encoding used by the module file format reuses the ECMA-335
//! `ELEMENT_TYPE_*` tag values, with class and value type names stored inline instead of
//! as `TypeDefOrRef` coded indices.
//!
//! Blittability, the property deciding whether a value can cross the managed/native boundary
//! without conversion, is defined here as well:
//!
//! | Kind                                   | Blittable |
//! |----------------------------------------|-----------|
//! | `I1 U1 I2 U2 I4 U4 I8 U8 R4 R8 I U`    | yes       |
//! | pointers (`T*`)                        | yes       |
//! | `void` (return position only)          | yes       |
//! | `bool`                                 | no, converted to `U1` by a wrapper |
//! | everything else                        | no        |

use std::fmt;

use crate::{
    file::io::{push_le, push_string, read_le_at, read_string_at},
    Result,
};

/// Nesting limit for pointer and array element types when decoding.
const MAX_SIGNATURE_DEPTH: usize = 32;

/// A type appearing in a field, parameter or return position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeSignature {
    /// `void`, only valid as a return type
    Void,
    /// `System.Boolean`
    Boolean,
    /// `System.Char`
    Char,
    /// `System.SByte`
    I1,
    /// `System.Byte`
    U1,
    /// `System.Int16`
    I2,
    /// `System.UInt16`
    U2,
    /// `System.Int32`
    I4,
    /// `System.UInt32`
    U4,
    /// `System.Int64`
    I8,
    /// `System.UInt64`
    U8,
    /// `System.Single`
    R4,
    /// `System.Double`
    R8,
    /// `System.IntPtr`
    I,
    /// `System.UIntPtr`
    U,
    /// `System.String`
    String,
    /// `System.Object`
    Object,
    /// Unmanaged pointer to the element type
    Ptr(Box<TypeSignature>),
    /// Reference type, by full name
    Class(String),
    /// Value type, by full name
    ValueType(String),
    /// Single-dimensional zero-based array
    SzArray(Box<TypeSignature>),
}

impl TypeSignature {
    /// Returns true if values of this type cross the native boundary unchanged.
    ///
    /// `Void` counts as blittable; callers check that it only appears as a return type.
    #[must_use]
    pub fn is_blittable(&self) -> bool {
        matches!(
            self,
            TypeSignature::Void
                | TypeSignature::I1
                | TypeSignature::U1
                | TypeSignature::I2
                | TypeSignature::U2
                | TypeSignature::I4
                | TypeSignature::U4
                | TypeSignature::I8
                | TypeSignature::U8
                | TypeSignature::R4
                | TypeSignature::R8
                | TypeSignature::I
                | TypeSignature::U
                | TypeSignature::Ptr(_)
        )
    }

    /// Returns true for the one non-blittable type a wrapper can convert.
    #[must_use]
    pub fn is_convertible(&self) -> bool {
        *self == TypeSignature::Boolean
    }

    /// The type a native entry point uses in place of this one.
    ///
    /// Blittable types map to themselves and `bool` maps to an unsigned byte. Returns `None`
    /// for types that cannot appear in a native entry point at all.
    #[must_use]
    pub fn native_equivalent(&self) -> Option<TypeSignature> {
        if self.is_blittable() {
            Some(self.clone())
        } else if self.is_convertible() {
            Some(TypeSignature::U1)
        } else {
            None
        }
    }

    fn tag(&self) -> u8 {
        match self {
            TypeSignature::Void => 0x01,
            TypeSignature::Boolean => 0x02,
            TypeSignature::Char => 0x03,
            TypeSignature::I1 => 0x04,
            TypeSignature::U1 => 0x05,
            TypeSignature::I2 => 0x06,
            TypeSignature::U2 => 0x07,
            TypeSignature::I4 => 0x08,
            TypeSignature::U4 => 0x09,
            TypeSignature::I8 => 0x0A,
            TypeSignature::U8 => 0x0B,
            TypeSignature::R4 => 0x0C,
            TypeSignature::R8 => 0x0D,
            TypeSignature::String => 0x0E,
            TypeSignature::Ptr(_) => 0x0F,
            TypeSignature::ValueType(_) => 0x11,
            TypeSignature::Class(_) => 0x12,
            TypeSignature::I => 0x18,
            TypeSignature::U => 0x19,
            TypeSignature::Object => 0x1C,
            TypeSignature::SzArray(_) => 0x1D,
        }
    }

    /// Appends the binary encoding of this signature to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        push_le(out, self.tag());
        match self {
            TypeSignature::Ptr(inner) | TypeSignature::SzArray(inner) => inner.encode(out),
            TypeSignature::Class(name) | TypeSignature::ValueType(name) => push_string(out, name),
            _ => {}
        }
    }

    /// Decodes a signature at `offset` and advances it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for unknown tags or excessive nesting and
    /// [`crate::Error::OutOfBounds`] for truncated input.
    pub fn decode(data: &[u8], offset: &mut usize) -> Result<TypeSignature> {
        Self::decode_nested(data, offset, 0)
    }

    fn decode_nested(data: &[u8], offset: &mut usize, depth: usize) -> Result<TypeSignature> {
        if depth > MAX_SIGNATURE_DEPTH {
            return Err(malformed_error!(
                "Type signature nesting exceeds {} levels",
                MAX_SIGNATURE_DEPTH
            ));
        }

        let tag_offset = *offset;
        let tag = read_le_at::<u8>(data, offset)?;
        Ok(match tag {
            0x01 => TypeSignature::Void,
            0x02 => TypeSignature::Boolean,
            0x03 => TypeSignature::Char,
            0x04 => TypeSignature::I1,
            0x05 => TypeSignature::U1,
            0x06 => TypeSignature::I2,
            0x07 => TypeSignature::U2,
            0x08 => TypeSignature::I4,
            0x09 => TypeSignature::U4,
            0x0A => TypeSignature::I8,
            0x0B => TypeSignature::U8,
            0x0C => TypeSignature::R4,
            0x0D => TypeSignature::R8,
            0x0E => TypeSignature::String,
            0x0F => TypeSignature::Ptr(Box::new(Self::decode_nested(data, offset, depth + 1)?)),
            0x11 => TypeSignature::ValueType(read_string_at(data, offset)?),
            0x12 => TypeSignature::Class(read_string_at(data, offset)?),
            0x18 => TypeSignature::I,
            0x19 => TypeSignature::U,
            0x1C => TypeSignature::Object,
            0x1D => {
                TypeSignature::SzArray(Box::new(Self::decode_nested(data, offset, depth + 1)?))
            }
            _ => {
                return Err(malformed_error!(
                    "Unknown element type 0x{:02x} at offset {}",
                    tag,
                    tag_offset
                ))
            }
        })
    }
}

impl fmt::Display for TypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSignature::Void => write!(f, "void"),
            TypeSignature::Boolean => write!(f, "bool"),
            TypeSignature::Char => write!(f, "char"),
            TypeSignature::I1 => write!(f, "sbyte"),
            TypeSignature::U1 => write!(f, "byte"),
            TypeSignature::I2 => write!(f, "short"),
            TypeSignature::U2 => write!(f, "ushort"),
            TypeSignature::I4 => write!(f, "int"),
            TypeSignature::U4 => write!(f, "uint"),
            TypeSignature::I8 => write!(f, "long"),
            TypeSignature::U8 => write!(f, "ulong"),
            TypeSignature::R4 => write!(f, "float"),
            TypeSignature::R8 => write!(f, "double"),
            TypeSignature::I => write!(f, "nint"),
            TypeSignature::U => write!(f, "nuint"),
            TypeSignature::String => write!(f, "string"),
            TypeSignature::Object => write!(f, "object"),
            TypeSignature::Ptr(inner) => write!(f, "{inner}*"),
            TypeSignature::Class(name) | TypeSignature::ValueType(name) => write!(f, "{name}"),
            TypeSignature::SzArray(inner) => write!(f, "{inner}[]"),
        }
    }
}

/// Signature of a method: calling convention, return type and ordered parameter types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSignature {
    /// Instance method (an implicit `this` argument precedes the parameters)
    pub has_this: bool,
    /// Return type
    pub return_type: TypeSignature,
    /// Parameter types in declaration order
    pub params: Vec<TypeSignature>,
}

impl MethodSignature {
    /// Signature of a static method
    #[must_use]
    pub fn new_static(return_type: TypeSignature, params: Vec<TypeSignature>) -> Self {
        MethodSignature {
            has_this: false,
            return_type,
            params,
        }
    }

    /// Signature of an instance method
    #[must_use]
    pub fn new_instance(return_type: TypeSignature, params: Vec<TypeSignature>) -> Self {
        MethodSignature {
            has_this: true,
            return_type,
            params,
        }
    }

    /// Number of values a call pops from the evaluation stack, including `this`
    #[must_use]
    pub fn argument_count(&self) -> usize {
        self.params.len() + usize::from(self.has_this)
    }

    /// Returns true if the method returns a value
    #[must_use]
    pub fn returns_value(&self) -> bool {
        self.return_type != TypeSignature::Void
    }

    /// Appends the binary encoding of this signature to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        push_le(out, u8::from(self.has_this));
        self.return_type.encode(out);
        push_le(out, self.params.len() as u32);
        for param in &self.params {
            param.encode(out);
        }
    }

    /// Decodes a method signature at `offset` and advances it.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed or truncated input.
    pub fn decode(data: &[u8], offset: &mut usize) -> Result<MethodSignature> {
        let has_this = read_le_at::<u8>(data, offset)? != 0;
        let return_type = TypeSignature::decode(data, offset)?;
        let count = read_le_at::<u32>(data, offset)? as usize;
        if count > data.len().saturating_sub(*offset) {
            return Err(malformed_error!(
                "Parameter count {} exceeds remaining input",
                count
            ));
        }

        let mut params = Vec::with_capacity(count);
        for _ in 0..count {
            params.push(TypeSignature::decode(data, offset)?);
        }

        Ok(MethodSignature {
            has_this,
            return_type,
            params,
        })
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{param}")?;
        }
        write!(f, ") -> {}", self.return_type)
    }
}
