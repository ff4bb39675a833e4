//! Binary module image format.
//!
//! Module images persist the [`ModuleDefinition`] model so rewritten modules can be handed to
//! packaging and reloaded by later build steps. All integers are little-endian, strings are
//! `u32`-length-prefixed UTF-8 and signatures use the encoding from
//! [`crate::metadata::signatures`].
//!
//! ```text
//! magic "PWMD" | version: u32 | arch: u8 | name | assembly_name | mvid: [u8; 16]
//! next_method_rid: u32 | type_count: u32 | types... | member_ref_count: u32 | member_refs...
//! ```
//!
//! Each type record is followed by its fields, methods, nested type records and custom
//! attributes; nesting is limited to [`MAX_NESTING_DEPTH`] levels.

use uguid::Guid;

use crate::{
    arch::TargetArch,
    file::io::{push_le, push_string, read_le_at, read_string_at},
    metadata::{
        method::{MethodAttributes, MethodBody, MethodDefinition, RegisterInfo},
        module::{MemberRef, ModuleDefinition},
        signatures::{MethodSignature, TypeSignature},
        token::Token,
        typedef::{
            CustomAttribute, FieldAttributes, FieldDefinition, TypeAttributes, TypeDefinition,
        },
    },
    Result,
};

/// Module image magic, `PWMD` in file order
pub const MODULE_MAGIC: u32 = 0x444D_5750;
/// Current module image format version
pub const MODULE_VERSION: u32 = 1;
/// Maximum nesting depth of type definitions
pub const MAX_NESTING_DEPTH: usize = 64;

fn arch_to_byte(arch: TargetArch) -> u8 {
    match arch {
        TargetArch::None => 0,
        TargetArch::Arm => 1,
        TargetArch::Arm64 => 2,
        TargetArch::X86 => 3,
        TargetArch::X86_64 => 4,
    }
}

fn arch_from_byte(value: u8) -> Result<TargetArch> {
    Ok(match value {
        0 => TargetArch::None,
        1 => TargetArch::Arm,
        2 => TargetArch::Arm64,
        3 => TargetArch::X86,
        4 => TargetArch::X86_64,
        _ => return Err(malformed_error!("Unknown architecture id {}", value)),
    })
}

/// Serializes a module into its binary image.
#[must_use]
pub fn write_module(module: &ModuleDefinition) -> Vec<u8> {
    let mut out = Vec::with_capacity(4096);

    push_le(&mut out, MODULE_MAGIC);
    push_le(&mut out, MODULE_VERSION);
    push_le(&mut out, arch_to_byte(module.arch));
    push_string(&mut out, &module.name);
    push_string(&mut out, &module.assembly_name);
    out.extend_from_slice(&module.mvid.to_bytes());
    push_le(&mut out, module.next_method_rid);

    push_le(&mut out, module.types.len() as u32);
    for ty in &module.types {
        write_type(&mut out, ty);
    }

    push_le(&mut out, module.member_refs.len() as u32);
    for member in &module.member_refs {
        push_le(&mut out, member.token.value());
        push_string(&mut out, &member.class);
        push_string(&mut out, &member.name);
        push_string(&mut out, &member.scope);
        member.signature.encode(&mut out);
    }

    out
}

fn write_attributes(out: &mut Vec<u8>, attributes: &[CustomAttribute]) {
    push_le(out, attributes.len() as u32);
    for attribute in attributes {
        push_string(out, &attribute.attribute_type);
        push_le(out, attribute.constructor.value());
    }
}

fn write_optional_string(out: &mut Vec<u8>, value: Option<&str>) {
    match value {
        Some(value) => {
            push_le(out, 1u8);
            push_string(out, value);
        }
        None => push_le(out, 0u8),
    }
}

fn write_type(out: &mut Vec<u8>, ty: &TypeDefinition) {
    push_le(out, ty.token.value());
    push_string(out, &ty.namespace);
    push_string(out, &ty.name);
    push_le(out, ty.flags.bits());
    write_optional_string(out, ty.base_type.as_deref());

    push_le(out, ty.interfaces.len() as u32);
    for interface in &ty.interfaces {
        push_string(out, interface);
    }

    push_le(out, ty.fields.len() as u32);
    for field in &ty.fields {
        push_le(out, field.token.value());
        push_string(out, &field.name);
        push_le(out, field.flags.bits());
        field.field_type.encode(out);
    }

    push_le(out, ty.methods.len() as u32);
    for method in &ty.methods {
        write_method(out, method);
    }

    push_le(out, ty.nested_types.len() as u32);
    for nested in &ty.nested_types {
        write_type(out, nested);
    }

    write_attributes(out, &ty.custom_attributes);
}

fn write_method(out: &mut Vec<u8>, method: &MethodDefinition) {
    push_le(out, method.token.value());
    push_string(out, &method.name);
    push_le(out, method.flags.bits());
    method.signature.encode(out);

    match &method.body {
        Some(body) => {
            push_le(out, 1u8);
            push_le(out, body.max_stack);
            push_le(out, body.code.len() as u32);
            out.extend_from_slice(&body.code);
        }
        None => push_le(out, 0u8),
    }

    match &method.register {
        Some(register) => {
            push_le(out, 1u8);
            push_string(out, &register.jni_name);
            push_string(out, &register.jni_signature);
            write_optional_string(out, register.connector.as_deref());
        }
        None => push_le(out, 0u8),
    }

    write_attributes(out, &method.custom_attributes);
}

/// Parses a module image.
///
/// # Arguments
///
/// * `data` - The complete image
/// * `source` - File or entry name used in error messages
///
/// # Errors
///
/// Returns [`crate::Error::Malformed`] for a wrong magic, unsupported version or corrupted
/// content, and [`crate::Error::OutOfBounds`] for truncated input.
pub fn read_module(data: &[u8], source: &str) -> Result<ModuleDefinition> {
    let mut reader = Reader { data, offset: 0 };

    let magic = reader.u32()?;
    if magic != MODULE_MAGIC {
        return Err(malformed_error!(
            "'{}' is not a module image (magic 0x{:08x})",
            source,
            magic
        ));
    }

    let version = reader.u32()?;
    if version != MODULE_VERSION {
        return Err(malformed_error!(
            "'{}' has unsupported module image version {}",
            source,
            version
        ));
    }

    let arch = arch_from_byte(reader.u8()?)?;
    let name = reader.string()?;
    let assembly_name = reader.string()?;
    let mvid = Guid::from_bytes(reader.array16()?);
    let next_method_rid = reader.u32()?;

    let type_count = reader.count()?;
    let mut types = Vec::with_capacity(type_count);
    for _ in 0..type_count {
        types.push(reader.type_def(0)?);
    }

    let ref_count = reader.count()?;
    let mut member_refs = Vec::with_capacity(ref_count);
    for _ in 0..ref_count {
        member_refs.push(MemberRef {
            token: Token(reader.u32()?),
            class: reader.string()?,
            name: reader.string()?,
            scope: reader.string()?,
            signature: MethodSignature::decode(reader.data, &mut reader.offset)?,
        });
    }

    if reader.offset != data.len() {
        return Err(malformed_error!(
            "'{}' has {} trailing bytes",
            source,
            data.len() - reader.offset
        ));
    }

    let mut module = ModuleDefinition {
        name,
        assembly_name,
        mvid,
        path: None,
        arch,
        types,
        member_refs,
        next_method_rid,
    };
    module.next_method_rid = module.next_method_rid.max(module.max_method_rid() + 1);

    Ok(module)
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl Reader<'_> {
    fn u8(&mut self) -> Result<u8> {
        read_le_at(self.data, &mut self.offset)
    }

    fn u16(&mut self) -> Result<u16> {
        read_le_at(self.data, &mut self.offset)
    }

    fn u32(&mut self) -> Result<u32> {
        read_le_at(self.data, &mut self.offset)
    }

    fn string(&mut self) -> Result<String> {
        read_string_at(self.data, &mut self.offset)
    }

    fn optional_string(&mut self) -> Result<Option<String>> {
        Ok(match self.u8()? {
            0 => None,
            _ => Some(self.string()?),
        })
    }

    fn array16(&mut self) -> Result<[u8; 16]> {
        let end = self.offset.checked_add(16).ok_or(out_of_bounds_error!())?;
        let bytes = self
            .data
            .get(self.offset..end)
            .ok_or(out_of_bounds_error!())?;
        let mut out = [0u8; 16];
        out.copy_from_slice(bytes);
        self.offset = end;
        Ok(out)
    }

    /// Element count; every element takes at least one byte, which bounds allocations.
    fn count(&mut self) -> Result<usize> {
        let count = self.u32()? as usize;
        if count > self.data.len() - self.offset {
            return Err(malformed_error!(
                "Element count {} at offset {} exceeds remaining input",
                count,
                self.offset
            ));
        }
        Ok(count)
    }

    fn attributes(&mut self) -> Result<Vec<CustomAttribute>> {
        let count = self.count()?;
        let mut attributes = Vec::with_capacity(count);
        for _ in 0..count {
            attributes.push(CustomAttribute {
                attribute_type: self.string()?,
                constructor: Token(self.u32()?),
            });
        }
        Ok(attributes)
    }

    fn type_def(&mut self, depth: usize) -> Result<TypeDefinition> {
        if depth > MAX_NESTING_DEPTH {
            return Err(malformed_error!(
                "Type nesting exceeds {} levels",
                MAX_NESTING_DEPTH
            ));
        }

        let token = Token(self.u32()?);
        let namespace = self.string()?;
        let name = self.string()?;
        let flags = TypeAttributes::from_bits_retain(self.u32()?);
        let base_type = self.optional_string()?;

        let interface_count = self.count()?;
        let mut interfaces = Vec::with_capacity(interface_count);
        for _ in 0..interface_count {
            interfaces.push(self.string()?);
        }

        let field_count = self.count()?;
        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            fields.push(FieldDefinition {
                token: Token(self.u32()?),
                name: self.string()?,
                flags: FieldAttributes::from_bits_retain(self.u32()?),
                field_type: TypeSignature::decode(self.data, &mut self.offset)?,
            });
        }

        let method_count = self.count()?;
        let mut methods = Vec::with_capacity(method_count);
        for _ in 0..method_count {
            methods.push(self.method()?);
        }

        let nested_count = self.count()?;
        let mut nested_types = Vec::with_capacity(nested_count);
        for _ in 0..nested_count {
            nested_types.push(self.type_def(depth + 1)?);
        }

        let custom_attributes = self.attributes()?;

        Ok(TypeDefinition {
            token,
            namespace,
            name,
            flags,
            base_type,
            interfaces,
            fields,
            methods,
            nested_types,
            custom_attributes,
        })
    }

    fn method(&mut self) -> Result<MethodDefinition> {
        let token = Token(self.u32()?);
        let name = self.string()?;
        let flags = MethodAttributes::from_bits_retain(self.u32()?);
        let signature = MethodSignature::decode(self.data, &mut self.offset)?;

        let body = match self.u8()? {
            0 => None,
            _ => {
                let max_stack = self.u16()?;
                let len = self.u32()? as usize;
                let end = self.offset.checked_add(len).ok_or(out_of_bounds_error!())?;
                let code = self
                    .data
                    .get(self.offset..end)
                    .ok_or(out_of_bounds_error!())?
                    .to_vec();
                self.offset = end;
                Some(MethodBody { code, max_stack })
            }
        };

        let register = match self.u8()? {
            0 => None,
            _ => Some(RegisterInfo {
                jni_name: self.string()?,
                jni_signature: self.string()?,
                connector: self.optional_string()?,
            }),
        };

        let custom_attributes = self.attributes()?;

        Ok(MethodDefinition {
            token,
            name,
            flags,
            signature,
            body,
            custom_attributes,
            register,
        })
    }
}
