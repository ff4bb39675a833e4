//! C-compatible structure layouts of the native runtime records.
//!
//! Every structure the loader reads is described here as an ordered field table. The order of
//! the entries is the binary contract with the native side; names only feed the comments of
//! the generated listing. Offsets follow the natural alignment rules of the target (each field
//! aligned to its own alignment, the structure size rounded up to the largest field
//! alignment), which is what a C compiler produces for the same declaration.

use crate::{native::target::NativeTarget, utils::align_to, Error, Result};

/// Scalar type of a structure field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// C `bool`, one byte
    Bool,
    /// `uint8_t`
    U8,
    /// `int32_t`
    I32,
    /// `uint32_t`
    U32,
    /// `uint64_t`
    U64,
    /// Data pointer
    Pointer,
}

impl FieldKind {
    /// Size of the field in bytes
    #[must_use]
    pub fn size(self, target: &NativeTarget) -> u64 {
        match self {
            FieldKind::Bool | FieldKind::U8 => 1,
            FieldKind::I32 | FieldKind::U32 => 4,
            FieldKind::U64 => 8,
            FieldKind::Pointer => target.pointer_size(),
        }
    }

    /// Alignment of the field inside a structure
    #[must_use]
    pub fn alignment(self, target: &NativeTarget) -> u64 {
        match self {
            FieldKind::U64 => target.u64_alignment(),
            other => other.size(target),
        }
    }
}

/// Value stored in one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Value of a `Bool` field
    Bool(bool),
    /// Value of an unsigned integer field
    Unsigned(u64),
    /// Value of a signed integer field
    Signed(i64),
    /// Address of a symbol, or null
    Pointer(Option<String>),
}

impl FieldValue {
    /// Pointer to the given symbol
    pub fn symbol(name: impl Into<String>) -> FieldValue {
        FieldValue::Pointer(Some(name.into()))
    }

    /// Null pointer
    #[must_use]
    pub fn null() -> FieldValue {
        FieldValue::Pointer(None)
    }
}

/// Position of one field inside its structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout {
    /// Field name
    pub name: &'static str,
    /// Field type
    pub kind: FieldKind,
    /// Offset from the start of the structure
    pub offset: u64,
    /// Size in bytes
    pub size: u64,
}

/// A pointer field referring to a symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    /// Offset of the pointer inside the symbol data
    pub offset: u64,
    /// Referenced symbol
    pub target: String,
}

/// An initialized field inside symbol data, used to render the listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataField {
    /// Offset inside the symbol data
    pub offset: u64,
    /// Size in bytes
    pub size: u64,
    /// Comment naming the field
    pub comment: String,
}

/// One or more structure instances laid out back to back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedData {
    /// Little-endian bytes, pointers zero
    pub bytes: Vec<u8>,
    /// Pointer fields that refer to symbols
    pub relocations: Vec<Relocation>,
    /// Every field, in offset order
    pub fields: Vec<DataField>,
    /// Largest field alignment
    pub alignment: u64,
}

impl EncodedData {
    /// Size in bytes
    #[must_use]
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Returns true if nothing was encoded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Appends a structure instance, aligned to the layout alignment.
    ///
    /// `label` prefixes the field comments, e.g. `dso_cache[3]`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::LayoutError`] if the values do not match the layout.
    pub fn push(&mut self, layout: &StructLayout, values: &[FieldValue], label: &str) -> Result<()> {
        let base = align_to(self.len(), layout.alignment);
        self.bytes.resize(base as usize, 0);
        layout.encode_into(self, base, values, label)?;
        self.alignment = self.alignment.max(layout.alignment);
        Ok(())
    }

    /// Appends a bare pointer, aligned to the pointer size.
    pub fn push_pointer(&mut self, target: &NativeTarget, value: Option<&str>, comment: &str) {
        let size = target.pointer_size();
        let offset = align_to(self.len(), size);
        self.bytes.resize((offset + size) as usize, 0);
        if let Some(symbol) = value {
            self.relocations.push(Relocation {
                offset,
                target: symbol.to_string(),
            });
        }
        self.fields.push(DataField {
            offset,
            size,
            comment: comment.to_string(),
        });
        self.alignment = self.alignment.max(size);
    }

    /// Relocation at `offset`, if the pointer there refers to a symbol
    #[must_use]
    pub fn relocation_at(&self, offset: u64) -> Option<&Relocation> {
        self.relocations.iter().find(|r| r.offset == offset)
    }

    /// Reads the little-endian unsigned value at `offset`.
    #[must_use]
    pub fn value_at(&self, offset: u64, size: u64) -> Option<u64> {
        let start = usize::try_from(offset).ok()?;
        let bytes = self.bytes.get(start..start + usize::try_from(size).ok()?)?;
        Some(
            bytes
                .iter()
                .rev()
                .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte)),
        )
    }
}

/// Layout of one native structure for a specific target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout {
    /// Structure name on the native side
    pub name: &'static str,
    /// Fields in declaration order
    pub fields: Vec<FieldLayout>,
    /// Size including tail padding
    pub size: u64,
    /// Alignment of the structure
    pub alignment: u64,
}

impl StructLayout {
    /// Lays out `fields` in order for `target`.
    #[must_use]
    pub fn new(name: &'static str, fields: &[(&'static str, FieldKind)], target: &NativeTarget) -> Self {
        let mut offset = 0;
        let mut alignment = 1;
        let mut layouts = Vec::with_capacity(fields.len());

        for &(field, kind) in fields {
            let field_alignment = kind.alignment(target);
            let size = kind.size(target);
            offset = align_to(offset, field_alignment);
            layouts.push(FieldLayout {
                name: field,
                kind,
                offset,
                size,
            });
            offset += size;
            alignment = alignment.max(field_alignment);
        }

        StructLayout {
            name,
            fields: layouts,
            size: align_to(offset, alignment),
            alignment,
        }
    }

    /// Field with the given name
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Encodes a single instance.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::LayoutError`] if the values do not match the layout.
    pub fn encode(&self, values: &[FieldValue]) -> Result<EncodedData> {
        let mut data = EncodedData::default();
        data.push(self, values, self.name)?;
        Ok(data)
    }

    fn encode_into(
        &self,
        data: &mut EncodedData,
        base: u64,
        values: &[FieldValue],
        label: &str,
    ) -> Result<()> {
        if values.len() != self.fields.len() {
            return Err(Error::LayoutError(format!(
                "{} has {} fields, {} values given",
                self.name,
                self.fields.len(),
                values.len()
            )));
        }

        data.bytes.resize((base + self.size) as usize, 0);

        for (field, value) in self.fields.iter().zip(values) {
            let offset = base + field.offset;
            let mismatch = || {
                Error::LayoutError(format!(
                    "{}.{} ({:?}) cannot hold {:?}",
                    self.name, field.name, field.kind, value
                ))
            };

            let raw = match (field.kind, value) {
                (FieldKind::Bool, FieldValue::Bool(flag)) => u64::from(*flag),
                (FieldKind::U8 | FieldKind::U32 | FieldKind::U64, FieldValue::Unsigned(v)) => {
                    if field.size < 8 && *v >> (field.size * 8) != 0 {
                        return Err(mismatch());
                    }
                    *v
                }
                (FieldKind::I32, FieldValue::Signed(v)) => {
                    let narrow = i32::try_from(*v).map_err(|_| mismatch())?;
                    u64::from(narrow as u32)
                }
                (FieldKind::Pointer, FieldValue::Pointer(target)) => {
                    if let Some(symbol) = target {
                        data.relocations.push(Relocation {
                            offset,
                            target: symbol.clone(),
                        });
                    }
                    0
                }
                _ => return Err(mismatch()),
            };

            let start = offset as usize;
            let end = start + field.size as usize;
            data.bytes[start..end].copy_from_slice(&raw.to_le_bytes()[..field.size as usize]);
            data.fields.push(DataField {
                offset,
                size: field.size,
                comment: format!("{}.{}", label, field.name),
            });
        }

        Ok(())
    }
}

use FieldKind::{Bool, Pointer, I32, U32, U64, U8};

/// `DSOCacheEntry`
pub const DSO_CACHE_ENTRY: &[(&str, FieldKind)] = &[
    ("hash", U64),
    ("ignore", Bool),
    ("name", Pointer),
    ("handle", Pointer),
];

/// `XamarinAndroidBundledAssembly`
pub const BUNDLED_ASSEMBLY: &[(&str, FieldKind)] = &[
    ("apk_fd", I32),
    ("data_offset", U32),
    ("data_size", U32),
    ("data", Pointer),
    ("name_length", U32),
    ("name", Pointer),
];

/// `AssemblyStoreSingleAssemblyRuntimeData`
pub const ASSEMBLY_STORE_ASSEMBLY: &[(&str, FieldKind)] = &[
    ("image_data", Pointer),
    ("debug_info_data", Pointer),
    ("config_data", Pointer),
    ("descriptor", Pointer),
];

/// `AssemblyStoreRuntimeData`
pub const ASSEMBLY_STORE: &[(&str, FieldKind)] = &[
    ("data_start", Pointer),
    ("assembly_count", U32),
    ("assemblies", Pointer),
];

/// `CompressedAssemblyDescriptor`
pub const COMPRESSED_ASSEMBLY_DESCRIPTOR: &[(&str, FieldKind)] = &[
    ("uncompressed_file_size", U32),
    ("loaded", Bool),
    ("data", Pointer),
];

/// `CompressedAssemblies`
pub const COMPRESSED_ASSEMBLIES: &[(&str, FieldKind)] = &[("count", U32), ("descriptors", Pointer)];

/// `ApplicationConfig`
pub const APPLICATION_CONFIG: &[(&str, FieldKind)] = &[
    ("uses_mono_llvm", Bool),
    ("uses_mono_aot", Bool),
    ("uses_assembly_preload", Bool),
    ("is_a_bundled_app", Bool),
    ("broken_exception_transitions", Bool),
    ("instant_run_enabled", Bool),
    ("jni_add_native_method_registration_attribute_present", Bool),
    ("have_runtime_config_blob", Bool),
    ("have_assembly_store", Bool),
    ("bound_exception_type", U8),
    ("package_naming_policy", U32),
    ("environment_variable_count", U32),
    ("system_property_count", U32),
    ("number_of_assemblies_in_apk", U32),
    ("bundled_assembly_name_width", U32),
    ("number_of_assembly_store_files", U32),
    ("number_of_dso_cache_entries", U32),
    ("mono_components_mask", U32),
    ("android_package_name", Pointer),
    ("environment_variables", Pointer),
    ("system_properties", Pointer),
    ("bundled_assemblies", Pointer),
    ("assembly_store_assemblies", Pointer),
    ("assembly_stores", Pointer),
    ("dso_cache", Pointer),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::TargetArch;

    fn target(arch: TargetArch) -> NativeTarget {
        NativeTarget::for_arch(arch).unwrap()
    }

    fn offsets(layout: &StructLayout) -> Vec<u64> {
        layout.fields.iter().map(|f| f.offset).collect()
    }

    #[test]
    fn dso_cache_entry_layout() {
        let arm64 = StructLayout::new("DSOCacheEntry", DSO_CACHE_ENTRY, &target(TargetArch::Arm64));
        assert_eq!(offsets(&arm64), vec![0, 8, 16, 24]);
        assert_eq!(arm64.size, 32);

        let arm = StructLayout::new("DSOCacheEntry", DSO_CACHE_ENTRY, &target(TargetArch::Arm));
        assert_eq!(offsets(&arm), vec![0, 8, 12, 16]);
        assert_eq!(arm.size, 24);
        assert_eq!(arm.alignment, 8);

        let x86 = StructLayout::new("DSOCacheEntry", DSO_CACHE_ENTRY, &target(TargetArch::X86));
        assert_eq!(offsets(&x86), vec![0, 8, 12, 16]);
        assert_eq!(x86.size, 20);
    }

    #[test]
    fn bundled_assembly_layout() {
        let arm64 = StructLayout::new("BundledAssembly", BUNDLED_ASSEMBLY, &target(TargetArch::Arm64));
        assert_eq!(offsets(&arm64), vec![0, 4, 8, 16, 24, 32]);
        assert_eq!(arm64.size, 40);

        let x86 = StructLayout::new("BundledAssembly", BUNDLED_ASSEMBLY, &target(TargetArch::X86));
        assert_eq!(offsets(&x86), vec![0, 4, 8, 12, 16, 20]);
        assert_eq!(x86.size, 24);
    }

    #[test]
    fn application_config_layout() {
        let arm64 = StructLayout::new("ApplicationConfig", APPLICATION_CONFIG, &target(TargetArch::Arm64));
        assert_eq!(arm64.field("bound_exception_type").unwrap().offset, 9);
        assert_eq!(arm64.field("package_naming_policy").unwrap().offset, 12);
        assert_eq!(arm64.field("mono_components_mask").unwrap().offset, 40);
        assert_eq!(arm64.field("android_package_name").unwrap().offset, 48);
        assert_eq!(arm64.field("dso_cache").unwrap().offset, 96);
        assert_eq!(arm64.size, 104);

        let arm = StructLayout::new("ApplicationConfig", APPLICATION_CONFIG, &target(TargetArch::Arm));
        assert_eq!(arm.field("android_package_name").unwrap().offset, 44);
        assert_eq!(arm.size, 72);
    }

    #[test]
    fn encode_values() {
        let t = target(TargetArch::Arm64);
        let layout = StructLayout::new("DSOCacheEntry", DSO_CACHE_ENTRY, &t);
        let data = layout
            .encode(&[
                FieldValue::Unsigned(0x1122_3344_5566_7788),
                FieldValue::Bool(true),
                FieldValue::symbol(".L.dsoName0"),
                FieldValue::null(),
            ])
            .unwrap();

        assert_eq!(data.len(), 32);
        assert_eq!(data.value_at(0, 8), Some(0x1122_3344_5566_7788));
        assert_eq!(data.value_at(8, 1), Some(1));
        assert_eq!(data.relocations.len(), 1);
        assert_eq!(data.relocation_at(16).unwrap().target, ".L.dsoName0");
        assert!(data.relocation_at(24).is_none());
        assert_eq!(data.fields[1].comment, "DSOCacheEntry.ignore");
    }

    #[test]
    fn encode_negative_i32() {
        let t = target(TargetArch::X86);
        let layout = StructLayout::new("BundledAssembly", BUNDLED_ASSEMBLY, &t);
        let data = layout
            .encode(&[
                FieldValue::Signed(-1),
                FieldValue::Unsigned(0),
                FieldValue::Unsigned(0),
                FieldValue::null(),
                FieldValue::Unsigned(0),
                FieldValue::symbol(".L.env.buf.1"),
            ])
            .unwrap();
        assert_eq!(&data.bytes[0..4], &[0xFF; 4]);
    }

    #[test]
    fn encode_rejects_mismatches() {
        let t = target(TargetArch::Arm64);
        let layout = StructLayout::new("CompressedAssemblies", COMPRESSED_ASSEMBLIES, &t);

        assert!(matches!(
            layout.encode(&[FieldValue::Unsigned(1)]),
            Err(Error::LayoutError(_))
        ));
        assert!(matches!(
            layout.encode(&[FieldValue::Bool(true), FieldValue::null()]),
            Err(Error::LayoutError(_))
        ));
        assert!(matches!(
            layout.encode(&[FieldValue::Unsigned(1 << 32), FieldValue::null()]),
            Err(Error::LayoutError(_))
        ));
    }

    #[test]
    fn arrays_are_contiguous() {
        let t = target(TargetArch::Arm);
        let layout = StructLayout::new("AssemblyStoreRuntimeData", ASSEMBLY_STORE, &t);
        let mut data = EncodedData::default();
        for i in 0..3 {
            data.push(
                &layout,
                &[FieldValue::null(), FieldValue::Unsigned(0), FieldValue::null()],
                &format!("assembly_stores[{i}]"),
            )
            .unwrap();
        }
        assert_eq!(data.len(), 3 * layout.size);
        assert_eq!(data.fields.len(), 9);
        assert_eq!(data.fields[3].offset, layout.size);
        assert_eq!(data.fields[3].comment, "assembly_stores[1].data_start");
    }
}
