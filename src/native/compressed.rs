//! Descriptors of compressed assemblies.
//!
//! For every assembly packaged compressed, the loader needs a zero-initialized buffer large
//! enough for the decompressed image and a descriptor pointing at it. The descriptor's
//! `loaded` flag is set by the loader after the first decompression.

use std::path::Path;

use crate::{
    native::{
        image::{NativeImage, NativeSymbol},
        layout::{EncodedData, FieldValue, StructLayout, COMPRESSED_ASSEMBLIES, COMPRESSED_ASSEMBLY_DESCRIPTOR},
    },
    utils::to_u32,
    Result,
};

/// Section holding the decompression buffers
pub const DATA_SECTION: &str = ".bss.compressed_assembly_data";

/// Alignment of each decompression buffer
pub const DATA_ALIGNMENT: u64 = 16;

/// An assembly packaged compressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedAssemblyInfo {
    /// Assembly file name
    pub name: String,
    /// Size of the uncompressed image
    pub file_size: u32,
}

impl CompressedAssemblyInfo {
    /// Describes the uncompressed assembly at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if the file cannot be inspected and
    /// [`crate::Error::Malformed`] if it is larger than 4 GiB.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let size = std::fs::metadata(path)?.len();
        Ok(CompressedAssemblyInfo {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            file_size: to_u32(usize::try_from(size).unwrap_or(usize::MAX))?,
        })
    }
}

/// Appends the buffers, `compressed_assembly_descriptors` and `compressed_assemblies`.
///
/// Without assemblies only `compressed_assemblies` is emitted, with a zero count and a null
/// descriptor pointer.
///
/// # Errors
///
/// Returns [`crate::Error::LayoutError`] if a symbol cannot be added.
pub fn emit(image: &mut NativeImage, assemblies: &[CompressedAssemblyInfo]) -> Result<()> {
    let target = *image.target();
    let descriptor_layout =
        StructLayout::new("CompressedAssemblyDescriptor", COMPRESSED_ASSEMBLY_DESCRIPTOR, &target);
    let root_layout = StructLayout::new("CompressedAssemblies", COMPRESSED_ASSEMBLIES, &target);

    let descriptors_label = "compressed_assembly_descriptors";
    let descriptors = if assemblies.is_empty() {
        None
    } else {
        let mut data = EncodedData::default();
        for (index, assembly) in assemblies.iter().enumerate() {
            let buffer = format!(".L.compressed_assembly_data.{index}");
            image.push(NativeSymbol::zeroed(
                buffer.as_str(),
                DATA_SECTION,
                u64::from(assembly.file_size),
                DATA_ALIGNMENT,
            ))?;
            data.push(
                &descriptor_layout,
                &[
                    FieldValue::Unsigned(u64::from(assembly.file_size)),
                    FieldValue::Bool(false),
                    FieldValue::symbol(buffer),
                ],
                &format!("{} ({})", descriptors_label, assembly.name),
            )?;
        }

        let mut symbol = NativeSymbol::data(descriptors_label, data, &target);
        symbol.global = false;
        image.push(symbol)?;
        Some(descriptors_label.to_string())
    };

    let root = root_layout.encode(&[
        FieldValue::Unsigned(assemblies.len() as u64),
        FieldValue::Pointer(descriptors),
    ])?;
    image.push(NativeSymbol::data("compressed_assemblies", root, &target))
}
