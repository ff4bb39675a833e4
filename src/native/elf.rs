//! ELF inspection of packaged native libraries.

use std::path::Path;

use goblin::elf::Elf;

use crate::{file::Input, Result};

/// Returns true if `data` is an ELF shared library without code.
///
/// AOT placeholder libraries are emitted for assemblies that have no compiled code; they carry
/// a `.text` section of size zero, or none at all.
///
/// # Errors
///
/// Returns [`crate::Error::GoblinErr`] if `data` is not a valid ELF image.
pub fn is_empty_aot_image(data: &[u8]) -> Result<bool> {
    let elf = Elf::parse(data)?;
    let text = elf
        .section_headers
        .iter()
        .find(|header| elf.shdr_strtab.get_at(header.sh_name) == Some(".text"));

    Ok(text.map_or(true, |header| header.sh_size == 0))
}

/// Memory-maps `path` and checks it with [`is_empty_aot_image`].
///
/// # Errors
///
/// Returns [`crate::Error::FileError`] if the file cannot be read and
/// [`crate::Error::GoblinErr`] if it is not an ELF image.
pub fn is_empty_aot_library(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();
    let input = Input::from_file(path)?;
    let empty = is_empty_aot_image(input.data())?;
    if empty {
        log::debug!("'{}' is an empty AOT placeholder", path.display());
    }
    Ok(empty)
}

/// Minimal little-endian ELF64 shared object with the given sections.
#[cfg(test)]
pub(crate) fn build_elf64(sections: &[(&str, u64)]) -> Vec<u8> {
    const EHDR: usize = 64;
    const SHDR: usize = 64;

    let mut strtab = vec![0u8];
    let mut name_offsets = Vec::new();
    for (name, _) in sections {
        name_offsets.push(strtab.len() as u32);
        strtab.extend_from_slice(name.as_bytes());
        strtab.push(0);
    }
    let shstrtab_name = strtab.len() as u32;
    strtab.extend_from_slice(b".shstrtab\0");

    let strtab_offset = EHDR;
    let shoff = (strtab_offset + strtab.len() + 7) & !7;
    let shnum = sections.len() + 2;

    let mut image = vec![0u8; shoff + shnum * SHDR];
    image[0..4].copy_from_slice(b"\x7fELF");
    image[4] = 2; // ELFCLASS64
    image[5] = 1; // little endian
    image[6] = 1;
    image[16..18].copy_from_slice(&3u16.to_le_bytes()); // ET_DYN
    image[18..20].copy_from_slice(&183u16.to_le_bytes()); // EM_AARCH64
    image[20..24].copy_from_slice(&1u32.to_le_bytes());
    image[40..48].copy_from_slice(&(shoff as u64).to_le_bytes());
    image[52..54].copy_from_slice(&(EHDR as u16).to_le_bytes());
    image[58..60].copy_from_slice(&(SHDR as u16).to_le_bytes());
    image[60..62].copy_from_slice(&(shnum as u16).to_le_bytes());
    image[62..64].copy_from_slice(&((shnum - 1) as u16).to_le_bytes());
    image[strtab_offset..strtab_offset + strtab.len()].copy_from_slice(&strtab);

    let mut write_header = |index: usize, name: u32, kind: u32, offset: u64, size: u64| {
        let base = shoff + index * SHDR;
        image[base..base + 4].copy_from_slice(&name.to_le_bytes());
        image[base + 4..base + 8].copy_from_slice(&kind.to_le_bytes());
        image[base + 24..base + 32].copy_from_slice(&offset.to_le_bytes());
        image[base + 32..base + 40].copy_from_slice(&size.to_le_bytes());
    };

    for (index, (_, size)) in sections.iter().enumerate() {
        // SHT_NOBITS keeps the declared size without file contents
        write_header(index + 1, name_offsets[index], 8, 0, *size);
    }
    write_header(
        shnum - 1,
        shstrtab_name,
        3,
        strtab_offset as u64,
        strtab.len() as u64,
    );

    image
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_placeholder() {
        let image = build_elf64(&[(".text", 0), (".data", 16)]);
        assert!(is_empty_aot_image(&image).unwrap());
    }

    #[test]
    fn code_is_not_placeholder() {
        let image = build_elf64(&[(".text", 128)]);
        assert!(!is_empty_aot_image(&image).unwrap());
    }

    #[test]
    fn missing_text_is_placeholder() {
        let image = build_elf64(&[(".rodata", 8)]);
        assert!(is_empty_aot_image(&image).unwrap());
    }

    #[test]
    fn not_elf() {
        assert!(is_empty_aot_image(b"MZ\x90\x00not an elf").is_err());
    }

    #[test]
    fn from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libaot-App.dll.so");
        std::fs::write(&path, build_elf64(&[(".text", 0)])).unwrap();
        assert!(is_empty_aot_library(&path).unwrap());
    }
}
