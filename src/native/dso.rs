//! The DSO name cache.
//!
//! The native loader resolves shared libraries requested by name (through `dlopen` or a
//! P/Invoke) by hashing the requested name and binary-searching a table sorted by hash. A
//! library may be requested under several names, so every library contributes one entry per
//! *name mutation*:
//!
//! - the file name as packaged (`libSkiaSharp.so`)
//! - the file name without its extension (`libSkiaSharp`; both extensions are removed from
//!   `.dll.so`)
//! - the mutations of the name without the `libaot-` prefix, which AOT images are loaded under
//!
//! Entries of one library share the pointer to its name and its `ignore` flag. Libraries that
//! are empty AOT placeholders are marked ignored so the loader treats them as present without
//! loading them.
//!
//! Sorting is stable: entries with equal hashes keep library order, then mutation order. Two
//! different names hashing to the same value cannot be told apart by the loader; they are kept
//! and reported as a warning.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use crate::{
    arch::PointerWidth,
    metadata::diagnostics::{DiagnosticCategory, Diagnostics},
    native::elf::is_empty_aot_library,
    utils::hash_for_width,
    Result,
};

/// Prefix of AOT compiled images
pub const AOT_PREFIX: &str = "libaot-";

/// A native library destined for packaging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeLibrary {
    /// Location of the library on disk
    pub path: PathBuf,
    /// Name inside the package, when it differs from the file name of `path`
    pub archive_name: Option<String>,
    /// Placeholder state; detected from the ELF image when `None`
    pub placeholder: Option<bool>,
}

impl NativeLibrary {
    /// Library at `path`, placeholder state detected on demand
    pub fn new(path: impl AsRef<Path>) -> Self {
        NativeLibrary {
            path: path.as_ref().to_path_buf(),
            archive_name: None,
            placeholder: None,
        }
    }

    /// Library with a known placeholder state; the file is never opened
    pub fn with_placeholder(path: impl AsRef<Path>, placeholder: bool) -> Self {
        NativeLibrary {
            path: path.as_ref().to_path_buf(),
            archive_name: None,
            placeholder: Some(placeholder),
        }
    }

    /// File name the library is packaged under
    #[must_use]
    pub fn file_name(&self) -> String {
        let name = self.archive_name.as_deref().map_or(self.path.as_path(), Path::new);
        name.file_name()
            .map_or_else(|| name.to_string_lossy(), |n| n.to_string_lossy())
            .into_owned()
    }

    /// Whether the library is an empty AOT placeholder.
    ///
    /// # Errors
    ///
    /// Returns the error of [`is_empty_aot_library`] when the state must be detected.
    pub fn is_placeholder(&self) -> Result<bool> {
        match self.placeholder {
            Some(flag) => Ok(flag),
            None => is_empty_aot_library(&self.path),
        }
    }
}

/// A library name as stored in the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsoName {
    /// Packaged file name
    pub name: String,
    /// Local label of the name string
    pub label: String,
    /// Skip loading this library
    pub ignore: bool,
}

/// One row of the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsoCacheEntry {
    /// Hash of `mutation`
    pub hash: u64,
    /// Copied from the library
    pub ignore: bool,
    /// The hashed name
    pub mutation: String,
    /// Index into [`DsoCache::names`]
    pub name_index: usize,
}

/// The sorted cache and the names its entries refer to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DsoCache {
    /// Unique library names in input order
    pub names: Vec<DsoName>,
    /// Entries sorted ascending by hash
    pub entries: Vec<DsoCacheEntry>,
}

impl DsoCache {
    /// Builds the cache for the given libraries.
    ///
    /// Libraries whose file names differ only in case are packaged once; later ones are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns the placeholder detection error of a library whose state is not known.
    pub fn build(
        libraries: &[NativeLibrary],
        width: PointerWidth,
        diagnostics: &Diagnostics,
    ) -> Result<DsoCache> {
        let mut seen = HashSet::new();
        let mut names = Vec::new();

        for library in libraries {
            let name = library.file_name();
            if !seen.insert(name.to_lowercase()) {
                log::debug!("skipping duplicate native library '{}'", name);
                continue;
            }
            names.push(DsoName {
                label: format!(".L.dsoName{}", names.len()),
                ignore: library.is_placeholder()?,
                name,
            });
        }

        let mut entries = Vec::new();
        for (name_index, dso) in names.iter().enumerate() {
            for mutation in name_mutations(&dso.name) {
                entries.push(DsoCacheEntry {
                    hash: hash_for_width(&mutation, width),
                    ignore: dso.ignore,
                    mutation,
                    name_index,
                });
            }
        }
        entries.sort_by_key(|e| e.hash);
        report_collisions(&entries, diagnostics);

        log::debug!(
            "DSO cache: {} libraries, {} entries",
            names.len(),
            entries.len()
        );
        Ok(DsoCache { names, entries })
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Binary search as performed by the loader
    #[must_use]
    pub fn find(&self, hash: u64) -> Option<&DsoCacheEntry> {
        self.entries
            .binary_search_by_key(&hash, |e| e.hash)
            .ok()
            .map(|index| &self.entries[index])
    }
}

/// Warns about distinct names sharing a hash in the sorted `entries`.
fn report_collisions(entries: &[DsoCacheEntry], diagnostics: &Diagnostics) {
    for pair in entries.windows(2) {
        if pair[0].hash == pair[1].hash && pair[0].mutation != pair[1].mutation {
            warn_diag!(
                diagnostics,
                DiagnosticCategory::Native,
                "DSO names '{}' and '{}' have the same hash 0x{:x}",
                pair[0].mutation,
                pair[1].mutation,
                pair[0].hash
            );
        }
    }
}

/// Every name the library `name` can be requested under, in emission order.
#[must_use]
pub fn name_mutations(name: &str) -> Vec<String> {
    let mut mutations = Vec::new();
    add_mutations(name, &mut mutations);
    mutations
}

fn add_mutations(name: &str, mutations: &mut Vec<String>) {
    mutations.push(name.to_string());
    mutations.push(strip_extension(name).to_string());

    if starts_with_ignore_case(name, AOT_PREFIX) {
        add_mutations(&name[AOT_PREFIX.len()..], mutations);
    }
}

fn strip_extension(name: &str) -> &str {
    let once = without_extension(name);
    if ends_with_ignore_case(name, ".dll.so") {
        without_extension(once)
    } else {
        once
    }
}

fn without_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(0) | None => name,
        Some(dot) => &name[..dot],
    }
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

fn ends_with_ignore_case(value: &str, suffix: &str) -> bool {
    value.len() >= suffix.len()
        && value
            .get(value.len() - suffix.len()..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(suffix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{hash32, hash64};

    // Helper function to create libraries with a known placeholder state
    fn create_libraries(names: &[(&str, bool)]) -> Vec<NativeLibrary> {
        names
            .iter()
            .map(|(name, placeholder)| NativeLibrary::with_placeholder(format!("/lib/{name}"), *placeholder))
            .collect()
    }

    #[test]
    fn mutations() {
        assert_eq!(name_mutations("libSkiaSharp.so"), vec!["libSkiaSharp.so", "libSkiaSharp"]);
        assert_eq!(
            name_mutations("libaot-Mono.Android.dll.so"),
            vec![
                "libaot-Mono.Android.dll.so",
                "libaot-Mono.Android",
                "Mono.Android.dll.so",
                "Mono.Android",
            ]
        );
        assert_eq!(
            name_mutations("LIBAOT-App.DLL.SO"),
            vec!["LIBAOT-App.DLL.SO", "LIBAOT-App", "App.DLL.SO", "App"]
        );
        assert_eq!(name_mutations("noext"), vec!["noext", "noext"]);
    }

    #[test]
    fn sorted_and_hashed_per_width() {
        let libraries = create_libraries(&[
            ("libSystem.Native.so", false),
            ("libaot-App.dll.so", true),
            ("libmonosgen-2.0.so", false),
        ]);
        let diagnostics = Diagnostics::new();

        let cache64 = DsoCache::build(&libraries, PointerWidth::Bits64, &diagnostics).unwrap();
        assert_eq!(cache64.len(), 2 + 4 + 2);
        assert!(cache64.entries.windows(2).all(|w| w[0].hash <= w[1].hash));
        for entry in &cache64.entries {
            assert_eq!(entry.hash, hash64(&entry.mutation));
        }

        let cache32 = DsoCache::build(&libraries, PointerWidth::Bits32, &diagnostics).unwrap();
        for entry in &cache32.entries {
            assert_eq!(entry.hash, u64::from(hash32(&entry.mutation)));
        }
        assert!(!diagnostics.has_warnings());
    }

    #[test]
    fn placeholder_flag_propagates() {
        let libraries = create_libraries(&[("libaot-App.dll.so", true), ("libfoo.so", false)]);
        let cache = DsoCache::build(&libraries, PointerWidth::Bits64, &Diagnostics::new()).unwrap();

        for entry in &cache.entries {
            assert_eq!(entry.ignore, entry.name_index == 0);
            assert_eq!(cache.names[entry.name_index].ignore, entry.ignore);
        }
        assert_eq!(cache.names[1].label, ".L.dsoName1");
    }

    #[test]
    fn duplicate_names_ignore_case() {
        let libraries = create_libraries(&[("libFoo.so", false), ("libfoo.so", false)]);
        let cache = DsoCache::build(&libraries, PointerWidth::Bits64, &Diagnostics::new()).unwrap();
        assert_eq!(cache.names.len(), 1);
        assert_eq!(cache.names[0].name, "libFoo.so");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn lookup_every_mutation() {
        let libraries = create_libraries(&[("libaot-App.dll.so", false), ("libbar.so", false)]);
        let cache = DsoCache::build(&libraries, PointerWidth::Bits64, &Diagnostics::new()).unwrap();

        for name in ["App", "App.dll.so", "libaot-App", "libbar"] {
            let entry = cache.find(hash64(name)).unwrap();
            assert_eq!(entry.mutation, name);
        }
        assert!(cache.find(hash64("libmissing.so")).is_none());
    }

    #[test]
    fn equal_hashes_keep_insertion_order() {
        // "noext" yields the same mutation twice; identical names are not a collision
        let libraries = create_libraries(&[("noext", false)]);
        let diagnostics = Diagnostics::new();
        let cache = DsoCache::build(&libraries, PointerWidth::Bits32, &diagnostics).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.entries[0].hash, cache.entries[1].hash);
        assert!(!diagnostics.has_warnings());
    }

    #[test]
    fn collisions_are_reported() {
        let entry = |mutation: &str, name_index| DsoCacheEntry {
            hash: 0x1234,
            ignore: false,
            mutation: mutation.to_string(),
            name_index,
        };
        let diagnostics = Diagnostics::new();
        report_collisions(&[entry("liba.so", 0), entry("libb.so", 1)], &diagnostics);

        let warnings = diagnostics.by_category(DiagnosticCategory::Native);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("'liba.so' and 'libb.so'"));
    }

    #[test]
    fn archive_name_wins() {
        let mut library = NativeLibrary::with_placeholder("/obj/arm64/libfoo-stripped.so", false);
        library.archive_name = Some("lib/arm64-v8a/libfoo.so".to_string());
        assert_eq!(library.file_name(), "libfoo.so");
    }

    #[test]
    fn placeholder_detected_from_elf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("libaot-Empty.dll.so");
        std::fs::write(&path, crate::native::elf::build_elf64(&[(".text", 0)])).unwrap();

        let cache = DsoCache::build(&[NativeLibrary::new(&path)], PointerWidth::Bits64, &Diagnostics::new())
            .unwrap();
        assert!(cache.names[0].ignore);
    }
}
