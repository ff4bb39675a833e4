//! The text manifest listing the assemblies of a blob set.
//!
//! The hash indexes only hold name hashes; the manifest is what turns them back into names
//! for inspection tools. Each line after the header describes one assembly, in mapping index
//! order:
//!
//! ```text
//! Hash 32     Hash 64             Blob ID  Blob idx  Name
//! 0xa2e0939b 0x4288cfb80e74c9e3  001      0000      Mono.Android
//! ```

use std::fmt::Write as _;

use crate::Result;

/// Header line of a manifest file
pub const MANIFEST_HEADER: &str = "Hash 32     Hash 64             Blob ID  Blob idx  Name";

/// One manifest line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// xxh32 of the name
    pub hash32: u32,
    /// xxh64 of the name
    pub hash64: u64,
    /// Shard holding the assembly
    pub shard_id: u32,
    /// Index inside the shard
    pub local_index: u32,
    /// Assembly name
    pub name: String,
}

/// A parsed manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Creates a manifest from entries in mapping index order
    #[must_use]
    pub fn new(entries: Vec<ManifestEntry>) -> Self {
        Manifest { entries }
    }

    /// Parses manifest text; `source` names the file in errors.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] naming the line that cannot be parsed.
    pub fn parse(text: &str, source: &str) -> Result<Manifest> {
        let mut entries = Vec::new();

        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("Hash") {
                continue;
            }

            let invalid = || malformed_error!("{}:{}: invalid manifest line '{}'", source, number + 1, line);
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [hash32, hash64, shard_id, local_index, name @ ..] = fields.as_slice() else {
                return Err(invalid());
            };
            if name.is_empty() {
                return Err(invalid());
            }

            let hash32 = parse_hex(hash32).and_then(|v| u32::try_from(v).ok()).ok_or_else(invalid)?;
            let hash64 = parse_hex(hash64).ok_or_else(invalid)?;
            let shard_id = shard_id.parse::<u32>().map_err(|_| invalid())?;
            let local_index = local_index.parse::<u32>().map_err(|_| invalid())?;
            let name = name.join(" ");

            entries.push(ManifestEntry {
                hash32,
                hash64,
                shard_id,
                local_index,
                name,
            });
        }

        Ok(Manifest { entries })
    }

    /// Renders the manifest text
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{MANIFEST_HEADER}");
        for entry in &self.entries {
            let _ = writeln!(
                out,
                "0x{:08x} 0x{:016x}  {:03}      {:04}      {}",
                entry.hash32, entry.hash64, entry.shard_id, entry.local_index, entry.name
            );
        }
        out
    }

    /// Entries in mapping index order
    #[must_use]
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Entry at a mapping index
    #[must_use]
    pub fn get(&self, mapping_index: u32) -> Option<&ManifestEntry> {
        self.entries.get(mapping_index as usize)
    }

    /// Entry with the given 64-bit name hash
    #[must_use]
    pub fn by_hash64(&self, hash: u64) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.hash64 == hash)
    }

    /// Entry with the given name
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the manifest lists nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_hex(field: &str) -> Option<u64> {
    let digits = field.strip_prefix("0x").or_else(|| field.strip_prefix("0X"))?;
    u64::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        utils::{hash32, hash64},
        Error,
    };

    fn entry(name: &str, shard_id: u32, local_index: u32) -> ManifestEntry {
        ManifestEntry {
            hash32: hash32(name),
            hash64: hash64(name),
            shard_id,
            local_index,
            name: name.to_string(),
        }
    }

    #[test]
    fn render_and_parse() {
        let manifest = Manifest::new(vec![
            entry("Mono.Android", 1, 0),
            entry("System.Private.CoreLib", 1, 1),
            entry("App", 2, 0),
        ]);
        let text = manifest.render();
        assert!(text.starts_with(MANIFEST_HEADER));
        assert_eq!(text.lines().count(), 4);

        let parsed = Manifest::parse(&text, "assemblies.manifest").unwrap();
        assert_eq!(parsed, manifest);
        assert_eq!(parsed.by_name("App").unwrap().shard_id, 2);
        assert_eq!(parsed.by_hash64(hash64("Mono.Android")).unwrap().local_index, 0);
        assert_eq!(parsed.get(1).unwrap().name, "System.Private.CoreLib");
    }

    #[test]
    fn line_format() {
        let text = Manifest::new(vec![entry("A", 1, 2)]).render();
        let line = text.lines().nth(1).unwrap();
        assert!(line.starts_with(&format!("0x{:08x} 0x{:016x}", hash32("A"), hash64("A"))));
        assert!(line.contains(" 001 "));
        assert!(line.contains(" 0002 "));
        assert!(line.ends_with(" A"));
    }

    #[test]
    fn tolerates_blank_lines() {
        let text = format!("{MANIFEST_HEADER}\n\n0x00000001 0x0000000000000002 000 0003 Foo\n");
        let manifest = Manifest::parse(&text, "m").unwrap();
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest.entries()[0].local_index, 3);
    }

    #[test]
    fn invalid_lines() {
        for line in ["0x1 0x2 000", "zz 0x2 000 0000 Foo", "0x1 0x2 abc 0000 Foo", "0x100000000 0x2 0 0 Foo"] {
            match Manifest::parse(line, "bad.manifest") {
                Err(Error::Malformed { message, .. }) => assert!(message.starts_with("bad.manifest:1")),
                other => panic!("unexpected {other:?} for '{line}'"),
            }
        }
    }
}
