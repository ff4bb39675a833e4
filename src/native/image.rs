//! Ordered native data symbols and their GNU assembler rendering.

use std::fmt::Write as _;

use crate::{
    native::{
        layout::{EncodedData, Relocation},
        target::NativeTarget,
    },
    Error, Result,
};

/// Kind of section a symbol is placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    /// Initialized writable data
    Data,
    /// Merged read-only NUL-terminated strings
    Strings,
    /// Zero-initialized writable data
    Bss,
}

/// Contents of a symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolContent {
    /// Initialized data with pointer relocations
    Data(EncodedData),
    /// A NUL-terminated string
    String(String),
    /// `n` zero bytes
    Zero(u64),
}

/// A named object in the generated image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeSymbol {
    /// Symbol name; local symbols start with `.L`
    pub name: String,
    /// Section name
    pub section: String,
    /// Section kind
    pub kind: SectionKind,
    /// Alignment in bytes
    pub alignment: u64,
    /// Exported to the loader
    pub global: bool,
    /// Symbol data
    pub content: SymbolContent,
}

impl NativeSymbol {
    /// Global data symbol in `.data.<name>`.
    pub fn data(name: impl Into<String>, data: EncodedData, target: &NativeTarget) -> NativeSymbol {
        let name = name.into();
        NativeSymbol {
            section: format!(".data.{name}"),
            kind: SectionKind::Data,
            alignment: data.alignment.max(target.pointer_size()),
            global: true,
            content: SymbolContent::Data(data),
            name,
        }
    }

    /// Local string constant.
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> NativeSymbol {
        NativeSymbol {
            name: name.into(),
            section: ".rodata.str1.1".to_string(),
            kind: SectionKind::Strings,
            alignment: 1,
            global: false,
            content: SymbolContent::String(value.into()),
        }
    }

    /// Local zero-filled buffer in the given `.bss` section.
    pub fn zeroed(
        name: impl Into<String>,
        section: impl Into<String>,
        size: u64,
        alignment: u64,
    ) -> NativeSymbol {
        NativeSymbol {
            name: name.into(),
            section: section.into(),
            kind: SectionKind::Bss,
            alignment,
            global: false,
            content: SymbolContent::Zero(size),
        }
    }

    /// Size of the symbol in bytes
    #[must_use]
    pub fn size(&self) -> u64 {
        match &self.content {
            SymbolContent::Data(data) => data.len(),
            SymbolContent::String(value) => value.len() as u64 + 1,
            SymbolContent::Zero(size) => *size,
        }
    }

    /// Raw bytes of the symbol, pointers zeroed
    #[must_use]
    pub fn bytes(&self) -> Vec<u8> {
        match &self.content {
            SymbolContent::Data(data) => data.bytes.clone(),
            SymbolContent::String(value) => {
                let mut bytes = value.as_bytes().to_vec();
                bytes.push(0);
                bytes
            }
            SymbolContent::Zero(size) => vec![0; *size as usize],
        }
    }

    /// Pointer relocations of the symbol
    #[must_use]
    pub fn relocations(&self) -> &[Relocation] {
        match &self.content {
            SymbolContent::Data(data) => &data.relocations,
            _ => &[],
        }
    }
}

/// An ordered set of native data symbols for one target.
#[derive(Debug, Clone)]
pub struct NativeImage {
    target: NativeTarget,
    symbols: Vec<NativeSymbol>,
}

impl NativeImage {
    /// Creates an empty image
    #[must_use]
    pub fn new(target: NativeTarget) -> Self {
        NativeImage {
            target,
            symbols: Vec::new(),
        }
    }

    /// Target the image is generated for
    #[must_use]
    pub fn target(&self) -> &NativeTarget {
        &self.target
    }

    /// Appends a symbol.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::LayoutError`] if a symbol with the same name exists.
    pub fn push(&mut self, symbol: NativeSymbol) -> Result<()> {
        if self.symbol(&symbol.name).is_some() {
            return Err(Error::LayoutError(format!(
                "symbol '{}' defined twice",
                symbol.name
            )));
        }
        self.symbols.push(symbol);
        Ok(())
    }

    /// Symbols in emission order
    #[must_use]
    pub fn symbols(&self) -> &[NativeSymbol] {
        &self.symbols
    }

    /// Symbol with the given name
    #[must_use]
    pub fn symbol(&self, name: &str) -> Option<&NativeSymbol> {
        self.symbols.iter().find(|s| s.name == name)
    }

    /// Names of the exported symbols, in emission order
    #[must_use]
    pub fn global_symbols(&self) -> Vec<&str> {
        self.symbols
            .iter()
            .filter(|s| s.global)
            .map(|s| s.name.as_str())
            .collect()
    }

    /// Renders the image as a GNU assembler listing.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::LayoutError`] if a data field has no matching directive or
    /// a relocation does not refer to a defined symbol.
    pub fn render(&self) -> Result<String> {
        let c = self.target.comment;
        let mut out = String::new();

        let _ = writeln!(out, "{c} target: {}", self.target.triple);
        let _ = writeln!(out, "{c} data layout: {}", self.target.data_layout);
        let _ = writeln!(out, "\t.file\t\"environment.s\"");

        for symbol in &self.symbols {
            for relocation in symbol.relocations() {
                if self.symbol(&relocation.target).is_none() {
                    return Err(Error::LayoutError(format!(
                        "'{}' refers to undefined symbol '{}'",
                        symbol.name, relocation.target
                    )));
                }
            }
            self.render_symbol(&mut out, symbol)?;
        }

        Ok(out)
    }

    fn render_symbol(&self, out: &mut String, symbol: &NativeSymbol) -> Result<()> {
        let c = self.target.comment;
        let p = self.target.type_prefix;

        let _ = writeln!(out);
        let flags = match symbol.kind {
            SectionKind::Data => format!("\"aw\",{p}progbits"),
            SectionKind::Strings => format!("\"aMS\",{p}progbits,1"),
            SectionKind::Bss => format!("\"aw\",{p}nobits"),
        };
        let _ = writeln!(out, "\t.section\t{},{}", symbol.section, flags);
        let _ = writeln!(out, "\t.type\t{}, {p}object", symbol.name);
        if symbol.global {
            let _ = writeln!(out, "\t.globl\t{}", symbol.name);
        }
        if symbol.alignment > 1 {
            let _ = writeln!(out, "\t.p2align\t{}", symbol.alignment.trailing_zeros());
        }
        let _ = writeln!(out, "{}:", symbol.name);

        match &symbol.content {
            SymbolContent::String(value) => {
                let _ = writeln!(out, "\t.asciz\t\"{}\"", escape(value));
            }
            SymbolContent::Zero(size) => {
                let _ = writeln!(out, "\t.zero\t{size}");
            }
            SymbolContent::Data(data) => {
                let mut position = 0;
                for field in &data.fields {
                    if field.offset > position {
                        let _ = writeln!(out, "\t.zero\t{}", field.offset - position);
                    }
                    match data.relocation_at(field.offset) {
                        Some(relocation) => {
                            let _ = writeln!(
                                out,
                                "\t{}\t{}\t{c} {}",
                                self.target.pointer_directive(),
                                relocation.target,
                                field.comment
                            );
                        }
                        None => {
                            let value = data.value_at(field.offset, field.size).ok_or_else(|| {
                                Error::LayoutError(format!(
                                    "field '{}' lies outside '{}'",
                                    field.comment, symbol.name
                                ))
                            })?;
                            let _ = writeln!(
                                out,
                                "\t{}\t{}\t{c} {}",
                                self.target.data_directive(field.size)?,
                                value,
                                field.comment
                            );
                        }
                    }
                    position = field.offset + field.size;
                }
                if data.len() > position {
                    let _ = writeln!(out, "\t.zero\t{}", data.len() - position);
                }
            }
        }

        let _ = writeln!(out, "\t.size\t{}, {}", symbol.name, symbol.size());
        Ok(())
    }
}

/// Escapes a string for `.asciz`.
fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'"' => escaped.push_str("\\\""),
            b'\\' => escaped.push_str("\\\\"),
            0x20..=0x7E => escaped.push(byte as char),
            _ => {
                let _ = write!(escaped, "\\{byte:03o}");
            }
        }
    }
    escaped
}
