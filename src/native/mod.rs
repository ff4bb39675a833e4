//! Native metadata read by the runtime loader.
//!
//! The loader does not parse anything at startup; it links against data symbols whose layout
//! it knows at compile time. This module produces those symbols for one target architecture
//! as a [`NativeImage`] that renders to a GNU assembler source:
//!
//! - the DSO name cache ([`DsoCache`]), sorted by name hash for binary search
//! - descriptors of individually bundled assemblies, or of blob stores and their assemblies
//! - environment variables and system properties as (name, value) pointer pairs
//! - descriptors of compressed assemblies
//! - the `application_config` record tying everything together
//!
//! Field order and width of every structure are defined in [`layout`]; they must match the
//! loader's declarations exactly.
//!
//! # Example
//!
//! ```rust,no_run
//! use peerweave::native::{NativeLibrary, NativeMetadataGenerator};
//! use peerweave::prelude::*;
//!
//! let mut options = AppConfigOptions::default();
//! options.package_name = "com.example.app".to_string();
//! options.number_of_assemblies = 12;
//! options.bundled_assembly_name_width = 64;
//!
//! let libraries = vec![NativeLibrary::new("obj/lib/arm64-v8a/libSystem.Native.so")];
//! let diagnostics = Diagnostics::new();
//!
//! for arch in [TargetArch::Arm64, TargetArch::X86_64] {
//!     let metadata = NativeMetadataGenerator::new(arch)?
//!         .generate(&options, &libraries, &[], &diagnostics)?;
//!     metadata.write_to(format!("obj/environment.{arch}.s"))?;
//! }
//! # Ok::<(), peerweave::Error>(())
//! ```

mod appconfig;
mod compressed;
mod dso;
mod elf;
mod image;
pub mod layout;
mod target;

pub use appconfig::{NativeMetadata, NativeMetadataGenerator, NAME_BUFFER_SECTION};
pub use compressed::CompressedAssemblyInfo;
pub use dso::{name_mutations, DsoCache, DsoCacheEntry, DsoName, NativeLibrary, AOT_PREFIX};
pub use elf::{is_empty_aot_image, is_empty_aot_library};
pub use image::{NativeImage, NativeSymbol, SectionKind, SymbolContent};
pub use target::NativeTarget;
