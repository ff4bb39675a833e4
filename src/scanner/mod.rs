//! Discovery and classification of peer types.
//!
//! The scanner visits every type of every module, nested types included, and decides how it
//! takes part in the peer object model:
//!
//! 1. deriving from the throwable root makes it a [`PeerClassification::PeerException`]
//! 2. deriving from the object root, or being an interface that extends the peer marker,
//!    makes it a [`PeerClassification::PeerCandidate`]
//! 3. a class that implements the object marker, is not a managed exception and matched
//!    neither rule is [`PeerClassification::Invalid`]; this aborts the build
//! 4. anything else is ignored
//!
//! Modules compiled once per architecture contribute the same logical type several times.
//! Those contributions are merged by a [`ScanAccumulator`] into one [`ManagedType`] with a
//! slot per architecture.
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use peerweave::{config::PeerRoots, metadata::module::ModuleDefinition, scanner::TypeScanner};
//!
//! let modules = vec![
//!     ModuleDefinition::from_file("obj/Mono.Android.pwmd")?,
//!     ModuleDefinition::from_file("obj/App.pwmd")?,
//! ];
//!
//! let scanner = TypeScanner::new(PeerRoots::default());
//! for ty in scanner.scan(&modules)? {
//!     println!("{} ({})", ty.key, ty.classification);
//! }
//! # Ok::<(), peerweave::Error>(())
//! ```

mod accumulator;
mod managed;

pub use accumulator::ScanAccumulator;
pub use managed::{ManagedType, PeerClassification, TypeSlot};

use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use rayon::prelude::*;

use crate::{
    arch::TargetArch,
    config::PeerRoots,
    metadata::{
        diagnostics::Diagnostics, index::TypeDefinitionIndex, module::ModuleDefinition,
        typedef::TypeDefinition,
    },
    Result,
};

/// A module file to load, with the ABI it was compiled for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInput {
    /// Path to the module image
    pub path: PathBuf,
    /// Android ABI name, empty for architecture-agnostic modules
    pub abi: String,
}

impl ModuleInput {
    /// Creates a module input
    pub fn new(path: impl AsRef<Path>, abi: impl Into<String>) -> Self {
        ModuleInput {
            path: path.as_ref().to_path_buf(),
            abi: abi.into(),
        }
    }
}

/// Loads module images in parallel, tagging each with the architecture of its ABI.
///
/// # Errors
///
/// Returns [`crate::Error::UnsupportedAbi`] for unknown ABI names, or the first error from
/// reading a module, in input order.
pub fn load_modules(inputs: &[ModuleInput]) -> Result<Vec<ModuleDefinition>> {
    inputs
        .par_iter()
        .map(|input| {
            let display = input.path.display().to_string();
            let arch = TargetArch::from_abi(&input.abi, &display)?;

            let start = Instant::now();
            let mut module = ModuleDefinition::from_file(&input.path)?;
            module.arch = arch;
            log::debug!("loaded module '{}' ({}) in {:?}", display, arch, start.elapsed());

            Ok(module)
        })
        .collect()
}

/// Classifies the types of a module set.
#[derive(Debug, Clone, Default)]
pub struct TypeScanner {
    roots: PeerRoots,
}

impl TypeScanner {
    /// Creates a scanner for the given peer roots.
    #[must_use]
    pub fn new(roots: PeerRoots) -> Self {
        TypeScanner { roots }
    }

    /// The peer roots in use
    #[must_use]
    pub fn roots(&self) -> &PeerRoots {
        &self.roots
    }

    /// Classifies one type as seen from a module compiled for `arch`.
    #[must_use]
    pub fn classify(
        &self,
        index: &TypeDefinitionIndex<'_>,
        full_name: &str,
        ty: &TypeDefinition,
        arch: TargetArch,
    ) -> PeerClassification {
        let roots = &self.roots;

        if ty.is_interface() {
            if index.implements_interface(full_name, &roots.peer_marker, arch) {
                return PeerClassification::PeerCandidate;
            }
            return PeerClassification::Ignored;
        }

        if index.is_subclass_of(full_name, &roots.throwable_root, arch) {
            return PeerClassification::PeerException;
        }
        if index.is_subclass_of(full_name, &roots.object_root, arch) {
            return PeerClassification::PeerCandidate;
        }

        if index.implements_interface(full_name, &roots.object_marker, arch)
            && !index.is_subclass_of(full_name, &roots.exception_root, arch)
        {
            return PeerClassification::Invalid;
        }

        PeerClassification::Ignored
    }

    /// Scans one module into `accumulator`.
    pub fn scan_module(
        &self,
        index: &TypeDefinitionIndex<'_>,
        module: &ModuleDefinition,
        accumulator: &ScanAccumulator,
    ) {
        let start = Instant::now();
        let mut peers = 0usize;

        for (full_name, ty) in module.all_types() {
            match self.classify(index, &full_name, ty, module.arch) {
                PeerClassification::Ignored => {}
                PeerClassification::Invalid => {
                    log::error!(
                        "type '{}' in '{}' implements '{}' but does not derive from '{}' or '{}'",
                        full_name,
                        module.display_name(),
                        self.roots.object_marker,
                        self.roots.object_root,
                        self.roots.throwable_root
                    );
                    accumulator.add_invalid(&full_name, &module.display_name());
                }
                classification => {
                    peers += 1;
                    accumulator.add(
                        &full_name,
                        &module.assembly_name,
                        classification,
                        TypeSlot {
                            arch: module.arch,
                            module: module.display_name(),
                            token: ty.token,
                        },
                    );
                }
            }
        }

        log::debug!(
            "scanned '{}' ({}): {} peer type(s) in {:?}",
            module.display_name(),
            module.arch,
            peers,
            start.elapsed()
        );
    }

    fn scan_all(&self, modules: &[ModuleDefinition]) -> ScanAccumulator {
        let index = TypeDefinitionIndex::build(modules);
        let accumulator = ScanAccumulator::new();

        modules
            .par_iter()
            .for_each(|module| self.scan_module(&index, module, &accumulator));

        accumulator
    }

    /// Scans all modules and returns the classified peer types, sorted by key.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidPeerType`], [`crate::Error::DuplicateType`] or
    /// [`crate::Error::AbiMixing`]. Which one is reported does not depend on module order.
    pub fn scan(&self, modules: &[ModuleDefinition]) -> Result<Vec<ManagedType>> {
        let start = Instant::now();
        let types = self.scan_all(modules).finish()?;
        log::info!(
            "found {} peer type(s) in {} module(s) in {:?}",
            types.len(),
            modules.len(),
            start.elapsed()
        );
        Ok(types)
    }

    /// Scans all modules, reporting conflicts to `diagnostics` instead of failing.
    #[must_use]
    pub fn scan_lenient(
        &self,
        modules: &[ModuleDefinition],
        diagnostics: &Diagnostics,
    ) -> Vec<ManagedType> {
        self.scan_all(modules).finish_lenient(diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test::{activity_module, invalid_peer_module, mono_android_module},
        Error,
    };

    fn classification_of(types: &[ManagedType], full_name: &str) -> Option<PeerClassification> {
        types
            .iter()
            .find(|t| t.full_name == full_name)
            .map(|t| t.classification)
    }

    #[test]
    fn classifies_fixture_types() {
        let modules = vec![
            mono_android_module(TargetArch::None),
            activity_module(TargetArch::None),
        ];
        let types = TypeScanner::default().scan(&modules).unwrap();

        let peer = Some(PeerClassification::PeerCandidate);
        assert_eq!(classification_of(&types, "MyApp.MainActivity"), peer);
        assert_eq!(classification_of(&types, "MyApp.MainActivity+ClickListener"), peer);
        assert_eq!(classification_of(&types, "Java.Lang.Object"), peer);
        assert_eq!(classification_of(&types, "Android.Runtime.IJavaObject"), peer);
        assert_eq!(
            classification_of(&types, "MyApp.AppException"),
            Some(PeerClassification::PeerException)
        );
        assert_eq!(
            classification_of(&types, "Java.Lang.Throwable"),
            Some(PeerClassification::PeerException)
        );
        assert_eq!(classification_of(&types, "MyApp.Helper"), None);
        assert_eq!(classification_of(&types, "Java.Interop.IJavaPeerable"), None);
        assert_eq!(classification_of(&types, "Java.Interop.TypeManager"), None);

        let main = types.iter().find(|t| t.full_name == "MyApp.MainActivity").unwrap();
        assert_eq!(main.key, "MyApp.MainActivity, App");
        assert!(!main.is_abi_specific());
    }

    #[test]
    fn invalid_peer_type_is_fatal() {
        let modules = vec![
            mono_android_module(TargetArch::None),
            invalid_peer_module(TargetArch::None),
        ];
        match TypeScanner::default().scan(&modules).unwrap_err() {
            Error::InvalidPeerType { type_name, module } => {
                assert_eq!(type_name, "Foo");
                assert_eq!(module, "Broken.dll");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn order_independent() {
        let forward = vec![
            mono_android_module(TargetArch::None),
            activity_module(TargetArch::Arm64),
            activity_module(TargetArch::X86),
        ];
        let mut backward = forward.clone();
        backward.reverse();

        let scanner = TypeScanner::default();
        let a = scanner.scan(&forward).unwrap();
        let b = scanner.scan(&backward).unwrap();
        assert_eq!(a, b);

        let main = a.iter().find(|t| t.full_name == "MyApp.MainActivity").unwrap();
        assert!(main.is_abi_specific());
        assert_eq!(main.slots.len(), 2);
    }

    #[test]
    fn mixing_is_fatal_in_any_order() {
        let mut modules = vec![
            mono_android_module(TargetArch::None),
            activity_module(TargetArch::None),
            activity_module(TargetArch::Arm),
        ];
        let scanner = TypeScanner::default();

        let first = scanner.scan(&modules).unwrap_err().to_string();
        modules.reverse();
        let second = scanner.scan(&modules).unwrap_err().to_string();
        assert_eq!(first, second);
        assert!(first.contains("ABI-agnostic"));
    }

    #[test]
    fn lenient_scan_keeps_going() {
        let modules = vec![
            mono_android_module(TargetArch::None),
            activity_module(TargetArch::None),
            activity_module(TargetArch::Arm),
            invalid_peer_module(TargetArch::None),
        ];
        let diagnostics = Diagnostics::new();
        let types = TypeScanner::default().scan_lenient(&modules, &diagnostics);

        assert!(diagnostics.has_errors());
        let main = types.iter().find(|t| t.full_name == "MyApp.MainActivity").unwrap();
        assert!(main.duplicate_conflict);
    }

    #[test]
    fn unknown_abi_rejected_on_load() {
        let inputs = vec![ModuleInput::new("obj/App.pwmd", "sparc")];
        assert!(matches!(
            load_modules(&inputs),
            Err(Error::UnsupportedAbi { .. })
        ));
    }
}
