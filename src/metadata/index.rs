//! Cross-module type definition index.
//!
//! Classification needs transitive "is-a" and "implements" answers across every module in
//! the build, including types nested at any depth. [`TypeDefinitionIndex`] is built once per
//! run over all modules and answers those questions by walking base-type and interface
//! names, so no live type system or resolver is needed.
//!
//! A type name may be defined by several modules when the same assembly was compiled once
//! per architecture, or by unrelated assemblies. Lookups take the architecture of the asking
//! module and prefer a definition for that architecture, then an agnostic one, then any
//! other. Within each group the definition from the lowest `(assembly, module)` name wins,
//! so the answer does not depend on the order the modules were loaded in.

use std::collections::{HashMap, HashSet};

use crate::{
    arch::TargetArch,
    metadata::{module::ModuleDefinition, typedef::TypeDefinition},
};

/// A type definition together with its location.
#[derive(Debug, Clone, Copy)]
pub struct IndexedType<'a> {
    /// The definition
    pub definition: &'a TypeDefinition,
    /// Module declaring the type
    pub module: &'a ModuleDefinition,
}

impl IndexedType<'_> {
    /// Architecture of the declaring module
    #[must_use]
    pub fn arch(&self) -> TargetArch {
        self.module.arch
    }
}

/// Index of every type definition of a module set, by full name.
pub struct TypeDefinitionIndex<'a> {
    by_name: HashMap<String, Vec<IndexedType<'a>>>,
    count: usize,
}

impl<'a> TypeDefinitionIndex<'a> {
    /// Indexes all (nested) types of `modules`.
    #[must_use]
    pub fn build(modules: &'a [ModuleDefinition]) -> Self {
        let mut by_name: HashMap<String, Vec<IndexedType<'a>>> = HashMap::new();
        let mut count = 0;

        for module in modules {
            for (full_name, definition) in module.all_types() {
                by_name
                    .entry(full_name)
                    .or_default()
                    .push(IndexedType { definition, module });
                count += 1;
            }
        }

        for candidates in by_name.values_mut() {
            candidates.sort_by(|a, b| {
                (&a.module.assembly_name, &a.module.name).cmp(&(&b.module.assembly_name, &b.module.name))
            });
        }

        TypeDefinitionIndex { by_name, count }
    }

    /// Total number of indexed definitions
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns true if no type was indexed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Resolves a type name as seen from a module compiled for `arch`.
    #[must_use]
    pub fn resolve(&self, full_name: &str, arch: TargetArch) -> Option<IndexedType<'a>> {
        let candidates = self.by_name.get(full_name)?;
        candidates
            .iter()
            .find(|c| c.arch() == arch)
            .or_else(|| candidates.iter().find(|c| c.arch().is_agnostic()))
            .or_else(|| candidates.first())
            .copied()
    }

    /// The names of `full_name` and all its base types, most derived first.
    ///
    /// The walk stops at the first base type that is not defined in the module set; its name
    /// is still included. Inheritance cycles in corrupt input terminate the walk.
    #[must_use]
    pub fn type_and_base_names(&self, full_name: &str, arch: TargetArch) -> Vec<String> {
        let mut names = vec![full_name.to_string()];
        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(full_name.to_string());

        let mut current = self.resolve(full_name, arch);
        while let Some(ty) = current {
            let Some(base) = &ty.definition.base_type else {
                break;
            };
            if !seen.insert(base.clone()) {
                log::debug!("inheritance cycle through '{}'", base);
                break;
            }
            names.push(base.clone());
            current = self.resolve(base, ty.arch());
        }

        names
    }

    /// The resolved base types of `full_name`, direct base first.
    #[must_use]
    pub fn base_types(&self, full_name: &str, arch: TargetArch) -> Vec<(String, IndexedType<'a>)> {
        self.type_and_base_names(full_name, arch)
            .into_iter()
            .skip(1)
            .filter_map(|name| {
                let resolved = self.resolve(&name, arch)?;
                Some((name, resolved))
            })
            .collect()
    }

    /// Returns true if `full_name` is `root` or derives from it, directly or transitively.
    #[must_use]
    pub fn is_subclass_of(&self, full_name: &str, root: &str, arch: TargetArch) -> bool {
        self.type_and_base_names(full_name, arch)
            .iter()
            .any(|name| name == root)
    }

    /// Returns true if `full_name` implements `interface`.
    ///
    /// Interfaces are collected from the type and all its base types, and each interface
    /// contributes the interfaces it extends in turn.
    #[must_use]
    pub fn implements_interface(&self, full_name: &str, interface: &str, arch: TargetArch) -> bool {
        let mut pending: Vec<String> = Vec::new();
        for name in self.type_and_base_names(full_name, arch) {
            if let Some(ty) = self.resolve(&name, arch) {
                pending.extend(ty.definition.interfaces.iter().cloned());
            }
        }

        let mut seen: HashSet<String> = HashSet::new();
        while let Some(candidate) = pending.pop() {
            if candidate == interface {
                return true;
            }
            if !seen.insert(candidate.clone()) {
                continue;
            }
            if let Some(ty) = self.resolve(&candidate, arch) {
                pending.extend(ty.definition.interfaces.iter().cloned());
            }
        }

        false
    }
}
