//! Registration tables produced by the method classifier.

use std::{collections::BTreeMap, fmt};

use crate::{
    arch::TargetArch,
    metadata::{signatures::MethodSignature, token::Token},
};

/// How a native callback is registered with the foreign runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegistrationVerdict {
    /// The callback signature is blittable and is used as the entry point as is
    Direct,
    /// The callback needs a generated wrapper converting boolean values
    WrapperNeeded,
    /// The method is registered by name at runtime
    DynamicFallback,
}

impl fmt::Display for RegistrationVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegistrationVerdict::Direct => "direct",
            RegistrationVerdict::WrapperNeeded => "wrapper",
            RegistrationVerdict::DynamicFallback => "dynamic",
        };
        f.write_str(name)
    }
}

/// Why a method falls back to dynamic registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DynamicReason {
    /// The connector lives in another assembly
    ExternalConnector,
    /// The registration has no connector
    MissingConnector,
    /// The native callback named by the connector does not exist
    MissingCallback,
    /// A special entry point was not found in the scanned modules
    UnresolvedSpecialCase,
}

impl fmt::Display for DynamicReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DynamicReason::ExternalConnector => "connector is defined in another assembly",
            DynamicReason::MissingConnector => "registration has no connector",
            DynamicReason::MissingCallback => "native callback not found",
            DynamicReason::UnresolvedSpecialCase => "special entry point not found",
        };
        f.write_str(reason)
    }
}

/// Location of a native callback in one module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackTarget {
    /// Architecture of the module
    pub arch: TargetArch,
    /// Name of the module declaring the callback
    pub module: String,
    /// The native callback
    pub callback: Token,
    /// Connector method returning the callback delegate
    pub connector: Option<Token>,
    /// Field caching the callback delegate
    pub field: Option<Token>,
    /// Generated wrapper, once the module was rewritten
    pub wrapper: Option<Token>,
    /// Verdict for the callback signature of this module
    pub verdict: RegistrationVerdict,
}

/// A method whose native callback is registered as a native entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallableMethod {
    /// Key of the owning peer type
    pub owner: String,
    /// Name of the overriding method
    pub method_name: String,
    /// Foreign method name
    pub jni_name: String,
    /// Foreign method signature
    pub jni_signature: String,
    /// Full name of the type declaring the native callback
    pub declaring_type: String,
    /// Name of the native callback
    pub callback_name: String,
    /// Signature of the native callback
    pub callback_signature: MethodSignature,
    /// Strongest verdict of the targets; a wrapper is only generated for targets that need one
    pub verdict: RegistrationVerdict,
    /// Callback locations, one per defining module
    pub targets: Vec<CallbackTarget>,
}

impl CallableMethod {
    /// Adds a callback location unless it is already known.
    pub fn add_target(&mut self, target: CallbackTarget) {
        if !self
            .targets
            .iter()
            .any(|t| t.module == target.module && t.arch == target.arch && t.callback == target.callback)
        {
            self.targets.push(target);
            self.targets.sort();
        }
    }
}

/// A method registered by name at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicRegistration {
    /// Key of the owning peer type
    pub owner: String,
    /// Name of the overriding method
    pub method_name: String,
    /// Foreign method name
    pub jni_name: String,
    /// Foreign method signature
    pub jni_signature: String,
    /// Connector as given in the registration
    pub connector: Option<String>,
    /// Why native registration was not possible
    pub reason: DynamicReason,
}

/// Registrations of one peer type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationTable {
    /// Methods registered as native entry points
    pub direct: Vec<CallableMethod>,
    /// Methods registered dynamically
    pub dynamic: Vec<DynamicRegistration>,
}

impl RegistrationTable {
    /// Returns true if the type has no registrations at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.direct.is_empty() && self.dynamic.is_empty()
    }
}

/// All registration tables of a build, by owner key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registrations {
    pub(crate) tables: BTreeMap<String, RegistrationTable>,
    pub(crate) rejected: usize,
    pub(crate) wrapped: usize,
}

impl Registrations {
    /// The table of a type, by key
    #[must_use]
    pub fn table(&self, owner: &str) -> Option<&RegistrationTable> {
        self.tables.get(owner)
    }

    /// All tables, sorted by owner key
    pub fn tables(&self) -> impl Iterator<Item = (&String, &RegistrationTable)> {
        self.tables.iter()
    }

    /// Returns true if `owner` registers at least one method dynamically
    #[must_use]
    pub fn found_dynamically_registered_methods(&self, owner: &str) -> bool {
        self.tables
            .get(owner)
            .is_some_and(|table| !table.dynamic.is_empty())
    }

    /// Number of methods that fell back to dynamic registration
    #[must_use]
    pub fn rejected_method_count(&self) -> usize {
        self.rejected
    }

    /// Number of methods that need a wrapper
    #[must_use]
    pub fn wrapped_method_count(&self) -> usize {
        self.wrapped
    }

    /// Every native entry point method, in owner order
    pub fn callable_methods(&self) -> impl Iterator<Item = &CallableMethod> {
        self.tables.values().flat_map(|t| t.direct.iter())
    }

    /// Mutable access to every native entry point method
    pub fn callable_methods_mut(&mut self) -> impl Iterator<Item = &mut CallableMethod> {
        self.tables.values_mut().flat_map(|t| t.direct.iter_mut())
    }

    /// Every dynamic registration, in owner order
    pub fn dynamic_registrations(&self) -> impl Iterator<Item = &DynamicRegistration> {
        self.tables.values().flat_map(|t| t.dynamic.iter())
    }

    pub(crate) fn table_mut(&mut self, owner: &str) -> &mut RegistrationTable {
        self.tables.entry(owner.to_string()).or_default()
    }
}
