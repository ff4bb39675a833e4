//! Classified types.

use std::{collections::BTreeMap, fmt};

use crate::{arch::TargetArch, metadata::token::Token};

/// How a type takes part in the peer object model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PeerClassification {
    /// Class deriving from the object root, or an interface extending the peer marker
    PeerCandidate,
    /// Class deriving from the throwable root
    PeerException,
    /// Class implementing the object marker without deriving from an allowed root
    Invalid,
    /// Not part of the peer object model
    Ignored,
}

impl PeerClassification {
    /// Returns true for classifications whose methods may be registered natively
    #[must_use]
    pub fn is_peer(self) -> bool {
        matches!(
            self,
            PeerClassification::PeerCandidate | PeerClassification::PeerException
        )
    }
}

impl fmt::Display for PeerClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerClassification::PeerCandidate => "peer",
            PeerClassification::PeerException => "peer exception",
            PeerClassification::Invalid => "invalid",
            PeerClassification::Ignored => "ignored",
        };
        f.write_str(name)
    }
}

/// One definition of a logical type, for one architecture slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSlot {
    /// Architecture of the defining module
    pub arch: TargetArch,
    /// Name of the defining module
    pub module: String,
    /// Token of the definition in that module
    pub token: Token,
}

/// A logical type with its per-architecture definitions.
///
/// Either exactly one agnostic slot is filled, or one slot per architecture the type was
/// compiled for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedType {
    /// Deduplication key, `Full.Name, AssemblyName`
    pub key: String,
    /// Full type name, nested types joined with `+`
    pub full_name: String,
    /// Name of the declaring assembly
    pub assembly_name: String,
    /// Classification of the type
    pub classification: PeerClassification,
    /// Definitions by architecture
    pub slots: BTreeMap<TargetArch, TypeSlot>,
    /// Set when a conflicting definition was dropped while merging
    pub duplicate_conflict: bool,
}

impl ManagedType {
    /// Builds the deduplication key of a type.
    #[must_use]
    pub fn make_key(full_name: &str, assembly_name: &str) -> String {
        format!("{full_name}, {assembly_name}")
    }

    /// Returns true if the type is defined per architecture rather than once for all.
    #[must_use]
    pub fn is_abi_specific(&self) -> bool {
        match self.slots.len() {
            0 => false,
            1 => self.slots.keys().all(|arch| !arch.is_agnostic()),
            _ => true,
        }
    }

    /// Architectures the type is defined for
    pub fn archs(&self) -> impl Iterator<Item = TargetArch> + '_ {
        self.slots.keys().copied()
    }
}
