//! Merging of per-module scan results.
//!
//! Scan tasks run concurrently, one per module, and append what they find to a shared
//! [`ScanAccumulator`]. Contributions are partitioned by deduplication key in a `DashMap`;
//! nothing is decided while scanning. [`ScanAccumulator::finish`] sorts every partition and
//! walks the keys in order, so the resulting types and the first reported conflict do not
//! depend on the order in which modules were scanned.

use std::collections::BTreeMap;

use dashmap::DashMap;

use crate::{
    arch::TargetArch,
    metadata::{
        diagnostics::{DiagnosticCategory, Diagnostics},
        token::Token,
    },
    scanner::managed::{ManagedType, PeerClassification, TypeSlot},
    Error, Result,
};

/// One type definition found by a scan task.
#[derive(Debug, Clone)]
struct Contribution {
    full_name: String,
    assembly_name: String,
    classification: PeerClassification,
    slot: TypeSlot,
}

impl Contribution {
    fn sort_key(&self) -> (TargetArch, &str, Token) {
        (self.slot.arch, self.slot.module.as_str(), self.slot.token)
    }
}

/// Accumulates classified types across concurrently scanned modules.
#[derive(Debug, Default)]
pub struct ScanAccumulator {
    contributions: DashMap<String, Vec<Contribution>>,
    invalid: boxcar::Vec<(String, String)>,
}

impl ScanAccumulator {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a peer type definition.
    pub fn add(
        &self,
        full_name: &str,
        assembly_name: &str,
        classification: PeerClassification,
        slot: TypeSlot,
    ) {
        let key = ManagedType::make_key(full_name, assembly_name);
        self.contributions
            .entry(key)
            .or_default()
            .push(Contribution {
                full_name: full_name.to_string(),
                assembly_name: assembly_name.to_string(),
                classification,
                slot,
            });
    }

    /// Records a type that implements the object marker without an allowed root.
    pub fn add_invalid(&self, full_name: &str, module: &str) {
        self.invalid.push((full_name.to_string(), module.to_string()));
    }

    /// Number of distinct keys recorded so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.contributions.len()
    }

    /// Returns true if nothing was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.contributions.is_empty() && self.invalid.count() == 0
    }

    /// Merges all contributions into classified types, sorted by key.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::InvalidPeerType`] for the first invalid type by name and module
    /// - [`crate::Error::AbiMixing`] / [`crate::Error::DuplicateType`] for the first
    ///   conflicting key
    pub fn finish(self) -> Result<Vec<ManagedType>> {
        let invalid = self.invalid.iter().map(|(_, entry)| entry).min().cloned();
        if let Some((type_name, module)) = invalid {
            return Err(Error::InvalidPeerType { type_name, module });
        }

        let mut types = Vec::new();
        for (_, contributions) in Self::sorted(self.contributions) {
            let Some((managed, conflict)) = Self::merge(contributions) else {
                continue;
            };
            if let Some(error) = conflict {
                return Err(error);
            }
            types.push(managed);
        }
        Ok(types)
    }

    /// Merges all contributions, keeping the first definition of each conflicting slot.
    ///
    /// Conflicts and invalid types are reported to `diagnostics` as errors instead of
    /// aborting; conflicting types have [`ManagedType::duplicate_conflict`] set. Used by
    /// inspection tooling that needs a complete picture of a broken build.
    #[must_use]
    pub fn finish_lenient(self, diagnostics: &Diagnostics) -> Vec<ManagedType> {
        let mut invalid: Vec<(String, String)> =
            self.invalid.iter().map(|(_, entry)| entry.clone()).collect();
        invalid.sort();
        for (type_name, module) in invalid {
            let error = Error::InvalidPeerType { type_name, module };
            log::error!("{}", error);
            diagnostics.error(DiagnosticCategory::Type, error.to_string());
        }

        Self::sorted(self.contributions)
            .into_iter()
            .filter_map(|(_, contributions)| {
                let (managed, conflict) = Self::merge(contributions)?;
                if let Some(error) = conflict {
                    log::error!("{}", error);
                    diagnostics.error(DiagnosticCategory::Type, error.to_string());
                }
                Some(managed)
            })
            .collect()
    }

    fn sorted(contributions: DashMap<String, Vec<Contribution>>) -> BTreeMap<String, Vec<Contribution>> {
        contributions
            .into_iter()
            .map(|(key, mut list)| {
                list.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
                (key, list)
            })
            .collect()
    }

    /// Merges the sorted contributions of one key; returns the first conflict, if any.
    fn merge(contributions: Vec<Contribution>) -> Option<(ManagedType, Option<Error>)> {
        let mut iter = contributions.into_iter();
        let first = iter.next()?;

        let mut managed = ManagedType {
            key: ManagedType::make_key(&first.full_name, &first.assembly_name),
            full_name: first.full_name,
            assembly_name: first.assembly_name,
            classification: first.classification,
            slots: BTreeMap::new(),
            duplicate_conflict: false,
        };
        managed.slots.insert(first.slot.arch, first.slot);

        let mut conflict = None;
        for contribution in iter {
            let slot = contribution.slot;
            let error = if let Some(existing) = managed.slots.get(&slot.arch) {
                Some(Error::DuplicateType {
                    type_name: managed.full_name.clone(),
                    first: existing.module.clone(),
                    second: slot.module.clone(),
                })
            } else if let Some(agnostic) = managed.slots.get(&TargetArch::None) {
                // agnostic sorts first, so any mixing is seen from the agnostic side
                Some(Error::AbiMixing {
                    type_name: managed.full_name.clone(),
                    module: agnostic.module.clone(),
                    arch: slot.arch,
                })
            } else {
                None
            };

            match error {
                Some(error) => {
                    managed.duplicate_conflict = true;
                    conflict.get_or_insert(error);
                }
                None => {
                    managed.slots.insert(slot.arch, slot);
                }
            }
        }

        Some((managed, conflict))
    }
}
