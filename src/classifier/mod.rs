//! Registration decisions for peer type methods.
//!
//! For every method of a peer type that overrides a bound foreign method, the classifier
//! locates the native callback belonging to the binding and decides how it is registered:
//!
//! - [`RegistrationVerdict::Direct`] when every parameter and the return type of the
//!   callback are blittable
//! - [`RegistrationVerdict::WrapperNeeded`] when the only non-blittable type is `bool`,
//!   which crosses the boundary as a single unsigned byte
//! - [`RegistrationVerdict::DynamicFallback`] when the binding cannot be resolved statically
//!   (connector in another assembly, no connector, no callback)
//!
//! Any other non-blittable type is a hard [`crate::Error::UnsupportedSignature`]: silently
//! registering such a method dynamically would hide a broken binding.
//!
//! # Scaffolding names
//!
//! A registration names its connector `Get<Core>Handler`. The native callback is
//! `n_<Core>` and the field caching its delegate is `cb_<core>`, both declared next to the
//! connector.

mod registration;

pub use registration::{
    CallableMethod, CallbackTarget, DynamicReason, DynamicRegistration, RegistrationTable,
    RegistrationVerdict, Registrations,
};

use crate::{
    config::SpecialEntryPoint,
    metadata::{
        diagnostics::{DiagnosticCategory, Diagnostics},
        index::{IndexedType, TypeDefinitionIndex},
        method::MethodDefinition,
        module::ModuleDefinition,
        signatures::{MethodSignature, TypeSignature},
    },
    scanner::ManagedType,
    Error, Result,
};

/// Verdict for a native callback signature.
///
/// # Errors
///
/// Returns [`crate::Error::UnsupportedSignature`] naming `type_name` and `method` if the
/// signature has a type that is neither blittable nor `bool`.
pub fn signature_verdict(
    signature: &MethodSignature,
    type_name: &str,
    method: &str,
) -> Result<RegistrationVerdict> {
    let mut verdict = RegistrationVerdict::Direct;

    let mut check = |ty: &TypeSignature, what: String| -> Result<()> {
        if ty.is_blittable() && *ty != TypeSignature::Void {
            return Ok(());
        }
        if ty.is_convertible() {
            verdict = RegistrationVerdict::WrapperNeeded;
            return Ok(());
        }
        Err(Error::UnsupportedSignature {
            type_name: type_name.to_string(),
            method: method.to_string(),
            parameter: format!("{what} of type '{ty}'"),
        })
    };

    for (position, param) in signature.params.iter().enumerate() {
        check(param, format!("parameter {position}"))?;
    }
    if signature.return_type != TypeSignature::Void {
        check(&signature.return_type, "return type".to_string())?;
    }

    Ok(verdict)
}

/// Outcome of classifying one overriding method in one architecture slot.
enum SlotOutcome {
    Callable(CallableMethod),
    Dynamic(DynamicRegistration),
}

/// Classifies the methods of peer types.
pub struct MethodClassifier<'a> {
    modules: &'a [ModuleDefinition],
    index: TypeDefinitionIndex<'a>,
    special_entry_points: Vec<SpecialEntryPoint>,
    diagnostics: &'a Diagnostics,
    registrations: Registrations,
    special_cases_added: bool,
}

impl<'a> MethodClassifier<'a> {
    /// Creates a classifier over a module set.
    #[must_use]
    pub fn new(
        modules: &'a [ModuleDefinition],
        special_entry_points: Vec<SpecialEntryPoint>,
        diagnostics: &'a Diagnostics,
    ) -> Self {
        MethodClassifier {
            modules,
            index: TypeDefinitionIndex::build(modules),
            special_entry_points,
            diagnostics,
            registrations: Registrations::default(),
            special_cases_added: false,
        }
    }

    /// Classifies the overriding methods of every peer type.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnsupportedSignature`] for the first callback, in key order,
    /// with an unsupported signature.
    pub fn classify(&mut self, types: &[ManagedType]) -> Result<()> {
        for ty in types.iter().filter(|t| t.classification.is_peer()) {
            self.classify_type(ty)?;
        }
        Ok(())
    }

    /// Classifies the overriding methods of one peer type across all its architecture slots.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnsupportedSignature`] if a callback signature is unsupported.
    pub fn classify_type(&mut self, ty: &ManagedType) -> Result<()> {
        // (method name, params) -> outcomes of every slot, in slot order
        let mut outcomes: Vec<((String, Vec<TypeSignature>), Vec<SlotOutcome>)> = Vec::new();

        for arch in ty.archs() {
            let Some(resolved) = self.index.resolve(&ty.full_name, arch) else {
                continue;
            };

            for method in resolved.definition.methods.iter().filter(|m| m.is_virtual() && !m.is_new_slot()) {
                let Some(outcome) = self.classify_override(ty, resolved, method)? else {
                    continue;
                };

                let id = (method.name.clone(), method.signature.params.clone());
                match outcomes.iter_mut().find(|(key, _)| *key == id) {
                    Some((_, list)) => list.push(outcome),
                    None => outcomes.push((id, vec![outcome])),
                }
            }
        }

        for (_, slot_outcomes) in outcomes {
            self.record(ty, slot_outcomes);
        }

        if self.registrations.found_dynamically_registered_methods(&ty.key) {
            warn_diag!(
                self.diagnostics,
                DiagnosticCategory::Registration,
                "Type '{}' will register some of its methods dynamically",
                ty.full_name
            );
        }

        Ok(())
    }

    /// Finds the bound base method `method` overrides and classifies its callback.
    fn classify_override(
        &self,
        ty: &ManagedType,
        resolved: IndexedType<'a>,
        method: &MethodDefinition,
    ) -> Result<Option<SlotOutcome>> {
        let arch = resolved.arch();

        let bound = self
            .index
            .base_types(&ty.full_name, arch)
            .into_iter()
            .find_map(|(base_name, base)| {
                base.definition
                    .methods
                    .iter()
                    .find(|m| {
                        m.register.is_some()
                            && m.name == method.name
                            && m.signature.params == method.signature.params
                    })
                    .map(|m| (base_name, base, m))
            });
        let Some((declaring_type, declaring, base_method)) = bound else {
            return Ok(None);
        };
        let Some(register) = &base_method.register else {
            return Ok(None);
        };

        let dynamic = |reason: DynamicReason| -> Result<Option<SlotOutcome>> {
            Ok(Some(SlotOutcome::Dynamic(DynamicRegistration {
                owner: ty.key.clone(),
                method_name: method.name.clone(),
                jni_name: register.jni_name.clone(),
                jni_signature: register.jni_signature.clone(),
                connector: register.connector.clone(),
                reason,
            })))
        };

        if register.connector.is_none() {
            return dynamic(DynamicReason::MissingConnector);
        }
        if register.has_external_connector() {
            return dynamic(DynamicReason::ExternalConnector);
        }

        let (Some(callback_name), Some(field_name)) =
            (register.callback_name(), register.callback_field_name())
        else {
            return dynamic(DynamicReason::MissingConnector);
        };
        let Some(callback) = declaring.definition.method_by_name(&callback_name) else {
            return dynamic(DynamicReason::MissingCallback);
        };

        let verdict = signature_verdict(&callback.signature, &declaring_type, &callback_name)?;
        let connector = register
            .connector
            .as_deref()
            .and_then(|name| declaring.definition.method_by_name(name))
            .map(|m| m.token);
        let field = declaring
            .definition
            .field_by_name(&field_name)
            .map(|f| f.token);

        Ok(Some(SlotOutcome::Callable(CallableMethod {
            owner: ty.key.clone(),
            method_name: method.name.clone(),
            jni_name: register.jni_name.clone(),
            jni_signature: register.jni_signature.clone(),
            declaring_type,
            callback_name,
            callback_signature: callback.signature.clone(),
            verdict,
            targets: vec![CallbackTarget {
                arch,
                module: declaring.module.display_name(),
                callback: callback.token,
                connector,
                field,
                wrapper: None,
                verdict,
            }],
        })))
    }

    /// Merges the slot outcomes of one method into the owner's table.
    ///
    /// A method that cannot be registered natively in one slot is registered dynamically for
    /// all of them. Verdicts stay per target: a wrapper needed by one architecture's callback
    /// is not generated for the others.
    fn record(&mut self, ty: &ManagedType, outcomes: Vec<SlotOutcome>) {
        let mut merged: Option<CallableMethod> = None;
        let mut dynamic: Option<DynamicRegistration> = None;

        for outcome in outcomes {
            match outcome {
                SlotOutcome::Dynamic(registration) => {
                    dynamic.get_or_insert(registration);
                }
                SlotOutcome::Callable(method) => match &mut merged {
                    None => merged = Some(method),
                    Some(existing) => {
                        existing.verdict = existing.verdict.max(method.verdict);
                        for target in method.targets {
                            existing.add_target(target);
                        }
                    }
                },
            }
        }

        if let Some(registration) = dynamic {
            warn_diag!(
                self.diagnostics,
                DiagnosticCategory::Registration,
                "Method '{}::{}' ({}) will be registered dynamically: {}",
                ty.full_name,
                registration.method_name,
                registration.connector.as_deref().unwrap_or("no connector"),
                registration.reason
            );
            self.registrations.rejected += 1;
            self.registrations.table_mut(&ty.key).dynamic.push(registration);
            return;
        }

        if let Some(method) = merged {
            log::debug!(
                "'{}::{}' -> {}::{} ({})",
                ty.full_name,
                method.method_name,
                method.declaring_type,
                method.callback_name,
                method.verdict
            );
            if method.verdict == RegistrationVerdict::WrapperNeeded {
                self.registrations.wrapped += 1;
            }
            self.registrations.table_mut(&ty.key).direct.push(method);
        }
    }

    /// Adds the configured special entry points to the registration tables.
    ///
    /// Entry points found in the module set are registered natively, everything else is
    /// recorded as an unresolved dynamic registration. Calling this more than once has no
    /// further effect.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnsupportedSignature`] if a special entry point has an
    /// unsupported signature.
    pub fn add_special_case_methods(&mut self) -> Result<()> {
        if self.special_cases_added {
            return Ok(());
        }
        self.special_cases_added = true;

        for entry in self.special_entry_points.clone() {
            let mut found: Option<CallableMethod> = None;

            for module in self.modules {
                let Some(ty) = module.find_type(&entry.type_name) else {
                    continue;
                };
                let Some(callback) = ty.method_by_name(&entry.method_name) else {
                    continue;
                };

                let verdict =
                    signature_verdict(&callback.signature, &entry.type_name, &entry.method_name)?;
                let target = CallbackTarget {
                    arch: module.arch,
                    module: module.display_name(),
                    callback: callback.token,
                    connector: None,
                    field: None,
                    wrapper: None,
                    verdict,
                };

                match &mut found {
                    Some(existing) => {
                        existing.verdict = existing.verdict.max(verdict);
                        existing.add_target(target);
                    }
                    None => {
                        found = Some(CallableMethod {
                            owner: ManagedType::make_key(&entry.type_name, &module.assembly_name),
                            method_name: entry.method_name.clone(),
                            jni_name: entry.jni_name.clone(),
                            jni_signature: entry.jni_signature.clone(),
                            declaring_type: entry.type_name.clone(),
                            callback_name: entry.method_name.clone(),
                            callback_signature: callback.signature.clone(),
                            verdict,
                            targets: vec![target],
                        });
                    }
                }
            }

            match found {
                Some(method) => {
                    let owner = method.owner.clone();
                    let table = self.registrations.table_mut(&owner);
                    if table.direct.iter().any(|m| m.callback_name == method.callback_name) {
                        continue;
                    }
                    if method.verdict == RegistrationVerdict::WrapperNeeded {
                        self.registrations.wrapped += 1;
                    }
                    self.registrations.table_mut(&owner).direct.push(method);
                }
                None => {
                    log::debug!(
                        "special entry point '{}::{}' not found in the scanned modules",
                        entry.type_name,
                        entry.method_name
                    );
                    self.registrations
                        .table_mut(&entry.type_name)
                        .dynamic
                        .push(DynamicRegistration {
                            owner: entry.type_name.clone(),
                            method_name: entry.method_name.clone(),
                            jni_name: entry.jni_name.clone(),
                            jni_signature: entry.jni_signature.clone(),
                            connector: None,
                            reason: DynamicReason::UnresolvedSpecialCase,
                        });
                }
            }
        }

        Ok(())
    }

    /// Returns true if `owner` registers at least one method dynamically
    #[must_use]
    pub fn found_dynamically_registered_methods(&self, owner: &str) -> bool {
        self.registrations.found_dynamically_registered_methods(owner)
    }

    /// Number of methods that fell back to dynamic registration
    #[must_use]
    pub fn rejected_method_count(&self) -> usize {
        self.registrations.rejected_method_count()
    }

    /// Number of methods that need a wrapper
    #[must_use]
    pub fn wrapped_method_count(&self) -> usize {
        self.registrations.wrapped_method_count()
    }

    /// The registrations collected so far
    #[must_use]
    pub fn registrations(&self) -> &Registrations {
        &self.registrations
    }

    /// Reports the aggregate counts and returns the registrations.
    #[must_use]
    pub fn finish(self) -> Registrations {
        if self.registrations.rejected > 0 {
            warn_diag!(
                self.diagnostics,
                DiagnosticCategory::Registration,
                "Number of methods in the project that will be registered dynamically: {}; this may slow down application startup",
                self.registrations.rejected
            );
        }
        if self.registrations.wrapped > 0 {
            log::info!(
                "Number of methods in the project that need marshal method wrappers: {}",
                self.registrations.wrapped
            );
        }
        self.registrations
    }
}
