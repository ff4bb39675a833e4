//! Rewriting of native callbacks into native entry points.
//!
//! For every callable method found by the classifier, the rewriter edits the module that
//! declares the native callback:
//!
//! - [`crate::classifier::RegistrationVerdict::Direct`] callbacks are marked with the native
//!   entry point attribute
//! - [`crate::classifier::RegistrationVerdict::WrapperNeeded`] callbacks get a generated
//!   wrapper (see [`generate_wrapper`]); the wrapper carries the attribute
//! - the connector method and delegate field that only existed to register the callback
//!   dynamically are removed, provided both are private and static
//!
//! The attribute constructor is imported once per module and shared by every marked method
//! in it. Modules are independent of each other and are rewritten in parallel.
//!
//! Rewritten modules are persisted with [`write_modules`], which replaces the original files
//! only after every module of the batch was written.

mod wrapper;

pub use wrapper::{generate_wrapper, wrapper_name, wrapper_signature, WRAPPER_SUFFIX};

use std::{collections::BTreeMap, path::PathBuf, time::Instant};

use rayon::prelude::*;

use crate::{
    arch::TargetArch,
    classifier::{RegistrationVerdict, Registrations},
    config::MarshalAttribute,
    file::output::StagedBatch,
    metadata::{
        diagnostics::{DiagnosticCategory, Diagnostics},
        module::ModuleDefinition,
        signatures::MethodSignature,
        token::Token,
        typedef::{CustomAttribute, TypeDefinition},
    },
    Error, Result,
};

/// A method registered as a native entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeEntryPoint {
    /// Key of the peer type the registration belongs to
    pub owner: String,
    /// Foreign method name
    pub jni_name: String,
    /// Foreign method signature
    pub jni_signature: String,
    /// Module declaring the entry point
    pub module: String,
    /// Architecture of that module
    pub arch: TargetArch,
    /// Full name of the declaring type
    pub declaring_type: String,
    /// Name of the entry point method
    pub name: String,
    /// Token of the entry point method
    pub token: Token,
    /// Set when the entry point is a generated wrapper
    pub is_wrapper: bool,
}

/// One callback to rewrite in a module.
#[derive(Debug, Clone)]
struct CallbackWork {
    declaring_type: String,
    callback: Token,
    connector: Option<Token>,
    field: Option<Token>,
    verdict: RegistrationVerdict,
}

/// Entry point chosen for a callback: the callback itself or its wrapper.
#[derive(Debug, Clone, Copy)]
struct RewrittenCallback {
    entry_point: Token,
    wrapper: Option<Token>,
}

/// Marks native entry points and generates wrappers.
pub struct SignatureRewriter<'a> {
    attribute: &'a MarshalAttribute,
    diagnostics: &'a Diagnostics,
}

impl<'a> SignatureRewriter<'a> {
    /// Creates a rewriter using the given marker attribute.
    #[must_use]
    pub fn new(attribute: &'a MarshalAttribute, diagnostics: &'a Diagnostics) -> Self {
        SignatureRewriter {
            attribute,
            diagnostics,
        }
    }

    /// Locates the constructor of the marker attribute in the provider module.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MissingAttributeConstructor`] if the attribute type or its
    /// parameterless constructor does not exist.
    pub fn find_attribute_constructor(&self, provider: &ModuleDefinition) -> Result<MethodSignature> {
        provider
            .find_type(&self.attribute.attribute_type)
            .and_then(|ty| {
                ty.methods
                    .iter()
                    .find(|m| m.name == ".ctor" && m.signature.params.is_empty())
            })
            .map(|ctor| ctor.signature.clone())
            .ok_or_else(|| Error::MissingAttributeConstructor {
                attribute: self.attribute.attribute_type.clone(),
                module: provider.display_name(),
            })
    }

    /// Rewrites every module declaring a callback of `registrations`.
    ///
    /// Wrapper tokens are recorded in the callback targets of `registrations`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MissingAttributeConstructor`] if the marker cannot be imported,
    /// [`crate::Error::UnsupportedMarshal`] if a wrapper cannot be generated, or
    /// [`crate::Error::Error`] if a callback target does not exist. The first error in module
    /// order is returned.
    pub fn rewrite(
        &self,
        modules: &mut [ModuleDefinition],
        provider: &ModuleDefinition,
        registrations: &mut Registrations,
    ) -> Result<Vec<NativeEntryPoint>> {
        let start = Instant::now();
        let ctor_signature = self.find_attribute_constructor(provider)?;

        let work = Self::collect_work(modules, registrations)?;

        let results: Vec<Result<(usize, BTreeMap<Token, RewrittenCallback>)>> = modules
            .par_iter_mut()
            .enumerate()
            .filter_map(|(index, module)| {
                let items = work.get(&index)?;
                Some(
                    self.rewrite_module(module, items, &ctor_signature)
                        .map(|rewritten| (index, rewritten)),
                )
            })
            .collect();

        let mut rewritten: BTreeMap<(usize, Token), RewrittenCallback> = BTreeMap::new();
        for result in results {
            let (index, callbacks) = result?;
            for (callback, outcome) in callbacks {
                rewritten.insert((index, callback), outcome);
            }
        }

        let mut entry_points = Vec::new();
        for method in registrations.callable_methods_mut() {
            for target in &mut method.targets {
                let Some(index) = Self::module_index(modules, &target.module, target.arch) else {
                    continue;
                };
                let Some(outcome) = rewritten.get(&(index, target.callback)) else {
                    continue;
                };
                target.wrapper = outcome.wrapper;

                entry_points.push(NativeEntryPoint {
                    owner: method.owner.clone(),
                    jni_name: method.jni_name.clone(),
                    jni_signature: method.jni_signature.clone(),
                    module: target.module.clone(),
                    arch: target.arch,
                    declaring_type: method.declaring_type.clone(),
                    name: match outcome.wrapper {
                        Some(_) => wrapper_name(&method.callback_name),
                        None => method.callback_name.clone(),
                    },
                    token: outcome.entry_point,
                    is_wrapper: outcome.wrapper.is_some(),
                });
            }
        }

        for entry in &entry_points {
            log::debug!(
                "native entry point {}::{} [{}] {} ({}) in '{}'",
                entry.declaring_type,
                entry.name,
                entry.token,
                entry.jni_name,
                entry.arch,
                entry.module
            );
        }
        log::info!(
            "{} native entry point(s) in {} module(s), rewritten in {:?}",
            entry_points.len(),
            work.len(),
            start.elapsed()
        );

        Ok(entry_points)
    }

    fn module_index(modules: &[ModuleDefinition], name: &str, arch: TargetArch) -> Option<usize> {
        modules
            .iter()
            .position(|m| m.arch == arch && m.display_name() == name)
    }

    /// Groups the callback targets by module, each callback once.
    fn collect_work(
        modules: &[ModuleDefinition],
        registrations: &Registrations,
    ) -> Result<BTreeMap<usize, Vec<CallbackWork>>> {
        let mut work: BTreeMap<usize, Vec<CallbackWork>> = BTreeMap::new();

        for method in registrations.callable_methods() {
            for target in &method.targets {
                let index = Self::module_index(modules, &target.module, target.arch)
                    .ok_or_else(|| {
                        Error::Error(format!(
                            "Module '{}' ({}) declaring '{}::{}' is not part of the rewrite set",
                            target.module, target.arch, method.declaring_type, method.callback_name
                        ))
                    })?;

                let items = work.entry(index).or_default();
                if items.iter().any(|w| w.callback == target.callback) {
                    continue;
                }
                items.push(CallbackWork {
                    declaring_type: method.declaring_type.clone(),
                    callback: target.callback,
                    connector: target.connector,
                    field: target.field,
                    verdict: target.verdict,
                });
            }
        }

        Ok(work)
    }

    fn marker(&self, constructor: Token) -> CustomAttribute {
        CustomAttribute {
            attribute_type: self.attribute.attribute_type.clone(),
            constructor,
        }
    }

    /// Rewrites the callbacks of one module.
    fn rewrite_module(
        &self,
        module: &mut ModuleDefinition,
        items: &[CallbackWork],
        ctor_signature: &MethodSignature,
    ) -> Result<BTreeMap<Token, RewrittenCallback>> {
        let constructor = module.import_member_ref(
            &self.attribute.attribute_type,
            ".ctor",
            &self.attribute.provider_assembly,
            ctor_signature,
        );
        let module_name = module.display_name();
        let mut rewritten = BTreeMap::new();

        for item in items {
            let callback_missing = || {
                Error::Error(format!(
                    "Native callback {} of '{}' not found in '{}'",
                    item.callback, item.declaring_type, module_name
                ))
            };

            let outcome = match item.verdict {
                RegistrationVerdict::Direct => {
                    let ty = module
                        .find_type_mut(&item.declaring_type)
                        .ok_or_else(callback_missing)?;
                    let callback = ty
                        .methods
                        .iter_mut()
                        .find(|m| m.token == item.callback)
                        .ok_or_else(callback_missing)?;
                    if !callback.has_attribute(&self.attribute.attribute_type) {
                        callback.custom_attributes.push(self.marker(constructor));
                    }
                    RewrittenCallback {
                        entry_point: item.callback,
                        wrapper: None,
                    }
                }
                RegistrationVerdict::WrapperNeeded => {
                    let existing = module
                        .find_type(&item.declaring_type)
                        .ok_or_else(callback_missing)?
                        .method_by_token(item.callback)
                        .ok_or_else(callback_missing)?;
                    let name = wrapper_name(&existing.name);

                    let reused = module
                        .find_type(&item.declaring_type)
                        .and_then(|ty| ty.method_by_name(&name))
                        .map(|m| m.token);
                    let token = match reused {
                        Some(token) => token,
                        None => {
                            let callback = existing.clone();
                            let token = module.allocate_method_token();
                            let mut wrapper = generate_wrapper(&callback, token)?;
                            wrapper.custom_attributes.push(self.marker(constructor));
                            module
                                .find_type_mut(&item.declaring_type)
                                .ok_or_else(callback_missing)?
                                .methods
                                .push(wrapper);
                            token
                        }
                    };
                    RewrittenCallback {
                        entry_point: token,
                        wrapper: Some(token),
                    }
                }
                RegistrationVerdict::DynamicFallback => continue,
            };

            if let Some(ty) = module.find_type_mut(&item.declaring_type) {
                self.remove_scaffolding(ty, item, &module_name);
            }
            rewritten.insert(item.callback, outcome);
        }

        log::debug!("rewrote {} callback(s) in '{}'", rewritten.len(), module_name);
        Ok(rewritten)
    }

    /// Removes the connector method and delegate field of a callback if both are private and
    /// static; otherwise leaves both in place and warns.
    fn remove_scaffolding(&self, ty: &mut TypeDefinition, item: &CallbackWork, module: &str) {
        let connector = item
            .connector
            .and_then(|token| ty.methods.iter().position(|m| m.token == token));
        let field = item
            .field
            .and_then(|token| ty.fields.iter().position(|f| f.token == token));

        let (Some(connector), Some(field)) = (connector, field) else {
            log::debug!(
                "no scaffolding to remove for callback {} in '{}'",
                item.callback,
                ty.full_name()
            );
            return;
        };

        let method = &ty.methods[connector];
        let backing = &ty.fields[field];
        if !(method.is_private() && method.is_static()) {
            self.scaffolding_warning(ty, &method.name, "method", method.token, module);
            return;
        }
        if !(backing.flags.is_private() && backing.flags.is_static()) {
            self.scaffolding_warning(ty, &backing.name, "field", backing.token, module);
            return;
        }

        log::debug!(
            "removing '{}' and '{}' from '{}'",
            method.name,
            backing.name,
            ty.full_name()
        );
        ty.methods.remove(connector);
        ty.fields.remove(field);
    }

    fn scaffolding_warning(
        &self,
        ty: &TypeDefinition,
        member: &str,
        kind: &str,
        token: Token,
        module: &str,
    ) {
        warn_diag!(
            self.diagnostics,
            DiagnosticCategory::Scaffolding,
            "Unable to remove {} '{}::{}' ({}) from {}: it is not private and static",
            kind,
            ty.full_name(),
            member,
            token,
            module
        );
    }
}

/// Persists the given modules to their files as one batch.
///
/// Every module is first written to `<path>.new`; the originals are replaced only after all
/// of them were written. Modules without a path are skipped.
///
/// # Errors
///
/// Returns [`crate::Error::FileError`] if a module cannot be written or replaced. If writing
/// fails, the original files are untouched and the staged files are removed.
pub fn write_modules<'m>(modules: impl IntoIterator<Item = &'m ModuleDefinition>) -> Result<Vec<PathBuf>> {
    let mut batch = StagedBatch::new();
    for module in modules {
        let Some(path) = &module.path else {
            log::debug!("module '{}' has no path, not written", module.name);
            continue;
        };
        batch.stage(path, &module.to_bytes())?;
    }

    let written = batch.commit()?;
    for path in &written {
        log::info!("wrote '{}'", path.display());
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        classifier::MethodClassifier,
        config::SpecialEntryPoint,
        metadata::{method::MethodAttributes, signatures::TypeSignature},
        scanner::TypeScanner,
        test::{activity_module, execute, interop_services_module, mono_android_module},
    };

    fn classify(modules: &[ModuleDefinition]) -> Registrations {
        let diagnostics = Diagnostics::new();
        let types = TypeScanner::default().scan(modules).unwrap();
        let mut classifier =
            MethodClassifier::new(modules, SpecialEntryPoint::defaults(), &diagnostics);
        classifier.classify(&types).unwrap();
        classifier.add_special_case_methods().unwrap();
        classifier.finish()
    }

    #[test]
    fn rewrites_activity_callbacks() {
        let mut modules = vec![
            mono_android_module(TargetArch::None),
            activity_module(TargetArch::None),
        ];
        let mut registrations = classify(&modules);
        let attribute = MarshalAttribute::default();
        let diagnostics = Diagnostics::new();
        let rewriter = SignatureRewriter::new(&attribute, &diagnostics);

        let entry_points = rewriter
            .rewrite(&mut modules, &interop_services_module(), &mut registrations)
            .unwrap();

        let android = &modules[0];
        assert_eq!(android.member_refs.len(), 1);
        let ctor = android.member_refs[0].token;

        let activity = android.find_type("Android.App.Activity").unwrap();
        let on_create = activity.method_by_name("n_OnCreate_Landroid_os_Bundle_").unwrap();
        assert!(on_create.has_attribute(&attribute.attribute_type));
        assert_eq!(on_create.custom_attributes[0].constructor, ctor);

        let toggle_wrapper = activity.method_by_name("n_OnToggle_Z_mm_wrapper").unwrap();
        assert!(toggle_wrapper.has_attribute(&attribute.attribute_type));
        assert!(!activity
            .method_by_name("n_OnToggle_Z")
            .unwrap()
            .has_attribute(&attribute.attribute_type));
        assert!(toggle_wrapper
            .signature
            .params
            .iter()
            .chain(std::iter::once(&toggle_wrapper.signature.return_type))
            .all(TypeSignature::is_blittable));

        // scaffolding of rewritten callbacks is gone, the external connector is untouched
        assert!(activity.method_by_name("GetOnCreate_Landroid_os_Bundle_Handler").is_none());
        assert!(activity.field_by_name("cb_onCreate_Landroid_os_Bundle_").is_none());
        assert!(activity.method_by_name("OnLowMemory").is_some());

        // OnCreate, OnKeyDown, OnToggle, n_Activate, n_Finalize
        assert_eq!(entry_points.len(), 5);
        assert_eq!(entry_points.iter().filter(|e| e.is_wrapper).count(), 2);

        let toggle = registrations
            .callable_methods()
            .find(|m| m.callback_name == "n_OnToggle_Z")
            .unwrap();
        assert_eq!(toggle.targets[0].wrapper, Some(toggle_wrapper.token));

        for (byte, flag) in [(0, 0), (1, 1)] {
            assert_eq!(
                execute(android, toggle_wrapper.token, &[0, 0, byte]),
                execute(android, toggle.targets[0].callback, &[0, 0, flag])
            );
        }

        // the application module declares no callbacks
        assert!(modules[1].member_refs.is_empty());
    }

    #[test]
    fn rewriting_twice_reuses_wrappers() {
        let mut modules = vec![
            mono_android_module(TargetArch::None),
            activity_module(TargetArch::None),
        ];
        let attribute = MarshalAttribute::default();
        let diagnostics = Diagnostics::new();
        let rewriter = SignatureRewriter::new(&attribute, &diagnostics);
        let provider = interop_services_module();

        let mut registrations = classify(&modules);
        rewriter.rewrite(&mut modules, &provider, &mut registrations).unwrap();
        let methods_after_first = modules[0].max_method_rid();

        rewriter.rewrite(&mut modules, &provider, &mut registrations).unwrap();
        assert_eq!(modules[0].max_method_rid(), methods_after_first);
        assert_eq!(modules[0].member_refs.len(), 1);
    }

    #[test]
    fn public_scaffolding_is_kept() {
        let mut android = mono_android_module(TargetArch::None);
        let activity = android.find_type_mut("Android.App.Activity").unwrap();
        let connector = activity
            .methods
            .iter_mut()
            .find(|m| m.name == "GetOnToggle_ZHandler")
            .unwrap();
        connector.flags = MethodAttributes::PUBLIC | MethodAttributes::STATIC;

        let mut modules = vec![android, activity_module(TargetArch::None)];
        let mut registrations = classify(&modules);
        let attribute = MarshalAttribute::default();
        let diagnostics = Diagnostics::new();

        SignatureRewriter::new(&attribute, &diagnostics)
            .rewrite(&mut modules, &interop_services_module(), &mut registrations)
            .unwrap();

        let activity = modules[0].find_type("Android.App.Activity").unwrap();
        assert!(activity.method_by_name("GetOnToggle_ZHandler").is_some());
        assert!(activity.field_by_name("cb_onToggle_Z").is_some());

        let warnings = diagnostics.by_category(DiagnosticCategory::Scaffolding);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("GetOnToggle_ZHandler"));
    }

    #[test]
    fn missing_attribute_constructor() {
        let mut modules = vec![
            mono_android_module(TargetArch::None),
            activity_module(TargetArch::None),
        ];
        let mut registrations = classify(&modules);
        let attribute = MarshalAttribute::default();
        let diagnostics = Diagnostics::new();

        let provider = ModuleDefinition::new("Empty.dll", "Empty", TargetArch::None);
        match SignatureRewriter::new(&attribute, &diagnostics)
            .rewrite(&mut modules, &provider, &mut registrations)
            .unwrap_err()
        {
            Error::MissingAttributeConstructor { attribute, module } => {
                assert!(attribute.ends_with("UnmanagedCallersOnlyAttribute"));
                assert_eq!(module, "Empty.dll");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn per_arch_modules_are_rewritten_independently() {
        let mut modules = vec![
            mono_android_module(TargetArch::Arm64),
            mono_android_module(TargetArch::X86),
            activity_module(TargetArch::Arm64),
            activity_module(TargetArch::X86),
        ];
        let mut registrations = classify(&modules);
        let attribute = MarshalAttribute::default();
        let diagnostics = Diagnostics::new();

        let entry_points = SignatureRewriter::new(&attribute, &diagnostics)
            .rewrite(&mut modules, &interop_services_module(), &mut registrations)
            .unwrap();

        assert_eq!(entry_points.len(), 10);
        for module in &modules[..2] {
            let activity = module.find_type("Android.App.Activity").unwrap();
            assert!(activity.method_by_name("n_OnKeyDown_ILandroid_view_KeyEvent__mm_wrapper").is_some());
        }
    }

    #[test]
    fn wrapper_only_where_the_callback_needs_one() {
        let mut x86 = mono_android_module(TargetArch::X86);
        x86.find_type_mut("Android.App.Activity")
            .unwrap()
            .methods
            .iter_mut()
            .find(|m| m.name == "n_OnCreate_Landroid_os_Bundle_")
            .unwrap()
            .signature
            .return_type = TypeSignature::Boolean;

        let mut modules = vec![
            mono_android_module(TargetArch::Arm64),
            x86,
            activity_module(TargetArch::Arm64),
            activity_module(TargetArch::X86),
        ];
        let mut registrations = classify(&modules);
        let attribute = MarshalAttribute::default();
        let diagnostics = Diagnostics::new();

        let entry_points = SignatureRewriter::new(&attribute, &diagnostics)
            .rewrite(&mut modules, &interop_services_module(), &mut registrations)
            .unwrap();

        let on_create: Vec<_> = entry_points
            .iter()
            .filter(|e| e.jni_name == "onCreate")
            .map(|e| (e.arch, e.is_wrapper))
            .collect();
        assert_eq!(on_create.len(), 2);
        assert!(on_create.contains(&(TargetArch::Arm64, false)));
        assert!(on_create.contains(&(TargetArch::X86, true)));

        let wrapper = "n_OnCreate_Landroid_os_Bundle__mm_wrapper";
        assert!(modules[0].find_type("Android.App.Activity").unwrap().method_by_name(wrapper).is_none());
        assert!(modules[1].find_type("Android.App.Activity").unwrap().method_by_name(wrapper).is_some());
    }

    #[test]
    fn write_modules_replaces_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut module = mono_android_module(TargetArch::None);
        let path = dir.path().join("Mono.Android.pwmd");
        std::fs::write(&path, b"old").unwrap();
        module.path = Some(path.clone());

        let written = write_modules([&module]).unwrap();
        assert_eq!(written, vec![path.clone()]);

        let reloaded = ModuleDefinition::from_file(&path).unwrap();
        assert_eq!(reloaded.types, module.types);
        assert!(!dir.path().join("Mono.Android.pwmd.new").exists());
    }

    #[test]
    fn failed_batch_leaves_originals() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("Good.pwmd");
        std::fs::write(&good, b"original").unwrap();

        let mut first = mono_android_module(TargetArch::None);
        first.path = Some(good.clone());
        let mut second = activity_module(TargetArch::None);
        second.path = Some(dir.path().join("missing-dir").join("App.pwmd"));

        assert!(write_modules([&first, &second]).is_err());
        assert_eq!(std::fs::read(&good).unwrap(), b"original");
        assert!(!dir.path().join("Good.pwmd.new").exists());
    }
}
