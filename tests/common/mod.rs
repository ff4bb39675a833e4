//! Fixture modules built through the public module model.

#![allow(dead_code)]

use peerweave::{
    assembly::{InstructionBuilder, Op},
    metadata::{
        method::{MethodAttributes, MethodDefinition, RegisterInfo},
        module::ModuleDefinition,
        signatures::{MethodSignature, TypeSignature},
        token::Token,
        typedef::{FieldAttributes, FieldDefinition, TypeAttributes, TypeDefinition},
    },
    TargetArch,
};

pub const MARKER: &str = "System.Runtime.InteropServices.UnmanagedCallersOnlyAttribute";

pub fn class(rid: u32, namespace: &str, name: &str, base: &str) -> TypeDefinition {
    let mut ty = TypeDefinition::new(
        Token::from_parts(Token::TYPE_DEF, rid),
        namespace,
        name,
        TypeAttributes::PUBLIC,
    );
    ty.base_type = Some(base.to_string());
    ty
}

fn interface(rid: u32, namespace: &str, name: &str, extends: &[&str]) -> TypeDefinition {
    let mut ty = TypeDefinition::new(
        Token::from_parts(Token::TYPE_DEF, rid),
        namespace,
        name,
        TypeAttributes::PUBLIC | TypeAttributes::INTERFACE | TypeAttributes::ABSTRACT,
    );
    ty.interfaces = extends.iter().map(|s| (*s).to_string()).collect();
    ty
}

fn method(rid: u32, name: &str, flags: MethodAttributes, signature: MethodSignature) -> MethodDefinition {
    MethodDefinition::new(Token::from_parts(Token::METHOD_DEF, rid), name, flags, signature)
}

fn overridable() -> MethodAttributes {
    MethodAttributes::FAMILY | MethodAttributes::VIRTUAL | MethodAttributes::HIDE_BY_SIG
}

fn private_static() -> MethodAttributes {
    MethodAttributes::PRIVATE | MethodAttributes::STATIC | MethodAttributes::HIDE_BY_SIG
}

/// A bound method of the binding assembly together with its scaffolding.
pub struct Binding<'a> {
    pub name: &'a str,
    pub jni_name: &'a str,
    pub jni_signature: &'a str,
    pub core: &'a str,
    pub managed: MethodSignature,
    pub callback: MethodSignature,
    pub body: &'a [Op],
}

fn bind(ty: &mut TypeDefinition, rid: &mut u32, field_rid: u32, binding: Binding<'_>) {
    let register = RegisterInfo {
        jni_name: binding.jni_name.to_string(),
        jni_signature: binding.jni_signature.to_string(),
        connector: Some(format!("Get{}Handler", binding.core)),
    };
    let field_name = register.callback_field_name().unwrap_or_default();
    let delegate = TypeSignature::Class("System.Delegate".to_string());

    let mut managed = method(*rid, binding.name, overridable() | MethodAttributes::NEW_SLOT, binding.managed);
    managed.register = Some(register);
    ty.methods.push(managed);
    ty.methods.push(method(
        *rid + 1,
        &format!("Get{}Handler", binding.core),
        private_static(),
        MethodSignature::new_static(delegate.clone(), vec![]),
    ));

    let mut builder = InstructionBuilder::new(&binding.callback);
    for op in binding.body {
        builder.emit(*op).unwrap();
    }
    let mut callback = method(*rid + 2, &format!("n_{}", binding.core), private_static(), binding.callback);
    callback.body = Some(builder.finish().unwrap());
    ty.methods.push(callback);

    ty.fields.push(FieldDefinition {
        token: Token::from_parts(Token::FIELD, field_rid),
        name: field_name,
        flags: FieldAttributes::PRIVATE | FieldAttributes::STATIC,
        field_type: delegate,
    });
    *rid += 3;
}

/// Peer roots plus `Android.App.Activity` with `OnCreate(Bundle)` and `OnToggle(bool) -> bool`.
pub fn binding_module(arch: TargetArch) -> ModuleDefinition {
    binding_module_with(arch, Vec::new())
}

/// The binding module with additional bindings on `Activity`.
pub fn binding_module_with(arch: TargetArch, extra: Vec<Binding<'_>>) -> ModuleDefinition {
    let mut module = ModuleDefinition::new("Mono.Android.dll", "Mono.Android", arch);

    let peerable = interface(2, "Java.Interop", "IJavaPeerable", &[]);
    let marker = interface(3, "Android.Runtime", "IJavaObject", &["Java.Interop.IJavaPeerable"]);
    let mut object = class(4, "Java.Lang", "Object", "System.Object");
    object.interfaces = vec!["Android.Runtime.IJavaObject".to_string()];
    let mut throwable = class(5, "Java.Lang", "Throwable", "System.Exception");
    throwable.interfaces = vec!["Android.Runtime.IJavaObject".to_string()];
    let bundle = class(6, "Android.OS", "Bundle", "Java.Lang.Object");

    let mut activity = class(7, "Android.App", "Activity", "Java.Lang.Object");
    let mut rid = 1;
    bind(
        &mut activity,
        &mut rid,
        1,
        Binding {
            name: "OnCreate",
            jni_name: "onCreate",
            jni_signature: "(Landroid/os/Bundle;)V",
            core: "OnCreate_Landroid_os_Bundle_",
            managed: MethodSignature::new_instance(
                TypeSignature::Void,
                vec![TypeSignature::Class("Android.OS.Bundle".to_string())],
            ),
            callback: MethodSignature::new_static(TypeSignature::Void, vec![TypeSignature::I; 3]),
            body: &[Op::Ret],
        },
    );
    bind(
        &mut activity,
        &mut rid,
        2,
        Binding {
            name: "OnToggle",
            jni_name: "onToggle",
            jni_signature: "(Z)Z",
            core: "OnToggle_Z",
            managed: MethodSignature::new_instance(TypeSignature::Boolean, vec![TypeSignature::Boolean]),
            callback: MethodSignature::new_static(
                TypeSignature::Boolean,
                vec![TypeSignature::I, TypeSignature::I, TypeSignature::Boolean],
            ),
            body: &[Op::LdArg(2), Op::LdcI4(0), Op::Ceq, Op::Ret],
        },
    );
    for (index, binding) in extra.into_iter().enumerate() {
        bind(&mut activity, &mut rid, 3 + index as u32, binding);
    }

    module.types = vec![peerable, marker, object, throwable, bundle, activity];
    module.next_method_rid = rid;
    module
}

/// An application module whose `MainActivity` overrides the given `(name, signature)` pairs.
pub fn app_module(name: &str, arch: TargetArch, overrides: &[(&str, MethodSignature)]) -> ModuleDefinition {
    let mut module = ModuleDefinition::new(format!("{name}.dll"), name, arch);
    let mut main = class(2, "MyApp", "MainActivity", "Android.App.Activity");
    for (index, (method_name, signature)) in overrides.iter().enumerate() {
        main.methods.push(method(index as u32 + 1, method_name, overridable(), signature.clone()));
    }
    module.next_method_rid = overrides.len() as u32 + 1;
    module.types = vec![main];
    module
}

/// The standard overrides of `OnCreate` and `OnToggle`
pub fn activity_overrides() -> Vec<(&'static str, MethodSignature)> {
    vec![
        (
            "OnCreate",
            MethodSignature::new_instance(
                TypeSignature::Void,
                vec![TypeSignature::Class("Android.OS.Bundle".to_string())],
            ),
        ),
        (
            "OnToggle",
            MethodSignature::new_instance(TypeSignature::Boolean, vec![TypeSignature::Boolean]),
        ),
    ]
}

/// The module providing the native entry point marker.
pub fn marker_provider() -> ModuleDefinition {
    let mut module = ModuleDefinition::new(
        "System.Runtime.InteropServices.dll",
        "System.Runtime.InteropServices",
        TargetArch::None,
    );
    let mut attribute = class(
        2,
        "System.Runtime.InteropServices",
        "UnmanagedCallersOnlyAttribute",
        "System.Attribute",
    );
    attribute.methods.push(method(
        1,
        ".ctor",
        MethodAttributes::PUBLIC | MethodAttributes::HIDE_BY_SIG | MethodAttributes::SPECIAL_NAME | MethodAttributes::RT_SPECIAL_NAME,
        MethodSignature::new_instance(TypeSignature::Void, vec![]),
    ));
    module.types = vec![attribute];
    module.next_method_rid = 2;
    module
}
