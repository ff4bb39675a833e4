use crate::{
    arch::TargetArch,
    assembly::{InstructionBuilder, Op},
    metadata::{
        method::{MethodAttributes, MethodBody, MethodDefinition, RegisterInfo},
        module::ModuleDefinition,
        signatures::{MethodSignature, TypeSignature},
        token::Token,
        typedef::{FieldAttributes, FieldDefinition, TypeAttributes, TypeDefinition},
    },
};

pub const INTEROP_ATTRIBUTE: &str = "System.Runtime.InteropServices.UnmanagedCallersOnlyAttribute";
pub const INTEROP_MODULE: &str = "System.Runtime.InteropServices";

// Helper function to create a class with a base type
pub fn create_class(rid: u32, namespace: &str, name: &str, base: &str) -> TypeDefinition {
    let mut ty = TypeDefinition::new(
        Token::from_parts(Token::TYPE_DEF, rid),
        namespace,
        name,
        TypeAttributes::PUBLIC,
    );
    ty.base_type = Some(base.to_string());
    ty
}

// Helper function to create an interface
pub fn create_interface(rid: u32, namespace: &str, name: &str, extends: &[&str]) -> TypeDefinition {
    let mut ty = TypeDefinition::new(
        Token::from_parts(Token::TYPE_DEF, rid),
        namespace,
        name,
        TypeAttributes::PUBLIC | TypeAttributes::INTERFACE | TypeAttributes::ABSTRACT,
    );
    ty.interfaces = extends.iter().map(|s| (*s).to_string()).collect();
    ty
}

// Helper function to create a method definition
pub fn create_method(
    rid: u32,
    name: &str,
    flags: MethodAttributes,
    signature: MethodSignature,
) -> MethodDefinition {
    MethodDefinition::new(
        Token::from_parts(Token::METHOD_DEF, rid),
        name,
        flags,
        signature,
    )
}

// Helper function to create a field definition
pub fn create_field(rid: u32, name: &str, flags: FieldAttributes, field_type: TypeSignature) -> FieldDefinition {
    FieldDefinition {
        token: Token::from_parts(Token::FIELD, rid),
        name: name.to_string(),
        flags,
        field_type,
    }
}

/// Builds a body from ops that contain no calls
pub fn create_body(signature: &MethodSignature, ops: &[Op]) -> MethodBody {
    let mut builder = InstructionBuilder::new(signature);
    for op in ops {
        builder.emit(*op).unwrap();
    }
    builder.finish().unwrap()
}

fn virtual_flags() -> MethodAttributes {
    MethodAttributes::FAMILY | MethodAttributes::VIRTUAL | MethodAttributes::HIDE_BY_SIG
}

fn scaffolding_flags() -> MethodAttributes {
    MethodAttributes::PRIVATE | MethodAttributes::STATIC | MethodAttributes::HIDE_BY_SIG
}

fn delegate() -> TypeSignature {
    TypeSignature::Class("System.Delegate".to_string())
}

/// Adds a bound method to `ty` together with its connector, native callback and backing field.
///
/// Returns the next free method rid.
fn add_bound_method(
    ty: &mut TypeDefinition,
    rid: u32,
    field_rid: u32,
    name: &str,
    register: RegisterInfo,
    managed: MethodSignature,
    callback: MethodSignature,
    callback_ops: &[Op],
) -> u32 {
    let core = register.connector_core().unwrap().to_string();
    let connector = register.connector.clone().unwrap();
    let field = register.callback_field_name().unwrap();

    let mut method = create_method(rid, name, virtual_flags() | MethodAttributes::NEW_SLOT, managed);
    method.register = Some(register);
    ty.methods.push(method);

    ty.methods.push(create_method(
        rid + 1,
        &connector,
        scaffolding_flags(),
        MethodSignature::new_static(delegate(), vec![]),
    ));

    let mut native = create_method(rid + 2, &format!("n_{core}"), scaffolding_flags(), callback.clone());
    native.body = Some(create_body(&callback, callback_ops));
    ty.methods.push(native);

    ty.fields.push(create_field(
        field_rid,
        &field,
        FieldAttributes::PRIVATE | FieldAttributes::STATIC,
        delegate(),
    ));

    rid + 3
}

/// The binding assembly: peer roots, marker interfaces and `Android.App.Activity`.
///
/// `Activity` declares three bound methods with their scaffolding:
/// - `OnCreate(Bundle)`, whose callback `(I, I, I) -> void` is blittable
/// - `OnKeyDown(int, KeyEvent) -> bool`, whose callback returns `bool`
/// - `OnToggle(bool) -> bool`, whose callback negates its argument
///
/// and `OnLowMemory()`, registered through a connector in another assembly.
pub fn mono_android_module(arch: TargetArch) -> ModuleDefinition {
    let mut module = ModuleDefinition::new("Mono.Android.dll", "Mono.Android", arch);

    let peerable = create_interface(2, "Java.Interop", "IJavaPeerable", &[]);
    let java_object_iface =
        create_interface(3, "Android.Runtime", "IJavaObject", &["Java.Interop.IJavaPeerable"]);

    let mut object = create_class(4, "Java.Lang", "Object", "System.Object");
    object.interfaces = vec!["Android.Runtime.IJavaObject".to_string()];
    object.methods.push(create_method(
        1,
        "n_Finalize",
        scaffolding_flags(),
        MethodSignature::new_static(TypeSignature::Void, vec![TypeSignature::I, TypeSignature::I]),
    ));

    let mut throwable = create_class(5, "Java.Lang", "Throwable", "System.Exception");
    throwable.interfaces = vec!["Android.Runtime.IJavaObject".to_string()];

    let bundle = create_class(6, "Android.OS", "Bundle", "Java.Lang.Object");
    let key_event = create_class(8, "Android.Views", "KeyEvent", "Java.Lang.Object");

    let mut type_manager = create_class(9, "Java.Interop", "TypeManager", "System.Object");
    let mut java_type_manager = create_class(10, "", "JavaTypeManager", "Java.Lang.Object");
    java_type_manager.flags = TypeAttributes::NESTED_PUBLIC;
    java_type_manager.methods.push(create_method(
        2,
        "n_Activate",
        scaffolding_flags(),
        MethodSignature::new_static(TypeSignature::Void, vec![TypeSignature::I; 6]),
    ));
    type_manager.nested_types.push(java_type_manager);

    let mut activity = create_class(7, "Android.App", "Activity", "Java.Lang.Object");
    let mut rid = 3;
    rid = add_bound_method(
        &mut activity,
        rid,
        1,
        "OnCreate",
        RegisterInfo {
            jni_name: "onCreate".to_string(),
            jni_signature: "(Landroid/os/Bundle;)V".to_string(),
            connector: Some("GetOnCreate_Landroid_os_Bundle_Handler".to_string()),
        },
        MethodSignature::new_instance(
            TypeSignature::Void,
            vec![TypeSignature::Class("Android.OS.Bundle".to_string())],
        ),
        MethodSignature::new_static(TypeSignature::Void, vec![TypeSignature::I; 3]),
        &[Op::Ret],
    );
    rid = add_bound_method(
        &mut activity,
        rid,
        2,
        "OnKeyDown",
        RegisterInfo {
            jni_name: "onKeyDown".to_string(),
            jni_signature: "(ILandroid/view/KeyEvent;)Z".to_string(),
            connector: Some("GetOnKeyDown_ILandroid_view_KeyEvent_Handler".to_string()),
        },
        MethodSignature::new_instance(
            TypeSignature::Boolean,
            vec![
                TypeSignature::I4,
                TypeSignature::Class("Android.Views.KeyEvent".to_string()),
            ],
        ),
        MethodSignature::new_static(
            TypeSignature::Boolean,
            vec![TypeSignature::I, TypeSignature::I, TypeSignature::I4, TypeSignature::I],
        ),
        // keyCode > 0
        &[Op::LdArg(2), Op::LdcI4(0), Op::Cgt, Op::Ret],
    );
    rid = add_bound_method(
        &mut activity,
        rid,
        3,
        "OnToggle",
        RegisterInfo {
            jni_name: "onToggle".to_string(),
            jni_signature: "(Z)Z".to_string(),
            connector: Some("GetOnToggle_ZHandler".to_string()),
        },
        MethodSignature::new_instance(TypeSignature::Boolean, vec![TypeSignature::Boolean]),
        MethodSignature::new_static(
            TypeSignature::Boolean,
            vec![TypeSignature::I, TypeSignature::I, TypeSignature::Boolean],
        ),
        // !value
        &[Op::LdArg(2), Op::LdcI4(0), Op::Ceq, Op::Ret],
    );

    let mut low_memory = create_method(
        rid,
        "OnLowMemory",
        virtual_flags() | MethodAttributes::NEW_SLOT,
        MethodSignature::new_instance(TypeSignature::Void, vec![]),
    );
    low_memory.register = Some(RegisterInfo {
        jni_name: "onLowMemory".to_string(),
        jni_signature: "()V".to_string(),
        connector: Some(
            "GetOnLowMemoryHandler:Android.Content.IComponentCallbacksInvoker, Mono.Android"
                .to_string(),
        ),
    });
    activity.methods.push(low_memory);

    module.types = vec![
        peerable,
        java_object_iface,
        object,
        throwable,
        bundle,
        activity,
        key_event,
        type_manager,
    ];
    module.next_method_rid = rid + 1;
    module
}

/// The application assembly overriding the bound `Activity` methods.
pub fn activity_module(arch: TargetArch) -> ModuleDefinition {
    let mut module = ModuleDefinition::new("App.dll", "App", arch);

    let mut main = create_class(2, "MyApp", "MainActivity", "Android.App.Activity");
    main.methods = vec![
        create_method(
            1,
            "OnCreate",
            virtual_flags(),
            MethodSignature::new_instance(
                TypeSignature::Void,
                vec![TypeSignature::Class("Android.OS.Bundle".to_string())],
            ),
        ),
        create_method(
            2,
            "OnKeyDown",
            virtual_flags(),
            MethodSignature::new_instance(
                TypeSignature::Boolean,
                vec![
                    TypeSignature::I4,
                    TypeSignature::Class("Android.Views.KeyEvent".to_string()),
                ],
            ),
        ),
        create_method(
            3,
            "OnToggle",
            virtual_flags(),
            MethodSignature::new_instance(TypeSignature::Boolean, vec![TypeSignature::Boolean]),
        ),
        create_method(
            4,
            "OnLowMemory",
            virtual_flags(),
            MethodSignature::new_instance(TypeSignature::Void, vec![]),
        ),
    ];

    let mut listener = create_class(3, "", "ClickListener", "Java.Lang.Object");
    listener.flags = TypeAttributes::NESTED_PUBLIC;
    main.nested_types.push(listener);

    let helper = create_class(4, "MyApp", "Helper", "System.Object");
    let exception = create_class(5, "MyApp", "AppException", "Java.Lang.Throwable");

    module.types = vec![main, helper, exception];
    module.next_method_rid = 5;
    module
}

/// A module whose `Foo` implements the foreign object marker while deriving from `System.Object`.
pub fn invalid_peer_module(arch: TargetArch) -> ModuleDefinition {
    let mut module = ModuleDefinition::new("Broken.dll", "Broken", arch);
    let mut foo = create_class(2, "", "Foo", "System.Object");
    foo.interfaces = vec!["Android.Runtime.IJavaObject".to_string()];
    module.types = vec![foo];
    module
}

/// The module providing the native entry point marker attribute.
pub fn interop_services_module() -> ModuleDefinition {
    let mut module = ModuleDefinition::new(
        "System.Runtime.InteropServices.dll",
        INTEROP_MODULE,
        TargetArch::None,
    );

    let mut attribute = create_class(
        2,
        "System.Runtime.InteropServices",
        "UnmanagedCallersOnlyAttribute",
        "System.Attribute",
    );
    attribute.flags |= TypeAttributes::SEALED;
    attribute.methods.push(create_method(
        1,
        ".ctor",
        MethodAttributes::PUBLIC
            | MethodAttributes::HIDE_BY_SIG
            | MethodAttributes::SPECIAL_NAME
            | MethodAttributes::RT_SPECIAL_NAME,
        MethodSignature::new_instance(TypeSignature::Void, vec![]),
    ));

    module.types = vec![attribute];
    module.next_method_rid = 2;
    module
}
