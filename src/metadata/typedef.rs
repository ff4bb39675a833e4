//! Type, field and custom attribute definitions.

use bitflags::bitflags;

use crate::metadata::{method::MethodDefinition, signatures::TypeSignature, token::Token};

bitflags! {
    /// Type attributes (ECMA-335 `TypeAttributes`, subset used by the pipeline).
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct TypeAttributes: u32 {
        /// Top-level type visible outside the assembly
        const PUBLIC = 0x0000_0001;
        /// Nested type visible outside the assembly
        const NESTED_PUBLIC = 0x0000_0002;
        /// Type is an interface
        const INTERFACE = 0x0000_0020;
        /// Type cannot be instantiated
        const ABSTRACT = 0x0000_0080;
        /// Type cannot be derived from
        const SEALED = 0x0000_0100;
    }
}

bitflags! {
    /// Field attributes (ECMA-335 `FieldAttributes`, subset used by the pipeline).
    ///
    /// The low three bits hold the member access level; use [`FieldAttributes::access`]
    /// rather than `contains` to test them.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct FieldAttributes: u32 {
        /// Accessible only from the declaring type
        const PRIVATE = 0x0001;
        /// Accessible from the declaring type and subtypes
        const FAMILY = 0x0004;
        /// Accessible everywhere
        const PUBLIC = 0x0006;
        /// Field belongs to the type, not to instances
        const STATIC = 0x0010;
        /// Field can only be set during initialization
        const INIT_ONLY = 0x0020;
    }
}

/// Mask of the member access bits shared by field and method attributes
pub const MEMBER_ACCESS_MASK: u32 = 0x0007;

impl FieldAttributes {
    /// The member access level bits
    #[must_use]
    pub fn access(self) -> u32 {
        self.bits() & MEMBER_ACCESS_MASK
    }

    /// Returns true for private fields
    #[must_use]
    pub fn is_private(self) -> bool {
        self.access() == Self::PRIVATE.bits()
    }

    /// Returns true for static fields
    #[must_use]
    pub fn is_static(self) -> bool {
        self.contains(Self::STATIC)
    }
}

/// A custom attribute applied to a type or method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomAttribute {
    /// Full name of the attribute type
    pub attribute_type: String,
    /// Constructor that instantiates the attribute (method definition or member reference)
    pub constructor: Token,
}

/// A field definition.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDefinition {
    /// Field token (`0x04xxxxxx`)
    pub token: Token,
    /// Field name
    pub name: String,
    /// Field attributes
    pub flags: FieldAttributes,
    /// Type of the field
    pub field_type: TypeSignature,
}

/// A type definition, with its members and nested types.
///
/// Type references (base type, interfaces) are stored by full name, using `+` to separate
/// nested type names from their declaring type (`Outer+Inner`).
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDefinition {
    /// Type token (`0x02xxxxxx`)
    pub token: Token,
    /// Namespace, empty for nested types
    pub namespace: String,
    /// Simple name
    pub name: String,
    /// Type attributes
    pub flags: TypeAttributes,
    /// Full name of the base type, `None` for interfaces and `System.Object`
    pub base_type: Option<String>,
    /// Full names of directly implemented interfaces
    pub interfaces: Vec<String>,
    /// Fields in declaration order
    pub fields: Vec<FieldDefinition>,
    /// Methods in declaration order
    pub methods: Vec<MethodDefinition>,
    /// Types declared inside this one
    pub nested_types: Vec<TypeDefinition>,
    /// Custom attributes applied to the type
    pub custom_attributes: Vec<CustomAttribute>,
}

impl TypeDefinition {
    /// Creates an empty type definition
    pub fn new(
        token: Token,
        namespace: impl Into<String>,
        name: impl Into<String>,
        flags: TypeAttributes,
    ) -> Self {
        TypeDefinition {
            token,
            namespace: namespace.into(),
            name: name.into(),
            flags,
            base_type: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            nested_types: Vec::new(),
            custom_attributes: Vec::new(),
        }
    }

    /// Full name of a top-level type (`Namespace.Name`, or `Name` without namespace)
    #[must_use]
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// Full name of this type when nested inside `declaring`
    #[must_use]
    pub fn nested_full_name(&self, declaring: &str) -> String {
        format!("{}+{}", declaring, self.name)
    }

    /// Returns true for interfaces
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.flags.contains(TypeAttributes::INTERFACE)
    }

    /// Finds a method by name
    #[must_use]
    pub fn method_by_name(&self, name: &str) -> Option<&MethodDefinition> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Finds a method by token
    #[must_use]
    pub fn method_by_token(&self, token: Token) -> Option<&MethodDefinition> {
        self.methods.iter().find(|m| m.token == token)
    }

    /// Finds a field by name
    #[must_use]
    pub fn field_by_name(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns true if the type carries an attribute of the given type
    #[must_use]
    pub fn has_attribute(&self, attribute_type: &str) -> bool {
        self.custom_attributes
            .iter()
            .any(|a| a.attribute_type == attribute_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_names() {
        let outer = TypeDefinition::new(
            Token(0x02000002),
            "MyApp",
            "MainActivity",
            TypeAttributes::PUBLIC,
        );
        assert_eq!(outer.full_name(), "MyApp.MainActivity");

        let inner = TypeDefinition::new(
            Token(0x02000003),
            "",
            "Listener",
            TypeAttributes::NESTED_PUBLIC,
        );
        assert_eq!(
            inner.nested_full_name(&outer.full_name()),
            "MyApp.MainActivity+Listener"
        );

        let global = TypeDefinition::new(Token(0x02000004), "", "Foo", TypeAttributes::empty());
        assert_eq!(global.full_name(), "Foo");
    }

    #[test]
    fn field_access() {
        let private_static = FieldAttributes::PRIVATE | FieldAttributes::STATIC;
        assert!(private_static.is_private());
        assert!(private_static.is_static());

        let public = FieldAttributes::PUBLIC | FieldAttributes::STATIC;
        assert!(!public.is_private());

        let family = FieldAttributes::FAMILY;
        assert!(!family.is_private());
        assert!(!family.is_static());
    }
}
