//! Method definitions, bodies and foreign registration information.

use bitflags::bitflags;

use crate::metadata::{
    signatures::MethodSignature,
    token::Token,
    typedef::{CustomAttribute, MEMBER_ACCESS_MASK},
};

bitflags! {
    /// Method attributes (ECMA-335 `MethodAttributes`, subset used by the pipeline).
    ///
    /// The low three bits hold the member access level; use [`MethodAttributes::access`]
    /// rather than `contains` to test them.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct MethodAttributes: u32 {
        /// Accessible only from the declaring type
        const PRIVATE = 0x0001;
        /// Accessible from the declaring assembly
        const ASSEMBLY = 0x0003;
        /// Accessible from the declaring type and subtypes
        const FAMILY = 0x0004;
        /// Accessible everywhere
        const PUBLIC = 0x0006;
        /// Method belongs to the type, not to instances
        const STATIC = 0x0010;
        /// Method cannot be overridden
        const FINAL = 0x0020;
        /// Method is virtual
        const VIRTUAL = 0x0040;
        /// Method hides by name and signature
        const HIDE_BY_SIG = 0x0080;
        /// Method always gets a new vtable slot
        const NEW_SLOT = 0x0100;
        /// Method has no implementation
        const ABSTRACT = 0x0400;
        /// Method name is special
        const SPECIAL_NAME = 0x0800;
        /// Runtime checks the name encoding
        const RT_SPECIAL_NAME = 0x1000;
    }
}

impl MethodAttributes {
    /// The member access level bits
    #[must_use]
    pub fn access(self) -> u32 {
        self.bits() & MEMBER_ACCESS_MASK
    }

    /// Returns true for private methods
    #[must_use]
    pub fn is_private(self) -> bool {
        self.access() == Self::PRIVATE.bits()
    }
}

/// Foreign registration information attached to a bound method.
///
/// Binding generators emit this for every managed method that stands in for a foreign
/// virtual method. The connector names a static method returning the delegate for the native
/// callback; a connector of the form `Name:Type, Assembly` lives in another assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterInfo {
    /// Foreign method name, e.g. `onCreate`
    pub jni_name: String,
    /// Foreign method signature, e.g. `(Landroid/os/Bundle;)V`
    pub jni_signature: String,
    /// Connector method name, `None` for non-overridable registrations
    pub connector: Option<String>,
}

impl RegisterInfo {
    /// Returns true if the connector refers to a method outside the declaring module
    #[must_use]
    pub fn has_external_connector(&self) -> bool {
        self.connector
            .as_deref()
            .is_some_and(|c| c.contains(':'))
    }

    /// Extracts the shared part of the scaffolding names from `Get<Core>Handler`.
    #[must_use]
    pub fn connector_core(&self) -> Option<&str> {
        self.connector
            .as_deref()?
            .strip_prefix("Get")?
            .strip_suffix("Handler")
            .filter(|core| !core.is_empty())
    }

    /// Name of the native callback (`n_<Core>`)
    #[must_use]
    pub fn callback_name(&self) -> Option<String> {
        self.connector_core().map(|core| format!("n_{core}"))
    }

    /// Name of the delegate backing field (`cb_<core>`, first letter lower-cased)
    #[must_use]
    pub fn callback_field_name(&self) -> Option<String> {
        let core = self.connector_core()?;
        let mut chars = core.chars();
        let first = chars.next()?;
        Some(format!("cb_{}{}", first.to_lowercase(), chars.as_str()))
    }
}

/// An encoded method body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodBody {
    /// CIL instruction stream
    pub code: Vec<u8>,
    /// Maximum evaluation stack depth
    pub max_stack: u16,
}

/// A method definition.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDefinition {
    /// Method token (`0x06xxxxxx`)
    pub token: Token,
    /// Method name
    pub name: String,
    /// Method attributes
    pub flags: MethodAttributes,
    /// Method signature
    pub signature: MethodSignature,
    /// Method body, `None` for abstract and extern methods
    pub body: Option<MethodBody>,
    /// Custom attributes applied to the method
    pub custom_attributes: Vec<CustomAttribute>,
    /// Foreign registration, if the method is bound to a foreign method
    pub register: Option<RegisterInfo>,
}

impl MethodDefinition {
    /// Creates a method without body, attributes or registration
    pub fn new(
        token: Token,
        name: impl Into<String>,
        flags: MethodAttributes,
        signature: MethodSignature,
    ) -> Self {
        MethodDefinition {
            token,
            name: name.into(),
            flags,
            signature,
            body: None,
            custom_attributes: Vec::new(),
            register: None,
        }
    }

    /// Returns true for static methods
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodAttributes::STATIC)
    }

    /// Returns true for private methods
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.flags.is_private()
    }

    /// Returns true for virtual methods
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.flags.contains(MethodAttributes::VIRTUAL)
    }

    /// Returns true for methods that introduce a new vtable slot
    #[must_use]
    pub fn is_new_slot(&self) -> bool {
        self.flags.contains(MethodAttributes::NEW_SLOT)
    }

    /// Returns true if the method carries an attribute of the given type
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

    fn register(connector: Option<&str>) -> RegisterInfo {
        RegisterInfo {
            jni_name: "onCreate".into(),
            jni_signature: "(Landroid/os/Bundle;)V".into(),
            connector: connector.map(str::to_string),
        }
    }

    #[test]
    fn scaffolding_names() {
        let info = register(Some("GetOnCreate_Landroid_os_Bundle_Handler"));
        assert_eq!(info.connector_core(), Some("OnCreate_Landroid_os_Bundle_"));
        assert_eq!(
            info.callback_name().as_deref(),
            Some("n_OnCreate_Landroid_os_Bundle_")
        );
        assert_eq!(
            info.callback_field_name().as_deref(),
            Some("cb_onCreate_Landroid_os_Bundle_")
        );
        assert!(!info.has_external_connector());
    }

    #[test]
    fn external_and_missing_connectors() {
        let external = register(Some(
            "GetOnCreateHandler:Android.App.IActivityInvoker, Mono.Android",
        ));
        assert!(external.has_external_connector());

        let missing = register(None);
        assert!(missing.callback_name().is_none());

        let odd = register(Some("Connector"));
        assert!(odd.connector_core().is_none());
    }

    #[test]
    fn method_access() {
        let flags = MethodAttributes::PRIVATE | MethodAttributes::STATIC;
        assert!(flags.is_private());

        let flags = MethodAttributes::PUBLIC | MethodAttributes::VIRTUAL;
        assert!(!flags.is_private());
        assert_eq!(flags.access(), 0x6);

        let flags = MethodAttributes::ASSEMBLY;
        assert!(!flags.is_private());
    }
}
