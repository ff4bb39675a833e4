//! Compiled module model.
//!
//! A [`ModuleDefinition`] is one compiled unit as delivered by the build: its identity, the
//! target architecture it was compiled for, its type definitions and the member references
//! it imports. Loading from and persisting to disk go through [`crate::metadata::format`].

use std::path::{Path, PathBuf};

use uguid::Guid;

use crate::{
    arch::TargetArch,
    file::Input,
    metadata::{
        format,
        method::MethodDefinition,
        signatures::MethodSignature,
        token::Token,
        typedef::TypeDefinition,
    },
    Result,
};

/// A reference to a method defined in another module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    /// Member reference token (`0x0Axxxxxx`)
    pub token: Token,
    /// Full name of the type declaring the member
    pub class: String,
    /// Member name
    pub name: String,
    /// Name of the assembly declaring the member
    pub scope: String,
    /// Member signature
    pub signature: MethodSignature,
}

/// One compiled module, tagged with its target architecture.
#[derive(Debug, Clone)]
pub struct ModuleDefinition {
    /// File name of the module, e.g. `Mono.Android.dll`
    pub name: String,
    /// Name of the assembly the module belongs to
    pub assembly_name: String,
    /// Module version identifier
    pub mvid: Guid,
    /// Location the module was loaded from, if any
    pub path: Option<PathBuf>,
    /// Target architecture, [`TargetArch::None`] for agnostic modules
    pub arch: TargetArch,
    /// Top-level type definitions
    pub types: Vec<TypeDefinition>,
    /// Imported member references
    pub member_refs: Vec<MemberRef>,
    /// Row number the next added method receives
    pub next_method_rid: u32,
}

impl ModuleDefinition {
    /// Creates an empty module
    pub fn new(
        name: impl Into<String>,
        assembly_name: impl Into<String>,
        arch: TargetArch,
    ) -> Self {
        ModuleDefinition {
            name: name.into(),
            assembly_name: assembly_name.into(),
            mvid: Guid::ZERO,
            path: None,
            arch,
            types: Vec::new(),
            member_refs: Vec::new(),
            next_method_rid: 1,
        }
    }

    /// Loads a module from a file on disk.
    ///
    /// The file is memory-mapped while it is parsed; the resulting model owns its data.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::FileError`] if the file cannot be read and
    /// [`crate::Error::Malformed`] if it is not a valid module image.
    pub fn from_file(path: impl AsRef<Path>) -> Result<ModuleDefinition> {
        let path = path.as_ref();
        let input = Input::from_file(path)?;

        let mut module = format::read_module(input.data(), input.name())?;
        module.path = Some(path.to_path_buf());
        Ok(module)
    }

    /// Parses a module image held in memory.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] if the data is not a valid module image.
    pub fn from_mem(data: &[u8], name: &str) -> Result<ModuleDefinition> {
        format::read_module(data, name)
    }

    /// Serializes the module into its binary image.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        format::write_module(self)
    }

    /// Name used in messages: the path if known, otherwise the module name
    #[must_use]
    pub fn display_name(&self) -> String {
        match &self.path {
            Some(path) => path.display().to_string(),
            None => self.name.clone(),
        }
    }

    /// Every type in the module with its full name, outer types before their nested types.
    #[must_use]
    pub fn all_types(&self) -> Vec<(String, &TypeDefinition)> {
        fn visit<'a>(
            ty: &'a TypeDefinition,
            full_name: String,
            out: &mut Vec<(String, &'a TypeDefinition)>,
        ) {
            for nested in &ty.nested_types {
                let nested_name = nested.nested_full_name(&full_name);
                out.push((nested_name.clone(), nested));
                visit(nested, nested_name, out);
            }
        }

        let mut out = Vec::new();
        for ty in &self.types {
            let full_name = ty.full_name();
            out.push((full_name.clone(), ty));
            visit(ty, full_name, &mut out);
        }
        out
    }

    /// Finds a type by its full name.
    #[must_use]
    pub fn find_type(&self, full_name: &str) -> Option<&TypeDefinition> {
        self.all_types()
            .into_iter()
            .find(|(name, _)| name == full_name)
            .map(|(_, ty)| ty)
    }

    /// Finds a type by its full name for modification.
    pub fn find_type_mut(&mut self, full_name: &str) -> Option<&mut TypeDefinition> {
        fn search<'a>(
            ty: &'a mut TypeDefinition,
            name: String,
            target: &str,
        ) -> Option<&'a mut TypeDefinition> {
            if name == target {
                return Some(ty);
            }
            if !target.starts_with(name.as_str()) {
                return None;
            }
            for nested in &mut ty.nested_types {
                let nested_name = nested.nested_full_name(&name);
                if let Some(found) = search(nested, nested_name, target) {
                    return Some(found);
                }
            }
            None
        }

        for ty in &mut self.types {
            let name = ty.full_name();
            if let Some(found) = search(ty, name, full_name) {
                return Some(found);
            }
        }
        None
    }

    /// Finds a method definition by token anywhere in the module.
    #[must_use]
    pub fn method(&self, token: Token) -> Option<&MethodDefinition> {
        self.all_types()
            .into_iter()
            .find_map(|(_, ty)| ty.method_by_token(token))
    }

    /// Finds a member reference by token
    #[must_use]
    pub fn member_ref(&self, token: Token) -> Option<&MemberRef> {
        self.member_refs.iter().find(|r| r.token == token)
    }

    /// Reserves a new method definition token.
    pub fn allocate_method_token(&mut self) -> Token {
        let token = Token::from_parts(Token::METHOD_DEF, self.next_method_rid);
        self.next_method_rid += 1;
        token
    }

    /// Returns the token of a member reference, adding it if the module does not import it yet.
    pub fn import_member_ref(
        &mut self,
        class: &str,
        name: &str,
        scope: &str,
        signature: &MethodSignature,
    ) -> Token {
        if let Some(existing) = self.member_refs.iter().find(|r| {
            r.class == class && r.name == name && r.scope == scope && r.signature == *signature
        }) {
            return existing.token;
        }

        let token = Token::from_parts(Token::MEMBER_REF, self.member_refs.len() as u32 + 1);
        self.member_refs.push(MemberRef {
            token,
            class: class.to_string(),
            name: name.to_string(),
            scope: scope.to_string(),
            signature: signature.clone(),
        });
        token
    }

    /// Highest method row number in use, used to restore `next_method_rid` after loading.
    #[must_use]
    pub fn max_method_rid(&self) -> u32 {
        self.all_types()
            .iter()
            .flat_map(|(_, ty)| ty.methods.iter())
            .map(|m| m.token.row())
            .max()
            .unwrap_or(0)
    }
}
