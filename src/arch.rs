//! Target architectures and their native code generation properties.
//!
//! Every compiled module fed into the pipeline is tagged with a [`TargetArch`]. Modules that
//! are shared by all architectures carry [`TargetArch::None`] ("ABI-agnostic"); everything else
//! belongs to exactly one CPU architecture. The architecture also decides the pointer width
//! used by native structure layouts and by the DSO name hashes.
//!
//! # ABI names
//!
//! Build inputs name architectures by their Android ABI string. [`TargetArch::from_abi`]
//! accepts those and reports anything else as [`crate::Error::UnsupportedAbi`]:
//!
//! | ABI            | Architecture            | Blob file component |
//! |----------------|-------------------------|---------------------|
//! | (empty)        | [`TargetArch::None`]    | -                   |
//! | `armeabi-v7a`  | [`TargetArch::Arm`]     | `armeabi_v7a`       |
//! | `arm64-v8a`    | [`TargetArch::Arm64`]   | `arm64_v8a`         |
//! | `x86`          | [`TargetArch::X86`]     | `x86`               |
//! | `x86_64`       | [`TargetArch::X86_64`]  | `x86_64`            |

use strum::{Display, EnumIter, EnumString};

use crate::{Error, Result};

/// A CPU architecture a compiled module or native output targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, EnumIter)]
pub enum TargetArch {
    /// Architecture-agnostic content
    #[strum(serialize = "none")]
    None,
    /// 32-bit ARM (`armeabi-v7a`)
    #[strum(serialize = "arm")]
    Arm,
    /// 64-bit ARM (`arm64-v8a`)
    #[strum(serialize = "arm64")]
    Arm64,
    /// 32-bit x86
    #[strum(serialize = "x86")]
    X86,
    /// 64-bit x86
    #[strum(serialize = "x86_64")]
    X86_64,
}

/// Width of a native pointer on the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerWidth {
    /// 4-byte pointers
    Bits32,
    /// 8-byte pointers
    Bits64,
}

impl PointerWidth {
    /// Size of a pointer in bytes
    #[must_use]
    pub fn bytes(self) -> u64 {
        match self {
            PointerWidth::Bits32 => 4,
            PointerWidth::Bits64 => 8,
        }
    }

    /// Returns true for 64-bit targets
    #[must_use]
    pub fn is_64bit(self) -> bool {
        self == PointerWidth::Bits64
    }
}

impl TargetArch {
    /// Map an Android ABI name to an architecture.
    ///
    /// An empty ABI string means the module is architecture-agnostic.
    ///
    /// # Arguments
    ///
    /// * `abi` - The ABI string attached to the module (may be empty)
    /// * `module` - Module name, used for the error message
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UnsupportedAbi`] for unknown ABI names.
    pub fn from_abi(abi: &str, module: &str) -> Result<TargetArch> {
        match abi {
            "" => Ok(TargetArch::None),
            "armeabi-v7a" => Ok(TargetArch::Arm),
            "arm64-v8a" => Ok(TargetArch::Arm64),
            "x86" => Ok(TargetArch::X86),
            "x86_64" => Ok(TargetArch::X86_64),
            _ => Err(Error::UnsupportedAbi {
                abi: abi.to_string(),
                module: module.to_string(),
            }),
        }
    }

    /// The Android ABI name, `None` for agnostic content.
    #[must_use]
    pub fn abi(self) -> Option<&'static str> {
        match self {
            TargetArch::None => None,
            TargetArch::Arm => Some("armeabi-v7a"),
            TargetArch::Arm64 => Some("arm64-v8a"),
            TargetArch::X86 => Some("x86"),
            TargetArch::X86_64 => Some("x86_64"),
        }
    }

    /// The ABI name as used in file names (dashes replaced by underscores).
    #[must_use]
    pub fn file_component(self) -> Option<String> {
        self.abi().map(|abi| abi.replace('-', "_"))
    }

    /// Inverse of [`TargetArch::file_component`].
    #[must_use]
    pub fn from_file_component(component: &str) -> Option<TargetArch> {
        match component {
            "armeabi_v7a" => Some(TargetArch::Arm),
            "arm64_v8a" => Some(TargetArch::Arm64),
            "x86" => Some(TargetArch::X86),
            "x86_64" => Some(TargetArch::X86_64),
            _ => None,
        }
    }

    /// Returns true for architecture-agnostic content
    #[must_use]
    pub fn is_agnostic(self) -> bool {
        self == TargetArch::None
    }

    /// Pointer width of the architecture.
    ///
    /// Agnostic content has no pointer width of its own; it is treated as 64-bit.
    #[must_use]
    pub fn pointer_width(self) -> PointerWidth {
        match self {
            TargetArch::Arm | TargetArch::X86 => PointerWidth::Bits32,
            TargetArch::None | TargetArch::Arm64 | TargetArch::X86_64 => PointerWidth::Bits64,
        }
    }
}
