//! Per-architecture properties of the generated assembler sources.

use crate::{
    arch::{PointerWidth, TargetArch},
    Error, Result,
};

/// Assembler and ABI description of one native target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeTarget {
    /// Architecture the code is generated for
    pub arch: TargetArch,
    /// LLVM target triple
    pub triple: &'static str,
    /// LLVM data layout string
    pub data_layout: &'static str,
    /// Line comment prefix of the GNU assembler dialect
    pub comment: &'static str,
    /// Symbol type prefix in `.type` directives (`@` collides with the ARM comment character)
    pub type_prefix: char,
}

impl NativeTarget {
    /// Description for `arch`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::LayoutError`] for [`TargetArch::None`]; native code is always
    /// generated for a concrete architecture.
    pub fn for_arch(arch: TargetArch) -> Result<NativeTarget> {
        let target = match arch {
            TargetArch::Arm => NativeTarget {
                arch,
                triple: "armv7-unknown-linux-android21",
                data_layout: "e-m:e-p:32:32-Fi8-i64:64-v128:64:128-a:0:32-n32-S64",
                comment: "@",
                type_prefix: '%',
            },
            TargetArch::Arm64 => NativeTarget {
                arch,
                triple: "aarch64-unknown-linux-android21",
                data_layout: "e-m:e-i8:8:32-i16:16:32-i64:64-i128:128-n32:64-S128",
                comment: "//",
                type_prefix: '@',
            },
            TargetArch::X86 => NativeTarget {
                arch,
                triple: "i686-unknown-linux-android21",
                data_layout: "e-m:e-p:32:32-p270:32:32-p271:32:32-p272:64:64-f64:32:64-f80:32-n8:16:32-S128",
                comment: "#",
                type_prefix: '@',
            },
            TargetArch::X86_64 => NativeTarget {
                arch,
                triple: "x86_64-unknown-linux-android21",
                data_layout: "e-m:e-p270:32:32-p271:32:32-p272:64:64-i64:64-f80:128-n8:16:32:64-S128",
                comment: "#",
                type_prefix: '@',
            },
            TargetArch::None => {
                return Err(Error::LayoutError(
                    "native metadata requires a concrete target architecture".to_string(),
                ))
            }
        };
        Ok(target)
    }

    /// Pointer width of the target
    #[must_use]
    pub fn pointer_width(&self) -> PointerWidth {
        self.arch.pointer_width()
    }

    /// Size of a pointer in bytes
    #[must_use]
    pub fn pointer_size(&self) -> u64 {
        self.pointer_width().bytes()
    }

    /// Alignment of 64-bit integers inside structures.
    ///
    /// The i386 psABI aligns `long long` members to 4 bytes; every other target aligns them
    /// naturally.
    #[must_use]
    pub fn u64_alignment(&self) -> u64 {
        if self.arch == TargetArch::X86 {
            4
        } else {
            8
        }
    }

    /// Data directive for an integer of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::LayoutError`] for sizes other than 1, 2, 4 and 8.
    pub fn data_directive(&self, size: u64) -> Result<&'static str> {
        match size {
            1 => Ok(".byte"),
            2 => Ok(".short"),
            4 => Ok(".long"),
            8 => Ok(".quad"),
            _ => Err(Error::LayoutError(format!(
                "no data directive for a {size}-byte value"
            ))),
        }
    }

    /// Data directive for a pointer
    #[must_use]
    pub fn pointer_directive(&self) -> &'static str {
        if self.pointer_width().is_64bit() {
            ".quad"
        } else {
            ".long"
        }
    }
}
