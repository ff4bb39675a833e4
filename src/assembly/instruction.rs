//! Typed CIL operations.

use std::fmt;

use crate::metadata::token::Token;

/// A branch target.
///
/// Inside an [`crate::assembly::InstructionBuilder`] a label is an opaque handle created by
/// [`crate::assembly::InstructionBuilder::new_label`]. In instructions produced by
/// [`crate::assembly::decode`] it holds the absolute code offset of the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(pub u32);

/// A CIL operation supported by the wrapper generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// `nop`
    Nop,
    /// Load argument by index
    LdArg(u16),
    /// Load a 32-bit integer constant
    LdcI4(i32),
    /// Compare equal, push 1 or 0
    Ceq,
    /// Compare greater than (signed), push 1 or 0
    Cgt,
    /// Compare greater than (unsigned), push 1 or 0
    CgtUn,
    /// Call a method by token
    Call(Token),
    /// Unconditional branch
    Br(Label),
    /// Branch if the value is non-zero
    BrTrue(Label),
    /// Branch if the value is zero
    BrFalse(Label),
    /// Return from the method
    Ret,
    /// Discard the top of the stack
    Pop,
}

impl Op {
    /// Returns true for operations after which execution does not fall through
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(self, Op::Br(_) | Op::Ret)
    }

    /// Branch target, for branch operations
    #[must_use]
    pub fn target(&self) -> Option<Label> {
        match self {
            Op::Br(label) | Op::BrTrue(label) | Op::BrFalse(label) => Some(*label),
            _ => None,
        }
    }

    /// The instruction mnemonic
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Op::Nop => "nop",
            Op::LdArg(_) => "ldarg",
            Op::LdcI4(_) => "ldc.i4",
            Op::Ceq => "ceq",
            Op::Cgt => "cgt",
            Op::CgtUn => "cgt.un",
            Op::Call(_) => "call",
            Op::Br(_) => "br",
            Op::BrTrue(_) => "brtrue",
            Op::BrFalse(_) => "brfalse",
            Op::Ret => "ret",
            Op::Pop => "pop",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::LdArg(index) => write!(f, "ldarg {index}"),
            Op::LdcI4(value) => write!(f, "ldc.i4 {value}"),
            Op::Call(token) => write!(f, "call {token}"),
            Op::Br(label) | Op::BrTrue(label) | Op::BrFalse(label) => {
                write!(f, "{} IL_{:04x}", self.mnemonic(), label.0)
            }
            _ => write!(f, "{}", self.mnemonic()),
        }
    }
}

/// A decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// Offset of the instruction in the method body
    pub offset: u32,
    /// Encoded size in bytes
    pub size: u32,
    /// The operation, with branch targets as absolute offsets
    pub op: Op,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04x}: {}", self.offset, self.op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(Op::LdArg(2).to_string(), "ldarg 2");
        assert_eq!(Op::CgtUn.to_string(), "cgt.un");
        assert_eq!(Op::Call(Token(0x06000010)).to_string(), "call 0x06000010");
        assert_eq!(Op::BrTrue(Label(0x0c)).to_string(), "brtrue IL_000c");

        let instruction = Instruction {
            offset: 4,
            size: 1,
            op: Op::Ret,
        };
        assert_eq!(instruction.to_string(), "IL_0004: ret");
    }

    #[test]
    fn terminators() {
        assert!(Op::Ret.is_terminator());
        assert!(Op::Br(Label(0)).is_terminator());
        assert!(!Op::BrFalse(Label(0)).is_terminator());
        assert_eq!(Op::BrFalse(Label(3)).target(), Some(Label(3)));
        assert_eq!(Op::Nop.target(), None);
    }
}
