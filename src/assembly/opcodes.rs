//! CIL opcode byte constants (ECMA-335) for the instructions the builder emits.
//!
//! Two-byte opcodes that use the `0xFE` prefix have their second byte stored with an `FE_`
//! prefix (e.g. [`FE_CEQ`] = `0x01` for `ceq`, encoded `0xFE 0x01`).
#![allow(missing_docs)]

// Misc
pub const NOP: u8 = 0x00;

// Load argument shorthand
pub const LDARG_0: u8 = 0x02;
pub const LDARG_1: u8 = 0x03;
pub const LDARG_2: u8 = 0x04;
pub const LDARG_3: u8 = 0x05;
pub const LDARG_S: u8 = 0x0E;

// Constant loaders
pub const LDC_I4_M1: u8 = 0x15;
pub const LDC_I4_0: u8 = 0x16;
pub const LDC_I4_8: u8 = 0x1E;
pub const LDC_I4_S: u8 = 0x1F;
pub const LDC_I4: u8 = 0x20;

// Stack manipulation
pub const POP: u8 = 0x26;

// Calls and returns
pub const CALL: u8 = 0x28;
pub const RET: u8 = 0x2A;

// Branches (short form)
pub const BR_S: u8 = 0x2B;
pub const BRFALSE_S: u8 = 0x2C;
pub const BRTRUE_S: u8 = 0x2D;

// Branches (long form)
pub const BR: u8 = 0x38;
pub const BRFALSE: u8 = 0x39;
pub const BRTRUE: u8 = 0x3A;

// Two-byte opcodes
pub const FE_PREFIX: u8 = 0xFE;
pub const FE_CEQ: u8 = 0x01;
pub const FE_CGT: u8 = 0x02;
pub const FE_CGT_UN: u8 = 0x03;
pub const FE_LDARG: u8 = 0x09;
