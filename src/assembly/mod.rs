//! CIL instruction building and decoding.
//!
//! Native callback wrappers are emitted through [`InstructionBuilder`], which validates the
//! evaluation stack as each operation is appended. [`decode`] turns encoded bodies back into
//! [`Instruction`]s for inspection.
//!
//! # Key Components
//!
//! - [`InstructionBuilder`] - Stack-checked builder producing a [`crate::metadata::method::MethodBody`]
//! - [`Op`] / [`Label`] - The supported operations and branch targets
//! - [`decode`] / [`decode_instruction`] - Decoding of encoded bodies
//! - [`opcodes`] - Opcode byte constants

mod builder;
mod decoder;
mod instruction;
pub mod opcodes;

pub use builder::InstructionBuilder;
pub use decoder::{decode, decode_instruction};
pub use instruction::{Instruction, Label, Op};
