//! Decoding of CIL method bodies into typed operations.
//!
//! The decoder understands the subset of CIL that [`crate::assembly::InstructionBuilder`]
//! emits, in both short and long encodings. It is used to inspect generated wrapper bodies
//! and to validate existing callback bodies before they are replaced.
//!
//! # Key Components
//!
//! - [`decode_instruction`] - Decode one instruction at an offset
//! - [`decode`] - Decode a complete method body
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use peerweave::assembly::{decode, Op};
//!
//! let code = [0x02, 0x16, 0xFE, 0x03, 0x2A]; // ldarg.0, ldc.i4.0, cgt.un, ret
//! let instructions = decode(&code)?;
//! assert_eq!(instructions[2].op, Op::CgtUn);
//! # Ok::<(), peerweave::Error>(())
//! ```

use crate::{
    assembly::{
        instruction::{Instruction, Label, Op},
        opcodes,
    },
    file::io::read_le_at,
    metadata::token::Token,
    Result,
};

/// Decodes the instruction at `offset`.
///
/// Branch targets are resolved to absolute offsets within the body.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] for truncated operands, or [`crate::Error::Malformed`]
/// for unsupported opcodes and branch targets outside the 32-bit offset range.
pub fn decode_instruction(code: &[u8], offset: usize) -> Result<Instruction> {
    let mut cursor = offset;
    let opcode = read_le_at::<u8>(code, &mut cursor)?;

    let op = match opcode {
        opcodes::NOP => Op::Nop,
        opcodes::LDARG_0..=opcodes::LDARG_3 => Op::LdArg(u16::from(opcode - opcodes::LDARG_0)),
        opcodes::LDARG_S => Op::LdArg(u16::from(read_le_at::<u8>(code, &mut cursor)?)),
        opcodes::LDC_I4_M1..=opcodes::LDC_I4_8 => {
            Op::LdcI4(i32::from(opcode) - i32::from(opcodes::LDC_I4_0))
        }
        opcodes::LDC_I4_S => Op::LdcI4(i32::from(read_le_at::<i8>(code, &mut cursor)?)),
        opcodes::LDC_I4 => Op::LdcI4(read_le_at::<i32>(code, &mut cursor)?),
        opcodes::POP => Op::Pop,
        opcodes::CALL => Op::Call(Token(read_le_at::<u32>(code, &mut cursor)?)),
        opcodes::RET => Op::Ret,
        opcodes::BR_S | opcodes::BRFALSE_S | opcodes::BRTRUE_S => {
            let delta = i64::from(read_le_at::<i8>(code, &mut cursor)?);
            let target = branch_target(cursor, delta)?;
            match opcode {
                opcodes::BR_S => Op::Br(target),
                opcodes::BRFALSE_S => Op::BrFalse(target),
                _ => Op::BrTrue(target),
            }
        }
        opcodes::BR | opcodes::BRFALSE | opcodes::BRTRUE => {
            let delta = i64::from(read_le_at::<i32>(code, &mut cursor)?);
            let target = branch_target(cursor, delta)?;
            match opcode {
                opcodes::BR => Op::Br(target),
                opcodes::BRFALSE => Op::BrFalse(target),
                _ => Op::BrTrue(target),
            }
        }
        opcodes::FE_PREFIX => {
            let second = read_le_at::<u8>(code, &mut cursor)?;
            match second {
                opcodes::FE_CEQ => Op::Ceq,
                opcodes::FE_CGT => Op::Cgt,
                opcodes::FE_CGT_UN => Op::CgtUn,
                opcodes::FE_LDARG => Op::LdArg(read_le_at::<u16>(code, &mut cursor)?),
                _ => {
                    return Err(malformed_error!(
                        "Unsupported opcode 0xFE 0x{:02X} at offset {}",
                        second,
                        offset
                    ))
                }
            }
        }
        _ => {
            return Err(malformed_error!(
                "Unsupported opcode 0x{:02X} at offset {}",
                opcode,
                offset
            ))
        }
    };

    Ok(Instruction {
        offset: offset as u32,
        size: (cursor - offset) as u32,
        op,
    })
}

/// Decodes a complete method body.
///
/// # Errors
///
/// Returns an error if any instruction cannot be decoded, or if a branch targets an offset
/// that is not the start of an instruction.
pub fn decode(code: &[u8]) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut offset = 0;
    while offset < code.len() {
        let instruction = decode_instruction(code, offset)?;
        offset += instruction.size as usize;
        instructions.push(instruction);
    }

    for instruction in &instructions {
        if let Some(Label(target)) = instruction.op.target() {
            if instructions.binary_search_by_key(&target, |i| i.offset).is_err() {
                return Err(malformed_error!(
                    "Branch at IL_{:04x} targets IL_{:04x}, which is not an instruction boundary",
                    instruction.offset,
                    target
                ));
            }
        }
    }

    Ok(instructions)
}

fn branch_target(next: usize, delta: i64) -> Result<Label> {
    let target = next as i64 + delta;
    u32::try_from(target)
        .map(Label)
        .map_err(|_| malformed_error!("Branch target {} out of range", target))
}
