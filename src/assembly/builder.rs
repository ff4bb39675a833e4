//! Validated construction of CIL method bodies.
//!
//! [`InstructionBuilder`] records typed [`Op`]s, tracks the evaluation stack while doing so
//! and rejects malformed sequences at the point where they are emitted:
//!
//! - popping from an empty stack
//! - loading an argument the method does not have
//! - reaching a label with different stack depths on different paths
//! - returning with a stack height that does not match the return type
//! - emitting code that can never execute
//!
//! [`InstructionBuilder::finish`] additionally rejects branches to labels that were never
//! marked and bodies that fall off their end, then encodes the sequence using short branch
//! forms where every offset fits.
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use peerweave::assembly::{InstructionBuilder, Op};
//! use peerweave::metadata::signatures::{MethodSignature, TypeSignature};
//!
//! // static byte Negate(byte value) => value != 0 ? 0 : 1
//! let sig = MethodSignature::new_static(TypeSignature::U1, vec![TypeSignature::U1]);
//! let mut builder = InstructionBuilder::new(&sig);
//! let is_set = builder.new_label();
//!
//! builder.emit(Op::LdArg(0))?;
//! builder.emit(Op::BrTrue(is_set))?;
//! builder.emit(Op::LdcI4(1))?;
//! builder.emit(Op::Ret)?;
//! builder.mark_label(is_set)?;
//! builder.emit(Op::LdcI4(0))?;
//! builder.emit(Op::Ret)?;
//!
//! let body = builder.finish()?;
//! assert_eq!(body.max_stack, 1);
//! # Ok::<(), peerweave::Error>(())
//! ```

use crate::{
    assembly::{
        instruction::{Label, Op},
        opcodes,
    },
    metadata::{
        method::MethodBody,
        signatures::MethodSignature,
        token::Token,
    },
    Error, Result,
};

/// Bookkeeping for one label.
#[derive(Debug, Clone, Copy, Default)]
struct LabelState {
    /// Index into the op list where the label was marked
    position: Option<usize>,
    /// Stack depth every path reaching the label must have
    depth: Option<i16>,
    /// Whether any branch targets the label
    referenced: bool,
}

/// Builds and validates a CIL method body.
#[derive(Debug)]
pub struct InstructionBuilder {
    ops: Vec<Op>,
    labels: Vec<LabelState>,
    current_depth: i16,
    max_depth: u16,
    unreachable: bool,
    arg_count: usize,
    returns_value: bool,
}

impl InstructionBuilder {
    /// Creates a builder for a method with the given signature.
    #[must_use]
    pub fn new(signature: &MethodSignature) -> Self {
        InstructionBuilder {
            ops: Vec::new(),
            labels: Vec::new(),
            current_depth: 0,
            max_depth: 0,
            unreachable: false,
            arg_count: signature.argument_count(),
            returns_value: signature.returns_value(),
        }
    }

    /// Creates a new, not yet marked label.
    pub fn new_label(&mut self) -> Label {
        self.labels.push(LabelState::default());
        Label(self.labels.len() as u32 - 1)
    }

    /// Marks the position of `label` at the current end of the sequence.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInstruction`] if the label is unknown, was already
    /// marked, or is reached with a stack depth that differs from the branches targeting it.
    pub fn mark_label(&mut self, label: Label) -> Result<()> {
        let position = self.ops.len();
        let unreachable = self.unreachable;
        let current = self.current_depth;

        let state = self.label_mut(label)?;
        if state.position.is_some() {
            return Err(Error::InvalidInstruction(format!(
                "label {} marked twice",
                label.0
            )));
        }

        let depth = match (state.depth, unreachable) {
            (Some(expected), true) => expected,
            (Some(expected), false) if expected != current => {
                return Err(Error::InvalidInstruction(format!(
                    "stack depth mismatch at label {}: {} from branches, {} on fall-through",
                    label.0, expected, current
                )));
            }
            (Some(expected), false) => expected,
            (None, _) if unreachable => 0,
            (None, _) => current,
        };

        state.position = Some(position);
        state.depth = Some(depth);

        self.current_depth = depth;
        self.unreachable = false;
        Ok(())
    }

    /// Appends an operation.
    ///
    /// Calls need the callee signature for their stack effect and go through
    /// [`InstructionBuilder::call`] instead.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInstruction`] if the operation is invalid at this point.
    pub fn emit(&mut self, op: Op) -> Result<()> {
        self.check_reachable(op)?;

        match op {
            Op::Nop => {}
            Op::LdArg(index) => {
                if usize::from(index) >= self.arg_count {
                    return Err(Error::InvalidInstruction(format!(
                        "ldarg {} out of range, method has {} argument(s)",
                        index, self.arg_count
                    )));
                }
                self.apply_stack(op, 0, 1)?;
            }
            Op::LdcI4(_) => self.apply_stack(op, 0, 1)?,
            Op::Ceq | Op::Cgt | Op::CgtUn => self.apply_stack(op, 2, 1)?,
            Op::Pop => self.apply_stack(op, 1, 0)?,
            Op::Call(_) => {
                return Err(Error::InvalidInstruction(
                    "call must be emitted with the callee signature".to_string(),
                ));
            }
            Op::Br(label) => {
                self.record_branch(label)?;
                self.unreachable = true;
            }
            Op::BrTrue(label) | Op::BrFalse(label) => {
                self.apply_stack(op, 1, 0)?;
                self.record_branch(label)?;
            }
            Op::Ret => {
                let expected = i16::from(self.returns_value);
                if self.current_depth != expected {
                    return Err(Error::InvalidInstruction(format!(
                        "ret with stack depth {}, expected {}",
                        self.current_depth, expected
                    )));
                }
                self.current_depth = 0;
                self.unreachable = true;
            }
        }

        self.ops.push(op);
        Ok(())
    }

    /// Appends a call to `method`, whose signature determines the stack effect.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInstruction`] if the stack does not hold the arguments.
    pub fn call(&mut self, method: Token, signature: &MethodSignature) -> Result<()> {
        let op = Op::Call(method);
        self.check_reachable(op)?;

        let pops = i16::try_from(signature.argument_count()).map_err(|_| {
            Error::InvalidInstruction(format!("call {method} has too many arguments"))
        })?;
        self.apply_stack(op, pops, i16::from(signature.returns_value()))?;

        self.ops.push(op);
        Ok(())
    }

    /// Current evaluation stack depth
    #[must_use]
    pub fn stack_depth(&self) -> i16 {
        self.current_depth
    }

    /// The operations emitted so far
    #[must_use]
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Validates the complete sequence and encodes it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidInstruction`] if a branch targets an unmarked label or
    /// the last instruction falls through the end of the body.
    pub fn finish(self) -> Result<MethodBody> {
        if let Some((index, _)) = self
            .labels
            .iter()
            .enumerate()
            .find(|(_, l)| l.referenced && l.position.is_none())
        {
            return Err(Error::InvalidInstruction(format!(
                "branch to undefined label {index}"
            )));
        }

        if !self.unreachable {
            return Err(Error::InvalidInstruction(
                "method body falls through its end".to_string(),
            ));
        }

        let code = match self.encode(true)? {
            Some(code) => code,
            None => self.encode(false)?.ok_or_else(|| {
                Error::InvalidInstruction("branch offset exceeds 32-bit range".to_string())
            })?,
        };

        Ok(MethodBody {
            code,
            max_stack: self.max_depth,
        })
    }

    fn label_mut(&mut self, label: Label) -> Result<&mut LabelState> {
        self.labels
            .get_mut(label.0 as usize)
            .ok_or_else(|| Error::InvalidInstruction(format!("unknown label {}", label.0)))
    }

    fn check_reachable(&self, op: Op) -> Result<()> {
        if self.unreachable {
            return Err(Error::InvalidInstruction(format!(
                "unreachable '{}' at index {}",
                op.mnemonic(),
                self.ops.len()
            )));
        }
        Ok(())
    }

    fn apply_stack(&mut self, op: Op, pops: i16, pushes: i16) -> Result<()> {
        if self.current_depth < pops {
            return Err(Error::InvalidInstruction(format!(
                "stack underflow: '{}' pops {} with depth {}",
                op.mnemonic(),
                pops,
                self.current_depth
            )));
        }

        self.current_depth = self.current_depth - pops + pushes;
        let depth = u16::try_from(self.current_depth)
            .map_err(|_| Error::InvalidInstruction("stack depth out of range".to_string()))?;
        self.max_depth = self.max_depth.max(depth);
        Ok(())
    }

    fn record_branch(&mut self, label: Label) -> Result<()> {
        let current = self.current_depth;
        let state = self.label_mut(label)?;
        state.referenced = true;

        match state.depth {
            Some(expected) if expected != current => Err(Error::InvalidInstruction(format!(
                "stack depth mismatch for branch to label {}: expected {}, branch has {}",
                label.0, expected, current
            ))),
            Some(_) => Ok(()),
            None => {
                state.depth = Some(current);
                Ok(())
            }
        }
    }

    fn op_size(op: Op, short: bool) -> usize {
        match op {
            Op::Nop | Op::Ret | Op::Pop => 1,
            Op::LdArg(index) => match index {
                0..=3 => 1,
                4..=255 => 2,
                _ => 4,
            },
            Op::LdcI4(value) => match value {
                -1..=8 => 1,
                -128..=127 => 2,
                _ => 5,
            },
            Op::Ceq | Op::Cgt | Op::CgtUn => 2,
            Op::Call(_) => 5,
            Op::Br(_) | Op::BrTrue(_) | Op::BrFalse(_) => {
                if short {
                    2
                } else {
                    5
                }
            }
        }
    }

    /// Encodes with short or long branches; `None` if a short branch does not fit.
    fn encode(&self, short: bool) -> Result<Option<Vec<u8>>> {
        let mut offsets = Vec::with_capacity(self.ops.len() + 1);
        let mut position = 0usize;
        for op in &self.ops {
            offsets.push(position);
            position += Self::op_size(*op, short);
        }
        offsets.push(position);

        let label_offset = |label: Label| -> Result<usize> {
            let index = self
                .labels
                .get(label.0 as usize)
                .and_then(|l| l.position)
                .ok_or_else(|| Error::InvalidInstruction(format!("unknown label {}", label.0)))?;
            Ok(offsets[index])
        };

        let mut code = Vec::with_capacity(position);
        for (index, op) in self.ops.iter().enumerate() {
            match *op {
                Op::Nop => code.push(opcodes::NOP),
                Op::LdArg(arg) => match arg {
                    0..=3 => code.push(opcodes::LDARG_0 + arg as u8),
                    4..=255 => code.extend_from_slice(&[opcodes::LDARG_S, arg as u8]),
                    _ => {
                        code.extend_from_slice(&[opcodes::FE_PREFIX, opcodes::FE_LDARG]);
                        code.extend_from_slice(&arg.to_le_bytes());
                    }
                },
                Op::LdcI4(value) => match value {
                    -1..=8 => code.push((i32::from(opcodes::LDC_I4_0) + value) as u8),
                    -128..=127 => code.extend_from_slice(&[opcodes::LDC_I4_S, value as i8 as u8]),
                    _ => {
                        code.push(opcodes::LDC_I4);
                        code.extend_from_slice(&value.to_le_bytes());
                    }
                },
                Op::Ceq => code.extend_from_slice(&[opcodes::FE_PREFIX, opcodes::FE_CEQ]),
                Op::Cgt => code.extend_from_slice(&[opcodes::FE_PREFIX, opcodes::FE_CGT]),
                Op::CgtUn => code.extend_from_slice(&[opcodes::FE_PREFIX, opcodes::FE_CGT_UN]),
                Op::Call(token) => {
                    code.push(opcodes::CALL);
                    code.extend_from_slice(&token.value().to_le_bytes());
                }
                Op::Ret => code.push(opcodes::RET),
                Op::Pop => code.push(opcodes::POP),
                Op::Br(label) | Op::BrTrue(label) | Op::BrFalse(label) => {
                    let next = offsets[index + 1];
                    let target = label_offset(label)?;
                    let delta = target as i64 - next as i64;

                    let (short_op, long_op) = match op {
                        Op::Br(_) => (opcodes::BR_S, opcodes::BR),
                        Op::BrTrue(_) => (opcodes::BRTRUE_S, opcodes::BRTRUE),
                        _ => (opcodes::BRFALSE_S, opcodes::BRFALSE),
                    };

                    if short {
                        let Ok(delta) = i8::try_from(delta) else {
                            return Ok(None);
                        };
                        code.extend_from_slice(&[short_op, delta as u8]);
                    } else {
                        let delta = i32::try_from(delta).map_err(|_| {
                            Error::InvalidInstruction("branch offset out of range".to_string())
                        })?;
                        code.push(long_op);
                        code.extend_from_slice(&delta.to_le_bytes());
                    }
                }
            }
        }

        Ok(Some(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::signatures::TypeSignature;

    fn sig(ret: TypeSignature, params: Vec<TypeSignature>) -> MethodSignature {
        MethodSignature::new_static(ret, params)
    }

    #[test]
    fn simple_body() {
        let mut builder = InstructionBuilder::new(&sig(TypeSignature::I4, vec![]));
        builder.emit(Op::LdcI4(1)).unwrap();
        builder.emit(Op::Ret).unwrap();

        let body = builder.finish().unwrap();
        assert_eq!(body.code, vec![0x17, 0x2A]);
        assert_eq!(body.max_stack, 1);
    }

    #[test]
    fn constant_and_argument_forms() {
        let params = vec![TypeSignature::I4; 300];
        let mut builder = InstructionBuilder::new(&sig(TypeSignature::Void, params));
        for op in [
            Op::LdArg(1),
            Op::LdArg(7),
            Op::LdArg(299),
            Op::LdcI4(-1),
            Op::LdcI4(100),
            Op::LdcI4(1000),
        ] {
            builder.emit(op).unwrap();
        }
        for _ in 0..6 {
            builder.emit(Op::Pop).unwrap();
        }
        builder.emit(Op::Ret).unwrap();

        let body = builder.finish().unwrap();
        assert_eq!(
            &body.code[..16],
            &[
                0x03, // ldarg.1
                0x0E, 0x07, // ldarg.s 7
                0xFE, 0x09, 0x2B, 0x01, // ldarg 299
                0x15, // ldc.i4.m1
                0x1F, 0x64, // ldc.i4.s 100
                0x20, 0xE8, 0x03, 0x00, 0x00, // ldc.i4 1000
                0x26, // pop
            ]
        );
        assert_eq!(body.max_stack, 6);
    }

    #[test]
    fn conditional_branches_use_short_forms() {
        let mut builder = InstructionBuilder::new(&sig(TypeSignature::U1, vec![TypeSignature::U1]));
        let set = builder.new_label();
        let done = builder.new_label();

        builder.emit(Op::LdArg(0)).unwrap();
        builder.emit(Op::BrTrue(set)).unwrap();
        builder.emit(Op::LdcI4(0)).unwrap();
        builder.emit(Op::Br(done)).unwrap();
        builder.mark_label(set).unwrap();
        builder.emit(Op::LdcI4(1)).unwrap();
        builder.mark_label(done).unwrap();
        builder.emit(Op::Ret).unwrap();

        let body = builder.finish().unwrap();
        assert_eq!(
            body.code,
            vec![0x02, 0x2D, 0x03, 0x16, 0x2B, 0x01, 0x17, 0x2A]
        );
        assert_eq!(body.max_stack, 1);
    }

    #[test]
    fn long_branches_when_needed() {
        let mut builder = InstructionBuilder::new(&sig(TypeSignature::Void, vec![]));
        let skip = builder.new_label();
        builder.emit(Op::LdcI4(0)).unwrap();
        builder.emit(Op::BrFalse(skip)).unwrap();
        for _ in 0..200 {
            builder.emit(Op::Nop).unwrap();
        }
        builder.mark_label(skip).unwrap();
        builder.emit(Op::Ret).unwrap();

        let body = builder.finish().unwrap();
        assert_eq!(body.code[1], opcodes::BRFALSE);
        assert_eq!(&body.code[2..6], &200i32.to_le_bytes());
    }

    #[test]
    fn rejects_unknown_or_remarked_label() {
        let mut builder = InstructionBuilder::new(&sig(TypeSignature::Void, vec![]));
        let end = builder.new_label();
        assert!(builder.mark_label(Label(end.0 + 10)).is_err());

        builder.mark_label(end).unwrap();
        assert!(builder.mark_label(end).is_err());
    }

    #[test]
    fn rejects_stack_underflow() {
        let mut builder = InstructionBuilder::new(&sig(TypeSignature::Void, vec![]));
        let err = builder.emit(Op::Pop).unwrap_err();
        assert!(matches!(err, Error::InvalidInstruction(_)));

        let mut builder = InstructionBuilder::new(&sig(TypeSignature::Void, vec![]));
        builder.emit(Op::LdcI4(1)).unwrap();
        assert!(builder.emit(Op::Ceq).is_err());
    }

    #[test]
    fn rejects_wrong_return_height() {
        let mut builder = InstructionBuilder::new(&sig(TypeSignature::I4, vec![]));
        assert!(builder.emit(Op::Ret).is_err());

        let mut builder = InstructionBuilder::new(&sig(TypeSignature::Void, vec![]));
        builder.emit(Op::LdcI4(3)).unwrap();
        assert!(builder.emit(Op::Ret).is_err());
    }

    #[test]
    fn rejects_out_of_range_argument() {
        let mut builder = InstructionBuilder::new(&sig(TypeSignature::Void, vec![TypeSignature::I]));
        builder.emit(Op::LdArg(0)).unwrap();
        assert!(builder.emit(Op::LdArg(1)).is_err());
    }

    #[test]
    fn rejects_undefined_label() {
        let mut builder = InstructionBuilder::new(&sig(TypeSignature::Void, vec![]));
        let nowhere = builder.new_label();
        builder.emit(Op::Br(nowhere)).unwrap();
        assert!(builder.finish().is_err());
    }

    #[test]
    fn rejects_inconsistent_label_depth() {
        let mut builder = InstructionBuilder::new(&sig(TypeSignature::Void, vec![]));
        let join = builder.new_label();
        builder.emit(Op::LdcI4(0)).unwrap();
        builder.emit(Op::BrFalse(join)).unwrap();
        builder.emit(Op::LdcI4(1)).unwrap();
        assert!(builder.mark_label(join).is_err());
    }

    #[test]
    fn rejects_fall_through_and_unreachable_code() {
        let mut builder = InstructionBuilder::new(&sig(TypeSignature::Void, vec![]));
        builder.emit(Op::Nop).unwrap();
        assert!(builder.finish().is_err());

        let mut builder = InstructionBuilder::new(&sig(TypeSignature::Void, vec![]));
        builder.emit(Op::Ret).unwrap();
        assert!(builder.emit(Op::Nop).is_err());
    }

    #[test]
    fn call_stack_effect() {
        let callee = sig(TypeSignature::Boolean, vec![TypeSignature::I, TypeSignature::I]);
        let mut builder = InstructionBuilder::new(&sig(
            TypeSignature::Boolean,
            vec![TypeSignature::I, TypeSignature::I],
        ));

        builder.emit(Op::LdArg(0)).unwrap();
        assert!(builder.call(Token(0x06000001), &callee).is_err());

        builder.emit(Op::LdArg(1)).unwrap();
        builder.call(Token(0x06000001), &callee).unwrap();
        assert_eq!(builder.stack_depth(), 1);
        builder.emit(Op::Ret).unwrap();

        let body = builder.finish().unwrap();
        assert_eq!(&body.code[2..7], &[0x28, 0x01, 0x00, 0x00, 0x06]);
        assert_eq!(body.max_stack, 2);

        let mut builder = InstructionBuilder::new(&callee);
        assert!(builder.emit(Op::Call(Token(0x06000001))).is_err());
    }
}
