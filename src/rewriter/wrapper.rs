//! Wrapper generation for callbacks with `bool` in their signature.
//!
//! `bool` has no fixed native representation, so a callback taking or returning it cannot be
//! a native entry point. The wrapper takes and returns `byte` instead:
//!
//! ```text
//! static byte n_OnToggle_Z_mm_wrapper(IntPtr jnienv, IntPtr native__this, byte value)
//! {
//!     return n_OnToggle_Z(jnienv, native__this, value != 0) ? 1 : 0;
//! }
//! ```

use crate::{
    assembly::{InstructionBuilder, Op},
    metadata::{
        method::{MethodAttributes, MethodDefinition},
        signatures::{MethodSignature, TypeSignature},
        token::Token,
    },
    Error, Result,
};

/// Suffix appended to the callback name to form the wrapper name.
pub const WRAPPER_SUFFIX: &str = "_mm_wrapper";

/// Name of the wrapper generated for `callback`
#[must_use]
pub fn wrapper_name(callback: &str) -> String {
    format!("{callback}{WRAPPER_SUFFIX}")
}

fn native_type(ty: &TypeSignature, method: &str, what: &str) -> Result<TypeSignature> {
    if ty.is_blittable() {
        return Ok(ty.clone());
    }
    ty.native_equivalent().ok_or_else(|| Error::UnsupportedMarshal {
        method: method.to_string(),
        reason: format!("{what} of type '{ty}' cannot be converted"),
    })
}

/// The signature of the wrapper for a callback signature.
///
/// # Errors
///
/// Returns [`crate::Error::UnsupportedMarshal`] for instance callbacks and for types other
/// than blittable ones and `bool`.
pub fn wrapper_signature(callback: &MethodSignature, method: &str) -> Result<MethodSignature> {
    if callback.has_this {
        return Err(Error::UnsupportedMarshal {
            method: method.to_string(),
            reason: "native callbacks must be static".to_string(),
        });
    }

    let params = callback
        .params
        .iter()
        .enumerate()
        .map(|(i, p)| native_type(p, method, &format!("parameter {i}")))
        .collect::<Result<Vec<_>>>()?;
    let return_type = native_type(&callback.return_type, method, "return type")?;

    Ok(MethodSignature::new_static(return_type, params))
}

/// Generates the wrapper for `callback`, to be added to the callback's type as `token`.
///
/// # Errors
///
/// Returns [`crate::Error::UnsupportedMarshal`] if the callback signature needs a conversion
/// other than `bool` to `byte`, or [`crate::Error::InvalidInstruction`] if the generated body
/// is rejected.
pub fn generate_wrapper(callback: &MethodDefinition, token: Token) -> Result<MethodDefinition> {
    let signature = wrapper_signature(&callback.signature, &callback.name)?;
    let mut builder = InstructionBuilder::new(&signature);

    for (index, param) in callback.signature.params.iter().enumerate() {
        let index = u16::try_from(index).map_err(|_| Error::UnsupportedMarshal {
            method: callback.name.clone(),
            reason: "too many parameters".to_string(),
        })?;
        builder.emit(Op::LdArg(index))?;
        if param.is_convertible() {
            // value != 0
            builder.emit(Op::LdcI4(0))?;
            builder.emit(Op::CgtUn)?;
        }
    }

    builder.call(callback.token, &callback.signature)?;

    if callback.signature.return_type.is_convertible() {
        // result ? 1 : 0
        let is_true = builder.new_label();
        let done = builder.new_label();
        builder.emit(Op::BrTrue(is_true))?;
        builder.emit(Op::LdcI4(0))?;
        builder.emit(Op::Br(done))?;
        builder.mark_label(is_true)?;
        builder.emit(Op::LdcI4(1))?;
        builder.mark_label(done)?;
    }
    builder.emit(Op::Ret)?;

    let mut wrapper = MethodDefinition::new(
        token,
        wrapper_name(&callback.name),
        MethodAttributes::PRIVATE | MethodAttributes::STATIC | MethodAttributes::HIDE_BY_SIG,
        signature,
    );
    wrapper.body = Some(builder.finish()?);
    Ok(wrapper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        arch::TargetArch,
        test::{execute, mono_android_module},
    };

    #[test]
    fn wrapper_signature_is_blittable() {
        let callback = MethodSignature::new_static(
            TypeSignature::Boolean,
            vec![TypeSignature::I, TypeSignature::I, TypeSignature::Boolean, TypeSignature::I4],
        );
        let wrapper = wrapper_signature(&callback, "n_Do").unwrap();
        assert_eq!(wrapper.return_type, TypeSignature::U1);
        assert_eq!(
            wrapper.params,
            vec![TypeSignature::I, TypeSignature::I, TypeSignature::U1, TypeSignature::I4]
        );
        assert!(wrapper.params.iter().all(TypeSignature::is_blittable));
    }

    #[test]
    fn rejects_other_conversions() {
        let callback = MethodSignature::new_static(TypeSignature::String, vec![TypeSignature::I]);
        assert!(matches!(
            wrapper_signature(&callback, "n_Name"),
            Err(Error::UnsupportedMarshal { .. })
        ));

        let instance = MethodSignature::new_instance(TypeSignature::Boolean, vec![]);
        assert!(matches!(
            wrapper_signature(&instance, "n_Flag"),
            Err(Error::UnsupportedMarshal { .. })
        ));
    }

    #[test]
    fn wrapper_matches_callback_behavior() {
        let mut module = mono_android_module(TargetArch::None);
        let token = module.allocate_method_token();

        let activity = module.find_type_mut("Android.App.Activity").unwrap();
        let callback = activity.method_by_name("n_OnToggle_Z").unwrap().clone();
        let wrapper = generate_wrapper(&callback, token).unwrap();
        assert_eq!(wrapper.name, "n_OnToggle_Z_mm_wrapper");
        assert!(wrapper.is_private() && wrapper.is_static());
        activity.methods.push(wrapper);

        // byte 1 behaves like true, byte 0 like false
        for (byte, flag) in [(1, 1), (0, 0)] {
            assert_eq!(
                execute(&module, token, &[0, 0, byte]),
                execute(&module, callback.token, &[0, 0, flag])
            );
        }
        // any non-zero byte is true
        assert_eq!(execute(&module, token, &[0, 0, 0x80]), Some(0));
    }

    #[test]
    fn wrapper_body_shape() {
        let module = mono_android_module(TargetArch::None);
        let activity = module.find_type("Android.App.Activity").unwrap();
        let callback = activity.method_by_name("n_OnKeyDown_ILandroid_view_KeyEvent_").unwrap();

        let wrapper = generate_wrapper(callback, Token(0x0600_0100)).unwrap();
        let body = wrapper.body.unwrap();
        let ops: Vec<Op> = crate::assembly::decode(&body.code)
            .unwrap()
            .into_iter()
            .map(|i| i.op)
            .collect();

        assert_eq!(ops[0..4], [Op::LdArg(0), Op::LdArg(1), Op::LdArg(2), Op::LdArg(3)]);
        assert_eq!(ops[4], Op::Call(callback.token));
        assert!(matches!(ops[5], Op::BrTrue(_)));
        assert_eq!(ops.last(), Some(&Op::Ret));
        assert_eq!(body.max_stack, 4);
    }
}
