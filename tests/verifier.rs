//! Verifier acceptance and rejection tests through the public API.

use classflow::{
    bytecode::{ClassHierarchy, CodeBuilder, Cond, Instruction, InvokeKind, MethodRef},
    verifier::{verify, VerifierType},
    Error, Result,
};

fn rejects(code: &mut CodeBuilder, class: &str, name: &str, desc: &str, is_static: bool) -> Result<String> {
    let method = code.into_method(class, name, desc, is_static)?;
    match verify(&method, &ClassHierarchy::with_java_lang()) {
        Err(Error::Verification { message, .. }) => Ok(message),
        Err(other) => Err(other),
        Ok(_) => panic!("{name}{desc} should not verify"),
    }
}

#[test]
fn test_wide_parameters_take_two_slots() -> Result<()> {
    let oracle = ClassHierarchy::with_java_lang();

    let mut code = CodeBuilder::new();
    code.iload(2).ireturn();
    let method = code.into_method("t/T", "second", "(JI)I", true)?;
    let verified = verify(&method, &oracle)?;
    assert_eq!(verified.nodes[0].frame.locals[2], VerifierType::Int);

    let mut code = CodeBuilder::new();
    code.iload(1).ireturn();
    let message = rejects(&mut code, "t/T", "half", "(JI)I", true)?;
    assert!(message.contains("local 1"));
    Ok(())
}

#[test]
fn test_reference_returns() -> Result<()> {
    let oracle = ClassHierarchy::with_java_lang();

    let mut code = CodeBuilder::new();
    code.aload(0).areturn();
    let method = code.into_method("t/T", "widen", "(Ljava/lang/String;)Ljava/lang/Object;", true)?;
    assert!(verify(&method, &oracle).is_ok());

    let mut code = CodeBuilder::new();
    code.aload(0).areturn();
    let method = code.into_method("t/T", "me", "()Lt/T;", false)?;
    let verified = verify(&method, &oracle)?;
    assert_eq!(verified.nodes[0].frame.locals[0], VerifierType::class("t/T"));

    let mut code = CodeBuilder::new();
    code.iconst(3).areturn();
    rejects(&mut code, "t/T", "bad", "()Ljava/lang/Object;", true)?;
    Ok(())
}

#[test]
fn test_branches_and_switches_verify() -> Result<()> {
    let mut code = CodeBuilder::new();
    let (one, other, done) = (code.label(), code.label(), code.label());
    code.iload(0)
        .switch(&[(1, one)], other)
        .bind(one)
        .iconst(10)
        .istore(1)
        .goto(done)
        .bind(other)
        .iconst(20)
        .istore(1)
        .bind(done)
        .iload(1)
        .iload(0)
        .if_icmp(Cond::Lt, one)
        .iload(1)
        .ireturn();
    let method = code.into_method("t/T", "pick", "(I)I", true)?;

    let verified = verify(&method, &ClassHierarchy::with_java_lang())?;
    assert_eq!(verified.nodes.len(), method.code.len());
    assert_eq!(verified.nodes[1].successors.len(), 2);
    Ok(())
}

#[test]
fn test_handler_receives_caught_type() -> Result<()> {
    let mut code = CodeBuilder::new();
    let (start, end, handler) = (code.label(), code.label(), code.label());
    code.bind(start)
        .invoke(InvokeKind::Static, MethodRef::new("t/T", "a", "()V")?)
        .bind(end)
        .aconst_null()
        .areturn()
        .bind(handler)
        .areturn();
    code.try_catch(start, end, handler, Some("java/lang/RuntimeException"));
    let method = code.into_method("t/T", "error", "()Ljava/lang/Throwable;", true)?;

    let verified = verify(&method, &ClassHierarchy::with_java_lang())?;
    let entry = verified
        .node_at(method.handlers[0].handler)
        .map(|n| n.frame.stack.clone());
    assert_eq!(
        entry,
        Some(vec![VerifierType::class("java/lang/RuntimeException")])
    );
    Ok(())
}

#[test]
fn test_rejections_report_offset() -> Result<()> {
    let mut code = CodeBuilder::new();
    code.iconst(1).iadd().ireturn();
    let method = code.into_method("t/T", "short", "()I", true)?;

    match verify(&method, &ClassHierarchy::with_java_lang()) {
        Err(Error::Verification { offset, message }) => {
            assert_eq!(offset, method.code[1].offset);
            assert!(message.contains("underflow"));
        }
        other => panic!("expected a verification error, got {other:?}"),
    }
    Ok(())
}

#[test]
fn test_uninitialized_this_cannot_escape() -> Result<()> {
    let mut code = CodeBuilder::new();
    code.vreturn();
    let message = rejects(&mut code, "t/T", "<init>", "()V", false)?;
    assert!(message.contains("super constructor"));

    let mut code = CodeBuilder::new();
    code.aload(0)
        .invoke(
            InvokeKind::Special,
            MethodRef::new("java/lang/Object", "<init>", "()V")?,
        )
        .vreturn();
    let method = code.into_method("t/T", "<init>", "()V", false)?;
    assert!(verify(&method, &ClassHierarchy::with_java_lang()).is_ok());
    Ok(())
}

#[test]
fn test_unbalanced_stack_at_merge() -> Result<()> {
    let mut code = CodeBuilder::new();
    let join = code.label();
    code.iload(0)
        .if_(Cond::Eq, join)
        .iconst(1)
        .bind(join)
        .insn(Instruction::Nop)
        .vreturn();
    let message = rejects(&mut code, "t/T", "merge", "(I)V", true)?;
    assert!(message.contains("stack depth"));
    Ok(())
}
