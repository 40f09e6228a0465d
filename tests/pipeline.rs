//! End-to-end pipeline tests.
//!
//! Each test assembles a method with `CodeBuilder`, runs the whole
//! `Decompiler` over it and checks the final graph, the statement tree and
//! the recorded events through the public API only.

use classflow::{
    bytecode::{ClassHierarchy, CodeBuilder, Cond, Instruction, InvokeKind, MethodBody, MethodRef},
    compiler::{DecompiledMethod, Decompiler, DecompilerConfig, EventKind},
    ir::{Literal, OpKind, Terminator},
    structuring::Statement,
    Error, Result,
};

fn decompile(method: &MethodBody) -> Result<DecompiledMethod> {
    let oracle = ClassHierarchy::with_java_lang();
    Decompiler::new(&oracle, DecompilerConfig::default()).decompile(method)
}

fn count(root: &Statement, pred: impl Fn(&Statement) -> bool) -> usize {
    root.iter().filter(|s| pred(s)).count()
}

/// A method with no control flow structures to a scope holding its only block.
/// Statement leaves are blocks, so the empty body of `nop; return` is still
/// `Scope[Block(entry)]` rather than a scope with no children.
#[test]
fn test_straight_line_return() -> Result<()> {
    let mut code = CodeBuilder::new();
    code.insn(Instruction::Nop).vreturn();
    let method = code.into_method("t/T", "empty", "()V", true)?;

    let result = decompile(&method)?;

    assert_eq!(result.graph.block_count(), 1);
    let entry = result.graph.entry();
    assert_eq!(result.root, Statement::scope(vec![Statement::Block(entry)]));
    assert!(matches!(
        result.graph.block(entry).terminator,
        Terminator::Return(None)
    ));
    assert_eq!(result.events.warnings().count(), 0);
    Ok(())
}

#[test]
fn test_two_way_return_is_one_if() -> Result<()> {
    // if (x < 0) return 1; else return 2;
    let mut code = CodeBuilder::new();
    let positive = code.label();
    code.iload(0)
        .if_(Cond::Ge, positive)
        .iconst(1)
        .ireturn()
        .bind(positive)
        .iconst(2)
        .ireturn();
    let method = code.into_method("t/T", "sign", "(I)I", true)?;

    let result = decompile(&method)?;
    let root = &result.root;

    assert_eq!(count(root, |s| matches!(s, Statement::If { .. })), 1);
    assert_eq!(count(root, |s| matches!(s, Statement::Switch { .. })), 0);
    assert_eq!(count(root, |s| matches!(s, Statement::Try { .. })), 0);
    assert_eq!(count(root, |s| matches!(s, Statement::While { .. })), 0);

    let Statement::Scope { label: None, body } = root else {
        panic!("root is an unlabeled scope");
    };
    assert_eq!(body.len(), 1);
    let Statement::If {
        block,
        then_branch,
        else_branch,
    } = &body[0]
    else {
        panic!("the only statement is the branch");
    };
    assert_eq!(*block, result.graph.entry());
    for arm in [then_branch.as_ref(), else_branch.as_ref()] {
        let Statement::Scope { label: None, body } = arm else {
            panic!("arms are unlabeled scopes");
        };
        assert!(matches!(body.as_slice(), [Statement::Block(_)]));
    }
    Ok(())
}

#[test]
fn test_constant_on_all_paths_is_folded() -> Result<()> {
    // int v = x == 0 ? 5 : 2 + 3; a(); return v;
    let mut code = CodeBuilder::new();
    let (sum, join) = (code.label(), code.label());
    code.iload(0)
        .if_(Cond::Ne, sum)
        .iconst(5)
        .istore(1)
        .goto(join)
        .bind(sum)
        .iconst(2)
        .iconst(3)
        .iadd()
        .istore(1)
        .bind(join)
        .invoke(InvokeKind::Static, MethodRef::new("t/T", "a", "()V")?)
        .iload(1)
        .ireturn();
    let method = code.into_method("t/T", "five", "(I)I", true)?;

    let result = decompile(&method)?;
    let graph = &result.graph;

    let returned: Vec<_> = graph
        .block_ids()
        .into_iter()
        .filter_map(|b| match graph.block(b).terminator {
            Terminator::Return(Some(v)) => Some(v),
            _ => None,
        })
        .collect();
    assert_eq!(returned.len(), 1);
    assert_eq!(graph.var(returned[0]).literal, Some(Literal::Int(5)));

    let arithmetic = graph
        .block_ids()
        .into_iter()
        .flat_map(|b| graph.block_ops(b).collect::<Vec<_>>())
        .filter(|&op| matches!(graph.op(op).kind, OpKind::Arith { .. }))
        .count();
    assert_eq!(arithmetic, 0);
    assert!(result.events.has(EventKind::ConstantFolded));
    Ok(())
}

#[test]
fn test_verification_error_is_reported() -> Result<()> {
    let mut code = CodeBuilder::new();
    code.iadd().ireturn();
    let method = code.into_method("t/T", "broken", "()I", true)?;

    let err = decompile(&method).unwrap_err();
    assert!(matches!(err, Error::Verification { .. }));
    assert!(!err.is_fatal_for_batch());
    Ok(())
}

#[test]
fn test_subroutine_limit_is_unsupported() -> Result<()> {
    let mut code = CodeBuilder::new();
    let (other, sub) = (code.label(), code.label());
    code.iload(0)
        .if_(Cond::Eq, other)
        .jsr(sub)
        .vreturn()
        .bind(other)
        .jsr(sub)
        .vreturn()
        .bind(sub)
        .astore(1)
        .ret(1);
    let method = code.into_method("t/T", "fin", "(I)V", true)?;

    let oracle = ClassHierarchy::with_java_lang();
    let config = DecompilerConfig {
        max_subroutine_copies: 0,
        ..DecompilerConfig::default()
    };
    let err = Decompiler::new(&oracle, config)
        .decompile(&method)
        .unwrap_err();
    assert!(matches!(err, Error::Unsupported(_)));

    let result = decompile(&method)?;
    assert!(result.events.has(EventKind::SubroutineInlined));
    assert!(result
        .graph
        .block_ids()
        .into_iter()
        .all(|b| !matches!(
            result.graph.block(b).terminator,
            Terminator::JsrCall { .. } | Terminator::Ret { .. }
        )));
    Ok(())
}
