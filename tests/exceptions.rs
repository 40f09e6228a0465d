//! Exception handling tests: handler normalization through the pipeline and
//! the laws of the exception-set algebra.

use classflow::{
    bytecode::{ClassHierarchy, CodeBuilder, Instruction, InvokeKind, MethodRef},
    compiler::{Decompiler, DecompilerConfig, EventKind},
    structuring::{ExceptionSet, Statement},
    Result,
};

fn hierarchy() -> ClassHierarchy {
    let mut h = ClassHierarchy::with_java_lang();
    h.add_class("t/E1", "java/lang/Exception")
        .add_class("t/E2", "t/E1")
        .add_class("t/E3", "t/E2")
        .add_class("t/F", "java/lang/RuntimeException");
    h
}

/// Sets built from every class of the test hierarchy and their differences.
fn samples(h: &ClassHierarchy) -> Vec<ExceptionSet> {
    let classes = [
        "java/lang/Throwable",
        "java/lang/Exception",
        "java/lang/RuntimeException",
        "java/lang/Error",
        "t/E1",
        "t/E2",
        "t/E3",
        "t/F",
    ];
    let mut sets: Vec<ExceptionSet> = classes.iter().map(|c| ExceptionSet::of(c)).collect();
    sets.push(ExceptionSet::empty());
    sets.push(ExceptionSet::of("t/E1").difference(h, &ExceptionSet::of("t/E2")));
    sets.push(ExceptionSet::all().difference(h, &ExceptionSet::of("java/lang/RuntimeException")));
    sets.push(ExceptionSet::of("t/E3").union(h, &ExceptionSet::of("t/F")));
    sets
}

fn same(h: &ClassHierarchy, a: &ExceptionSet, b: &ExceptionSet) -> bool {
    a.is_subset(h, b) && b.is_subset(h, a)
}

#[test]
fn test_shadowed_catch_excludes_subclass() -> Result<()> {
    // try { a(); } catch (E2 e) { } catch (E1 e) { }
    let mut code = CodeBuilder::new();
    let (start, end, narrow, wide) = (code.label(), code.label(), code.label(), code.label());
    code.bind(start)
        .invoke(InvokeKind::Static, MethodRef::new("t/T", "a", "()V")?)
        .bind(end)
        .vreturn()
        .bind(narrow)
        .insn(Instruction::Pop)
        .vreturn()
        .bind(wide)
        .insn(Instruction::Pop)
        .vreturn();
    code.try_catch(start, end, narrow, Some("t/E2"))
        .try_catch(start, end, wide, Some("t/E1"));
    let method = code.into_method("t/T", "guarded", "()V", true)?;

    let oracle = hierarchy();
    let result = Decompiler::new(&oracle, DecompilerConfig::default()).decompile(&method)?;
    let graph = &result.graph;

    let edges = &graph.block(graph.entry()).handlers;
    assert_eq!(edges.len(), 2);
    assert_eq!(edges[0].catches, ExceptionSet::of("t/E2"));
    let second = edges[1].catches.ranges();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].top(), "t/E1");
    assert!(second[0].holes().contains("t/E2"));
    assert!(!edges[0].catches.overlaps(&oracle, &edges[1].catches));
    assert!(result.events.has(EventKind::HandlerSplit));

    let tries: Vec<_> = result
        .root
        .iter()
        .filter_map(|s| match s {
            Statement::Try { catches, .. } => Some(catches),
            _ => None,
        })
        .collect();
    assert_eq!(tries.len(), 1);
    let clauses = tries[0];
    assert_eq!(clauses.len(), 2);
    assert_eq!(clauses[0].catches, edges[0].catches);
    assert_eq!(clauses[0].handler, edges[0].target);
    assert_eq!(clauses[1].catches, edges[1].catches);
    Ok(())
}

#[test]
fn test_catch_all_after_typed_catch() -> Result<()> {
    // try { a(); } catch (F e) { } finally-style catch of everything else
    let mut code = CodeBuilder::new();
    let (start, end, typed, any) = (code.label(), code.label(), code.label(), code.label());
    code.bind(start)
        .invoke(InvokeKind::Static, MethodRef::new("t/T", "a", "()V")?)
        .bind(end)
        .vreturn()
        .bind(typed)
        .insn(Instruction::Pop)
        .vreturn()
        .bind(any)
        .insn(Instruction::Pop)
        .vreturn();
    code.try_catch(start, end, typed, Some("t/F"))
        .try_catch(start, end, any, None);
    let method = code.into_method("t/T", "any", "()V", true)?;

    let oracle = hierarchy();
    let result = Decompiler::new(&oracle, DecompilerConfig::default()).decompile(&method)?;
    let edges = &result.graph.block(result.graph.entry()).handlers;

    assert_eq!(edges.len(), 2);
    assert!(edges[1].catches.contains(&oracle, "t/E3"));
    assert!(!edges[1].catches.contains(&oracle, "t/F"));
    assert!(edges[0]
        .catches
        .union(&oracle, &edges[1].catches)
        .is_subset(&oracle, &ExceptionSet::all()));
    assert!(ExceptionSet::all().is_subset(&oracle, &edges[0].catches.union(&oracle, &edges[1].catches)));
    Ok(())
}

#[test]
fn test_difference_and_intersection_partition() {
    let h = hierarchy();
    let sets = samples(&h);
    for a in &sets {
        for b in &sets {
            let inside = a.intersect(&h, b);
            let outside = a.difference(&h, b);
            assert!(!inside.overlaps(&h, &outside), "{a} / {b}");
            assert!(same(&h, &inside.union(&h, &outside), a), "{a} / {b}");
            assert!(inside.is_subset(&h, b));
            assert!(!outside.overlaps(&h, b));
        }
    }
}

#[test]
fn test_union_is_commutative_and_idempotent() {
    let h = hierarchy();
    let sets = samples(&h);
    for a in &sets {
        assert!(same(&h, &a.union(&h, a), a));
        for b in &sets {
            let ab = a.union(&h, b);
            assert!(same(&h, &ab, &b.union(&h, a)), "{a} + {b}");
            assert!(a.is_subset(&h, &ab));
            assert!(b.is_subset(&h, &ab));
        }
    }
}

#[test]
fn test_membership_follows_the_hierarchy() {
    let h = hierarchy();
    let e1 = ExceptionSet::of("t/E1");
    let without_e2 = e1.difference(&h, &ExceptionSet::of("t/E2"));

    assert!(e1.contains(&h, "t/E3"));
    assert!(!without_e2.contains(&h, "t/E3"));
    assert!(without_e2.contains(&h, "t/E1"));
    assert!(!without_e2.contains(&h, "t/F"));
    assert!(ExceptionSet::all().contains(&h, "t/Unknown"));
    assert!(ExceptionSet::empty().is_empty());
    assert_eq!(without_e2.to_string(), "t/E1 - {t/E2}");
}
