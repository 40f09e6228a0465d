//! Benchmarks for the decompilation pipeline.
//!
//! Methods are generated with `CodeBuilder` at sizes far beyond what `javac`
//! usually emits, so every stage has to work without deep call stacks:
//! - Long chains of two-way branches (thousands of blocks)
//! - Deeply nested counting loops
//! - Verification of long straight-line code

extern crate classflow;

use classflow::{
    bytecode::{ClassHierarchy, CodeBuilder, Cond, InvokeKind, MethodBody, MethodRef},
    compiler::{Decompiler, DecompilerConfig},
    verifier::verify,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

/// `if (x < 0) a(); else b();` repeated `n` times.
fn branch_chain(n: usize) -> MethodBody {
    let a = MethodRef::new("bench/T", "a", "()V").unwrap();
    let b = MethodRef::new("bench/T", "b", "()V").unwrap();
    let mut code = CodeBuilder::new();
    for _ in 0..n {
        let (other, join) = (code.label(), code.label());
        code.iload(0)
            .if_(Cond::Ge, other)
            .invoke(InvokeKind::Static, a.clone())
            .goto(join)
            .bind(other)
            .invoke(InvokeKind::Static, b.clone())
            .bind(join);
    }
    code.vreturn();
    code.into_method("bench/T", "chain", "(I)V", true).unwrap()
}

/// `depth` nested `while (x < 0) { ... a(); }` loops.
fn nested_loops(depth: usize) -> MethodBody {
    let a = MethodRef::new("bench/T", "a", "()V").unwrap();
    let mut code = CodeBuilder::new();
    let heads: Vec<_> = (0..depth).map(|_| (code.label(), code.label())).collect();
    for &(head, exit) in &heads {
        code.bind(head).iload(0).if_(Cond::Ge, exit);
    }
    code.invoke(InvokeKind::Static, a.clone());
    for &(head, exit) in heads.iter().rev() {
        code.goto(head).bind(exit);
        code.invoke(InvokeKind::Static, a.clone());
    }
    code.vreturn();
    code.into_method("bench/T", "nested", "(I)V", true).unwrap()
}

/// `n` additions into one local.
fn straight_line(n: usize) -> MethodBody {
    let mut code = CodeBuilder::new();
    code.iconst(0).istore(1);
    for i in 0..n {
        code.iload(1).iload(0).iadd().iconst(i as i32).iadd().istore(1);
    }
    code.iload(1).ireturn();
    code.into_method("bench/T", "sum", "(I)I", true).unwrap()
}

fn bench_branch_chain(c: &mut Criterion) {
    let oracle = ClassHierarchy::with_java_lang();
    let decompiler = Decompiler::new(&oracle, DecompilerConfig::default());
    let mut group = c.benchmark_group("pipeline_branch_chain");
    group.sample_size(10);
    for n in [100, 1000] {
        let method = branch_chain(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &method, |b, method| {
            b.iter(|| black_box(decompiler.decompile(black_box(method)).unwrap()));
        });
    }
    group.finish();
}

fn bench_nested_loops(c: &mut Criterion) {
    let oracle = ClassHierarchy::with_java_lang();
    let decompiler = Decompiler::new(&oracle, DecompilerConfig::default());
    let method = nested_loops(200);

    let mut group = c.benchmark_group("pipeline_nested_loops");
    group.sample_size(10);
    group.bench_function("depth_200", |b| {
        b.iter(|| black_box(decompiler.decompile(black_box(&method)).unwrap()));
    });
    group.finish();
}

fn bench_verify_straight_line(c: &mut Criterion) {
    let oracle = ClassHierarchy::with_java_lang();
    let method = straight_line(5000);

    c.bench_function("verify_straight_line_5000", |b| {
        b.iter(|| black_box(verify(black_box(&method), &oracle).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_branch_chain,
    bench_nested_loops,
    bench_verify_straight_line,
);

criterion_main!(benches);
