//! Benchmarks for definition hashing and dependency resolution
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::OnceLock;

use reagraph_core::{
    define, props, sentinel, Dependency, FieldType, NodeDefinition, NodeKind, Operation, OperationName, Runtime,
    RuntimeConfig, Shape, Value,
};

/// `inc { input }`: one more than its input.
fn inc_kind() -> &'static NodeKind {
    static KIND: OnceLock<NodeKind> = OnceLock::new();
    KIND.get_or_init(|| {
        define("bench_inc", |kind| {
            kind.shape(Shape::empty().required("input", FieldType::Node)).operation(
                OperationName::Evaluate,
                Operation::new(|args| {
                    let n = args
                        .dependency(0)
                        .and_then(sentinel::unwrap_value)
                        .and_then(Value::as_i64)
                        .unwrap_or(0);
                    Ok(sentinel::value(n + 1).into())
                })
                .with_dependencies(|node, _| node.node("input").cloned().map(Dependency::on).into_iter().collect()),
            )
        })
    })
}

fn chain(depth: usize) -> NodeDefinition {
    (0..depth).fold(sentinel::value(0), |input, _| {
        NodeDefinition::create(inc_kind(), props! { "input" => input }).unwrap()
    })
}

fn bench_create(c: &mut Criterion) {
    let mut group = c.benchmark_group("create");
    for depth in [10, 50, 200] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            b.iter(|| black_box(chain(depth)));
        });
    }
    group.finish();
}

fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate_chain");
    for depth in [10, 50, 200] {
        let tree = chain(depth);

        let cached = Runtime::new();
        let node = cached.node(tree.clone());
        group.bench_with_input(BenchmarkId::new("cached", depth), &node, |b, node| {
            b.iter(|| black_box(cached.evaluate(node)));
        });

        let uncached = Runtime::with_config(RuntimeConfig {
            cache_enabled: false,
            ..RuntimeConfig::default()
        });
        let node = uncached.node(tree);
        group.bench_with_input(BenchmarkId::new("uncached", depth), &node, |b, node| {
            b.iter(|| black_box(uncached.evaluate(node)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_create, bench_evaluate);
criterion_main!(benches);
