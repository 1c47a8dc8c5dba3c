//! Criterion benchmarks for the solver protocol: slot assignment, symbolic
//! coordinates (tree vs bytecode evaluation), and hierarchical updates.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use nalgebra::Point3;
use rand::{rngs::StdRng, Rng, SeedableRng};
use shapefit::expr::VM;
use shapefit::{Feature, Reconstruction, Shape};

/// A chain of `depth` shapes, each with a handful of features.
fn chain(depth: usize, seed: u64) -> Reconstruction {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut rec = Reconstruction::new();
    let mut prev = None;
    for _ in 0..depth {
        let feats: Vec<_> = (0..8)
            .map(|_| {
                Feature::new(Point3::new(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                ))
            })
            .collect();
        let (id, _) = rec
            .add_shape_with_features(Shape::new(), feats)
            .expect("fresh features");
        if let Some(p) = prev {
            rec.insert_child(p, id).expect("new edge");
        }
        prev = Some(id);
    }
    rec
}

fn bench_variables(c: &mut Criterion) {
    let mut group = c.benchmark_group("variables");
    for &depth in &[1usize, 4, 16] {
        let mut rec = chain(depth, 7);
        let n = rec.update_variable_index();
        let x = rec.initial_variable_values(n).expect("slots");
        let leaf = rec.shapes().len() - 1;
        let fid = rec.shapes()[leaf].features()[0];

        group.bench_with_input(BenchmarkId::new("build_exprs", depth), &depth, |b, _| {
            b.iter(|| rec.compute_feature_coordinates(fid).expect("assigned"))
        });

        let exprs = rec.compute_feature_coordinates(fid).expect("assigned");
        group.bench_with_input(BenchmarkId::new("eval_tree", depth), &depth, |b, _| {
            b.iter(|| exprs.iter().map(|e| e.eval(&x)).sum::<f64>())
        });

        let compiled: Vec<_> = exprs.iter().map(|e| e.compile()).collect();
        group.bench_with_input(BenchmarkId::new("eval_bytecode", depth), &depth, |b, _| {
            let mut stack = Vec::new();
            b.iter(|| {
                compiled
                    .iter()
                    .map(|bc| VM::execute(bc, &x, &mut stack))
                    .sum::<f64>()
            })
        });

        group.bench_with_input(BenchmarkId::new("update_values", depth), &depth, |b, _| {
            b.iter(|| rec.update_variable_values(&x).expect("acyclic"))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_variables);
criterion_main!(benches);
