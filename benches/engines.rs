//! Interpreter versus compiled execution of the same function. Each
//! `evaluate` call includes spawning its worker thread.
//!
//! Run with:
//! ```bash
//! cargo bench --bench engines
//! ```

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use triform::error::Result;
use triform::expr::{ExprArena, ExprId};
use triform::function::{Function, Options};
use triform::types::Type;
use triform::value::Value;

/// Sum of the elements, wrapping.
fn sum(arena: &ExprArena, xs: ExprId) -> Result<ExprId> {
    let zero = arena.u32(0);
    arena.seq_case(xs, zero, |arena, head, tail| {
        let rest = sum(arena, tail)?;
        arena.add(head, rest)
    })
}

fn list(rng: &mut ChaCha8Rng, n: usize) -> Value {
    Value::Seq(
        (0..n)
            .map(|_| Value::fixed(rng.random_range(0..1000), 32, false).unwrap())
            .collect(),
    )
}

fn bench_sum(c: &mut Criterion) {
    let mut group = c.benchmark_group("sum");
    let mut rng = ChaCha8Rng::seed_from_u64(42);

    for n in [4usize, 16, 64] {
        let input = vec![list(&mut rng, n)];
        group.throughput(Throughput::Elements(n as u64));

        // Memoization keys on environments, which are fresh per call.
        let f = Function::new(vec![Type::seq(Type::u32())], |arena, xs| sum(arena, xs[0]))
            .unwrap()
            .with_options(Options {
                memoize_interpreter: false,
                ..Options::default()
            });
        group.bench_with_input(BenchmarkId::new("interpreter", n), &input, |b, input| {
            b.iter(|| f.evaluate(input).unwrap());
        });

        for depth in [4usize, 64] {
            let compiled = f.compile(depth).unwrap();
            group.bench_with_input(
                BenchmarkId::new(format!("compiled/unroll={}", depth), n),
                &input,
                |b, input| {
                    b.iter(|| compiled.call(input).unwrap());
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_sum);
criterion_main!(benches);
