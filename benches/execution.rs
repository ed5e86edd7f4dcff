//! Benchmarks for module loading and instruction dispatch.

use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use winterp::runtime::{read_binary, Environment, Thread, ThreadOptions, Value};

#[path = "../tests/common.rs"]
mod common;
use common::{WasmBuilder, I32};

/// sum(n): loop accumulating 1..=n, one block, one loop, two locals.
fn sum_module() -> Vec<u8> {
    let mut b = WasmBuilder::new();
    let ty = b.add_type(&[I32], &[I32]);
    #[rustfmt::skip]
    let body = [
        0x20, 0x00, 0x21, 0x02,
        0x02, 0x40,
        0x03, 0x40,
        0x20, 0x02, 0x45, 0x0d, 0x01,
        0x20, 0x01, 0x20, 0x02, 0x6a, 0x21, 0x01,
        0x20, 0x02, 0x41, 0x01, 0x6b, 0x21, 0x02,
        0x0c, 0x00,
        0x0b,
        0x0b,
        0x20, 0x01,
    ];
    let f = b.add_func(ty, &[(2, I32)], &body);
    b.export_func("sum", f);
    b.build()
}

/// fib(n): naive double recursion, exercises call overhead.
fn fib_module() -> Vec<u8> {
    let mut b = WasmBuilder::new();
    let ty = b.add_type(&[I32], &[I32]);
    #[rustfmt::skip]
    let body = [
        0x20, 0x00, 0x41, 0x02, 0x48,       // n < 2
        0x04, 0x7f,                         // if (result i32)
        0x20, 0x00,                         //   n
        0x05,                               // else
        0x20, 0x00, 0x41, 0x01, 0x6b, 0x10, 0x00, // fib(n - 1)
        0x20, 0x00, 0x41, 0x02, 0x6b, 0x10, 0x00, // fib(n - 2)
        0x6a,                               // +
        0x0b,                               // end
    ];
    let f = b.add_func(ty, &[], &body);
    b.export_func("fib", f);
    b.build()
}

fn bench_load(c: &mut Criterion) {
    let bytes = sum_module();
    c.bench_function("load_sum_module", |bench| {
        bench.iter(|| {
            let mut env = Environment::new();
            read_binary(&mut env, None, black_box(&bytes)).unwrap()
        })
    });
}

fn bench_execute(c: &mut Criterion) {
    let mut env = Environment::new();
    let sum = read_binary(&mut env, None, &sum_module()).unwrap();
    let fib = read_binary(&mut env, None, &fib_module()).unwrap();
    let mut thread = Thread::new(ThreadOptions::default());

    // Sanity-check the modules before timing them.
    assert_eq!(
        thread.run_export(&mut env, sum, "sum", &[Value::I32(100)]).unwrap(),
        vec![Value::I32(5050)]
    );
    assert_eq!(
        thread.run_export(&mut env, fib, "fib", &[Value::I32(10)]).unwrap(),
        vec![Value::I32(55)]
    );

    c.bench_function("sum_10k", |bench| {
        bench.iter(|| {
            thread
                .run_export(&mut env, sum, "sum", black_box(&[Value::I32(10_000)]))
                .unwrap()
        })
    });
    c.bench_function("fib_15", |bench| {
        bench.iter(|| {
            thread
                .run_export(&mut env, fib, "fib", black_box(&[Value::I32(15)]))
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_load, bench_execute);
criterion_main!(benches);
