use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use waypoint::pattern::{compile, MatchOptions, PathSpec};
use waypoint::route::{ParamVec, Route};

fn bench_compile(c: &mut Criterion) {
    c.bench_function("compile_named_params", |b| {
        b.iter(|| {
            compile(
                &PathSpec::from(black_box("/zoo/:category/animals/:id/toys/:toy_id")),
                &MatchOptions::default(),
            )
            .unwrap()
        })
    });
}

fn bench_match(c: &mut Criterion) {
    let route = Route::new("/zoo/:category/animals/:id/toys/:toy_id").unwrap();
    c.bench_function("match_named_params", |b| {
        b.iter(|| {
            let mut params = ParamVec::new();
            route.match_path(black_box("/zoo/cats/animals/42/toys/7"), &mut params, true)
        })
    });

    let wildcard = Route::new("*").unwrap();
    c.bench_function("match_wildcard", |b| {
        b.iter(|| {
            let mut params = ParamVec::new();
            wildcard.match_path(black_box("/any/path/at/all"), &mut params, true)
        })
    });
}

criterion_group!(benches, bench_compile, bench_match);
criterion_main!(benches);
