use cellrate::{Gcra, GcraLimiter, ManualClock, MemoryStore, RateParams, TimeUnit};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::time::Duration;

fn decide_throughput(c: &mut Criterion) {
    let gcra = Gcra::new(TimeUnit::Micros);
    let params = RateParams::new(15, 30, 60).unwrap();
    let now = 1_700_000_000_000_000i64;

    c.bench_function("gcra_decide_fresh", |b| {
        b.iter(|| gcra.decide(black_box(0), black_box(&params), black_box(1), black_box(now)))
    });

    c.bench_function("gcra_decide_blocked", |b| {
        let tat = now + params.delay_variation_tolerance(TimeUnit::Micros);
        b.iter(|| gcra.decide(black_box(tat), black_box(&params), black_box(1), black_box(now)))
    });
}

fn limiter_check_throughput(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let clock = ManualClock::new(Duration::from_secs(1_700_000_000));
    let limiter = GcraLimiter::new(MemoryStore::with_clock(clock.clone())).with_clock(clock.clone());

    c.bench_function("limiter_check_memory_store", |b| {
        b.to_async(&rt).iter(|| async {
            clock.advance(Duration::from_millis(10));
            limiter.check(black_box("bench"), 100, 1_000, 1, 1).await.unwrap()
        })
    });
}

criterion_group!(benches, decide_throughput, limiter_check_throughput);
criterion_main!(benches);
