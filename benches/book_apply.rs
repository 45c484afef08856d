//! Benchmarks for order book operations

use bookfeed::{Level, OrderBook, Side};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rust_decimal::Decimal;

fn create_snapshot(levels: usize) -> OrderBook {
    let mut book = OrderBook::new("BTC-USD").with_sequence(1_000);
    for i in 0..levels {
        book.insert(
            Side::Bid,
            Level {
                price: Decimal::from(50_000 - i as i64),
                amount: Decimal::new(15, 1),
            },
        );
        book.insert(
            Side::Ask,
            Level {
                price: Decimal::from(50_001 + i as i64),
                amount: Decimal::new(15, 1),
            },
        );
    }
    book
}

fn create_delta(sequence: i64) -> OrderBook {
    let mut delta = OrderBook::new("BTC-USD").with_sequence(sequence);
    delta.insert(
        Side::Bid,
        Level {
            price: Decimal::from(49_999),
            amount: Decimal::new(25, 1),
        },
    );
    delta.insert(
        Side::Bid,
        Level {
            price: Decimal::from(49_998),
            amount: Decimal::ZERO,
        },
    );
    delta.insert(
        Side::Ask,
        Level {
            price: Decimal::from(50_002),
            amount: Decimal::new(5, 1),
        },
    );
    delta
}

fn bench_apply_delta(c: &mut Criterion) {
    let snapshot = create_snapshot(100);

    c.bench_function("apply_delta_100_levels", |b| {
        b.iter_batched(
            || (snapshot.clone(), create_delta(1_001)),
            |(mut book, delta)| {
                black_box(book.apply(&delta));
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

fn bench_prune_and_trim(c: &mut Criterion) {
    let snapshot = create_snapshot(500);

    c.bench_function("prune_and_trim_500_levels", |b| {
        b.iter_batched(
            || snapshot.clone(),
            |mut book| {
                book.prune();
                book.truncate_depth(100);
                black_box(book.ask_count());
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_apply_delta, bench_prune_and_trim);
criterion_main!(benches);
