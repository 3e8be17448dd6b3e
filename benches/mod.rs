use criterion::{black_box, criterion_group, criterion_main, Criterion};

use mbo_engine::prelude::*;

fn add(side: Side, price: i64, size: u32, order_id: u64) -> MboRecord {
    MboRecord {
        ts_event: 0,
        ts_recv: 0,
        hd: RecordHeader {
            rtype: 0,
            publisher_id: 0,
            instrument_id: 0,
        },
        action: Action::Add,
        side,
        price,
        size,
        channel_id: 0,
        order_id,
        flags: Flags::empty(),
        ts_in_delta: 0,
        sequence: 0,
    }
}

fn bench_add_throughput(c: &mut Criterion) {
    c.bench_function("book_add_10k_orders", |b| {
        b.iter(|| {
            let mut book = OrderBook::new("XYZ", 10);
            for i in 0..10_000u64 {
                let side = if i % 2 == 0 { Side::Bid } else { Side::Ask };
                let price = 100_000 + (i % 500) as i64;
                book.apply(black_box(&add(side, price, 1, i))).unwrap();
            }
            black_box(book.bbo());
        });
    });
}

fn bench_snapshot_capture(c: &mut Criterion) {
    let mut book = OrderBook::new("XYZ", 10);
    for i in 0..2_000u64 {
        let side = if i % 2 == 0 { Side::Bid } else { Side::Ask };
        let price = 100_000 + (i % 500) as i64;
        book.apply(&add(side, price, 1, i)).unwrap();
    }
    let event = add(Side::Bid, 100_000, 1, 999_999);

    c.bench_function("snapshot_capture_top_10", |b| {
        b.iter(|| black_box(BookSnapshot::capture(&book, black_box(&event))));
    });
}

fn bench_ring_buffer_push_pop(c: &mut Criterion) {
    let ring = RingBuffer::<u64>::new(4096).unwrap();
    c.bench_function("ring_buffer_try_push_try_pop", |b| {
        b.iter(|| {
            ring.try_push(black_box(1)).unwrap();
            black_box(ring.try_pop().unwrap());
        });
    });
}

criterion_group!(
    benches,
    bench_add_throughput,
    bench_snapshot_capture,
    bench_ring_buffer_push_pop
);
criterion_main!(benches);
