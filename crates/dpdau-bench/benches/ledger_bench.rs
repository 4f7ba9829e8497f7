use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dpdau_core::{ActivityEntry, Ledger};

fn entry(day: &str, key: u8) -> ActivityEntry {
    ActivityEntry {
        day: day.to_string(),
        user_key: vec![key; 32],
        user_root: vec![key; 32],
        op: '+',
        metadata_json: "{}".to_string(),
    }
}

fn bench_record_activity_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger_record_activity_batch");
    for size in [100usize, 1_000, 10_000] {
        group.bench_function(format!("{size}_events"), |b| {
            b.iter(|| {
                let ledger = Ledger::open_in_memory().unwrap();
                let entries: Vec<ActivityEntry> =
                    (0..size).map(|i| entry("2025-10-01", (i % 251) as u8)).collect();
                ledger.record_activity_batch(&entries).unwrap();
                black_box(&ledger);
            });
        });
    }
    group.finish();
}

fn bench_fetch_day_events(c: &mut Criterion) {
    let ledger = Ledger::open_in_memory().unwrap();
    let entries: Vec<ActivityEntry> = (0..20_000u32).map(|i| entry("2025-10-01", (i % 251) as u8)).collect();
    ledger.record_activity_batch(&entries).unwrap();

    c.bench_function("ledger_fetch_day_events_20k", |b| {
        b.iter(|| black_box(ledger.fetch_day_events("2025-10-01").unwrap()));
    });
}

criterion_group!(benches, bench_record_activity_batch, bench_fetch_day_events);
criterion_main!(benches);
