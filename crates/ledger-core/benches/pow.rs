use criterion::{criterion_group, criterion_main, Criterion};
use ledger_core::{Block, Payload, Transaction};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde_json::json;
use std::sync::atomic::AtomicBool;

fn bench_pow(c: &mut Criterion) {
    c.bench_function("mine_block_difficulty_4", |b| {
        let mut rng = StdRng::seed_from_u64(42);
        let txs: Vec<Transaction> = (0..10)
            .map(|i| {
                let mut payload = Payload::new();
                payload.insert("amount".into(), json!(rng.gen_range(1..10)));
                Transaction::new(format!("alice-{i}"), "bob", payload)
            })
            .collect();
        let block = Block::new(1, txs, "0".repeat(64));
        let cancel = AtomicBool::new(false);

        b.iter(|| {
            let mut candidate = block.clone();
            candidate.mine(4, &cancel).unwrap();
            candidate
        });
    });
}

criterion_group!(benches, bench_pow);
criterion_main!(benches);
