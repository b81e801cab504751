//! Basic throughput benchmarks for the analyzer and the dispatch loop.
//! Named `basic` to match the single `[[bench]]` target declared in
//! `Cargo.toml`, in the style of the teacher's own `evm` crate.

use std::collections::HashMap;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ethereum_types::{Address, U256};

use evm_core::analysis::Analysis;
use evm_core::frame::{CallContext, Frame, TxContext};
use evm_core::gasometer::RefundCounter;
use evm_core::interpreter;
use evm_core::schedule::Schedule;
use evm_core::shared_cache::SharedCache;
use evm_core::state::{Account, InMemoryState, State};

/// A tight loop: `JUMPDEST PUSH1 1 PUSH1 1 ADD POP PUSH1 0 JUMPI_BACK`-ish
/// counter, repeated enough times to dominate analysis/dispatch overhead.
fn counting_loop_code(iterations: u8) -> Vec<u8> {
    vec![
        0x60, iterations, // PUSH1 iterations
        0x5b, // JUMPDEST (pc=2)
        0x60, 0x01, // PUSH1 1
        0x90, // SWAP1
        0x03, // SUB
        0x80, // DUP1
        0x60, 0x02, // PUSH1 2
        0x57, // JUMPI (back to pc=2 while nonzero)
        0x00, // STOP
    ]
}

fn tx_context() -> TxContext {
    TxContext {
        origin: Address::from_low_u64_be(1),
        gas_price: U256::one(),
        block_coinbase: Address::zero(),
        block_timestamp: 0,
        block_number: 0,
        block_difficulty: U256::zero(),
        block_gas_limit: 30_000_000,
        chain_id: 1,
        base_fee: U256::zero(),
        block_hashes: HashMap::new(),
    }
}

fn bench_analysis(c: &mut Criterion) {
    let code = counting_loop_code(200);
    c.bench_function("analysis/counting_loop", |b| {
        b.iter(|| Analysis::analyze(black_box(&code)))
    });
}

fn bench_interpreter_loop(c: &mut Criterion) {
    let code = Arc::new(counting_loop_code(200));
    let cache = SharedCache::default();
    let analysis = cache.analysis_for(&code);
    let schedule = Schedule::new_cancun();
    let tx = tx_context();

    c.bench_function("interpreter/counting_loop", |b| {
        b.iter(|| {
            let mut state = InMemoryState::new();
            state.set_account(
                Address::from_low_u64_be(100),
                Account {
                    balance: U256::zero(),
                    nonce: 0,
                    code_hash: Default::default(),
                },
            );
            let context = CallContext {
                address: Address::from_low_u64_be(100),
                code_address: Address::from_low_u64_be(100),
                caller: Address::from_low_u64_be(1),
                value: U256::zero(),
                input: Vec::new(),
                is_static: false,
                depth: 0,
                created_this_tx: false,
            };
            let mut frame = Frame::new(context, code.clone(), analysis.clone(), 1_000_000);
            let mut refund = RefundCounter::new();
            black_box(interpreter::run(
                &mut frame,
                &mut state,
                &schedule,
                &cache,
                &mut refund,
                None,
                &tx,
            ))
        })
    });
}

criterion_group!(benches, bench_analysis, bench_interpreter_loop);
criterion_main!(benches);
