//! Performance benchmarks for a3s-wallet
//!
//! Run with: cargo bench

use a3s_wallet::{
    AgentTransport, ConnectionRequest, EventEmitter, MemoryTransport, NetworkType, PendingRequests,
    TxStatusData,
};
use criterion::{criterion_group, criterion_main, Criterion};

fn bench_correlation(c: &mut Criterion) {
    let success: TxStatusData = serde_json::from_value(serde_json::json!({
        "status": "success",
        "txBlockResult": {"hash": "abc", "stamps_used": 12},
        "uid": "tx-1"
    }))
    .unwrap();
    let cancelled: TxStatusData = serde_json::from_value(serde_json::json!({
        "errors": ["User rejected"],
        "status": "Transaction Cancelled",
        "rejected": "{\"uid\":\"tx-2\",\"contractName\":\"con_swap\"}"
    }))
    .unwrap();

    c.bench_function("correlation_uid (success)", |b| {
        b.iter(|| success.correlation_uid());
    });

    c.bench_function("correlation_uid (cancelled)", |b| {
        b.iter(|| cancelled.correlation_uid());
    });
}

fn bench_connection_request(c: &mut Criterion) {
    let request = ConnectionRequest::new("Swap Pad", "con_swap", NetworkType::Main)
        .unwrap()
        .with_network_name("arko")
        .with_pre_approval(500, "Trade without prompts");

    c.bench_function("ConnectionRequest wire json", |b| {
        b.iter(|| request.to_wire_json().unwrap());
    });

    let json = request.to_wire_json().unwrap();
    c.bench_function("ConnectionRequest parse", |b| {
        b.iter(|| ConnectionRequest::from_json(&json).unwrap());
    });
}

fn bench_dispatch(c: &mut Criterion) {
    let registry = PendingRequests::new();
    c.bench_function("PendingRequests register+resolve", |b| {
        b.iter(|| {
            registry.register("tx-1", Box::new(|_| {}));
            registry.resolve("tx-1", serde_json::Value::Null)
        });
    });

    let emitter: EventEmitter = EventEmitter::new();
    for _ in 0..8 {
        emitter.on("txStatus", |_| {});
    }
    let payload = serde_json::json!({"data": {"uid": "tx-1"}});
    c.bench_function("EventEmitter emit (8 listeners)", |b| {
        b.iter(|| emitter.emit("txStatus", &payload));
    });
}

fn bench_memory_publish(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let transport = MemoryTransport::default();

    c.bench_function("MemoryTransport publish", |b| {
        b.to_async(&rt).iter(|| async {
            transport
                .publish("lamdenWalletTxStatus", serde_json::json!({"data": {"uid": "tx-1"}}))
                .await
                .unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_correlation,
    bench_connection_request,
    bench_dispatch,
    bench_memory_publish,
);
criterion_main!(benches);
