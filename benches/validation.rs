//! Payload validation throughput benchmarks.

use amtp_gateway::identifiers::SchemaId;
use amtp_gateway::schema::model::{Schema, SchemaMetadata};
use amtp_gateway::schema::negotiation::NegotiationReport;
use amtp_gateway::schema::registry::{MockRegistryClient, RegistryClient};
use amtp_gateway::schema::validator::{Validator, ValidatorConfig};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn make_validator(rt: &Runtime) -> (Validator, NegotiationReport) {
    let id = SchemaId::new("commerce", "order", 1);
    let registry: Arc<dyn RegistryClient> = Arc::new(MockRegistryClient::new());
    let schema = Schema {
        id: id.clone(),
        definition: json!({"type": "object", "required": ["order_id", "amount"]}),
        published_at: chrono::Utc::now(),
        signature: None,
    };
    let metadata = SchemaMetadata::from_schema(&schema);
    rt.block_on(registry.register_schema(schema, metadata)).unwrap();

    let validator = Validator::new(registry, ValidatorConfig::default());
    let negotiation = NegotiationReport {
        requested: id.clone(),
        negotiated: id,
        exact_match: true,
    };
    (validator, negotiation)
}

fn bench_validate(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (validator, negotiation) = make_validator(&rt);

    let mut group = c.benchmark_group("payload_validation");
    for payload_size in [64usize, 1024, 16384] {
        let filler = "x".repeat(payload_size);
        let payload = json!({"order_id": "abc", "amount": 100, "notes": filler}).to_string();
        group.throughput(Throughput::Bytes(payload.len() as u64));

        group.bench_with_input(
            BenchmarkId::new("validate", payload_size),
            &payload,
            |b, payload| {
                b.to_async(&rt).iter(|| async {
                    let report = validator
                        .validate(black_box(payload.as_bytes()), &negotiation)
                        .await
                        .unwrap();
                    black_box(report);
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_validate);
criterion_main!(benches);
