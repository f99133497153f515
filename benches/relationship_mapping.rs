//! Benchmarks for relationship candidate scoring.
//!
//! Pairwise scoring is quadratic in basket size, so these measure how
//! candidate generation and validation scale with the number of settled
//! units. Storage is not involved.

// Criterion macros generate items without docs - this is expected for benchmarks
#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss, clippy::explicit_iter_loop)]

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::time::Duration;
use substrate_pipeline::config::RelationshipConfig;
use substrate_pipeline::models::{SemanticType, SubstrateKind};
use substrate_pipeline::services::relationships::{generate_candidates, validate_candidates};
use substrate_pipeline::{BasketId, SubstrateState, SubstrateUnit, WorkspaceId};

const SENTENCES: &[(SemanticType, &str)] = &[
    (SemanticType::Problem, "Signup is vulnerable to spam attacks from bot networks."),
    (SemanticType::Solution, "We should implement rate limiting on the signup API."),
    (SemanticType::Goal, "Our goal is to cut onboarding time for new customers."),
    (SemanticType::Insight, "Customers who finish setup in one day churn far less."),
    (SemanticType::Fact, "The pricing page was redesigned in March."),
    (SemanticType::Metric, "Conversion rose 12% after the pricing page redesign."),
    (SemanticType::Constraint, "The database migration requires a maintenance window."),
    (SemanticType::Action, "Ship the setup script before the next release."),
];

fn basket_units(count: usize) -> Vec<SubstrateUnit> {
    (0..count)
        .map(|i| {
            let (semantic_type, sentence) = SENTENCES[i % SENTENCES.len()];
            let kind = if i % 5 == 4 {
                SubstrateKind::ContextItem
            } else {
                SubstrateKind::Block
            };
            SubstrateUnit::new(
                BasketId::new("bench"),
                WorkspaceId::new("bench"),
                kind,
                semantic_type,
                format!("unit {i}"),
                format!("{sentence} Note {i}."),
            )
            .with_state(SubstrateState::Accepted)
        })
        .collect()
}

fn bench_generate(c: &mut Criterion) {
    let mut group = c.benchmark_group("relationship_generate");
    group.measurement_time(Duration::from_secs(3));
    let config = RelationshipConfig::default();
    let basket = BasketId::new("bench");

    for size in [10usize, 50, 200].iter() {
        let units = basket_units(*size);
        group.throughput(Throughput::Elements((*size * size / 2) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &units, |b, units| {
            b.iter(|| black_box(generate_candidates(&basket, units, &[], &config)));
        });
    }
    group.finish();
}

fn bench_validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("relationship_validate");
    group.measurement_time(Duration::from_secs(3));
    let config = RelationshipConfig {
        max_candidates: 5_000,
        ..RelationshipConfig::default()
    };
    let basket = BasketId::new("bench");
    let candidates = generate_candidates(&basket, &basket_units(200), &[], &config);

    group.bench_function("validate_200_units", |b| {
        b.iter(|| black_box(validate_candidates(candidates.clone(), &config)));
    });
    group.finish();
}

criterion_group!(benches, bench_generate, bench_validate);
criterion_main!(benches);
