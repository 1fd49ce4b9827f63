//! Benchmarks for rule evaluation and report aggregation.
//!
//! Run with: cargo bench -p dma

#![allow(clippy::pedantic)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use dma::evaluator::Evaluator;
use dma::facts::names;
use dma::report::{aggregate, ReportMetadata};
use dma::{Catalog, EngineKind, FactSet, Predicate, Rule, Severity};

fn mysql_facts() -> FactSet {
    FactSet::new()
        .with(names::VERSION, "8.0.36")
        .with(names::VERSION_MAJOR, 8_i64)
        .with(names::VERSION_MINOR, 0_i64)
        .with(names::DATABASE_SIZE_BYTES, 1_073_741_824_i64)
        .with(names::TABLES_WITHOUT_PK, 2_i64)
        .with(names::MYSQL_LOG_BIN, true)
        .with(names::MYSQL_BINLOG_FORMAT, "ROW")
        .with(names::MYSQL_BINLOG_ROW_IMAGE, "FULL")
        .with(names::MYSQL_GTID_MODE, "ON")
        .with(names::MYSQL_SERVER_ID, 1_i64)
        .with(names::MYSQL_NON_INNODB_TABLES, 0_i64)
        .with(names::MYSQL_BINLOG_RETENTION_SECONDS, 604_800_i64)
}

/// Catalog of `size` threshold rules over generated facts.
fn synthetic(size: usize) -> (Catalog, FactSet) {
    let mut facts = FactSet::new();
    let rules = (0..size)
        .map(|i| {
            let fact = format!("synthetic.metric_{i}");
            facts.insert(fact.as_str(), (i % 17) as i64);
            Rule::new(
                &format!("synthetic.rule_{i}"),
                if i % 3 == 0 { Severity::Blocker } else { Severity::Warning },
                "synthetic",
                Predicate::all(vec![
                    Predicate::at_least(&fact, 1.0),
                    Predicate::at_most(&fact, 15.0),
                ]),
            )
        })
        .collect();
    (Catalog::new(rules).unwrap_or_else(|e| panic!("{e}")), facts)
}

/// Benchmark the built-in catalog against a typical MySQL collection
fn bench_builtin_catalog(c: &mut Criterion) {
    let facts = mysql_facts();
    let catalog = Catalog::builtin();

    c.bench_function("evaluate_builtin_mysql", |b| {
        b.iter(|| black_box(Evaluator::new().evaluate(&facts, EngineKind::MySql, catalog)))
    });

    c.bench_function("evaluate_and_aggregate_mysql", |b| {
        b.iter(|| {
            let findings = Evaluator::new().evaluate(&facts, EngineKind::MySql, catalog);
            black_box(aggregate(
                findings,
                ReportMetadata {
                    database_identifier: "bench".to_string(),
                    engine: EngineKind::MySql,
                    collected_at: chrono::Utc::now(),
                },
            ))
        })
    });
}

/// Sequential against parallel evaluation as the catalog grows
fn bench_catalog_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate_by_catalog_size");
    for size in [50, 500, 5000] {
        let (catalog, facts) = synthetic(size);

        group.bench_with_input(BenchmarkId::new("sequential", size), &size, |b, _| {
            b.iter(|| black_box(Evaluator::new().evaluate(&facts, EngineKind::Postgres, &catalog)))
        });
        group.bench_with_input(BenchmarkId::new("parallel", size), &size, |b, _| {
            b.iter(|| {
                black_box(
                    Evaluator::new()
                        .parallel(true)
                        .evaluate(&facts, EngineKind::Postgres, &catalog),
                )
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_builtin_catalog, bench_catalog_size);
criterion_main!(benches);
