use std::fmt::Write as _;

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use customer_feeds::builder::{build_csv, build_json};
use customer_feeds::columns::{ColumnCatalog, ColumnSpec, DataType};
use customer_feeds::customer::{Customer, CustomerConfig, FileFormat};
use customer_feeds::editor;
use customer_feeds::io_utils::{SOURCE_DELIMITER, read_frame};
use encoding_rs::WINDOWS_1252;

fn generate_extract(rows: usize) -> Vec<u8> {
    let mut text = String::from("TapahtumaId;PARConcern;Pvm;Kello;Paino;Hinta;Selite;Ylim\nmeta;;;;;;;\n");
    for i in 0..rows {
        let day = (i % 28) + 1;
        let hour = i % 24;
        writeln!(
            text,
            "T{i};100;{day:02}.01.2024;{hour}:{:02}:00;{},{};{}.5;rivi {i};x",
            i % 60,
            i % 1000,
            i % 10,
            i % 500
        )
        .expect("row");
    }
    text.into_bytes()
}

fn customer() -> Customer {
    let base: ColumnCatalog = [
        ColumnSpec::new("TapahtumaId", "TapahtumaId", DataType::String { length: Some(255) }),
        ColumnSpec::new("PARConcern", "Konserninumero", DataType::String { length: None }),
        ColumnSpec::new("Pvm", "Pvm", DataType::String { length: None }),
        ColumnSpec::new("Kello", "Kello", DataType::String { length: None }),
        ColumnSpec::new("Paino", "Paino", DataType::Float { decimals: Some(3) }),
        ColumnSpec::new("Hinta", "Hinta", DataType::Float { decimals: Some(2) }),
        ColumnSpec::new("Selite", "Selite", DataType::String { length: None }),
    ]
    .into_iter()
    .collect();
    let config = CustomerConfig {
        name: "bench".into(),
        concern_ids: [100].into_iter().collect(),
        source_container: "bench/".into(),
        destination_container: "bench-out/".into(),
        file_format: FileFormat::Json,
        file_encoding: "utf-8".into(),
        extra_columns: None,
        exclude_columns: None,
        enabled: true,
    };
    Customer::new(config, &base).expect("customer")
}

fn bench_editor(c: &mut Criterion) {
    let bytes = generate_extract(20_000);
    let raw = read_frame(&bytes, SOURCE_DELIMITER, WINDOWS_1252).expect("parse extract");
    let customer = customer();
    let edited = editor::run(&raw, &customer).expect("edit extract");

    let mut group = c.benchmark_group("editor_pipeline");

    group.bench_function("parse_extract", |b| {
        b.iter(|| read_frame(&bytes, SOURCE_DELIMITER, WINDOWS_1252).expect("parse"));
    });

    group.bench_function("edit", |b| {
        b.iter_batched(
            || (),
            |_| editor::run(&raw, &customer).expect("edit"),
            BatchSize::SmallInput,
        );
    });

    group.bench_function("build_csv", |b| {
        b.iter(|| build_csv(&edited).expect("csv"));
    });

    group.bench_function("build_json", |b| {
        b.iter(|| build_json(&edited, customer.publish_mapping().decimals_map()));
    });

    group.finish();
}

criterion_group!(benches, bench_editor);
criterion_main!(benches);
