//! G-code interpretation micro-benchmark.
//!
//! Measures the per-line cost of the PROCESSING_LINE stage:
//! - `parse_line` on typical move, I/O and comment lines
//! - `plan_move` for absolute and relative G1 moves
//! - parse + plan together, as one tick does

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use hotwire_common::machine::config::MachineConfig;
use hotwire_common::machine::state::Positioning;
use hotwire_control::job::{Block, MoveWord, parse_line, plan_move};

const LINES: &[(&str, &str)] = &[
    ("linear", "G1 X125.375 Y-42.5 F450"),
    ("rapid", "G0 X0 Y0"),
    ("wire_on", "M3 S200"),
    ("comment", "; contour 3 of 12"),
    ("unknown", "G21"),
];

fn bench_parse_line(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_line");
    for (name, line) in LINES {
        group.bench_with_input(BenchmarkId::from_parameter(name), line, |b, line| {
            b.iter(|| parse_line(black_box(line)));
        });
    }
    group.finish();
}

fn bench_plan_move(c: &mut Criterion) {
    let config = MachineConfig::default();
    let word = MoveWord {
        rapid: false,
        x: Some(125.375),
        y: Some(-42.5),
        feed: Some(450.0),
    };

    let mut group = c.benchmark_group("plan_move");
    for positioning in [Positioning::Absolute, Positioning::Relative] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{positioning:?}")),
            &positioning,
            |b, &positioning| {
                b.iter(|| {
                    plan_move(
                        &config,
                        black_box([10.0, 20.0]),
                        positioning,
                        &word,
                        word.feed,
                    )
                });
            },
        );
    }
    group.finish();
}

fn bench_parse_and_plan(c: &mut Criterion) {
    let config = MachineConfig::default();
    let program: Vec<String> = (0..64)
        .map(|i| format!("G1 X{:.3} Y{:.3}", i as f64 * 1.25, (i % 7) as f64 * 3.5))
        .collect();
    let mut index = 0usize;
    let mut position = [0.0, 0.0];

    c.bench_function("parse_and_plan_line", |b| {
        b.iter(|| {
            let line = &program[index % program.len()];
            index += 1;
            if let Ok(Some(Block::Move(word))) = parse_line(black_box(line)) {
                let planned = plan_move(&config, position, Positioning::Absolute, &word, None);
                position = [planned.x_mm, planned.y_mm];
            }
        });
    });
}

criterion_group!(benches, bench_parse_line, bench_plan_move, bench_parse_and_plan);
criterion_main!(benches);
