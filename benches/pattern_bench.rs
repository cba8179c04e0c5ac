use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ledpattern::generate::TestPattern;
use ledpattern::io_stream::PatternWriter;
use ledpattern::verify::{verify, VerifyOptions};
use std::io::Cursor;

fn write_pattern(pattern: &TestPattern) -> Vec<u8> {
    let mut writer = PatternWriter::new(Cursor::new(Vec::new())).unwrap();
    pattern.write_into(&mut writer).unwrap();
    writer.into_inner().unwrap().into_inner()
}

fn bench_write(c: &mut Criterion) {
    let pattern = TestPattern::default();
    c.bench_function("write_10s_3_universes", |b| {
        b.iter(|| write_pattern(black_box(&pattern)))
    });
}

fn bench_verify(c: &mut Criterion) {
    let bytes = write_pattern(&TestPattern::default());
    let summary = VerifyOptions { record_packets: false };

    c.bench_function("verify_10s_3_universes", |b| {
        b.iter(|| verify(Cursor::new(black_box(&bytes)), &summary).unwrap())
    });
    c.bench_function("verify_10s_3_universes_with_listing", |b| {
        b.iter(|| verify(Cursor::new(black_box(&bytes)), &VerifyOptions::default()).unwrap())
    });
}

criterion_group!(benches, bench_write, bench_verify);
criterion_main!(benches);
