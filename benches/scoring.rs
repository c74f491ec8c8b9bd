use criterion::{black_box, criterion_group, criterion_main, Criterion};

use vscreen::scoring::{pair_index, ScoringFunction};
use vscreen::XsType;

fn bench_precalculate_row(c: &mut Criterion) {
    let rs = ScoringFunction::sampling_radii();

    c.bench_function("precalculate_row", |b| {
        b.iter(|| {
            black_box(ScoringFunction::precalculate(
                XsType::CarbonH,
                XsType::OxygenA,
                &rs,
            ));
        })
    });
}

fn bench_evaluate(c: &mut Criterion) {
    let sf = ScoringFunction::new();
    let p = pair_index(XsType::CarbonH, XsType::NitrogenD);

    c.bench_function("evaluate_table", |b| {
        b.iter(|| {
            let mut acc = 0.0;
            let mut r2 = 0.3;
            while r2 < 63.0 {
                acc += sf.evaluate(p, r2).e;
                r2 += 0.17;
            }
            black_box(acc);
        })
    });
}

criterion_group!(scoring_benches, bench_precalculate_row, bench_evaluate);
criterion_main!(scoring_benches);
