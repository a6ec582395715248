use arith::Fp64;
use criterion::{Criterion, criterion_group, criterion_main};
use lingen::{MatPoly, TreeStats, mul};
use sampling::source::Source;

const P: u64 = 0xffffffff00000001;

fn random_matpoly(field: Fp64, m: usize, n: usize, len: usize, seed: u8) -> MatPoly<Fp64> {
    let mut a: MatPoly<Fp64> = MatPoly::new(field, m, n, len);
    a.zero_pad(len);
    let mut source: Source = Source::new([seed; 32]);
    a.fill_random(0, len, &mut source);
    a
}

fn bench_mul(crit: &mut Criterion) {
    let field: Fp64 = Fp64::new(P).unwrap();
    for len in [64usize, 256, 1024] {
        let a: MatPoly<Fp64> = random_matpoly(field, 4, 4, len, 1);
        let b: MatPoly<Fp64> = random_matpoly(field, 4, 4, len, 2);
        crit.bench_function(&format!("mul 4x4 len {}", len), |bench| {
            bench.iter(|| {
                let mut stats: TreeStats = TreeStats::new();
                let mut c: MatPoly<Fp64> = MatPoly::new(field, 4, 4, 0);
                mul(&mut stats, &mut c, &a, &b, None).unwrap();
                c
            })
        });
    }
}

criterion_group!(benches, bench_mul);
criterion_main!(benches);
