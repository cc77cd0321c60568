use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use ringplan::expr::planner::Queue;
use ringplan::{define_ntt_modulus, CpuExecutor, Expr, Mod, Shape, Tensor};

define_ntt_modulus!(
    struct Goldilocks, 1, "0xFFFFFFFF00000001",
    two_adicity = 32, root = "0x185629dcda58878c"
);

define_ntt_modulus!(
    struct Q120, 2, "0x800000000000000000000002300001",
    two_adicity = 20, root = "0x25af87a2a0f3075a8d40d0138cd2fb"
);

fn bench_forward<M: ringplan::NttModulus, const N: usize>(
    c: &mut Criterion,
    group: &str,
    queue: &Queue<CpuExecutor>,
) {
    let coeffs = Tensor::from_fn(Shape::new(&[N]), |i| Mod::<M>::from_u64(i as u64 | 1));
    c.bench_with_input(BenchmarkId::new(group, N), &coeffs, |b, coeffs| {
        b.iter(|| {
            let e = Expr::poly_coeff::<N>(coeffs).ntt();
            black_box(queue.run(&e))
        })
    });
}

fn ntt(c: &mut Criterion) {
    let queue = Queue::with_key(CpuExecutor::new(), [1; 8]);
    bench_forward::<Goldilocks, 1024>(c, "ntt/goldilocks", &queue);
    bench_forward::<Goldilocks, 4096>(c, "ntt/goldilocks", &queue);
    bench_forward::<Q120, 1024>(c, "ntt/q120", &queue);

    // Round trip at a production-like size.
    let coeffs = Tensor::from_fn(Shape::new(&[4096]), |i| Mod::<Goldilocks>::from_u64(i as u64));
    c.bench_function("ntt/goldilocks/round_trip/4096", |b| {
        b.iter(|| {
            let forward = queue.run(&Expr::poly_coeff::<4096>(&coeffs).ntt());
            black_box(queue.run(&Expr::poly_ntt::<4096>(&forward).intt()))
        })
    });
}

criterion_group!(benches, ntt);
criterion_main!(benches);
