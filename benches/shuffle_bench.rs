use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use nevv::crypto::backend::ristretto_b::RistrettoGroup;
use nevv::crypto::shuffler;
use nevv::util;

fn bench_shuffle(c: &mut Criterion) {
    let group = RistrettoGroup;
    let pk = group.gen_key().public();
    let mut bench_group = c.benchmark_group("shuffle");
    bench_group.sample_size(10);

    for n in [10usize, 100].iter() {
        let (_, es) = util::random_encrypt_ballots(*n, &pk);
        let (e_primes, proof) = shuffler::shuffle_ciphertexts(&pk, &es, b"bench").unwrap();

        bench_group.bench_with_input(BenchmarkId::new("prove", n), &es, |b, es| {
            b.iter(|| shuffler::shuffle_ciphertexts(&pk, black_box(es), b"bench").unwrap())
        });
        bench_group.bench_with_input(BenchmarkId::new("verify", n), &e_primes, |b, e_primes| {
            b.iter(|| {
                assert!(shuffler::verify_ciphertexts(
                    &proof,
                    &pk,
                    &es,
                    black_box(e_primes),
                    b"bench"
                ))
            })
        });
    }

    bench_group.finish();
}

criterion_group!(benches, bench_shuffle);
criterion_main!(benches);
