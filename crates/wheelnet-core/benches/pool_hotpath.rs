use criterion::{criterion_group, criterion_main, Criterion};
use wheelnet_core::{Pool, PoolConfig};

fn acquire_release(c: &mut Criterion) {
    let pool = Pool::new(PoolConfig {
        payload_size: 1500,
        blocks_per_slab: 512,
        max_slabs: 16,
        mem_tag: 0,
    });

    c.bench_function("pool_acquire_release_steady_state", |b| {
        b.iter(|| {
            let h = pool.acquire(false);
            criterion::black_box(&h);
        })
    });
}

fn acquire_write_release(c: &mut Criterion) {
    let pool = Pool::new(PoolConfig {
        payload_size: 1500,
        blocks_per_slab: 512,
        max_slabs: 16,
        mem_tag: 0,
    });

    c.bench_function("pool_acquire_write_release", |b| {
        b.iter(|| {
            let mut h = pool.acquire(false);
            if let Some(buf) = h.as_mut_slice() {
                buf[0] = 1;
            }
            criterion::black_box(&h);
        })
    });
}

criterion_group!(benches, acquire_release, acquire_write_release);
criterion_main!(benches);
