use criterion::{criterion_group, criterion_main, Criterion};
use rand::prelude::*;

use entity_policy::{
    ActionHead, ActionHeadConfig, HeadKind, Placement, RaggedBuffer, RaggedTensor,
    VecActionMask, VecCategoricalActionMask,
};

const D_MODEL: i64 = 64;
const N_CHOICE: i64 = 8;
const MAX_ENTITIES: i64 = 16;

fn make_batch(env_count: usize) -> (RaggedTensor, RaggedBuffer<i64>, VecActionMask) {
    let mut rng = StdRng::seed_from_u64(0);
    let mut lengths = Vec::new();
    let mut offsets = Vec::new();
    let mut actors = Vec::new();
    let mut next_row = 0;
    for _ in 0..env_count {
        let entities = rng.gen_range(1..=MAX_ENTITIES);
        offsets.push(vec![next_row]);
        actors.push((0..entities).filter(|_| rng.gen()).collect::<Vec<i64>>());
        lengths.push(entities);
        next_row += entities;
    }
    let data = tch::Tensor::randn(&[next_row, D_MODEL], (tch::Kind::Float, tch::Device::Cpu));
    (
        RaggedTensor::new(data, lengths),
        RaggedBuffer::from_sequences(1, &offsets).unwrap(),
        VecCategoricalActionMask::new(RaggedBuffer::from_sequences(1, &actors).unwrap(), None)
            .into(),
    )
}

fn make_head(kind: HeadKind) -> ActionHead {
    let vs = tch::nn::VarStore::new(tch::Device::Cpu);
    let config = ActionHeadConfig::new()
        .with_kind(kind)
        .with_placement(Placement::Inherit);
    ActionHead::new(&vs.root(), D_MODEL, N_CHOICE, config).unwrap()
}

fn discrete_bench(c: &mut Criterion) {
    let head = make_head(HeadKind::Discrete);
    let mut group = c.benchmark_group("discrete_head");
    for env_count in [32, 256] {
        let (x, offsets, mask) = make_batch(env_count);
        group.bench_function(format!("envs: {env_count}"), |b| {
            b.iter(|| tch::no_grad(|| head.forward(&x, &offsets, &mask, None).unwrap()))
        });
    }
}

fn continuous_bench(c: &mut Criterion) {
    let head = make_head(HeadKind::ContinuousRescaled);
    let mut group = c.benchmark_group("continuous_head");
    // Row-by-row log-prob makes this much slower than the discrete head
    group.sample_size(20);
    for env_count in [32, 256] {
        let (x, offsets, mask) = make_batch(env_count);
        group.bench_function(format!("envs: {env_count}"), |b| {
            b.iter(|| tch::no_grad(|| head.forward(&x, &offsets, &mask, None).unwrap()))
        });
    }
}

criterion_group!(benches, discrete_bench, continuous_bench);
criterion_main!(benches);
