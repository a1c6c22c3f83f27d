use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use burn::prelude::*;
use burn_ndarray::NdArray;

use isahp_rs::isahp::architectures::base::config::ModelConfig;
use isahp_rs::isahp::architectures::base::masking;
use isahp_rs::isahp::architectures::base::model::SelfAttentiveHawkes;
use isahp_rs::isahp::architectures::base::rng::DeterministicRngContext;

type BenchBackend = NdArray<f32>;

fn create_model(
    n_types: usize,
    hidden_size: usize,
    num_heads: usize,
    device: &<BenchBackend as Backend>::Device,
) -> SelfAttentiveHawkes<BenchBackend> {
    let mut config = ModelConfig::new(n_types);
    config.hidden_size = hidden_size;
    config.embedding_dim = hidden_size - 1;
    config.num_heads = num_heads;
    config.seed = 42;

    let ctx = DeterministicRngContext::new(config.seed, device.clone());
    SelfAttentiveHawkes::new(&config, &ctx).expect("valid bench config")
}

fn create_event_batch(
    batch_size: usize,
    seq_len: usize,
    n_types: usize,
    device: &<BenchBackend as Backend>::Device,
) -> Tensor<BenchBackend, 3> {
    // Deterministic, strictly increasing timestamps with cycling types.
    let mut data = Vec::with_capacity(batch_size * seq_len * 2);
    for b in 0..batch_size {
        for pos in 0..seq_len {
            let t = 0.5 + pos as f32 * 0.8 + (b as f32 * 0.13).sin().abs() * 0.1;
            data.push(t);
            data.push(((pos + b) % n_types) as f32);
        }
    }
    Tensor::<BenchBackend, 1>::from_floats(data.as_slice(), device)
        .reshape([batch_size, seq_len, 2])
}

fn bench_forward(c: &mut Criterion) {
    let device = <BenchBackend as Backend>::Device::default();
    let mut group = c.benchmark_group("intensity_attention_forward");
    group.measurement_time(Duration::from_secs(10));

    for &seq_len in &[16usize, 32, 64] {
        let model = create_model(5, 12, 4, &device);
        let batch = create_event_batch(4, seq_len, 5, &device);
        let [n_batch, t_len, _] = batch.dims();
        let times: Tensor<BenchBackend, 2> = batch
            .clone()
            .slice([0..n_batch, 1..t_len, 0..1])
            .squeeze(2);
        let src_mask = masking::combined_mask(&times, 0.0);

        group.bench_with_input(
            BenchmarkId::from_parameter(seq_len),
            &seq_len,
            |bencher, _| {
                bencher.iter(|| {
                    let (mu, alpha, gamma) =
                        model.forward(black_box(&batch), black_box(&src_mask), false);
                    black_box((mu, alpha, gamma))
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_forward);
criterion_main!(benches);
