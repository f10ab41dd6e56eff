use criterion::{black_box, criterion_group, criterion_main, Criterion};

use larmor::config::{SystemTimings, TxConfig};
use larmor::dsp::ddc::PostProcessor;
use larmor::sequence::{AdcEvent, Block, BlockSequence, GradientAxis, GradientEvent, GradientShape};
use larmor::{AcquisitionParameter, SequenceUnroller};
use ndarray::Array2;

fn tx_config() -> TxConfig {
    TxConfig {
        output_limits: [200.0, 6000.0, 6000.0, 6000.0],
        gpa_gain: [4.7; 3],
        gradient_efficiency: [0.4e-3; 3],
        rf_to_mvolt: 1.0,
        spcm_dwell_time: 5e-8,
        high_impedance: false,
    }
}

fn trapezoid_train(blocks: usize) -> BlockSequence {
    let block = Block {
        gx: Some(GradientEvent {
            channel: GradientAxis::X,
            delay: 0.0,
            shape: GradientShape::Trapezoid {
                rise_time: 100e-6,
                flat_time: 300e-6,
                fall_time: 100e-6,
                amplitude: 1e3,
            },
        }),
        adc: Some(AdcEvent {
            delay: 100e-6,
            dead_time: 0.0,
            num_samples: 256,
            dwell: 1e-6,
        }),
        duration: 600e-6,
        ..Block::default()
    };
    BlockSequence::new("bench", vec![block; blocks])
}

fn unroll_bench(c: &mut Criterion) {
    let unroller = SequenceUnroller::new(&tx_config(), SystemTimings::default());
    let params = AcquisitionParameter::default();
    let seq = trapezoid_train(16);
    c.bench_function("unroll 16 trap+adc blocks", |b| {
        b.iter(|| unroller.unroll(black_box(&seq), black_box(&params)))
    });
}

fn ddc_bench(c: &mut Criterion) {
    let gate = Array2::from_shape_fn((2, 4096), |(_, r)| ((r % 64) as i16 - 32) * 256);
    let gates = vec![gate];
    c.bench_function("ddc process 2x4096 gate, q=128", |b| {
        b.iter(|| {
            let mut post = PostProcessor::new();
            post.process(black_box(&gates), &[1.0, 1.0], 2e6, 20e6, 128)
                .unwrap();
            post
        })
    });
}

criterion_group!(unroll, unroll_bench);
criterion_group!(ddc, ddc_bench);
criterion_main!(unroll, ddc);
