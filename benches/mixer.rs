//! Benchmarks for the mixer hot path
//!
//! Run with: cargo bench --bench mixer

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use xmplay::module::instrument::Sample;
use xmplay::module::{Instrument, LoopMode, Module, ModuleFlags, Pattern};
use xmplay::{Mixer, PlayerState};

/// A module with every channel playing a looped sawtooth.
fn bench_module(channels: usize) -> Module {
    let frames = 4096u32;
    let mut data: Vec<i16> = (0..frames)
        .map(|i| ((i % 256) as i32 * 256 - 32768) as i16)
        .collect();
    data.push(0);

    let mut sample = Sample {
        length: frames,
        loop_start: 0,
        loop_length: frames,
        loop_mode: LoopMode::Normal,
        default_volume: 64,
        default_pan: 128,
        data,
        ..Default::default()
    };
    sample.patch_guard();

    let mut pattern = Pattern::empty(64, channels);
    for ch in 0..channels {
        let cell = pattern.cell_mut(0, ch);
        cell.note = 37 + ch as u8; // chromatic spread around C-3
        cell.instrument = 1;
    }

    Module {
        song_length: 1,
        num_channels: channels,
        flags: ModuleFlags::LINEAR_FREQUENCY,
        default_speed: 6,
        default_bpm: 125,
        order_table: vec![0],
        patterns: vec![pattern],
        instruments: vec![Instrument {
            samples: vec![sample],
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn bench_fill_by_channel_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("fill");

    for channels in [4usize, 16, 32].iter() {
        let mut player = PlayerState::new(bench_module(*channels));
        let mut mixer = Mixer::new(44_100);
        let mut block = vec![0i16; 2 * 4096];
        // Warm up so every voice is sounding.
        mixer.fill(&mut player, &mut block);

        group.bench_with_input(
            BenchmarkId::from_parameter(channels),
            channels,
            |b, _| {
                b.iter(|| {
                    mixer.fill(&mut player, black_box(&mut block));
                });
            },
        );
    }

    group.finish();
}

fn bench_fill_block_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("fill_block");

    for frames in [256usize, 1024, 4096].iter() {
        let mut player = PlayerState::new(bench_module(16));
        let mut mixer = Mixer::new(44_100);
        let mut block = vec![0i16; 2 * frames];
        mixer.fill(&mut player, &mut block);

        group.bench_with_input(BenchmarkId::from_parameter(frames), frames, |b, _| {
            b.iter(|| {
                mixer.fill(&mut player, black_box(&mut block));
            });
        });
    }

    group.finish();
}

fn bench_sequencer_tick(c: &mut Criterion) {
    let mut player = PlayerState::new(bench_module(32));
    let mut mixer = Mixer::new(44_100);

    c.bench_function("sequencer_tick_32ch", |b| {
        b.iter(|| {
            black_box(player.tick(&mut mixer));
        });
    });
}

criterion_group!(
    benches,
    bench_fill_by_channel_count,
    bench_fill_block_sizes,
    bench_sequencer_tick
);
criterion_main!(benches);
