//! Audio Performance Benchmarks
//!
//! Benchmarks for validating that the engine meets real-time audio processing
//! requirements at various sample rates, buffer sizes, and polyphony levels.
//!
//! ## Real-Time Audio Constraints
//!
//! For real-time audio, we must process a buffer of samples before the next
//! buffer arrives. The time budget is:
//!
//! ```text
//! time_budget = buffer_size / sample_rate
//! ```
//!
//! | Sample Rate | Buffer 64  | Buffer 128 | Buffer 256 | Buffer 512 |
//! |-------------|------------|------------|------------|------------|
//! | 44.1 kHz    | 1.45 ms    | 2.90 ms    | 5.80 ms    | 11.61 ms   |
//! | 48 kHz      | 1.33 ms    | 2.67 ms    | 5.33 ms    | 10.67 ms   |
//! | 96 kHz      | 0.67 ms    | 1.33 ms    | 2.67 ms    | 5.33 ms    |
//! | 192 kHz     | 0.33 ms    | 0.67 ms    | 1.33 ms    | 2.67 ms    |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kantele::prelude::*;

const SAMPLE_RATES: [f64; 4] = [44100.0, 48000.0, 96000.0, 192000.0];
const BUFFER_SIZES: [usize; 4] = [64, 128, 256, 512];
const VOICE_COUNTS: [usize; 5] = [1, 4, 8, 16, 32];

fn sr_name(sample_rate: f64) -> String {
    format!("{}kHz", sample_rate as u32 / 1000)
}

fn engine_config(audio_rate: f64, buffer_size: usize, voice_count: usize) -> EngineConfig {
    EngineConfig {
        audio_rate,
        buffer_size,
        voice_count,
        event_queue_size: 64,
        channel_count: 1,
    }
}

/// One instrument, one sine generator, wired straight to the root output.
fn sine_instrument(voice_count: usize) -> Instrument {
    let mut instrument = Instrument::new();
    instrument
        .set_generator(
            0,
            GeneratorDef {
                kind: GeneratorKind::Sine,
                voice_count,
            },
        )
        .unwrap();
    instrument.connections = vec![("gen_00/C/out_00".to_string(), "out_00".to_string())];
    instrument
}

/// Same, with a filter and gain effect between the generator and the output.
fn sine_instrument_with_effects(voice_count: usize) -> Instrument {
    let mut instrument = sine_instrument(voice_count);
    let mut effect = EffectDef::default();
    effect.dsps.insert(
        0,
        DspKind::Filter {
            order: 2,
            normalized_cutoff: 0.3,
        },
    );
    effect.dsps.insert(1, DspKind::Gain { gain: 0.8 });
    effect.connections = vec![
        ("in_00".to_string(), "dsp_00/C/in_00".to_string()),
        ("dsp_00/C/out_00".to_string(), "dsp_01/C/in_00".to_string()),
        ("dsp_01/C/out_00".to_string(), "out_00".to_string()),
    ];
    instrument.set_effect(0, effect).unwrap();
    instrument.connections = vec![
        ("gen_00/C/out_00".to_string(), "eff_00/in_00".to_string()),
        ("eff_00/out_00".to_string(), "out_00".to_string()),
    ];
    instrument
}

fn engine_with_instrument(instrument: Instrument, audio_rate: f64, buffer_size: usize, voice_count: usize) -> Engine {
    let mut engine = Engine::new(engine_config(audio_rate, buffer_size, voice_count)).unwrap();
    engine.composition_mut().set_instrument(1, instrument).unwrap();
    engine.composition_mut().root_connections = vec![("ins_01/out_00".to_string(), "out_00".to_string())];
    engine
}

/// A pattern that fires `note_count` overlapping note-ons in rapid
/// succession on channel 0, after selecting instrument 1.
fn polyphony_pattern(note_count: usize) -> Pattern {
    let mut pattern = Pattern::new(Timestamp::new(1, 0), 1);
    let column = pattern.column_mut(0).unwrap();
    column.insert(Timestamp::ZERO, "I", Value::Int(1)).unwrap();
    for i in 0..note_count {
        let pitch = 110.0 * 1.05_f64.powi(i as i32);
        column
            .insert(Timestamp::new(0, (i + 1) as i64), "n+", Value::Float(pitch))
            .unwrap();
    }
    pattern
}

/// Builds an engine with `instrument` and `note_count` sine voices already
/// ringing (triggered once via a one-shot pattern, then playback stopped so
/// the timed loop measures steady-state mixing, not scheduling).
fn engine_with_active_voices(
    instrument: Instrument,
    audio_rate: f64,
    buffer_size: usize,
    voice_count: usize,
    note_count: usize,
) -> Engine {
    let mut engine = engine_with_instrument(instrument, audio_rate, buffer_size, voice_count);
    engine.composition_mut().push_pattern(polyphony_pattern(note_count));
    let mut sub_song = SubSong::new(120.0);
    sub_song.push_pattern(0);
    engine.composition_mut().push_sub_song(sub_song);
    engine.play_sub_song(1).unwrap();
    engine.render(note_count as u32 + 8);
    engine.stop();
    engine
}

// ============================================================================
// Render throughput across sample rate / buffer size
// ============================================================================

fn bench_render_simple_instrument(c: &mut Criterion) {
    let mut group = c.benchmark_group("render/simple_instrument");

    for sample_rate in SAMPLE_RATES {
        for buffer_size in BUFFER_SIZES {
            let name = format!("{}/{}samples", sr_name(sample_rate), buffer_size);
            group.throughput(Throughput::Elements(buffer_size as u64));
            group.bench_with_input(BenchmarkId::new("tick", &name), &(sample_rate, buffer_size), |b, &(sr, bs)| {
                let mut engine = engine_with_active_voices(sine_instrument(4), sr, bs, 4, 4);
                b.iter(|| black_box(engine.render(bs as u32)));
            });
        }
    }

    group.finish();
}

fn bench_render_with_effects(c: &mut Criterion) {
    let mut group = c.benchmark_group("render/instrument_with_effects");

    for sample_rate in SAMPLE_RATES {
        let name = sr_name(sample_rate);
        group.throughput(Throughput::Elements(256));
        group.bench_with_input(BenchmarkId::new("tick_256", &name), &sample_rate, |b, &sr| {
            let mut engine = engine_with_active_voices(sine_instrument_with_effects(4), sr, 256, 4, 4);
            b.iter(|| black_box(engine.render(256)));
        });
    }

    group.finish();
}

// ============================================================================
// Polyphony scaling
// ============================================================================

fn bench_polyphony_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("polyphony/voice_scaling");

    let sample_rate = 48_000.0;
    let buffer_size = 256;

    for &num_voices in &VOICE_COUNTS {
        group.throughput(Throughput::Elements(buffer_size as u64));
        group.bench_with_input(
            BenchmarkId::new("render_256", num_voices),
            &num_voices,
            |b, &voices| {
                let mut engine =
                    engine_with_active_voices(sine_instrument(voices), sample_rate, buffer_size, voices, voices);
                b.iter(|| black_box(engine.render(buffer_size as u32)));
            },
        );
    }

    group.finish();
}

// ============================================================================
// Voice pool allocation (no graph/render overhead)
// ============================================================================

fn bench_voice_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("voice_pool/allocate_release");

    for &num_voices in &VOICE_COUNTS {
        group.bench_with_input(
            BenchmarkId::new("note_on_off", num_voices),
            &num_voices,
            |b, &voices| {
                let mut pool = VoicePool::new(voices, || VoiceState::Sine {
                    phase: 0.0,
                    pitch: 440.0,
                    force: 1.0,
                });
                let mut group_id = 0u64;

                b.iter(|| {
                    group_id += 1;
                    let state = VoiceState::Sine {
                        phase: 0.0,
                        pitch: black_box(440.0),
                        force: black_box(0.8),
                    };
                    let index = pool.allocate(None, group_id, 0, 0, 0.8, state);
                    black_box(index);
                    if let Some(index) = index {
                        pool.release(index);
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_voice_stealing(c: &mut Criterion) {
    let mut group = c.benchmark_group("voice_pool/stealing");

    let num_voices = 8;
    group.bench_function("steal_when_full", |b| {
        b.iter(|| {
            let mut pool = VoicePool::new(num_voices, || VoiceState::Sine {
                phase: 0.0,
                pitch: 440.0,
                force: 1.0,
            });
            for i in 0..num_voices {
                pool.allocate(
                    None,
                    i as u64,
                    0,
                    0,
                    1.0,
                    VoiceState::Sine {
                        phase: 0.0,
                        pitch: 110.0 + i as f64,
                        force: 1.0,
                    },
                );
            }
            // every further allocation must steal.
            let stolen = pool.allocate(
                None,
                99,
                0,
                0,
                1.0,
                VoiceState::Sine {
                    phase: 0.0,
                    pitch: 880.0,
                    force: 1.0,
                },
            );
            black_box(stolen);
        });
    });

    group.finish();
}

// ============================================================================
// Generator and DSP kernels in isolation
// ============================================================================

fn bench_generators(c: &mut Criterion) {
    let mut group = c.benchmark_group("devices/generators");

    let kinds = [
        ("sine", GeneratorKind::Sine),
        ("pulse", GeneratorKind::Pulse { duty: 0.5, band_limited: false }),
        ("noise", GeneratorKind::Noise { seed: 1 }),
        ("additive8", GeneratorKind::Additive { harmonics: 8 }),
    ];

    for (label, kind) in kinds {
        group.throughput(Throughput::Elements(256));
        group.bench_function(label, |b| {
            let mut device = GeneratorDevice::new(kind, 8);
            for i in 0..8 {
                device.trigger(None, i as u64, 0, 0, 0.8, 220.0 + i as f64 * 10.0);
            }
            let mut out = vec![AudioBuffer::new(256)];
            b.iter(|| {
                out[0].clear(0, 256);
                device.process(&[], &mut out, 0, 256, 48_000.0, 120.0);
                black_box(out[0].get(0))
            });
        });
    }

    group.finish();
}

fn bench_dsps(c: &mut Criterion) {
    let mut group = c.benchmark_group("devices/dsps");

    let kinds = [
        ("filter", DspKind::Filter { order: 4, normalized_cutoff: 0.25 }),
        ("gain", DspKind::Gain { gain: 0.7 }),
        ("panning", DspKind::Panning { pan: -0.3 }),
        (
            "chorus",
            DspKind::Chorus {
                voices: vec![
                    kantele::dsp::ChorusVoiceParams {
                        delay: 0.01,
                        range: 0.002,
                        speed: 0.5,
                        volume: 1.0,
                    };
                    4
                ],
            },
        ),
        (
            "freeverb",
            DspKind::Freeverb {
                room_size: 0.6,
                damp: 0.3,
                wet: 0.4,
                dry: 0.6,
            },
        ),
    ];

    for (label, kind) in kinds {
        group.throughput(Throughput::Elements(256));
        group.bench_function(label, |b| {
            let mut device = kind.build(48_000.0);
            let input = AudioBuffer::new(256);
            let mut out = vec![AudioBuffer::new(256)];
            b.iter(|| {
                out[0].clear(0, 256);
                device.process(&[Some(&input)], &mut out, 0, 256, 48_000.0, 120.0);
                black_box(out[0].get(0))
            });
        });
    }

    group.finish();
}

// ============================================================================
// Buffer primitives
// ============================================================================

fn bench_buffer_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("buffer/primitives");

    for size in BUFFER_SIZES {
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("clear", size), &size, |b, &sz| {
            let mut buf = AudioBuffer::new(sz);
            b.iter(|| {
                buf.clear(0, sz);
                black_box(buf.get(0))
            });
        });

        group.bench_with_input(BenchmarkId::new("mix_from", size), &size, |b, &sz| {
            let mut a = AudioBuffer::new(sz);
            let mut src = AudioBuffer::new(sz);
            for i in 0..sz {
                src.set(i, i as f64 * 0.001, i as f64 * 0.001);
            }
            b.iter(|| {
                a.mix_from(black_box(&src), 0, sz);
                black_box(a.get(0))
            });
        });

        group.bench_with_input(BenchmarkId::new("apply_pan", size), &size, |b, &sz| {
            let mut buf = AudioBuffer::new(sz);
            for i in 0..sz {
                buf.set(i, 1.0, 1.0);
            }
            b.iter(|| {
                buf.apply_pan(0, sz, black_box(-0.4));
                black_box(buf.peak())
            });
        });
    }

    group.finish();
}

// ============================================================================
// Real-time compliance: full render against common pro-audio configurations
// ============================================================================

fn bench_realtime_compliance(c: &mut Criterion) {
    let mut group = c.benchmark_group("realtime_compliance");

    let configs = [
        ("44.1kHz/256", 44100.0, 256),
        ("48kHz/256", 48000.0, 256),
        ("48kHz/128", 48000.0, 128),
        ("96kHz/256", 96000.0, 256),
        ("96kHz/128", 96000.0, 128),
        ("192kHz/256", 192000.0, 256),
    ];

    for (name, sample_rate, buffer_size) in configs {
        let time_budget_ns = (buffer_size as f64 / sample_rate) * 1_000_000_000.0;

        group.throughput(Throughput::Elements(buffer_size as u64));
        group.bench_with_input(
            BenchmarkId::new("instrument_with_effects", name),
            &(sample_rate, buffer_size),
            |b, &(sr, bs)| {
                let mut engine = engine_with_active_voices(sine_instrument_with_effects(8), sr, bs, 8, 8);
                b.iter(|| black_box(engine.render(bs as u32)));
            },
        );

        eprintln!("  {}: budget = {:.0}ns ({:.2}ms)", name, time_budget_ns, time_budget_ns / 1_000_000.0);
    }

    group.finish();
}

criterion_group!(render_benches, bench_render_simple_instrument, bench_render_with_effects);
criterion_group!(polyphony_benches, bench_polyphony_scaling, bench_voice_allocation, bench_voice_stealing);
criterion_group!(device_benches, bench_generators, bench_dsps);
criterion_group!(buffer_benches, bench_buffer_operations);
criterion_group!(realtime_benches, bench_realtime_compliance);

criterion_main!(render_benches, polyphony_benches, device_benches, buffer_benches, realtime_benches);
