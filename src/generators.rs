//! Generator devices: the `gen_XX` graph nodes, each a [`VoicePool`] plus a
//! default-state factory for its kind (§4.E).
//!
//! Grounded on `original_source/src/lib/generators/Generator_debug.c`,
//! `Generator_pulse.c` and `Voice_state_sine.h` for the per-kind render
//! algorithms (absorbed into [`crate::voice::VoiceState`]), and on
//! `original_source/src/lib/player/Voice_pool.h` for the idea that a
//! generator owns the pool of voices assigned to it and mixes them in one
//! pass. Unlike the original's single engine-wide pool shared by every
//! generator, each generator here owns its own pool: simpler to express
//! safely as a plain `Device` without a second shared-ownership mechanism,
//! and still consistent with "processors borrow a voice for the duration of
//! one render" (§5) since note events target one generator's pool directly.

use crate::buffer::AudioBuffer;
use crate::device::Device;
use crate::port::{PortSpec, SignalKind};
use crate::voice::{VoicePool, VoiceState};
use std::sync::Arc;

/// How a PCM voice's cursor behaves once it reaches [`SampleData::loop_end`]
/// (spec §4.E: "loop modes {none, forward, ping-pong}").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    /// Play through once and die.
    None,
    /// Jump back to `loop_start` and continue forward.
    Forward,
    /// Reverse direction at each loop boundary instead of jumping.
    PingPong,
}

/// One instrument's loaded PCM sample (§4.E "several sample slots in the
/// instrument"). No dedicated sample-loading source survived retrieval
/// (Kunquat stores these as separate binary files, outside the JSON
/// keyed-blob tree `serialize.rs` covers); shaped from the spec's own
/// description of the playback algorithm. `frames` is mono; stereo samples
/// are out of scope (§1 Non-goals: multi-channel input content).
#[derive(Debug, Clone)]
pub struct SampleData {
    pub frames: Arc<[f32]>,
    /// The frequency `frames` was recorded at; `pitch / base_freq` gives
    /// the voice's playback speed relative to the sample's native pitch.
    pub base_freq: f64,
    pub loop_mode: LoopMode,
    pub loop_start: usize,
    pub loop_end: usize,
}

impl SampleData {
    pub fn new(frames: Vec<f32>, base_freq: f64) -> Self {
        let len = frames.len();
        SampleData {
            frames: Arc::from(frames),
            base_freq,
            loop_mode: LoopMode::None,
            loop_start: 0,
            loop_end: len.saturating_sub(1),
        }
    }

    pub fn with_loop(mut self, mode: LoopMode, start: usize, end: usize) -> Self {
        self.loop_mode = mode;
        self.loop_start = start.min(self.frames.len().saturating_sub(1));
        self.loop_end = end.min(self.frames.len().saturating_sub(1));
        self
    }
}

/// Which per-voice algorithm a generator instance runs. Carries the
/// parameters needed to build a fresh [`VoiceState`] for each new note.
/// `Pcm`'s `sample_slot` is only an index into the owning instrument's
/// sample table (resolved to actual frame data at graph-construction time,
/// see `engine.rs::resolve_instrument_node`); kept this way rather than
/// embedding the sample itself so `GeneratorKind` stays a small `Copy`
/// value matching the rest of a `p_generator.json` blob.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub enum GeneratorKind {
    Debug { single_pulse: bool },
    Sine,
    Pulse { duty: f64, band_limited: bool },
    Pcm { sample_slot: u8 },
    Noise { seed: u64 },
    Additive { harmonics: u8 },
}

impl GeneratorKind {
    fn default_state(&self, pitch: f64, force: f64, sample: Option<Arc<SampleData>>) -> VoiceState {
        match *self {
            GeneratorKind::Debug { single_pulse } => VoiceState::Debug {
                single_pulse,
                fired: false,
                note_on: true,
                rel_pos: 0,
                rel_pos_rem: 0.0,
                noff_pos_rem: 0.0,
                pos: 0,
                pitch,
            },
            GeneratorKind::Sine => VoiceState::Sine {
                phase: 0.0,
                pitch,
                force,
            },
            GeneratorKind::Pulse { duty, band_limited } => VoiceState::Pulse {
                phase: 0.0,
                duty,
                band_limited,
            },
            GeneratorKind::Pcm { .. } => VoiceState::Pcm {
                cursor: 0.0,
                direction: 1,
                pitch,
                sample,
            },
            GeneratorKind::Noise { seed } => VoiceState::Noise {
                rng: crate::rng::Rng::from_seed(seed),
            },
            GeneratorKind::Additive { harmonics } => VoiceState::Additive {
                phase: 0.0,
                harmonics,
            },
        }
    }
}

/// A `gen_XX` graph node: a fixed-size voice pool dedicated to one
/// generator kind, exposing its mix as a single stereo output port.
pub struct GeneratorDevice {
    kind: GeneratorKind,
    pool: VoicePool,
    spec: PortSpec,
    /// Resolved sample data for a `Pcm` generator; `None` for every other
    /// kind, or a `Pcm` generator whose slot has nothing loaded.
    sample: Option<Arc<SampleData>>,
}

impl GeneratorDevice {
    pub fn new(kind: GeneratorKind, voice_count: usize) -> Self {
        Self::with_sample(kind, voice_count, None)
    }

    /// Builds a `Pcm` generator with its sample data resolved, or any other
    /// kind with `sample` ignored.
    pub fn with_sample(kind: GeneratorKind, voice_count: usize, sample: Option<Arc<SampleData>>) -> Self {
        let mut spec = PortSpec::new();
        spec.register_output(0, SignalKind::Audio);
        let pool_sample = sample.clone();
        GeneratorDevice {
            pool: VoicePool::new(voice_count, move || kind.default_state(0.0, 0.0, pool_sample.clone())),
            kind,
            spec,
            sample,
        }
    }

    pub fn kind(&self) -> GeneratorKind {
        self.kind
    }

    pub fn active_count(&self) -> usize {
        self.pool.active_count()
    }

    /// Start a new note, or reuse `existing` if it still names a live voice
    /// of this generator's pool (matches `Voice_pool_get_voice` semantics).
    pub fn trigger(
        &mut self,
        existing: Option<(usize, u64)>,
        group_id: u64,
        channel: usize,
        priority: i32,
        force: f64,
        pitch: f64,
    ) -> Option<usize> {
        let state = self.kind.default_state(pitch, force, self.sample.clone());
        self.pool
            .allocate(existing, group_id, channel, priority, force, state)
    }

    pub fn voice_id(&self, index: usize) -> Option<u64> {
        self.pool.get(index).map(|v| v.id)
    }

    pub fn release(&mut self, index: usize) {
        self.pool.release(index);
    }
}

impl Device for GeneratorDevice {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn set_audio_rate(&mut self, _rate: f64) {}
    fn set_buffer_size(&mut self, _size: usize) {}
    fn set_tempo(&mut self, _tempo: f64) {}

    fn reset(&mut self) {
        self.pool.reset();
    }

    fn process(
        &mut self,
        _inputs: &[Option<&AudioBuffer>],
        outputs: &mut [AudioBuffer],
        start: usize,
        stop: usize,
        rate: f64,
        _tempo: f64,
    ) {
        self.pool.mix(&mut outputs[0], start, stop - start, rate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_single_pulse_generator_emits_once() {
        let mut gen = GeneratorDevice::new(GeneratorKind::Debug { single_pulse: true }, 4);
        gen.trigger(None, 1, 0, 0, 1.0, 6_000.0);
        let mut out = vec![AudioBuffer::new(4)];
        gen.process(&[], &mut out, 0, 4, 48_000.0, 120.0);
        assert_eq!(out[0].get(0), (1.0, 1.0));
        assert_eq!(gen.active_count(), 0);
    }

    #[test]
    fn trigger_reuses_existing_voice_of_this_generator() {
        let mut gen = GeneratorDevice::new(GeneratorKind::Sine, 4);
        let index = gen.trigger(None, 1, 0, 0, 1.0, 440.0).unwrap();
        let id = gen.voice_id(index).unwrap();
        let reused = gen.trigger(Some((index, id)), 1, 0, 0, 1.0, 440.0);
        assert_eq!(reused, Some(index));
    }

    #[test]
    fn release_stops_debug_voice_within_two_periods() {
        let mut gen = GeneratorDevice::new(GeneratorKind::Debug { single_pulse: false }, 1);
        let index = gen.trigger(None, 1, 0, 0, 1.0, 6_000.0).unwrap();
        gen.release(index);
        let mut out = vec![AudioBuffer::new(32)];
        gen.process(&[], &mut out, 0, 32, 48_000.0, 120.0);
        assert_eq!(gen.active_count(), 0);
    }

    #[test]
    fn pcm_generator_without_a_loaded_sample_is_silent_and_stays_alive() {
        let mut gen = GeneratorDevice::new(GeneratorKind::Pcm { sample_slot: 0 }, 1);
        gen.trigger(None, 1, 0, 0, 1.0, 440.0);
        let mut out = vec![AudioBuffer::new(8)];
        gen.process(&[], &mut out, 0, 8, 48_000.0, 120.0);
        assert_eq!(out[0].get(0), (0.0, 0.0));
    }

    #[test]
    fn pcm_generator_plays_back_a_loaded_sample_at_its_base_pitch() {
        let sample = Arc::new(
            SampleData::new(vec![0.0, 1.0, 0.0, -1.0], 48_000.0).with_loop(LoopMode::None, 0, 3),
        );
        let mut gen = GeneratorDevice::with_sample(GeneratorKind::Pcm { sample_slot: 0 }, 1, Some(sample));
        // pitch == base_freq -> one sample frame advanced per output frame.
        gen.trigger(None, 1, 0, 0, 1.0, 48_000.0);
        let mut out = vec![AudioBuffer::new(4)];
        gen.process(&[], &mut out, 0, 4, 48_000.0, 120.0);
        assert_eq!(out[0].get(0), (0.0, 0.0));
        assert_eq!(out[0].get(1), (1.0, 1.0));
        assert_eq!(out[0].get(2), (0.0, 0.0));
        assert_eq!(out[0].get(3), (-1.0, -1.0));
        // one-shot, no loop: the voice dies once the cursor exhausts the sample.
        assert_eq!(gen.active_count(), 0);
    }
}
