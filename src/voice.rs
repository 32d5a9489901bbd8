//! Voice pool: pre-allocated polyphony slots with stealing (§4.D).
//!
//! Grounded on `original_source/src/lib/player/Voice_pool.h`
//! (`Voice_pool_get_voice`'s existing-voice-id matching, `start_group_iteration`
//! /`get_next_group`, `Voice_pool_mix`'s active-count return), reworked for
//! note-group semantics: one logical note occupies one voice per generator
//! in its instrument, and all voices of a note share a `group_id` so the
//! render loop can iterate them together.

use crate::buffer::AudioBuffer;
use crate::generators::{LoopMode, SampleData};
use crate::rng::Rng;
use libm::Libm;
use std::sync::Arc;

/// Per-kind processor state, inline in the voice slot to avoid allocating on
/// every note (§9 design note: "Voice state as `void*` + type tag" becomes a
/// discriminated union here).
#[derive(Debug, Clone)]
pub enum VoiceState {
    Debug {
        /// "Single pulse" mode: emit one sample of `force` and die, ignoring
        /// the rest of this algorithm entirely.
        single_pulse: bool,
        fired: bool,
        note_on: bool,
        rel_pos: u8,
        rel_pos_rem: f64,
        noff_pos_rem: f64,
        pos: u32,
        pitch: f64,
    },
    Sine {
        phase: f64,
        pitch: f64,
        force: f64,
    },
    Pulse {
        phase: f64,
        duty: f64,
        band_limited: bool,
    },
    Pcm {
        /// Fractional position into `sample.frames`.
        cursor: f64,
        /// `1` playing forward, `-1` playing backward (ping-pong only).
        direction: i8,
        pitch: f64,
        /// `None` if the generator's sample slot has nothing loaded; the
        /// voice stays alive but silent rather than dying, since an empty
        /// slot is a content issue, not a playback failure.
        sample: Option<Arc<SampleData>>,
    },
    Noise {
        rng: Rng,
    },
    Additive {
        phase: f64,
        harmonics: u8,
    },
}

/// Linearly interpolated sample at fractional position `pos`, clamped to
/// the valid frame range. `frames` must be non-empty.
fn linear_sample(frames: &[f32], pos: f64) -> f64 {
    let pos = pos.clamp(0.0, (frames.len() - 1) as f64);
    let i0 = pos.floor() as usize;
    let i1 = (i0 + 1).min(frames.len() - 1);
    let frac = pos - i0 as f64;
    let a = frames[i0] as f64;
    let b = frames[i1] as f64;
    a + (b - a) * frac
}

impl VoiceState {
    /// Engage note-off. Debug's release timing begins accumulating from
    /// here; other kinds hook their own release envelope here once built.
    pub fn release(&mut self) {
        if let VoiceState::Debug { note_on, .. } = self {
            *note_on = false;
        }
    }

    /// Advance this voice's processor over `[start, stop)`, adding its
    /// output into `out`. Returns whether the voice is still alive after
    /// this call.
    fn render(&mut self, out: &mut AudioBuffer, start: usize, stop: usize, rate: f64, force: f64) -> bool {
        match self {
            VoiceState::Debug {
                single_pulse,
                fired,
                note_on,
                rel_pos,
                rel_pos_rem,
                noff_pos_rem,
                pos,
                pitch,
            } => {
                for i in start..stop {
                    if *single_pulse {
                        if !*fired {
                            out.add(i, force, force);
                            *fired = true;
                        }
                        return false;
                    }

                    let mut value = if *rel_pos == 0 { 1.0 } else { 0.5 };
                    if !*note_on {
                        value = -value;
                    }
                    out.add(i, value * force, value * force);
                    if *rel_pos == 0 {
                        *rel_pos = 1;
                    }

                    *rel_pos_rem += *pitch / rate;
                    if !*note_on {
                        *noff_pos_rem += *pitch / rate;
                        if *noff_pos_rem >= 2.0 {
                            return false;
                        }
                    }
                    if *rel_pos_rem >= 1.0 {
                        *pos += 1;
                        if *pos >= 10 {
                            return false;
                        }
                        *rel_pos = 0;
                        *rel_pos_rem -= rel_pos_rem.floor();
                    }
                }
                true
            }
            VoiceState::Sine { phase, pitch, force: voice_force } => {
                let step = *pitch / rate;
                for i in start..stop {
                    let sample = Libm::<f64>::sin(2.0 * std::f64::consts::PI * *phase) * force * *voice_force;
                    out.add(i, sample, sample);
                    *phase += step;
                    if *phase >= 1.0 {
                        *phase -= 1.0;
                    }
                }
                true
            }
            VoiceState::Pulse { phase, duty, band_limited: _ } => {
                for i in start..stop {
                    let sample = if *phase < *duty { 1.0 } else { -1.0 };
                    out.add(i, sample * force, sample * force);
                    *phase += 1.0 / rate;
                    if *phase >= 1.0 {
                        *phase -= 1.0;
                    }
                }
                true
            }
            VoiceState::Pcm { cursor, direction, pitch, sample } => {
                let Some(sample) = sample else {
                    return true;
                };
                let frames = &sample.frames;
                if frames.is_empty() {
                    return false;
                }
                let step = *pitch / sample.base_freq;
                for i in start..stop {
                    let value = linear_sample(frames, *cursor) * force;
                    out.add(i, value, value);
                    *cursor += step * *direction as f64;

                    match sample.loop_mode {
                        LoopMode::None => {
                            if *cursor < 0.0 || *cursor >= frames.len() as f64 {
                                return false;
                            }
                        }
                        LoopMode::Forward => {
                            let loop_len = (sample.loop_end - sample.loop_start) as f64 + 1.0;
                            if *cursor >= sample.loop_end as f64 + 1.0 {
                                *cursor -= loop_len;
                            }
                        }
                        LoopMode::PingPong => {
                            if *cursor >= sample.loop_end as f64 {
                                *cursor = sample.loop_end as f64 - (*cursor - sample.loop_end as f64);
                                *direction = -1;
                            } else if *cursor <= sample.loop_start as f64 {
                                *cursor = sample.loop_start as f64 + (sample.loop_start as f64 - *cursor);
                                *direction = 1;
                            }
                        }
                    }
                }
                true
            }
            VoiceState::Noise { rng } => {
                for i in start..stop {
                    let sample = rng.next_f64_bipolar() * force;
                    out.add(i, sample, sample);
                }
                true
            }
            VoiceState::Additive { phase, harmonics } => {
                for i in start..stop {
                    let mut sample = 0.0;
                    for h in 1..=(*harmonics as u32) {
                        sample += Libm::<f64>::sin(2.0 * std::f64::consts::PI * *phase * h as f64) / h as f64;
                    }
                    out.add(i, sample * force, sample * force);
                    *phase += 1.0 / rate;
                    if *phase >= 1.0 {
                        *phase -= 1.0;
                    }
                }
                true
            }
        }
    }
}

/// A single polyphony slot.
#[derive(Debug, Clone)]
pub struct Voice {
    pub in_use: bool,
    pub id: u64,
    pub group_id: u64,
    pub priority: i32,
    pub age: u64,
    pub channel: usize,
    pub force: f64,
    pub state: VoiceState,
}

impl Voice {
    fn silent(state: VoiceState) -> Self {
        Voice {
            in_use: false,
            id: 0,
            group_id: 0,
            priority: 0,
            age: 0,
            channel: 0,
            force: 0.0,
            state,
        }
    }
}

/// Pre-allocated collection of voices (invariant: never grows/shrinks during
/// a render call).
pub struct VoicePool {
    voices: Vec<Voice>,
    next_group_id: u64,
    next_id: u64,
}

impl VoicePool {
    pub fn new(size: usize, default_state: impl Fn() -> VoiceState) -> Self {
        VoicePool {
            voices: (0..size).map(|_| Voice::silent(default_state())).collect(),
            next_group_id: 1,
            next_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.voices.iter().filter(|v| v.in_use).count()
    }

    pub fn new_group_id(&mut self) -> u64 {
        let id = self.next_group_id;
        self.next_group_id += 1;
        id
    }

    /// Reinitialise the voice at `index` for a new note and return its slot
    /// index. Callers use a fresh `new_group_id()` when starting a logical
    /// note and pass it to every voice they allocate for that note.
    pub fn allocate(
        &mut self,
        existing: Option<(usize, u64)>,
        group_id: u64,
        channel: usize,
        priority: i32,
        force: f64,
        state: VoiceState,
    ) -> Option<usize> {
        if let Some((index, id)) = existing {
            if self.voices.get(index).is_some_and(|v| v.in_use && v.id == id) {
                return Some(index);
            }
            return None;
        }

        if self.voices.is_empty() {
            return None;
        }

        let index = self
            .voices
            .iter()
            .position(|v| !v.in_use)
            .unwrap_or_else(|| self.steal_index());

        let id = self.next_id;
        self.next_id += 1;

        let voice = &mut self.voices[index];
        voice.in_use = true;
        voice.id = id;
        voice.group_id = group_id;
        voice.priority = priority;
        voice.age = 0;
        voice.channel = channel;
        voice.force = force;
        voice.state = state;
        Some(index)
    }

    /// Oldest-and-quietest: the in-use voice with the lowest priority,
    /// breaking ties by largest age.
    fn steal_index(&self) -> usize {
        self.voices
            .iter()
            .enumerate()
            .filter(|(_, v)| v.in_use)
            .min_by(|(_, a), (_, b)| {
                a.priority
                    .cmp(&b.priority)
                    .then(b.age.cmp(&a.age))
            })
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    /// Group active voice indices by group id, in first-seen order.
    pub fn iterate_groups(&self) -> Vec<(u64, Vec<usize>)> {
        let mut groups: Vec<(u64, Vec<usize>)> = Vec::new();
        for (index, voice) in self.voices.iter().enumerate() {
            if !voice.in_use {
                continue;
            }
            if let Some(entry) = groups.iter_mut().find(|(gid, _)| *gid == voice.group_id) {
                entry.1.push(index);
            } else {
                groups.push((voice.group_id, vec![index]));
            }
        }
        groups
    }

    /// Advance every active voice over `[offset, offset+nframes)`, compact
    /// voices whose processor signalled end-of-life, and return the number
    /// of voices still active.
    pub fn mix(&mut self, out: &mut AudioBuffer, offset: usize, nframes: usize, rate: f64) -> usize {
        let stop = offset + nframes;
        for voice in self.voices.iter_mut() {
            if !voice.in_use {
                continue;
            }
            let alive = voice.state.render(out, offset, stop, rate, voice.force);
            voice.age += nframes as u64;
            if !alive {
                voice.in_use = false;
            }
        }
        self.active_count()
    }

    pub fn reset(&mut self) {
        for voice in self.voices.iter_mut() {
            voice.in_use = false;
            voice.age = 0;
        }
    }

    pub fn get(&self, index: usize) -> Option<&Voice> {
        self.voices.get(index)
    }

    /// Engage note-off on the voice at `index`, if it is active.
    pub fn release(&mut self, index: usize) {
        if let Some(voice) = self.voices.get_mut(index) {
            if voice.in_use {
                voice.state.release();
            }
        }
    }
}
