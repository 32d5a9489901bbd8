//! Cross-thread mix-state publication.
//!
//! The audio thread owns playback and writes a [`MixState`] snapshot at the
//! end of every `render` call. A control thread may poll it independently
//! through the handle returned by `Engine::mix_state_handle()` (§5): no lock
//! is ever held across a render call, only across the cheap copy.

use crate::timestamp::Timestamp;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Lock-free atomic `f64`, built the same way the original bindings layer
/// exposes cross-thread scalars: bit-cast over an `AtomicU64`, since there is
/// no native atomic float.
#[derive(Debug)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn load(&self, ordering: Ordering) -> f64 {
        f64::from_bits(self.0.load(ordering))
    }

    pub fn store(&self, value: f64, ordering: Ordering) {
        self.0.store(value.to_bits(), ordering);
    }
}

impl Default for AtomicF64 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Clone for AtomicF64 {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}

/// Per-render snapshot handed back to the caller and published to the
/// cross-thread handle.
#[derive(Debug, Clone, PartialEq)]
pub struct MixState {
    pub playing: bool,
    pub frames_mixed: u64,
    pub sub_song: usize,
    pub order_index: usize,
    pub pattern_index: usize,
    pub position: Timestamp,
    pub tempo: f64,
    pub active_voice_peak: usize,
    pub min_amp: [f64; 2],
    pub max_amp: [f64; 2],
    pub clipped: [bool; 2],
}

impl Default for MixState {
    fn default() -> Self {
        MixState {
            playing: false,
            frames_mixed: 0,
            sub_song: 0,
            order_index: 0,
            pattern_index: 0,
            position: Timestamp::ZERO,
            tempo: 120.0,
            active_voice_peak: 0,
            min_amp: [0.0, 0.0],
            max_amp: [0.0, 0.0],
            clipped: [false, false],
        }
    }
}

impl MixState {
    /// Fold a buffer's (min, max) extrema for one render window into the
    /// running snapshot, tracking whether either channel clipped past
    /// `threshold` (the same peak/clip bookkeeping the level-meter pattern
    /// performs per-block).
    pub fn observe_amplitude(&mut self, channel: usize, sample: f64, threshold: f64) {
        if sample < self.min_amp[channel] {
            self.min_amp[channel] = sample;
        }
        if sample > self.max_amp[channel] {
            self.max_amp[channel] = sample;
        }
        if sample.abs() > threshold {
            self.clipped[channel] = true;
        }
    }

    pub fn reset_amplitude(&mut self) {
        self.min_amp = [0.0, 0.0];
        self.max_amp = [0.0, 0.0];
        self.clipped = [false, false];
    }
}

/// A small `Arc<Mutex<MixState>>`-backed handle a control thread can poll
/// independently of the render call (§5).
#[derive(Debug, Clone)]
pub struct MixStateHandle {
    inner: Arc<Mutex<MixState>>,
}

impl MixStateHandle {
    pub fn new() -> Self {
        MixStateHandle {
            inner: Arc::new(Mutex::new(MixState::default())),
        }
    }

    /// Called by the audio thread at the end of `render`.
    pub fn publish(&self, state: MixState) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = state;
        }
    }

    /// Called by a control thread; returns a cheap clone of the latest
    /// snapshot.
    pub fn read(&self) -> MixState {
        self.inner
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl Default for MixStateHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_f64_round_trips() {
        let a = AtomicF64::new(3.5);
        assert!((a.get() - 3.5).abs() < 1e-9);
        a.set(2.5);
        assert!((a.get() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn atomic_f64_is_thread_safe() {
        let a = Arc::new(AtomicF64::new(0.0));
        let a2 = Arc::clone(&a);
        std::thread::spawn(move || {
            a2.set(42.0);
        })
        .join()
        .unwrap();
        assert!((a.get() - 42.0).abs() < 1e-9);
    }

    #[test]
    fn handle_publish_then_read() {
        let handle = MixStateHandle::new();
        let mut state = MixState::default();
        state.playing = true;
        state.frames_mixed = 512;
        handle.publish(state);

        let read = handle.read();
        assert!(read.playing);
        assert_eq!(read.frames_mixed, 512);
    }

    #[test]
    fn observe_amplitude_tracks_extrema_and_clip() {
        let mut state = MixState::default();
        state.observe_amplitude(0, 0.5, 1.0);
        state.observe_amplitude(0, -0.3, 1.0);
        state.observe_amplitude(0, 1.5, 1.0);

        assert_eq!(state.max_amp[0], 1.5);
        assert_eq!(state.min_amp[0], -0.3);
        assert!(state.clipped[0]);
        assert!(!state.clipped[1]);
    }

    #[test]
    fn cross_thread_handle_round_trips() {
        let handle = MixStateHandle::new();
        let handle2 = handle.clone();
        let mut state = MixState::default();
        state.tempo = 140.0;
        std::thread::spawn(move || {
            handle2.publish(state);
        })
        .join()
        .unwrap();
        assert_eq!(handle.read().tempo, 140.0);
    }
}
