//! Low-frequency oscillator with a depth-delay ease-in (§4.F).
//!
//! Grounded on `Event_channel_tremolo_delay.c`/`Event_channel_vibrato_depth.c`
//! (`LFO_set_depth_delay` taking a rational time, applied identically to both
//! the channel-default LFO and every active voice's copy) and
//! `Event_channel_tremolo_depth.c`'s depth parameter.

use crate::timestamp::Timestamp;
use libm::Libm;

/// Whether the LFO's output multiplies (`Exponential`, for pitch vibrato) or
/// adds to (`Linear`, for tremolo/filter wobble) the base value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LfoMode {
    Linear,
    Exponential,
}

/// A sine-driven modulation source with a configurable ease-in delay before
/// it reaches full depth.
#[derive(Debug, Clone, Copy)]
pub struct Lfo {
    mode: LfoMode,
    phase: f64,
    speed: f64,
    depth: f64,
    depth_delay_frames: u64,
    delay_elapsed: u64,
}

impl Lfo {
    pub fn new(mode: LfoMode) -> Self {
        Lfo {
            mode,
            phase: 0.0,
            speed: 0.0,
            depth: 0.0,
            depth_delay_frames: 0,
            delay_elapsed: 0,
        }
    }

    pub fn set_speed(&mut self, speed_hz: f64) {
        self.speed = speed_hz;
    }

    pub fn set_depth(&mut self, depth: f64) {
        self.depth = depth;
    }

    /// Configure the ease-in window from a rational time and the engine's
    /// current tempo/rate, and restart the ease-in from zero.
    pub fn set_depth_delay(&mut self, delay: Timestamp, tempo: f64, audio_rate: f64) {
        self.depth_delay_frames = delay.to_frames(tempo, audio_rate).max(0) as u64;
        self.delay_elapsed = 0;
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
        self.delay_elapsed = 0;
    }

    fn ease(&self) -> f64 {
        if self.depth_delay_frames == 0 {
            1.0
        } else {
            (self.delay_elapsed as f64 / self.depth_delay_frames as f64).min(1.0)
        }
    }

    /// Advance one frame and return the current modulation value: an
    /// additive offset in `Linear` mode, a multiplier in `Exponential` mode
    /// (`1.0` at rest).
    pub fn step(&mut self, audio_rate: f64) -> f64 {
        let raw = Libm::<f64>::sin(2.0 * std::f64::consts::PI * self.phase);
        self.phase += self.speed / audio_rate;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        if self.delay_elapsed < self.depth_delay_frames {
            self.delay_elapsed += 1;
        }
        let scaled = raw * self.depth * self.ease();
        match self.mode {
            LfoMode::Linear => scaled,
            LfoMode::Exponential => Libm::<f64>::pow(2.0, scaled),
        }
    }
}
