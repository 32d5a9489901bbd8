//! Centralised compile-time limits and the construction-time engine
//! configuration.
//!
//! Mirrors the original engine's single limits header: every fixed maximum
//! implied by the composition/connection-path syntax lives here once instead
//! of being repeated at each call site.

/// Maximum number of instruments (`ins_XX`, two hex digits).
pub const MAX_INSTRUMENTS: usize = 256;

/// Maximum number of generators per instrument (`gen_XX`).
pub const MAX_GENERATORS: usize = 256;

/// Maximum number of effects per instrument or at root (`eff_XX`).
pub const MAX_EFFECTS: usize = 256;

/// Maximum number of DSPs per effect (`dsp_XX`).
pub const MAX_DSPS: usize = 256;

/// Maximum number of PCM sample slots per instrument.
pub const MAX_SAMPLES: usize = 256;

/// Maximum input or output ports on a single device (`in_XX`/`out_XX`).
pub const MAX_PORTS: usize = 64;

/// Maximum channels (virtual mixer inputs).
pub const MAX_CHANNELS: usize = 64;

/// Maximum columns per pattern.
pub const MAX_COLUMNS: usize = MAX_CHANNELS;

/// Maximum voices in a pool; an `EngineConfig` may request fewer but never
/// more.
pub const MAX_VOICES: usize = 1024;

use crate::error::EngineError;

/// Construction-time parameters for an [`Engine`](crate::engine::Engine).
/// Validated once in `Engine::new`; never mutated by a render call, per
/// invariant 6 (propagation happens at configuration time only).
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub audio_rate: f64,
    pub buffer_size: usize,
    pub voice_count: usize,
    pub event_queue_size: usize,
    pub channel_count: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            audio_rate: 48_000.0,
            buffer_size: 256,
            voice_count: 16,
            event_queue_size: 256,
            channel_count: 16,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.audio_rate <= 0.0 {
            return Err(EngineError::Argument(format!(
                "audio_rate must be positive, got {}",
                self.audio_rate
            )));
        }
        if self.buffer_size == 0 {
            return Err(EngineError::Argument(
                "buffer_size must be nonzero".to_string(),
            ));
        }
        if self.voice_count == 0 || self.voice_count > MAX_VOICES {
            return Err(EngineError::Argument(format!(
                "voice_count must be in 1..={}, got {}",
                MAX_VOICES, self.voice_count
            )));
        }
        if self.event_queue_size == 0 {
            return Err(EngineError::Argument(
                "event_queue_size must be nonzero".to_string(),
            ));
        }
        if self.channel_count == 0 || self.channel_count > MAX_CHANNELS {
            return Err(EngineError::Argument(format!(
                "channel_count must be in 1..={}, got {}",
                MAX_CHANNELS, self.channel_count
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_zero_buffer_size() {
        let cfg = EngineConfig {
            buffer_size: 0,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_voice_count_over_max() {
        let cfg = EngineConfig {
            voice_count: MAX_VOICES + 1,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_channel_count() {
        let cfg = EngineConfig {
            channel_count: 0,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
