//! Per-channel controller state (§4.H's "channel" actor, grounded on
//! `original_source/src/lib/player/Channel_state`-shaped fields referenced
//! throughout `events/Event_channel_*.c`).
//!
//! Each channel tracks the modulation sources `Event_channel_slide_force.c`
//! (force slider), `Event_channel_vibrato_depth.c` (pitch vibrato LFO),
//! `Event_channel_tremolo_delay.c` (force tremolo LFO with depth-delay) and
//! their filter/panning counterparts aim at: sliders/LFOs that the active
//! note's voice copies its speed/depth from on note-on, and that continue
//! independently of any one voice's lifetime (§4.E "Common voice handling").
//! Note-on/off themselves are recorded as pending [`ChannelAction`]s rather
//! than driving a `VoicePool` directly, since a channel has no fixed
//! instrument/generator binding of its own (`I` can retarget it at any
//! time); `scheduler.rs` drains the queue and forwards it to the selected
//! instrument's generators.

use crate::event::{Event, EventCache, EventQueue, EventTarget, Value};
use crate::lfo::{Lfo, LfoMode};
use crate::slider::Slider;
use libm::Libm;

/// A note-on's pitch source, as recorded by `"n+"`: either an
/// already-resolved frequency, or a `(note-index, octave)` pair still
/// waiting to be looked up against a scale. A channel has no `Composition`
/// access of its own (see module docs), so `Scale` members are resolved by
/// whoever drains `Channel::pending` and does have one; `engine.rs`'s
/// `forward_channel_actions` is that caller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NotePitch {
    Hz(f64),
    Scale { index: u8, octave: i32 },
}

/// A note trigger or release a channel has recorded but not yet forwarded
/// to an instrument's generators; drained once per scheduler step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChannelAction {
    NoteOn { pitch: NotePitch, force: f64 },
    NoteOff,
}

/// One virtual mixer channel's controller state. Independent of any
/// particular voice: sliders/LFOs here represent the channel's *current*
/// settings, copied into a voice's own state when a note starts.
#[derive(Debug, Clone)]
pub struct Channel {
    pub instrument: Option<u8>,
    pub pitch: f64,
    pub force: f64,
    pub panning: f64,

    pub force_slider: Slider,
    pub filter_slider: Slider,
    pub panning_slider: Slider,

    pub vibrato: Lfo,
    pub vibrato_speed: f64,
    pub tremolo: Lfo,
    pub autowah: Lfo,

    pub note_on: bool,
    /// `(index, id)` of the voice most recently triggered on this channel,
    /// reused by a following `n+` with the same pitch (matches
    /// `Voice_pool_get_voice`'s existing-voice-id reuse).
    pub active_voice: Option<(usize, u64)>,

    /// Result of the most recently evaluated `#` conditional; consumed
    /// (reset to `true`) by the next event this channel dispatches.
    pub condition: bool,

    pub pending: Vec<ChannelAction>,
}

impl Channel {
    pub fn new() -> Self {
        Channel {
            instrument: None,
            pitch: 0.0,
            force: 1.0,
            panning: 0.0,
            force_slider: Slider::at(1.0),
            filter_slider: Slider::at(1.0),
            panning_slider: Slider::at(0.0),
            vibrato: Lfo::new(LfoMode::Exponential),
            vibrato_speed: 0.0,
            tremolo: Lfo::new(LfoMode::Linear),
            autowah: Lfo::new(LfoMode::Linear),
            note_on: false,
            active_voice: None,
            condition: true,
            pending: Vec::new(),
        }
    }

    /// Instantaneous force the voice-handling helpers in `generators.rs`
    /// should apply this frame (§4.E: `force_slider + tremolo_LFO`).
    pub fn instantaneous_force(&mut self, audio_rate: f64) -> f64 {
        self.force_slider.step(1).max(0.0) + self.tremolo.step(audio_rate)
    }

    /// Instantaneous filter cutoff multiplier (§4.E: `filter_slider +
    /// auto-wah_LFO`).
    pub fn instantaneous_cutoff(&mut self, audio_rate: f64) -> f64 {
        self.filter_slider.step(1) + self.autowah.step(audio_rate)
    }

    fn as_float(value: &Value) -> Option<f64> {
        match value {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    fn as_bool(value: &Value) -> Option<bool> {
        match value {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn as_int(value: &Value) -> Option<i64> {
        match value {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

impl EventTarget for Channel {
    fn apply(&mut self, event: &Event, _cache: &mut EventCache, _queue: &mut EventQueue, _now_frame: u32) -> bool {
        if !self.condition {
            self.condition = true;
            return false;
        }

        match event.name.as_str() {
            "n+" => {
                let pitch = match &event.value {
                    &Value::Note { index, octave } => NotePitch::Scale { index, octave },
                    _ => {
                        let Some(hz) = Self::as_float(&event.value) else {
                            return false;
                        };
                        NotePitch::Hz(hz)
                    }
                };
                if let NotePitch::Hz(hz) = pitch {
                    self.pitch = hz;
                }
                self.note_on = true;
                self.pending.push(ChannelAction::NoteOn { pitch, force: self.force });
                true
            }
            "n-" => {
                self.note_on = false;
                self.pending.push(ChannelAction::NoteOff);
                true
            }
            "I" => {
                let Some(index) = Self::as_int(&event.value) else {
                    return false;
                };
                self.instrument = u8::try_from(index).ok();
                true
            }
            "/f" => {
                // 1/6-octave units, matching Event_channel_slide_force.c's
                // `exp2(value / 6)`.
                let Some(db) = Self::as_float(&event.value) else {
                    return false;
                };
                let target = Libm::<f64>::pow(2.0, db / 6.0);
                if self.force_slider.in_progress() {
                    self.force_slider.change_target(target);
                } else {
                    self.force_slider.start(target, 1);
                }
                true
            }
            "vs" => {
                let Some(speed) = Self::as_float(&event.value) else {
                    return false;
                };
                self.vibrato_speed = speed;
                self.vibrato.set_speed(speed);
                true
            }
            "vd" => {
                // unit is 5 cents, matching Event_channel_vibrato_depth.c.
                let Some(raw) = Self::as_float(&event.value) else {
                    return false;
                };
                self.vibrato.set_depth(raw / 240.0);
                true
            }
            "fs" => {
                let Some(target) = Self::as_float(&event.value) else {
                    return false;
                };
                if self.filter_slider.in_progress() {
                    self.filter_slider.change_target(target);
                } else {
                    self.filter_slider.start(target, 1);
                }
                true
            }
            "aw+" => {
                let Some(depth) = Self::as_float(&event.value) else {
                    return false;
                };
                self.autowah.set_depth(depth);
                true
            }
            "aw-" => {
                self.autowah.set_depth(0.0);
                true
            }
            "pan" => {
                let Some(pan) = Self::as_float(&event.value) else {
                    return false;
                };
                self.panning = pan.clamp(-1.0, 1.0);
                self.panning_slider.start(self.panning, 1);
                true
            }
            "/pan" => {
                let Some(target) = Self::as_float(&event.value) else {
                    return false;
                };
                if self.panning_slider.in_progress() {
                    self.panning_slider.change_target(target);
                } else {
                    self.panning_slider.start(target, 1);
                }
                true
            }
            "#" => {
                self.condition = Self::as_bool(&event.value).unwrap_or(true);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    fn cache_and_queue() -> (EventCache, EventQueue) {
        (EventCache::new(), EventQueue::new(4))
    }

    #[test]
    fn note_on_records_pending_action_and_pitch() {
        let mut ch = Channel::new();
        let (mut cache, mut queue) = cache_and_queue();
        let ev = Event::new(EventKind::Channel, "n+", 0, Value::Float(440.0));
        assert!(ch.apply(&ev, &mut cache, &mut queue, 0));
        assert_eq!(ch.pitch, 440.0);
        assert!(ch.note_on);
        assert_eq!(
            ch.pending,
            vec![ChannelAction::NoteOn { pitch: NotePitch::Hz(440.0), force: 1.0 }]
        );
    }

    #[test]
    fn note_on_with_a_note_octave_pair_defers_scale_resolution() {
        let mut ch = Channel::new();
        let (mut cache, mut queue) = cache_and_queue();
        let ev = Event::new(EventKind::Channel, "n+", 0, Value::Note { index: 0, octave: 1 });
        assert!(ch.apply(&ev, &mut cache, &mut queue, 0));
        assert!(ch.note_on);
        assert_eq!(
            ch.pending,
            vec![ChannelAction::NoteOn { pitch: NotePitch::Scale { index: 0, octave: 1 }, force: 1.0 }]
        );
    }

    #[test]
    fn note_off_records_pending_action() {
        let mut ch = Channel::new();
        let (mut cache, mut queue) = cache_and_queue();
        let ev = Event::new(EventKind::Channel, "n-", 0, Value::None);
        assert!(ch.apply(&ev, &mut cache, &mut queue, 0));
        assert!(!ch.note_on);
        assert_eq!(ch.pending, vec![ChannelAction::NoteOff]);
    }

    #[test]
    fn conditional_false_skips_next_event_only() {
        let mut ch = Channel::new();
        let (mut cache, mut queue) = cache_and_queue();
        let cond = Event::new(EventKind::General, "#", 0, Value::Bool(false));
        assert!(ch.apply(&cond, &mut cache, &mut queue, 0));

        let note = Event::new(EventKind::Channel, "n+", 0, Value::Float(220.0));
        assert!(!ch.apply(&note, &mut cache, &mut queue, 0));
        assert!(ch.pending.is_empty());

        // condition consumed: the following event dispatches normally.
        assert!(ch.apply(&note, &mut cache, &mut queue, 0));
        assert_eq!(ch.pending.len(), 1);
    }

    #[test]
    fn slide_force_retargets_in_progress_slide() {
        let mut ch = Channel::new();
        let (mut cache, mut queue) = cache_and_queue();
        ch.apply(&Event::new(EventKind::Channel, "/f", 0, Value::Float(-6.0)), &mut cache, &mut queue, 0);
        assert!(ch.force_slider.in_progress() || ch.force_slider.value() != 1.0);
    }

    #[test]
    fn unknown_event_name_is_not_handled() {
        let mut ch = Channel::new();
        let (mut cache, mut queue) = cache_and_queue();
        let ev = Event::new(EventKind::Channel, "??", 0, Value::None);
        assert!(!ch.apply(&ev, &mut cache, &mut queue, 0));
    }
}
