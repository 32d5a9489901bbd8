//! Playback scheduling (§4.H): walks the order list/pattern/column
//! hierarchy, turns column events into frame-stamped entries in the event
//! queue, and drives tempo and jumps.
//!
//! Grounded on `original_source/src/core/Player.c` (`Playdata`'s playback
//! modes `PLAY_SONG`/`PLAY_PATTERN`/`PLAY_EVENT`/`STOP`, mapped below onto
//! [`PlaybackMode::SubSong`]/`Pattern`/`Event`/`Stop`, and
//! `Player_stop`/`Player_play_subsong`'s position-reset semantics) and
//! `original_source/src/lib/events/Event_global_set_jump_section.c` (a jump
//! event only records its target field; the actual section/order switch is
//! applied later at a scheduled boundary, not inside the event handler
//! itself, mirrored here by [`PendingJump`] being resolved at the top of
//! [`PlaybackState::advance`]'s loop rather than inside `apply`).

use crate::composition::Composition;
use crate::error::EngineError;
use crate::event::{Event, EventCache, EventKind, EventQueue, EventTarget, Value};
use crate::slider::Slider;
use crate::timestamp::{Timestamp, SUBBEATS_PER_BEAT};

/// Which of the original's playback modes governs order-list/pattern-end
/// behaviour (§4.H).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackMode {
    Stop,
    /// One-shot: plays out the current pattern from the current position,
    /// then stops. Used for event-preview renders that don't walk an order
    /// list at all.
    Event,
    /// Loops the current pattern indefinitely, ignoring the order list.
    Pattern,
    /// Walks the sub-song's order list, advancing to the next entry on
    /// pattern end and stopping when the order list is exhausted.
    SubSong,
}

/// A recorded jump target awaiting resolution (§9: "Simultaneous jumps ...
/// lowest channel wins"). `counter` models the original's jump-counter
/// events (`Jr`/`Js`/`Jss` arm the target, repeated `J` triggers decrement
/// it); it reaches zero on the first trigger here since this engine does
/// not expose a separate "repeat count" event.
#[derive(Debug, Clone, Copy)]
pub struct PendingJump {
    pub channel: usize,
    pub counter: i32,
    pub target_order_index: usize,
}

/// Mutable playback cursor (§4.H). Holds no reference to the
/// [`Composition`] it plays; callers pass one in per call (§9: "the
/// composition reference itself is an ordinary borrow scoped to one render
/// call").
#[derive(Debug, Clone)]
pub struct PlaybackState {
    pub mode: PlaybackMode,
    pub sub_song: usize,
    pub order_index: usize,
    pub pattern_index: usize,
    pub pos: Timestamp,
    pub frames_elapsed: u64,
    tempo: Slider,
    /// Length used by `/t` slide events that don't carry their own length
    /// argument, mirroring how force/filter/panning slides read their
    /// length from per-channel state rather than the event itself.
    pub tempo_slide_length: Timestamp,
    pub pending_jump: Option<PendingJump>,
    pub pending_pattern_delay: Option<Timestamp>,
    pub global_vol: f64,
    pub scale_index: usize,
    audio_rate: f64,
}

const JUMP_EVENT_NAMES: [&str; 4] = ["Jr", "Js", "Jss", "J"];

fn classify_kind(name: &str) -> EventKind {
    match name {
        "n+" | "n-" | "I" | "/f" | "vs" | "vd" | "fs" | "aw+" | "aw-" | "pan" | "/pan" | "#" => EventKind::Channel,
        "t" | "/t" | "Jr" | "Js" | "Jss" | "J" | ".s" => EventKind::Global,
        "?" => EventKind::Query,
        _ => EventKind::General,
    }
}

impl PlaybackState {
    pub fn new() -> Self {
        PlaybackState {
            mode: PlaybackMode::Stop,
            sub_song: 0,
            order_index: 0,
            pattern_index: 0,
            pos: Timestamp::ZERO,
            frames_elapsed: 0,
            tempo: Slider::at(120.0),
            tempo_slide_length: Timestamp::new(1, 0),
            pending_jump: None,
            pending_pattern_delay: None,
            global_vol: 1.0,
            scale_index: 0,
            audio_rate: 48_000.0,
        }
    }

    pub fn tempo(&self) -> f64 {
        self.tempo.value()
    }

    pub fn is_playing(&self) -> bool {
        self.mode != PlaybackMode::Stop
    }

    pub fn set_audio_rate(&mut self, rate: f64) {
        self.audio_rate = rate;
    }

    pub fn start_tempo_slide(&mut self, target: f64, length: Timestamp) {
        let frames = length.to_frames(target, self.audio_rate).max(1) as u64;
        if self.tempo.in_progress() {
            self.tempo.change_target(target);
        } else {
            self.tempo.start(target, frames);
        }
    }

    pub fn play_pattern(&mut self, pattern_index: usize, tempo: f64) {
        self.mode = PlaybackMode::Pattern;
        self.pattern_index = pattern_index;
        self.pos = Timestamp::ZERO;
        self.frames_elapsed = 0;
        self.tempo = Slider::at(tempo);
        self.pending_jump = None;
        self.pending_pattern_delay = None;
    }

    pub fn play_sub_song(&mut self, sub_song: usize, composition: &Composition) -> Result<(), EngineError> {
        let song = composition
            .sub_song(sub_song)
            .ok_or_else(|| EngineError::Argument(format!("no sub-song at index {}", sub_song)))?;
        let first_pattern = song
            .pattern_at(0)
            .ok_or_else(|| EngineError::Argument(format!("sub-song {} has an empty order list", sub_song)))?;
        self.mode = PlaybackMode::SubSong;
        self.sub_song = sub_song;
        self.order_index = 0;
        self.pattern_index = first_pattern;
        self.pos = Timestamp::ZERO;
        self.frames_elapsed = 0;
        self.tempo = Slider::at(song.tempo);
        self.global_vol = song.global_volume;
        self.pending_jump = None;
        self.pending_pattern_delay = None;
        Ok(())
    }

    pub fn play_default(&mut self, composition: &Composition) -> Result<(), EngineError> {
        self.play_sub_song(0, composition)
    }

    pub fn play_event(&mut self) {
        self.mode = PlaybackMode::Event;
        self.frames_elapsed = 0;
    }

    pub fn stop(&mut self) {
        self.mode = PlaybackMode::Stop;
        self.pos = Timestamp::ZERO;
        self.frames_elapsed = 0;
        self.order_index = 0;
        self.pending_jump = None;
        self.pending_pattern_delay = None;
    }

    /// One render's worth of scheduling (§4.H steps 1-5): walks up to
    /// `nframes` frames of the current pattern's columns, pushing events
    /// onto `queue` stamped with their frame offset within this call,
    /// stepping the tempo slide, and advancing the order list or looping
    /// per `self.mode`.
    pub fn advance(
        &mut self,
        composition: &Composition,
        channel_count: usize,
        nframes: u32,
        queue: &mut EventQueue,
    ) {
        let mut frame = 0u32;
        while frame < nframes {
            if !self.is_playing() {
                break;
            }

            if let Some(pending) = self.pending_jump {
                if pending.counter <= 0 {
                    self.resolve_jump(composition, pending.target_order_index);
                    continue;
                }
            }

            let Some(pattern) = composition.pattern(self.pattern_index) else {
                log::warn!("scheduler: pattern {} no longer exists, stopping", self.pattern_index);
                self.mode = PlaybackMode::Stop;
                break;
            };

            if self.pos >= pattern.length {
                match self.mode {
                    PlaybackMode::SubSong => {
                        if !self.advance_order(composition) {
                            self.mode = PlaybackMode::Stop;
                            break;
                        }
                        continue;
                    }
                    PlaybackMode::Pattern => {
                        self.pos = Timestamp::ZERO;
                        continue;
                    }
                    PlaybackMode::Event | PlaybackMode::Stop => {
                        self.mode = PlaybackMode::Stop;
                        break;
                    }
                }
            }

            let tempo_now = self.tempo.value();
            let delta_subbeats =
                (tempo_now * SUBBEATS_PER_BEAT as f64 / (self.audio_rate * 60.0)).round() as i64;
            let pos_before = self.pos;
            let pos_after = pos_before + Timestamp::new(0, delta_subbeats.max(1));

            let mut batch: Vec<(usize, crate::composition::ColumnEvent)> = Vec::new();
            for channel in 0..channel_count.min(pattern.column_count()) {
                if let Some(column) = pattern.column(channel) {
                    for event in column.events_in_range(pos_before, pos_after) {
                        batch.push((channel, event.clone()));
                    }
                }
            }
            self.dispatch_batch(batch, frame, queue);

            self.pos = pos_after;
            self.tempo.step(1);
            self.frames_elapsed += 1;
            frame += 1;
        }
    }

    fn resolve_jump(&mut self, composition: &Composition, target_order_index: usize) {
        self.pending_jump = None;
        self.order_index = target_order_index;
        self.pos = Timestamp::ZERO;
        match composition.sub_song(self.sub_song).and_then(|s| s.pattern_at(self.order_index)) {
            Some(pattern_index) => self.pattern_index = pattern_index,
            None => self.mode = PlaybackMode::Stop,
        }
    }

    fn advance_order(&mut self, composition: &Composition) -> bool {
        let Some(sub_song) = composition.sub_song(self.sub_song) else {
            return false;
        };
        self.order_index += 1;
        match sub_song.pattern_at(self.order_index) {
            Some(pattern_index) => {
                self.pattern_index = pattern_index;
                self.pos = Timestamp::ZERO;
                true
            }
            None => false,
        }
    }

    /// Resolves same-frame jump collisions (lowest channel wins, §9's
    /// resolved open question) before converting the batch into queued
    /// events, preserving (channel, insertion) order for the rest (§5).
    fn dispatch_batch(&mut self, mut batch: Vec<(usize, crate::composition::ColumnEvent)>, frame: u32, queue: &mut EventQueue) {
        if let Some(winning_channel) = batch
            .iter()
            .filter(|(_, e)| JUMP_EVENT_NAMES.contains(&e.name.as_str()))
            .map(|(channel, _)| *channel)
            .min()
        {
            batch.retain(|(channel, e)| !JUMP_EVENT_NAMES.contains(&e.name.as_str()) || *channel == winning_channel);
        }

        for (channel, event) in batch {
            let kind = classify_kind(&event.name);
            let queued = Event::new(kind, event.name.clone(), channel as i32, event.value.clone());
            if !queue.insert(queued, frame) {
                log::warn!("scheduler: event queue full, dropping \"{}\" on channel {}", event.name, channel);
            }
        }
    }
}

impl Default for PlaybackState {
    fn default() -> Self {
        PlaybackState::new()
    }
}

impl EventTarget for PlaybackState {
    fn apply(&mut self, event: &Event, _cache: &mut EventCache, _queue: &mut EventQueue, _now_frame: u32) -> bool {
        match event.name.as_str() {
            "t" => {
                if let Value::Float(bpm) = event.value {
                    self.tempo = Slider::at(bpm);
                    true
                } else {
                    false
                }
            }
            "/t" => {
                if let Value::Float(bpm) = event.value {
                    self.start_tempo_slide(bpm, self.tempo_slide_length);
                    true
                } else {
                    false
                }
            }
            "Jr" | "Js" | "Jss" => {
                if let Value::Int(target) = event.value {
                    self.pending_jump = Some(PendingJump {
                        channel: event.index.max(0) as usize,
                        counter: 1,
                        target_order_index: target.max(0) as usize,
                    });
                    true
                } else {
                    false
                }
            }
            "J" => {
                if let Some(pending) = self.pending_jump.as_mut() {
                    pending.counter -= 1;
                    true
                } else {
                    false
                }
            }
            ".s" => {
                if let Value::Int(index) = event.value {
                    self.scale_index = index.max(0) as usize;
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }
}
