//! Typed events, the event cache, and the ring-buffer event queue (§4.G).
//!
//! Grounded on `original_source/src/lib/Event_handler.c` (kind-dispatched
//! function tables keyed by event type, one per `EVENT_IS_CHANNEL`/
//! `EVENT_IS_INS`/`EVENT_IS_GLOBAL` family), `Event_queue.h` (`ins`/
//! `get`/`peek`/`clear`/`resize` semantics, insertion order preserved) and
//! `player/Event_cache.c` (a name-keyed table of last-seen values, reset
//! between plays but not between events). `Event_channel_slide_force.c`/
//! `Event_global_set_jump_section.c` ground the event argument shapes
//! (`Value::Float` in 1/6 octave units for force/volume-style events,
//! `Value::Int` for jump targets).

use crate::timestamp::Timestamp;
use std::collections::{HashMap, VecDeque};

/// Which routing table an event belongs to (§4.G); determines what `index`
/// addresses (a channel, an instrument, an effect/DSP, or nothing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Channel,
    Ins,
    Effect,
    Dsp,
    Generator,
    Global,
    Control,
    General,
    Query,
    Auto,
}

/// An event argument. `Timestamp` covers reltime-typed fields (pattern
/// delay lengths, slide lengths); `Float` covers the 1/6-octave-style
/// force/volume arguments `Event_channel_slide_force.c` decodes with
/// `exp2(x / 6)`. `Note` carries `n+`'s `(note-index, octave)` pair (§4.I),
/// resolved against the triggering instrument's scale rather than carrying
/// a frequency directly; a plain `Int`/`Float` on `n+` is still accepted as
/// an already-resolved Hz pitch, bypassing scale lookup entirely.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    None,
    Int(i64),
    Float(f64),
    Bool(bool),
    Timestamp(Timestamp),
    Text(String),
    Note { index: u8, octave: i32 },
}

/// A single scheduled or dispatched event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub name: String,
    /// Channel index, instrument/effect/DSP index, or `-1` for global/
    /// control/general events that have no per-object target.
    pub index: i32,
    pub value: Value,
}

impl Event {
    pub fn new(kind: EventKind, name: impl Into<String>, index: i32, value: Value) -> Self {
        Event {
            kind,
            name: name.into(),
            index,
            value,
        }
    }
}

/// Remembers the last value seen for every event name that has been
/// registered, so the query sub-system (`?`) can read current state (tempo,
/// volume, ...) without racing the render thread. Unregistered names return
/// `None` rather than panicking, since a query may arrive before the name is
/// ever pushed.
#[derive(Debug, Default)]
pub struct EventCache {
    values: HashMap<String, Value>,
}

impl EventCache {
    pub fn new() -> Self {
        EventCache::default()
    }

    /// Register a name so `update`/`get` can target it. A no-op if already
    /// registered, matching `Event_cache_add_event`'s idempotence.
    pub fn register(&mut self, name: impl Into<String>) {
        self.values.entry(name.into()).or_insert(Value::None);
    }

    pub fn update(&mut self, name: &str, value: Value) {
        if let Some(slot) = self.values.get_mut(name) {
            *slot = value;
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Reset every registered name back to `Value::None`, keeping the
    /// registration set (mirrors `Event_cache_reset`, used between plays).
    pub fn reset(&mut self) {
        for value in self.values.values_mut() {
            *value = Value::None;
        }
    }
}

/// A bounded FIFO of `(start_frame, Event)` pairs used within one render to
/// defer events that fall inside the current window until their exact
/// frame. Insertion order is preserved for events sharing a frame (§8:
/// "events with the same timestamp are dispatched in ... insertion order").
#[derive(Debug)]
pub struct EventQueue {
    items: VecDeque<(u32, Event)>,
    capacity: usize,
}

impl EventQueue {
    /// `capacity` must be nonzero.
    pub fn new(capacity: usize) -> Self {
        EventQueue {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// Insert at the back, preserving insertion order. Returns `false`
    /// (without inserting) if the queue is full.
    pub fn insert(&mut self, event: Event, pos: u32) -> bool {
        if self.is_full() {
            return false;
        }
        self.items.push_back((pos, event));
        true
    }

    /// Remove and return the oldest entry.
    pub fn get(&mut self) -> Option<(u32, Event)> {
        self.items.pop_front()
    }

    /// Read the entry at `index` (0 = next to be `get`) without removing it.
    pub fn peek(&self, index: usize) -> Option<&(u32, Event)> {
        self.items.get(index)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Resize the queue. Only valid while empty (mirrors
    /// `Event_queue_resize`'s "the queue will become empty as a result" by
    /// requiring it already be empty, rather than silently dropping items).
    pub fn resize(&mut self, new_capacity: usize) -> bool {
        if !self.items.is_empty() {
            return false;
        }
        self.capacity = new_capacity;
        self.items = VecDeque::with_capacity(new_capacity);
        true
    }
}

/// Something that can receive a dispatched event: a channel, an instrument,
/// an effect/DSP, or the global playback state. Implemented by
/// `channel.rs`'s `Channel` and `scheduler.rs`'s `PlaybackState`; the event
/// loop in `scheduler.rs` selects which target's `apply` to call from
/// `Event::kind`/`index`.
pub trait EventTarget {
    /// Apply `event`, returning whether it was recognised and handled.
    /// Implementations may push follow-up events (e.g. a pattern-delay
    /// pause) onto `queue`, timestamped relative to `now_frame`.
    fn apply(&mut self, event: &Event, cache: &mut EventCache, queue: &mut EventQueue, now_frame: u32) -> bool;
}
