//! Composition model (§3 / §4.I): passive data for patterns, columns,
//! instruments, generators, effects, and scales. Owned by the engine,
//! mutated only between renders (invariant 6); the loader collaborator
//! (out of scope here, per §1) populates it from the keyed blobs in §6.
//!
//! Grounded on `original_source/src/lib/Instrument.c` (header fields
//! `force`/`force_variation`/`global_force`/`scale_index` parsed by
//! `Instrument_parse_header`, and the `Instrument_reset`/`set_audio_rate`/
//! `update_tempo`/`set_buffer_size` loops over `KQT_GENERATORS_MAX`/
//! `KQT_INST_EFFECTS_MAX` children) and `original_source/src/lib/test/song.c`
//! (`new_Song`, `Subsong_set(order_index, pattern_index)`, one `Column` per
//! channel, `Pattern_get_col`).

use crate::dsp::DspKind;
use crate::error::EngineError;
use crate::event::Value;
use crate::generators::{GeneratorKind, SampleData};
use crate::limits::{MAX_COLUMNS, MAX_EFFECTS, MAX_GENERATORS, MAX_INSTRUMENTS, MAX_SAMPLES};
use crate::scale::Scale;
use crate::timestamp::Timestamp;
use std::collections::HashMap;
use std::sync::Arc;

/// One parsed `pat_XXX/col_YY/p_events.json` entry: `[timestamp,
/// [event_name, value]]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnEvent {
    pub timestamp: Timestamp,
    pub name: String,
    pub value: Value,
}

/// A time-ordered event stream within a pattern (§3 "Column"). `insert`
/// enforces invariant 2 (strictly increasing timestamps) rather than
/// silently sorting, since the loader is expected to feed events already in
/// column order and a reordering would mask malformed content-blob data.
#[derive(Debug, Clone, Default)]
pub struct Column {
    events: Vec<ColumnEvent>,
}

impl Column {
    pub fn new() -> Self {
        Column::default()
    }

    pub fn insert(&mut self, timestamp: Timestamp, name: impl Into<String>, value: Value) -> Result<(), EngineError> {
        if let Some(last) = self.events.last() {
            if timestamp <= last.timestamp {
                return Err(EngineError::Format(format!(
                    "column events must be strictly increasing in timestamp, got {} after {}",
                    timestamp, last.timestamp
                )));
            }
        }
        self.events.push(ColumnEvent {
            timestamp,
            name: name.into(),
            value,
        });
        Ok(())
    }

    pub fn events(&self) -> &[ColumnEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events whose timestamp lies in `[from, to)`, in column order (used by
    /// the scheduler's per-render column walk, §4.H step 2).
    pub fn events_in_range(&self, from: Timestamp, to: Timestamp) -> impl Iterator<Item = &ColumnEvent> {
        self.events.iter().filter(move |e| e.timestamp >= from && e.timestamp < to)
    }
}

/// A fixed-length musical block holding up to [`MAX_COLUMNS`] columns, one
/// per channel (§3 "Pattern").
#[derive(Debug, Clone)]
pub struct Pattern {
    pub length: Timestamp,
    columns: Vec<Column>,
}

impl Pattern {
    pub fn new(length: Timestamp, channel_count: usize) -> Self {
        Pattern {
            length,
            columns: vec![Column::new(); channel_count.min(MAX_COLUMNS)],
        }
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub fn column_mut(&mut self, index: usize) -> Option<&mut Column> {
        self.columns.get_mut(index)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

/// A named composition section: an order list of pattern indices plus its
/// own tempo and global volume (§3 "Sub-song").
#[derive(Debug, Clone)]
pub struct SubSong {
    order: Vec<usize>,
    pub tempo: f64,
    pub global_volume: f64,
}

impl SubSong {
    pub fn new(tempo: f64) -> Self {
        SubSong {
            order: Vec::new(),
            tempo,
            global_volume: 1.0,
        }
    }

    pub fn push_pattern(&mut self, pattern_index: usize) {
        self.order.push(pattern_index);
    }

    pub fn pattern_at(&self, order_index: usize) -> Option<usize> {
        self.order.get(order_index).copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for SubSong {
    fn default() -> Self {
        SubSong::new(120.0)
    }
}

/// `ins_XX/p_instrument.json`'s header fields, matching
/// `Instrument_parse_header`'s key set.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct InstrumentHeader {
    pub force: f64,
    pub force_variation: f64,
    pub global_force: f64,
    pub scale_index: i32,
}

impl Default for InstrumentHeader {
    fn default() -> Self {
        InstrumentHeader {
            force: 1.0,
            force_variation: 0.0,
            global_force: 1.0,
            scale_index: 0,
        }
    }
}

/// `ins_XX/gen_YY/p_generator.json`: a generator's kind plus the voice-pool
/// size it should be built with.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct GeneratorDef {
    pub kind: GeneratorKind,
    pub voice_count: usize,
}

/// An effect's own internal graph: its `dsp_YY` devices plus their internal
/// `dsp_YY/...` connection edges.
#[derive(Debug, Clone, Default)]
pub struct EffectDef {
    pub dsps: HashMap<u8, DspKind>,
    pub connections: Vec<(String, String)>,
}

/// A named bundle of processors plus its own internal device graph (§3
/// "Instrument (audio unit)"). Owns up to [`crate::limits::MAX_GENERATORS`]
/// generators and [`crate::limits::MAX_EFFECTS`] effects, wired by
/// `connections` (the instrument-level `gen_XX/...`/`eff_XX/...` edges).
#[derive(Debug, Clone, Default)]
pub struct Instrument {
    pub header: InstrumentHeader,
    generators: HashMap<u8, GeneratorDef>,
    effects: HashMap<u8, EffectDef>,
    samples: HashMap<u8, Arc<SampleData>>,
    pub connections: Vec<(String, String)>,
}

impl Instrument {
    pub fn new() -> Self {
        Instrument::default()
    }

    pub fn generator(&self, index: u8) -> Option<&GeneratorDef> {
        self.generators.get(&index)
    }

    pub fn generators(&self) -> impl Iterator<Item = (&u8, &GeneratorDef)> {
        self.generators.iter()
    }

    pub fn set_generator(&mut self, index: u8, def: GeneratorDef) -> Result<(), EngineError> {
        if index as usize >= MAX_GENERATORS {
            return Err(EngineError::Argument(format!(
                "generator index {} exceeds the configured maximum",
                index
            )));
        }
        self.generators.insert(index, def);
        Ok(())
    }

    pub fn effect(&self, index: u8) -> Option<&EffectDef> {
        self.effects.get(&index)
    }

    pub fn effects(&self) -> impl Iterator<Item = (&u8, &EffectDef)> {
        self.effects.iter()
    }

    pub fn set_effect(&mut self, index: u8, def: EffectDef) -> Result<(), EngineError> {
        if index as usize >= MAX_EFFECTS {
            return Err(EngineError::Argument(format!(
                "effect index {} exceeds the configured maximum",
                index
            )));
        }
        self.effects.insert(index, def);
        Ok(())
    }

    /// A PCM generator's (`gen_XX`'s `GeneratorKind::Pcm { sample_slot }`)
    /// sample data, resolved at graph-construction time.
    pub fn sample(&self, slot: u8) -> Option<Arc<SampleData>> {
        self.samples.get(&slot).cloned()
    }

    pub fn set_sample(&mut self, slot: u8, data: SampleData) -> Result<(), EngineError> {
        if slot as usize >= MAX_SAMPLES {
            return Err(EngineError::Argument(format!(
                "sample slot {} exceeds the configured maximum",
                slot
            )));
        }
        self.samples.insert(slot, Arc::new(data));
        Ok(())
    }
}

/// Root container (§3 "Composition"): sub-songs, patterns, instruments,
/// scales, and the root-level connection edges. Immutable during a render
/// pass; `Engine` rebuilds its live device graph from this whenever it
/// changes.
#[derive(Debug, Clone)]
pub struct Composition {
    sub_songs: Vec<SubSong>,
    patterns: Vec<Pattern>,
    instruments: HashMap<u8, Instrument>,
    scales: Vec<Scale>,
    active_scale: usize,
    pub root_connections: Vec<(String, String)>,
    root_effects: HashMap<u8, EffectDef>,
}

impl Composition {
    pub fn new() -> Self {
        Composition {
            sub_songs: vec![SubSong::default()],
            patterns: Vec::new(),
            instruments: HashMap::new(),
            scales: vec![Scale::default()],
            active_scale: 0,
            root_connections: Vec::new(),
            root_effects: HashMap::new(),
        }
    }

    pub fn sub_song(&self, index: usize) -> Option<&SubSong> {
        self.sub_songs.get(index)
    }

    pub fn sub_song_mut(&mut self, index: usize) -> Option<&mut SubSong> {
        self.sub_songs.get_mut(index)
    }

    pub fn push_sub_song(&mut self, sub_song: SubSong) -> usize {
        self.sub_songs.push(sub_song);
        self.sub_songs.len() - 1
    }

    pub fn pattern(&self, index: usize) -> Option<&Pattern> {
        self.patterns.get(index)
    }

    pub fn pattern_mut(&mut self, index: usize) -> Option<&mut Pattern> {
        self.patterns.get_mut(index)
    }

    pub fn push_pattern(&mut self, pattern: Pattern) -> usize {
        self.patterns.push(pattern);
        self.patterns.len() - 1
    }

    pub fn instrument(&self, index: u8) -> Option<&Instrument> {
        self.instruments.get(&index)
    }

    pub fn instrument_mut(&mut self, index: u8) -> Option<&mut Instrument> {
        self.instruments.get_mut(&index)
    }

    pub fn set_instrument(&mut self, index: u8, instrument: Instrument) -> Result<(), EngineError> {
        if index as usize >= MAX_INSTRUMENTS {
            return Err(EngineError::Argument(format!(
                "instrument index {} exceeds the configured maximum",
                index
            )));
        }
        self.instruments.insert(index, instrument);
        Ok(())
    }

    pub fn instruments(&self) -> impl Iterator<Item = (&u8, &Instrument)> {
        self.instruments.iter()
    }

    pub fn root_effect(&self, index: u8) -> Option<&EffectDef> {
        self.root_effects.get(&index)
    }

    pub fn set_root_effect(&mut self, index: u8, def: EffectDef) -> Result<(), EngineError> {
        if index as usize >= MAX_EFFECTS {
            return Err(EngineError::Argument(format!(
                "effect index {} exceeds the configured maximum",
                index
            )));
        }
        self.root_effects.insert(index, def);
        Ok(())
    }

    pub fn root_effects(&self) -> impl Iterator<Item = (&u8, &EffectDef)> {
        self.root_effects.iter()
    }

    pub fn scale(&self, index: usize) -> Option<&Scale> {
        self.scales.get(index)
    }

    pub fn push_scale(&mut self, scale: Scale) -> usize {
        self.scales.push(scale);
        self.scales.len() - 1
    }

    pub fn active_scale(&self) -> &Scale {
        &self.scales[self.active_scale]
    }

    pub fn set_active_scale(&mut self, index: usize) -> Result<(), EngineError> {
        if index >= self.scales.len() {
            return Err(EngineError::Argument(format!("no scale at index {}", index)));
        }
        self.active_scale = index;
        Ok(())
    }
}

impl Default for Composition {
    fn default() -> Self {
        Composition::new()
    }
}
