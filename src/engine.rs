//! The top-level [`Engine`]: wires the composition model, the event system,
//! the scheduler, and the device graph into the pull-mode render API (§6).
//!
//! One struct owns every subsystem and exposes a single `render`-style
//! entry point, generalized with `original_source/src/core/Player.c`'s
//! render loop: advance the scheduler over the window, drain its event
//! queue in frame order so an event never renders "late" within its own
//! buffer, then mix whatever falls after the last event up to the window's
//! end.

use std::collections::HashMap;
use std::path::Path;

use crate::channel::{Channel, ChannelAction, NotePitch};
use crate::composition::{Composition, EffectDef, Instrument};
use crate::device::Device;
use crate::dsp::GainDsp;
use crate::error::{EngineError, EngineResult, ErrorInfo, ErrorSlot};
use crate::event::{Event, EventCache, EventKind, EventQueue, EventTarget};
use crate::generators::{GeneratorDevice, GeneratorKind};
use crate::graph::{ConnectionLevel, Connections, InterfaceNode, SubgraphDevice};
use crate::limits::EngineConfig;
use crate::scheduler::PlaybackState;
use crate::snapshot::{MixState, MixStateHandle};

/// The composition-file loader collaborator (§1: out of scope here). A
/// concrete implementation walks a directory tree of keyed blobs
/// (`p_connections.json`, `ins_XX/p_instrument.json`, ...) and returns a
/// populated [`Composition`]; this crate only defines the seam.
pub trait CompositionLoader {
    fn load(&self, path: &Path) -> EngineResult<Composition>;
}

fn parse_hex2_index(s: &str) -> EngineResult<u8> {
    u8::from_str_radix(s, 16).map_err(|_| EngineError::Format(format!("invalid hex index: \"{}\"", s)))
}

fn resolve_effect_node(
    path: &str,
    def: &EffectDef,
    audio_rate: f64,
    buffer_size: usize,
) -> EngineResult<Box<dyn Device>> {
    if let Some(rest) = path.strip_prefix("dsp_") {
        let index = parse_hex2_index(rest)?;
        let kind = def
            .dsps
            .get(&index)
            .ok_or_else(|| EngineError::Format(format!("no dsp at dsp_{:02x}", index)))?;
        return Ok(kind.build(audio_rate));
    }
    match path {
        "Iin" => Ok(Box::new(InterfaceNode::new(buffer_size))),
        "Iout" => Ok(Box::new(GainDsp::new(1.0))),
        other => Err(EngineError::Format(format!("unknown effect graph path: \"{}\"", other))),
    }
}

fn build_effect_graph(def: &EffectDef, audio_rate: f64, buffer_size: usize) -> EngineResult<Connections> {
    let mut graph = Connections::new(Box::new(GainDsp::new(1.0)), ConnectionLevel::Effect, audio_rate, buffer_size);
    graph.connect_from_edges(&def.connections, |path| {
        resolve_effect_node(path, def, audio_rate, buffer_size)
    })?;
    graph.prepare()?;
    Ok(graph)
}

fn resolve_instrument_node(
    path: &str,
    instrument: &Instrument,
    audio_rate: f64,
    buffer_size: usize,
) -> EngineResult<Box<dyn Device>> {
    if let Some(rest) = path.strip_prefix("gen_") {
        let index = parse_hex2_index(rest)?;
        let def = instrument
            .generator(index)
            .ok_or_else(|| EngineError::Format(format!("no generator at gen_{:02x}", index)))?;
        let sample = match def.kind {
            GeneratorKind::Pcm { sample_slot } => instrument.sample(sample_slot),
            _ => None,
        };
        return Ok(Box::new(GeneratorDevice::with_sample(def.kind, def.voice_count, sample)));
    }
    if let Some(rest) = path.strip_prefix("eff_") {
        let index = parse_hex2_index(rest)?;
        let def = instrument
            .effect(index)
            .ok_or_else(|| EngineError::Format(format!("no effect at eff_{:02x}", index)))?;
        let inner = build_effect_graph(def, audio_rate, buffer_size)?;
        return Ok(Box::new(SubgraphDevice::new(inner, true)));
    }
    match path {
        "Iin" => Ok(Box::new(InterfaceNode::new(buffer_size))),
        "Iout" => Ok(Box::new(GainDsp::new(1.0))),
        other => Err(EngineError::Format(format!("unknown instrument graph path: \"{}\"", other))),
    }
}

fn build_instrument_graph(instrument: &Instrument, audio_rate: f64, buffer_size: usize) -> EngineResult<Connections> {
    let mut graph = Connections::new(
        Box::new(GainDsp::new(1.0)),
        ConnectionLevel::Instrument,
        audio_rate,
        buffer_size,
    );
    graph.connect_from_edges(&instrument.connections, |path| {
        resolve_instrument_node(path, instrument, audio_rate, buffer_size)
    })?;
    graph.prepare()?;
    Ok(graph)
}

fn resolve_root_node(
    path: &str,
    composition: &Composition,
    audio_rate: f64,
    buffer_size: usize,
) -> EngineResult<Box<dyn Device>> {
    if let Some(rest) = path.strip_prefix("ins_") {
        let index = parse_hex2_index(rest)?;
        let instrument = composition
            .instrument(index)
            .ok_or_else(|| EngineError::Format(format!("no instrument at ins_{:02x}", index)))?;
        let inner = build_instrument_graph(instrument, audio_rate, buffer_size)?;
        return Ok(Box::new(SubgraphDevice::new(inner, false)));
    }
    if let Some(rest) = path.strip_prefix("eff_") {
        let index = parse_hex2_index(rest)?;
        let def = composition
            .root_effect(index)
            .ok_or_else(|| EngineError::Format(format!("no effect at eff_{:02x}", index)))?;
        let inner = build_effect_graph(def, audio_rate, buffer_size)?;
        return Ok(Box::new(SubgraphDevice::new(inner, true)));
    }
    Err(EngineError::Format(format!("unknown root graph path: \"{}\"", path)))
}

fn build_root_graph(composition: &Composition, audio_rate: f64, buffer_size: usize) -> EngineResult<Connections> {
    let mut graph = Connections::new(Box::new(GainDsp::new(1.0)), ConnectionLevel::Root, audio_rate, buffer_size);
    graph.connect_from_edges(&composition.root_connections, |path| {
        resolve_root_node(path, composition, audio_rate, buffer_size)
    })?;
    graph.prepare()?;
    Ok(graph)
}

/// The synthesis core's top-level handle (§6). Owns the composition, the
/// playback cursor, per-channel controller state, and the live device
/// graph rebuilt from the composition whenever it changes.
pub struct Engine {
    config: EngineConfig,
    composition: Composition,
    playback: PlaybackState,
    channels: Vec<Channel>,
    /// Voices currently held open by each channel's active note, as
    /// `(generator_index, voice_index, voice_id)` triples, one per
    /// generator in the instrument's voice group (§3 "Voice group"), so a
    /// later `n-` can release every one of them.
    channel_voices: HashMap<usize, Vec<(u8, usize, u64)>>,
    next_group_id: u64,
    root_graph: Connections,
    event_cache: EventCache,
    event_queue: EventQueue,
    mix_state_handle: MixStateHandle,
    last_mix_state: MixState,
    error_slot: ErrorSlot,
    /// Set by `composition_mut` and `set_audio_rate`; the next `render`
    /// rebuilds the device graph before doing anything else (invariant 6:
    /// propagate before any render call that depends on it).
    graph_dirty: bool,
}

impl Engine {
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let composition = Composition::new();
        let root_graph = build_root_graph(&composition, config.audio_rate, config.buffer_size)?;

        let mut playback = PlaybackState::new();
        playback.set_audio_rate(config.audio_rate);

        let mut event_cache = EventCache::new();
        for name in ["t", "/t", "vs", "vd", "fs", "pan", "I", ".s"] {
            event_cache.register(name);
        }

        let channels = (0..config.channel_count).map(|_| Channel::new()).collect();

        log::debug!(
            "engine constructed: rate={} buffer_size={} voices={} channels={}",
            config.audio_rate,
            config.buffer_size,
            config.voice_count,
            config.channel_count
        );

        Ok(Engine {
            event_queue: EventQueue::new(config.event_queue_size),
            config,
            composition,
            playback,
            channels,
            channel_voices: HashMap::new(),
            next_group_id: 1,
            root_graph,
            event_cache,
            mix_state_handle: MixStateHandle::new(),
            last_mix_state: MixState::default(),
            error_slot: ErrorSlot::new(),
            graph_dirty: false,
        })
    }

    /// Delegates composition loading to `loader` (§1: the loader is an
    /// external collaborator, specified only by this trait's interface).
    pub fn new_from_path(
        path: impl AsRef<Path>,
        config: EngineConfig,
        loader: &dyn CompositionLoader,
    ) -> EngineResult<Self> {
        let mut engine = Engine::new(config)?;
        engine.composition = loader.load(path.as_ref())?;
        engine.rebuild_graph()?;
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn composition(&self) -> &Composition {
        &self.composition
    }

    /// Mutable access to the composition. Marks the device graph dirty;
    /// the next `render` rebuilds it before advancing the scheduler.
    pub fn composition_mut(&mut self) -> &mut Composition {
        self.graph_dirty = true;
        &mut self.composition
    }

    pub fn playback_state(&self) -> &PlaybackState {
        &self.playback
    }

    fn rebuild_graph(&mut self) -> EngineResult<()> {
        self.root_graph = build_root_graph(&self.composition, self.config.audio_rate, self.config.buffer_size)?;
        self.graph_dirty = false;
        log::debug!("engine: device graph rebuilt ({} nodes)", self.root_graph.node_count());
        Ok(())
    }

    /// Configuration-time rate change (§4.L): takes effect on the next
    /// `render`, which rebuilds the whole device tree at the new rate.
    pub fn set_audio_rate(&mut self, rate: f64) {
        self.config.audio_rate = rate;
        self.playback.set_audio_rate(rate);
        self.graph_dirty = true;
    }

    pub fn play_event(&mut self) {
        self.playback.play_event();
    }

    pub fn play_pattern(&mut self, index: usize, tempo: f64) {
        self.playback.play_pattern(index, tempo);
    }

    pub fn play_sub_song(&mut self, index: usize) -> EngineResult<()> {
        self.playback.play_sub_song(index, &self.composition)
    }

    pub fn play_default(&mut self) -> EngineResult<()> {
        self.playback.play_default(&self.composition)
    }

    pub fn stop(&mut self) {
        self.playback.stop();
    }

    pub fn mix_state(&self) -> MixState {
        self.last_mix_state.clone()
    }

    pub fn mix_state_handle(&self) -> MixStateHandle {
        self.mix_state_handle.clone()
    }

    pub fn last_error(&self) -> Option<&ErrorInfo> {
        self.error_slot.get()
    }

    pub fn clear_error(&mut self) {
        self.error_slot.clear();
    }

    /// Render up to `nframes` frames, returning the number actually mixed.
    /// Chunks the request to the configured buffer size since the device
    /// graph's output buffers are fixed at that size; a chunk that errors
    /// (graph not preparable, composition argument error) stops the render
    /// early and sets the error slot, per §7's "frames actually mixed,
    /// possibly 0, with error set" contract.
    pub fn render(&mut self, nframes: u32) -> u32 {
        log::trace!("render: requested {} frames", nframes);

        if self.graph_dirty {
            if let Err(err) = self.rebuild_graph() {
                self.error_slot.set(&err);
                return 0;
            }
        }

        let mut state = MixState::default();
        let buffer_size = self.config.buffer_size as u32;
        let mut mixed_total = 0u32;
        let mut remaining = nframes;

        while remaining > 0 {
            let chunk = remaining.min(buffer_size);
            match self.render_chunk(chunk, &mut state) {
                Ok(()) => {
                    mixed_total += chunk;
                    remaining -= chunk;
                }
                Err(err) => {
                    self.error_slot.set(&err);
                    break;
                }
            }
        }

        state.frames_mixed = mixed_total as u64;
        state.playing = self.playback.is_playing();
        state.sub_song = self.playback.sub_song;
        state.order_index = self.playback.order_index;
        state.pattern_index = self.playback.pattern_index;
        state.position = self.playback.pos;
        state.tempo = self.playback.tempo();

        if mixed_total == 0 && nframes > 0 {
            log::error!("render produced zero frames for a {}-frame request", nframes);
        }

        self.last_mix_state = state.clone();
        self.mix_state_handle.publish(state);
        mixed_total
    }

    /// One buffer-sized chunk: advance the scheduler over it, then drain
    /// its event queue in frame order, rendering the graph between
    /// consecutive events so a mid-window event's effect is audible from
    /// its own frame onward rather than only at the chunk boundary (§4.H
    /// step 3).
    fn render_chunk(&mut self, nframes: u32, state: &mut MixState) -> EngineResult<()> {
        self.event_queue.clear();
        self.playback
            .advance(&self.composition, self.config.channel_count, nframes, &mut self.event_queue);

        let mut cursor = 0u32;
        loop {
            let Some((frame, event)) = self.event_queue.get() else {
                break;
            };
            if frame > cursor {
                self.render_window(cursor, frame, state)?;
                cursor = frame;
            }
            self.dispatch_event(frame, event)?;
            // A note-on just allocated a voice that a one-shot generator
            // (e.g. debug's single-pulse mode) may render-and-kill inside
            // the very same window below; sample the peak here too so it
            // isn't missed.
            let active = self.count_active_voices();
            if active > state.active_voice_peak {
                state.active_voice_peak = active;
            }
        }
        if cursor < nframes {
            self.render_window(cursor, nframes, state)?;
        }
        Ok(())
    }

    fn render_window(&mut self, start: u32, stop: u32, state: &mut MixState) -> EngineResult<()> {
        if start >= stop {
            return Ok(());
        }
        let (s, e) = (start as usize, stop as usize);
        self.root_graph.clear(s, e);
        self.root_graph.mix(s, e, self.config.audio_rate, self.playback.tempo());

        let master = self.root_graph.master();
        if let Some(buf) = self.root_graph.output_buffer(master, 0) {
            for i in s..e {
                let (l, r) = buf.get(i);
                state.observe_amplitude(0, l, 1.0);
                state.observe_amplitude(1, r, 1.0);
            }
        }

        let active = self.count_active_voices();
        if active > state.active_voice_peak {
            state.active_voice_peak = active;
        }
        Ok(())
    }

    fn dispatch_event(&mut self, frame: u32, event: Event) -> EngineResult<()> {
        match event.kind {
            EventKind::Channel => {
                let idx = event.index.max(0) as usize;
                if idx < self.channels.len() {
                    self.channels[idx].apply(&event, &mut self.event_cache, &mut self.event_queue, frame);
                    self.forward_channel_actions(idx)?;
                } else {
                    log::warn!("dispatch: channel index {} out of range, dropping \"{}\"", idx, event.name);
                }
            }
            _ => {
                self.playback.apply(&event, &mut self.event_cache, &mut self.event_queue, frame);
            }
        }
        Ok(())
    }

    /// Forward a channel's recorded note-on/note-off (§4.H's event handler
    /// "may push follow-up... state mutation") to its currently selected
    /// instrument's generators. A channel with no instrument selected drops
    /// its pending actions silently, matching "events are best-effort" (§7).
    fn forward_channel_actions(&mut self, idx: usize) -> EngineResult<()> {
        let actions = std::mem::take(&mut self.channels[idx].pending);
        let Some(instrument_index) = self.channels[idx].instrument else {
            return Ok(());
        };
        for action in actions {
            match action {
                ChannelAction::NoteOn { pitch, force } => {
                    let Some(hz) = self.resolve_note_pitch(instrument_index, pitch) else {
                        continue;
                    };
                    self.trigger_note(idx, instrument_index, hz, force)?
                }
                ChannelAction::NoteOff => self.release_note(idx, instrument_index)?,
            }
        }
        Ok(())
    }

    /// Resolves a note-on's pitch to a frequency: `NotePitch::Hz` passes
    /// through unchanged, `NotePitch::Scale` looks the `(note-index,
    /// octave)` pair up against the triggering instrument's scale (its
    /// header's `scale_index`, §4.I), falling back to the composition's
    /// active scale if the instrument's own index is out of range. Returns
    /// `None` (dropping the note, logged) if neither scale nor note/octave
    /// combination resolves.
    fn resolve_note_pitch(&self, instrument_index: u8, pitch: NotePitch) -> Option<f64> {
        let (index, octave) = match pitch {
            NotePitch::Hz(hz) => return Some(hz),
            NotePitch::Scale { index, octave } => (index, octave),
        };
        let scale_index = self
            .composition
            .instrument(instrument_index)
            .map(|instrument| instrument.header.scale_index)
            .filter(|&i| i >= 0)
            .map(|i| i as usize);
        let scale = scale_index
            .and_then(|i| self.composition.scale(i))
            .unwrap_or_else(|| self.composition.active_scale());
        let freq = scale.note_to_freq(index as usize, octave);
        if freq.is_none() {
            log::warn!("note-on: note {} octave {} out of range for the active scale, dropping", index, octave);
        }
        freq
    }

    fn instrument_subgraph(&mut self, instrument_index: u8) -> Option<&mut Connections> {
        let path = format!("ins_{:02x}", instrument_index);
        let key = self.root_graph.node_key(&path)?;
        self.root_graph
            .device_mut(key)?
            .as_any_mut()
            .downcast_mut::<SubgraphDevice>()
            .map(|d| d.inner_mut())
    }

    /// Starts one voice per generator in the instrument, all sharing a
    /// fresh group id (§3 "Voice group"), and remembers which voices belong
    /// to this channel so a later release can find them.
    fn trigger_note(&mut self, channel_idx: usize, instrument_index: u8, pitch: f64, force: f64) -> EngineResult<()> {
        let Some(instrument) = self.composition.instrument(instrument_index) else {
            log::warn!("note-on: no instrument at ins_{:02x}", instrument_index);
            return Ok(());
        };
        let gen_indices: Vec<u8> = instrument.generators().map(|(&index, _)| index).collect();
        let group_id = self.next_group_id;
        self.next_group_id += 1;

        let Some(inner) = self.instrument_subgraph(instrument_index) else {
            return Ok(());
        };

        let mut voices = Vec::with_capacity(gen_indices.len());
        for gen_index in gen_indices {
            let gen_path = format!("gen_{:02x}", gen_index);
            let Some(gen_key) = inner.node_key(&gen_path) else {
                continue;
            };
            let Some(gen_device) = inner
                .device_mut(gen_key)
                .and_then(|d| d.as_any_mut().downcast_mut::<GeneratorDevice>())
            else {
                continue;
            };
            if let Some(voice_index) = gen_device.trigger(None, group_id, channel_idx, 0, force, pitch) {
                if let Some(voice_id) = gen_device.voice_id(voice_index) {
                    voices.push((gen_index, voice_index, voice_id));
                }
            }
        }
        self.channel_voices.insert(channel_idx, voices);
        Ok(())
    }

    fn release_note(&mut self, channel_idx: usize, instrument_index: u8) -> EngineResult<()> {
        let Some(voices) = self.channel_voices.remove(&channel_idx) else {
            return Ok(());
        };
        let Some(inner) = self.instrument_subgraph(instrument_index) else {
            return Ok(());
        };
        for (gen_index, voice_index, _voice_id) in voices {
            let gen_path = format!("gen_{:02x}", gen_index);
            if let Some(gen_key) = inner.node_key(&gen_path) {
                if let Some(gen_device) = inner
                    .device_mut(gen_key)
                    .and_then(|d| d.as_any_mut().downcast_mut::<GeneratorDevice>())
                {
                    gen_device.release(voice_index);
                }
            }
        }
        Ok(())
    }

    /// Sums `active_count` across every generator of every instrument, for
    /// the per-render `active_voice_peak` snapshot field.
    fn count_active_voices(&mut self) -> usize {
        let instrument_indices: Vec<u8> = self.composition.instruments().map(|(&index, _)| index).collect();
        let mut total = 0usize;
        for instrument_index in instrument_indices {
            let gen_indices: Vec<u8> = match self.composition.instrument(instrument_index) {
                Some(instrument) => instrument.generators().map(|(&index, _)| index).collect(),
                None => continue,
            };
            let Some(inner) = self.instrument_subgraph(instrument_index) else {
                continue;
            };
            for gen_index in gen_indices {
                let gen_path = format!("gen_{:02x}", gen_index);
                if let Some(gen_key) = inner.node_key(&gen_path) {
                    if let Some(gen_device) = inner
                        .device_mut(gen_key)
                        .and_then(|d| d.as_any_mut().downcast_mut::<GeneratorDevice>())
                    {
                        total += gen_device.active_count();
                    }
                }
            }
        }
        total
    }
}
