//! # Kantele: a modular music synthesis engine
//!
//! `kantele` renders sequenced compositions (patterns, columns, instruments,
//! generators, and effects wired into a per-instrument and root device
//! graph) into PCM audio. A composition is loaded as a tree of named,
//! index-addressed content (an instrument's generators, an effect's DSPs,
//! a pattern's per-channel columns) the way a tracker-style engine keys its
//! on-disk data; playback walks that tree frame by frame, turning column
//! events into device-graph parameter changes.
//!
//! ## Layout
//!
//! - [`timestamp`] / [`limits`]: fixed-point musical position and the
//!   compile-time maximums every index-addressed table is bound by.
//! - [`event`] / [`channel`] / [`scheduler`]: the event system, typed
//!   events, per-channel slider/note state, and the playback cursor that
//!   turns a composition's columns into a queue of them.
//! - [`composition`] / [`scale`]: the passive data model, patterns,
//!   sub-songs, instruments, and tuning tables.
//! - [`graph`] / [`device`] / [`port`] / [`buffer`]: the device graph,
//!   topologically-sorted processing nodes connected by typed ports.
//! - [`generators`] / [`dsp`] / [`voice`] / [`envelope`] / [`lfo`] /
//!   [`filter`] / [`rng`]: the concrete devices and the DSP kernels behind
//!   them.
//! - [`engine`]: [`engine::Engine`], the top-level handle that ties all of
//!   the above into the pull-mode render API.
//! - [`snapshot`]: lock-free playback-position reporting for a UI thread.
//! - [`serialize`]: on-disk composition content, keyed the way the engine
//!   addresses it (`ins_XX/gen_YY/p_generator.json`, etc).
//! - [`error`]: the engine's error taxonomy and the error slot a render
//!   thread reports through.

pub mod buffer;
pub mod channel;
pub mod composition;
pub mod device;
pub mod dsp;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod event;
pub mod filter;
pub mod generators;
pub mod graph;
pub mod lfo;
pub mod limits;
pub mod port;
pub mod rng;
pub mod scale;
pub mod scheduler;
pub mod serialize;
pub mod slider;
pub mod snapshot;
pub mod timestamp;
pub mod voice;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::channel::{Channel, ChannelAction, NotePitch};
    pub use crate::composition::{
        Column, ColumnEvent, Composition, EffectDef, GeneratorDef, Instrument, InstrumentHeader,
        Pattern, SubSong,
    };
    pub use crate::device::Device;
    pub use crate::dsp::{ChorusDsp, DspKind, FilterDsp, FreeverbDsp, GainDsp, PanningDsp};
    pub use crate::engine::{CompositionLoader, Engine};
    pub use crate::error::{EngineError, EngineResult, ErrorInfo, ErrorSlot};
    pub use crate::event::{Event, EventCache, EventKind, EventQueue, EventTarget, Value};
    pub use crate::generators::{GeneratorDevice, GeneratorKind, LoopMode, SampleData};
    pub use crate::graph::{
        ConnectionLevel, Connections, InterfaceNode, ParsedPath, PortRef, SubgraphDevice,
    };
    pub use crate::limits::{
        EngineConfig, MAX_CHANNELS, MAX_COLUMNS, MAX_DSPS, MAX_EFFECTS, MAX_GENERATORS,
        MAX_INSTRUMENTS, MAX_PORTS, MAX_SAMPLES, MAX_VOICES,
    };
    pub use crate::port::{PortDirection, PortIndex, PortSpec, SignalKind};
    pub use crate::scale::{Scale, ScaleInfo, ScalePresets, OCTAVE_MAX, OCTAVE_MIN};
    pub use crate::scheduler::{PendingJump, PlaybackMode, PlaybackState};
    pub use crate::serialize::{
        ConnectionsFile, DspFile, EffectHeaderFile, EventFileEntry, EventsFile, GeneratorFile,
        InstrumentFile, SerializeError,
    };
    pub use crate::slider::Slider;
    pub use crate::snapshot::{MixState, MixStateHandle};
    pub use crate::timestamp::{Timestamp, SUBBEATS_PER_BEAT};
    pub use crate::voice::{Voice, VoicePool, VoiceState};
}

pub use prelude::*;
