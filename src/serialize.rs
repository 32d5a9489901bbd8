//! On-disk composition content (§6), keyed the way the engine addresses it.
//!
//! A loader collaborator (not implemented here, per §1's scope) reads a
//! composition's keyed blobs (one JSON document per key) and turns each
//! into the matching type below before handing it to [`crate::composition`]
//! builders. Key naming mirrors the original's directory-per-key storage
//! format (`ins_01/gen_00/p_generator.json` etc, grounded on
//! `original_source/src/lib/Handle_rw.c`'s key construction), flattened here
//! into plain strings since this engine has no filesystem layer of its own.

use crate::composition::{EffectDef, GeneratorDef, Instrument, InstrumentHeader};
use crate::dsp::DspKind;
use crate::event::Value;
use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `p_connections.json` at root, instrument, or effect level: an ordered
/// list of `(source_path, destination_path)` pairs, fed to
/// [`crate::graph::Connections::connect_from_edges`] once parsed.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConnectionsFile {
    pub connections: Vec<(String, String)>,
}

/// `ins_XX/p_instrument.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentFile {
    pub header: InstrumentHeader,
}

/// `ins_XX/gen_YY/p_generator.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorFile {
    #[serde(flatten)]
    pub def: GeneratorDef,
}

/// `eff_XX/dsp_YY/p_dsp.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DspFile {
    pub kind: DspKind,
}

/// One entry of `pat_XXX/col_YY/p_events.json`: `[timestamp, [name, value]]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFileEntry {
    pub timestamp: Timestamp,
    pub name: String,
    pub value: Value,
}

/// `pat_XXX/col_YY/p_events.json` in full.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventsFile {
    pub events: Vec<EventFileEntry>,
}

/// Parse error produced while turning a composition's keyed JSON blobs into
/// the strongly typed definitions above. Distinct from
/// [`crate::error::EngineError`] since a malformed key string is a loader
/// concern, not an engine one; callers typically map this into
/// `EngineError::Format` at the loader/engine boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SerializeError {
    #[error("invalid JSON at key \"{key}\": {message}")]
    InvalidJson { key: String, message: String },
    #[error("unrecognized content key \"{0}\"")]
    UnknownKey(String),
}

impl ConnectionsFile {
    pub fn from_json(json: &str) -> Result<Self, SerializeError> {
        serde_json::from_str(json).map_err(|e| SerializeError::InvalidJson {
            key: "p_connections.json".to_string(),
            message: e.to_string(),
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl InstrumentFile {
    pub fn from_json(json: &str) -> Result<Self, SerializeError> {
        serde_json::from_str(json).map_err(|e| SerializeError::InvalidJson {
            key: "p_instrument.json".to_string(),
            message: e.to_string(),
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl GeneratorFile {
    pub fn from_json(json: &str) -> Result<Self, SerializeError> {
        serde_json::from_str(json).map_err(|e| SerializeError::InvalidJson {
            key: "p_generator.json".to_string(),
            message: e.to_string(),
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl DspFile {
    pub fn from_json(json: &str) -> Result<Self, SerializeError> {
        serde_json::from_str(json).map_err(|e| SerializeError::InvalidJson {
            key: "p_dsp.json".to_string(),
            message: e.to_string(),
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl EventsFile {
    pub fn from_json(json: &str) -> Result<Self, SerializeError> {
        serde_json::from_str(json).map_err(|e| SerializeError::InvalidJson {
            key: "p_events.json".to_string(),
            message: e.to_string(),
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Builds an [`Instrument`] from its `p_instrument.json`, the `gen_YY`
/// blobs keyed by index, and the `eff_XX` blobs nested under it, the way
/// `Instrument_parse_header` followed by per-child `Generator_new`/
/// `Effect_new` calls populates one instrument's in-memory tree.
pub fn build_instrument(
    header: InstrumentFile,
    generators: HashMap<u8, GeneratorFile>,
    effects: HashMap<u8, (EffectHeaderFile, HashMap<u8, DspFile>)>,
) -> Instrument {
    let mut instrument = Instrument::new();
    instrument.header = header.header;
    for (index, gen) in generators {
        let _ = instrument.set_generator(index, gen.def);
    }
    for (index, (eff_header, dsps)) in effects {
        let mut def = EffectDef {
            connections: eff_header.connections.connections,
            ..EffectDef::default()
        };
        for (dsp_index, dsp) in dsps {
            def.dsps.insert(dsp_index, dsp.kind);
        }
        let _ = instrument.set_effect(index, def);
    }
    instrument
}

/// `eff_XX/p_connections.json` alongside its `dsp_YY` children, bundled so
/// [`build_instrument`] can build one [`EffectDef`] per call.
#[derive(Debug, Clone, Default)]
pub struct EffectHeaderFile {
    pub connections: ConnectionsFile,
}
