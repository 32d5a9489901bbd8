//! Error taxonomy and the per-engine error slot.
//!
//! The core never panics on malformed *composition* data or bad caller
//! parameters; every fallible entry point returns a [`Result<T, EngineError>`].
//! Alongside that idiomatic surface, [`Engine`](crate::engine::Engine) keeps a
//! single [`ErrorSlot`] so the C-shaped edge described in the external
//! interfaces section (status code + queryable error) can be built on top
//! without duplicating the taxonomy.

use core::panic::Location;
use serde::{Deserialize, Serialize};

/// The closed set of failure categories a core entry point can report.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum EngineError {
    /// A caller-supplied parameter was out of range or otherwise invalid.
    #[error("argument error: {0}")]
    Argument(String),

    /// Composition data (connections, events, instrument headers, ...) was
    /// malformed.
    #[error("format error: {0}")]
    Format(String),

    /// An allocation failed while preparing configuration (never during
    /// render; buffers are pre-sized).
    #[error("memory error: {0}")]
    Memory(String),

    /// A backing resource (sample data, scale table, ...) was unavailable.
    #[error("resource error: {0}")]
    Resource(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn kind_name(&self) -> &'static str {
        match self {
            EngineError::Argument(_) => "Argument",
            EngineError::Format(_) => "Format",
            EngineError::Memory(_) => "Memory",
            EngineError::Resource(_) => "Resource",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            EngineError::Argument(m)
            | EngineError::Format(m)
            | EngineError::Memory(m)
            | EngineError::Resource(m) => m,
        }
    }
}

/// Human-readable error record returned by `Engine::last_error`, matching the
/// `{type, file, line, function, message}` shape the external interface
/// describes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub file: String,
    pub line: u32,
    pub function: String,
    pub message: String,
}

impl ErrorInfo {
    #[track_caller]
    pub fn from_error(err: &EngineError) -> Self {
        let loc = Location::caller();
        ErrorInfo {
            kind: err.kind_name().to_string(),
            file: loc.file().to_string(),
            line: loc.line(),
            function: String::new(),
            message: err.message().to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// One error record per engine. Cleared on `clear_error` or a successful
/// `stop`; set by any failing render or configuration call.
#[derive(Debug, Default)]
pub struct ErrorSlot {
    current: Option<ErrorInfo>,
}

impl ErrorSlot {
    pub fn new() -> Self {
        Self { current: None }
    }

    #[track_caller]
    pub fn set(&mut self, err: &EngineError) {
        let info = ErrorInfo::from_error(err);
        log::error!(
            "engine error [{}]: {}",
            info.kind,
            err.message()
        );
        self.current = Some(info);
    }

    pub fn clear(&mut self) {
        self.current = None;
    }

    pub fn is_set(&self) -> bool {
        self.current.is_some()
    }

    pub fn get(&self) -> Option<&ErrorInfo> {
        self.current.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_names() {
        assert_eq!(
            EngineError::Argument("x".into()).kind_name(),
            "Argument"
        );
        assert_eq!(EngineError::Format("x".into()).kind_name(), "Format");
        assert_eq!(EngineError::Memory("x".into()).kind_name(), "Memory");
        assert_eq!(EngineError::Resource("x".into()).kind_name(), "Resource");
    }

    #[test]
    fn error_slot_lifecycle() {
        let mut slot = ErrorSlot::new();
        assert!(!slot.is_set());

        slot.set(&EngineError::Format("bad connection".into()));
        assert!(slot.is_set());
        let info = slot.get().unwrap();
        assert_eq!(info.kind, "Format");
        assert_eq!(info.message, "bad connection");

        slot.clear();
        assert!(!slot.is_set());
    }

    #[test]
    fn error_info_json_roundtrip() {
        let info = ErrorInfo {
            kind: "Format".to_string(),
            file: "graph.rs".to_string(),
            line: 42,
            function: "parse".to_string(),
            message: "cycle detected".to_string(),
        };
        let json = info.to_json();
        let parsed: ErrorInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, info);
    }
}
