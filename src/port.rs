//! Device ports: the fixed-width input/output registration a [`Device`]
//! exposes and that [`Connections`](crate::graph) validates edges against.

use crate::limits::MAX_PORTS;
use serde::{Deserialize, Serialize};

/// A port index within a device, carried as a two-hex-digit path segment
/// (`in_XX`/`out_XX`). Validated against [`MAX_PORTS`] at registration time.
pub type PortIndex = u8;

/// Coarse signal classification, used when the graph decides whether two
/// connected ports may share a buffer (summable audio/control signals) or
/// must stay separate (gate/trigger edges).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    /// Mixed audio-rate signal; summable when multiple cables land on one
    /// input.
    Audio,
    /// Continuously varying control signal (envelope, LFO output).
    Control,
    /// Binary gate/trigger signal; not summed, last writer wins.
    Gate,
}

impl SignalKind {
    pub fn is_summable(&self) -> bool {
        matches!(self, SignalKind::Audio | SignalKind::Control)
    }
}

/// Which direction a port path addresses (`in_XX` vs `out_XX`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    In,
    Out,
}

/// Bit-set tracking which of a device's up-to-`MAX_PORTS` input and output
/// ports are registered. Connecting an edge to an unregistered port is a
/// format error (§4.B).
#[derive(Debug, Clone)]
pub struct PortSpec {
    inputs: [bool; MAX_PORTS],
    outputs: [bool; MAX_PORTS],
    input_kinds: [SignalKind; MAX_PORTS],
    output_kinds: [SignalKind; MAX_PORTS],
}

impl Default for PortSpec {
    fn default() -> Self {
        PortSpec {
            inputs: [false; MAX_PORTS],
            outputs: [false; MAX_PORTS],
            input_kinds: [SignalKind::Audio; MAX_PORTS],
            output_kinds: [SignalKind::Audio; MAX_PORTS],
        }
    }
}

impl PortSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_input(&mut self, index: PortIndex, kind: SignalKind) {
        self.inputs[index as usize] = true;
        self.input_kinds[index as usize] = kind;
    }

    pub fn register_output(&mut self, index: PortIndex, kind: SignalKind) {
        self.outputs[index as usize] = true;
        self.output_kinds[index as usize] = kind;
    }

    pub fn is_registered(&self, direction: PortDirection, index: PortIndex) -> bool {
        match direction {
            PortDirection::In => self.inputs[index as usize],
            PortDirection::Out => self.outputs[index as usize],
        }
    }

    pub fn input_kind(&self, index: PortIndex) -> Option<SignalKind> {
        self.inputs[index as usize].then(|| self.input_kinds[index as usize])
    }

    pub fn output_kind(&self, index: PortIndex) -> Option<SignalKind> {
        self.outputs[index as usize].then(|| self.output_kinds[index as usize])
    }

    pub fn registered_inputs(&self) -> impl Iterator<Item = PortIndex> + '_ {
        self.inputs
            .iter()
            .enumerate()
            .filter(|(_, &reg)| reg)
            .map(|(i, _)| i as PortIndex)
    }

    pub fn registered_outputs(&self) -> impl Iterator<Item = PortIndex> + '_ {
        self.outputs
            .iter()
            .enumerate()
            .filter(|(_, &reg)| reg)
            .map(|(i, _)| i as PortIndex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_port_reports_false() {
        let spec = PortSpec::new();
        assert!(!spec.is_registered(PortDirection::In, 0));
    }

    #[test]
    fn register_then_query() {
        let mut spec = PortSpec::new();
        spec.register_input(0, SignalKind::Audio);
        spec.register_output(1, SignalKind::Gate);

        assert!(spec.is_registered(PortDirection::In, 0));
        assert!(!spec.is_registered(PortDirection::In, 1));
        assert!(spec.is_registered(PortDirection::Out, 1));
        assert_eq!(spec.input_kind(0), Some(SignalKind::Audio));
        assert_eq!(spec.output_kind(1), Some(SignalKind::Gate));
        assert_eq!(spec.input_kind(1), None);
    }

    #[test]
    fn registered_iterators_list_only_set_bits() {
        let mut spec = PortSpec::new();
        spec.register_input(0, SignalKind::Audio);
        spec.register_input(3, SignalKind::Control);

        let inputs: Vec<PortIndex> = spec.registered_inputs().collect();
        assert_eq!(inputs, vec![0, 3]);
    }

    #[test]
    fn gate_is_not_summable() {
        assert!(!SignalKind::Gate.is_summable());
        assert!(SignalKind::Audio.is_summable());
    }
}
