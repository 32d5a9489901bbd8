//! The `Device` role: the capability trait every synthesis node (master
//! output, instrument interface, generator, effect, DSP) implements.
//!
//! Re-architected from `original_source`'s function-pointer v-table (§9): a
//! device owns its own render state inline rather than splitting "device"
//! (immutable description) from "device state" (create_state output). The
//! trait covers the usual graph-module surface (`port_spec`/`tick`/
//! `reset`/`set_sample_rate`) plus the lifecycle hooks (`set_buffer_size`,
//! `set_tempo`, `update_key`) that v-table has and a plain tick-only trait
//! wouldn't.

use crate::buffer::AudioBuffer;
use crate::port::PortSpec;
use std::any::Any;

/// A synthesis node's behaviour. Implementors allocate their own state (the
/// `create_state` step collapses into ordinary construction in Rust) and
/// respond to configuration changes before any `process` call that depends
/// on them (invariant 6).
pub trait Device: Send + Any {
    /// Fixed port registration for this device.
    fn port_spec(&self) -> &PortSpec;

    /// Downcasting hook so the engine can reach kind-specific methods (a
    /// generator's `trigger`/`release`) through the graph's `Box<dyn
    /// Device>` storage.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn set_audio_rate(&mut self, rate: f64);
    fn set_buffer_size(&mut self, size: usize);
    fn set_tempo(&mut self, tempo: f64);

    /// Silence internal state (voice/filter history, LFO phase, ...)
    /// without touching parameters.
    fn reset(&mut self);

    /// Notify the device that a shared configuration key changed. Returns
    /// whether the device recognised and applied the key.
    fn update_key(&mut self, _key: &str) -> bool {
        false
    }

    /// Render into `outputs` over the half-open window `[start, stop)`.
    /// `inputs` is indexed by registered input port; an absent (`None`)
    /// entry means the port has no incoming edge and must be treated as
    /// silence, not an error.
    fn process(
        &mut self,
        inputs: &[Option<&AudioBuffer>],
        outputs: &mut [AudioBuffer],
        start: usize,
        stop: usize,
        rate: f64,
        tempo: f64,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::SignalKind;

    struct Passthrough {
        spec: PortSpec,
    }

    impl Passthrough {
        fn new() -> Self {
            let mut spec = PortSpec::new();
            spec.register_input(0, SignalKind::Audio);
            spec.register_output(0, SignalKind::Audio);
            Passthrough { spec }
        }
    }

    impl Device for Passthrough {
        fn port_spec(&self) -> &PortSpec {
            &self.spec
        }
        fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
            self
        }
        fn set_audio_rate(&mut self, _rate: f64) {}
        fn set_buffer_size(&mut self, _size: usize) {}
        fn set_tempo(&mut self, _tempo: f64) {}
        fn reset(&mut self) {}

        fn process(
            &mut self,
            inputs: &[Option<&AudioBuffer>],
            outputs: &mut [AudioBuffer],
            start: usize,
            stop: usize,
            _rate: f64,
            _tempo: f64,
        ) {
            if let Some(Some(input)) = inputs.first() {
                for i in start..stop {
                    let (l, r) = input.get(i);
                    outputs[0].set(i, l, r);
                }
            }
        }
    }

    #[test]
    fn absent_input_is_treated_as_silence() {
        let mut dev = Passthrough::new();
        let mut out = vec![AudioBuffer::new(4)];
        dev.process(&[None], &mut out, 0, 4, 48000.0, 120.0);
        assert_eq!(out[0].get(0), (0.0, 0.0));
    }

    #[test]
    fn connected_input_passes_through() {
        let mut dev = Passthrough::new();
        let mut src = AudioBuffer::new(4);
        src.set(0, 1.0, 0.5);
        let mut out = vec![AudioBuffer::new(4)];
        dev.process(&[Some(&src)], &mut out, 0, 4, 48000.0, 120.0);
        assert_eq!(out[0].get(0), (1.0, 0.5));
    }
}
