//! Effect DSP devices: the `dsp_XX` graph nodes (§4.E).
//!
//! Grounded on `original_source/src/lib/dsps/DSP_chorus.c` (per-voice
//! delay-line chorus, driven by a per-voice [`Lfo`]) and `DSP_freeverb.h`
//! (the public-domain Freeverb topology the header documents: eight parallel
//! comb filters and four series all-pass filters per channel). `filter.rs`
//! and `Gain`/`Panning` are grounded on `Filter.c` and the common
//! `Generator_common_handle_panning`/gain-compensation helpers the
//! generators share, generalized here into their own standalone DSP nodes
//! since Connections can route an effect's signal through them independently
//! of any one generator.

use crate::buffer::AudioBuffer;
use crate::device::Device;
use crate::filter::Butterworth;
use crate::lfo::{Lfo, LfoMode};
use crate::port::{PortSpec, SignalKind};

fn stereo_spec() -> PortSpec {
    let mut spec = PortSpec::new();
    spec.register_input(0, SignalKind::Audio);
    spec.register_output(0, SignalKind::Audio);
    spec
}

/// A Butterworth low-pass applied independently to each stereo channel.
pub struct FilterDsp {
    spec: PortSpec,
    left: Butterworth,
    right: Butterworth,
    order: usize,
    normalized_cutoff: f64,
}

impl FilterDsp {
    pub fn new(order: usize, normalized_cutoff: f64) -> Self {
        FilterDsp {
            spec: stereo_spec(),
            left: Butterworth::design(order, normalized_cutoff),
            right: Butterworth::design(order, normalized_cutoff),
            order,
            normalized_cutoff,
        }
    }

    pub fn set_cutoff(&mut self, normalized_cutoff: f64) {
        self.normalized_cutoff = normalized_cutoff;
        self.left = Butterworth::design(self.order, normalized_cutoff);
        self.right = Butterworth::design(self.order, normalized_cutoff);
    }
}

impl Device for FilterDsp {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
    fn set_audio_rate(&mut self, _rate: f64) {}
    fn set_buffer_size(&mut self, _size: usize) {}
    fn set_tempo(&mut self, _tempo: f64) {}

    fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }

    fn process(
        &mut self,
        inputs: &[Option<&AudioBuffer>],
        outputs: &mut [AudioBuffer],
        start: usize,
        stop: usize,
        _rate: f64,
        _tempo: f64,
    ) {
        let Some(Some(input)) = inputs.first() else {
            return;
        };
        for i in start..stop {
            let (l, r) = input.get(i);
            outputs[0].add(i, self.left.process_sample(l), self.right.process_sample(r));
        }
    }
}

/// Linear-gain compensation, applied equally to both channels.
pub struct GainDsp {
    spec: PortSpec,
    gain: f64,
}

impl GainDsp {
    pub fn new(gain: f64) -> Self {
        GainDsp {
            spec: stereo_spec(),
            gain,
        }
    }

    pub fn set_gain(&mut self, gain: f64) {
        self.gain = gain;
    }
}

impl Device for GainDsp {
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
        let Some(Some(input)) = inputs.first() else {
            return;
        };
        for i in start..stop {
            let (l, r) = input.get(i);
            outputs[0].add(i, l * self.gain, r * self.gain);
        }
    }
}

/// Constant-power stereo panning.
pub struct PanningDsp {
    spec: PortSpec,
    pan: f64,
}

impl PanningDsp {
    pub fn new(pan: f64) -> Self {
        PanningDsp {
            spec: stereo_spec(),
            pan,
        }
    }

    pub fn set_pan(&mut self, pan: f64) {
        self.pan = pan.clamp(-1.0, 1.0);
    }
}

impl Device for PanningDsp {
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
        let Some(Some(input)) = inputs.first() else {
            return;
        };
        let angle = (self.pan + 1.0) * std::f64::consts::PI / 4.0;
        let (lg, rg) = (angle.cos(), angle.sin());
        for i in start..stop {
            let (l, r) = input.get(i);
            outputs[0].add(i, l * lg, r * rg);
        }
    }
}

const CHORUS_VOICES_MAX: usize = 32;
const CHORUS_BUF_TIME: f64 = 0.25;

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct ChorusVoiceParams {
    pub delay: f64,
    pub range: f64,
    pub speed: f64,
    pub volume: f64,
}

impl Default for ChorusVoiceParams {
    fn default() -> Self {
        ChorusVoiceParams {
            delay: -1.0,
            range: 0.0,
            speed: 0.0,
            volume: 1.0,
        }
    }
}

struct ChorusVoice {
    params: ChorusVoiceParams,
    lfo: Lfo,
    buf_pos: f64,
}

/// Up to [`CHORUS_VOICES_MAX`] delay-line voices summed back onto the dry
/// signal, each voice's delay length wobbled by its own LFO. Ported in idiom
/// from `DSP_chorus.c`'s `Chorus_voice`/`DSP_chorus_process`.
pub struct ChorusDsp {
    spec: PortSpec,
    buf: Vec<(f64, f64)>,
    buf_pos: usize,
    voices: Vec<ChorusVoice>,
}

impl ChorusDsp {
    pub fn new(audio_rate: f64, voice_params: &[ChorusVoiceParams]) -> Self {
        let buf_len = (CHORUS_BUF_TIME * audio_rate) as usize + 1;
        let mut voices = Vec::with_capacity(CHORUS_VOICES_MAX);
        for i in 0..CHORUS_VOICES_MAX {
            let mut params = voice_params.get(i).copied().unwrap_or_default();
            if params.delay < 0.0 || params.delay >= CHORUS_BUF_TIME / 2.0 {
                params.delay = -1.0;
            } else if params.range >= params.delay {
                params.range = 0.999 * params.delay;
            }
            let mut lfo = Lfo::new(LfoMode::Linear);
            lfo.set_depth(params.range.max(0.0));
            lfo.set_speed(params.speed);
            let buf_pos = if params.delay >= 0.0 {
                let ideal = params.delay * audio_rate;
                (buf_len as f64 - ideal).rem_euclid(buf_len as f64)
            } else {
                0.0
            };
            voices.push(ChorusVoice { params, lfo, buf_pos });
        }
        ChorusDsp {
            spec: stereo_spec(),
            buf: vec![(0.0, 0.0); buf_len],
            buf_pos: 0,
            voices,
        }
    }
}

impl Device for ChorusDsp {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }

    fn set_audio_rate(&mut self, rate: f64) {
        let buf_len = (CHORUS_BUF_TIME * rate) as usize + 1;
        self.buf = vec![(0.0, 0.0); buf_len];
        self.buf_pos = 0;
        for voice in &mut self.voices {
            if voice.params.delay < 0.0 {
                continue;
            }
            let ideal = voice.params.delay * rate;
            voice.buf_pos = (buf_len as f64 - ideal).rem_euclid(buf_len as f64);
        }
    }
    fn set_buffer_size(&mut self, _size: usize) {}

    fn set_tempo(&mut self, _tempo: f64) {}

    fn reset(&mut self) {
        self.buf.iter_mut().for_each(|s| *s = (0.0, 0.0));
        self.buf_pos = 0;
        for voice in &mut self.voices {
            voice.lfo.reset();
        }
    }

    fn process(
        &mut self,
        inputs: &[Option<&AudioBuffer>],
        outputs: &mut [AudioBuffer],
        start: usize,
        stop: usize,
        rate: f64,
        _tempo: f64,
    ) {
        let Some(Some(input)) = inputs.first() else {
            return;
        };
        let buf_size = self.buf.len();
        for i in start..stop {
            let (l, r) = input.get(i);
            self.buf[self.buf_pos] = (l, r);

            let mut val_l = 0.0;
            let mut val_r = 0.0;
            for voice in &mut self.voices {
                if voice.params.delay < 0.0 {
                    continue;
                }
                let offset = voice.lfo.step(rate);
                let ideal_pos = voice.buf_pos + rate * offset;
                let mut pos = ideal_pos.floor() as i64;
                let remainder = ideal_pos - pos as f64;
                if pos >= buf_size as i64 {
                    pos -= buf_size as i64;
                } else if pos < 0 {
                    pos += buf_size as i64;
                }
                let pos = pos.clamp(0, buf_size as i64 - 1) as usize;
                let next_pos = if pos + 1 >= buf_size { 0 } else { pos + 1 };

                let (l0, r0) = self.buf[pos];
                let (l1, r1) = self.buf[next_pos];
                val_l += (1.0 - remainder) * voice.params.volume * l0 + remainder * voice.params.volume * l1;
                val_r += (1.0 - remainder) * voice.params.volume * r0 + remainder * voice.params.volume * r1;

                voice.buf_pos += 1.0;
                if voice.buf_pos >= buf_size as f64 {
                    voice.buf_pos = 0.0;
                }
            }

            outputs[0].add(i, val_l, val_r);
            self.buf_pos += 1;
            if self.buf_pos >= buf_size {
                self.buf_pos = 0;
            }
        }
    }
}

const FREEVERB_COMB_TUNING: [f64; 8] = [1116.0, 1188.0, 1277.0, 1356.0, 1422.0, 1491.0, 1557.0, 1617.0];
const FREEVERB_ALLPASS_TUNING: [f64; 4] = [556.0, 441.0, 341.0, 225.0];
const FREEVERB_STEREO_SPREAD: f64 = 23.0;
const FREEVERB_FIXED_GAIN: f64 = 0.015;

struct Comb {
    buf: Vec<f64>,
    pos: usize,
    feedback: f64,
    damp: f64,
    filter_store: f64,
}

impl Comb {
    fn new(len: usize) -> Self {
        Comb {
            buf: vec![0.0; len.max(1)],
            pos: 0,
            feedback: 0.5,
            damp: 0.5,
            filter_store: 0.0,
        }
    }

    fn process(&mut self, input: f64) -> f64 {
        let output = self.buf[self.pos];
        self.filter_store = output * (1.0 - self.damp) + self.filter_store * self.damp;
        self.buf[self.pos] = input + self.filter_store * self.feedback;
        self.pos = (self.pos + 1) % self.buf.len();
        output
    }

    fn clear(&mut self) {
        self.buf.iter_mut().for_each(|s| *s = 0.0);
        self.filter_store = 0.0;
    }
}

struct Allpass {
    buf: Vec<f64>,
    pos: usize,
    feedback: f64,
}

impl Allpass {
    fn new(len: usize) -> Self {
        Allpass {
            buf: vec![0.0; len.max(1)],
            pos: 0,
            feedback: 0.5,
        }
    }

    fn process(&mut self, input: f64) -> f64 {
        let bufout = self.buf[self.pos];
        let output = -input + bufout;
        self.buf[self.pos] = input + bufout * self.feedback;
        self.pos = (self.pos + 1) % self.buf.len();
        output
    }

    fn clear(&mut self) {
        self.buf.iter_mut().for_each(|s| *s = 0.0);
    }
}

/// Schroeder/Moorer reverb: eight parallel combs followed by four series
/// all-passes per channel, as documented (without a surviving source file)
/// by `original_source/src/lib/dsps/DSP_freeverb.h`, rewritten here to scale
/// its classic 44100 Hz tuning lengths to an arbitrary audio rate.
pub struct FreeverbDsp {
    spec: PortSpec,
    combs_l: Vec<Comb>,
    combs_r: Vec<Comb>,
    allpasses_l: Vec<Allpass>,
    allpasses_r: Vec<Allpass>,
    wet: f64,
    dry: f64,
    room_size: f64,
    damp: f64,
}

impl FreeverbDsp {
    pub fn new(audio_rate: f64, room_size: f64, damp: f64, wet: f64, dry: f64) -> Self {
        let scale = audio_rate / 44_100.0;
        let combs_l = FREEVERB_COMB_TUNING
            .iter()
            .map(|&t| Comb::new((t * scale) as usize))
            .collect();
        let combs_r = FREEVERB_COMB_TUNING
            .iter()
            .map(|&t| Comb::new((t * scale + FREEVERB_STEREO_SPREAD * scale) as usize))
            .collect();
        let allpasses_l = FREEVERB_ALLPASS_TUNING
            .iter()
            .map(|&t| Allpass::new((t * scale) as usize))
            .collect();
        let allpasses_r = FREEVERB_ALLPASS_TUNING
            .iter()
            .map(|&t| Allpass::new((t * scale + FREEVERB_STEREO_SPREAD * scale) as usize))
            .collect();
        let mut dsp = FreeverbDsp {
            spec: stereo_spec(),
            combs_l,
            combs_r,
            allpasses_l,
            allpasses_r,
            wet,
            dry,
            room_size,
            damp,
        };
        dsp.apply_params();
        dsp
    }

    fn apply_params(&mut self) {
        let feedback = 0.28 + self.room_size * 0.7;
        for comb in self.combs_l.iter_mut().chain(self.combs_r.iter_mut()) {
            comb.feedback = feedback;
            comb.damp = self.damp;
        }
    }

    pub fn set_room_size(&mut self, room_size: f64) {
        self.room_size = room_size;
        self.apply_params();
    }

    pub fn set_damp(&mut self, damp: f64) {
        self.damp = damp;
        self.apply_params();
    }

    fn process_channel(combs: &mut [Comb], allpasses: &mut [Allpass], input: f64) -> f64 {
        let input = input * FREEVERB_FIXED_GAIN;
        let mut out = 0.0;
        for comb in combs.iter_mut() {
            out += comb.process(input);
        }
        for allpass in allpasses.iter_mut() {
            out = allpass.process(out);
        }
        out
    }
}

impl Device for FreeverbDsp {
    fn port_spec(&self) -> &PortSpec {
        &self.spec
    }
    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
    fn set_audio_rate(&mut self, _rate: f64) {}
    fn set_buffer_size(&mut self, _size: usize) {}
    fn set_tempo(&mut self, _tempo: f64) {}

    fn reset(&mut self) {
        for comb in self.combs_l.iter_mut().chain(self.combs_r.iter_mut()) {
            comb.clear();
        }
        for allpass in self.allpasses_l.iter_mut().chain(self.allpasses_r.iter_mut()) {
            allpass.clear();
        }
    }

    fn process(
        &mut self,
        inputs: &[Option<&AudioBuffer>],
        outputs: &mut [AudioBuffer],
        start: usize,
        stop: usize,
        _rate: f64,
        _tempo: f64,
    ) {
        let Some(Some(input)) = inputs.first() else {
            return;
        };
        for i in start..stop {
            let (l, r) = input.get(i);
            let mono = (l + r) * 0.5;
            let wet_l = Self::process_channel(&mut self.combs_l, &mut self.allpasses_l, mono);
            let wet_r = Self::process_channel(&mut self.combs_r, &mut self.allpasses_r, mono);
            outputs[0].add(i, wet_l * self.wet + l * self.dry, wet_r * self.wet + r * self.dry);
        }
    }
}

/// A `dsp_YY/p_dsp.json` definition: DSP type plus its construction
/// parameters, as passive composition data (§6). `Composition`/`Engine`
/// build the live `Box<dyn Device>` from this when the graph is (re)built,
/// the way `Instrument_parse_value` reads a generator/DSP's header fields
/// before handing them to the concrete constructor.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum DspKind {
    Filter { order: usize, normalized_cutoff: f64 },
    Gain { gain: f64 },
    Panning { pan: f64 },
    Chorus { voices: Vec<ChorusVoiceParams> },
    Freeverb { room_size: f64, damp: f64, wet: f64, dry: f64 },
}

impl DspKind {
    pub fn build(&self, audio_rate: f64) -> Box<dyn Device> {
        match self {
            DspKind::Filter { order, normalized_cutoff } => Box::new(FilterDsp::new(*order, *normalized_cutoff)),
            DspKind::Gain { gain } => Box::new(GainDsp::new(*gain)),
            DspKind::Panning { pan } => Box::new(PanningDsp::new(*pan)),
            DspKind::Chorus { voices } => Box::new(ChorusDsp::new(audio_rate, voices)),
            DspKind::Freeverb { room_size, damp, wet, dry } => {
                Box::new(FreeverbDsp::new(audio_rate, *room_size, *damp, *wet, *dry))
            }
        }
    }
}
