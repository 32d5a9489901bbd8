//! Tuning tables (§4.I). A [`Scale`] maps `(note_index, octave)` pairs to
//! frequencies relative to a reference pitch, and converts between cents and
//! frequency for the event layer's `.s`/note-select events.
//!
//! No `Scale.c` survived in the retrieved reference material (only its usage
//! in `original_source/src/lib/test/song.c`: `Scale_set_ref_pitch`,
//! `KQT_SCALE_MIDDLE_OCTAVE`). The octave range and ref-pitch model below
//! follow that usage; the note-ratio table and preset tunings are standard
//! music theory, exposed as a small named-preset library (`list()` plus
//! named constructors).

use libm::Libm;

/// Octave 0 is the reference octave; valid octaves range symmetrically
/// around it (`original_source`'s `KQT_SCALE_MIDDLE_OCTAVE`-centred range).
pub const OCTAVE_MIN: i32 = -8;
pub const OCTAVE_MAX: i32 = 8;

/// A tuning table: a reference pitch plus an ascending list of ratios
/// (within one octave, first entry always `1.0`) applied to it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Scale {
    ref_pitch: f64,
    /// Ratios of each note to the reference pitch, `1.0 <= ratio < 2.0`,
    /// strictly ascending, always starting with `1.0`.
    ratios: Vec<f64>,
}

impl Scale {
    /// `ratios` must be non-empty, strictly ascending, and start at `1.0`;
    /// malformed input is clamped to a single-note scale at unison rather
    /// than panicking, since scale data arrives from loaded composition
    /// content (§7: no panics on malformed input).
    pub fn new(ref_pitch: f64, ratios: Vec<f64>) -> Self {
        let ratios = if ratios.first().copied() == Some(1.0)
            && ratios.windows(2).all(|w| w[0] < w[1])
        {
            ratios
        } else {
            vec![1.0]
        };
        Scale { ref_pitch, ratios }
    }

    pub fn ref_pitch(&self) -> f64 {
        self.ref_pitch
    }

    pub fn set_ref_pitch(&mut self, freq: f64) {
        self.ref_pitch = freq;
    }

    pub fn note_count(&self) -> usize {
        self.ratios.len()
    }

    /// Frequency of `note` (0-indexed within the octave) at `octave`
    /// relative to octave 0. `None` if `note`/`octave` is out of range.
    pub fn note_to_freq(&self, note: usize, octave: i32) -> Option<f64> {
        if note >= self.ratios.len() || octave < OCTAVE_MIN || octave > OCTAVE_MAX {
            return None;
        }
        let octave_factor = Libm::<f64>::pow(2.0, octave as f64);
        Some(self.ref_pitch * self.ratios[note] * octave_factor)
    }

    /// Continuous cents-to-frequency conversion (no quantisation to a scale
    /// note), the exact inverse of [`Scale::freq_to_cents`].
    pub fn cents_to_freq(&self, cents: f64) -> f64 {
        self.ref_pitch * Libm::<f64>::pow(2.0, cents / 1200.0)
    }

    pub fn freq_to_cents(&self, freq: f64) -> f64 {
        1200.0 * Libm::<f64>::log2(freq / self.ref_pitch)
    }

    /// Quantise `cents` to the nearest actual scale note, returning its
    /// `(note_index, octave)` pair.
    pub fn quantize(&self, cents: f64) -> (usize, i32) {
        let target_freq = self.cents_to_freq(cents);
        let mut best: Option<(usize, i32, f64)> = None;
        for octave in OCTAVE_MIN..=OCTAVE_MAX {
            for (note, _) in self.ratios.iter().enumerate() {
                let freq = self.note_to_freq(note, octave).unwrap();
                let diff = (freq - target_freq).abs();
                if best.as_ref().map_or(true, |&(_, _, best_diff)| diff < best_diff) {
                    best = Some((note, octave, diff));
                }
            }
        }
        best.map(|(n, o, _)| (n, o)).unwrap_or((0, 0))
    }
}

impl Default for Scale {
    /// 12-tone equal temperament at A440, the engine's default tuning.
    fn default() -> Self {
        ScalePresets::equal_temperament(12, 440.0)
    }
}

/// Named scale-info entry for [`ScalePresets::list`].
#[derive(Debug, Clone)]
pub struct ScaleInfo {
    pub name: &'static str,
    pub description: &'static str,
}

/// Built-in tuning presets.
pub struct ScalePresets;

impl ScalePresets {
    pub fn list() -> Vec<ScaleInfo> {
        vec![
            ScaleInfo {
                name: "12-tet",
                description: "12-tone equal temperament",
            },
            ScaleInfo {
                name: "just",
                description: "5-limit just intonation major scale",
            },
            ScaleInfo {
                name: "pythagorean",
                description: "Pythagorean tuning (stacked perfect fifths)",
            },
        ]
    }

    /// Equal temperament with `divisions` steps per octave.
    pub fn equal_temperament(divisions: u32, ref_pitch: f64) -> Scale {
        let divisions = divisions.max(1);
        let ratios = (0..divisions)
            .map(|i| Libm::<f64>::pow(2.0, i as f64 / divisions as f64))
            .collect();
        Scale::new(ref_pitch, ratios)
    }

    /// 5-limit just intonation major scale (1, 9/8, 5/4, 4/3, 3/2, 5/3, 15/8).
    pub fn just_intonation(ref_pitch: f64) -> Scale {
        Scale::new(
            ref_pitch,
            vec![1.0, 9.0 / 8.0, 5.0 / 4.0, 4.0 / 3.0, 3.0 / 2.0, 5.0 / 3.0, 15.0 / 8.0],
        )
    }

    /// Pythagorean tuning, seven notes built from stacked 3/2 ratios folded
    /// into one octave.
    pub fn pythagorean(ref_pitch: f64) -> Scale {
        let mut ratios: Vec<f64> = (0..7)
            .map(|i| {
                let mut r = Libm::<f64>::pow(3.0 / 2.0, i as f64);
                while r >= 2.0 {
                    r /= 2.0;
                }
                r
            })
            .collect();
        ratios.sort_by(|a, b| a.partial_cmp(b).unwrap());
        Scale::new(ref_pitch, ratios)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cents_freq_round_trip() {
        let scale = Scale::default();
        for cents in [-2400.0, -123.0, 0.0, 700.0, 1900.0_f64] {
            let freq = scale.cents_to_freq(cents);
            let back = scale.freq_to_cents(freq);
            assert!((back - cents).abs() < 1e-6, "{} != {}", back, cents);
        }
    }

    #[test]
    fn equal_temperament_octave_doubles_frequency() {
        let scale = ScalePresets::equal_temperament(12, 440.0);
        let low = scale.note_to_freq(0, 0).unwrap();
        let high = scale.note_to_freq(0, 1).unwrap();
        assert!((high - 2.0 * low).abs() < 1e-9);
    }

    #[test]
    fn equal_temperament_a440_matches_reference() {
        let scale = ScalePresets::equal_temperament(12, 440.0);
        assert!((scale.note_to_freq(0, 0).unwrap() - 440.0).abs() < 1e-9);
    }

    #[test]
    fn quantize_snaps_to_nearest_note() {
        let scale = ScalePresets::equal_temperament(12, 440.0);
        let freq = scale.note_to_freq(3, 0).unwrap();
        let cents = scale.freq_to_cents(freq);
        let (note, octave) = scale.quantize(cents);
        assert_eq!((note, octave), (3, 0));
    }

    #[test]
    fn out_of_range_octave_is_rejected() {
        let scale = Scale::default();
        assert!(scale.note_to_freq(0, OCTAVE_MAX + 1).is_none());
    }

    #[test]
    fn malformed_ratios_fall_back_to_unison() {
        let scale = Scale::new(440.0, vec![1.0, 0.5]);
        assert_eq!(scale.note_count(), 1);
    }

    #[test]
    fn preset_list_is_nonempty() {
        assert!(!ScalePresets::list().is_empty());
    }
}
