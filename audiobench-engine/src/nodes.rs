//! Oscillator node for the synth voice.
//!
//! `MorphOsc` blends three shapes with one continuous `shape` control:
//! `0.0` sine, `1.0` triangle, `2.0` saw. The saw edge is PolyBLEP-corrected;
//! sine and triangle are continuous and used as-is.
//!
//! Frequency is Hz; each call receives the current sample rate.

use audiobench_core::dsp::{abs, clamp, fast_sin, lerp, wrap_phase01, TAU};

/// Two-sample polynomial band-limited step residual.
#[inline]
fn poly_blep(t: f32, dt: f32) -> f32 {
    if dt <= 0.0 {
        0.0
    } else if t < dt {
        let x = t / dt;
        x + x - x * x - 1.0
    } else if t > 1.0 - dt {
        let x = (t - 1.0) / dt;
        x * x + x + x + 1.0
    } else {
        0.0
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct MorphOsc {
    phase: f32, // [0,1)
}

impl MorphOsc {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn reset(&mut self) {
        self.phase = 0.0;
    }

    #[inline]
    pub fn phase(&self) -> f32 {
        self.phase
    }

    /// Hard-set phase; wrapped into [0,1), non-finite resets to 0.
    #[inline]
    pub fn set_phase(&mut self, p: f32) {
        self.phase = if p.is_finite() { wrap_phase01(p) } else { 0.0 };
    }

    /// Advance one sample. Output is within [-1, 1] for every `shape`.
    #[inline]
    pub fn next(&mut self, freq_hz: f32, shape: f32, sr: f32) -> f32 {
        let dt = clamp(freq_hz / sr, 0.0, 0.5);
        let t = self.phase;

        let shape = clamp(shape, 0.0, 2.0);
        let y = if shape <= 1.0 {
            let sine = fast_sin(TAU * t);
            let tri = 1.0 - 4.0 * abs(t - 0.5);
            lerp(sine, tri, shape)
        } else {
            let tri = 1.0 - 4.0 * abs(t - 0.5);
            let saw = 2.0 * t - 1.0 - poly_blep(t, dt);
            lerp(tri, saw, shape - 1.0)
        };

        self.phase = wrap_phase01(t + dt);
        y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zero_crossings(xs: &[f32]) -> usize {
        xs.windows(2).filter(|w| (w[0] < 0.0) != (w[1] < 0.0)).count()
    }

    #[test]
    fn every_shape_is_bounded() {
        for shape in [0.0, 0.5, 1.0, 1.5, 2.0] {
            let mut o = MorphOsc::new();
            for _ in 0..48_000 {
                let y = o.next(1234.5, shape, 48_000.0);
                assert!((-1.0 - 1e-4..=1.0 + 1e-4).contains(&y), "shape={shape} y={y}");
            }
        }
    }

    #[test]
    fn period_matches_frequency() {
        let mut o = MorphOsc::new();
        let out: Vec<f32> = (0..48_000).map(|_| o.next(100.0, 0.0, 48_000.0)).collect();
        let zc = zero_crossings(&out);
        assert!((198..=202).contains(&zc), "zc={zc}");
    }

    #[test]
    fn triangle_has_no_dc() {
        let mut o = MorphOsc::new();
        let n = 48_000;
        let mean: f32 = (0..n).map(|_| o.next(240.0, 1.0, 48_000.0)).sum::<f32>() / n as f32;
        assert!(mean.abs() < 1e-3, "mean={mean}");
    }

    #[test]
    fn phase_restore_reproduces_output() {
        let mut a = MorphOsc::new();
        for _ in 0..777 {
            a.next(330.0, 2.0, 44_100.0);
        }
        let mut b = MorphOsc::new();
        b.set_phase(a.phase());
        for _ in 0..100 {
            assert_eq!(a.next(330.0, 2.0, 44_100.0), b.next(330.0, 2.0, 44_100.0));
        }
    }

    #[test]
    fn nyquist_frequency_does_not_blow_up() {
        let mut o = MorphOsc::new();
        for _ in 0..1000 {
            assert!(o.next(40_000.0, 2.0, 48_000.0).is_finite());
        }
    }
}
