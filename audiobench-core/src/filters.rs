//! Topology-preserving state-variable filter.
//!
//! The block engine computes `g = tan(π fc / sr)` and `R = 1 / (2Q)` once per
//! sample into coefficient lanes, so the filter here takes precomputed
//! coefficients per call instead of owning cutoff/Q. [`SvfCoeffs`] exists for
//! callers that want the classic "set cutoff, set Q" style.
//!
//! The integrator state is exposed through [`SvfState`] so an instance can be
//! restored bit-exactly from saved data.

use crate::dsp::{kill_denormals, tpt_g};

/// `(g, r)` pair for [`SvfTpt`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SvfCoeffs {
    pub g: f32,
    pub r: f32,
}

impl SvfCoeffs {
    #[inline]
    pub fn new(cut_hz: f32, q: f32, sr: f32) -> Self {
        Self { g: tpt_g(cut_hz, sr.max(1.0)), r: damping(q) }
    }
}

/// `R = 1 / (2Q)` with Q floored to keep it finite.
#[inline]
pub fn damping(q: f32) -> f32 {
    1.0 / (2.0 * q.max(1.0e-4))
}

/// SVF output taps for one sample.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SvfTaps {
    pub lp: f32,
    pub bp: f32,
    pub hp: f32,
}

/// Integrator memory of an [`SvfTpt`].
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SvfState {
    pub ic1eq: f32,
    pub ic2eq: f32,
}

impl SvfState {
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.ic1eq.is_finite() && self.ic2eq.is_finite()
    }
}

/// State-variable filter via the topology-preserving transform
/// (Zavalishin). Stable under per-sample coefficient modulation.
#[derive(Copy, Clone, Debug, Default)]
pub struct SvfTpt {
    s: SvfState,
}

impl SvfTpt {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn reset(&mut self) {
        self.s = SvfState::default();
    }

    #[inline]
    pub fn state(&self) -> SvfState {
        self.s
    }

    #[inline]
    pub fn set_state(&mut self, s: SvfState) {
        self.s = s;
    }

    #[inline]
    pub fn process_taps(&mut self, x: f32, c: SvfCoeffs) -> SvfTaps {
        // Trapezoidal integrators solved for the zero-delay feedback loop.
        let SvfCoeffs { g, r } = c;
        let h = 1.0 / (1.0 + 2.0 * r * g + g * g);
        let hp = (x - (2.0 * r + g) * self.s.ic1eq - self.s.ic2eq) * h;
        let bp = g * hp + self.s.ic1eq;
        let lp = g * bp + self.s.ic2eq;

        self.s.ic1eq = kill_denormals(g * hp + bp);
        self.s.ic2eq = kill_denormals(g * bp + lp);

        SvfTaps { lp, bp, hp }
    }

    #[inline]
    pub fn process_lp(&mut self, x: f32, c: SvfCoeffs) -> f32 {
        self.process_taps(x, c).lp
    }
}

// ------------------------------------ Tests --------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowpass_passes_dc() {
        let c = SvfCoeffs::new(1000.0, 0.707, 48_000.0);
        let mut f = SvfTpt::new();
        let mut y = 0.0;
        for _ in 0..48_000 {
            y = f.process_lp(1.0, c);
        }
        assert!((y - 1.0).abs() < 1e-3, "y={y}");
    }

    #[test]
    fn lowpass_attenuates_near_nyquist() {
        let c = SvfCoeffs::new(200.0, 0.707, 48_000.0);
        let mut f = SvfTpt::new();
        let mut peak = 0.0_f32;
        for n in 0..48_000 {
            let x = if n % 2 == 0 { 1.0 } else { -1.0 };
            let y = f.process_lp(x, c);
            if n > 1000 {
                peak = peak.max(y.abs());
            }
        }
        assert!(peak < 1e-3, "peak={peak}");
    }

    #[test]
    fn highpass_blocks_dc() {
        let c = SvfCoeffs::new(100.0, 0.707, 48_000.0);
        let mut f = SvfTpt::new();
        let mut hp = 1.0;
        for _ in 0..48_000 {
            hp = f.process_taps(1.0, c).hp;
        }
        assert!(hp.abs() < 1e-3, "hp={hp}");
    }

    #[test]
    fn state_round_trips() {
        let c = SvfCoeffs::new(800.0, 4.0, 44_100.0);
        let mut a = SvfTpt::new();
        for n in 0..500 {
            a.process_lp((n as f32 * 0.01).sin(), c);
        }
        let mut b = SvfTpt::new();
        b.set_state(a.state());
        for n in 0..500 {
            let x = (n as f32 * 0.03).cos();
            assert_eq!(a.process_lp(x, c).to_bits(), b.process_lp(x, c).to_bits());
        }
    }

    #[test]
    fn high_resonance_stays_bounded_under_modulation() {
        let mut f = SvfTpt::new();
        for n in 0..96_000 {
            let fc = 100.0 + 10_000.0 * (0.5 + 0.5 * (n as f32 * 0.001).sin());
            let c = SvfCoeffs::new(fc, 10.0, 48_000.0);
            let y = f.process_lp(if n % 200 < 100 { 1.0 } else { -1.0 }, c);
            assert!(y.is_finite() && y.abs() < 50.0, "n={n} y={y}");
        }
    }
}
