//! Per-instance DSP state owned by the processor.
//!
//! Everything here is reset by `prepare`. [`TransientState`] is the subset
//! that a `StateCapture::Full` save writes out for bit-exact resume.

use audiobench_core::envelopes::{GateEnvelope, GateStage, Smoother};
use audiobench_core::filters::{SvfState, SvfTpt};

use crate::nodes::MorphOsc;
use crate::params::{default_snapshot, ParamId, Snapshot, PARAMS, PARAM_COUNT};

/// Most channels any voice processes natively (effect mode is stereo).
pub const NATIVE_MAX: usize = 2;

/// Time constant of the note-velocity smoother.
const VELOCITY_SMOOTHING_MS: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransientState {
    pub osc_phase: f32,
    pub filters: [SvfState; NATIVE_MAX],
    pub env_level: f32,
    pub env_stage: GateStage,
    pub velocity: f32,
    /// Pitch source of a releasing note.
    pub last_note: Option<u8>,
    pub smoothed: Snapshot,
}

#[derive(Debug, Clone)]
pub struct EngineState {
    pub(crate) sr: f32,
    pub(crate) smoothers: [Smoother; PARAM_COUNT],
    pub(crate) velocity: Smoother,
    pub(crate) osc: MorphOsc,
    pub(crate) filters: [SvfTpt; NATIVE_MAX],
    pub(crate) env: GateEnvelope,
    /// Note whose pitch the voice plays, held or still releasing.
    pub(crate) last_note: Option<u8>,
    /// Set by `prepare`; the next block starts its smoothers on target.
    pub(crate) fresh: bool,
}

fn smoothers_at(sr: f32, values: &Snapshot) -> [Smoother; PARAM_COUNT] {
    core::array::from_fn(|i| {
        let p = &PARAMS[i];
        Smoother::new(p.smoothing_ms, sr, p.snap_distance(), values[i])
    })
}

impl EngineState {
    pub fn new(sr: f32) -> Self {
        let sr = sr.max(1.0);
        let d = default_snapshot();
        Self {
            sr,
            smoothers: smoothers_at(sr, &d),
            velocity: Smoother::new(VELOCITY_SMOOTHING_MS, sr, 1.0e-6, 1.0),
            osc: MorphOsc::new(),
            filters: [SvfTpt::new(); NATIVE_MAX],
            env: GateEnvelope::new(
                d[ParamId::Attack.index()],
                d[ParamId::Release.index()],
                sr,
            ),
            last_note: None,
            fresh: true,
        }
    }

    /// Back to defaults at a (possibly new) sample rate, smoothers parked on
    /// `start`.
    pub fn reset(&mut self, sr: f32, start: &Snapshot) {
        self.sr = sr.max(1.0);
        self.smoothers = smoothers_at(self.sr, start);
        self.velocity = Smoother::new(VELOCITY_SMOOTHING_MS, self.sr, 1.0e-6, 1.0);
        self.env.set_sr(self.sr);
        self.reset_voice();
        self.fresh = true;
    }

    /// Clears oscillator, filter and envelope memory only.
    pub fn reset_voice(&mut self) {
        self.osc.reset();
        for f in &mut self.filters {
            f.reset();
        }
        self.env.reset();
        self.last_note = None;
    }

    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.sr
    }

    #[inline]
    pub fn smoothed(&self) -> Snapshot {
        core::array::from_fn(|i| self.smoothers[i].value())
    }

    #[inline]
    pub fn snap_to(&mut self, values: &Snapshot) {
        for (s, v) in self.smoothers.iter_mut().zip(values) {
            s.reset(*v);
        }
    }

    pub fn transient(&self) -> TransientState {
        TransientState {
            osc_phase: self.osc.phase(),
            filters: core::array::from_fn(|i| self.filters[i].state()),
            env_level: self.env.value(),
            env_stage: self.env.stage(),
            velocity: self.velocity.value(),
            last_note: self.last_note,
            smoothed: self.smoothed(),
        }
    }

    pub fn restore(&mut self, t: &TransientState) {
        self.osc.set_phase(t.osc_phase);
        for (f, s) in self.filters.iter_mut().zip(&t.filters) {
            if s.is_finite() {
                f.set_state(*s);
            } else {
                f.reset();
            }
        }
        self.env.restore(t.env_level, t.env_stage);
        self.velocity.reset(if t.velocity.is_finite() { t.velocity.clamp(0.0, 1.0) } else { 1.0 });
        self.last_note = t.last_note.filter(|n| *n <= 127);
        for (i, s) in self.smoothers.iter_mut().enumerate() {
            let p = &PARAMS[i];
            let v = t.smoothed[i];
            s.reset(if v.is_finite() { v.clamp(p.min, p.max) } else { p.default });
        }
        self.fresh = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiobench_core::filters::SvfCoeffs;

    #[test]
    fn reset_parks_smoothers_and_clears_voice() {
        let mut s = EngineState::new(48_000.0);
        s.osc.next(440.0, 1.0, 48_000.0);
        s.filters[0].process_lp(1.0, SvfCoeffs::new(1000.0, 0.707, 48_000.0));
        s.fresh = false;

        let mut start = default_snapshot();
        start[ParamId::Gain.index()] = 0.25;
        s.reset(44_100.0, &start);

        assert_eq!(s.sample_rate(), 44_100.0);
        assert_eq!(s.smoothed(), start);
        assert_eq!(s.osc.phase(), 0.0);
        assert_eq!(s.filters[0].state(), SvfState::default());
        assert!(s.fresh);
    }

    #[test]
    fn transient_restores_exactly() {
        let mut a = EngineState::new(48_000.0);
        for _ in 0..300 {
            let x = a.osc.next(330.0, 2.0, 48_000.0);
            a.filters[1].process_lp(x, SvfCoeffs::new(900.0, 3.0, 48_000.0));
            a.env.next(true);
        }
        a.last_note = Some(57);
        let t = a.transient();
        let mut b = EngineState::new(48_000.0);
        b.restore(&t);
        assert_eq!(b.transient(), t);
        assert!(!b.fresh);
    }
}
