//! Parameter smoothing and the gated amplitude envelope.
//!
//! - `Smoother`     : one-pole slew toward a target with a terminal snap
//! - `GateEnvelope` : exponential attack/release driven by a gate
//!
//! Both are `Copy`, allocation free and tick once per sample.

use crate::dsp::{abs, one_pole_coeff_ms};

// ---------------------------------- Smoother -------------------------------------

/// One-pole smoother: `y += (target - y) * (1 - a)`, `a = exp(-1/(tau*sr))`.
///
/// Once the remaining distance falls under `snap` (or an `f32` step stops
/// making progress) the output lands exactly on the target, so a settled
/// smoother reports the value the host wrote.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Smoother {
    step: f32,
    snap: f32,
    y: f32,
}

impl Smoother {
    /// `snap` is an absolute distance; pass something like `1e-6 * span`.
    #[inline]
    pub fn new(t_ms: f32, sr: f32, snap: f32, y0: f32) -> Self {
        let mut s = Self { step: 1.0, snap: snap.max(0.0), y: y0 };
        s.set_time_ms(t_ms, sr);
        s
    }

    #[inline]
    pub fn set_time_ms(&mut self, t_ms: f32, sr: f32) {
        self.step = 1.0 - one_pole_coeff_ms(t_ms, sr);
    }

    /// Per-sample fraction of the remaining distance covered.
    #[inline]
    pub fn step(&self) -> f32 {
        self.step
    }

    #[inline]
    pub fn reset(&mut self, y0: f32) {
        self.y = y0;
    }

    #[inline]
    pub fn is_settled(&self, target: f32) -> bool {
        self.y == target
    }

    #[inline]
    pub fn next(&mut self, target: f32) -> f32 {
        let y = self.y + (target - self.y) * self.step;
        self.y = if y == self.y || abs(target - y) <= self.snap { target } else { y };
        self.y
    }

    /// Fill `out` with successive values toward `target`.
    #[inline]
    pub fn fill(&mut self, target: f32, out: &mut [f32]) {
        if self.is_settled(target) {
            out.fill(target);
            return;
        }
        for v in out.iter_mut() {
            *v = self.next(target);
        }
    }

    #[inline]
    pub fn value(&self) -> f32 {
        self.y
    }
}

// -------------------------------- Gate envelope ----------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum GateStage {
    #[default]
    Idle = 0,
    Attack = 1,
    Hold = 2,
    Release = 3,
}

impl GateStage {
    #[inline]
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Attack,
            2 => Self::Hold,
            3 => Self::Release,
            _ => Self::Idle,
        }
    }
}

/// Exponential attack/release envelope. The gate is level-sensitive: while
/// it is high the envelope rises to 1 and holds, when it drops the envelope
/// decays to 0.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GateEnvelope {
    atk_ms: f32,
    rel_ms: f32,
    sr: f32,
    k_atk: f32,
    k_rel: f32,
    env: f32,
    stage: GateStage,
}

impl GateEnvelope {
    #[inline]
    pub fn new(atk_ms: f32, rel_ms: f32, sr: f32) -> Self {
        let mut e = Self {
            atk_ms: 0.0,
            rel_ms: 0.0,
            sr: sr.max(1.0),
            k_atk: 1.0,
            k_rel: 1.0,
            env: 0.0,
            stage: GateStage::Idle,
        };
        e.set_times(atk_ms, rel_ms);
        e
    }

    #[inline]
    pub fn set_sr(&mut self, sr: f32) {
        self.sr = sr.max(1.0);
        self.recalc();
    }

    /// No-op when the times are unchanged, so it can be called every block.
    #[inline]
    pub fn set_times(&mut self, atk_ms: f32, rel_ms: f32) {
        let (a, r) = (atk_ms.max(0.0), rel_ms.max(0.0));
        if a != self.atk_ms || r != self.rel_ms {
            self.atk_ms = a;
            self.rel_ms = r;
            self.recalc();
        }
    }

    #[inline]
    fn recalc(&mut self) {
        self.k_atk = 1.0 - one_pole_coeff_ms(self.atk_ms, self.sr);
        self.k_rel = 1.0 - one_pole_coeff_ms(self.rel_ms, self.sr);
    }

    #[inline]
    pub fn reset(&mut self) {
        self.env = 0.0;
        self.stage = GateStage::Idle;
    }

    #[inline]
    pub fn next(&mut self, gate: bool) -> f32 {
        match (gate, self.stage) {
            (true, GateStage::Idle | GateStage::Release) => self.stage = GateStage::Attack,
            (false, GateStage::Attack | GateStage::Hold) => self.stage = GateStage::Release,
            _ => {}
        }
        match self.stage {
            GateStage::Idle => self.env = 0.0,
            GateStage::Attack => {
                self.env += (1.0 - self.env) * self.k_atk;
                if self.env >= 0.9999 {
                    self.env = 1.0;
                    self.stage = GateStage::Hold;
                }
            }
            GateStage::Hold => self.env = 1.0,
            GateStage::Release => {
                self.env -= self.env * self.k_rel;
                if self.env <= 1e-5 {
                    self.env = 0.0;
                    self.stage = GateStage::Idle;
                }
            }
        }
        self.env
    }

    #[inline]
    pub fn value(&self) -> f32 {
        self.env
    }

    #[inline]
    pub fn stage(&self) -> GateStage {
        self.stage
    }

    /// Restore level and stage from saved data. Times are left alone.
    #[inline]
    pub fn restore(&mut self, env: f32, stage: GateStage) {
        self.env = if env.is_finite() { env.clamp(0.0, 1.0) } else { 0.0 };
        self.stage = stage;
    }
}

// ------------------------------------ Tests --------------------------------------
