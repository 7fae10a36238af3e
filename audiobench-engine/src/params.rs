//! Parameter table and the lock-free store shared between the control
//! thread and the audio thread.
//!
//! Every parameter has two `AtomicU32` slots holding `f32` bits:
//! - `target`    : written by the host (`set`), read once per block
//! - `published` : the smoothed value at the end of the last block (`get`)
//!
//! A held note lives in one `AtomicU64` so note number, gate and velocity
//! always change together.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use audiobench_core::dsp::clamp;

use crate::error::{EngineError, EngineResult};

pub const PARAM_COUNT: usize = 11;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamId {
    Gain = 0,
    Frequency = 1,
    Shape = 2,
    Cutoff = 3,
    Resonance = 4,
    Drive = 5,
    Mix = 6,
    Attack = 7,
    Release = 8,
    Drone = 9,
    Mode = 10,
}

impl ParamId {
    pub const ALL: [ParamId; PARAM_COUNT] = [
        Self::Gain,
        Self::Frequency,
        Self::Shape,
        Self::Cutoff,
        Self::Resonance,
        Self::Drive,
        Self::Mix,
        Self::Attack,
        Self::Release,
        Self::Drone,
        Self::Mode,
    ];

    #[inline]
    pub fn from_raw(id: u32) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self as u32
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn spec(self) -> &'static ParamSpec {
        &PARAMS[self.index()]
    }
}

/// Static description of one parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub id: ParamId,
    pub name: &'static str,
    pub min: f32,
    pub max: f32,
    pub default: f32,
    /// One-pole time constant; `0.0` means the value jumps at block start.
    pub smoothing_ms: f32,
    /// Stepped values are rounded to integers.
    pub stepped: bool,
}

/// Smoothers snap to their target inside `SNAP_FRACTION * span`.
pub const SNAP_FRACTION: f32 = 1.0e-6;

impl ParamSpec {
    #[inline]
    pub fn span(&self) -> f32 {
        self.max - self.min
    }

    #[inline]
    pub fn snap_distance(&self) -> f32 {
        SNAP_FRACTION * self.span()
    }

    /// Clamp (and round, if stepped) a host value. NaN is rejected; the
    /// infinities clamp to the nearest bound.
    #[inline]
    pub fn sanitize(&self, value: f32) -> EngineResult<f32> {
        if value.is_nan() {
            return Err(EngineError::NonFiniteValue);
        }
        let v = clamp(value, self.min, self.max);
        Ok(if self.stepped { v.round() } else { v })
    }
}

const fn spec(
    id: ParamId,
    name: &'static str,
    min: f32,
    max: f32,
    default: f32,
    smoothing_ms: f32,
    stepped: bool,
) -> ParamSpec {
    ParamSpec { id, name, min, max, default, smoothing_ms, stepped }
}

pub static PARAMS: [ParamSpec; PARAM_COUNT] = [
    spec(ParamId::Gain, "gain", 0.0, 1.0, 0.5, 20.0, false),
    spec(ParamId::Frequency, "frequency", 20.0, 20_000.0, 220.0, 30.0, false),
    spec(ParamId::Shape, "shape", 0.0, 2.0, 1.0, 10.0, false),
    spec(ParamId::Cutoff, "cutoff", 20.0, 20_000.0, 12_000.0, 30.0, false),
    spec(ParamId::Resonance, "resonance", 0.5, 10.0, 0.707, 30.0, false),
    spec(ParamId::Drive, "drive", 0.1, 5.0, 1.0, 20.0, false),
    spec(ParamId::Mix, "mix", 0.0, 1.0, 1.0, 20.0, false),
    spec(ParamId::Attack, "attack", 0.0, 5000.0, 5.0, 0.0, false),
    spec(ParamId::Release, "release", 0.0, 5000.0, 200.0, 0.0, false),
    spec(ParamId::Drone, "drone", 0.0, 1.0, 1.0, 0.0, true),
    spec(ParamId::Mode, "mode", 0.0, 1.0, 0.0, 0.0, true),
];

/// Parameter targets copied out of the store at block start.
pub type Snapshot = [f32; PARAM_COUNT];

pub fn default_snapshot() -> Snapshot {
    let mut s = [0.0; PARAM_COUNT];
    for p in &PARAMS {
        s[p.id.index()] = p.default;
    }
    s
}

/// A held note as seen at block start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeldNote {
    pub note: u8,
    pub velocity: f32,
}

const NOTE_HELD: u64 = 1 << 8;

#[inline]
fn pack_note(n: HeldNote) -> u64 {
    (u64::from(n.velocity.to_bits()) << 32) | NOTE_HELD | u64::from(n.note)
}

#[inline]
fn unpack_note(bits: u64) -> Option<HeldNote> {
    if bits & NOTE_HELD == 0 {
        return None;
    }
    Some(HeldNote {
        note: (bits & 0xFF) as u8,
        velocity: f32::from_bits((bits >> 32) as u32),
    })
}

/// Store shared through an `Arc` by the control side and the processor.
pub struct ParameterStore {
    targets: [AtomicU32; PARAM_COUNT],
    published: [AtomicU32; PARAM_COUNT],
    note: AtomicU64,
}

impl core::fmt::Debug for ParameterStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ParameterStore")
            .field("targets", &self.snapshot())
            .field("note", &self.held_note())
            .finish()
    }
}

impl Default for ParameterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterStore {
    pub fn new() -> Self {
        let d = default_snapshot();
        Self {
            targets: core::array::from_fn(|i| AtomicU32::new(d[i].to_bits())),
            published: core::array::from_fn(|i| AtomicU32::new(d[i].to_bits())),
            note: AtomicU64::new(0),
        }
    }

    /// Write a target. Returns the value actually stored after clamping.
    pub fn set(&self, id: u32, value: f32) -> EngineResult<f32> {
        let pid = ParamId::from_raw(id).ok_or(EngineError::UnknownParameter(id))?;
        let v = pid.spec().sanitize(value)?;
        self.targets[pid.index()].store(v.to_bits(), Ordering::Release);
        Ok(v)
    }

    #[inline]
    pub fn set_id(&self, id: ParamId, value: f32) -> EngineResult<f32> {
        self.set(id.raw(), value)
    }

    /// Smoothed value as of the end of the last processed block.
    pub fn get(&self, id: u32) -> EngineResult<f32> {
        let pid = ParamId::from_raw(id).ok_or(EngineError::UnknownParameter(id))?;
        Ok(f32::from_bits(self.published[pid.index()].load(Ordering::Acquire)))
    }

    #[inline]
    pub fn get_id(&self, id: ParamId) -> f32 {
        f32::from_bits(self.published[id.index()].load(Ordering::Acquire))
    }

    /// Last value written by the host, before smoothing.
    pub fn target(&self, id: u32) -> EngineResult<f32> {
        let pid = ParamId::from_raw(id).ok_or(EngineError::UnknownParameter(id))?;
        Ok(f32::from_bits(self.targets[pid.index()].load(Ordering::Acquire)))
    }

    /// Read every target once. Called by the processor at block start.
    #[inline]
    pub fn snapshot(&self) -> Snapshot {
        core::array::from_fn(|i| f32::from_bits(self.targets[i].load(Ordering::Acquire)))
    }

    #[inline]
    pub(crate) fn publish(&self, values: &Snapshot) {
        for (slot, v) in self.published.iter().zip(values) {
            slot.store(v.to_bits(), Ordering::Release);
        }
    }

    /// Overwrite targets and published values together (state load, reset).
    pub(crate) fn load_all(&self, values: &Snapshot) {
        for (slot, v) in self.targets.iter().zip(values) {
            slot.store(v.to_bits(), Ordering::Release);
        }
        self.publish(values);
    }

    /// Snap published values to the current targets, used when no audio has
    /// run yet so there is nothing to be continuous with.
    pub(crate) fn publish_targets(&self) {
        self.publish(&self.snapshot());
    }

    pub fn note_on(&self, note: i32, velocity: f32) -> EngineResult<()> {
        let n = u8::try_from(note)
            .ok()
            .filter(|n| *n <= 127)
            .ok_or(EngineError::InvalidNote(note))?;
        if !velocity.is_finite() {
            return Err(EngineError::NonFiniteValue);
        }
        let held = HeldNote { note: n, velocity: clamp(velocity, 0.0, 1.0) };
        self.note.store(pack_note(held), Ordering::Release);
        Ok(())
    }

    /// Releases the held note if it is `note`; other notes are ignored.
    pub fn note_off(&self, note: i32) -> EngineResult<()> {
        let n = u8::try_from(note)
            .ok()
            .filter(|n| *n <= 127)
            .ok_or(EngineError::InvalidNote(note))?;
        let _ = self.note.fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
            match unpack_note(bits) {
                Some(h) if h.note == n => Some(0),
                _ => None,
            }
        });
        Ok(())
    }

    #[inline]
    pub fn held_note(&self) -> Option<HeldNote> {
        unpack_note(self.note.load(Ordering::Acquire))
    }
}
