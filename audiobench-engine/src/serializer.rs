//! Flat byte encoding of an instance's state.
//!
//! Layout, all fields big-endian:
//!
//! ```text
//! u32 version            (= STATE_VERSION)
//! u32 count
//! count x { u32 id, f32 value }
//! optional:
//!   u32 TRANSIENT_TAG    ("TRNS")
//!   u32 n
//!   n x f32              (see TransientState)
//! ```
//!
//! Decoding validates the whole buffer before anything is applied. Unknown
//! ids are skipped, missing ids take their defaults, trailing bytes that are
//! not a well-formed transient block are ignored.

use audiobench_core::envelopes::GateStage;
use audiobench_core::filters::SvfState;

use crate::error::{EngineError, EngineResult};
use crate::params::{default_snapshot, ParamId, Snapshot, PARAM_COUNT};
use crate::state::{TransientState, NATIVE_MAX};

pub const STATE_VERSION: u32 = 1;
pub const TRANSIENT_TAG: u32 = 0x5452_4E53;

const HEADER_LEN: usize = 8;
const ENTRY_LEN: usize = 8;

/// phase, two integrators per filter, env level, env stage, velocity,
/// releasing note (`-1` for none), smoothers.
pub const TRANSIENT_FLOATS: usize = 1 + 2 * NATIVE_MAX + 4 + PARAM_COUNT;

const NO_NOTE: f32 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SavedState {
    pub params: Snapshot,
    pub transient: Option<TransientState>,
}

impl Default for SavedState {
    fn default() -> Self {
        Self { params: default_snapshot(), transient: None }
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn u32(&mut self) -> Option<u32> {
        let b = self.bytes.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32(&mut self) -> Option<f32> {
        self.u32().map(f32::from_bits)
    }
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn put_f32(out: &mut Vec<u8>, v: f32) {
    put_u32(out, v.to_bits());
}

impl TransientState {
    fn write(&self, out: &mut Vec<u8>) {
        put_u32(out, TRANSIENT_TAG);
        put_u32(out, TRANSIENT_FLOATS as u32);
        put_f32(out, self.osc_phase);
        for f in &self.filters {
            put_f32(out, f.ic1eq);
            put_f32(out, f.ic2eq);
        }
        put_f32(out, self.env_level);
        put_f32(out, f32::from(self.env_stage as u8));
        put_f32(out, self.velocity);
        put_f32(out, self.last_note.map_or(NO_NOTE, f32::from));
        for v in &self.smoothed {
            put_f32(out, *v);
        }
    }

    /// `None` if the block is absent, truncated or of another size.
    fn read(r: &mut Reader<'_>) -> Option<Self> {
        if r.u32()? != TRANSIENT_TAG || r.u32()? as usize != TRANSIENT_FLOATS {
            return None;
        }
        if r.remaining() < TRANSIENT_FLOATS * 4 {
            return None;
        }
        let osc_phase = r.f32()?;
        let mut filters = [SvfState::default(); NATIVE_MAX];
        for f in &mut filters {
            f.ic1eq = r.f32()?;
            f.ic2eq = r.f32()?;
        }
        let env_level = r.f32()?;
        let env_stage = GateStage::from_u8(r.f32()? as u8);
        let velocity = r.f32()?;
        let note = r.f32()?;
        let last_note = (note.is_finite() && (0.0..=127.0).contains(&note)).then_some(note as u8);
        let mut smoothed = [0.0; PARAM_COUNT];
        for v in &mut smoothed {
            *v = r.f32()?;
        }
        Some(Self { osc_phase, filters, env_level, env_stage, velocity, last_note, smoothed })
    }
}

impl SavedState {
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.clear();
        put_u32(out, STATE_VERSION);
        put_u32(out, PARAM_COUNT as u32);
        for id in ParamId::ALL {
            put_u32(out, id.raw());
            put_f32(out, self.params[id.index()]);
        }
        if let Some(t) = &self.transient {
            t.write(out);
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            HEADER_LEN + PARAM_COUNT * ENTRY_LEN + 8 + TRANSIENT_FLOATS * 4,
        );
        self.encode_into(&mut out);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> EngineResult<Self> {
        let mut r = Reader::new(bytes);
        let (Some(version), Some(count)) = (r.u32(), r.u32()) else {
            return Err(EngineError::IncompatibleState("truncated header"));
        };
        if version != STATE_VERSION {
            return Err(EngineError::IncompatibleState("unsupported version"));
        }
        let table_len = (count as usize).checked_mul(ENTRY_LEN);
        if table_len.map_or(true, |n| n > r.remaining()) {
            return Err(EngineError::IncompatibleState("truncated parameter table"));
        }

        let mut params = default_snapshot();
        for _ in 0..count {
            let (Some(id), Some(value)) = (r.u32(), r.f32()) else {
                return Err(EngineError::IncompatibleState("truncated parameter table"));
            };
            let Some(pid) = ParamId::from_raw(id) else {
                continue;
            };
            if !value.is_finite() {
                return Err(EngineError::IncompatibleState("non-finite parameter value"));
            }
            params[pid.index()] = pid
                .spec()
                .sanitize(value)
                .map_err(|_| EngineError::IncompatibleState("non-finite parameter value"))?;
        }

        let transient = TransientState::read(&mut r);
        Ok(Self { params, transient })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(version: u32, count: u32) -> Vec<u8> {
        let mut v = Vec::new();
        put_u32(&mut v, version);
        put_u32(&mut v, count);
        v
    }

    #[test]
    fn layout_is_big_endian_id_value_pairs() {
        let s = SavedState::default();
        let b = s.to_bytes();
        assert_eq!(&b[0..4], &[0, 0, 0, 1]);
        assert_eq!(&b[4..8], &(PARAM_COUNT as u32).to_be_bytes());
        assert_eq!(&b[8..12], &[0, 0, 0, 0]);
        assert_eq!(&b[12..16], &0.5_f32.to_bits().to_be_bytes());
        assert_eq!(b.len(), HEADER_LEN + PARAM_COUNT * ENTRY_LEN);
    }

    #[test]
    fn round_trip_with_transient() {
        let mut s = SavedState::default();
        s.params[ParamId::Cutoff.index()] = 432.1;
        s.params[ParamId::Mode.index()] = 1.0;
        s.transient = Some(TransientState {
            osc_phase: 0.375,
            filters: [SvfState { ic1eq: 0.1, ic2eq: -0.2 }, SvfState { ic1eq: 1e-3, ic2eq: 4.0 }],
            env_level: 0.6,
            env_stage: GateStage::Release,
            velocity: 0.8,
            last_note: Some(64),
            smoothed: default_snapshot(),
        });
        assert_eq!(SavedState::from_bytes(&s.to_bytes()), Ok(s));
    }

    #[test]
    fn rejects_short_header_and_wrong_version() {
        assert!(matches!(
            SavedState::from_bytes(&[0, 0, 0]),
            Err(EngineError::IncompatibleState(_))
        ));
        assert_eq!(
            SavedState::from_bytes(&header(2, 0)),
            Err(EngineError::IncompatibleState("unsupported version"))
        );
    }

    #[test]
    fn rejects_table_longer_than_buffer() {
        let mut b = header(STATE_VERSION, 3);
        put_u32(&mut b, 0);
        put_f32(&mut b, 0.2);
        assert_eq!(
            SavedState::from_bytes(&b),
            Err(EngineError::IncompatibleState("truncated parameter table"))
        );
        assert!(SavedState::from_bytes(&header(STATE_VERSION, u32::MAX)).is_err());
    }

    #[test]
    fn missing_ids_default_and_unknown_ids_are_skipped() {
        let mut b = header(STATE_VERSION, 2);
        put_u32(&mut b, 777);
        put_f32(&mut b, 123.0);
        put_u32(&mut b, ParamId::Drive.raw());
        put_f32(&mut b, 2.5);
        b.extend_from_slice(b"future extension");
        let s = SavedState::from_bytes(&b).unwrap();
        let mut want = default_snapshot();
        want[ParamId::Drive.index()] = 2.5;
        assert_eq!(s.params, want);
        assert_eq!(s.transient, None);
    }

    #[test]
    fn out_of_range_values_are_clamped_and_nan_rejected() {
        let mut b = header(STATE_VERSION, 1);
        put_u32(&mut b, ParamId::Gain.raw());
        put_f32(&mut b, 9.0);
        assert_eq!(SavedState::from_bytes(&b).unwrap().params[0], 1.0);

        let mut b = header(STATE_VERSION, 1);
        put_u32(&mut b, ParamId::Gain.raw());
        put_f32(&mut b, f32::NAN);
        assert!(SavedState::from_bytes(&b).is_err());
    }

    #[test]
    fn truncated_transient_block_is_ignored() {
        let mut s = SavedState::default();
        s.transient = Some(TransientState {
            osc_phase: 0.5,
            filters: [SvfState::default(); NATIVE_MAX],
            env_level: 0.0,
            env_stage: GateStage::Idle,
            velocity: 1.0,
            last_note: None,
            smoothed: default_snapshot(),
        });
        let mut b = s.to_bytes();
        b.truncate(b.len() - 4);
        let back = SavedState::from_bytes(&b).unwrap();
        assert_eq!(back.params, s.params);
        assert_eq!(back.transient, None);
    }
}
