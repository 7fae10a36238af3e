//! The block processor.
//!
//! `Engine` owns the DSP state and a handle to the shared
//! [`ParameterStore`]. `process` is the realtime entry point: it reads the
//! store once, renders in chunks of at most `max_frames`, and publishes the
//! smoothed values when it is done. It never allocates, locks or logs.
//!
//! Per chunk:
//! 1. every smoother fills its lane
//! 2. coefficient lanes are derived (SVF `g`/`R`, drive normalisation, amplitude)
//! 3. each native channel runs its voice and the amplitude lane is applied
//! 4. remaining host channels are duplicated or cleared
//!
//! `prepare`, `save_state` and `load_state` are control-thread calls and must
//! not overlap `process`.

use std::sync::Arc;

use audiobench_core::dsp::{
    clamp, drive_norm, guard_block, lerp, midi_to_hz, multiply_in_place, saturate_normalized,
    tpt_g,
};
use audiobench_core::envelopes::GateStage;
use audiobench_core::filters::{damping, SvfCoeffs};

use crate::block::AudioBlockView;
use crate::config::{ChannelPolicy, EngineConfig, StateCapture};
use crate::error::{EngineError, EngineResult};
use crate::params::{HeldNote, ParamId, ParameterStore, Snapshot, PARAM_COUNT};
use crate::serializer::SavedState;
use crate::state::{EngineState, NATIVE_MAX};

/// Finite output is clamped to ±`OUTPUT_CEILING`.
pub const OUTPUT_CEILING: f32 = 4.0;

/// Largest block `prepare` accepts.
pub const MAX_BLOCK_FRAMES: usize = 1 << 16;

const SYNTH_CHANNELS: usize = 1;
const EFFECT_CHANNELS: usize = NATIVE_MAX;

// One lane per parameter, then drive normalisation and amplitude.
const LANE_COUNT: usize = PARAM_COUNT + 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Synth,
    Effect,
}

impl Mode {
    #[inline]
    fn from_param(v: f32) -> Self {
        if v >= 0.5 { Self::Effect } else { Self::Synth }
    }

    #[inline]
    pub fn native_channels(self) -> usize {
        match self {
            Self::Synth => SYNTH_CHANNELS,
            Self::Effect => EFFECT_CHANNELS,
        }
    }
}

/// `LANE_COUNT` contiguous runs of `stride` samples.
#[derive(Debug)]
struct Lanes {
    data: Vec<f32>,
    stride: usize,
}

impl Lanes {
    fn try_new(stride: usize) -> EngineResult<Self> {
        let len = stride.checked_mul(LANE_COUNT).ok_or(EngineError::AllocationFailure)?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|_| EngineError::AllocationFailure)?;
        data.resize(len, 0.0);
        Ok(Self { data, stride })
    }

    /// First `n` samples of every lane, borrowed mutably at once.
    fn split(&mut self, n: usize) -> [&mut [f32]; LANE_COUNT] {
        let n = n.min(self.stride);
        let stride = self.stride;
        let mut rest: &mut [f32] = &mut self.data;
        core::array::from_fn(|_| {
            let (head, tail) = core::mem::take(&mut rest).split_at_mut(stride);
            rest = tail;
            &mut head[..n]
        })
    }
}

#[derive(Debug)]
struct Prepared {
    sample_rate: f32,
    max_frames: usize,
    policy: ChannelPolicy,
    lanes: Lanes,
}

/// Block-level controls resolved from the snapshot.
#[derive(Debug, Clone, Copy)]
struct BlockControl {
    mode: Mode,
    drone: bool,
    gate: bool,
    velocity_target: f32,
}

pub struct Engine {
    params: Arc<ParameterStore>,
    config: EngineConfig,
    prepared: Option<Prepared>,
    state: EngineState,
}

impl core::fmt::Debug for Engine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("sample_rate", &self.sample_rate())
            .field("max_frames", &self.max_frames())
            .finish_non_exhaustive()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_store(Arc::new(ParameterStore::new()), config)
    }

    pub fn with_store(params: Arc<ParameterStore>, config: EngineConfig) -> Self {
        Self { params, config, prepared: None, state: EngineState::new(48_000.0) }
    }

    /// Store handle for the control thread.
    #[inline]
    pub fn params(&self) -> &Arc<ParameterStore> {
        &self.params
    }

    #[inline]
    pub fn config(&self) -> EngineConfig {
        self.config
    }

    /// The channel policy applies from the next `prepare`; state capture
    /// applies to the next save/load.
    pub fn set_config(&mut self, config: EngineConfig) {
        self.config = config;
    }

    #[inline]
    pub fn state(&self) -> &EngineState {
        &self.state
    }

    #[inline]
    pub fn is_prepared(&self) -> bool {
        self.prepared.is_some()
    }

    #[inline]
    pub fn sample_rate(&self) -> Option<f32> {
        self.prepared.as_ref().map(|p| p.sample_rate)
    }

    #[inline]
    pub fn max_frames(&self) -> Option<usize> {
        self.prepared.as_ref().map(|p| p.max_frames)
    }

    /// Allocates the lanes for `max_frames` and resets the DSP state.
    pub fn prepare(&mut self, sample_rate: f64, max_frames: usize) -> EngineResult<()> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 || sample_rate > 1.0e6 {
            log::warn!("prepare rejected: sample rate {sample_rate}");
            return Err(EngineError::InvalidConfig("sample rate out of range"));
        }
        if max_frames == 0 || max_frames > MAX_BLOCK_FRAMES {
            log::warn!("prepare rejected: max frames {max_frames}");
            return Err(EngineError::InvalidConfig("max block frames out of range"));
        }

        // Drop the old lanes first so a reconfigure never holds both.
        self.prepared = None;
        let lanes = Lanes::try_new(max_frames)?;
        let sr = sample_rate as f32;

        let targets = self.params.snapshot();
        self.state.reset(sr, &targets);
        self.params.publish_targets();

        self.prepared = Some(Prepared {
            sample_rate: sr,
            max_frames,
            policy: self.config.channel_policy,
            lanes,
        });
        log::debug!(
            "prepared: {sr} Hz, {max_frames} frames, {:?}",
            self.config.channel_policy
        );
        Ok(())
    }

    /// Realtime entry point. See the module docs for the contract.
    ///
    /// Zero frames is checked first: it returns `Ok` without touching the
    /// block, even before `prepare`.
    pub fn process(&mut self, block: &mut AudioBlockView<'_, '_>) -> EngineResult<()> {
        let frames = block.frames();
        if frames == 0 {
            return Ok(());
        }
        let Some(prep) = self.prepared.as_mut() else {
            block.clear();
            return Err(EngineError::NotPrepared);
        };

        let mut targets = self.params.snapshot();
        let note = self.params.held_note();
        let drone = targets[ParamId::Drone.index()] >= 0.5;
        let state = &mut self.state;

        // A released note keeps its pitch until the gated envelope is idle.
        let pitch = match note {
            Some(HeldNote { note, .. }) => Some(note),
            None if !drone && state.env.stage() != GateStage::Idle => state.last_note,
            None => None,
        };
        state.last_note = pitch;
        if let Some(n) = pitch {
            let spec = ParamId::Frequency.spec();
            targets[ParamId::Frequency.index()] = clamp(midi_to_hz(n), spec.min, spec.max);
        }

        if state.fresh {
            state.snap_to(&targets);
            state.fresh = false;
        }
        state
            .env
            .set_times(targets[ParamId::Attack.index()], targets[ParamId::Release.index()]);

        let ctl = BlockControl {
            mode: Mode::from_param(targets[ParamId::Mode.index()]),
            drone,
            gate: note.is_some(),
            velocity_target: match note {
                Some(n) => n.velocity,
                None if drone => 1.0,
                None => state.velocity.value(),
            },
        };

        let mut start = 0;
        while start < frames {
            let n = (frames - start).min(prep.max_frames);
            render_chunk(state, prep, &targets, ctl, block, start, n);
            start += n;
        }

        self.params.publish(&state.smoothed());
        Ok(())
    }

    /// Serialize into `out`, reusing its allocation.
    ///
    /// Before the first block after `prepare` the smoothers have not run yet;
    /// the next block would start them on the targets, so those are saved.
    pub fn save_state_into(&self, out: &mut Vec<u8>) {
        let params = self.params.snapshot();
        let transient = match self.config.state_capture {
            StateCapture::Full => {
                let mut t = self.state.transient();
                if self.state.fresh {
                    t.smoothed = params;
                }
                Some(t)
            }
            StateCapture::ParametersOnly => None,
        };
        let saved = SavedState { params, transient };
        saved.encode_into(out);
    }

    pub fn save_state(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.save_state_into(&mut out);
        out
    }

    /// Validates `bytes` completely before touching the instance.
    pub fn load_state(&mut self, bytes: &[u8]) -> EngineResult<()> {
        let saved = SavedState::from_bytes(bytes).inspect_err(|e| {
            log::warn!("state load rejected: {e}");
        })?;

        self.params.load_all(&saved.params);
        self.state.snap_to(&saved.params);

        match (self.config.state_capture, saved.transient) {
            (StateCapture::Full, Some(t)) => {
                self.state.restore(&t);
                self.params.publish(&self.state.smoothed());
            }
            _ => {
                self.state.reset_voice();
                self.state.fresh = true;
            }
        }
        log::debug!("state loaded ({} bytes)", bytes.len());
        Ok(())
    }
}

fn render_chunk(
    state: &mut EngineState,
    prep: &mut Prepared,
    targets: &Snapshot,
    ctl: BlockControl,
    block: &mut AudioBlockView<'_, '_>,
    start: usize,
    n: usize,
) {
    let sr = prep.sample_rate;
    let policy = prep.policy;
    let mut lanes = prep.lanes.split(n);

    // 1. smoothed parameter lanes
    for (i, lane) in lanes.iter_mut().take(PARAM_COUNT).enumerate() {
        state.smoothers[i].fill(targets[i], lane);
    }
    let [gain, freq, shape, cutoff, resonance, drive, mix, .., drive_n, amp] = lanes;

    // 2. derived lanes; cutoff/resonance become g/R in place
    for i in 0..n {
        cutoff[i] = tpt_g(cutoff[i], sr);
        resonance[i] = damping(resonance[i]);
        drive_n[i] = drive_norm(drive[i]);
    }
    let (g, r) = (&*cutoff, &*resonance);

    match ctl.mode {
        Mode::Synth => {
            for i in 0..n {
                let env = if ctl.drone { 1.0 } else { state.env.next(ctl.gate) };
                amp[i] = gain[i] * env * state.velocity.next(ctl.velocity_target);
            }
        }
        Mode::Effect => amp.copy_from_slice(gain),
    }

    // 3. voices
    let native = ctl.mode.native_channels().min(block.channel_count());
    let range = start..start + n;
    for ch in 0..native {
        let buf = block.channel_mut(ch, range.clone());
        let filter = &mut state.filters[ch];
        match ctl.mode {
            Mode::Synth => {
                for i in 0..n {
                    let x = state.osc.next(freq[i], shape[i], sr);
                    let y = filter.process_lp(x, SvfCoeffs { g: g[i], r: r[i] });
                    buf[i] = saturate_normalized(y, drive[i], drive_n[i]);
                }
            }
            Mode::Effect => {
                for i in 0..n {
                    let x = if buf[i].is_finite() { buf[i] } else { 0.0 };
                    let y = filter.process_lp(x, SvfCoeffs { g: g[i], r: r[i] });
                    let wet = saturate_normalized(y, drive[i], drive_n[i]);
                    buf[i] = lerp(x, wet, mix[i]);
                }
            }
        }
        multiply_in_place(buf, amp);
        if !guard_block(buf, OUTPUT_CEILING) || !filter.state().is_finite() {
            filter.reset();
        }
    }

    // 4. channel policy
    for ch in native..block.channel_count() {
        match policy {
            ChannelPolicy::Duplicate => block.copy_channel(ch % native, ch, range.clone()),
            ChannelPolicy::Clear => block.clear_channel(ch, range.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prepared(sr: f64, max: usize) -> Engine {
        let mut e = Engine::new();
        e.prepare(sr, max).unwrap();
        e
    }

    fn run(e: &mut Engine, chans: &mut [Vec<f32>]) -> EngineResult<()> {
        let mut refs: Vec<&mut [f32]> = chans.iter_mut().map(|c| c.as_mut_slice()).collect();
        let mut view = AudioBlockView::from_slices(&mut refs)?;
        e.process(&mut view)
    }

    #[test]
    fn prepare_validates_arguments() {
        let mut e = Engine::new();
        assert!(e.prepare(f64::NAN, 512).is_err());
        assert!(e.prepare(0.0, 512).is_err());
        assert!(e.prepare(48_000.0, 0).is_err());
        assert!(!e.is_prepared());
        assert!(e.prepare(48_000.0, 512).is_ok());
        assert_eq!(e.sample_rate(), Some(48_000.0));
        assert_eq!(e.max_frames(), Some(512));
    }

    #[test]
    fn unprepared_process_outputs_silence() {
        let mut e = Engine::new();
        let mut chans = vec![vec![0.7_f32; 64]; 2];
        assert_eq!(run(&mut e, &mut chans), Err(EngineError::NotPrepared));
        assert!(chans.iter().flatten().all(|s| *s == 0.0));
    }

    #[test]
    fn zero_frames_is_a_no_op() {
        let mut e = prepared(48_000.0, 64);
        let mut chans = vec![Vec::new(), Vec::new()];
        assert_eq!(run(&mut e, &mut chans), Ok(()));
        assert_eq!(e.params().get_id(ParamId::Gain), 0.5);
    }

    #[test]
    fn synth_duplicates_mono_to_all_channels() {
        let mut e = prepared(48_000.0, 128);
        let mut chans = vec![vec![0.0_f32; 300]; 3];
        run(&mut e, &mut chans).unwrap();
        assert!(chans[0].iter().any(|s| s.abs() > 0.01));
        assert_eq!(chans[0], chans[1]);
        assert_eq!(chans[0], chans[2]);
    }

    #[test]
    fn clear_policy_silences_extra_channels() {
        let mut e = Engine::with_config(EngineConfig {
            channel_policy: ChannelPolicy::Clear,
            ..EngineConfig::default()
        });
        e.prepare(48_000.0, 256).unwrap();
        let mut chans = vec![vec![0.3_f32; 256]; 2];
        run(&mut e, &mut chans).unwrap();
        assert!(chans[0].iter().any(|s| s.abs() > 0.01));
        assert!(chans[1].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn effect_mode_with_dry_mix_passes_input_times_gain() {
        let mut e = prepared(48_000.0, 256);
        e.params().set_id(ParamId::Mode, 1.0).unwrap();
        e.params().set_id(ParamId::Mix, 0.0).unwrap();
        e.params().set_id(ParamId::Gain, 1.0).unwrap();
        let input: Vec<f32> = (0..256).map(|i| (i as f32 * 0.05).sin() * 0.5).collect();
        let mut chans = vec![input.clone(), input.clone()];
        run(&mut e, &mut chans).unwrap();
        for ch in &chans {
            for (a, b) in ch.iter().zip(&input) {
                assert!((a - b).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn effect_mode_processes_channels_independently() {
        let mut e = prepared(48_000.0, 256);
        e.params().set_id(ParamId::Mode, 1.0).unwrap();
        let mut chans = vec![vec![0.5_f32; 256], vec![0.0_f32; 256]];
        run(&mut e, &mut chans).unwrap();
        assert!(chans[0].iter().any(|s| s.abs() > 0.01));
        assert!(chans[1].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn non_finite_input_is_silenced() {
        let mut e = prepared(48_000.0, 64);
        e.params().set_id(ParamId::Mode, 1.0).unwrap();
        let mut chans = vec![vec![f32::NAN; 64], vec![f32::INFINITY; 64]];
        run(&mut e, &mut chans).unwrap();
        assert!(chans.iter().flatten().all(|s| s.is_finite()));
    }

    #[test]
    fn large_blocks_render_in_chunks() {
        let mut a = prepared(48_000.0, 64);
        let mut b = prepared(48_000.0, 1024);
        let mut ca = vec![vec![0.0_f32; 1000]];
        let mut cb = vec![vec![0.0_f32; 1000]];
        run(&mut a, &mut ca).unwrap();
        run(&mut b, &mut cb).unwrap();
        assert_eq!(ca, cb);
    }

    #[test]
    fn held_note_overrides_frequency() {
        let mut e = prepared(48_000.0, 512);
        e.params().note_on(81, 1.0).unwrap();
        let mut chans = vec![vec![0.0_f32; 512]];
        for _ in 0..40 {
            run(&mut e, &mut chans).unwrap();
        }
        assert!((e.params().get_id(ParamId::Frequency) - 880.0).abs() < 0.1);
        assert_eq!(e.params().target(ParamId::Frequency.raw()), Ok(220.0));
    }

    #[test]
    fn gated_mode_is_silent_without_a_note() {
        let mut e = prepared(48_000.0, 512);
        e.params().set_id(ParamId::Drone, 0.0).unwrap();
        let mut chans = vec![vec![0.0_f32; 512]];
        run(&mut e, &mut chans).unwrap();
        assert!(chans[0].iter().all(|s| *s == 0.0));

        e.params().note_on(60, 1.0).unwrap();
        run(&mut e, &mut chans).unwrap();
        assert!(chans[0].iter().any(|s| s.abs() > 0.01));

        e.params().note_off(60).unwrap();
        for _ in 0..400 {
            run(&mut e, &mut chans).unwrap();
        }
        assert!(chans[0].iter().all(|s| s.abs() < 1e-6));
    }

    #[test]
    fn released_note_keeps_its_pitch_until_idle() {
        let mut e = prepared(48_000.0, 512);
        e.params().set_id(ParamId::Drone, 0.0).unwrap();
        e.params().note_on(81, 1.0).unwrap();
        let mut chans = vec![vec![0.0_f32; 512]];
        for _ in 0..40 {
            run(&mut e, &mut chans).unwrap();
        }
        e.params().note_off(81).unwrap();
        for _ in 0..3 {
            run(&mut e, &mut chans).unwrap();
        }
        assert!(chans[0].iter().any(|s| s.abs() > 0.01));
        assert!((e.params().get_id(ParamId::Frequency) - 880.0).abs() < 0.1);
        assert_eq!(e.state().last_note, Some(81));

        for _ in 0..400 {
            run(&mut e, &mut chans).unwrap();
        }
        assert_eq!(e.state().env.stage(), GateStage::Idle);
        assert_eq!(e.state().last_note, None);
        assert!((e.params().get_id(ParamId::Frequency) - 220.0).abs() < 0.1);
    }

    #[test]
    fn drone_after_release_follows_host_frequency() {
        let mut e = prepared(48_000.0, 512);
        e.params().note_on(69, 1.0).unwrap();
        let mut chans = vec![vec![0.0_f32; 512]];
        run(&mut e, &mut chans).unwrap();
        e.params().note_off(69).unwrap();
        run(&mut e, &mut chans).unwrap();
        assert_eq!(e.state().last_note, None);
    }

    #[test]
    fn tiny_sample_rates_process_without_panicking() {
        for sr in [1.0, 2.0, 2.5] {
            let mut e = prepared(sr, 64);
            let mut chans = vec![vec![0.0_f32; 64]; 2];
            assert_eq!(run(&mut e, &mut chans), Ok(()));
            assert!(chans.iter().flatten().all(|s| s.is_finite()));
        }
    }

    #[test]
    fn full_save_before_first_block_stores_targets() {
        let mut e = Engine::with_config(EngineConfig {
            state_capture: StateCapture::Full,
            ..EngineConfig::default()
        });
        e.prepare(48_000.0, 512).unwrap();
        e.params().set_id(ParamId::Gain, 0.1).unwrap();
        let saved = SavedState::from_bytes(&e.save_state()).unwrap();
        let t = saved.transient.unwrap();
        assert_eq!(t.smoothed[ParamId::Gain.index()], 0.1);
        assert_eq!(t.smoothed, saved.params);
    }

    #[test]
    fn reprepare_resets_voice_state() {
        let mut e = prepared(48_000.0, 128);
        let mut chans = vec![vec![0.0_f32; 128]];
        run(&mut e, &mut chans).unwrap();
        assert!(e.state().osc.phase() > 0.0);
        e.prepare(96_000.0, 256).unwrap();
        assert_eq!(e.state().osc.phase(), 0.0);
        assert_eq!(e.state().sample_rate(), 96_000.0);
    }
}
