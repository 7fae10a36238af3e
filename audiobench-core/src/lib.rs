#![cfg_attr(not(feature = "std"), no_std)]
//! AudioBench Core: no_std-ready DSP primitives for the block engine.
//!
//! Features
//! - `std`      : (default) use the Rust standard library
//! - `no-std`   : build with `#![no_std]` and use `libm`/`micromath` math backends
//! - `fast-math`: polynomial trig and rational `tanh`
//! - `simd`     : `wide::f32x4` block multiply
//!
//! Modules
//! - [`dsp`]       : math backend, clamps, saturation, coefficients, block helpers
//! - [`envelopes`] : parameter smoother, gated attack/release envelope
//! - [`filters`]   : TPT state-variable filter
//!
//! Nothing in this crate allocates.

pub mod dsp;
pub mod envelopes;
pub mod filters;

pub mod prelude {
    pub use crate::dsp::{
        clamp, drive_norm, guard_block, guard_sample, kill_denormals, lerp, midi_to_hz, multiply_in_place,
        one_pole_coeff_ms, saturate_normalized, soft_clip, tpt_g, wrap_phase01, TAU,
    };
    pub use crate::envelopes::{GateEnvelope, GateStage, Smoother};
    pub use crate::filters::{damping, SvfCoeffs, SvfState, SvfTpt};
}

#[cfg(test)]
mod smoke {

    #[test]
    fn prelude_exists() {
        use crate::prelude::*;
        let mut sm = Smoother::new(10.0, 48_000.0, 0.0, 0.0);
        let _ = sm.next(1.0);
        let mut f = SvfTpt::new();
        let _ = f.process_lp(0.1, SvfCoeffs::new(1000.0, 0.707, 48_000.0));
    }
}
