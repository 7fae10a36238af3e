//! Math backend and small sample-level helpers.
//!
//! Everything here is `#[inline]`, allocation free and safe to call from the
//! audio thread. The math backend is picked at compile time:
//! - `micromath` : micromath's `F32Ext` (works in `no_std`)
//! - `no-std`    : `libm`
//! - otherwise   : the `std` float methods
//!
//! `fast-math` swaps trig and `tanh` for polynomial/rational approximations.
//! `simd` routes [`multiply_in_place`] through `wide::f32x4`.

#![allow(clippy::excessive_precision)]

use core::f32::consts::PI;

use cfg_if::cfg_if;

// ----------------------------- Math backend selection -----------------------------

cfg_if! {
    if #[cfg(feature = "micromath")] {
        use micromath::F32Ext as _;
        #[inline] pub(crate) fn m_sin(x: f32) -> f32 { x.sin() }
        #[inline] pub(crate) fn m_cos(x: f32) -> f32 { x.cos() }
        #[inline] pub(crate) fn m_exp(x: f32) -> f32 { x.exp() }
        #[inline] pub(crate) fn m_tanh(x: f32) -> f32 {
            let e = (2.0 * x.clamp(-15.0, 15.0)).exp();
            (e - 1.0) / (e + 1.0)
        }
        #[inline] pub(crate) fn m_tan(x: f32) -> f32 { x.sin() / x.cos() }
        #[inline] pub(crate) fn m_floor(x: f32) -> f32 { x.floor() }
        #[inline] pub(crate) fn m_abs(x: f32) -> f32 { x.abs() }
    } else if #[cfg(feature = "no-std")] {
        #[inline] pub(crate) fn m_sin(x: f32) -> f32 { libm::sinf(x) }
        #[inline] pub(crate) fn m_cos(x: f32) -> f32 { libm::cosf(x) }
        #[inline] pub(crate) fn m_exp(x: f32) -> f32 { libm::expf(x) }
        #[inline] pub(crate) fn m_tanh(x: f32) -> f32 { libm::tanhf(x) }
        #[inline] pub(crate) fn m_tan(x: f32) -> f32 { libm::tanf(x) }
        #[inline] pub(crate) fn m_floor(x: f32) -> f32 { libm::floorf(x) }
        #[inline] pub(crate) fn m_abs(x: f32) -> f32 { libm::fabsf(x) }
    } else {
        #[inline] pub(crate) fn m_sin(x: f32) -> f32 { x.sin() }
        #[inline] pub(crate) fn m_cos(x: f32) -> f32 { x.cos() }
        #[inline] pub(crate) fn m_exp(x: f32) -> f32 { x.exp() }
        #[inline] pub(crate) fn m_tanh(x: f32) -> f32 { x.tanh() }
        #[inline] pub(crate) fn m_tan(x: f32) -> f32 { x.tan() }
        #[inline] pub(crate) fn m_floor(x: f32) -> f32 { x.floor() }
        #[inline] pub(crate) fn m_abs(x: f32) -> f32 { x.abs() }
    }
}

// --------------------------------- Constants -------------------------------------

/// 2π
pub const TAU: f32 = 2.0 * PI;

/// Magnitudes below this are flushed to zero.
pub const EPS_SMALL: f32 = 1.0e-20;

// --------------------------------- Utilities -------------------------------------

/// Clamp `x` into `[lo, hi]`. NaN passes through; callers filter it first.
#[inline]
pub fn clamp(x: f32, lo: f32, hi: f32) -> f32 {
    num_traits::clamp(x, lo, hi)
}

#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[inline]
pub fn abs(x: f32) -> f32 {
    m_abs(x)
}

/// Wrap phase into [0, 1).
#[inline]
pub fn wrap_phase01(p: f32) -> f32 {
    let w = p - m_floor(p);
    if w >= 1.0 { 0.0 } else { w }
}

/// Returns 0.0 if |x| < EPS_SMALL.
#[inline]
pub fn kill_denormals(x: f32) -> f32 {
    if m_abs(x) < EPS_SMALL { 0.0 } else { x }
}

/// Output guard: `None` for NaN/Inf, otherwise `x` clamped to `±ceiling`.
#[inline]
pub fn guard_sample(x: f32, ceiling: f32) -> Option<f32> {
    if x.is_finite() {
        Some(clamp(x, -ceiling, ceiling))
    } else {
        None
    }
}

// --------------------------------- Fast trig -------------------------------------

/// Sine with range reduction into [-π, π]. Polynomial when `fast-math` is on
/// (max abs error ~1e-3), exact otherwise.
#[inline]
pub fn fast_sin(x: f32) -> f32 {
    cfg_if! {
        if #[cfg(feature = "fast-math")] {
            let k = m_floor(x / TAU + 0.5);
            let xr = x - k * TAU;
            let x2 = xr * xr;
            xr * (0.999_979_313_3 + x2 * (-0.166_624_432_0 + x2 * 0.008_308_978_98))
        } else {
            m_sin(x)
        }
    }
}

#[inline]
pub fn fast_cos(x: f32) -> f32 {
    cfg_if! {
        if #[cfg(feature = "fast-math")] {
            fast_sin(x + PI * 0.5)
        } else {
            m_cos(x)
        }
    }
}

// --------------------------------- Nonlinearities --------------------------------

/// `tanh`, or `x * (27 + x^2) / (27 + 9 x^2)` under `fast-math`.
///
/// The rational form is only accurate for |x| < 3, so it is clamped there.
#[inline]
pub fn soft_clip(x: f32) -> f32 {
    cfg_if! {
        if #[cfg(feature = "fast-math")] {
            let x = clamp(x, -3.0, 3.0);
            let x2 = x * x;
            x * (27.0 + x2) / (27.0 + 9.0 * x2)
        } else {
            m_tanh(x)
        }
    }
}

/// Reciprocal of `soft_clip(drive)`, the gain that maps a full-scale input
/// back to full scale after [`saturate_normalized`].
#[inline]
pub fn drive_norm(drive: f32) -> f32 {
    let d = drive.max(1.0e-3);
    1.0 / soft_clip(d)
}

/// `soft_clip(x * drive) * norm`; with `norm = drive_norm(drive)` a unit
/// input stays at unit output for every drive.
#[inline]
pub fn saturate_normalized(x: f32, drive: f32, norm: f32) -> f32 {
    soft_clip(x * drive) * norm
}

// --------------------------------- Exponentials / smoothing ----------------------

/// One-pole pole `a = exp(-1/(tau * sr))` for a time constant in ms.
/// `t_ms <= 0` gives `0.0`, i.e. an instant jump with `y += (x - y) * (1 - a)`.
#[inline]
pub fn one_pole_coeff_ms(t_ms: f32, sr: f32) -> f32 {
    if t_ms <= 0.0 || sr <= 0.0 {
        return 0.0;
    }
    let tau = t_ms * 0.001;
    m_exp(-1.0 / (tau * sr))
}

/// `g = tan(π fc / sr)` for TPT filters. The cutoff is kept below Nyquist so
/// `g` stays finite; below 2 Hz sample rate the 1 Hz floor gives way to it.
/// A non-positive rate yields `0.0`.
#[inline]
pub fn tpt_g(cut_hz: f32, sr: f32) -> f32 {
    if sr.is_nan() || sr <= 0.0 {
        return 0.0;
    }
    let hi = 0.49 * sr;
    let fc = clamp(cut_hz, hi.min(1.0), hi);
    let x = PI * (fc / sr);
    cfg_if! {
        if #[cfg(feature = "fast-math")] {
            fast_sin(x) / fast_cos(x)
        } else {
            m_tan(x)
        }
    }
}

/// Equal-tempered pitch, MIDI 69 = 440 Hz.
#[inline]
pub fn midi_to_hz(note: u8) -> f32 {
    // 2^((n - 69) / 12) == exp(ln2 * (n - 69) / 12)
    let semis = f32::from(note) - 69.0;
    440.0 * m_exp(core::f32::consts::LN_2 * semis / 12.0)
}

// --------------------------------- Block helpers ---------------------------------

/// `dst[i] *= gains[i]` over the common length.
#[inline]
pub fn multiply_in_place(dst: &mut [f32], gains: &[f32]) {
    let n = dst.len().min(gains.len());
    let (dst, gains) = (&mut dst[..n], &gains[..n]);

    cfg_if! {
        if #[cfg(feature = "simd")] {
            use wide::f32x4;
            let mut d4 = dst.chunks_exact_mut(4);
            let mut g4 = gains.chunks_exact(4);
            for (d, g) in (&mut d4).zip(&mut g4) {
                let v = f32x4::from([d[0], d[1], d[2], d[3]]) * f32x4::from([g[0], g[1], g[2], g[3]]);
                d.copy_from_slice(&v.to_array());
            }
            for (d, g) in d4.into_remainder().iter_mut().zip(g4.remainder()) {
                *d *= *g;
            }
        } else {
            for (d, g) in dst.iter_mut().zip(gains) {
                *d *= *g;
            }
        }
    }
}

/// Clamp a block to `±ceiling`, zeroing NaN/Inf. Returns `false` if any
/// sample was non-finite.
#[inline]
pub fn guard_block(buf: &mut [f32], ceiling: f32) -> bool {
    let mut clean = true;
    for x in buf.iter_mut() {
        match guard_sample(*x, ceiling) {
            Some(y) => *x = y,
            None => {
                *x = 0.0;
                clean = false;
            }
        }
    }
    clean
}

// ------------------------------------ Tests --------------------------------------
