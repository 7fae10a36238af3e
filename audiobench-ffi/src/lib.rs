//! C ABI for the AudioBench engine.
//!
//! Exposes an opaque instance handle plus functions to prepare, process,
//! set/get parameters, send notes and save/load state.
//!
//! ABI notes
//! - All functions are `extern "C"` and `#[no_mangle]`.
//! - Opaque handle type: `ABInstanceRef` (heap-allocated; pair every
//!   `ABCreateInstance` with exactly one `ABDestroyInstance`).
//! - Status-returning functions return `0` on success and a negative code
//!   otherwise (see `audiobench_engine::Status`).
//! - `ABProcess` takes one pointer per channel (non-interleaved).
//!
//! Threading
//! - `ABSetParameter`, `ABGetParameter`, `ABNoteOn` and `ABNoteOff` may be
//!   called from any thread while `ABProcess` runs.
//! - `ABPrepare`, `ABSaveState`, `ABLoadState`, `ABSetChannelPolicy`,
//!   `ABSetStateCapture` and `ABDestroyInstance` must not overlap
//!   `ABProcess` on the same instance.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::alloc::{alloc, Layout};
use std::sync::Arc;

use audiobench_engine::{
    AudioBlockView, ChannelPolicy, Engine, EngineConfig, EngineError, EngineResult,
    ParameterStore, StateCapture, Status, PARAM_COUNT,
};

const MAGIC_LIVE: u32 = 0xAB1E_C0DE;
const MAGIC_DEAD: u32 = 0xDEAD_AB1E;

static LIVE_INSTANCES: AtomicUsize = AtomicUsize::new(0);

/// Opaque instance we hand to C.
pub struct ABInstance {
    magic: AtomicU32,
    params: Arc<ParameterStore>,
    engine: UnsafeCell<Engine>,
    /// Backing storage for the pointer returned by `ABSaveState`.
    saved: UnsafeCell<Vec<u8>>,
}

pub type ABInstanceRef = *mut ABInstance;

impl ABInstance {
    fn new() -> Self {
        let params = Arc::new(ParameterStore::new());
        let engine = Engine::with_store(Arc::clone(&params), EngineConfig::default());
        Self {
            magic: AtomicU32::new(MAGIC_LIVE),
            params,
            engine: UnsafeCell::new(engine),
            saved: UnsafeCell::new(Vec::new()),
        }
    }

    /// # Safety
    /// The caller must hold the instance's control-thread contract: no
    /// other `engine_mut` borrow and no concurrent `ABProcess`.
    #[allow(clippy::mut_from_ref)]
    unsafe fn engine_mut(&self) -> &mut Engine {
        &mut *self.engine.get()
    }
}

/// Validity check run by every entry point.
///
/// Rejects null and any instance whose magic word is not live. It
/// dereferences `handle`, so it does not make a freed handle safe: passing
/// one is undefined behaviour.
unsafe fn instance<'a>(handle: ABInstanceRef) -> EngineResult<&'a ABInstance> {
    if handle.is_null() {
        return Err(EngineError::InvalidHandle);
    }
    let inst = &*handle;
    if inst.magic.load(Ordering::Acquire) == MAGIC_LIVE {
        Ok(inst)
    } else {
        Err(EngineError::InvalidHandle)
    }
}

#[inline]
fn status(r: EngineResult<()>) -> i32 {
    Status::from_result(r).code()
}

/// Control-path failures are logged, then turned into a status code.
fn logged(what: &str, r: EngineResult<()>) -> i32 {
    if let Err(e) = r {
        log::warn!("{what}: {e}");
    }
    status(r)
}

#[inline]
fn raw_id(id: i32) -> u32 {
    u32::try_from(id).unwrap_or(u32::MAX)
}

// --- Creation / destruction -------------------------------------------------------

/// Create a new instance with default parameters.
/// Returns a non-null handle on success, or null on allocation failure.
#[no_mangle]
pub extern "C" fn ABCreateInstance() -> ABInstanceRef {
    let layout = Layout::new::<ABInstance>();
    // SAFETY: `ABInstance` is not zero-sized.
    let ptr = unsafe { alloc(layout) }.cast::<ABInstance>();
    if ptr.is_null() {
        log::warn!("ABCreateInstance: {}", EngineError::AllocationFailure);
        return core::ptr::null_mut();
    }
    // SAFETY: freshly allocated with the layout of `ABInstance`.
    unsafe { ptr.write(ABInstance::new()) };
    let live = LIVE_INSTANCES.fetch_add(1, Ordering::AcqRel) + 1;
    log::debug!("instance {ptr:p} created ({live} live)");
    ptr
}

/// Destroy an instance previously returned by `ABCreateInstance`.
/// Null is ignored. Only a live handle is freed; one whose magic word is not
/// live is logged and left alone. Calling this with a handle that was
/// already destroyed reads freed memory and is undefined behaviour.
#[no_mangle]
pub unsafe extern "C" fn ABDestroyInstance(handle: ABInstanceRef) {
    if handle.is_null() {
        return;
    }
    let inst = &*handle;
    if inst
        .magic
        .compare_exchange(MAGIC_LIVE, MAGIC_DEAD, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        log::warn!("ABDestroyInstance: {handle:p} is not a live instance (double destroy?)");
        return;
    }
    // SAFETY: allocated in `ABCreateInstance` with `Layout::new::<ABInstance>()`,
    // which is the layout `Box` uses for the global allocator.
    drop(Box::from_raw(handle));
    let live = LIVE_INSTANCES.fetch_sub(1, Ordering::AcqRel) - 1;
    log::debug!("instance {handle:p} destroyed ({live} live)");
}

/// Number of instances created and not yet destroyed.
#[no_mangle]
pub extern "C" fn ABLiveInstanceCount() -> usize {
    LIVE_INSTANCES.load(Ordering::Acquire)
}

// --- Configuration ---------------------------------------------------------------

/// (Re)allocate block lanes and reset the DSP state. Must precede the first
/// `ABProcess`.
#[no_mangle]
pub unsafe extern "C" fn ABPrepare(handle: ABInstanceRef, sample_rate: f64, max_frames: i32) -> i32 {
    let r = instance(handle).and_then(|inst| {
        let frames = usize::try_from(max_frames)
            .map_err(|_| EngineError::InvalidConfig("max block frames out of range"))?;
        inst.engine_mut().prepare(sample_rate, frames)
    });
    logged("ABPrepare", r)
}

/// `0` duplicate, `1` clear. Applied at the next `ABPrepare`.
#[no_mangle]
pub unsafe extern "C" fn ABSetChannelPolicy(handle: ABInstanceRef, policy: i32) -> i32 {
    let r = instance(handle).and_then(|inst| {
        let engine = inst.engine_mut();
        let channel_policy = ChannelPolicy::try_from(policy)?;
        engine.set_config(EngineConfig { channel_policy, ..engine.config() });
        Ok(())
    });
    logged("ABSetChannelPolicy", r)
}

/// `0` parameters only, `1` full transient state.
#[no_mangle]
pub unsafe extern "C" fn ABSetStateCapture(handle: ABInstanceRef, capture: i32) -> i32 {
    let r = instance(handle).and_then(|inst| {
        let engine = inst.engine_mut();
        let state_capture = StateCapture::try_from(capture)?;
        engine.set_config(EngineConfig { state_capture, ..engine.config() });
        Ok(())
    });
    logged("ABSetStateCapture", r)
}

// --- Rendering -------------------------------------------------------------------

/// Process `frames` samples in place on `channels` non-interleaved buffers.
///
/// Checks run in this order:
/// 1. an invalid handle is `InvalidHandle`;
/// 2. negative `channels` or `frames`, a null `buffers` array, zero channels
///    or a null channel pointer is `MalformedBuffer`;
/// 3. zero frames is `0` with nothing written, even before `ABPrepare`;
/// 4. an unprepared instance is `NotPrepared` and its buffers are zeroed.
///
/// Realtime safe: no allocation, locking or logging.
#[no_mangle]
pub unsafe extern "C" fn ABProcess(
    handle: ABInstanceRef,
    buffers: *const *mut f32,
    channels: i32,
    frames: i32,
) -> i32 {
    let inst = match instance(handle) {
        Ok(i) => i,
        Err(e) => return e.status().code(),
    };
    let (Ok(count), Ok(frames)) = (usize::try_from(channels), usize::try_from(frames)) else {
        return Status::MalformedBuffer.code();
    };
    if buffers.is_null() || count == 0 {
        return Status::MalformedBuffer.code();
    }
    let ptrs = core::slice::from_raw_parts(buffers, count);
    let r = AudioBlockView::from_raw(ptrs, frames)
        .and_then(|mut view| inst.engine_mut().process(&mut view));
    status(r)
}

// --- Parameters ------------------------------------------------------------------

/// Out-of-range values are clamped; NaN is rejected.
#[no_mangle]
pub unsafe extern "C" fn ABSetParameter(handle: ABInstanceRef, id: i32, value: f32) -> i32 {
    let r = instance(handle).and_then(|inst| inst.params.set(raw_id(id), value).map(|_| ()));
    logged("ABSetParameter", r)
}

/// Smoothed value as of the last processed block. `0.0` for an unknown id
/// or an invalid handle.
#[no_mangle]
pub unsafe extern "C" fn ABGetParameter(handle: ABInstanceRef, id: i32) -> f32 {
    match instance(handle).and_then(|inst| inst.params.get(raw_id(id))) {
        Ok(v) => v,
        Err(e) => {
            log::warn!("ABGetParameter({id}): {e}");
            0.0
        }
    }
}

#[no_mangle]
pub extern "C" fn ABGetParameterCount() -> i32 {
    PARAM_COUNT as i32
}

/// Monophonic: a new note replaces the held one.
#[no_mangle]
pub unsafe extern "C" fn ABNoteOn(handle: ABInstanceRef, index: i32, velocity: f32) -> i32 {
    let r = instance(handle).and_then(|inst| inst.params.note_on(index, velocity));
    logged("ABNoteOn", r)
}

/// Releases the held note if it is `index`.
#[no_mangle]
pub unsafe extern "C" fn ABNoteOff(handle: ABInstanceRef, index: i32) -> i32 {
    let r = instance(handle).and_then(|inst| inst.params.note_off(index));
    logged("ABNoteOff", r)
}

// --- State -----------------------------------------------------------------------

/// Serialize the instance. The returned buffer is owned by the instance and
/// stays valid until the next `ABSaveState` or `ABDestroyInstance`.
/// Returns null (and writes 0 to `length`) on an invalid handle.
#[no_mangle]
pub unsafe extern "C" fn ABSaveState(handle: ABInstanceRef, length: *mut u32) -> *const u8 {
    let out = match instance(handle) {
        Ok(inst) => {
            let saved = &mut *inst.saved.get();
            inst.engine_mut().save_state_into(saved);
            Some((saved.as_ptr(), saved.len() as u32))
        }
        Err(e) => {
            log::warn!("ABSaveState: {e}");
            None
        }
    };
    let (ptr, len) = out.unwrap_or((core::ptr::null(), 0));
    if !length.is_null() {
        *length = len;
    }
    ptr
}

/// Restore a buffer produced by `ABSaveState`. Nothing is applied unless the
/// whole buffer validates.
#[no_mangle]
pub unsafe extern "C" fn ABLoadState(handle: ABInstanceRef, bytes: *const u8, length: u32) -> i32 {
    let r = instance(handle).and_then(|inst| {
        let data: &[u8] = if bytes.is_null() {
            &[]
        } else {
            core::slice::from_raw_parts(bytes, length as usize)
        };
        inst.engine_mut().load_state(data)
    });
    logged("ABLoadState", r)
}

// --- Tests -----------------------------------------------------------------------
