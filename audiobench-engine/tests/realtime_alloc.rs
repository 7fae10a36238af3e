//! `Engine::process` must not touch the heap. A counting global allocator
//! records every allocation made on the test thread while armed.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

use audiobench_engine::{
    AudioBlockView, ChannelPolicy, Engine, EngineConfig, ParamId, StateCapture,
};

struct Counting;

static ALLOCS: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static ARMED: Cell<bool> = const { Cell::new(false) };
}

unsafe impl GlobalAlloc for Counting {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if ARMED.with(Cell::get) {
            ALLOCS.fetch_add(1, Ordering::Relaxed);
        }
        System.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if ARMED.with(Cell::get) {
            ALLOCS.fetch_add(1, Ordering::Relaxed);
        }
        System.realloc(ptr, layout, new_size)
    }
}

#[global_allocator]
static GLOBAL: Counting = Counting;

fn armed<R>(f: impl FnOnce() -> R) -> (R, usize) {
    let before = ALLOCS.load(Ordering::Relaxed);
    ARMED.with(|a| a.set(true));
    let r = f();
    ARMED.with(|a| a.set(false));
    (r, ALLOCS.load(Ordering::Relaxed) - before)
}

#[test]
fn process_never_allocates() {
    let mut engine = Engine::with_config(EngineConfig {
        channel_policy: ChannelPolicy::Duplicate,
        state_capture: StateCapture::Full,
    });
    engine.prepare(48_000.0, 256).unwrap();
    let params = engine.params().clone();

    let mut left = vec![0.1_f32; 1000];
    let mut right = vec![-0.1_f32; 1000];
    let mut third = vec![0.0_f32; 1000];
    let mut chans: Vec<&mut [f32]> = vec![&mut left, &mut right, &mut third];
    let mut view = AudioBlockView::from_slices(&mut chans).unwrap();

    let (result, count) = armed(|| {
        let mut status = Ok(());
        for block in 0..64 {
            let _ = params.set_id(ParamId::Cutoff, 100.0 + block as f32 * 250.0);
            let _ = params.set_id(ParamId::Mode, (block / 16 % 2) as f32);
            if block % 8 == 0 {
                let _ = params.note_on(48 + block, 0.9);
            } else if block % 8 == 4 {
                let _ = params.note_off(48 + block - 4);
            }
            status = status.and(engine.process(&mut view));
        }
        status
    });

    assert_eq!(result, Ok(()));
    assert_eq!(count, 0, "process allocated {count} times");
}

#[test]
fn save_into_reuses_its_buffer() {
    let mut engine = Engine::with_config(EngineConfig {
        state_capture: StateCapture::Full,
        ..EngineConfig::default()
    });
    engine.prepare(48_000.0, 64).unwrap();
    let mut buf = engine.save_state();

    let ((), count) = armed(|| engine.save_state_into(&mut buf));
    assert_eq!(count, 0);
    assert!(!buf.is_empty());
}
