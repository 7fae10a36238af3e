//! Non-owning view of one host audio block.
//!
//! The view never outlives a `process` call and never allocates. Three
//! storage layouts are accepted:
//! - split slices: `&mut [&mut [f32]]`, one slice per channel
//! - planar: one `&mut [f32]` holding `channels * frames` samples
//! - raw: a C array of channel pointers (built by the FFI layer)

use core::marker::PhantomData;
use core::ops::Range;

use crate::error::{EngineError, EngineResult};

enum Channels<'a, 'b> {
    Split(&'a mut [&'b mut [f32]]),
    Planar(&'a mut [f32]),
    Raw {
        ptrs: &'a [*mut f32],
        _data: PhantomData<&'b mut f32>,
    },
}

pub struct AudioBlockView<'a, 'b> {
    channels: Channels<'a, 'b>,
    count: usize,
    frames: usize,
}

impl<'a, 'b> AudioBlockView<'a, 'b> {
    /// All slices must have the same length.
    pub fn from_slices(chans: &'a mut [&'b mut [f32]]) -> EngineResult<Self> {
        let count = chans.len();
        if count == 0 {
            return Err(EngineError::MalformedBuffer("no channels"));
        }
        let frames = chans[0].len();
        if chans.iter().any(|c| c.len() != frames) {
            return Err(EngineError::MalformedBuffer("channel lengths differ"));
        }
        Ok(Self { channels: Channels::Split(chans), count, frames })
    }

    /// `data` holds `channels` consecutive runs of `frames` samples.
    pub fn planar(data: &'a mut [f32], channels: usize, frames: usize) -> EngineResult<Self> {
        if channels == 0 {
            return Err(EngineError::MalformedBuffer("no channels"));
        }
        if channels.checked_mul(frames).map_or(true, |n| n > data.len()) {
            return Err(EngineError::MalformedBuffer("planar buffer too short"));
        }
        Ok(Self { channels: Channels::Planar(data), count: channels, frames })
    }

    /// View over host channel pointers.
    ///
    /// # Safety
    /// Each non-null pointer in `ptrs` must be valid for reads and writes of
    /// `frames` samples for `'b`, and no two channels may overlap.
    pub unsafe fn from_raw(ptrs: &'a [*mut f32], frames: usize) -> EngineResult<Self> {
        if ptrs.is_empty() {
            return Err(EngineError::MalformedBuffer("no channels"));
        }
        if ptrs.iter().any(|p| p.is_null()) {
            return Err(EngineError::MalformedBuffer("null channel pointer"));
        }
        Ok(Self {
            channels: Channels::Raw { ptrs, _data: PhantomData },
            count: ptrs.len(),
            frames,
        })
    }

    #[inline]
    pub fn channel_count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Samples `range` of channel `ch`.
    #[inline]
    pub fn channel_mut(&mut self, ch: usize, range: Range<usize>) -> &mut [f32] {
        assert!(ch < self.count && range.end <= self.frames);
        match &mut self.channels {
            Channels::Split(c) => &mut c[ch][range],
            Channels::Planar(d) => {
                let base = ch * self.frames;
                &mut d[base + range.start..base + range.end]
            }
            // SAFETY: `from_raw`'s contract covers `frames` samples per channel
            // and the bounds were checked above.
            Channels::Raw { ptrs, .. } => unsafe {
                core::slice::from_raw_parts_mut(ptrs[ch].add(range.start), range.len())
            },
        }
    }

    /// Copy `range` of channel `src` into channel `dst`.
    pub fn copy_channel(&mut self, src: usize, dst: usize, range: Range<usize>) {
        assert!(src < self.count && dst < self.count && range.end <= self.frames);
        if src == dst {
            return;
        }
        match &mut self.channels {
            Channels::Split(c) => {
                let (lo, hi) = (src.min(dst), src.max(dst));
                let (head, tail) = c.split_at_mut(hi);
                let (a, b) = (&mut head[lo], &mut tail[0]);
                if src < dst {
                    b[range.clone()].copy_from_slice(&a[range]);
                } else {
                    a[range.clone()].copy_from_slice(&b[range]);
                }
            }
            Channels::Planar(d) => {
                let from = src * self.frames + range.start..src * self.frames + range.end;
                d.copy_within(from, dst * self.frames + range.start);
            }
            // SAFETY: distinct, non-overlapping channels per `from_raw`.
            Channels::Raw { ptrs, .. } => unsafe {
                core::ptr::copy_nonoverlapping(
                    ptrs[src].add(range.start),
                    ptrs[dst].add(range.start),
                    range.len(),
                );
            },
        }
    }

    pub fn clear_channel(&mut self, ch: usize, range: Range<usize>) {
        self.channel_mut(ch, range).fill(0.0);
    }

    pub fn clear(&mut self) {
        let n = self.frames;
        for ch in 0..self.count {
            self.clear_channel(ch, 0..n);
        }
    }
}
