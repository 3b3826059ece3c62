/// Double-buffered audio capture handoff.
///
/// The capture callback (ISR or driver thread) appends samples into the
/// buffer selected by `current`. When it fills, the selector flips and
/// `ready` is raised; the consumer then reads the *other* buffer. The flag
/// is the only synchronization point: no locks, the producer never blocks.
///
/// ```text
///   producer                          consumer
///   ────────                          ────────
///   write buffers[current]            wait for ready
///   count == N ─┐                     clear ready
///               ├ current ^= 1        read buffers[current ^ 1]
///               └ ready = true
/// ```
///
/// If the producer flips while `ready` is still set the unread slice is
/// overwritten. That overrun is counted, never prevented: the hardware
/// source cannot be paused. Samples are stored as `AtomicI16` so an
/// overrun degrades to a torn slice rather than a data race.
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicI16, AtomicU32, AtomicU8, AtomicUsize, Ordering};

/// Capture setup failures. Both are fatal for the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("could not allocate audio buffers ({samples} samples each)")]
    Allocation { samples: usize },
    #[error("slice size must be non-zero")]
    EmptySlice,
}

/// Two fixed-size sample buffers used in strict alternation.
pub struct CaptureBuffers {
    buffers: [Box<[AtomicI16]>; 2],
    slice_len: usize,
    /// Active write target (producer owned)
    current: AtomicU8,
    /// Samples written into the active buffer (producer owned)
    write_count: AtomicUsize,
    /// Raised by the producer on flip, cleared by the consumer
    ready: AtomicBool,
    /// Total overruns since start
    overruns: AtomicU32,
    /// Total completed slices since start
    slices: AtomicU32,
}

impl CaptureBuffers {
    /// Allocate both buffers of `slice_len` samples.
    pub fn new(slice_len: usize) -> Result<Self, CaptureError> {
        if slice_len == 0 {
            return Err(CaptureError::EmptySlice);
        }
        let first = alloc_buffer(slice_len)?;
        let second = alloc_buffer(slice_len)?;
        Ok(Self {
            buffers: [first, second],
            slice_len,
            current: AtomicU8::new(0),
            write_count: AtomicUsize::new(0),
            ready: AtomicBool::new(false),
            overruns: AtomicU32::new(0),
            slices: AtomicU32::new(0),
        })
    }

    /// Slice length `N` in samples.
    pub fn slice_len(&self) -> usize {
        self.slice_len
    }

    /// Append a batch of samples from the capture source.
    ///
    /// Must only be called from the single producer context. Never blocks
    /// and never allocates. Returns the number of overruns detected while
    /// writing this batch.
    pub fn push_samples(&self, samples: &[i16]) -> u32 {
        let mut current = self.current.load(Ordering::Relaxed) as usize;
        let mut count = self.write_count.load(Ordering::Relaxed);
        let mut overruns = 0;

        for &sample in samples {
            self.buffers[current][count].store(sample, Ordering::Relaxed);
            count += 1;

            if count >= self.slice_len {
                current ^= 1;
                count = 0;
                self.current.store(current as u8, Ordering::Release);
                self.slices.fetch_add(1, Ordering::Relaxed);
                if self.ready.swap(true, Ordering::AcqRel) {
                    overruns += 1;
                }
            }
        }

        self.write_count.store(count, Ordering::Relaxed);
        if overruns > 0 {
            self.overruns.fetch_add(overruns, Ordering::Relaxed);
        }
        overruns
    }

    /// Whether a filled slice is waiting for the consumer.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Consumer side: if a slice is ready, clear the flag and convert the
    /// just-filled buffer into `out` as floats. Returns `false` when
    /// nothing was ready.
    ///
    /// `out` must hold at least [`slice_len`](Self::slice_len) values;
    /// extra values are left untouched.
    pub fn take_slice(&self, out: &mut [f32]) -> bool {
        if !self.ready.swap(false, Ordering::AcqRel) {
            return false;
        }
        let filled = (self.current.load(Ordering::Acquire) ^ 1) as usize;
        for (dst, src) in out.iter_mut().zip(self.buffers[filled].iter()) {
            *dst = src.load(Ordering::Relaxed) as f32;
        }
        true
    }

    /// Total overruns detected since start.
    pub fn overrun_count(&self) -> u32 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Total slices filled since start, consumed or not.
    pub fn slice_count(&self) -> u32 {
        self.slices.load(Ordering::Relaxed)
    }
}

fn alloc_buffer(len: usize) -> Result<Box<[AtomicI16]>, CaptureError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| CaptureError::Allocation { samples: len })?;
    buf.extend((0..len).map(|_| AtomicI16::new(0)));
    Ok(buf.into_boxed_slice())
}
