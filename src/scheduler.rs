//! Input side of the pipeline: downmix, buffer, cut into frames.

use crate::bridge::{InferenceBridge, SubmitError};
use crate::ring::RingBuffer;

/// Scratch length for downmixing; longer blocks are handled in chunks.
const SCRATCH_LEN: usize = 1024;

/// Accumulates mono input and hands out exactly-`frame_size` frames.
pub struct FrameScheduler {
    ring: RingBuffer,
    frame_size: usize,
    scratch: Vec<f32>,
}

impl FrameScheduler {
    pub fn new(frame_size: usize, ring_capacity: usize) -> Self {
        Self {
            ring: RingBuffer::new(ring_capacity.max(frame_size)),
            frame_size,
            scratch: vec![0.0; SCRATCH_LEN],
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Samples waiting to become frames.
    pub fn buffered(&self) -> usize {
        self.ring.len()
    }

    /// Input samples lost to overflow since construction.
    pub fn dropped(&self) -> u64 {
        self.ring.dropped()
    }

    /// Append `n` samples of planar input, downmixed to mono.
    ///
    /// No channels means `n` samples of silence. Channels shorter than `n`
    /// are treated as zero beyond their end.
    pub fn push(&mut self, inputs: &[&[f32]], n: usize) {
        match inputs {
            [] => {
                let mut remaining = n;
                self.scratch.fill(0.0);
                while remaining > 0 {
                    let chunk = remaining.min(SCRATCH_LEN);
                    self.ring.push(&self.scratch[..chunk]);
                    remaining -= chunk;
                }
            }
            [mono] if mono.len() >= n => self.ring.push(&mono[..n]),
            _ => {
                let scale = 1.0 / inputs.len() as f32;
                let mut start = 0;
                while start < n {
                    let chunk = (n - start).min(SCRATCH_LEN);
                    let mix = &mut self.scratch[..chunk];
                    mix.fill(0.0);
                    for channel in inputs {
                        let end = channel.len().min(start + chunk);
                        if end > start {
                            for (m, s) in mix.iter_mut().zip(&channel[start..end]) {
                                *m += *s;
                            }
                        }
                    }
                    for m in mix.iter_mut() {
                        *m *= scale;
                    }
                    self.ring.push(mix);
                    start += chunk;
                }
            }
        }
    }

    /// Copy the next full frame into `frame`. Returns false, leaving the
    /// buffer untouched, while less than a frame is buffered.
    pub fn next_frame(&mut self, frame: &mut [f32]) -> bool {
        if self.ring.len() < self.frame_size || frame.len() != self.frame_size {
            return false;
        }
        self.ring.read_into(frame);
        true
    }

    /// Submit every full frame the bridge has room for.
    ///
    /// A frame the engine is too busy to take stays at the front of the ring
    /// for the next call, so frames always reach the engine in input order.
    /// Frames the engine can no longer take at all are given to `rejected`.
    /// Returns the number of frames accepted by the bridge.
    pub fn emit(&mut self, bridge: &mut InferenceBridge, mut rejected: impl FnMut(&[f32])) -> usize {
        let mut submitted = 0;
        while self.ring.len() >= self.frame_size && bridge.has_capacity() {
            let mut buf = bridge.acquire_buffer();
            self.ring.peek_into(&mut buf);
            match bridge.submit(buf) {
                Ok(_) => {
                    self.ring.discard(self.frame_size);
                    submitted += 1;
                }
                Err(SubmitError::Busy(buf)) => {
                    bridge.recycle(buf);
                    break;
                }
                Err(SubmitError::Disconnected(buf)) => {
                    self.ring.discard(self.frame_size);
                    rejected(&buf);
                    bridge.recycle(buf);
                }
            }
        }
        submitted
    }

    /// Switch to frames of `frame_size` samples. Buffered input is dropped.
    pub fn set_frame_size(&mut self, frame_size: usize) {
        self.frame_size = frame_size;
        if self.ring.capacity() < frame_size {
            self.ring = RingBuffer::new(frame_size);
        } else {
            self.ring.clear();
        }
    }

    /// Drop everything buffered.
    pub fn reset(&mut self) {
        self.ring.clear();
    }
}
