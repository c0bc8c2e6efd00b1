//! Output side of the pipeline: processed frames back into callback-sized blocks.

use crate::ring::RingBuffer;

/// What a [`PlaybackStitcher::render`] call produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rendered {
    /// The whole block was warmup silence.
    Warmup,
    /// The block (or its tail, after warmup expired mid-block) came from processed audio.
    Processed,
    /// Not enough processed audio was ready; the rest of the block is silence.
    Underrun,
}

pub struct PlaybackStitcher {
    ring: RingBuffer,
    warmup_remaining: usize,
    underruns: u64,
}

impl PlaybackStitcher {
    pub fn new(ring_capacity: usize) -> Self {
        Self {
            ring: RingBuffer::new(ring_capacity),
            warmup_remaining: 0,
            underruns: 0,
        }
    }

    /// Clear pending output and force `warmup_samples` of silence.
    pub fn arm(&mut self, warmup_samples: usize) {
        self.ring.clear();
        self.warmup_remaining = warmup_samples;
    }

    pub fn warmup_remaining(&self) -> usize {
        self.warmup_remaining
    }

    pub fn buffered(&self) -> usize {
        self.ring.len()
    }

    pub fn underruns(&self) -> u64 {
        self.underruns
    }

    pub fn push_processed(&mut self, samples: &[f32]) {
        self.ring.push(samples);
    }

    /// Fill `out` from processed audio.
    ///
    /// Processed samples are only used when the ring can cover the whole
    /// remaining request; a short ring is left untouched and the request is
    /// silenced.
    pub fn render(&mut self, out: &mut [f32]) -> Rendered {
        let silent = self.warmup_remaining.min(out.len());
        if silent > 0 {
            out[..silent].fill(0.0);
            self.warmup_remaining -= silent;
        }
        let rest = &mut out[silent..];
        if rest.is_empty() {
            return Rendered::Warmup;
        }
        if self.ring.len() >= rest.len() {
            self.ring.read_into(rest);
            Rendered::Processed
        } else {
            rest.fill(0.0);
            self.underruns += 1;
            Rendered::Underrun
        }
    }
}
