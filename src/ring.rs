//! Fixed-capacity sample ring with a drop-oldest overflow policy.
//!
//! Used on both ends of the pipeline: the input side buffers downmixed audio
//! until a full frame is available, the output side buffers processed audio
//! until the render callback asks for it.
//!
//! All storage is allocated at construction. [`push`](RingBuffer::push),
//! [`read_into`](RingBuffer::read_into) and [`clear`](RingBuffer::clear) are
//! O(n) copies with zero heap allocations, safe to call from an audio callback.

/// Circular `f32` store. Never grows, never blocks, never fails.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    data: Vec<f32>,
    /// Next slot to write.
    write_pos: usize,
    /// Oldest buffered sample.
    read_pos: usize,
    /// Samples currently buffered (0..=capacity).
    len: usize,
    /// Samples discarded by overflow since construction.
    dropped: u64,
}

impl RingBuffer {
    /// Create a ring holding at most `capacity` samples (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0.0; capacity.max(1)],
            write_pos: 0,
            read_pos: 0,
            len: 0,
            dropped: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total samples lost to overflow so far.
    #[inline]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Append samples, discarding the oldest buffered ones when full.
    ///
    /// If `samples` alone is longer than the capacity, only its last
    /// `capacity` samples are kept.
    pub fn push(&mut self, samples: &[f32]) {
        let cap = self.capacity();
        let samples = if samples.len() > cap {
            let skip = samples.len() - cap;
            self.dropped += skip as u64;
            &samples[skip..]
        } else {
            samples
        };
        let n = samples.len();
        if n == 0 {
            return;
        }

        let overflow = (self.len + n).saturating_sub(cap);
        if overflow > 0 {
            self.read_pos = (self.read_pos + overflow) % cap;
            self.len -= overflow;
            self.dropped += overflow as u64;
        }

        let first = (cap - self.write_pos).min(n);
        self.data[self.write_pos..self.write_pos + first].copy_from_slice(&samples[..first]);
        let rest = n - first;
        if rest > 0 {
            self.data[..rest].copy_from_slice(&samples[first..]);
        }
        self.write_pos = (self.write_pos + n) % cap;
        self.len += n;
    }

    /// Fill `out` from the oldest buffered samples, zero-padding the tail.
    ///
    /// Returns how many real samples were copied; the read cursor advances by
    /// exactly that many.
    pub fn read_into(&mut self, out: &mut [f32]) -> usize {
        let n = self.peek_into(out);
        self.discard(n)
    }

    /// Like [`read_into`](Self::read_into) but leaves the samples buffered.
    pub fn peek_into(&self, out: &mut [f32]) -> usize {
        let cap = self.capacity();
        let avail = self.len.min(out.len());

        let first = (cap - self.read_pos).min(avail);
        out[..first].copy_from_slice(&self.data[self.read_pos..self.read_pos + first]);
        let rest = avail - first;
        if rest > 0 {
            out[first..avail].copy_from_slice(&self.data[..rest]);
        }
        out[avail..].fill(0.0);
        avail
    }

    /// Drop up to `count` of the oldest samples. Returns how many went.
    pub fn discard(&mut self, count: usize) -> usize {
        let n = count.min(self.len);
        if n > 0 {
            self.read_pos = (self.read_pos + n) % self.capacity();
            self.len -= n;
        }
        n
    }

    /// Read exactly `count` samples, zero-padded when fewer are buffered.
    ///
    /// Allocates; the audio path uses [`read_into`](Self::read_into).
    pub fn read(&mut self, count: usize) -> Vec<f32> {
        let mut out = vec![0.0; count];
        self.read_into(&mut out);
        out
    }

    /// Forget all buffered samples. Storage is not zeroed; occupancy tracking
    /// guarantees stale contents are never read back.
    pub fn clear(&mut self) {
        self.write_pos = 0;
        self.read_pos = 0;
        self.len = 0;
    }
}
