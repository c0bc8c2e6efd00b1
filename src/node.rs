//! The real-time tap installed in a playback graph.
//!
//! [`DenoiseNode`] is moved into the host's render callback and called once
//! per block. It is controlled from the coordination thread through a
//! [`NodePort`], and neither side ever waits on the other:
//!
//! - the wanted enable state is published as one atomic word that the node
//!   reads at the start of every block, so the latest request always wins no
//!   matter how many were made while the callback was not running;
//! - a new [`InferenceBridge`] (after the engine was re-created) is handed over
//!   through a one-slot channel, and the bridge it replaces travels back on an
//!   `rtrb` SPSC queue so it is freed off the audio thread;
//! - counters come back through shared atomics.

use crate::bridge::InferenceBridge;
use crate::ms_to_samples;
use crate::scheduler::FrameScheduler;
use crate::stitcher::{PlaybackStitcher, Rendered};
use crossbeam_channel::{bounded, Receiver, Sender};
use rtrb::{Consumer, Producer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Replaced bridges waiting to be freed by the port.
const RETIRED_QUEUE_SIZE: usize = 4;

const ENABLED_BIT: u64 = 1 << 32;
const EPOCH_SHIFT: u32 = 33;
const EPOCH_MASK: u32 = (1 << 31) - 1;

/// Construction options of a tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeOptions {
    pub frame_size: usize,
    pub max_in_flight: usize,
    pub sample_rate: u32,
    /// Capacity of the input and output rings, in samples.
    pub ring_capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCommand {
    /// Start denoising after `warmup_ms` of silence. Ignored while enabled.
    Enable { warmup_ms: u32 },
    /// Pass the input through unmodified.
    Disable,
}

/// Enable state as published by the port.
///
/// Packed into one word so the node never sees a torn update: warmup in the
/// low 32 bits, then the enabled flag, then an epoch bumped on every enable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Desired {
    enabled: bool,
    warmup_ms: u32,
    epoch: u32,
}

impl Desired {
    fn pack(self) -> u64 {
        let enabled = if self.enabled { ENABLED_BIT } else { 0 };
        u64::from(self.warmup_ms) | enabled | (u64::from(self.epoch & EPOCH_MASK) << EPOCH_SHIFT)
    }

    fn unpack(word: u64) -> Self {
        Self {
            enabled: word & ENABLED_BIT != 0,
            warmup_ms: word as u32,
            epoch: (word >> EPOCH_SHIFT) as u32,
        }
    }
}

/// Counters published by the node.
#[derive(Debug, Default)]
pub struct NodeStats {
    frames_submitted: AtomicU64,
    frames_applied: AtomicU64,
    passthrough_frames: AtomicU64,
    stale_results: AtomicU64,
    dropped_input_samples: AtomicU64,
    underruns: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_submitted: u64,
    /// Results written to the output, processed or passthrough.
    pub frames_applied: u64,
    /// Frames that reached the output unprocessed.
    pub passthrough_frames: u64,
    /// Results discarded because they predate the latest enable.
    pub stale_results: u64,
    pub dropped_input_samples: u64,
    pub underruns: u64,
}

impl NodeStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_submitted: self.frames_submitted.load(Ordering::Relaxed),
            frames_applied: self.frames_applied.load(Ordering::Relaxed),
            passthrough_frames: self.passthrough_frames.load(Ordering::Relaxed),
            stale_results: self.stale_results.load(Ordering::Relaxed),
            dropped_input_samples: self.dropped_input_samples.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
        }
    }

    fn add(counter: &AtomicU64, n: u64) {
        if n > 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }
}

/// Control-side end of a node.
pub struct NodePort {
    control: Arc<AtomicU64>,
    desired: Desired,
    bridges: Sender<InferenceBridge>,
    /// Second receiver of `bridges`, to take back a bridge the node never picked up.
    undelivered: Receiver<InferenceBridge>,
    retired: Consumer<InferenceBridge>,
    stats: Arc<NodeStats>,
}

impl NodePort {
    /// Publish a command. Returns false if it does not change the wanted state.
    ///
    /// The node applies the latest state on its next block; commands are never
    /// queued, so none can be lost while the render callback is not running.
    pub fn send(&mut self, command: NodeCommand) -> bool {
        let next = match command {
            NodeCommand::Enable { .. } if self.desired.enabled => return false,
            NodeCommand::Enable { warmup_ms } => Desired {
                enabled: true,
                warmup_ms,
                epoch: self.desired.epoch.wrapping_add(1) & EPOCH_MASK,
            },
            NodeCommand::Disable if !self.desired.enabled => return false,
            NodeCommand::Disable => Desired {
                enabled: false,
                ..self.desired
            },
        };
        self.desired = next;
        self.control.store(next.pack(), Ordering::Release);
        true
    }

    pub fn enable(&mut self, warmup_ms: u32) -> bool {
        self.send(NodeCommand::Enable { warmup_ms })
    }

    pub fn disable(&mut self) -> bool {
        self.send(NodeCommand::Disable)
    }

    pub fn set_enabled(&mut self, enabled: bool, warmup_ms: u32) -> bool {
        if enabled {
            self.enable(warmup_ms)
        } else {
            self.disable()
        }
    }

    /// The state the node will follow on its next block.
    pub fn is_enabled(&self) -> bool {
        self.desired.enabled
    }

    /// Point the node at another engine. The node drops whatever it has
    /// buffered and, if enabled, starts a fresh session on the new bridge.
    ///
    /// Only the latest bridge is delivered when this is called several times
    /// before the node runs.
    pub fn rebind(&mut self, bridge: InferenceBridge) {
        self.free_retired();
        while self.undelivered.try_recv().is_ok() {}
        if self.bridges.try_send(bridge).is_err() {
            log::warn!("Node bridge slot unavailable, keeping the previous engine");
        }
    }

    /// The node has been dropped by the host.
    pub fn is_abandoned(&self) -> bool {
        self.retired.is_abandoned()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn free_retired(&mut self) {
        while let Ok(bridge) = self.retired.pop() {
            drop(bridge);
        }
    }
}

/// Per-stream denoiser called from the render callback.
pub struct DenoiseNode {
    scheduler: FrameScheduler,
    stitcher: PlaybackStitcher,
    bridge: InferenceBridge,
    control: Arc<AtomicU64>,
    bridges: Receiver<InferenceBridge>,
    retired: Producer<InferenceBridge>,
    stats: Arc<NodeStats>,
    sample_rate: u32,
    enabled: bool,
    /// Epoch of the enable the current session belongs to.
    epoch: u32,
}

impl DenoiseNode {
    /// Build a disabled node around `bridge` and the port that controls it.
    pub fn new(options: NodeOptions, bridge: InferenceBridge) -> (Self, NodePort) {
        if options.frame_size != bridge.frame_size() {
            log::warn!(
                "Node frame size {} differs from engine frame size {}, using the engine's",
                options.frame_size,
                bridge.frame_size()
            );
        }
        let frame_size = bridge.frame_size();
        let control = Arc::new(AtomicU64::new(Desired::default().pack()));
        let (bridge_tx, bridge_rx) = bounded(1);
        let (retired_tx, retired_rx) = rtrb::RingBuffer::new(RETIRED_QUEUE_SIZE);
        let stats = Arc::new(NodeStats::default());
        let node = Self {
            scheduler: FrameScheduler::new(frame_size, options.ring_capacity),
            stitcher: PlaybackStitcher::new(options.ring_capacity),
            bridge,
            control: Arc::clone(&control),
            bridges: bridge_rx.clone(),
            retired: retired_tx,
            stats: Arc::clone(&stats),
            sample_rate: options.sample_rate,
            enabled: false,
            epoch: 0,
        };
        let port = NodePort {
            control,
            desired: Desired::default(),
            bridges: bridge_tx,
            undelivered: bridge_rx,
            retired: retired_rx,
            stats,
        };
        (node, port)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn in_flight(&self) -> usize {
        self.bridge.in_flight()
    }

    /// All frames awaiting a result, including those submitted before the latest enable.
    pub fn outstanding(&self) -> usize {
        self.bridge.outstanding()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn rebind(&mut self, bridge: InferenceBridge) {
        let old = std::mem::replace(&mut self.bridge, bridge);
        if self.bridge.frame_size() != self.scheduler.frame_size() {
            self.scheduler.set_frame_size(self.bridge.frame_size());
        }
        self.scheduler.reset();
        self.stitcher.arm(0);
        // Forces a fresh session below if the port still wants denoising.
        self.enabled = false;
        if let Err(rtrb::PushError::Full(old)) = self.retired.push(old) {
            drop(old);
        }
    }

    fn sync_control(&mut self) {
        let desired = Desired::unpack(self.control.load(Ordering::Acquire));
        if !desired.enabled {
            self.enabled = false;
        } else if !self.enabled || desired.epoch != self.epoch {
            self.enabled = true;
            self.scheduler.reset();
            self.stitcher.arm(ms_to_samples(desired.warmup_ms, self.sample_rate));
            self.bridge.reset_session();
        }
        self.epoch = desired.epoch;
    }

    /// Render one block.
    ///
    /// `inputs` and `outputs` are planar channels; the block length is the
    /// length of the first output channel. Never blocks.
    pub fn process(&mut self, inputs: &[&[f32]], outputs: &mut [&mut [f32]]) {
        if let Ok(bridge) = self.bridges.try_recv() {
            self.rebind(bridge);
        }
        self.sync_control();

        let enabled = self.enabled;
        let stitcher = &mut self.stitcher;
        let stats = &self.stats;
        let polled = self.bridge.poll_results(|result| {
            if enabled {
                stitcher.push_processed(&result.samples);
                if result.passthrough {
                    stats.passthrough_frames.fetch_add(1, Ordering::Relaxed);
                }
            }
        });
        if enabled {
            NodeStats::add(&stats.frames_applied, polled.applied as u64);
        }
        NodeStats::add(&stats.stale_results, polled.stale as u64);

        let n = match (outputs.first(), inputs.first()) {
            (Some(out), _) => out.len(),
            (None, Some(input)) => input.len(),
            (None, None) => 0,
        };

        if !enabled {
            bypass(inputs, outputs);
            return;
        }

        self.scheduler.push(inputs, n);
        self.stats
            .dropped_input_samples
            .store(self.scheduler.dropped(), Ordering::Relaxed);

        let stitcher = &mut self.stitcher;
        let stats = &self.stats;
        let submitted = self.scheduler.emit(&mut self.bridge, |rejected| {
            stitcher.push_processed(rejected);
            stats.passthrough_frames.fetch_add(1, Ordering::Relaxed);
        });
        NodeStats::add(&self.stats.frames_submitted, submitted as u64);

        if let Some((first, rest)) = outputs.split_first_mut() {
            if self.stitcher.render(first) == Rendered::Underrun {
                self.stats.underruns.fetch_add(1, Ordering::Relaxed);
            }
            for out in rest.iter_mut() {
                let len = out.len().min(first.len());
                out[..len].copy_from_slice(&first[..len]);
                out[len..].fill(0.0);
            }
        }
    }
}

/// Copy input to output unmodified. Output channels beyond the input reuse
/// input channel 0; with no input at all the output is silent.
fn bypass(inputs: &[&[f32]], outputs: &mut [&mut [f32]]) {
    for (c, out) in outputs.iter_mut().enumerate() {
        match inputs.get(c).or_else(|| inputs.first()) {
            Some(input) => {
                let len = out.len().min(input.len());
                out[..len].copy_from_slice(&input[..len]);
                out[len..].fill(0.0);
            }
            None => out.fill(0.0),
        }
    }
}
