//! Request/response bridge between the audio thread and the inference thread.
//!
//! Architecture:
//!
//! ```text
//!   audio thread                              inference thread
//!   InferenceBridge ──(WorkerMessage, bounded)──►  InferenceWorker
//!        ▲                                          (session.run, ModelState)
//!        └─────────(FrameResult, bounded)───────────┘
//! ```
//!
//! Frames cross as owned `Vec<f32>`: once submitted the audio side no longer
//! has access to the buffer until it comes back inside a [`FrameResult`], at
//! which point it is recycled into the bridge's pool for the next frame.
//!
//! The worker is a single serial consumer of a FIFO channel, so results come
//! back in submission order. Running several workers in parallel would break
//! that and need a reorder buffer keyed by [`AudioFrame::seq`].

use crate::engine::{InferenceSession, TensorData};
use crate::negotiate::IoSpec;
use crate::{DfError, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How long control-side sends wait for room in the job queue.
const CONTROL_SEND_TIMEOUT: Duration = Duration::from_millis(500);

/// One frame on its way to the engine.
#[derive(Debug)]
pub struct AudioFrame {
    /// Monotonic submission id.
    pub seq: u64,
    /// Enable-session the frame belongs to.
    pub generation: u32,
    /// Exactly `frame_size` mono samples.
    pub samples: Vec<f32>,
}

/// The engine's answer for one frame.
#[derive(Debug)]
pub struct FrameResult {
    pub seq: u64,
    pub generation: u32,
    /// Enhanced audio, or the original frame when `passthrough` is set.
    pub samples: Vec<f32>,
    /// The engine failed on this frame and the input was returned unprocessed.
    pub passthrough: bool,
}

pub(crate) enum WorkerMessage {
    Frame {
        frame: AudioFrame,
        reply: Sender<FrameResult>,
    },
    ResetState,
    Shutdown,
}

impl WorkerMessage {
    fn into_samples(self) -> Vec<f32> {
        match self {
            WorkerMessage::Frame { frame, .. } => frame.samples,
            WorkerMessage::ResetState | WorkerMessage::Shutdown => Vec::new(),
        }
    }
}

/// Recurrent memory carried between consecutive inference calls.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelState {
    values: Vec<f32>,
}

impl ModelState {
    pub fn new(size: usize) -> Self {
        Self {
            values: vec![0.0; size],
        }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn reset(&mut self) {
        self.values.fill(0.0);
    }

    /// Overwrite in place. Rejects (and keeps the old state) on a length mismatch.
    pub fn update_from(&mut self, next: &[f32]) -> bool {
        if next.len() != self.values.len() {
            return false;
        }
        self.values.copy_from_slice(next);
        true
    }
}

// ─────────────────────────── Engine side ───────────────────────────

/// Runs the session for every submitted frame, serially.
pub struct InferenceWorker {
    session: Box<dyn InferenceSession>,
    io: IoSpec,
    state: Option<ModelState>,
    atten_lim_db: f32,
    jobs: Receiver<WorkerMessage>,
    /// Generation of the last frame run; a new one starts from zeroed state.
    last_generation: Option<u32>,
    frames_processed: u64,
    failures: u64,
}

impl InferenceWorker {
    /// Create a worker for `session` and the link used to reach it.
    ///
    /// `queue_capacity` bounds the job queue shared by every bridge created
    /// from the link.
    pub fn new(
        session: Box<dyn InferenceSession>,
        io: IoSpec,
        atten_lim_db: f32,
        queue_capacity: usize,
    ) -> (Self, EngineLink) {
        let (tx, rx) = bounded(queue_capacity.max(1));
        let state = io.is_stateful().then(|| ModelState::new(io.state_size));
        let link = EngineLink {
            jobs: tx,
            frame_size: io.frame_size,
            generations: Arc::new(AtomicU32::new(0)),
        };
        let worker = Self {
            session,
            io,
            state,
            atten_lim_db,
            jobs: rx,
            last_generation: None,
            frames_processed: 0,
            failures: 0,
        };
        (worker, link)
    }

    pub fn io(&self) -> &IoSpec {
        &self.io
    }

    pub fn model_state(&self) -> Option<&[f32]> {
        self.state.as_ref().map(ModelState::as_slice)
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Frames that were returned as passthrough.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn reset_state(&mut self) {
        if let Some(state) = self.state.as_mut() {
            state.reset();
        }
    }

    /// Run a few silent frames to absorb first-inference latency, then reset state.
    pub fn warmup(&mut self, runs: usize) -> Result<()> {
        let silence = vec![0.0f32; self.io.frame_size];
        for _ in 0..runs {
            self.infer(&silence)?;
        }
        self.reset_state();
        Ok(())
    }

    /// Run one frame through the session.
    ///
    /// On success the output is sanitised (non-finite → 0, clamped to ±1) and
    /// the model state advanced. On failure the state is left untouched.
    pub fn infer(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let io = &self.io;
        let mut feeds = Vec::with_capacity(3);
        feeds.push((
            io.audio_in.name.as_str(),
            TensorData::new(io.audio_in.shape.clone(), samples.to_vec()),
        ));
        if let (Some(binding), Some(state)) = (&io.state_in, &self.state) {
            feeds.push((
                binding.name.as_str(),
                TensorData::new(binding.shape.clone(), state.as_slice().to_vec()),
            ));
        }
        if let Some(binding) = &io.atten_in {
            feeds.push((
                binding.name.as_str(),
                TensorData::new(binding.shape.clone(), vec![self.atten_lim_db]),
            ));
        }

        let mut outputs = self.session.run(feeds)?;

        let audio = outputs
            .remove(&io.audio_out)
            .ok_or_else(|| DfError::Inference(format!("output '{}' missing", io.audio_out)))?;
        if audio.len() != io.frame_size {
            return Err(DfError::Inference(format!(
                "'{}' returned {} samples, expected {}",
                io.audio_out,
                audio.len(),
                io.frame_size
            )));
        }

        if let (Some(name), Some(state)) = (&io.state_out, self.state.as_mut()) {
            match outputs.get(name) {
                Some(next) if state.update_from(&next.data) => {}
                Some(next) => log::warn!(
                    "State output '{}' has {} values, expected {}; state not advanced",
                    name,
                    next.len(),
                    state.len()
                ),
                None => log::warn!("State output '{}' missing; state not advanced", name),
            }
        }

        let mut processed = audio.data;
        for s in processed.iter_mut() {
            *s = if s.is_finite() { s.clamp(-1.0, 1.0) } else { 0.0 };
        }
        Ok(processed)
    }

    /// Returns false when the worker should stop.
    fn handle(&mut self, msg: WorkerMessage) -> bool {
        match msg {
            WorkerMessage::Frame { frame, reply } => {
                let AudioFrame {
                    seq,
                    generation,
                    mut samples,
                } = frame;
                if self.last_generation.is_some_and(|g| g != generation) {
                    self.reset_state();
                }
                self.last_generation = Some(generation);
                let passthrough = match self.infer(&samples) {
                    Ok(processed) => {
                        samples.clear();
                        samples.extend_from_slice(&processed);
                        false
                    }
                    Err(e) => {
                        self.failures += 1;
                        log::warn!("Frame {} passed through unprocessed: {}", seq, e);
                        true
                    }
                };
                self.frames_processed += 1;
                // A closed result channel means the tap was dropped; nothing to deliver.
                let _ = reply.send(FrameResult {
                    seq,
                    generation,
                    samples,
                    passthrough,
                });
                true
            }
            WorkerMessage::ResetState => {
                self.reset_state();
                true
            }
            WorkerMessage::Shutdown => false,
        }
    }

    /// Handle every queued message without blocking. Returns how many were handled.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(msg) = self.jobs.try_recv() {
            handled += 1;
            if !self.handle(msg) {
                break;
            }
        }
        handled
    }

    /// Blocking loop until shutdown or until every link and bridge is gone.
    pub fn run(mut self) {
        while let Ok(msg) = self.jobs.recv() {
            if !self.handle(msg) {
                break;
            }
        }
        log::debug!(
            "Inference worker stopped after {} frames ({} passthrough)",
            self.frames_processed,
            self.failures
        );
    }

    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("denoise-inference".to_string())
            .spawn(move || self.run())
    }
}

/// Control-side handle to a worker. Cheap to clone.
#[derive(Clone)]
pub struct EngineLink {
    jobs: Sender<WorkerMessage>,
    frame_size: usize,
    /// Shared by every bridge so generations stay unique across taps.
    generations: Arc<AtomicU32>,
}

impl EngineLink {
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Create the audio-side endpoint for one tap.
    pub fn bridge(&self, max_in_flight: usize) -> InferenceBridge {
        InferenceBridge::new(
            self.jobs.clone(),
            Arc::clone(&self.generations),
            self.frame_size,
            max_in_flight,
        )
    }

    /// Zero the model state before any frame queued after this call.
    pub fn reset_state(&self) -> bool {
        self.send_control(WorkerMessage::ResetState)
    }

    pub fn shutdown(&self) -> bool {
        self.send_control(WorkerMessage::Shutdown)
    }

    fn send_control(&self, msg: WorkerMessage) -> bool {
        match self.jobs.send_timeout(msg, CONTROL_SEND_TIMEOUT) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Inference worker unreachable: {}", e);
                false
            }
        }
    }
}

// ─────────────────────────── Audio side ───────────────────────────

/// Counts from one [`InferenceBridge::poll_results`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Polled {
    /// Results of the current session handed to the caller.
    pub applied: usize,
    /// Results of an earlier session, discarded.
    pub stale: usize,
}

/// A frame [`InferenceBridge::submit`] could not hand over, returned to the caller.
#[derive(Debug, PartialEq)]
pub enum SubmitError {
    /// The in-flight limit is reached or the engine queue is full. Retry later.
    Busy(Vec<f32>),
    /// The engine is gone; nothing submitted from now on will be answered.
    Disconnected(Vec<f32>),
}

impl SubmitError {
    pub fn into_samples(self) -> Vec<f32> {
        match self {
            SubmitError::Busy(samples) | SubmitError::Disconnected(samples) => samples,
        }
    }
}

/// Audio-thread endpoint: submission, in-flight accounting, result delivery.
///
/// Every method is non-blocking.
pub struct InferenceBridge {
    jobs: Sender<WorkerMessage>,
    generations: Arc<AtomicU32>,
    results_tx: Sender<FrameResult>,
    results: Receiver<FrameResult>,
    frame_size: usize,
    max_in_flight: usize,
    next_seq: u64,
    expected_seq: u64,
    generation: u32,
    in_flight: usize,
    /// Frames of earlier sessions still out; they hold capacity until they return.
    stale_in_flight: usize,
    pool: Vec<Vec<f32>>,
}

impl InferenceBridge {
    fn new(
        jobs: Sender<WorkerMessage>,
        generations: Arc<AtomicU32>,
        frame_size: usize,
        max_in_flight: usize,
    ) -> Self {
        let max_in_flight = max_in_flight.max(1);
        // Outstanding frames never exceed max_in_flight, so neither do results.
        let (results_tx, results) = bounded(max_in_flight);
        let mut pool = Vec::with_capacity(max_in_flight * 2);
        for _ in 0..max_in_flight {
            pool.push(vec![0.0f32; frame_size]);
        }
        let generation = next_generation(&generations);
        Self {
            jobs,
            generations,
            results_tx,
            results,
            frame_size,
            max_in_flight,
            next_seq: 0,
            expected_seq: 0,
            generation,
            in_flight: 0,
            stale_in_flight: 0,
            pool,
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Frames of the current session awaiting a result.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// All frames awaiting a result, including earlier sessions.
    pub fn outstanding(&self) -> usize {
        self.in_flight + self.stale_in_flight
    }

    pub fn has_capacity(&self) -> bool {
        self.outstanding() < self.max_in_flight
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// A `frame_size` buffer, from the pool when possible.
    pub fn acquire_buffer(&mut self) -> Vec<f32> {
        let mut buf = self.pool.pop().unwrap_or_default();
        buf.resize(self.frame_size, 0.0);
        buf
    }

    /// Return a buffer to the pool.
    pub fn recycle(&mut self, buf: Vec<f32>) {
        if self.pool.len() < self.max_in_flight * 2 && buf.capacity() >= self.frame_size {
            self.pool.push(buf);
        }
    }

    /// Hand a frame to the engine. Returns the assigned sequence id.
    ///
    /// The samples come back inside the error when the frame was not taken;
    /// the caller decides what to do with them.
    pub fn submit(&mut self, samples: Vec<f32>) -> std::result::Result<u64, SubmitError> {
        debug_assert_eq!(samples.len(), self.frame_size);
        if !self.has_capacity() {
            return Err(SubmitError::Busy(samples));
        }
        let seq = self.next_seq;
        let msg = WorkerMessage::Frame {
            frame: AudioFrame {
                seq,
                generation: self.generation,
                samples,
            },
            reply: self.results_tx.clone(),
        };
        match self.jobs.try_send(msg) {
            Ok(()) => {
                self.next_seq += 1;
                self.in_flight += 1;
                Ok(seq)
            }
            Err(TrySendError::Full(msg)) => Err(SubmitError::Busy(msg.into_samples())),
            Err(TrySendError::Disconnected(msg)) => Err(SubmitError::Disconnected(msg.into_samples())),
        }
    }

    /// Drain finished frames.
    ///
    /// Results of the current session are passed to `apply`; results of an
    /// earlier session are discarded. Either way the frame's in-flight slot is
    /// released and its buffer recycled.
    pub fn poll_results(&mut self, mut apply: impl FnMut(&FrameResult)) -> Polled {
        let mut polled = Polled::default();
        while let Ok(result) = self.results.try_recv() {
            if result.seq != self.expected_seq {
                log::error!(
                    "Inference result out of order: got frame {}, expected {}",
                    result.seq,
                    self.expected_seq
                );
            }
            self.expected_seq = result.seq + 1;

            if result.generation == self.generation {
                self.in_flight = self.in_flight.saturating_sub(1);
                apply(&result);
                polled.applied += 1;
            } else {
                self.stale_in_flight = self.stale_in_flight.saturating_sub(1);
                polled.stale += 1;
            }
            self.recycle(result.samples);
        }
        polled
    }

    /// Start a new session: the in-flight counter reads zero and results of
    /// frames submitted so far will be discarded on arrival.
    pub fn reset_session(&mut self) {
        self.generation = next_generation(&self.generations);
        self.stale_in_flight += self.in_flight;
        self.in_flight = 0;
    }
}

fn next_generation(counter: &AtomicU32) -> u32 {
    counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negotiate::TensorBinding;
    use crate::ModelDescription;
    use std::collections::HashMap;

    const FRAME: usize = 8;
    const STATE: usize = 4;

    #[derive(Clone, Copy)]
    enum Mode {
        Scale(f32),
        WrongLength,
        Fail,
    }

    /// Scales audio; adds 1.0 to every state value per call.
    struct TestSession {
        mode: Mode,
    }

    impl InferenceSession for TestSession {
        fn describe(&self) -> ModelDescription {
            ModelDescription::default()
        }

        fn run(&mut self, feeds: Vec<(&str, TensorData)>) -> Result<HashMap<String, TensorData>> {
            let feeds: HashMap<&str, TensorData> = feeds.into_iter().collect();
            let audio = &feeds["audio"];
            let mut out = HashMap::new();
            let data = match self.mode {
                Mode::Scale(g) => audio.data.iter().map(|s| s * g).collect(),
                Mode::WrongLength => vec![0.5; FRAME - 1],
                Mode::Fail => return Err(DfError::Inference("boom".into())),
            };
            out.insert("enhanced".to_string(), TensorData::new(vec![data.len()], data));
            if let Some(state) = feeds.get("state") {
                let next = state.data.iter().map(|v| v + 1.0).collect();
                out.insert("next_state".to_string(), TensorData::new(vec![STATE], next));
            }
            Ok(out)
        }
    }

    fn io(stateful: bool) -> IoSpec {
        IoSpec {
            audio_in: TensorBinding::new("audio", &[FRAME]),
            state_in: stateful.then(|| TensorBinding::new("state", &[STATE])),
            atten_in: None,
            audio_out: "enhanced".to_string(),
            state_out: stateful.then(|| "next_state".to_string()),
            frame_size: FRAME,
            state_size: if stateful { STATE } else { 0 },
        }
    }

    fn setup(mode: Mode, stateful: bool, max_in_flight: usize) -> (InferenceWorker, EngineLink, InferenceBridge) {
        let (worker, link) = InferenceWorker::new(Box::new(TestSession { mode }), io(stateful), 0.0, 16);
        let bridge = link.bridge(max_in_flight);
        (worker, link, bridge)
    }

    fn frame(bridge: &mut InferenceBridge, value: f32) -> Vec<f32> {
        let mut buf = bridge.acquire_buffer();
        buf.fill(value);
        buf
    }

    fn collect(bridge: &mut InferenceBridge) -> Vec<(u64, Vec<f32>, bool)> {
        let mut got = Vec::new();
        bridge.poll_results(|r| got.push((r.seq, r.samples.clone(), r.passthrough)));
        got
    }

    #[test]
    fn test_burst_never_exceeds_max_in_flight() {
        let (mut worker, _link, mut bridge) = setup(Mode::Scale(1.0), false, 3);
        let mut accepted = 0;
        for i in 0..10 {
            let buf = frame(&mut bridge, i as f32);
            if bridge.submit(buf).is_ok() {
                accepted += 1;
            }
            assert!(bridge.in_flight() <= 3);
        }
        assert_eq!(accepted, 3);
        assert_eq!(worker.process_pending(), 3);
        let got = collect(&mut bridge);
        assert_eq!(got.iter().map(|r| r.0).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(bridge.in_flight(), 0);
        assert!(bridge.has_capacity());
    }

    #[test]
    fn test_results_keep_submission_order() {
        let (mut worker, _link, mut bridge) = setup(Mode::Scale(0.5), false, 4);
        for i in 0..4 {
            let buf = frame(&mut bridge, i as f32 / 10.0);
            assert_eq!(bridge.submit(buf), Ok(i));
        }
        worker.process_pending();
        let got = collect(&mut bridge);
        for (i, (seq, samples, passthrough)) in got.into_iter().enumerate() {
            assert_eq!(seq, i as u64);
            assert!(!passthrough);
            assert_eq!(samples, vec![i as f32 / 20.0; FRAME]);
        }
    }

    #[test]
    fn test_wrong_length_output_passes_input_through() {
        let (mut worker, _link, mut bridge) = setup(Mode::WrongLength, false, 2);
        let buf = frame(&mut bridge, 0.25);
        bridge.submit(buf).unwrap();
        worker.process_pending();
        let got = collect(&mut bridge);
        assert_eq!(got, vec![(0, vec![0.25; FRAME], true)]);
        assert_eq!(worker.failures(), 1);
    }

    #[test]
    fn test_engine_error_passes_input_through() {
        let (mut worker, _link, mut bridge) = setup(Mode::Fail, true, 2);
        let buf = frame(&mut bridge, -0.75);
        bridge.submit(buf).unwrap();
        worker.process_pending();
        assert_eq!(collect(&mut bridge), vec![(0, vec![-0.75; FRAME], true)]);
        // A failed run must not disturb the recurrent state.
        assert_eq!(worker.model_state(), Some(&[0.0; STATE][..]));
    }

    #[test]
    fn test_state_carried_between_frames_and_reset() {
        let (mut worker, link, mut bridge) = setup(Mode::Scale(1.0), true, 4);
        for _ in 0..3 {
            let buf = frame(&mut bridge, 0.1);
            bridge.submit(buf).unwrap();
        }
        worker.process_pending();
        assert_eq!(worker.model_state(), Some(&[3.0; STATE][..]));

        assert!(link.reset_state());
        worker.process_pending();
        assert_eq!(worker.model_state(), Some(&[0.0; STATE][..]));
    }

    #[test]
    fn test_new_session_starts_from_zeroed_state() {
        let (mut worker, _link, mut bridge) = setup(Mode::Scale(1.0), true, 4);
        for _ in 0..2 {
            let buf = frame(&mut bridge, 0.1);
            bridge.submit(buf).unwrap();
        }
        worker.process_pending();
        bridge.poll_results(|_| {});
        assert_eq!(worker.model_state(), Some(&[2.0; STATE][..]));

        bridge.reset_session();
        let buf = frame(&mut bridge, 0.1);
        bridge.submit(buf).unwrap();
        worker.process_pending();
        assert_eq!(worker.model_state(), Some(&[1.0; STATE][..]));
    }

    #[test]
    fn test_bridges_of_one_link_never_share_a_generation() {
        let (_worker, link, bridge) = setup(Mode::Scale(1.0), false, 1);
        let mut other = link.bridge(1);
        assert_ne!(bridge.generation(), other.generation());
        other.reset_session();
        assert_ne!(bridge.generation(), other.generation());
    }

    #[test]
    fn test_output_is_clamped_and_sanitised() {
        let (mut worker, _link, _bridge) = setup(Mode::Scale(4.0), false, 1);
        let mut input = vec![0.1f32; FRAME];
        input[0] = 0.5;
        input[1] = -0.5;
        input[2] = f32::NAN;
        let out = worker.infer(&input).unwrap();
        assert_eq!(out[0], 1.0);
        assert_eq!(out[1], -1.0);
        assert_eq!(out[2], 0.0);
        assert!((out[3] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_stale_results_release_capacity_but_are_not_applied() {
        let (mut worker, _link, mut bridge) = setup(Mode::Scale(1.0), false, 2);
        for _ in 0..2 {
            let buf = frame(&mut bridge, 0.3);
            bridge.submit(buf).unwrap();
        }
        bridge.reset_session();
        assert_eq!(bridge.in_flight(), 0);
        assert!(!bridge.has_capacity(), "stale frames still occupy slots");

        worker.process_pending();
        let mut applied = 0;
        let polled = bridge.poll_results(|_| applied += 1);
        assert_eq!(applied, 0);
        assert_eq!(polled, Polled { applied: 0, stale: 2 });
        assert_eq!(bridge.outstanding(), 0);
        assert!(bridge.has_capacity());
    }

    #[test]
    fn test_submit_to_stopped_worker_returns_samples() {
        let (worker, _link, mut bridge) = setup(Mode::Scale(1.0), false, 2);
        drop(worker);
        let buf = frame(&mut bridge, 0.9);
        let rejected = bridge.submit(buf).unwrap_err();
        assert_eq!(rejected, SubmitError::Disconnected(vec![0.9; FRAME]));
        assert_eq!(bridge.in_flight(), 0);
    }

    #[test]
    fn test_full_job_queue_hands_frame_back_as_busy() {
        let session = Box::new(TestSession { mode: Mode::Scale(1.0) });
        let (mut worker, link) = InferenceWorker::new(session, io(false), 0.0, 1);
        let mut bridge = link.bridge(4);
        let buf = frame(&mut bridge, 0.1);
        assert_eq!(bridge.submit(buf), Ok(0));
        let buf = frame(&mut bridge, 0.2);
        let rejected = bridge.submit(buf).unwrap_err();
        assert_eq!(rejected, SubmitError::Busy(vec![0.2; FRAME]));
        assert_eq!(bridge.in_flight(), 1);

        worker.process_pending();
        let buf = frame(&mut bridge, 0.2);
        assert_eq!(bridge.submit(buf), Ok(1));
    }

    #[test]
    fn test_warmup_leaves_state_clean() {
        let (mut worker, _link, _bridge) = setup(Mode::Scale(1.0), true, 1);
        worker.warmup(3).unwrap();
        assert_eq!(worker.model_state(), Some(&[0.0; STATE][..]));
    }

    #[test]
    fn test_shutdown_stops_run_loop() {
        let (worker, link, _bridge) = setup(Mode::Scale(1.0), false, 1);
        let handle = worker.spawn().unwrap();
        assert!(link.shutdown());
        handle.join().unwrap();
    }
}
