//! Fakes shared by the integration tests.

#![allow(dead_code)]

use denoise_rt::{
    Backend, DenoiseNode, DfError, HandleId, InferenceSession, ModelDescription, PlaybackGraph, Result,
    SessionFactory, TensorData, TensorInfo, TensorType,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub const FRAME: usize = 480;
pub const STATE: usize = 1024 * 8;

/// DFN3-shaped description with a smaller state.
pub fn streaming_model() -> ModelDescription {
    ModelDescription {
        inputs: vec![
            TensorInfo::new("input_frame", &[FRAME], TensorType::Float32),
            TensorInfo::new("states", &[STATE], TensorType::Float32),
            TensorInfo::new("atten_lim_db", &[], TensorType::Float32),
        ],
        outputs: vec![
            TensorInfo::new("enhanced_audio_frame", &[FRAME], TensorType::Float32),
            TensorInfo::new("new_states", &[STATE], TensorType::Float32),
            TensorInfo::new("lsnr", &[1], TensorType::Float32),
        ],
    }
}

/// Scales the frame by `gain`; counts calls into every state value.
pub struct EchoSession {
    pub gain: f32,
}

impl InferenceSession for EchoSession {
    fn describe(&self) -> ModelDescription {
        streaming_model()
    }

    fn run(&mut self, feeds: Vec<(&str, TensorData)>) -> Result<HashMap<String, TensorData>> {
        let mut out = HashMap::new();
        for (name, tensor) in feeds {
            match name {
                "input_frame" => {
                    let data = tensor.data.iter().map(|s| s * self.gain).collect();
                    out.insert("enhanced_audio_frame".to_string(), TensorData::new(tensor.shape, data));
                }
                "states" => {
                    let data = tensor.data.iter().map(|v| v + 1.0).collect();
                    out.insert("new_states".to_string(), TensorData::new(tensor.shape, data));
                }
                _ => {}
            }
        }
        out.insert("lsnr".to_string(), TensorData::new(vec![1], vec![20.0]));
        Ok(out)
    }
}

/// Hands out echo sessions on the listed backends only, recording every request.
pub struct ScriptedFactory {
    pub works_on: Vec<Backend>,
    pub gain: f32,
    pub tried: Arc<Mutex<Vec<Backend>>>,
}

impl ScriptedFactory {
    pub fn new(works_on: &[Backend], gain: f32) -> Self {
        Self {
            works_on: works_on.to_vec(),
            gain,
            tried: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl SessionFactory for ScriptedFactory {
    fn create_session(&self, _model: &Path, backend: Backend) -> Result<Box<dyn InferenceSession>> {
        self.tried.lock().push(backend);
        if self.works_on.contains(&backend) {
            Ok(Box::new(EchoSession { gain: self.gain }))
        } else {
            Err(DfError::BackendUnavailable(format!("{} device not present", backend)))
        }
    }
}

/// A playback graph that renders on demand from the test thread.
pub struct FakeGraph {
    id: HandleId,
    live: AtomicBool,
    sample_rate: u32,
    channels: usize,
    node: Mutex<Option<DenoiseNode>>,
    connected: AtomicBool,
    taps_created: AtomicUsize,
    refuse_taps: AtomicBool,
    refuse_connect: AtomicBool,
}

impl FakeGraph {
    pub fn new(id: HandleId) -> Arc<Self> {
        Arc::new(Self {
            id,
            live: AtomicBool::new(true),
            sample_rate: 48_000,
            channels: 2,
            node: Mutex::new(None),
            connected: AtomicBool::new(false),
            taps_created: AtomicUsize::new(0),
            refuse_taps: AtomicBool::new(false),
            refuse_connect: AtomicBool::new(false),
        })
    }

    pub fn kill(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    /// Make `create_tap` fail, as a context out of node slots would.
    pub fn refuse_taps(&self, refuse: bool) {
        self.refuse_taps.store(refuse, Ordering::SeqCst);
    }

    pub fn refuse_connect(&self, refuse: bool) {
        self.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn taps_created(&self) -> usize {
        self.taps_created.load(Ordering::SeqCst)
    }

    /// One render callback: mono in, stereo out.
    pub fn render(&self, input: &[f32]) -> (Vec<f32>, Vec<f32>) {
        let mut left = vec![0.0; input.len()];
        let mut right = vec![0.0; input.len()];
        let mut node = self.node.lock();
        match node.as_mut() {
            Some(node) if self.is_connected() => {
                node.process(&[input], &mut [&mut left[..], &mut right[..]]);
            }
            _ => {
                left.copy_from_slice(input);
                right.copy_from_slice(input);
            }
        }
        (left, right)
    }
}

impl PlaybackGraph for FakeGraph {
    fn handle_id(&self) -> HandleId {
        self.id
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn output_channels(&self) -> usize {
        self.channels
    }

    fn create_tap(&self, node: DenoiseNode) -> Result<()> {
        if self.refuse_taps.load(Ordering::SeqCst) {
            return Err(DfError::InvalidHandle(format!("graph {} cannot create nodes", self.id)));
        }
        self.taps_created.fetch_add(1, Ordering::SeqCst);
        *self.node.lock() = Some(node);
        Ok(())
    }

    fn connect_tap(&self) -> Result<()> {
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(DfError::InvalidHandle(format!("graph {} refused the connection", self.id)));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn disconnect_tap(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// `n` samples of a rising ramp starting at `start`, all well inside ±1.
pub fn ramp(start: usize, n: usize) -> Vec<f32> {
    (start..start + n).map(|i| (i + 1) as f32 / 4096.0).collect()
}
