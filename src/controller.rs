//! Engine lifecycle: backend selection, I/O negotiation, attach/detach,
//! enable/disable and teardown.
//!
//! ```text
//!            init()                       spawn ok
//!   Idle ───────────► LoadingModel ─────────────────► Ready
//!    ▲                      │ every backend failed      │
//!    │                      ▼                           │
//!    │                    Error (terminal)              │
//!    └──────────────────── dispose() ───────────────────┘
//! ```

use crate::bridge::{EngineLink, InferenceWorker};
use crate::config::DenoiseConfig;
use crate::engine::{acquire_session, summarize_attempts, Backend, SessionFactory};
use crate::negotiate::{negotiate_or_default, IoSpec};
use crate::node::{DenoiseNode, NodeOptions, NodePort, StatsSnapshot};
use crate::{DfError, Result, MODEL_SAMPLE_RATE};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Identifies a playback graph across attach calls.
pub type HandleId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    Idle,
    LoadingModel,
    Ready { backend: Backend, frame_size: usize },
    /// Terminal for this controller; create a new one to retry.
    Error { message: String },
}

impl EngineStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, EngineStatus::Ready { .. })
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineStatus::Idle => f.write_str("idle"),
            EngineStatus::LoadingModel => f.write_str("loading model"),
            EngineStatus::Ready { backend, frame_size } => {
                write!(f, "ready ({}, {} samples/frame)", backend, frame_size)
            }
            EngineStatus::Error { message } => write!(f, "error: {}", message),
        }
    }
}

/// Read-only view of a controller's status, usable from other threads.
#[derive(Debug, Clone)]
pub struct StatusHandle(Arc<RwLock<EngineStatus>>);

impl StatusHandle {
    fn new() -> Self {
        Self(Arc::new(RwLock::new(EngineStatus::Idle)))
    }

    pub fn get(&self) -> EngineStatus {
        self.0.read().clone()
    }

    fn set(&self, status: EngineStatus) {
        log::info!("Denoise engine: {}", status);
        *self.0.write() = status;
    }
}

/// A live audio graph the denoiser can be spliced into.
///
/// The graph owns the installed [`DenoiseNode`] and calls
/// [`DenoiseNode::process`] from its render callback while the tap is
/// connected.
pub trait PlaybackGraph: Send + Sync {
    fn handle_id(&self) -> HandleId;

    /// The graph's audio context is still running.
    fn is_live(&self) -> bool;

    fn sample_rate(&self) -> u32;

    fn output_channels(&self) -> usize;

    /// Take ownership of the tap node. Called at most once per graph by a
    /// controller, including across dispose and re-init.
    fn create_tap(&self, node: DenoiseNode) -> Result<()>;

    /// Route playback through the tap.
    fn connect_tap(&self) -> Result<()>;

    /// Route playback around the tap. Must be safe to call when not connected.
    fn disconnect_tap(&self);
}

struct Tap {
    graph: Arc<dyn PlaybackGraph>,
    port: NodePort,
    /// Engine the tap's node is bound to.
    engine: u64,
}

pub struct EngineController {
    config: DenoiseConfig,
    factory: Box<dyn SessionFactory>,
    status: StatusHandle,
    io: Option<IoSpec>,
    link: Option<EngineLink>,
    worker: Option<JoinHandle<()>>,
    taps: HashMap<HandleId, Tap>,
    current: Option<HandleId>,
    enabled: bool,
    /// Bumped by every successful init.
    engine: u64,
}

impl EngineController {
    pub fn new(config: DenoiseConfig, factory: Box<dyn SessionFactory>) -> Self {
        Self {
            config,
            factory,
            status: StatusHandle::new(),
            io: None,
            link: None,
            worker: None,
            taps: HashMap::new(),
            current: None,
            enabled: false,
            engine: 0,
        }
    }

    pub fn config(&self) -> &DenoiseConfig {
        &self.config
    }

    pub fn status(&self) -> EngineStatus {
        self.status.get()
    }

    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    /// Negotiated tensor mapping, once ready.
    pub fn io_spec(&self) -> Option<&IoSpec> {
        self.io.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn attached(&self) -> Option<HandleId> {
        self.current
    }

    /// Counters of the attached tap.
    pub fn stats(&self) -> Option<StatsSnapshot> {
        self.current
            .and_then(|id| self.taps.get(&id))
            .map(|tap| tap.port.stats())
    }

    /// Load `model`, pick a backend and start the inference thread.
    pub fn init(&mut self, model: &Path, sample_rate: u32) -> Result<()> {
        match self.status() {
            EngineStatus::Idle => {}
            EngineStatus::Error { message } => return Err(DfError::Terminal(message)),
            other => {
                return Err(DfError::Config(format!(
                    "init requires an idle engine, status is {}",
                    other
                )))
            }
        }
        self.config.validate()?;
        self.status.set(EngineStatus::LoadingModel);

        let acquired = match acquire_session(self.factory.as_ref(), model, &self.config.backends) {
            Ok(acquired) => acquired,
            Err(attempts) => {
                let message = summarize_attempts(&attempts);
                log::error!("No usable inference backend for {}: {}", model.display(), message);
                self.status.set(EngineStatus::Error {
                    message: message.clone(),
                });
                return Err(DfError::BackendUnavailable(message));
            }
        };
        let backend = acquired.backend;

        let io = negotiate_or_default(&acquired.session.describe());
        log::info!("Model I/O: {}", io);
        if sample_rate != MODEL_SAMPLE_RATE {
            log::warn!(
                "Stream runs at {} Hz but the model expects {} Hz; output quality will suffer",
                sample_rate,
                MODEL_SAMPLE_RATE
            );
        }

        // Room for every tap's in-flight frames plus control messages.
        let queue_capacity = self.config.max_in_flight * 4 + 4;
        let (mut worker, link) =
            InferenceWorker::new(acquired.session, io.clone(), self.config.atten_lim_db, queue_capacity);
        if self.config.engine_warmup_runs > 0 {
            if let Err(e) = worker.warmup(self.config.engine_warmup_runs) {
                log::warn!("Engine warmup failed: {}", e);
            }
        }

        let handle = match worker.spawn() {
            Ok(handle) => handle,
            Err(e) => {
                self.status.set(EngineStatus::Error {
                    message: format!("failed to start inference thread: {}", e),
                });
                return Err(DfError::Io(e));
            }
        };

        let frame_size = io.frame_size;
        self.io = Some(io);
        self.link = Some(link);
        self.worker = Some(handle);
        self.engine += 1;
        self.status.set(EngineStatus::Ready { backend, frame_size });
        Ok(())
    }

    /// Splice the denoiser into `graph`.
    ///
    /// Re-attaching the current graph is a no-op; attaching another graph
    /// detaches the current one once the new one is wired. A graph gets its
    /// tap node once and keeps it across detach/attach cycles and across
    /// dispose and re-init. If wiring fails the previous attachment is left
    /// as it was.
    pub fn attach(&mut self, graph: Arc<dyn PlaybackGraph>) -> Result<()> {
        let status = self.status();
        let (link, frame_size) = match (&status, &self.link) {
            (EngineStatus::Ready { frame_size, .. }, Some(link)) => (link.clone(), *frame_size),
            _ => return Err(DfError::NotReady(status.to_string())),
        };
        let id = graph.handle_id();
        if !graph.is_live() {
            return Err(DfError::InvalidHandle(format!("playback handle {} is not live", id)));
        }
        if self.current == Some(id) {
            return Ok(());
        }

        if self.taps.get(&id).is_some_and(|tap| tap.port.is_abandoned()) {
            log::debug!("Tap for playback handle {} was dropped by the host, recreating", id);
            self.taps.remove(&id);
        }
        match self.taps.get_mut(&id) {
            Some(tap) if tap.engine != self.engine => {
                tap.port.rebind(link.bridge(self.config.max_in_flight));
                tap.engine = self.engine;
                log::debug!("Rebound tap of playback handle {} to the current engine", id);
            }
            Some(_) => {}
            None => {
                let sample_rate = graph.sample_rate();
                let options = NodeOptions {
                    frame_size,
                    max_in_flight: self.config.max_in_flight,
                    sample_rate,
                    ring_capacity: self.config.ring_capacity(sample_rate, frame_size),
                };
                let (node, port) = DenoiseNode::new(options, link.bridge(self.config.max_in_flight));
                graph.create_tap(node)?;
                log::info!(
                    "Created denoise tap for playback handle {} ({} Hz, {} channels)",
                    id,
                    sample_rate,
                    graph.output_channels()
                );
                self.taps.insert(
                    id,
                    Tap {
                        graph: Arc::clone(&graph),
                        port,
                        engine: self.engine,
                    },
                );
            }
        }

        graph.connect_tap()?;
        self.detach();
        self.current = Some(id);
        if self.enabled {
            self.send_enable();
        }
        Ok(())
    }

    /// Disable and disconnect the attached tap. The tap stays cached.
    pub fn detach(&mut self) {
        if let Some(id) = self.current.take() {
            if let Some(tap) = self.taps.get_mut(&id) {
                tap.port.disable();
                tap.graph.disconnect_tap();
            }
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled == self.enabled {
            return;
        }
        self.enabled = enabled;
        if enabled {
            self.send_enable();
        } else if let Some(tap) = self.current.and_then(|id| self.taps.get_mut(&id)) {
            tap.port.disable();
        }
    }

    /// Takes effect on the next enable.
    pub fn set_warmup_ms(&mut self, warmup_ms: u32) {
        self.config.warmup_ms = warmup_ms;
    }

    fn send_enable(&mut self) {
        let Some(tap) = self.current.and_then(|id| self.taps.get_mut(&id)) else {
            return;
        };
        if tap.port.is_enabled() {
            return;
        }
        if let Some(link) = &self.link {
            link.reset_state();
        }
        tap.port.enable(self.config.warmup_ms);
    }

    /// Disconnect every tap and stop the engine. Safe to call more than once.
    ///
    /// Taps stay cached, disabled, so a later [`init`](Self::init) and
    /// [`attach`](Self::attach) reuse them instead of asking the graph for a
    /// second node. Status goes back to `Idle` unless it is `Error`, which
    /// stays terminal.
    pub fn dispose(&mut self) {
        self.enabled = false;
        self.current = None;
        for tap in self.taps.values_mut() {
            tap.port.disable();
            tap.graph.disconnect_tap();
        }
        if let Some(link) = self.link.take() {
            link.shutdown();
        }
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("Inference thread panicked");
            }
        }
        self.io = None;
        if !matches!(self.status(), EngineStatus::Idle | EngineStatus::Error { .. }) {
            self.status.set(EngineStatus::Idle);
        }
    }
}

impl Drop for EngineController {
    fn drop(&mut self) {
        self.dispose();
    }
}
