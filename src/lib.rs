//! # denoise-rt
//!
//! Streaming speech denoising for live playback. Audio from a render callback
//! is cut into fixed-size frames, sent to a neural inference engine on its own
//! thread, and the enhanced frames are stitched back into the output stream
//! without ever blocking the audio thread.
//!
//! ## Quick Start
//!
//! ```ignore
//! use denoise_rt::{DenoiseConfig, EngineController, OrtSessionFactory};
//!
//! let config = DenoiseConfig::default();
//! let factory = OrtSessionFactory::from_config(&config);
//! let mut engine = EngineController::new(config, Box::new(factory));
//! engine.init(Path::new("models/dfn3_streaming"), 48_000)?;
//! engine.attach(player.clone())?;   // any `PlaybackGraph`
//! engine.set_enabled(true);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! render callback ─► DenoiseNode::process
//!                      │ FrameScheduler (downmix, input ring, drop-oldest)
//!                      │   └─► InferenceBridge::submit ──(bounded channel)──► InferenceWorker
//!                      │                                                      (session.run, model state)
//!                      │   ◄── InferenceBridge::poll_results ◄──(bounded channel)──┘
//!                      └ PlaybackStitcher (output ring, warmup, underrun) ─► output
//! ```
//!
//! [`EngineController`] owns the lifecycle: backend selection with fallback,
//! I/O negotiation, attaching the node to a playback graph, enable/disable,
//! and teardown.
//!
//! ## Real-time Guarantees
//!
//! [`DenoiseNode::process`] performs no locking and, in steady state, no heap
//! allocation: ring buffers and the downmix scratch are preallocated, frame
//! buffers are pooled and recycled from results, and every cross-thread
//! operation is a non-blocking `try_send`/`try_recv`/`pop`.
//!
//! ## Models
//!
//! Any model whose tensors can be negotiated (see [`negotiate`]) works. The
//! reference model is the DeepFilterNet3 streaming export (480-sample frames at
//! 48 kHz, 45304-float recurrent state).
//!
//! ## Logging
//!
//! This crate uses the `log` crate. Nothing is logged from the audio callback;
//! real-time observations are exposed as [`NodeStats`] counters.

pub mod bridge;
pub mod config;
pub mod controller;
pub mod engine;
pub mod negotiate;
pub mod node;
pub mod ring;
pub mod scheduler;
pub mod stitcher;

#[cfg(feature = "onnx")]
pub mod ort_backend;

pub use bridge::{AudioFrame, EngineLink, FrameResult, InferenceBridge, InferenceWorker, ModelState, SubmitError};
pub use config::DenoiseConfig;
pub use controller::{EngineController, EngineStatus, HandleId, PlaybackGraph, StatusHandle};
pub use engine::{Backend, BackendAttempt, InferenceSession, SessionFactory, TensorData};
pub use negotiate::{IoSpec, ModelDescription, NegotiationError, TensorInfo, TensorType};
pub use node::{DenoiseNode, NodeCommand, NodeOptions, NodePort, NodeStats, StatsSnapshot};
pub use ring::RingBuffer;
pub use scheduler::FrameScheduler;
pub use stitcher::{PlaybackStitcher, Rendered};

#[cfg(feature = "onnx")]
pub use ort_backend::OrtSessionFactory;

use thiserror::Error;

/// Sample rate the reference model was trained for.
pub const MODEL_SAMPLE_RATE: u32 = 48_000;

#[derive(Error, Debug)]
pub enum DfError {
    #[cfg(feature = "onnx")]
    #[error("ONNX runtime error: {0}")]
    Onnx(#[from] ort::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config error: {0}")]
    Config(String),
    #[error("No inference backend available: {0}")]
    BackendUnavailable(String),
    #[error("I/O negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),
    #[error("Engine not ready (status: {0})")]
    NotReady(String),
    #[error("Invalid playback handle: {0}")]
    InvalidHandle(String),
    #[error("Engine is in a failed state, create a new controller: {0}")]
    Terminal(String),
    #[error("Inference error: {0}")]
    Inference(String),
}

pub type Result<T> = std::result::Result<T, DfError>;

/// Number of samples covering `ms` milliseconds at `sample_rate`, rounded down.
pub fn ms_to_samples(ms: u32, sample_rate: u32) -> usize {
    (ms as u64 * sample_rate as u64 / 1000) as usize
}

// The node moves to the audio thread, the worker to the inference thread.
fn _assert_send<T: Send>() {}
fn _assert_thread_crossing_types_are_send() {
    _assert_send::<DenoiseNode>();
    _assert_send::<InferenceWorker>();
    _assert_send::<EngineController>();
}
