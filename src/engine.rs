//! Contract with the external inference engine.
//!
//! The pipeline never looks inside the engine. It needs three things:
//! a way to create a session on a given [`Backend`] ([`SessionFactory`]),
//! the session's declared tensors ([`InferenceSession::describe`]) and a
//! name→tensor request/response call ([`InferenceSession::run`]).
//!
//! Backend selection is an ordered list of named strategies. Each one is
//! tried in turn and its outcome recorded, so a total failure can report why
//! every backend was rejected.

use crate::negotiate::ModelDescription;
use crate::{DfError, Result};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Compute path used to run the model, most preferred first in the default order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// NVIDIA CUDA (accelerated parallel compute).
    Cuda,
    /// Apple CoreML (accelerated graphics/neural engine).
    CoreMl,
    /// Android NNAPI (accelerated graphics/NPU).
    Nnapi,
    /// Portable CPU execution.
    Cpu,
}

impl Backend {
    /// Default preference: accelerated-parallel → accelerated-graphics → portable.
    pub const DEFAULT_ORDER: [Backend; 4] = [Backend::Cuda, Backend::CoreMl, Backend::Nnapi, Backend::Cpu];

    pub fn id(&self) -> &'static str {
        match self {
            Backend::Cuda => "cuda",
            Backend::CoreMl => "coreml",
            Backend::Nnapi => "nnapi",
            Backend::Cpu => "cpu",
        }
    }

    pub fn is_accelerated(&self) -> bool {
        !matches!(self, Backend::Cpu)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Backend {
    type Err = DfError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cuda" => Ok(Backend::Cuda),
            "coreml" => Ok(Backend::CoreMl),
            "nnapi" => Ok(Backend::Nnapi),
            "cpu" => Ok(Backend::Cpu),
            other => Err(DfError::Config(format!("unknown backend '{}'", other))),
        }
    }
}

/// Dense `f32` tensor exchanged with the engine.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TensorData {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl TensorData {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self { shape, data }
    }

    pub fn scalar(value: f32) -> Self {
        Self {
            shape: Vec::new(),
            data: vec![value],
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A loaded model, ready to run. Lives on the inference thread.
pub trait InferenceSession: Send {
    /// Declared inputs and outputs of the model.
    fn describe(&self) -> ModelDescription;

    /// Run one request. Outputs are keyed by tensor name.
    fn run(&mut self, feeds: Vec<(&str, TensorData)>) -> Result<HashMap<String, TensorData>>;
}

/// Creates sessions for a model on a specific backend.
pub trait SessionFactory: Send {
    fn create_session(&self, model: &Path, backend: Backend) -> Result<Box<dyn InferenceSession>>;
}

/// Outcome of trying one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendAttempt {
    pub backend: Backend,
    /// `None` on success, the failure reason otherwise.
    pub error: Option<String>,
}

/// A session acquired from the first backend that worked.
pub struct Acquired {
    pub backend: Backend,
    pub session: Box<dyn InferenceSession>,
    pub attempts: Vec<BackendAttempt>,
}

impl fmt::Debug for Acquired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acquired")
            .field("backend", &self.backend)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

/// Join failed attempts into one human-readable diagnostic.
pub fn summarize_attempts(attempts: &[BackendAttempt]) -> String {
    if attempts.is_empty() {
        return "no backends configured".to_string();
    }
    attempts
        .iter()
        .filter_map(|a| a.error.as_ref().map(|e| format!("{}: {}", a.backend, e)))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Try `preferences` in order, stopping at the first backend that yields a session.
pub fn acquire_session(
    factory: &dyn SessionFactory,
    model: &Path,
    preferences: &[Backend],
) -> std::result::Result<Acquired, Vec<BackendAttempt>> {
    let mut attempts = Vec::with_capacity(preferences.len());
    for &backend in preferences {
        match factory.create_session(model, backend) {
            Ok(session) => {
                attempts.push(BackendAttempt { backend, error: None });
                log::info!("Inference backend '{}' selected for {}", backend, model.display());
                return Ok(Acquired {
                    backend,
                    session,
                    attempts,
                });
            }
            Err(e) => {
                log::warn!("Inference backend '{}' unavailable: {}", backend, e);
                attempts.push(BackendAttempt {
                    backend,
                    error: Some(e.to_string()),
                });
            }
        }
    }
    Err(attempts)
}
