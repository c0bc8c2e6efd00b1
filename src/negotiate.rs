//! I/O capability negotiation.
//!
//! Maps the tensors a model declares onto the roles the pipeline needs:
//!
//! | Role        | Direction | Recognised as                                   |
//! |-------------|-----------|-------------------------------------------------|
//! | audio-in    | input     | 1-D float, size in [`FRAME_RANGE`]              |
//! | state-in    | input     | 1-D float, size above [`FRAME_RANGE`]           |
//! | atten-in    | input     | float scalar (0-D or a single element)          |
//! | audio-out   | output    | 1-D float whose size equals the frame size      |
//! | state-out   | output    | 1-D float whose size equals the state size      |
//!
//! "1-D" means exactly one non-unit dimension, so `[480]` and `[1, 480]` are
//! both frame-shaped. Tensors with dynamic dimensions are never classified.
//!
//! [`negotiate`] is pure and runs once per engine initialisation. When the
//! description is missing or ambiguous, [`negotiate_or_default`] falls back to
//! [`IoSpec::default_model`], the mapping of the shipped DeepFilterNet3
//! streaming export.

use std::fmt;
use std::ops::RangeInclusive;
use thiserror::Error;

/// Plausible frame sizes (samples).
pub const FRAME_RANGE: RangeInclusive<usize> = 16..=4096;

/// Frame size of the shipped DeepFilterNet3 streaming model (10 ms @ 48 kHz).
pub const DEFAULT_FRAME_SIZE: usize = 480;
/// Recurrent state length of the shipped DeepFilterNet3 streaming model.
pub const DEFAULT_STATE_SIZE: usize = 45304;

/// Element type of a model tensor, as far as negotiation cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorType {
    Float16,
    Float32,
    Float64,
    Int32,
    Int64,
    Bool,
    Other,
}

impl TensorType {
    pub fn is_float(self) -> bool {
        matches!(self, TensorType::Float16 | TensorType::Float32 | TensorType::Float64)
    }
}

/// One declared input or output. `None` dimensions are dynamic.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorInfo {
    pub name: String,
    pub shape: Vec<Option<usize>>,
    pub dtype: TensorType,
}

impl TensorInfo {
    pub fn new(name: impl Into<String>, shape: &[usize], dtype: TensorType) -> Self {
        Self {
            name: name.into(),
            shape: shape.iter().map(|&d| Some(d)).collect(),
            dtype,
        }
    }

    /// Shape with every dimension known, or `None` when any is dynamic.
    fn static_shape(&self) -> Option<Vec<usize>> {
        self.shape.iter().copied().collect()
    }

    fn geometry(&self) -> Option<Geometry> {
        if !self.dtype.is_float() {
            return None;
        }
        let shape = self.static_shape()?;
        let mut non_unit = shape.iter().copied().filter(|&d| d != 1);
        match (non_unit.next(), non_unit.next()) {
            (None, _) => Some(Geometry::Scalar),
            (Some(n), None) => Some(Geometry::Vector(n)),
            _ => Some(Geometry::Other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Geometry {
    Scalar,
    Vector(usize),
    Other,
}

/// What the engine reports about a loaded model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelDescription {
    pub inputs: Vec<TensorInfo>,
    pub outputs: Vec<TensorInfo>,
}

/// A named tensor plus the exact shape it must be fed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorBinding {
    pub name: String,
    pub shape: Vec<usize>,
}

impl TensorBinding {
    pub fn new(name: &str, shape: &[usize]) -> Self {
        Self {
            name: name.to_string(),
            shape: shape.to_vec(),
        }
    }

    fn from_info(info: &TensorInfo) -> Self {
        Self {
            name: info.name.clone(),
            shape: info.static_shape().unwrap_or_default(),
        }
    }
}

/// Negotiated role mapping. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct IoSpec {
    pub audio_in: TensorBinding,
    pub state_in: Option<TensorBinding>,
    pub atten_in: Option<TensorBinding>,
    pub audio_out: String,
    pub state_out: Option<String>,
    pub frame_size: usize,
    /// Zero for stateless models.
    pub state_size: usize,
}

impl IoSpec {
    /// Role mapping of the DeepFilterNet3 streaming export shipped with the system.
    pub fn default_model() -> Self {
        Self {
            audio_in: TensorBinding::new("input_frame", &[DEFAULT_FRAME_SIZE]),
            state_in: Some(TensorBinding::new("states", &[DEFAULT_STATE_SIZE])),
            atten_in: Some(TensorBinding::new("atten_lim_db", &[])),
            audio_out: "enhanced_audio_frame".to_string(),
            state_out: Some("new_states".to_string()),
            frame_size: DEFAULT_FRAME_SIZE,
            state_size: DEFAULT_STATE_SIZE,
        }
    }

    pub fn is_stateful(&self) -> bool {
        self.state_in.is_some() && self.state_out.is_some() && self.state_size > 0
    }
}

impl fmt::Display for IoSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} (frame {})", self.audio_in.name, self.audio_out, self.frame_size)?;
        if let (Some(si), Some(so)) = (&self.state_in, &self.state_out) {
            write!(f, ", state {} -> {} ({})", si.name, so, self.state_size)?;
        }
        if let Some(a) = &self.atten_in {
            write!(f, ", atten {}", a.name)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("model declares no inputs or outputs")]
    MissingMetadata,
    #[error("no frame-sized float input")]
    NoAudioInput,
    #[error("more than one candidate for {role}: {candidates:?}")]
    AmbiguousRole { role: &'static str, candidates: Vec<String> },
    #[error("no float output of frame size {frame_size}")]
    NoAudioOutput { frame_size: usize },
    #[error("state input '{input}' ({size}) has no output of the same length")]
    StateMismatch { input: String, size: usize },
}

fn single<'a>(
    role: &'static str,
    candidates: Vec<&'a TensorInfo>,
) -> Result<Option<&'a TensorInfo>, NegotiationError> {
    match candidates.len() {
        0 => Ok(None),
        1 => Ok(Some(candidates[0])),
        _ => Err(NegotiationError::AmbiguousRole {
            role,
            candidates: candidates.iter().map(|t| t.name.clone()).collect(),
        }),
    }
}

fn vectors_where<'a>(
    tensors: &'a [TensorInfo],
    pred: impl Fn(usize) -> bool,
) -> Vec<&'a TensorInfo> {
    tensors
        .iter()
        .filter(|t| matches!(t.geometry(), Some(Geometry::Vector(n)) if pred(n)))
        .collect()
}

fn vector_len(info: &TensorInfo) -> usize {
    match info.geometry() {
        Some(Geometry::Vector(n)) => n,
        _ => 0,
    }
}

/// Assign pipeline roles to the tensors of `desc`.
pub fn negotiate(desc: &ModelDescription) -> Result<IoSpec, NegotiationError> {
    if desc.inputs.is_empty() || desc.outputs.is_empty() {
        return Err(NegotiationError::MissingMetadata);
    }

    let audio_in = single("audio-in", vectors_where(&desc.inputs, |n| FRAME_RANGE.contains(&n)))?
        .ok_or(NegotiationError::NoAudioInput)?;
    let frame_size = vector_len(audio_in);

    let state_in = single("state-in", vectors_where(&desc.inputs, |n| n > *FRAME_RANGE.end()))?;
    let state_size = state_in.map(vector_len).unwrap_or(0);

    let scalars: Vec<&TensorInfo> = desc
        .inputs
        .iter()
        .filter(|t| t.geometry() == Some(Geometry::Scalar))
        .collect();
    let atten_in = single("attenuation-in", scalars)?;

    let audio_out = single("audio-out", vectors_where(&desc.outputs, |n| n == frame_size))?
        .ok_or(NegotiationError::NoAudioOutput { frame_size })?;

    let state_out = match state_in {
        Some(si) => Some(
            single("state-out", vectors_where(&desc.outputs, |n| n == state_size))?.ok_or_else(
                || NegotiationError::StateMismatch {
                    input: si.name.clone(),
                    size: state_size,
                },
            )?,
        ),
        None => None,
    };

    Ok(IoSpec {
        audio_in: TensorBinding::from_info(audio_in),
        state_in: state_in.map(TensorBinding::from_info),
        atten_in: atten_in.map(TensorBinding::from_info),
        audio_out: audio_out.name.clone(),
        state_out: state_out.map(|t| t.name.clone()),
        frame_size,
        state_size,
    })
}

/// [`negotiate`], falling back to [`IoSpec::default_model`] on failure.
pub fn negotiate_or_default(desc: &ModelDescription) -> IoSpec {
    match negotiate(desc) {
        Ok(spec) => {
            log::debug!("Negotiated model I/O: {}", spec);
            spec
        }
        Err(e) => {
            let spec = IoSpec::default_model();
            log::warn!("I/O negotiation failed ({}), using default mapping: {}", e, spec);
            spec
        }
    }
}
