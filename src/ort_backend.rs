//! ONNX Runtime implementation of the engine contract.
//!
//! ONNX Runtime is loaded dynamically the first time a session is created.
//! The library is looked up in this order:
//!
//! 1. `ORT_DYLIB_PATH` environment variable
//! 2. the runtime downloaded by the build script
//! 3. the platform's default library search path
//!
//! Each [`Backend`] maps to one execution provider. Registration is strict:
//! if the provider cannot be registered the session is not created, so the
//! caller's fallback order decides what runs instead of a silent CPU fallback.

use crate::config::DenoiseConfig;
use crate::engine::{Backend, InferenceSession, SessionFactory, TensorData};
use crate::negotiate::{ModelDescription, TensorInfo, TensorType};
use crate::{DfError, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::tensor::TensorElementType;
use ort::value::{DynValue, Tensor, ValueType};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// File loaded when a model directory is given instead of a file.
pub const MODEL_FILE: &str = "combined.onnx";

#[cfg(target_os = "windows")]
const ORT_LIB_NAME: &str = "onnxruntime.dll";
#[cfg(target_os = "macos")]
const ORT_LIB_NAME: &str = "libonnxruntime.dylib";
#[cfg(all(not(target_os = "windows"), not(target_os = "macos")))]
const ORT_LIB_NAME: &str = "libonnxruntime.so";

static ORT_INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();

fn ort_library() -> PathBuf {
    if let Ok(path) = std::env::var("ORT_DYLIB_PATH") {
        return PathBuf::from(path);
    }
    if let Some(dir) = option_env!("DENOISE_ORT_LIB_DIR") {
        let bundled = Path::new(dir).join(ORT_LIB_NAME);
        if bundled.exists() {
            return bundled;
        }
    }
    PathBuf::from(ORT_LIB_NAME)
}

fn init_ort() -> Result<()> {
    let outcome = ORT_INIT.get_or_init(|| {
        let lib = ort_library();
        match ort::init_from(lib.to_string_lossy().as_ref()) {
            Ok(builder) => {
                let _ = builder.with_name("denoise").commit();
                log::debug!("ONNX Runtime loaded from {}", lib.display());
                Ok(())
            }
            Err(e) => Err(format!("Failed to load ONNX Runtime from '{}': {}", lib.display(), e)),
        }
    });
    outcome.clone().map_err(DfError::BackendUnavailable)
}

/// Resolve a model argument: directories hold [`MODEL_FILE`].
pub fn resolve_model_path(model: &Path) -> Result<PathBuf> {
    let path = if model.is_dir() {
        model.join(MODEL_FILE)
    } else {
        model.to_path_buf()
    };
    if !path.exists() {
        return Err(DfError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("model not found: {}", path.display()),
        )));
    }
    Ok(path)
}

/// Creates ONNX Runtime sessions.
#[derive(Debug, Clone)]
pub struct OrtSessionFactory {
    intra_threads: Option<usize>,
}

impl Default for OrtSessionFactory {
    fn default() -> Self {
        Self::new(Some(2))
    }
}

impl OrtSessionFactory {
    /// `intra_threads = None` lets ONNX Runtime pick (all cores). Real-time
    /// use wants 1-2 to keep latency jitter low.
    pub fn new(intra_threads: Option<usize>) -> Self {
        Self { intra_threads }
    }

    pub fn from_config(config: &DenoiseConfig) -> Self {
        Self::new(config.intra_threads)
    }

    fn build_session(&self, path: &Path, backend: Backend) -> Result<Session> {
        let mut builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
        if let Some(threads) = self.intra_threads {
            builder = builder.with_intra_threads(threads)?;
        }

        match backend {
            Backend::Cpu => {}
            Backend::Cuda => {
                #[cfg(feature = "cuda")]
                {
                    use ort::execution_providers::CUDAExecutionProvider;
                    let cuda = CUDAExecutionProvider::default();
                    builder = builder.with_execution_providers([cuda.build().error_on_failure()])?;
                    log::info!("CUDA execution provider registered");
                }
                #[cfg(not(feature = "cuda"))]
                return Err(not_compiled(backend));
            }
            Backend::CoreMl => {
                #[cfg(feature = "coreml")]
                {
                    use ort::execution_providers::CoreMLExecutionProvider;
                    let coreml = {
                        let ep = CoreMLExecutionProvider::default();
                        #[cfg(feature = "fp16")]
                        let ep = {
                            log::debug!("CoreML: low precision accumulation enabled");
                            ep.with_low_precision_accumulation_on_gpu(true)
                        };
                        ep
                    };
                    builder = builder.with_execution_providers([coreml.build().error_on_failure()])?;
                    log::info!("CoreML execution provider registered");
                }
                #[cfg(not(feature = "coreml"))]
                return Err(not_compiled(backend));
            }
            Backend::Nnapi => {
                #[cfg(feature = "nnapi")]
                {
                    use ort::execution_providers::NNAPIExecutionProvider;
                    let nnapi = {
                        let ep = NNAPIExecutionProvider::default();
                        #[cfg(feature = "fp16")]
                        let ep = {
                            log::debug!("NNAPI: fp16 relaxation enabled");
                            ep.with_fp16(true)
                        };
                        ep
                    };
                    builder = builder.with_execution_providers([nnapi.build().error_on_failure()])?;
                    log::info!("NNAPI execution provider registered");
                }
                #[cfg(not(feature = "nnapi"))]
                return Err(not_compiled(backend));
            }
        }

        Ok(builder.commit_from_file(path)?)
    }
}

#[allow(dead_code)]
fn not_compiled(backend: Backend) -> DfError {
    DfError::BackendUnavailable(format!("not compiled with {} support", backend))
}

impl SessionFactory for OrtSessionFactory {
    fn create_session(&self, model: &Path, backend: Backend) -> Result<Box<dyn InferenceSession>> {
        let path = resolve_model_path(model)?;
        init_ort()?;
        let session = self.build_session(&path, backend)?;
        log::debug!("Loaded {} on {}", path.display(), backend);
        Ok(Box::new(OrtSession::new(session)))
    }
}

/// A loaded ONNX Runtime session.
pub struct OrtSession {
    session: Session,
    description: ModelDescription,
}

impl OrtSession {
    fn new(session: Session) -> Self {
        let description = ModelDescription {
            inputs: session
                .inputs()
                .iter()
                .map(|i| tensor_info(i.name(), i.dtype()))
                .collect(),
            outputs: session
                .outputs()
                .iter()
                .map(|o| tensor_info(o.name(), o.dtype()))
                .collect(),
        };
        Self { session, description }
    }
}

fn tensor_info(name: &str, value_type: &ValueType) -> TensorInfo {
    match value_type {
        ValueType::Tensor { ty, shape, .. } => TensorInfo {
            name: name.to_string(),
            shape: shape
                .iter()
                .map(|&d| if d < 0 { None } else { Some(d as usize) })
                .collect(),
            dtype: element_type(*ty),
        },
        _ => TensorInfo {
            name: name.to_string(),
            shape: Vec::new(),
            dtype: TensorType::Other,
        },
    }
}

fn element_type(ty: TensorElementType) -> TensorType {
    match ty {
        TensorElementType::Float16 => TensorType::Float16,
        TensorElementType::Float32 => TensorType::Float32,
        TensorElementType::Float64 => TensorType::Float64,
        TensorElementType::Int32 => TensorType::Int32,
        TensorElementType::Int64 => TensorType::Int64,
        TensorElementType::Bool => TensorType::Bool,
        _ => TensorType::Other,
    }
}

impl InferenceSession for OrtSession {
    fn describe(&self) -> ModelDescription {
        self.description.clone()
    }

    fn run(&mut self, feeds: Vec<(&str, TensorData)>) -> Result<HashMap<String, TensorData>> {
        let mut inputs: Vec<(&str, DynValue)> = Vec::with_capacity(feeds.len());
        for (name, tensor) in feeds {
            inputs.push((name, Tensor::from_array((tensor.shape, tensor.data))?.into_dyn()));
        }

        let outputs = self.session.run(inputs)?;

        let mut result = HashMap::with_capacity(self.description.outputs.len());
        for info in &self.description.outputs {
            if info.dtype != TensorType::Float32 {
                continue;
            }
            if let Some(value) = outputs.get(info.name.as_str()) {
                let (shape, data) = value.try_extract_tensor::<f32>()?;
                let shape = shape.iter().map(|&d| d.max(0) as usize).collect();
                result.insert(info.name.clone(), TensorData::new(shape, data.to_vec()));
            }
        }
        Ok(result)
    }
}
