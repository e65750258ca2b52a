use crate::{
    config::{ModelConfig, Validatable},
    error::{InferenceError, ModelLoadError},
    model_service::ModelService,
    preprocess::{InputShape, TensorLayout},
};
use ndarray::ArrayView4;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    tensor::TensorElementType,
    value::{TensorRef, ValueType},
};
use parking_lot::Mutex;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Picks layout and spatial size from the declared input dimensions.
/// Dynamic dimensions (`<= 0`) fall back to the configured values.
fn resolve_input_shape(dims: &[i64], config: &ModelConfig) -> Result<InputShape, ModelLoadError> {
    let &[batch, d1, d2, d3] = dims else {
        return Err(ModelLoadError::UnsupportedSignature(format!(
            "expected a 4-D image input, got {:?}",
            dims
        )));
    };

    if batch > 1 {
        return Err(ModelLoadError::UnsupportedSignature(format!(
            "batch dimension must be 1 or dynamic, got {}",
            batch
        )));
    }

    let layout = match (d1 == 3, d3 == 3) {
        (true, true) => config.layout,
        (false, true) => TensorLayout::Nhwc,
        (true, false) => TensorLayout::Nchw,
        (false, false) if d1 <= 0 && d3 <= 0 => config.layout,
        (false, false) => {
            return Err(ModelLoadError::UnsupportedSignature(format!(
                "expected a 3-channel image input, got {:?}",
                dims
            )))
        }
    };

    let (height, width) = match layout {
        TensorLayout::Nhwc => (d1, d2),
        TensorLayout::Nchw => (d2, d3),
    };
    let pick = |declared: i64, configured: u32| {
        if declared <= 0 {
            return Ok(configured);
        }
        u32::try_from(declared).map_err(|_| {
            ModelLoadError::UnsupportedSignature(format!(
                "input dimension {} out of range in {:?}",
                declared, dims
            ))
        })
    };

    Ok(InputShape::new(
        pick(width, config.input_width)?,
        pick(height, config.input_height)?,
        layout,
    ))
}

fn softmax(scores: &mut [f32]) {
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for score in scores.iter_mut() {
        *score = (*score - max).exp();
        sum += *score;
    }
    if sum > 0.0 {
        for score in scores.iter_mut() {
            *score /= sum;
        }
    }
}

struct Signature {
    input: InputShape,
    output_name: String,
    output_len: Option<usize>,
}

fn read_signature(session: &Session, config: &ModelConfig) -> Result<Signature, ModelLoadError> {
    let input = session.inputs.first().ok_or_else(|| {
        ModelLoadError::UnsupportedSignature("model declares no inputs".to_string())
    })?;
    let input_dims: Vec<i64> = match &input.input_type {
        ValueType::Tensor { ty, shape, .. } => {
            if *ty != TensorElementType::Float32 {
                return Err(ModelLoadError::UnsupportedSignature(format!(
                    "input `{}` must be float32, got {:?}",
                    input.name, ty
                )));
            }
            shape.iter().copied().collect()
        }
        other => {
            return Err(ModelLoadError::UnsupportedSignature(format!(
                "input `{}` must be a tensor, got {:?}",
                input.name, other
            )))
        }
    };

    let output = session.outputs.first().ok_or_else(|| {
        ModelLoadError::UnsupportedSignature("model declares no outputs".to_string())
    })?;
    let output_len = match &output.output_type {
        ValueType::Tensor { shape, .. } => shape
            .iter()
            .last()
            .copied()
            .filter(|len| *len > 0)
            .map(|len| len as usize),
        _ => None,
    };

    Ok(Signature {
        input: resolve_input_shape(&input_dims, config)?,
        output_name: output.name.clone(),
        output_len,
    })
}

#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Mutex<Session>>>,
    counter: Arc<AtomicUsize>,
    input: InputShape,
    output_name: Arc<str>,
    output_len: Option<usize>,
    output_softmax: bool,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ModelLoadError> {
        model_config
            .validate()
            .map_err(ModelLoadError::InvalidConfig)?;

        let num_instances = model_config.num_instances;
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_path())?;
                Ok(Mutex::new(session))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        let signature = {
            let first = sessions.first().ok_or_else(|| {
                ModelLoadError::InvalidConfig("no ONNX session created".to_string())
            })?;
            read_signature(&first.lock(), model_config)?
        };

        if (signature.input.width, signature.input.height)
            != (model_config.input_width, model_config.input_height)
        {
            tracing::warn!(
                "Model declares a {}x{} input, overriding configured {}x{}",
                signature.input.width,
                signature.input.height,
                model_config.input_width,
                model_config.input_height
            );
        }

        tracing::info!(
            "Created {} ONNX sessions from {:?} (input {:?}, output `{}`)",
            num_instances,
            model_config.get_path(),
            signature.input.dims(),
            signature.output_name
        );

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            input: signature.input,
            output_name: signature.output_name.into(),
            output_len: signature.output_len,
            output_softmax: model_config.output_softmax,
        })
    }

    pub fn run_inference(&self, input: ArrayView4<'_, f32>) -> Result<Vec<f32>, InferenceError> {
        let expected = self.input.dims();
        if input.shape() != &expected[..] {
            return Err(InferenceError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: input.shape().to_vec(),
            });
        }

        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        let mut session = self.sessions[index].lock();
        tracing::debug!("Handling frame with session {}", index);

        let input = input.as_standard_layout();
        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| InferenceError::Run(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| InferenceError::Run(e.to_string()))?;

        let (_, data) = outputs[&*self.output_name]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Corrupted(format!("failed to extract scores: {}", e)))?;

        let mut scores = data.to_vec();
        if self.output_softmax {
            softmax(&mut scores);
        }

        Ok(scores)
    }
}

impl ModelService for OrtModelService {
    fn input_shape(&self) -> InputShape {
        self.input
    }

    fn output_len(&self) -> Option<usize> {
        self.output_len
    }

    fn infer(&self, input: ArrayView4<'_, f32>) -> Result<Vec<f32>, InferenceError> {
        self.run_inference(input)
    }
}
