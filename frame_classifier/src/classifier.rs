use crate::{
    config::{LabelsConfig, ModelConfig},
    error::{ClassifyError, InferenceError, ModelLoadError},
    labels::ClassLabels,
    model_service::ModelService,
    ort_service::OrtModelService,
    preprocess,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub label: String,
    pub confidence: f32,
}

/// Index and value of the highest score. `None` for an empty vector or when
/// any score is NaN.
fn select_top(scores: &[f32]) -> Option<(usize, f32)> {
    if scores.iter().any(|score| score.is_nan()) {
        return None;
    }
    scores
        .iter()
        .copied()
        .enumerate()
        .reduce(|accum, item| if item.1 > accum.1 { item } else { accum })
}

struct LoadedModel {
    model: Box<dyn ModelService>,
    labels: ClassLabels,
}

/// The classification service shared by every connection.
///
/// A classifier whose model failed to load starts disabled and rejects every
/// request without touching the model. A fatal inference error disables it
/// from then on.
#[derive(Clone)]
pub struct FrameClassifier {
    loaded: Option<Arc<LoadedModel>>,
    disabled: Arc<RwLock<Option<String>>>,
}

impl FrameClassifier {
    pub fn new(model: impl ModelService, labels: ClassLabels) -> Result<Self, ModelLoadError> {
        if let Some(outputs) = model.output_len() {
            if outputs != labels.len() {
                return Err(ModelLoadError::LabelCountMismatch {
                    outputs,
                    labels: labels.len(),
                });
            }
        }

        Ok(Self {
            loaded: Some(Arc::new(LoadedModel {
                model: Box::new(model),
                labels,
            })),
            disabled: Arc::new(RwLock::new(None)),
        })
    }

    pub fn disabled(reason: impl Into<String>) -> Self {
        Self {
            loaded: None,
            disabled: Arc::new(RwLock::new(Some(reason.into()))),
        }
    }

    /// Loads the ONNX model and labels. Load failures are logged and produce a
    /// disabled classifier instead of an error.
    pub fn from_config(model_cfg: &ModelConfig, labels_cfg: &LabelsConfig) -> Self {
        let loaded = ClassLabels::from_config(labels_cfg).and_then(|labels| {
            let model = OrtModelService::new(model_cfg)?;
            Self::new(model, labels)
        });

        match loaded {
            Ok(classifier) => {
                tracing::info!(
                    "Frame classifier ready with labels {:?}",
                    classifier.labels().map(ClassLabels::as_slice)
                );
                classifier
            }
            Err(e) => {
                tracing::error!("Failed to load frame classifier, running disabled: {}", e);
                Self::disabled(e.to_string())
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.disabled.read().is_none()
    }

    pub fn disabled_reason(&self) -> Option<String> {
        self.disabled.read().clone()
    }

    pub fn labels(&self) -> Option<&ClassLabels> {
        self.loaded.as_deref().map(|loaded| &loaded.labels)
    }

    pub fn disable(&self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::error!("Disabling frame classifier: {}", reason);
        let mut disabled = self.disabled.write();
        if disabled.is_none() {
            *disabled = Some(reason);
        }
    }

    fn loaded(&self) -> Result<&LoadedModel, ClassifyError> {
        if let Some(reason) = self.disabled_reason() {
            return Err(ClassifyError::Disabled(reason));
        }
        self.loaded
            .as_deref()
            .ok_or_else(|| ClassifyError::Disabled("no model loaded".to_string()))
    }

    /// Decode, prepare, infer and label one encoded frame on the calling thread.
    pub fn classify_blocking(&self, frame: &[u8]) -> Result<Classification, ClassifyError> {
        let loaded = self.loaded()?;

        let image = preprocess::decode(frame)?;
        let input = preprocess::prepare(&image, &loaded.model.input_shape());

        let result = loaded
            .model
            .infer(input.view())
            .and_then(|scores| label_scores(&loaded.labels, &scores));

        result.map_err(|err| {
            if err.is_fatal() {
                self.disable(err.to_string());
            }
            ClassifyError::Inference(err)
        })
    }

    /// Runs [`classify_blocking`](Self::classify_blocking) on the blocking pool.
    pub async fn classify<B>(&self, frame: B) -> Result<Classification, ClassifyError>
    where
        B: AsRef<[u8]> + Send + 'static,
    {
        self.loaded()?;

        let classifier = self.clone();
        tokio::task::spawn_blocking(move || classifier.classify_blocking(frame.as_ref()))
            .await
            .map_err(|e| ClassifyError::Internal(e.to_string()))?
    }
}

fn label_scores(labels: &ClassLabels, scores: &[f32]) -> Result<Classification, InferenceError> {
    if scores.len() != labels.len() {
        return Err(InferenceError::Corrupted(format!(
            "model produced {} scores for {} labels",
            scores.len(),
            labels.len()
        )));
    }

    let (index, confidence) = select_top(scores)
        .ok_or_else(|| InferenceError::Run("model produced NaN scores".to_string()))?;

    let label = labels
        .get(index)
        .ok_or_else(|| InferenceError::Corrupted(format!("no label for class {}", index)))?;

    Ok(Classification {
        label: label.to_string(),
        confidence: confidence.clamp(0.0, 1.0),
    })
}
