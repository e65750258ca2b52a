use crate::{
    routes::{classify_outcome, ErrorPayload, FRAME_TOO_LARGE},
    server::SharedState,
};
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use frame_classifier::{Classification, ClassifyError, InferenceError};
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

const ROUTE: &str = "/predict_confidence";

#[derive(Error, Debug)]
pub enum PredictImageError {
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    #[error("{}", .0.body_text())]
    Body(#[from] BytesRejection),
}

impl PredictImageError {
    fn status(&self) -> StatusCode {
        match self {
            PredictImageError::Body(rejection) => rejection.status(),
            PredictImageError::Classify(ClassifyError::Decode(_)) => StatusCode::BAD_REQUEST,
            PredictImageError::Classify(ClassifyError::Inference(
                InferenceError::ShapeMismatch { .. },
            )) => StatusCode::UNPROCESSABLE_ENTITY,
            PredictImageError::Classify(ClassifyError::Inference(_))
            | PredictImageError::Classify(ClassifyError::Internal(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            PredictImageError::Classify(ClassifyError::Disabled(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }
}

impl IntoResponse for PredictImageError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::PAYLOAD_TOO_LARGE {
            FRAME_TOO_LARGE.to_string()
        } else {
            self.to_string()
        };
        (status, Json(ErrorPayload::new(message))).into_response()
    }
}

#[instrument(skip_all)]
pub async fn predict_image(
    State(state): State<SharedState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Classification>, PredictImageError> {
    let image_data = match body {
        Ok(image_data) => image_data,
        Err(rejection) => {
            let outcome = if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                "too_large"
            } else {
                "rejected"
            };
            state.metrics.record_frame(ROUTE, outcome);
            tracing::warn!("Upload body rejected: {}", rejection.body_text());
            return Err(rejection.into());
        }
    };
    tracing::debug!("Received {} byte upload", image_data.len());

    let started = Instant::now();
    let result = state.classifier.classify(image_data).await;
    state
        .metrics
        .record_classification_duration(started.elapsed().as_millis() as u64, ROUTE);

    match result {
        Ok(classification) => {
            state.metrics.record_frame(ROUTE, "ok");
            tracing::debug!(
                "Classified upload as {} ({:.3})",
                classification.label,
                classification.confidence
            );
            Ok(Json(classification))
        }
        Err(err) => {
            state.metrics.record_frame(ROUTE, classify_outcome(&err));
            tracing::warn!("Upload rejected: {:?}", err);
            Err(err.into())
        }
    }
}
