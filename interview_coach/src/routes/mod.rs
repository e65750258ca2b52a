mod health;
mod live_feed;
mod metrics;
mod predict_image;
mod upload_resume;

use crate::server::{Limits, SharedState};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use frame_classifier::{ClassifyError, InferenceError};
use serde::{Deserialize, Serialize};

use health::healthcheck;
use live_feed::live_feed;
use metrics::metrics_handler;
use predict_image::predict_image;
use upload_resume::upload_resume;

// Room for the multipart boundary and part headers around the file.
const MULTIPART_OVERHEAD: usize = 16 * 1024;

const FRAME_TOO_LARGE: &str = "frame too large";

pub fn api_routes(limits: &Limits) -> Router<SharedState> {
    Router::new()
        .route("/health", get(healthcheck))
        .route("/metrics", get(metrics_handler))
        .route(
            "/predict_confidence",
            post(predict_image).layer(DefaultBodyLimit::max(limits.max_frame_bytes)),
        )
        .route("/ws/confidence", get(live_feed))
        .route(
            "/upload_resume",
            post(upload_resume)
                .layer(DefaultBodyLimit::max(limits.max_resume_bytes + MULTIPART_OVERHEAD)),
        )
}

/// Body of every failed frame, over HTTP or the live stream.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ErrorPayload {
    pub error: String,
}

impl ErrorPayload {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

fn classify_outcome(err: &ClassifyError) -> &'static str {
    match err {
        ClassifyError::Decode(_) => "decode_error",
        ClassifyError::Inference(InferenceError::ShapeMismatch { .. }) => "shape_error",
        ClassifyError::Inference(_) => "inference_error",
        ClassifyError::Disabled(_) => "disabled",
        ClassifyError::Internal(_) => "internal_error",
    }
}
