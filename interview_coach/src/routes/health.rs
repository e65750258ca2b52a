use crate::server::SharedState;
use axum::{extract::State, response::IntoResponse, response::Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
pub struct Status {
    status: String,
    classifier: String,
    resume_pipeline: String,
}

fn readiness(ready: bool) -> String {
    let readiness = if ready { "ready" } else { "disabled" };
    readiness.to_string()
}

pub async fn healthcheck(State(state): State<SharedState>) -> impl IntoResponse {
    Json(Status {
        status: "Available".into(),
        classifier: readiness(state.classifier.is_enabled()),
        resume_pipeline: readiness(state.resume_pipeline.is_some()),
    })
}
