use crate::{
    resume::{RecommendationReport, ResumeError},
    routes::ErrorPayload,
    server::SharedState,
};
use axum::{
    body::Bytes,
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;
use tracing::instrument;

const FILE_FIELD: &str = "file";

#[derive(Error, Debug)]
pub enum UploadResumeError {
    #[error("resume recommendations are disabled")]
    Disabled,
    #[error("missing `file` field")]
    MissingFile,
    #[error("{}", .0.body_text())]
    Rejected(#[from] MultipartRejection),
    #[error("invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),
    #[error("resume exceeds {0} bytes")]
    TooLarge(usize),
    #[error("resume must be UTF-8 text")]
    NotUtf8,
    #[error("{0}")]
    Pipeline(#[from] ResumeError),
}

impl UploadResumeError {
    fn outcome(&self) -> &'static str {
        match self {
            UploadResumeError::Disabled => "disabled",
            UploadResumeError::MissingFile
            | UploadResumeError::Rejected(_)
            | UploadResumeError::Multipart(_)
            | UploadResumeError::TooLarge(_)
            | UploadResumeError::NotUtf8
            | UploadResumeError::Pipeline(ResumeError::EmptyResume) => "invalid",
            UploadResumeError::Pipeline(ResumeError::Llm(_)) => "llm_error",
        }
    }
}

impl IntoResponse for UploadResumeError {
    fn into_response(self) -> Response {
        let status = match &self {
            UploadResumeError::Disabled => StatusCode::SERVICE_UNAVAILABLE,
            UploadResumeError::MissingFile => StatusCode::BAD_REQUEST,
            UploadResumeError::Rejected(rejection) => rejection.status(),
            UploadResumeError::Multipart(e) => e.status(),
            UploadResumeError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            UploadResumeError::NotUtf8 | UploadResumeError::Pipeline(ResumeError::EmptyResume) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            UploadResumeError::Pipeline(ResumeError::Llm(_)) => StatusCode::BAD_GATEWAY,
        };
        (status, Json(ErrorPayload::new(self.to_string()))).into_response()
    }
}

async fn read_file_field(
    multipart: &mut Multipart,
    max_bytes: usize,
) -> Result<Bytes, UploadResumeError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let data = field.bytes().await?;
        if data.len() > max_bytes {
            return Err(UploadResumeError::TooLarge(max_bytes));
        }
        return Ok(data);
    }
    Err(UploadResumeError::MissingFile)
}

async fn recommend(
    state: &SharedState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<RecommendationReport, UploadResumeError> {
    let pipeline = state
        .resume_pipeline
        .clone()
        .ok_or(UploadResumeError::Disabled)?;
    let mut multipart = multipart?;

    let data = read_file_field(&mut multipart, state.limits.max_resume_bytes).await?;
    let resume = std::str::from_utf8(&data).map_err(|_| UploadResumeError::NotUtf8)?;

    Ok(pipeline.run(resume).await?)
}

#[instrument(skip(state, multipart))]
pub async fn upload_resume(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<RecommendationReport>, UploadResumeError> {
    match recommend(&state, multipart).await {
        Ok(report) => {
            state.metrics.record_resume_upload("ok");
            tracing::info!("Recommended {} openings", report.recommended_titles.len());
            Ok(Json(report))
        }
        Err(err) => {
            state.metrics.record_resume_upload(err.outcome());
            tracing::warn!("Resume upload failed: {}", err);
            Err(err)
        }
    }
}
