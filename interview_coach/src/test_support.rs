use crate::{
    resume::{JobPosting, KeywordJobIndex, Recommender, ResumeError, ResumePipeline, Summarizer},
    server::{build_router, Limits, SharedState},
    telemetry::Metrics,
};
use async_trait::async_trait;
use frame_classifier::{
    preprocess::{InputShape, TensorLayout},
    ClassLabels, FrameClassifier, InferenceError, ModelService,
};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use ndarray::{ArrayView4, Axis};
use std::{
    io::Cursor,
    net::SocketAddr,
    sync::{Arc, OnceLock},
};
use tokio::net::TcpListener;

/// Scores each RGB channel by its mean intensity.
struct ChannelMeanModel;

impl ModelService for ChannelMeanModel {
    fn input_shape(&self) -> InputShape {
        InputShape::new(8, 8, TensorLayout::Nhwc)
    }

    fn output_len(&self) -> Option<usize> {
        Some(3)
    }

    fn infer(&self, input: ArrayView4<'_, f32>) -> Result<Vec<f32>, InferenceError> {
        let means: Vec<f32> = input
            .axis_iter(Axis(3))
            .map(|channel| channel.mean().unwrap_or(0.0))
            .collect();
        let total: f32 = means.iter().sum::<f32>().max(f32::EPSILON);
        Ok(means.iter().map(|m| m / total).collect())
    }
}

/// Returns fewer scores than there are labels.
struct TruncatedModel;

impl ModelService for TruncatedModel {
    fn input_shape(&self) -> InputShape {
        InputShape::new(8, 8, TensorLayout::Nchw)
    }

    fn infer(&self, _input: ArrayView4<'_, f32>) -> Result<Vec<f32>, InferenceError> {
        Ok(vec![1.0])
    }
}

/// Fails every frame with the given error.
struct FailingModel(fn() -> InferenceError);

impl ModelService for FailingModel {
    fn input_shape(&self) -> InputShape {
        InputShape::new(8, 8, TensorLayout::Nhwc)
    }

    fn infer(&self, _input: ArrayView4<'_, f32>) -> Result<Vec<f32>, InferenceError> {
        Err((self.0)())
    }
}

fn labels() -> ClassLabels {
    ClassLabels::new(vec!["red".into(), "green".into(), "blue".into()]).unwrap()
}

pub fn classifier() -> FrameClassifier {
    FrameClassifier::new(ChannelMeanModel, labels()).unwrap()
}

pub fn broken_classifier() -> FrameClassifier {
    FrameClassifier::new(TruncatedModel, labels()).unwrap()
}

pub fn failing_classifier(make_error: fn() -> InferenceError) -> FrameClassifier {
    FrameClassifier::new(FailingModel(make_error), labels()).unwrap()
}

pub fn frame(color: [u8; 3], format: ImageFormat) -> Vec<u8> {
    let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(32, 24, Rgb(color));
    let mut image_data = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut image_data), format)
        .unwrap();
    image_data
}

// The global meter provider is process-wide, so tests share one registry.
fn metrics() -> Arc<Metrics> {
    static METRICS: OnceLock<Arc<Metrics>> = OnceLock::new();
    METRICS
        .get_or_init(|| Arc::new(Metrics::new().unwrap()))
        .clone()
}

pub fn state(classifier: FrameClassifier) -> SharedState {
    SharedState {
        classifier,
        resume_pipeline: None,
        limits: Limits {
            max_frame_bytes: 1024 * 1024,
            max_resume_bytes: 64 * 1024,
            idle_timeout: None,
        },
        metrics: metrics(),
    }
}

pub async fn serve(state: SharedState) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, build_router(state)).await.unwrap() });
    addr
}

struct FirstLineSummarizer;

#[async_trait]
impl Summarizer for FirstLineSummarizer {
    async fn summarize(&self, resume: &str) -> Result<String, ResumeError> {
        Ok(resume.lines().next().unwrap_or_default().to_string())
    }
}

struct ListingRecommender;

#[async_trait]
impl Recommender for ListingRecommender {
    async fn recommend(
        &self,
        _resume: &str,
        candidates: &[JobPosting],
    ) -> Result<String, ResumeError> {
        let titles: Vec<&str> = candidates.iter().map(|job| job.title.as_str()).collect();
        Ok(format!("Best fits: {}", titles.join(", ")))
    }
}

pub fn resume_pipeline() -> Arc<ResumePipeline> {
    let catalog: Vec<JobPosting> = [
        ("Data Engineer", "Spark and Airflow data pipelines"),
        ("Backend Engineer", "Rust backend services and APIs"),
        ("Frontend Engineer", "React and TypeScript interfaces"),
    ]
    .into_iter()
    .map(|(title, description)| JobPosting {
        title: title.into(),
        description: description.into(),
    })
    .collect();
    let index = KeywordJobIndex::new(catalog.iter().map(|job| job.description.as_str()));

    Arc::new(ResumePipeline::new(
        Arc::new(FirstLineSummarizer),
        Arc::new(index),
        Arc::new(ListingRecommender),
        catalog,
        2,
    ))
}
