use crate::{
    config::{Config, ServerConfig},
    resume::ResumePipeline,
    routes::api_routes,
    telemetry::Metrics,
};
use axum::Router;
use axum_otel_metrics::HttpMetricsLayerBuilder;
use frame_classifier::FrameClassifier;
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};

#[derive(Debug, Clone)]
pub struct Limits {
    pub max_frame_bytes: usize,
    pub max_resume_bytes: usize,
    pub idle_timeout: Option<Duration>,
}

impl Limits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_frame_bytes: config.server.max_frame_bytes,
            max_resume_bytes: config.resume.max_resume_bytes,
            idle_timeout: config.server.get_idle_timeout(),
        }
    }
}

#[derive(Clone)]
pub struct SharedState {
    pub classifier: FrameClassifier,
    pub resume_pipeline: Option<Arc<ResumePipeline>>,
    pub limits: Limits,
    pub metrics: Arc<Metrics>,
}

pub fn build_router(state: SharedState) -> Router {
    let metrics_layer = HttpMetricsLayerBuilder::new().build();

    Router::new()
        .merge(api_routes(&state.limits))
        .with_state(state)
        .layer(metrics_layer)
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(state: SharedState, config: &ServerConfig) -> anyhow::Result<Self> {
        let addr = config.get_address();
        let router = build_router(state);
        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub fn run(self, mut shutdown_rx: Receiver<()>) -> JoinHandle<anyhow::Result<()>> {
        if let Ok(addr) = self.listener.local_addr() {
            tracing::info!("Starting app on {}", addr);
        }

        let listener = self.listener;
        let router = self.router;
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await.ok();
                })
                .await?;
            Ok(())
        })
    }
}
