use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider, UpDownCounter},
    KeyValue,
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::collections::HashSet;

pub struct Metrics {
    frame_counter: Counter<u64>,
    classification_duration: Histogram<u64>,
    active_streams: UpDownCounter<i64>,
    resume_uploads: Counter<u64>,
    pub registry: Registry,
    // Dropping the last provider handle shuts its exporter down.
    _provider: SdkMeterProvider,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("interview_coach");
        global::set_meter_provider(provider.clone());

        let frame_counter = meter
            .u64_counter("frames_total")
            .with_description("Total number of classified frames by outcome")
            .build();

        let boundaries = generate_boundaries((5, 25, 45, 245, 1045));

        let classification_duration = meter
            .u64_histogram("classification_duration_ms")
            .with_boundaries(boundaries)
            .with_description("Duration of frame classification in milliseconds")
            .build();

        let active_streams = meter
            .i64_up_down_counter("active_streams")
            .with_description("Number of open live classification streams")
            .build();

        let resume_uploads = meter
            .u64_counter("resume_uploads_total")
            .with_description("Total number of resume uploads by outcome")
            .build();

        Ok(Metrics {
            frame_counter,
            classification_duration,
            active_streams,
            resume_uploads,
            registry,
            _provider: provider,
        })
    }

    pub fn record_frame(&self, route: &str, outcome: &str) {
        let attributes = [
            KeyValue::new("route", route.to_string()),
            KeyValue::new("outcome", outcome.to_string()),
        ];
        self.frame_counter.add(1, &attributes);
    }

    pub fn record_classification_duration(&self, duration_ms: u64, route: &str) {
        let attributes = [KeyValue::new("route", route.to_string())];
        self.classification_duration
            .record(duration_ms, &attributes);
    }

    pub fn stream_opened(&self) {
        self.active_streams.add(1, &[]);
    }

    pub fn stream_closed(&self) {
        self.active_streams.add(-1, &[]);
    }

    pub fn record_resume_upload(&self, outcome: &str) {
        let attributes = [KeyValue::new("outcome", outcome.to_string())];
        self.resume_uploads.add(1, &attributes);
    }
}

fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 5;
    let middle_step: usize = 2;
    let end_step: usize = 20;
    let tail_step: usize = 100;
    let first_part = (parts.0..=parts.1).step_by(first_step);
    let middle_part = (parts.1..=parts.2).step_by(middle_step);
    let end_part = (parts.2..=parts.3).step_by(end_step);
    let tail_part = (parts.3..=parts.4).step_by(tail_step);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}
