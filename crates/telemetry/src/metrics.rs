// Metric names and labels are constants; construction cannot fail at runtime.
#![allow(clippy::expect_used)]

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ==== Device control ====
    pub static ref PTZ_COMMANDS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("ptz_commands_total", "Total PTZ commands sent to cameras"),
            &["camera", "kind"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PTZ_COMMAND_FAILURES: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("ptz_command_failures_total", "Total PTZ commands rejected or unanswered"),
            &["camera", "kind"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref SESSIONS_CONNECTED: IntGauge = {
        let metric = IntGauge::new("camera_sessions_connected", "Camera sessions with a live control session")
            .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Preview ====
    pub static ref PREVIEW_FRAMES_PUBLISHED: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("preview_frames_published_total", "Frames published to the latest-frame slot"),
            &["camera"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref PREVIEW_READ_ERRORS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new("preview_read_errors_total", "Frame reads that failed and were skipped"),
            &["camera"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };
}

/// Record one command attempt and, when `ok` is false, its failure.
pub fn record_command(camera: &str, kind: &str, ok: bool) {
    PTZ_COMMANDS.with_label_values(&[camera, kind]).inc();
    if !ok {
        PTZ_COMMAND_FAILURES.with_label_values(&[camera, kind]).inc();
    }
}

/// Render all registered metrics in the prometheus text format
pub fn render() -> String {
    let mut buf = Vec::new();
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    encoder.encode(&families, &mut buf).ok();
    String::from_utf8(buf).unwrap_or_default()
}
