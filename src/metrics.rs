use std::sync::LazyLock;

use prometheus::*;

static METRIC_FRAME_COUNT: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("rollcall_camera_frame_count", "count of frames read from the camera")
        .unwrap()
});

static METRIC_RECOGNITION_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "rollcall_recognition_count",
        "count of recognized frames by outcome",
        &["outcome"]
    )
    .unwrap()
});

static METRIC_RECOGNITION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "rollcall_recognition_duration",
        "duration of the per-frame recognition in seconds",
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .unwrap()
});

pub fn inc_frame_count() {
    METRIC_FRAME_COUNT.inc();
}

/// 记录一次识别的结果和耗时
pub fn inc_recognition(outcome: &str, duration: f32) {
    METRIC_RECOGNITION_COUNT.with_label_values(&[outcome]).inc();
    METRIC_RECOGNITION_DURATION.observe(duration as f64);
}

/// 以 Prometheus 文本格式导出所有指标
pub fn gather_text() -> Result<String> {
    TextEncoder::new().encode_to_string(&prometheus::gather())
}
