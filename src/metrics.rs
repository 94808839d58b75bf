use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder, HistogramVec,
    IntCounterVec, IntGauge, TextEncoder,
};

use crate::core::entities::Usage;

lazy_static! {
    /// Completed generation calls, by outcome
    pub static ref GENERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "llmbridge_generations_total",
        "Total number of generation calls",
        &["provider", "model", "status"]
    )
    .unwrap();

    /// Generation call duration in seconds
    pub static ref GENERATION_DURATION: HistogramVec = register_histogram_vec!(
        "llmbridge_generation_duration_seconds",
        "Generation call duration in seconds",
        &["provider", "model", "stream"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .unwrap();

    /// Normalized token counts
    pub static ref TOKENS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "llmbridge_tokens_total",
        "Total number of tokens processed",
        &["provider", "model", "kind"]
    )
    .unwrap();

    /// Streams with a live pump worker
    pub static ref ACTIVE_STREAMS: IntGauge =
        register_int_gauge!("llmbridge_active_streams", "Number of active stream workers").unwrap();

    /// Batch jobs submitted, by initial vendor status
    pub static ref BATCH_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "llmbridge_batch_jobs_total",
        "Total number of batch jobs submitted",
        &["provider", "status"]
    )
    .unwrap();
}

pub fn record_generation(provider: &str, model: &str, status: &str) {
    GENERATIONS_TOTAL
        .with_label_values(&[provider, model, status])
        .inc();
}

pub fn record_usage(provider: &str, model: &str, usage: &Usage) {
    TOKENS_TOTAL
        .with_label_values(&[provider, model, "input"])
        .inc_by(usage.input_tokens);
    TOKENS_TOTAL
        .with_label_values(&[provider, model, "output"])
        .inc_by(usage.output_tokens);
}

/// Export metrics in Prometheus text format
pub fn export_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_includes_registered_counters() {
        record_generation("openai", "gpt-4o", "ok");
        let text = export_metrics().unwrap();
        assert!(text.contains("llmbridge_generations_total"));
    }
}
