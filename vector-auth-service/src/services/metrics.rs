use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;
use std::time::Duration;

// Global registry
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

// Metrics
pub static PROVISIONING_ATTEMPTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
pub static PROVISIONING_DURATION_SECONDS: OnceLock<Histogram> = OnceLock::new();
pub static LOGIN_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

/// Register collectors. Safe to call more than once; later calls are no-ops.
pub fn init_metrics() {
    if REGISTRY.get().is_some() {
        return;
    }

    let registry = Registry::new();

    let attempts = match IntCounterVec::new(
        Opts::new(
            "provisioning_attempts_total",
            "First-login provisioning attempts by outcome",
        ),
        &["outcome"],
    ) {
        Ok(metric) => metric,
        Err(e) => {
            tracing::error!("Failed to create provisioning_attempts_total metric: {}", e);
            panic!("Failed to initialize metrics: {}", e);
        }
    };

    let duration = match Histogram::with_opts(
        HistogramOpts::new(
            "provisioning_duration_seconds",
            "Time spent provisioning a first-time user",
        )
        .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0]),
    ) {
        Ok(metric) => metric,
        Err(e) => {
            tracing::error!("Failed to create provisioning_duration_seconds metric: {}", e);
            panic!("Failed to initialize metrics: {}", e);
        }
    };

    let logins = match IntCounterVec::new(
        Opts::new("login_total", "Login callbacks by outcome"),
        &["outcome"],
    ) {
        Ok(metric) => metric,
        Err(e) => {
            tracing::error!("Failed to create login_total metric: {}", e);
            panic!("Failed to initialize metrics: {}", e);
        }
    };

    for collector in [
        Box::new(attempts.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(duration.clone()),
        Box::new(logins.clone()),
    ] {
        if let Err(e) = registry.register(collector) {
            tracing::error!("Failed to register collector: {}", e);
            panic!("Failed to initialize metrics: {}", e);
        }
    }

    let _ = REGISTRY.set(registry);
    let _ = PROVISIONING_ATTEMPTS_TOTAL.set(attempts);
    let _ = PROVISIONING_DURATION_SECONDS.set(duration);
    let _ = LOGIN_TOTAL.set(logins);
}

/// Count a provisioning run. `outcome` is `success`, `race_lost`, `repaired`, or the
/// failing step name.
pub fn record_provisioning(outcome: &str, elapsed: Duration) {
    if let Some(counter) = PROVISIONING_ATTEMPTS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
    if let Some(histogram) = PROVISIONING_DURATION_SECONDS.get() {
        histogram.observe(elapsed.as_secs_f64());
    }
}

pub fn record_login(outcome: &str) {
    if let Some(counter) = LOGIN_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn get_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();

    let registry = match REGISTRY.get() {
        Some(r) => r,
        None => {
            tracing::error!("Metrics registry not initialized");
            return "# Metrics registry not initialized\n".to_string();
        }
    };

    let metric_families = registry.gather();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return format!("# Failed to encode metrics: {}\n", e);
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to convert metrics to UTF-8: {}", e);
            format!("# Failed to convert metrics to UTF-8: {}\n", e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_outcomes_are_exported() {
        init_metrics();
        init_metrics();
        record_login("success");
        record_provisioning("success", Duration::from_millis(120));

        let text = get_metrics();
        assert!(text.contains("login_total"));
        assert!(text.contains("provisioning_attempts_total"));
        assert!(text.contains("provisioning_duration_seconds"));
    }
}
