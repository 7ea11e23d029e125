use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Renders everything recorded through the `metrics` facade (HTTP and
/// rate-limiter counters from service-core).
pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
pub static PROMETHEUS_REGISTRY: OnceLock<Registry> = OnceLock::new();
pub static LOGIN_ATTEMPTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

pub fn init_metrics() {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = METRICS_HANDLE.set(handle);
        }
        Err(e) => tracing::error!("Failed to install Prometheus recorder: {}", e),
    }

    let registry = Registry::new();

    let login_attempts = match IntCounterVec::new(
        Opts::new(
            "auth_login_attempts_total",
            "Password login attempts by outcome",
        ),
        &["outcome"],
    ) {
        Ok(metric) => metric,
        Err(e) => {
            tracing::error!("Failed to create auth_login_attempts_total metric: {}", e);
            return;
        }
    };

    if let Err(e) = registry.register(Box::new(login_attempts.clone())) {
        tracing::error!("Failed to register auth_login_attempts_total: {}", e);
        return;
    }

    let _ = PROMETHEUS_REGISTRY.set(registry);
    let _ = LOGIN_ATTEMPTS_TOTAL.set(login_attempts);
}

pub fn get_metrics() -> String {
    let mut output = METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string());

    if let Some(registry) = PROMETHEUS_REGISTRY.get() {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&registry.gather(), &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
        }
        if let Ok(custom) = String::from_utf8(buffer) {
            output.push_str(&custom);
        }
    }

    output
}

/// `outcome` is one of success, two_factor_required, invalid_credentials,
/// locked, inactive.
pub fn record_login_attempt(outcome: &str) {
    if let Some(counter) = LOGIN_ATTEMPTS_TOTAL.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}
