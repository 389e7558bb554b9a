use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc, Mutex, OnceLock, PoisonError,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EndpointMetricKey {
    endpoint: String,
    method: String,
}

/// Process-wide counters rendered at `/metrics` in Prometheus text format.
#[derive(Default)]
pub struct RelayMetrics {
    request_duration_count: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_duration_sum_ms: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_errors_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    request_rate_total: Mutex<HashMap<EndpointMetricKey, u64>>,
    ws_duration_count: Mutex<HashMap<String, u64>>,
    ws_duration_sum_ms: Mutex<HashMap<String, u64>>,
    ws_errors_total: Mutex<HashMap<String, u64>>,
    ws_rate_total: Mutex<HashMap<String, u64>>,
    active_connections: AtomicI64,
    groups_created_total: AtomicU64,
    groups_dissolved_total: AtomicU64,
}

static GLOBAL_METRICS: OnceLock<Arc<RelayMetrics>> = OnceLock::new();

pub fn set_global_metrics(metrics: Arc<RelayMetrics>) {
    let _ = GLOBAL_METRICS.set(metrics);
}

fn global_metrics() -> Option<&'static Arc<RelayMetrics>> {
    GLOBAL_METRICS.get()
}

pub fn record_ws_event(event: &str, is_error: bool, latency_ms: u64) {
    if let Some(metrics) = global_metrics() {
        metrics.record_ws_event(event, is_error, latency_ms);
    }
}

pub fn connection_opened() {
    if let Some(metrics) = global_metrics() {
        metrics.active_connections.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn connection_closed() {
    if let Some(metrics) = global_metrics() {
        metrics.active_connections.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn group_created() {
    if let Some(metrics) = global_metrics() {
        metrics.groups_created_total.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn group_dissolved() {
    if let Some(metrics) = global_metrics() {
        metrics.groups_dissolved_total.fetch_add(1, Ordering::SeqCst);
    }
}

impl RelayMetrics {
    pub fn record_http_request(&self, method: &str, path: &str, status_code: u16, latency_ms: u64) {
        let key = EndpointMetricKey {
            endpoint: normalize_endpoint(path),
            method: method.to_ascii_uppercase(),
        };

        increment_counter(&self.request_rate_total, &key, 1);
        increment_counter(&self.request_duration_sum_ms, &key, latency_ms);
        increment_counter(&self.request_duration_count, &key, 1);
        if status_code >= 400 {
            increment_counter(&self.request_errors_total, &key, 1);
        }
    }

    pub fn record_ws_event(&self, event: &str, is_error: bool, latency_ms: u64) {
        let label = normalize_event_label(event);
        increment_label_counter(&self.ws_rate_total, &label, 1);
        increment_label_counter(&self.ws_duration_sum_ms, &label, latency_ms);
        increment_label_counter(&self.ws_duration_count, &label, 1);
        if is_error {
            increment_label_counter(&self.ws_errors_total, &label, 1);
        }
    }

    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP relay_request_rate_total Total HTTP requests by endpoint.\n");
        output.push_str("# TYPE relay_request_rate_total counter\n");
        append_counter_lines(&mut output, "relay_request_rate_total", &self.request_rate_total);

        output.push_str("# HELP relay_request_errors_total Total HTTP error responses by endpoint.\n");
        output.push_str("# TYPE relay_request_errors_total counter\n");
        append_counter_lines(&mut output, "relay_request_errors_total", &self.request_errors_total);

        output.push_str("# HELP relay_request_duration_ms_sum Sum of HTTP request latency in milliseconds by endpoint.\n");
        output.push_str("# TYPE relay_request_duration_ms_sum counter\n");
        append_counter_lines(
            &mut output,
            "relay_request_duration_ms_sum",
            &self.request_duration_sum_ms,
        );

        output.push_str("# HELP relay_request_duration_ms_count Count of HTTP request latency samples by endpoint.\n");
        output.push_str("# TYPE relay_request_duration_ms_count counter\n");
        append_counter_lines(
            &mut output,
            "relay_request_duration_ms_count",
            &self.request_duration_count,
        );

        output.push_str("# HELP relay_ws_rate_total Total websocket events handled by event name.\n");
        output.push_str("# TYPE relay_ws_rate_total counter\n");
        append_label_counter_lines(&mut output, "relay_ws_rate_total", &self.ws_rate_total);

        output.push_str("# HELP relay_ws_errors_total Total rejected websocket events by event name.\n");
        output.push_str("# TYPE relay_ws_errors_total counter\n");
        append_label_counter_lines(&mut output, "relay_ws_errors_total", &self.ws_errors_total);

        output.push_str("# HELP relay_ws_duration_ms_sum Sum of websocket event latency in milliseconds by event name.\n");
        output.push_str("# TYPE relay_ws_duration_ms_sum counter\n");
        append_label_counter_lines(&mut output, "relay_ws_duration_ms_sum", &self.ws_duration_sum_ms);

        output.push_str("# HELP relay_ws_duration_ms_count Count of websocket latency samples by event name.\n");
        output.push_str("# TYPE relay_ws_duration_ms_count counter\n");
        append_label_counter_lines(&mut output, "relay_ws_duration_ms_count", &self.ws_duration_count);

        output.push_str("# HELP relay_ws_active_connections Currently open websocket connections.\n");
        output.push_str("# TYPE relay_ws_active_connections gauge\n");
        output.push_str(&format!(
            "relay_ws_active_connections {}\n",
            self.active_connections.load(Ordering::SeqCst).max(0)
        ));

        output.push_str("# HELP timeline_groups_created_total Total co-watching groups formed.\n");
        output.push_str("# TYPE timeline_groups_created_total counter\n");
        output.push_str(&format!(
            "timeline_groups_created_total {}\n",
            self.groups_created_total.load(Ordering::SeqCst)
        ));

        output.push_str("# HELP timeline_groups_dissolved_total Total co-watching groups dissolved.\n");
        output.push_str("# TYPE timeline_groups_dissolved_total counter\n");
        output.push_str(&format!(
            "timeline_groups_dissolved_total {}\n",
            self.groups_dissolved_total.load(Ordering::SeqCst)
        ));

        output
    }
}

fn normalize_endpoint(path: &str) -> String {
    let segments: Vec<String> = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            if uuid::Uuid::parse_str(segment).is_ok() {
                "{uuid}".to_string()
            } else if segment.chars().all(|character| character.is_ascii_digit()) {
                "{number}".to_string()
            } else {
                segment.to_string()
            }
        })
        .collect();

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

fn normalize_event_label(event: &str) -> String {
    let normalized = event.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        "unknown".to_string()
    } else {
        normalized
    }
}

fn increment_counter(
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
    key: &EndpointMetricKey,
    delta: u64,
) {
    let mut guard = map.lock().unwrap_or_else(PoisonError::into_inner);
    let value = guard.entry(key.clone()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn increment_label_counter(map: &Mutex<HashMap<String, u64>>, label: &str, delta: u64) {
    let mut guard = map.lock().unwrap_or_else(PoisonError::into_inner);
    let value = guard.entry(label.to_string()).or_insert(0);
    *value = value.saturating_add(delta);
}

fn append_counter_lines(
    output: &mut String,
    metric_name: &str,
    map: &Mutex<HashMap<EndpointMetricKey, u64>>,
) {
    let guard = map.lock().unwrap_or_else(PoisonError::into_inner);
    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left, _), (right, _)| {
        left.method.cmp(&right.method).then_with(|| left.endpoint.cmp(&right.endpoint))
    });

    for (key, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{method=\"{}\",endpoint=\"{}\"}} {value}\n",
            escape_label_value(&key.method),
            escape_label_value(&key.endpoint),
        ));
    }
}

fn append_label_counter_lines(
    output: &mut String,
    metric_name: &str,
    map: &Mutex<HashMap<String, u64>>,
) {
    let guard = map.lock().unwrap_or_else(PoisonError::into_inner);
    let mut entries: Vec<_> = guard.iter().collect();
    entries.sort_by(|(left, _), (right, _)| left.cmp(right));

    for (label, value) in entries {
        output.push_str(&format!(
            "{metric_name}{{event=\"{}\"}} {value}\n",
            escape_label_value(label),
        ));
    }
}

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n").replace('"', "\\\"")
}
