//! # Application State Management
//!
//! Shared state accessed by every HTTP request handler and by the audio relay
//! path. All mutable data sits behind `Arc<RwLock<_>>`: many readers or one
//! writer at a time, shared by cheap clones of `AppState`.

use crate::config::AppConfig;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state shared across handlers and relay components.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Service-wide counters, updated by middleware and the relay
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected across all requests and relay sessions.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors encountered since server start
    pub error_count: u64,

    /// Relay sessions opened since server start
    pub sessions_started: u64,

    /// Currently registered relay sessions
    pub active_sessions: u32,

    /// Synthesized audio frames delivered to clients
    pub frames_relayed: u64,

    /// Synthesized audio bytes delivered to clients
    pub bytes_relayed: u64,

    /// Fan-out deliveries that failed (logged, treated as no-effect)
    pub relay_failures: u64,

    /// Per-endpoint statistics, keyed by "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Performance metrics for a specific HTTP endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the read lock immediately so other threads are not
    /// blocked while the caller works with the snapshot.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace the configuration after validation.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record per-endpoint timing, called by the metrics middleware.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// A relay session was registered.
    pub fn session_started(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.sessions_started += 1;
        metrics.active_sessions += 1;
    }

    /// A relay session was deregistered.
    ///
    /// Guarded against underflow so an extra teardown path can never wrap the
    /// gauge.
    pub fn session_ended(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
    }

    /// A synthesized frame was delivered to one connection.
    pub fn record_relayed_frame(&self, bytes: usize) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.frames_relayed += 1;
        metrics.bytes_relayed += bytes as u64;
    }

    /// A fan-out delivery failed.
    pub fn record_relay_failure(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.relay_failures += 1;
    }

    /// Get a snapshot of current metrics for the health endpoints.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            sessions_started: metrics.sessions_started,
            active_sessions: metrics.active_sessions,
            frames_relayed: metrics.frames_relayed,
            bytes_relayed: metrics.bytes_relayed,
            relay_failures: metrics.relay_failures,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time for this endpoint in milliseconds.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate for this endpoint (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_gauge_underflow_guard() {
        let state = AppState::new(AppConfig::default());
        state.session_ended();
        state.session_ended();
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);

        state.session_started();
        state.session_started();
        state.session_ended();
        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.active_sessions, 1);
        assert_eq!(snapshot.sessions_started, 2);
    }

    #[test]
    fn test_relay_counters() {
        let state = AppState::new(AppConfig::default());
        state.record_relayed_frame(4800);
        state.record_relayed_frame(4800);
        state.record_relay_failure();
        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.frames_relayed, 2);
        assert_eq!(snapshot.bytes_relayed, 9600);
        assert_eq!(snapshot.relay_failures, 1);
    }

    #[test]
    fn test_endpoint_metrics() {
        let state = AppState::new(AppConfig::default());
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);
        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["GET /health"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.average_duration_ms(), 20.0);
        assert_eq!(metric.error_rate(), 0.5);
    }
}
