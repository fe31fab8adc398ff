//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define container metrics (requests, latency, worker pool, sessions)
//! - Expose a Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `container_requests_total` (counter): requests by method, status
//! - `container_request_duration_seconds` (histogram): latency distribution
//! - `container_executor_active_threads` (gauge): tasks being polled
//! - `container_executor_pool_size` (gauge): live worker threads
//! - `container_executor_queue_size` (gauge): tasks waiting to run
//! - `container_executor_completed_tasks` (gauge): tasks finished since start
//! - `container_sessions_active` (gauge): live sessions
//! - `container_resource_cache_bytes` (gauge): cached static content

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::executor::ExecutorState;

/// Install the global recorder with an HTTP scrape listener on `addr`.
///
/// The exporter runs on the ambient tokio runtime, so this must be called
/// from inside one.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    let status = status.to_string();
    counter!("container_requests_total", "method" => method.to_string(), "status" => status.clone())
        .increment(1);
    histogram!("container_request_duration_seconds", "method" => method.to_string(), "status" => status)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_executor_state(executor: &str, state: &ExecutorState) {
    let name = executor.to_string();
    gauge!("container_executor_active_threads", "executor" => name.clone()).set(state.active_count as f64);
    gauge!("container_executor_pool_size", "executor" => name.clone()).set(state.pool_size as f64);
    gauge!("container_executor_queue_size", "executor" => name.clone()).set(state.queue_size as f64);
    gauge!("container_executor_completed_tasks", "executor" => name).set(state.completed_task_count as f64);
}

pub fn record_sessions_active(count: usize) {
    gauge!("container_sessions_active").set(count as f64);
}

pub fn record_resource_cache(bytes: usize) {
    gauge!("container_resource_cache_bytes").set(bytes as f64);
}
