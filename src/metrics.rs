//! Prometheus metrics infrastructure for LogfoldDB.
//!
//! This module provides the foundational types for exposing Prometheus-format
//! metrics via an HTTP endpoint. It installs a global metrics recorder and
//! serves the rendered output on a configurable socket address. The rest of
//! the crate records through the `metrics` facade macros (append counters,
//! log-size gauges, emitter counters).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::task::JoinHandle;

/// Error type for metrics installation.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The global metrics recorder has already been installed.
    #[error("metrics recorder already installed")]
    AlreadyInstalled,
}

/// Handle to the installed Prometheus metrics recorder.
///
/// Cheaply cloneable; renders the current metrics snapshot in Prometheus
/// exposition format.
#[derive(Clone, Debug)]
pub struct MetricsHandle {
    inner: Arc<PrometheusHandle>,
}

impl MetricsHandle {
    /// Render the current metrics snapshot in Prometheus exposition format.
    pub fn render(&self) -> String {
        self.inner.render()
    }
}

/// Guard to ensure the global recorder is installed at most once.
///
/// `OnceLock` is used instead of relying on the `metrics` crate's own
/// set_global_recorder error because `install_recorder()` can panic on
/// double-install in some versions.
static RECORDER_HANDLE: std::sync::OnceLock<MetricsHandle> = std::sync::OnceLock::new();

/// Install the global Prometheus metrics recorder.
///
/// Must be called once at startup before any `metrics` macros fire. A second
/// call in the same process returns [`MetricsError::AlreadyInstalled`].
///
/// # Errors
///
/// Returns [`MetricsError::AlreadyInstalled`] if already installed.
pub fn install_recorder() -> Result<MetricsHandle, MetricsError> {
    let mut was_set = false;
    let handle = RECORDER_HANDLE.get_or_init(|| {
        was_set = true;
        let prom_handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("PrometheusBuilder::install_recorder should succeed on first call");
        MetricsHandle {
            inner: Arc::new(prom_handle),
        }
    });

    if was_set {
        Ok(handle.clone())
    } else {
        Err(MetricsError::AlreadyInstalled)
    }
}

/// Returns the previously installed [`MetricsHandle`], if any.
pub fn get_installed_handle() -> Option<MetricsHandle> {
    RECORDER_HANDLE.get().cloned()
}

/// Build the axum [`Router`] that serves Prometheus metrics at `GET /metrics`.
fn metrics_router(handle: MetricsHandle) -> Router {
    Router::new().route(
        "/metrics",
        get(move || {
            let h = handle.clone();
            async move {
                let body = h.render();
                (
                    [(
                        axum::http::header::CONTENT_TYPE,
                        "text/plain; version=0.0.4",
                    )],
                    body,
                )
            }
        }),
    )
}

/// Spawn an axum HTTP server that serves Prometheus metrics at `GET /metrics`.
///
/// Binds to the given address using `tokio::net::TcpListener` and runs in a
/// spawned tokio task. On bind failure, logs `tracing::error!` and returns a
/// `JoinHandle` that resolves immediately.
pub fn serve_metrics(handle: MetricsHandle, addr: SocketAddr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let app = metrics_router(handle);

        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(addr = %addr, error = %e, "Failed to bind metrics listener");
                return;
            }
        };

        let bound_addr = listener
            .local_addr()
            .expect("bound listener should have a local address");
        tracing::info!(addr = %bound_addr, "Metrics server listening");

        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Metrics server error");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn install_recorder_twice_returns_already_installed() {
        let result = install_recorder();
        // Another test in this process may have installed it first; either
        // way the second call must report AlreadyInstalled.
        let _ = result;

        let second = install_recorder();
        if let Err(err) = second {
            assert!(matches!(err, MetricsError::AlreadyInstalled));
        }
        assert!(get_installed_handle().is_some());
    }

    #[tokio::test]
    async fn serve_metrics_stays_running() {
        let _ = install_recorder();
        let handle = get_installed_handle().expect("recorder installed");

        let join_handle = serve_metrics(handle, "127.0.0.1:0".parse().unwrap());

        // The server task should NOT complete within 20ms -- it should be running.
        let timeout_result = tokio::time::timeout(Duration::from_millis(20), join_handle).await;
        assert!(
            timeout_result.is_err(),
            "serve_metrics task should still be running after 20ms"
        );
    }
}
