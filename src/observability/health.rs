//! Health check HTTP server for container orchestration
//!
//! Provides HTTP endpoints for monitoring gateway status, supporting both
//! human operators and container orchestration platforms.

use crate::observability::metrics::{metrics, MetricsSnapshot};
use crate::rpc::{CorrelationRegistry, RegistryStats};
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use warp::http::StatusCode;
use warp::Filter;

/// Reports whether the broker connection is usable
pub type ConnectionProbe = Arc<dyn Fn() -> bool + Send + Sync>;

/// HTTP health check server
pub struct HealthServer {
    gateway_id: String,
    port: u16,
    connection_probe: ConnectionProbe,
    registry: Option<Arc<CorrelationRegistry>>,
    additional_checks: RwLock<HashMap<String, HealthCheck>>,
}

impl HealthServer {
    /// Create new health server; connection state is read from the global
    /// metrics until a probe is supplied
    pub fn new(gateway_id: impl Into<String>, port: u16) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            port,
            connection_probe: Arc::new(|| metrics().is_mqtt_connected()),
            registry: None,
            additional_checks: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_connection_probe<F>(mut self, probe: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.connection_probe = Arc::new(probe);
        self
    }

    /// Report in-flight calls from `registry`
    pub fn with_registry(mut self, registry: Arc<CorrelationRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Add custom health check
    pub async fn add_health_check(&self, name: impl Into<String>, check: HealthCheck) {
        self.additional_checks.write().await.insert(name.into(), check);
    }

    /// Remove health check
    pub async fn remove_health_check(&self, name: &str) {
        self.additional_checks.write().await.remove(name);
    }

    /// All routes served by the health server
    pub fn routes(
        self: &Arc<Self>,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        let health_server = self.clone();
        let metrics_server = self.clone();
        let ready_server = self.clone();

        // GET /health - comprehensive health status
        let health_route = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let server = health_server.clone();
                async move {
                    let status = server.get_health_status().await;
                    let code = if status.status == "healthy" {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    };
                    Ok::<_, Infallible>(warp::reply::with_status(
                        warp::reply::json(&status),
                        code,
                    ))
                }
            });

        // GET /metrics - complete metrics export
        let metrics_route = warp::path("metrics")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let server = metrics_server.clone();
                async move {
                    let response = MetricsResponse {
                        metrics: metrics().get_metrics(),
                        registry: server.registry.as_ref().map(|registry| registry.stats()),
                    };
                    Ok::<_, Infallible>(warp::reply::json(&response))
                }
            });

        // GET /ready - readiness probe
        let ready_route = warp::path("ready")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let server = ready_server.clone();
                async move {
                    let ready = server.is_ready();
                    let response = ReadinessResponse {
                        ready,
                        timestamp: current_timestamp(),
                    };
                    let code = if ready {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    };
                    Ok::<_, Infallible>(warp::reply::with_status(
                        warp::reply::json(&response),
                        code,
                    ))
                }
            });

        // GET /live - liveness probe
        let live_route = warp::path("live")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| {
                warp::reply::json(&LivenessResponse {
                    alive: true,
                    timestamp: current_timestamp(),
                })
            });

        // GET / - endpoint listing
        let root_route = warp::path::end().and(warp::get()).map(|| {
            let endpoints = HashMap::from([
                ("/health", "Overall health status with detailed checks"),
                ("/metrics", "Call, transport and lifecycle metrics"),
                ("/ready", "Readiness probe"),
                ("/live", "Liveness probe"),
            ]);
            warp::reply::json(&endpoints)
        });

        health_route
            .or(metrics_route)
            .or(ready_route)
            .or(live_route)
            .or(root_route)
    }

    /// Serve until the task is aborted
    pub async fn start(self: Arc<Self>) {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        tracing::info!(port = self.port, "Starting health server");
        warp::serve(self.routes().with(warp::cors().allow_any_origin()))
            .run(addr)
            .await;
    }

    /// Ready to accept calls: connected and not shutting down
    pub fn is_ready(&self) -> bool {
        let accepting = self
            .registry
            .as_ref()
            .map_or(true, |registry| !registry.is_closed());
        accepting && (self.connection_probe)()
    }

    async fn get_health_status(&self) -> HealthStatus {
        let mut checks = HashMap::new();
        checks.insert("mqtt".to_string(), self.check_mqtt_health());
        if let Some(registry) = &self.registry {
            checks.insert("calls".to_string(), check_registry_health(registry));
        }

        for (name, check) in self.additional_checks.read().await.iter() {
            checks.insert(name.clone(), check.clone());
        }

        let overall_healthy = checks.values().all(|check| check.status == "healthy");
        HealthStatus {
            status: if overall_healthy { "healthy" } else { "degraded" }.to_string(),
            timestamp: current_timestamp(),
            gateway_id: self.gateway_id.clone(),
            uptime_seconds: metrics().get_metrics().lifecycle.uptime_seconds,
            checks,
        }
    }

    fn check_mqtt_health(&self) -> HealthCheck {
        if (self.connection_probe)() {
            HealthCheck::healthy("MQTT connection established")
        } else {
            HealthCheck::unhealthy("MQTT connection failed or disconnected")
        }
    }
}

fn check_registry_health(registry: &CorrelationRegistry) -> HealthCheck {
    if registry.is_closed() {
        return HealthCheck::unhealthy("Gateway is shutting down");
    }
    HealthCheck::healthy(format!("{} calls in flight", registry.len()))
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: Option<String>,
    pub last_check: u64,
}

impl HealthCheck {
    pub fn healthy(message: impl Into<String>) -> Self {
        Self::with_status("healthy", message)
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status("unhealthy", message)
    }

    fn with_status(status: &str, message: impl Into<String>) -> Self {
        Self {
            status: status.to_string(),
            message: Some(message.into()),
            last_check: current_timestamp(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: String,
    timestamp: u64,
    gateway_id: String,
    uptime_seconds: u64,
    checks: HashMap<String, HealthCheck>,
}

#[derive(Debug, Serialize)]
struct MetricsResponse {
    #[serde(flatten)]
    metrics: MetricsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    registry: Option<RegistryStats>,
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    ready: bool,
    timestamp: u64,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
