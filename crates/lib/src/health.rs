//! Backend health monitor.
//!
//! Probes `GET /api/v1/health` on a fixed cadence and publishes the result on a `watch`
//! channel. Each probe replaces the previous status wholesale. Probe failures become the
//! offline sentinel instead of errors.

use crate::backend::ChatBackend;
use crate::schedule::{RecurringTask, TaskSlot};
use serde::{Deserialize, Deserializer, Serialize};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn unknown() -> String {
    "unknown".to_string()
}

/// Strings pass through untouched; null or any other JSON type reads as "unknown".
fn string_or_unknown<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        _ => unknown(),
    })
}

/// Tri-field backend status, kept verbatim from the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Backend reachability: "online" or "offline".
    #[serde(default = "unknown", deserialize_with = "string_or_unknown")]
    pub status: String,
    /// Data-store connectivity: "connected", "error", "disconnected", or "unknown".
    #[serde(default = "unknown", deserialize_with = "string_or_unknown")]
    pub sql: String,
    /// Model credential presence: "present", "missing", or "unknown".
    #[serde(default = "unknown", deserialize_with = "string_or_unknown")]
    pub ai: String,
}

impl HealthStatus {
    /// Returned whenever the probe fails.
    pub fn offline() -> Self {
        Self {
            status: "offline".to_string(),
            sql: "disconnected".to_string(),
            ai: "unknown".to_string(),
        }
    }

    /// Before the first probe completes.
    pub fn unknown() -> Self {
        Self {
            status: unknown(),
            sql: unknown(),
            ai: unknown(),
        }
    }

    pub fn is_online(&self) -> bool {
        self.status.eq_ignore_ascii_case("online")
    }

    pub fn store_connected(&self) -> bool {
        self.sql.eq_ignore_ascii_case("connected")
    }

    pub fn credentials_present(&self) -> bool {
        self.ai.eq_ignore_ascii_case("present")
    }
}

/// Single probe. Never fails: any error yields [`HealthStatus::offline`].
pub async fn probe(backend: &dyn ChatBackend) -> HealthStatus {
    match backend.health().await {
        Ok(status) => status,
        Err(e) => {
            log::debug!("health probe failed: {}", e);
            HealthStatus::offline()
        }
    }
}

/// Periodic prober; owner of the published [`HealthStatus`].
pub struct HealthMonitor {
    backend: Arc<dyn ChatBackend>,
    interval: Duration,
    status: Arc<watch::Sender<HealthStatus>>,
    task: TaskSlot,
}

impl HealthMonitor {
    pub fn new(backend: Arc<dyn ChatBackend>, interval: Duration) -> Self {
        let (status, _) = watch::channel(HealthStatus::unknown());
        Self {
            backend,
            interval,
            status: Arc::new(status),
            task: TaskSlot::new(),
        }
    }

    /// Probe once now, publish, and return the result.
    pub async fn probe(&self) -> HealthStatus {
        let status = probe(self.backend.as_ref()).await;
        self.status.send_replace(status.clone());
        status
    }

    /// Start probing immediately and then every interval. Replaces any running cadence.
    pub fn start(&self) {
        let backend = self.backend.clone();
        let status = self.status.clone();
        let task = RecurringTask::spawn(Duration::ZERO, self.interval, move || {
            let backend = backend.clone();
            let status = status.clone();
            async move {
                let next = probe(backend.as_ref()).await;
                let was_online = status.borrow().is_online();
                if was_online && !next.is_online() {
                    log::warn!("health: backend went offline");
                }
                status.send_replace(next);
                ControlFlow::Continue(())
            }
        });
        self.task.replace(task);
    }

    /// Restart the cadence, e.g. after the session configuration was closed.
    pub fn restart(&self) {
        log::debug!("health: restarting probe cadence");
        self.start();
    }

    pub fn stop(&self) {
        self.task.cancel();
    }

    pub fn current(&self) -> HealthStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<HealthStatus> {
        self.status.subscribe()
    }
}
