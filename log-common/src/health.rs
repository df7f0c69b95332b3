use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use time::OffsetDateTime;
use tracing::{info, warn};

/// Health reporting for the long-running loops of the ingestor.
///
/// Every stream consumer and every batch worker registers itself as a
/// component and must report healthy more often than its deadline. The
/// process is healthy only if all components are:
///   - a component that has not reported yet is `Starting`, and unhealthy
///   - a component whose last report is older than its deadline is `Stalled`
///   - a component can explicitly report `Unhealthy`
///
/// Components write their status straight into the shared map, so reporting
/// never awaits and can be called from rdkafka callbacks.

#[derive(Default, Debug)]
pub struct HealthStatus {
    /// The overall status: true if all components are healthy
    pub healthy: bool,
    /// Current status of each registered component, for display
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Set when a component is registered
    Starting,
    /// Recently reported healthy, must report again before the date
    HealthyUntil(OffsetDateTime),
    /// Reported unhealthy
    Unhealthy,
    /// Computed when the HealthyUntil deadline has passed
    Stalled,
}

type Components = Arc<RwLock<HashMap<String, ComponentStatus>>>;

#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: Components,
}

impl HealthHandle {
    /// Report healthy until `now + deadline`.
    pub fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(
            OffsetDateTime::now_utc() + self.deadline,
        ))
    }

    pub fn report_status(&self, status: ComponentStatus) {
        let Ok(mut components) = self.components.write() else {
            // The health checks will fail and the process will be restarted
            warn!(component = self.component, "poisoned health registry lock");
            return;
        };
        match components.get_mut(&self.component) {
            Some(current) => *current = status,
            None => {
                components.insert(self.component.clone(), status);
            }
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Components,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            components: Default::default(),
        }
    }

    /// Registers a component in `Starting` state. The returned handle is moved
    /// into the component so it can report on its own schedule.
    pub fn register(&self, component: impl Into<String>, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component: component.into(),
            deadline,
            components: self.components.clone(),
        };
        handle.report_status(ComponentStatus::Starting);
        handle
    }

    /// Combined status of all registered components. Usable as an axum handler.
    pub fn get_status(&self) -> HealthStatus {
        let Ok(components) = self.components.read() else {
            warn!("{} health check failed: poisoned registry lock", self.name);
            return HealthStatus::default();
        };

        let now = OffsetDateTime::now_utc();
        let mut status = HealthStatus {
            healthy: !components.is_empty(),
            components: HashMap::with_capacity(components.len()),
        };

        for (name, component) in components.iter() {
            let component = match component {
                ComponentStatus::HealthyUntil(until) if *until <= now => ComponentStatus::Stalled,
                other => other.clone(),
            };
            if !matches!(component, ComponentStatus::HealthyUntil(_)) {
                status.healthy = false;
            }
            status.components.insert(name.clone(), component);
        }

        match status.healthy {
            true => info!("{} health check ok", self.name),
            false => warn!("{} health check failed: {:?}", self.name, status.components),
        }
        status
    }
}
