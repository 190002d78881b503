use std::sync::Arc;

use arena_instance::{InstanceHealth, InstanceId, InstanceListing, InstanceReply, InstanceState};
use serde::{Deserialize, Serialize};

use crate::config::AgentConfig;
use crate::error::LifecycleError;
use crate::metrics;
use crate::readiness::ReadinessWatcher;
use crate::registry::{InstanceRecord, InstanceRegistry};
use crate::runtime::{
    ContainerHandle, ContainerSpec, ContainerStatus, Lookup, PortMapping, RuntimeDriver,
};

const DEFAULT_VNC_PASSWORD: &str = "vncpassword";

fn default_game_type() -> String {
    "melee".to_string()
}

fn default_speed() -> String {
    "fastest".to_string()
}

/// Game parameters for a launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSettings {
    pub map_file: String,
    #[serde(default = "default_game_type")]
    pub game_type: String,
    #[serde(default = "default_speed")]
    pub speed: String,
    #[serde(default)]
    pub vnc_password: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub status: &'static str,
    pub instances_count: usize,
}

/// Folds a runtime observation into the stored lifecycle state.
pub fn reconcile(current: InstanceState, observed: ContainerStatus) -> InstanceState {
    use InstanceState as S;
    match observed {
        ContainerStatus::Running => match current {
            S::Restarting | S::Exited | S::Failed | S::NotFound => S::Running,
            other => other,
        },
        ContainerStatus::Exited | ContainerStatus::Dead => match current {
            S::Failed => S::Failed,
            _ => S::Exited,
        },
        ContainerStatus::Restarting => S::Restarting,
        _ => current,
    }
}

#[derive(Clone)]
pub struct LifecycleManager {
    registry: InstanceRegistry,
    runtime: Arc<dyn RuntimeDriver>,
    watcher: ReadinessWatcher,
    config: Arc<AgentConfig>,
}

impl LifecycleManager {
    pub fn new(
        registry: InstanceRegistry,
        runtime: Arc<dyn RuntimeDriver>,
        config: AgentConfig,
    ) -> Self {
        let watcher = ReadinessWatcher::new(
            registry.clone(),
            runtime.clone(),
            config.ready_markers.clone(),
            config.ready_attempts,
            config.ready_poll_interval,
        );
        Self {
            registry,
            runtime,
            watcher,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn container_spec(&self, id: &InstanceId, port: u16, game: &GameSettings) -> ContainerSpec {
        let c = &self.config;
        let password = game
            .vnc_password
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_VNC_PASSWORD.to_string());
        ContainerSpec {
            name: format!("starcraft-{id}"),
            image: c.image.clone(),
            env: vec![
                ("INSTANCE_ID".to_string(), id.to_string()),
                ("MAP_FILE".to_string(), game.map_file.clone()),
                ("GAME_TYPE".to_string(), game.game_type.clone()),
                ("GAME_SPEED".to_string(), game.speed.clone()),
                ("VNC_PASSWORD".to_string(), password),
                ("VNC_RESOLUTION".to_string(), c.vnc_resolution.clone()),
            ],
            port: PortMapping {
                container_port: c.container_port,
                host_port: port,
            },
            memory_limit_bytes: c.memory_limit_bytes,
            cpu_period_us: c.cpu_period_us,
            cpu_quota_us: c.cpu_quota_us,
            cap_add: c.cap_add.clone(),
            network: c.network.clone(),
        }
    }

    pub async fn launch(
        &self,
        id: &InstanceId,
        game: &GameSettings,
    ) -> Result<InstanceReply, LifecycleError> {
        let reserved = self
            .registry
            .reserve(
                id,
                self.config.max_instances,
                self.config.vnc_base_port,
                &self.config.host_ip,
            )
            .await?;

        let spec = self.container_spec(id, reserved.port, game);
        let handle = match self.runtime.start(&spec).await {
            Ok(h) => h,
            Err(e) => {
                self.registry.release(id, reserved.reservation).await;
                tracing::error!(instance_id = %id, error = %e, "container launch failed");
                return Err(LifecycleError::runtime("container launch failed", e));
            }
        };

        let record = match self
            .registry
            .attach_handle(id, reserved.reservation, handle.clone())
            .await
        {
            Ok(r) => r,
            Err(e) => {
                // Terminated while the container was starting.
                self.discard_container(id, &handle).await;
                return Err(e);
            }
        };

        self.watcher.spawn(id.clone(), handle, record.cancel.clone());

        tracing::info!(instance_id = %id, port = record.port, "launched instance");

        Ok(InstanceReply {
            instance_id: id.clone(),
            status: InstanceState::Starting,
            vnc_url: Some(record.endpoint_url),
        })
    }

    async fn discard_container(&self, id: &InstanceId, handle: &ContainerHandle) {
        if let Err(e) = self.runtime.stop(handle, self.config.stop_grace).await {
            tracing::warn!(instance_id = %id, error = %e, "failed to stop orphaned container");
        }
        if let Err(e) = self.runtime.remove(handle).await {
            tracing::warn!(instance_id = %id, error = %e, "failed to remove orphaned container");
        }
    }

    pub async fn terminate(&self, id: &InstanceId) -> Result<InstanceReply, LifecycleError> {
        let record = self.registry.get(id).await?;

        if let Some(handle) = &record.handle {
            let stopped = self
                .runtime
                .stop(handle, self.config.stop_grace)
                .await
                .map_err(|e| {
                    tracing::error!(instance_id = %id, error = %e, "termination failed");
                    LifecycleError::runtime("termination failed", e)
                })?;
            let removed = match stopped {
                Lookup::Gone => Lookup::Gone,
                Lookup::Found(()) => self.runtime.remove(handle).await.map_err(|e| {
                    tracing::error!(instance_id = %id, error = %e, "termination failed");
                    LifecycleError::runtime("termination failed", e)
                })?,
            };
            if removed.is_gone() {
                tracing::info!(instance_id = %id, "container already gone; dropping record");
            }
        }

        record.cancel.cancel();
        self.registry.release(id, record.reservation).await;
        tracing::info!(instance_id = %id, "terminated instance");

        Ok(InstanceReply {
            instance_id: id.clone(),
            status: InstanceState::Terminated,
            vnc_url: None,
        })
    }

    async fn mark_gone(&self, id: &InstanceId) -> LifecycleError {
        self.registry.set_status(id, InstanceState::NotFound).await;
        tracing::warn!(instance_id = %id, "container removed externally");
        LifecycleError::ContainerGone(id.to_string())
    }

    pub async fn status(&self, id: &InstanceId) -> Result<InstanceHealth, LifecycleError> {
        let record = self.registry.get(id).await?;
        let Some(handle) = &record.handle else {
            return Ok(InstanceHealth {
                instance_id: id.clone(),
                status: record.state,
                cpu_percent: 0.0,
                memory_usage: 0,
                memory_limit: 0,
                vnc_url: record.endpoint_url,
            });
        };

        let observed = match self.runtime.inspect_status(handle).await {
            Ok(Lookup::Found(s)) => s,
            Ok(Lookup::Gone) => return Err(self.mark_gone(id).await),
            Err(e) => {
                tracing::error!(instance_id = %id, error = %e, "status check failed");
                return Err(LifecycleError::runtime("status check failed", e));
            }
        };
        let sample = match self.runtime.resource_sample(handle).await {
            Ok(Lookup::Found(s)) => s,
            Ok(Lookup::Gone) => return Err(self.mark_gone(id).await),
            Err(e) => {
                tracing::error!(instance_id = %id, error = %e, "status check failed");
                return Err(LifecycleError::runtime("status check failed", e));
            }
        };

        let state = reconcile(record.state, observed);
        if state != record.state {
            self.registry.set_status_if(id, record.state, state).await;
        }

        Ok(InstanceHealth {
            instance_id: id.clone(),
            status: state,
            cpu_percent: metrics::cpu_percent(&sample.cpu, &sample.precpu),
            memory_usage: sample.memory_usage.unwrap_or(0),
            memory_limit: sample.memory_limit.unwrap_or(0),
            vnc_url: record.endpoint_url,
        })
    }

    /// Never fails as a whole; runtime errors degrade single entries.
    pub async fn list(&self) -> Vec<InstanceListing> {
        let records = self.registry.list().await;
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            out.push(self.observe(record).await);
        }
        out
    }

    async fn observe(&self, record: InstanceRecord) -> InstanceListing {
        let mut listing = InstanceListing {
            instance_id: record.id.clone(),
            status: record.state,
            vnc_url: record.endpoint_url.clone(),
            vnc_port: record.port,
            launched_at_unix_ms: record.launched_at_unix_ms,
            error: None,
        };
        let Some(handle) = &record.handle else {
            return listing;
        };

        match self.runtime.inspect_status(handle).await {
            Ok(Lookup::Found(observed)) => {
                listing.status = reconcile(record.state, observed);
            }
            Ok(Lookup::Gone) => {
                listing.status = InstanceState::NotFound;
            }
            Err(e) => {
                tracing::warn!(instance_id = %record.id, error = %e, "list: status check failed");
                listing.error = Some(e.to_string());
            }
        }
        if listing.status != record.state {
            self.registry
                .set_status_if(&record.id, record.state, listing.status)
                .await;
        }
        listing
    }

    pub async fn restart(&self, id: &InstanceId) -> Result<InstanceReply, LifecycleError> {
        let record = self.registry.get(id).await?;
        let Some(handle) = &record.handle else {
            return Err(LifecycleError::Conflict(format!(
                "Instance {id} is still launching"
            )));
        };

        match self.runtime.restart(handle, self.config.stop_grace).await {
            Ok(Lookup::Found(())) => {}
            Ok(Lookup::Gone) => return Err(self.mark_gone(id).await),
            Err(e) => {
                tracing::error!(instance_id = %id, error = %e, "restart failed");
                return Err(LifecycleError::runtime("restart failed", e));
            }
        }

        self.registry.set_status(id, InstanceState::Restarting).await;
        tracing::info!(instance_id = %id, "restarted instance");

        Ok(InstanceReply {
            instance_id: id.clone(),
            status: InstanceState::Restarting,
            vnc_url: Some(record.endpoint_url),
        })
    }

    pub async fn health(&self) -> HealthSummary {
        HealthSummary {
            status: "healthy",
            instances_count: self.registry.count().await,
        }
    }

    /// Stops every readiness watcher. Containers keep running.
    pub async fn shutdown(&self) {
        for record in self.registry.list().await {
            record.cancel.cancel();
        }
    }
}
