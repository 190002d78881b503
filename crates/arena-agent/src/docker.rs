use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use bollard::{
    Docker,
    errors::Error as BollardError,
    models::{ContainerCreateBody, ContainerStateStatusEnum, HostConfig, PortBinding},
    query_parameters::{
        CreateContainerOptionsBuilder, InspectContainerOptions, LogsOptionsBuilder,
        RemoveContainerOptionsBuilder, RestartContainerOptionsBuilder, StartContainerOptions,
        StatsOptionsBuilder, StopContainerOptionsBuilder,
    },
};
use futures_util::StreamExt;

use crate::runtime::{
    ContainerHandle, ContainerSpec, ContainerStatus, CpuSample, Lookup, ResourceSample,
    RuntimeDriver, RuntimeError,
};

const LOG_TAIL: &str = "all";
// Only the newest bytes are kept when the log is longer.
const MAX_OUTPUT_BYTES: usize = 256 * 1024;

/// [`RuntimeDriver`] backed by the local Docker daemon.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

fn is_not_found(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn api_error(op: &'static str, error: BollardError) -> RuntimeError {
    RuntimeError::Api {
        op,
        message: error.to_string(),
    }
}

/// Maps a per-container call result, turning 404 into [`Lookup::Gone`].
fn lookup<T>(op: &'static str, res: Result<T, BollardError>) -> Result<Lookup<T>, RuntimeError> {
    match res {
        Ok(v) => Ok(Lookup::Found(v)),
        Err(e) if is_not_found(&e) => Ok(Lookup::Gone),
        Err(e) => Err(api_error(op, e)),
    }
}

/// Appends `chunk`, then drops the oldest bytes so at most `max` remain.
fn push_bounded(out: &mut String, chunk: &str, max: usize) {
    out.push_str(chunk);
    if out.len() <= max {
        return;
    }
    let mut cut = out.len() - max;
    while !out.is_char_boundary(cut) {
        cut += 1;
    }
    out.drain(..cut);
}

fn grace_secs(grace: Duration) -> i32 {
    grace.as_secs().min(i32::MAX as u64) as i32
}

fn map_status(status: Option<ContainerStateStatusEnum>) -> ContainerStatus {
    match status {
        Some(ContainerStateStatusEnum::CREATED) => ContainerStatus::Created,
        Some(ContainerStateStatusEnum::RUNNING) => ContainerStatus::Running,
        Some(ContainerStateStatusEnum::PAUSED) => ContainerStatus::Paused,
        Some(ContainerStateStatusEnum::RESTARTING) => ContainerStatus::Restarting,
        Some(ContainerStateStatusEnum::REMOVING) => ContainerStatus::Removing,
        Some(ContainerStateStatusEnum::EXITED) => ContainerStatus::Exited,
        Some(ContainerStateStatusEnum::DEAD) => ContainerStatus::Dead,
        _ => ContainerStatus::Unknown,
    }
}

fn create_body(spec: &ContainerSpec) -> ContainerCreateBody {
    let port_key = format!("{}/tcp", spec.port.container_port);
    let mut port_bindings = HashMap::new();
    port_bindings.insert(
        port_key.clone(),
        Some(vec![PortBinding {
            host_ip: None,
            host_port: Some(spec.port.host_port.to_string()),
        }]),
    );
    let mut exposed_ports = HashMap::new();
    exposed_ports.insert(port_key, HashMap::new());

    ContainerCreateBody {
        image: Some(spec.image.clone()),
        env: Some(spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect()),
        exposed_ports: Some(exposed_ports),
        host_config: Some(HostConfig {
            port_bindings: Some(port_bindings),
            memory: Some(spec.memory_limit_bytes),
            cpu_period: Some(spec.cpu_period_us),
            cpu_quota: Some(spec.cpu_quota_us),
            cap_add: if spec.cap_add.is_empty() {
                None
            } else {
                Some(spec.cap_add.clone())
            },
            network_mode: spec.network.clone(),
            ..HostConfig::default()
        }),
        ..ContainerCreateBody::default()
    }
}

impl DockerRuntime {
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Connect(e.to_string()))?;
        Ok(Self { docker })
    }

    pub async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Connect(e.to_string()))
    }
}

#[async_trait]
impl RuntimeDriver for DockerRuntime {
    async fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptionsBuilder::new().name(&spec.name).build()),
                create_body(spec),
            )
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    RuntimeError::ImageNotFound(spec.image.clone())
                } else {
                    api_error("create_container", e)
                }
            })?;

        if let Err(e) = self
            .docker
            .start_container(&created.id, None::<StartContainerOptions>)
            .await
        {
            // Don't leave a created-but-dead container holding the name.
            if let Err(rm) = self
                .docker
                .remove_container(
                    &created.id,
                    Some(RemoveContainerOptionsBuilder::new().force(true).build()),
                )
                .await
            {
                tracing::warn!(
                    container = %created.id,
                    error = %rm,
                    "failed to remove container after start failure"
                );
            }
            return Err(api_error("start_container", e));
        }

        Ok(ContainerHandle(created.id))
    }

    async fn stop(
        &self,
        handle: &ContainerHandle,
        grace: Duration,
    ) -> Result<Lookup<()>, RuntimeError> {
        let res = self
            .docker
            .stop_container(
                &handle.0,
                Some(StopContainerOptionsBuilder::new().t(grace_secs(grace)).build()),
            )
            .await;
        match res {
            // 304: already stopped.
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(Lookup::Found(())),
            other => lookup("stop_container", other),
        }
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<Lookup<()>, RuntimeError> {
        let res = self
            .docker
            .remove_container(
                &handle.0,
                Some(RemoveContainerOptionsBuilder::new().force(true).build()),
            )
            .await;
        lookup("remove_container", res)
    }

    async fn restart(
        &self,
        handle: &ContainerHandle,
        grace: Duration,
    ) -> Result<Lookup<()>, RuntimeError> {
        let res = self
            .docker
            .restart_container(
                &handle.0,
                Some(RestartContainerOptionsBuilder::new().t(grace_secs(grace)).build()),
            )
            .await;
        lookup("restart_container", res)
    }

    async fn inspect_status(
        &self,
        handle: &ContainerHandle,
    ) -> Result<Lookup<ContainerStatus>, RuntimeError> {
        let res = self
            .docker
            .inspect_container(&handle.0, None::<InspectContainerOptions>)
            .await;
        Ok(match lookup("inspect_container", res)? {
            Lookup::Found(info) => {
                Lookup::Found(map_status(info.state.and_then(|s| s.status)))
            }
            Lookup::Gone => Lookup::Gone,
        })
    }

    async fn recent_output(&self, handle: &ContainerHandle) -> Result<Lookup<String>, RuntimeError> {
        let mut stream = Box::pin(self.docker.logs(
            &handle.0,
            Some(
                LogsOptionsBuilder::new()
                    .stdout(true)
                    .stderr(true)
                    .tail(LOG_TAIL)
                    .build(),
            ),
        ));

        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(log) => {
                    push_bounded(
                        &mut out,
                        &String::from_utf8_lossy(&log.into_bytes()),
                        MAX_OUTPUT_BYTES,
                    );
                }
                Err(e) if is_not_found(&e) => return Ok(Lookup::Gone),
                Err(e) => return Err(api_error("logs", e)),
            }
        }
        Ok(Lookup::Found(out))
    }

    async fn resource_sample(
        &self,
        handle: &ContainerHandle,
    ) -> Result<Lookup<ResourceSample>, RuntimeError> {
        let mut stream = Box::pin(self.docker.stats(
            &handle.0,
            Some(
                StatsOptionsBuilder::new()
                    .stream(false)
                    .one_shot(false)
                    .build(),
            ),
        ));

        let stats = match stream.next().await {
            Some(Ok(stats)) => stats,
            Some(Err(e)) if is_not_found(&e) => return Ok(Lookup::Gone),
            Some(Err(e)) => return Err(api_error("stats", e)),
            None => {
                return Err(RuntimeError::Api {
                    op: "stats",
                    message: "stats stream ended without a sample".to_string(),
                });
            }
        };

        let cpu = |s: Option<bollard::models::ContainerCpuStats>| {
            s.map(|c| CpuSample {
                total_usage: c.cpu_usage.and_then(|u| u.total_usage),
                system_usage: c.system_cpu_usage,
                online_cpus: c.online_cpus,
            })
            .unwrap_or_default()
        };
        let memory = stats.memory_stats;

        Ok(Lookup::Found(ResourceSample {
            cpu: cpu(stats.cpu_stats),
            precpu: cpu(stats.precpu_stats),
            memory_usage: memory.as_ref().and_then(|m| m.usage),
            memory_limit: memory.as_ref().and_then(|m| m.limit),
        }))
    }
}
