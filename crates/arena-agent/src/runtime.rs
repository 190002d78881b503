//! Container runtime seam.
//!
//! Everything the lifecycle manager and readiness watchers do to a container
//! goes through [`RuntimeDriver`]. A container that was removed behind the
//! agent's back is reported as [`Lookup::Gone`], never as an error, so callers
//! have to decide explicitly how to reconcile it.

use std::time::Duration;

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle(pub String);

impl std::fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    Gone,
}

impl<T> Lookup<T> {
    pub fn is_gone(&self) -> bool {
        matches!(self, Lookup::Gone)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

impl ContainerStatus {
    pub fn is_running(self) -> bool {
        matches!(self, ContainerStatus::Running)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuSample {
    pub total_usage: Option<u64>,
    pub system_usage: Option<u64>,
    pub online_cpus: Option<u32>,
}

/// One stats reading. The runtime reports the preceding CPU counters
/// alongside the current ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceSample {
    pub cpu: CpuSample,
    pub precpu: CpuSample,
    pub memory_usage: Option<u64>,
    pub memory_limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<(String, String)>,
    pub port: PortMapping,
    pub memory_limit_bytes: i64,
    pub cpu_period_us: i64,
    pub cpu_quota_us: i64,
    pub cap_add: Vec<String>,
    pub network: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    #[error("image not found: {0}")]
    ImageNotFound(String),
    #[error("runtime connection failed: {0}")]
    Connect(String),
    #[error("{op} failed: {message}")]
    Api { op: &'static str, message: String },
}

#[async_trait]
pub trait RuntimeDriver: Send + Sync {
    async fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError>;

    async fn stop(
        &self,
        handle: &ContainerHandle,
        grace: Duration,
    ) -> Result<Lookup<()>, RuntimeError>;

    async fn remove(&self, handle: &ContainerHandle) -> Result<Lookup<()>, RuntimeError>;

    async fn restart(
        &self,
        handle: &ContainerHandle,
        grace: Duration,
    ) -> Result<Lookup<()>, RuntimeError>;

    async fn inspect_status(
        &self,
        handle: &ContainerHandle,
    ) -> Result<Lookup<ContainerStatus>, RuntimeError>;

    async fn recent_output(&self, handle: &ContainerHandle) -> Result<Lookup<String>, RuntimeError>;

    async fn resource_sample(
        &self,
        handle: &ContainerHandle,
    ) -> Result<Lookup<ResourceSample>, RuntimeError>;
}
