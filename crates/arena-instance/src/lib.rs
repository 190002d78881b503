use specta::Type;

/// Caller-supplied instance identifier.
///
/// NOTE: The agent does not mint ids. Orchestration tooling picks them and the
/// agent only enforces uniqueness across live instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize, Type)]
#[serde(transparent)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, Type)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Starting,
    Ready,
    Running,
    Failed,
    Restarting,
    Exited,
    NotFound,
    /// Only ever reported in a terminate response; never stored.
    Terminated,
}

impl InstanceState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Restarting => "restarting",
            Self::Exited => "exited",
            Self::NotFound => "not_found",
            Self::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Launch, terminate and restart reply.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Type)]
pub struct InstanceReply {
    pub instance_id: InstanceId,
    pub status: InstanceState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vnc_url: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Type)]
pub struct InstanceHealth {
    pub instance_id: InstanceId,
    pub status: InstanceState,
    pub cpu_percent: f64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub vnc_url: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, Type)]
pub struct InstanceListing {
    pub instance_id: InstanceId,
    pub status: InstanceState,
    pub vnc_url: String,
    pub vnc_port: u16,
    pub launched_at_unix_ms: u64,
    // Set when the runtime could not be queried for this entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
