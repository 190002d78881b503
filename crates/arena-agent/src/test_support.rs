use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::runtime::{
    ContainerHandle, ContainerSpec, ContainerStatus, CpuSample, Lookup, ResourceSample,
    RuntimeDriver, RuntimeError,
};

#[derive(Debug)]
struct FakeContainer {
    spec: ContainerSpec,
    status: ContainerStatus,
    // Each read pops the front; the last entry sticks.
    outputs: VecDeque<String>,
    sample: ResourceSample,
}

#[derive(Debug, Default)]
struct FakeState {
    containers: HashMap<String, FakeContainer>,
    default_output: String,
    start_error: Option<RuntimeError>,
    start_gate: Option<Arc<Semaphore>>,
    inspect_errors: u32,
    stop_error: Option<RuntimeError>,
    calls: Vec<String>,
}

/// Scriptable in-memory runtime.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
    next_id: AtomicU64,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output every newly started container reports.
    pub fn with_default_output(self, output: &str) -> Self {
        self.state.lock().unwrap().default_output = output.to_string();
        self
    }

    pub fn fail_start(&self, err: RuntimeError) {
        self.state.lock().unwrap().start_error = Some(err);
    }

    pub fn clear_start_failure(&self) {
        self.state.lock().unwrap().start_error = None;
    }

    /// From now on every `start` waits for a permit on the returned
    /// semaphore before creating its container. Waiters are served in order.
    pub fn gate_starts(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.state.lock().unwrap().start_gate = Some(gate.clone());
        gate
    }

    pub fn fail_stop(&self, err: RuntimeError) {
        self.state.lock().unwrap().stop_error = Some(err);
    }

    /// The next `n` inspect calls return an API error.
    pub fn fail_inspects(&self, n: u32) {
        self.state.lock().unwrap().inspect_errors = n;
    }

    pub fn add_container(&self, handle: &str, status: ContainerStatus, outputs: &[&str]) {
        let spec = ContainerSpec {
            name: handle.to_string(),
            image: "test".to_string(),
            env: Vec::new(),
            port: crate::runtime::PortMapping {
                container_port: 8080,
                host_port: 0,
            },
            memory_limit_bytes: 0,
            cpu_period_us: 0,
            cpu_quota_us: 0,
            cap_add: Vec::new(),
            network: None,
        };
        self.state.lock().unwrap().containers.insert(
            handle.to_string(),
            FakeContainer {
                spec,
                status,
                outputs: outputs.iter().map(|s| s.to_string()).collect(),
                sample: ResourceSample::default(),
            },
        );
    }

    pub fn set_status(&self, handle: &ContainerHandle, status: ContainerStatus) {
        if let Some(c) = self.state.lock().unwrap().containers.get_mut(&handle.0) {
            c.status = status;
        }
    }

    pub fn set_output(&self, handle: &ContainerHandle, output: &str) {
        if let Some(c) = self.state.lock().unwrap().containers.get_mut(&handle.0) {
            c.outputs = VecDeque::from([output.to_string()]);
        }
    }

    pub fn set_sample(&self, handle: &ContainerHandle, sample: ResourceSample) {
        if let Some(c) = self.state.lock().unwrap().containers.get_mut(&handle.0) {
            c.sample = sample;
        }
    }

    /// Simulates `docker rm -f` run by someone else.
    pub fn remove_out_of_band(&self, handle: &ContainerHandle) {
        self.state.lock().unwrap().containers.remove(&handle.0);
    }

    pub fn exists(&self, handle: &ContainerHandle) -> bool {
        self.state.lock().unwrap().containers.contains_key(&handle.0)
    }

    pub fn spec_of(&self, handle: &ContainerHandle) -> Option<ContainerSpec> {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(&handle.0)
            .map(|c| c.spec.clone())
    }

    /// Handles of every container that still exists, sorted.
    pub fn live(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .state
            .lock()
            .unwrap()
            .containers
            .keys()
            .cloned()
            .collect();
        out.sort();
        out
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn started(&self) -> usize {
        self.calls().iter().filter(|c| c.starts_with("start ")).count()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

pub fn busy_sample() -> ResourceSample {
    ResourceSample {
        cpu: CpuSample {
            total_usage: Some(1_200),
            system_usage: Some(11_000),
            online_cpus: Some(2),
        },
        precpu: CpuSample {
            total_usage: Some(1_000),
            system_usage: Some(10_000),
            online_cpus: Some(2),
        },
        memory_usage: Some(512 * 1024 * 1024),
        memory_limit: Some(2 * 1024 * 1024 * 1024),
    }
}

#[async_trait]
impl RuntimeDriver for FakeRuntime {
    async fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle, RuntimeError> {
        self.record(format!("start {}", spec.name));
        let gate = self.state.lock().unwrap().start_gate.clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }
        let mut st = self.state.lock().unwrap();
        if let Some(err) = st.start_error.clone() {
            return Err(err);
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handle = format!("fake-{n}");
        let output = st.default_output.clone();
        st.containers.insert(
            handle.clone(),
            FakeContainer {
                spec: spec.clone(),
                status: ContainerStatus::Running,
                outputs: VecDeque::from([output]),
                sample: ResourceSample::default(),
            },
        );
        Ok(ContainerHandle(handle))
    }

    async fn stop(
        &self,
        handle: &ContainerHandle,
        _grace: Duration,
    ) -> Result<Lookup<()>, RuntimeError> {
        self.record(format!("stop {handle}"));
        let mut st = self.state.lock().unwrap();
        if let Some(err) = st.stop_error.clone() {
            return Err(err);
        }
        match st.containers.get_mut(&handle.0) {
            Some(c) => {
                c.status = ContainerStatus::Exited;
                Ok(Lookup::Found(()))
            }
            None => Ok(Lookup::Gone),
        }
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<Lookup<()>, RuntimeError> {
        self.record(format!("remove {handle}"));
        let mut st = self.state.lock().unwrap();
        match st.containers.remove(&handle.0) {
            Some(_) => Ok(Lookup::Found(())),
            None => Ok(Lookup::Gone),
        }
    }

    async fn restart(
        &self,
        handle: &ContainerHandle,
        _grace: Duration,
    ) -> Result<Lookup<()>, RuntimeError> {
        self.record(format!("restart {handle}"));
        let mut st = self.state.lock().unwrap();
        match st.containers.get_mut(&handle.0) {
            Some(c) => {
                c.status = ContainerStatus::Running;
                Ok(Lookup::Found(()))
            }
            None => Ok(Lookup::Gone),
        }
    }

    async fn inspect_status(
        &self,
        handle: &ContainerHandle,
    ) -> Result<Lookup<ContainerStatus>, RuntimeError> {
        let mut st = self.state.lock().unwrap();
        if st.inspect_errors > 0 {
            st.inspect_errors -= 1;
            return Err(RuntimeError::Api {
                op: "inspect_container",
                message: "daemon busy".to_string(),
            });
        }
        Ok(match st.containers.get(&handle.0) {
            Some(c) => Lookup::Found(c.status),
            None => Lookup::Gone,
        })
    }

    async fn recent_output(&self, handle: &ContainerHandle) -> Result<Lookup<String>, RuntimeError> {
        let mut st = self.state.lock().unwrap();
        let Some(c) = st.containers.get_mut(&handle.0) else {
            return Ok(Lookup::Gone);
        };
        let out = if c.outputs.len() > 1 {
            c.outputs.pop_front().unwrap_or_default()
        } else {
            c.outputs.front().cloned().unwrap_or_default()
        };
        Ok(Lookup::Found(out))
    }

    async fn resource_sample(
        &self,
        handle: &ContainerHandle,
    ) -> Result<Lookup<ResourceSample>, RuntimeError> {
        let st = self.state.lock().unwrap();
        Ok(match st.containers.get(&handle.0) {
            Some(c) => Lookup::Found(c.sample),
            None => Lookup::Gone,
        })
    }
}
