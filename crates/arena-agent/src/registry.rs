use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use arena_instance::{InstanceId, InstanceState};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::LifecycleError;
use crate::port_alloc;
use crate::runtime::ContainerHandle;

#[derive(Debug, Clone)]
pub struct InstanceRecord {
    pub id: InstanceId,
    /// `None` between reservation and a successful container start.
    pub handle: Option<ContainerHandle>,
    pub port: u16,
    pub state: InstanceState,
    pub endpoint_url: String,
    pub launched_at_unix_ms: u64,
    /// Distinguishes successive reservations of the same id.
    pub reservation: u64,
    /// Stops the instance's readiness watcher.
    pub cancel: CancellationToken,
}

impl InstanceRecord {
    pub fn new(id: InstanceId, port: u16, host: &str) -> Self {
        Self {
            id,
            handle: None,
            port,
            state: InstanceState::Starting,
            endpoint_url: port_alloc::endpoint_url(host, port),
            launched_at_unix_ms: now_unix_ms(),
            reservation: 0,
            cancel: CancellationToken::new(),
        }
    }
}

fn now_unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// In-memory instance table. Cloning shares the same table.
#[derive(Clone, Debug, Default)]
pub struct InstanceRegistry {
    inner: Arc<Mutex<HashMap<InstanceId, InstanceRecord>>>,
    next_reservation: Arc<AtomicU64>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: InstanceRecord) -> Result<(), LifecycleError> {
        let mut map = self.inner.lock().await;
        if map.contains_key(&record.id) {
            return Err(LifecycleError::Conflict(format!(
                "Instance {} already exists",
                record.id
            )));
        }
        map.insert(record.id.clone(), record);
        Ok(())
    }

    /// Admission, id check and port allocation as one step under the lock.
    pub async fn reserve(
        &self,
        id: &InstanceId,
        max_instances: usize,
        base_port: u16,
        host: &str,
    ) -> Result<InstanceRecord, LifecycleError> {
        let mut map = self.inner.lock().await;
        if map.len() >= max_instances {
            return Err(LifecycleError::ResourceExhausted(format!(
                "Maximum instances ({max_instances}) reached"
            )));
        }
        if map.contains_key(id) {
            return Err(LifecycleError::Conflict(format!(
                "Instance {id} already exists"
            )));
        }

        let in_use: HashSet<u16> = map.values().map(|r| r.port).collect();
        let port = port_alloc::allocate_vnc_port(base_port, &in_use).ok_or_else(|| {
            LifecycleError::ResourceExhausted(format!("no free VNC port above {base_port}"))
        })?;

        let mut record = InstanceRecord::new(id.clone(), port, host);
        record.reservation = self.next_reservation.fetch_add(1, Ordering::Relaxed) + 1;
        map.insert(id.clone(), record.clone());
        Ok(record)
    }

    /// Binds a started container to the reservation that launched it.
    /// `NotFound` once that reservation is gone, even if the id was
    /// reserved again since.
    pub async fn attach_handle(
        &self,
        id: &InstanceId,
        reservation: u64,
        handle: ContainerHandle,
    ) -> Result<InstanceRecord, LifecycleError> {
        let mut map = self.inner.lock().await;
        let Some(e) = map.get_mut(id).filter(|e| e.reservation == reservation) else {
            return Err(LifecycleError::NotFound(id.to_string()));
        };
        e.handle = Some(handle);
        Ok(e.clone())
    }

    pub async fn get(&self, id: &InstanceId) -> Result<InstanceRecord, LifecycleError> {
        let map = self.inner.lock().await;
        map.get(id)
            .cloned()
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))
    }

    pub async fn remove(&self, id: &InstanceId) -> Result<InstanceRecord, LifecycleError> {
        let mut map = self.inner.lock().await;
        map.remove(id)
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))
    }

    /// Drops a reservation only if it is still the one stored under `id`.
    pub async fn release(&self, id: &InstanceId, reservation: u64) -> bool {
        let mut map = self.inner.lock().await;
        if map.get(id).is_some_and(|e| e.reservation == reservation) {
            map.remove(id);
            return true;
        }
        false
    }

    /// Late writes for removed instances are dropped. Returns whether a
    /// record was updated.
    pub async fn set_status(&self, id: &InstanceId, state: InstanceState) -> bool {
        let mut map = self.inner.lock().await;
        let Some(e) = map.get_mut(id) else {
            return false;
        };
        e.state = state;
        true
    }

    /// Writes `state` only while the stored state is still `expected`.
    pub async fn set_status_if(
        &self,
        id: &InstanceId,
        expected: InstanceState,
        state: InstanceState,
    ) -> bool {
        let mut map = self.inner.lock().await;
        match map.get_mut(id) {
            Some(e) if e.state == expected => {
                e.state = state;
                true
            }
            _ => false,
        }
    }

    /// Snapshot of every record, ordered by id.
    pub async fn list(&self) -> Vec<InstanceRecord> {
        let map = self.inner.lock().await;
        let mut out: Vec<InstanceRecord> = map.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub async fn count(&self) -> usize {
        self.inner.lock().await.len()
    }
}
