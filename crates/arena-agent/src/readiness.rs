use std::{sync::Arc, time::Duration};

use arena_instance::{InstanceId, InstanceState};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::registry::InstanceRegistry;
use crate::runtime::{ContainerHandle, Lookup, RuntimeDriver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Poll {
    Pending,
    Ready,
    Stopped,
}

/// Polls a freshly started container until its output shows the game reached
/// the lobby. Terminal states are written into the registry; the watcher never
/// reports errors to anyone else.
#[derive(Clone)]
pub struct ReadinessWatcher {
    registry: InstanceRegistry,
    runtime: Arc<dyn RuntimeDriver>,
    markers: Arc<[String]>,
    attempts: u32,
    interval: Duration,
}

impl ReadinessWatcher {
    pub fn new(
        registry: InstanceRegistry,
        runtime: Arc<dyn RuntimeDriver>,
        markers: Vec<String>,
        attempts: u32,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            runtime,
            markers: markers.into(),
            attempts,
            interval,
        }
    }

    pub fn spawn(
        &self,
        id: InstanceId,
        handle: ContainerHandle,
        cancel: CancellationToken,
    ) -> JoinHandle<Option<InstanceState>> {
        let watcher = self.clone();
        tokio::spawn(async move { watcher.run(id, handle, cancel).await })
    }

    /// Returns the terminal state written, or `None` when cancelled first.
    pub async fn run(
        &self,
        id: InstanceId,
        handle: ContainerHandle,
        cancel: CancellationToken,
    ) -> Option<InstanceState> {
        for _ in 0..self.attempts {
            if cancel.is_cancelled() {
                return None;
            }

            let next = match self.poll_once(&id, &handle).await {
                Poll::Stopped => Some(InstanceState::Failed),
                Poll::Ready => Some(InstanceState::Ready),
                Poll::Pending => None,
            };
            if let Some(state) = next {
                return self.finish(&id, state, &cancel).await;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(instance_id = %id, "readiness watch cancelled");
                    return None;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        tracing::warn!(
            instance_id = %id,
            attempts = self.attempts,
            "readiness markers never seen; assuming the container is running"
        );
        self.finish(&id, InstanceState::Running, &cancel).await
    }

    async fn finish(
        &self,
        id: &InstanceId,
        state: InstanceState,
        cancel: &CancellationToken,
    ) -> Option<InstanceState> {
        if cancel.is_cancelled() {
            return None;
        }
        if self.registry.set_status(id, state).await {
            match state {
                InstanceState::Failed => {
                    tracing::error!(instance_id = %id, "container stopped before becoming ready")
                }
                _ => tracing::info!(instance_id = %id, %state, "instance readiness settled"),
            }
        }
        Some(state)
    }

    async fn poll_once(&self, id: &InstanceId, handle: &ContainerHandle) -> Poll {
        match self.runtime.inspect_status(handle).await {
            Ok(Lookup::Found(status)) if status.is_running() => {}
            Ok(Lookup::Found(status)) => {
                tracing::warn!(instance_id = %id, ?status, "container left the running state");
                return Poll::Stopped;
            }
            Ok(Lookup::Gone) => {
                tracing::warn!(instance_id = %id, "container disappeared during readiness watch");
                return Poll::Stopped;
            }
            Err(e) => {
                tracing::warn!(instance_id = %id, error = %e, "readiness status check failed");
                return Poll::Pending;
            }
        }

        match self.runtime.recent_output(handle).await {
            Ok(Lookup::Found(output)) if self.markers.iter().any(|m| output.contains(m.as_str())) => {
                Poll::Ready
            }
            Ok(_) => Poll::Pending,
            Err(e) => {
                tracing::warn!(instance_id = %id, error = %e, "readiness output check failed");
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InstanceRecord;
    use crate::runtime::ContainerStatus;
    use crate::test_support::FakeRuntime;

    async fn setup(
        outputs: &[&str],
        status: ContainerStatus,
        attempts: u32,
    ) -> (Arc<FakeRuntime>, InstanceRegistry, ReadinessWatcher) {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.add_container("c1", status, outputs);
        let registry = InstanceRegistry::new();
        registry
            .insert(InstanceRecord::new(InstanceId::from("m1"), 5901, "localhost"))
            .await
            .unwrap();
        let watcher = ReadinessWatcher::new(
            registry.clone(),
            runtime.clone(),
            vec!["Brood War".into(), "Lobby".into(), "StarCraft".into()],
            attempts,
            Duration::from_secs(1),
        );
        (runtime, registry, watcher)
    }

    fn handle() -> ContainerHandle {
        ContainerHandle("c1".into())
    }

    #[tokio::test(start_paused = true)]
    async fn ready_once_marker_appears() {
        let (_rt, reg, w) = setup(
            &["booting", "loading maps", "Entering Lobby"],
            ContainerStatus::Running,
            45,
        )
        .await;

        let started = tokio::time::Instant::now();
        let out = w
            .run(InstanceId::from("m1"), handle(), CancellationToken::new())
            .await;
        assert_eq!(out, Some(InstanceState::Ready));
        // Third poll, two sleeps.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
        assert_eq!(
            reg.get(&InstanceId::from("m1")).await.unwrap().state,
            InstanceState::Ready
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_when_container_exits_regardless_of_output() {
        let (_rt, reg, w) = setup(&["StarCraft Lobby"], ContainerStatus::Exited, 45).await;
        let out = w
            .run(InstanceId::from("m1"), handle(), CancellationToken::new())
            .await;
        assert_eq!(out, Some(InstanceState::Failed));
        assert_eq!(
            reg.get(&InstanceId::from("m1")).await.unwrap().state,
            InstanceState::Failed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_when_container_removed() {
        let (rt, _reg, w) = setup(&["booting"], ContainerStatus::Running, 45).await;
        rt.remove_out_of_band(&handle());
        let out = w
            .run(InstanceId::from("m1"), handle(), CancellationToken::new())
            .await;
        assert_eq!(out, Some(InstanceState::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn budget_exhaustion_marks_running() {
        let (_rt, reg, w) = setup(&["still booting"], ContainerStatus::Running, 5).await;
        let started = tokio::time::Instant::now();
        let out = w
            .run(InstanceId::from("m1"), handle(), CancellationToken::new())
            .await;
        assert_eq!(out, Some(InstanceState::Running));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6));
        assert_eq!(
            reg.get(&InstanceId::from("m1")).await.unwrap().state,
            InstanceState::Running
        );
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let (rt, _reg, w) = setup(&["Brood War"], ContainerStatus::Running, 45).await;
        rt.fail_inspects(3);
        let started = tokio::time::Instant::now();
        let out = w
            .run(InstanceId::from("m1"), handle(), CancellationToken::new())
            .await;
        assert_eq!(out, Some(InstanceState::Ready));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_watcher_writes_nothing() {
        let (rt, reg, w) = setup(&["booting"], ContainerStatus::Running, 45).await;
        let cancel = CancellationToken::new();
        let task = w.spawn(InstanceId::from("m1"), handle(), cancel.clone());

        tokio::time::sleep(Duration::from_millis(2500)).await;
        cancel.cancel();
        // Would otherwise fail on the next poll.
        rt.set_status(&handle(), ContainerStatus::Exited);

        assert_eq!(task.await.unwrap(), None);
        assert_eq!(
            reg.get(&InstanceId::from("m1")).await.unwrap().state,
            InstanceState::Starting
        );
    }

    #[tokio::test(start_paused = true)]
    async fn write_after_removal_is_discarded() {
        let (_rt, reg, w) = setup(&["Lobby"], ContainerStatus::Running, 45).await;
        reg.remove(&InstanceId::from("m1")).await.unwrap();
        let out = w
            .run(InstanceId::from("m1"), handle(), CancellationToken::new())
            .await;
        assert_eq!(out, Some(InstanceState::Ready));
        assert_eq!(reg.count().await, 0);
    }
}
