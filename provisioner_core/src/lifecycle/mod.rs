//! Instance lifecycle: create, start, gate on readiness, seed, track, stop.
//!
//! Every provisioning request runs as its own task. Whatever the task
//! acquires is registered on its [`ProvisionAttempt`] before the next step,
//! so a failure, a panic or a caller that goes away all end in the same
//! rollback: capture the container logs, then stop and remove.
//!
//! The instance table is the only shared mutable state. An instance is
//! inserted once it is fully seeded and removed in the same critical section
//! that looks it up on stop.

mod attempt;
mod instance;
mod retry;

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use container_driver_interface::{
    ContainerDriver, ContainerHandle, ContainerSpec, INSTANCE_LABEL, KIND_LABEL, MANAGED_LABEL,
};
use futures_util::future::join_all;
use futures_util::FutureExt;
use preset_registry::{ImageSpec, PresetRegistry};
use provisioner_shared_types::{
    Address, InstanceId, InstanceState, Options, Preset, ProvisionError, Result,
};
use tokio::sync::RwLock;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::readiness::ReadinessProber;
use attempt::ProvisionAttempt;

pub use instance::{Instance, InstanceView, ProvisionFailure};
pub use retry::{retry_transient, RetryPolicy};

/// Defaults applied when a request does not override them.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Pull, create, start and port discovery.
    pub start_timeout: Duration,
    /// Readiness polling.
    pub wait_timeout: Duration,
    pub retry: RetryPolicy,
    /// Container log lines attached to a failed provision.
    pub log_tail: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(300),
            wait_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            log_tail: 50,
        }
    }
}

/// Sole owner of provisioned instances and their container handles.
#[derive(Clone)]
pub struct LifecycleManager {
    driver: Arc<dyn ContainerDriver>,
    registry: Arc<PresetRegistry>,
    prober: ReadinessProber,
    config: Arc<LifecycleConfig>,
    instances: Arc<RwLock<HashMap<InstanceId, Instance>>>,
    closing: CancellationToken,
    tasks: TaskTracker,
}

impl LifecycleManager {
    pub fn new(driver: Arc<dyn ContainerDriver>, registry: Arc<PresetRegistry>) -> Self {
        Self {
            driver,
            registry,
            prober: ReadinessProber::default(),
            config: Arc::new(LifecycleConfig::default()),
            instances: Arc::new(RwLock::new(HashMap::new())),
            closing: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn with_config(mut self, config: LifecycleConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn with_prober(mut self, prober: ReadinessProber) -> Self {
        self.prober = prober;
        self
    }

    pub fn registry(&self) -> &Arc<PresetRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Validate the request, then run the provisioning pipeline on its own
    /// task. Dropping the returned future cancels the pipeline, which still
    /// rolls back whatever it had acquired.
    pub async fn provision(
        &self,
        options: Options,
        preset: Preset,
    ) -> std::result::Result<InstanceView, ProvisionFailure> {
        options.validate()?;
        let preset = preset.with_tag(options.tag());
        self.registry.validate(&preset)?;

        let id = Uuid::new_v4();
        let cancel = self.closing.child_token();
        let guard = cancel.clone().drop_guard();

        info!(instance_id = %id, kind = %preset.kind(), "Provisioning instance");
        let manager = self.clone();
        let task = self
            .tasks
            .spawn(async move { manager.run_provision(id, options, preset, cancel).await });

        let result = task.await;
        guard.disarm();

        match result {
            Ok(outcome) => outcome,
            Err(e) => Err(ProvisionFailure::new(ProvisionError::Internal(format!(
                "provisioning task failed: {e}"
            )))),
        }
    }

    /// Stop and remove a running instance. The id is forgotten even when the
    /// runtime reports an error, so a second stop is always not-found.
    pub async fn stop(&self, id: InstanceId) -> Result<()> {
        let instance = self
            .instances
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| ProvisionError::NotFound(id.to_string()))?;

        info!(instance_id = %id, kind = %instance.kind, "Stopping instance");
        debug!(instance_id = %id, from = %InstanceState::Running, to = %InstanceState::Stopping, "Instance state changed");

        if let Err(e) = self.release_instance(&instance).await {
            warn!(instance_id = %id, error = %e, "Instance was not removed cleanly");
            return Err(e);
        }

        debug!(instance_id = %id, from = %InstanceState::Stopping, to = %InstanceState::Removed, "Instance state changed");
        info!(instance_id = %id, "Instance removed");
        Ok(())
    }

    pub async fn get(&self, id: InstanceId) -> Option<InstanceView> {
        self.instances.read().await.get(&id).map(Instance::view)
    }

    /// Running instances, oldest first.
    pub async fn list(&self) -> Vec<InstanceView> {
        let mut views: Vec<_> = self.instances.read().await.values().map(Instance::view).collect();
        views.sort_by_key(|view| view.created_at);
        views
    }

    /// Cancel in-flight provisions and refuse new ones. Running instances
    /// are left alone until [`shutdown`](Self::shutdown).
    pub fn begin_shutdown(&self) {
        if !self.closing.is_cancelled() {
            info!("Cancelling in-flight provisions");
            self.closing.cancel();
        }
    }

    /// Cancel in-flight provisions, wait for their rollback, then stop every
    /// running instance. Returns how many instances were stopped.
    pub async fn shutdown(&self) -> usize {
        self.begin_shutdown();
        self.tasks.close();
        self.tasks.wait().await;

        let drained: Vec<Instance> = self
            .instances
            .write()
            .await
            .drain()
            .map(|(_, instance)| instance)
            .collect();

        info!(count = drained.len(), "Stopping live instances");
        let results = join_all(drained.iter().map(|instance| self.release_instance(instance))).await;
        for (instance, result) in drained.iter().zip(results) {
            if let Err(e) = result {
                error!(instance_id = %instance.id, error = %e, "Failed to remove instance on shutdown");
            }
        }
        drained.len()
    }

    async fn run_provision(
        self,
        id: InstanceId,
        options: Options,
        preset: Preset,
        cancel: CancellationToken,
    ) -> std::result::Result<InstanceView, ProvisionFailure> {
        let mut attempt = ProvisionAttempt::new(id, preset.kind(), options.debug);

        let outcome = AssertUnwindSafe(self.pipeline(&mut attempt, &options, &preset, &cancel))
            .catch_unwind()
            .await;

        let error = match outcome {
            Ok(Ok(instance)) => match self.commit(instance, &cancel).await {
                Ok(view) => {
                    attempt.transition(InstanceState::Running);
                    info!(instance_id = %id, kind = %view.kind, host = %view.host, "Instance running");
                    return Ok(view);
                }
                Err(e) => e,
            },
            Ok(Err(e)) => e,
            Err(panic) => ProvisionError::Internal(format!(
                "provisioning panicked: {}",
                panic_message(panic.as_ref())
            )),
        };

        attempt.transition(InstanceState::Failed);
        warn!(instance_id = %id, error = %error, "Provisioning failed, rolling back");
        let logs = self.rollback(&attempt).await;
        Err(ProvisionFailure::new(error).with_logs(logs))
    }

    async fn pipeline(
        &self,
        attempt: &mut ProvisionAttempt,
        options: &Options,
        preset: &Preset,
        cancel: &CancellationToken,
    ) -> Result<Instance> {
        let handler = self.registry.get(preset.kind())?;
        let image = self.registry.resolve(preset)?;
        let spec = container_spec(attempt.id, &image, options, preset);

        let start_timeout = options.start_timeout.unwrap_or(self.config.start_timeout);
        let (handle, address) = cancellable(cancel, async {
            match time::timeout(start_timeout, self.start_container(attempt, &spec)).await {
                Ok(started) => started,
                Err(_) => Err(ProvisionError::Timeout {
                    what: "container start".to_string(),
                    elapsed: start_timeout,
                    last_error: format!("{} was not running with its ports bound", spec.image),
                }),
            }
        })
        .await?;

        let wait_timeout = options.wait_timeout.unwrap_or(self.config.wait_timeout);
        cancellable(
            cancel,
            self.prober
                .wait_ready(handler.as_ref(), preset, &address, wait_timeout),
        )
        .await?;

        attempt.transition(InstanceState::Seeding);
        cancellable(cancel, self.registry.seed(preset, &address)).await?;

        Ok(Instance {
            id: attempt.id,
            kind: preset.kind(),
            address,
            created_at: Utc::now(),
            handle,
        })
    }

    async fn start_container(
        &self,
        attempt: &mut ProvisionAttempt,
        spec: &ContainerSpec,
    ) -> Result<(ContainerHandle, Address)> {
        let driver = self.driver.as_ref();
        let retry = &self.config.retry;

        let handle = retry_transient(retry, "create", move || driver.create(spec)).await?;
        attempt.acquired(handle.clone());
        attempt.transition(InstanceState::Starting);

        let started = &handle;
        let ports = &spec.ports;
        retry_transient(retry, "start", move || driver.start(started)).await?;
        let address = retry_transient(retry, "address", move || driver.address(started, ports)).await?;
        attempt.transition(InstanceState::AwaitingReady);

        Ok((handle, address))
    }

    async fn commit(&self, instance: Instance, cancel: &CancellationToken) -> Result<InstanceView> {
        let mut instances = self.instances.write().await;
        if cancel.is_cancelled() {
            return Err(ProvisionError::Cancelled);
        }
        let view = instance.view();
        instances.insert(instance.id, instance);
        Ok(view)
    }

    /// Best effort: every error is logged and the captured output returned.
    async fn rollback(&self, attempt: &ProvisionAttempt) -> Vec<String> {
        let handles = self.containers_of(attempt.id, attempt.handle()).await;

        let mut logs = Vec::new();
        for handle in &handles {
            match self.driver.logs(handle, self.config.log_tail).await {
                Ok(lines) => logs.extend(lines),
                Err(e) => warn!(container_id = %handle.id, error = %e, "Could not capture container logs"),
            }
            if let Err(e) = self.release(handle).await {
                warn!(container_id = %handle.id, error = %e, "Rollback left a container behind");
            }
        }

        debug!(instance_id = %attempt.id, containers = handles.len(), "Rollback finished");
        logs
    }

    /// The known handle plus every container carrying the instance label.
    /// A create whose reply was lost still leaves a labelled container.
    async fn containers_of(&self, id: InstanceId, known: Option<&ContainerHandle>) -> Vec<ContainerHandle> {
        let mut handles: Vec<ContainerHandle> = known.cloned().into_iter().collect();
        match self.driver.list(true).await {
            Ok(found) => {
                for handle in found {
                    if handle.instance_id() == Some(id) && !handles.iter().any(|h| h.id == handle.id) {
                        handles.push(handle);
                    }
                }
            }
            Err(e) => warn!(instance_id = %id, error = %e, "Could not look up containers by label"),
        }
        handles
    }

    /// Release every container of a running instance, returning the last error.
    async fn release_instance(&self, instance: &Instance) -> Result<()> {
        let mut outcome = Ok(());
        for handle in self.containers_of(instance.id, Some(&instance.handle)).await {
            if let Err(e) = self.release(&handle).await {
                warn!(instance_id = %instance.id, container_id = %handle.id, error = %e, "Could not remove container");
                outcome = Err(e);
            }
        }
        outcome
    }

    /// Stop then remove; removal is attempted even if stopping failed.
    async fn release(&self, handle: &ContainerHandle) -> Result<()> {
        let driver = self.driver.as_ref();
        let retry = &self.config.retry;

        let stopped = retry_transient(retry, "stop", move || driver.stop(handle)).await;
        let removed = retry_transient(retry, "remove", move || driver.remove(handle)).await;
        stopped.and(removed).map_err(ProvisionError::from)
    }
}

async fn cancellable<T>(cancel: &CancellationToken, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ProvisionError::Cancelled),
        result = fut => result,
    }
}

fn container_spec(id: InstanceId, image: &ImageSpec, options: &Options, preset: &Preset) -> ContainerSpec {
    let tag = options.tag().or_else(|| preset.version());

    let mut labels = options.labels.clone();
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
    labels.insert(INSTANCE_LABEL.to_string(), id.to_string());
    labels.insert(KIND_LABEL.to_string(), preset.kind().to_string());

    ContainerSpec {
        image: image.reference(tag),
        env: image.env.iter().chain(&options.env).cloned().collect(),
        ports: image.ports.clone(),
        cmd: image.cmd.clone(),
        name: options.container_name.clone(),
        labels,
        privileged: image.privileged,
        auth: options.auth.clone(),
        use_local_images_first: options.use_local_images_first,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
