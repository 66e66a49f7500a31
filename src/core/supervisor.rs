//! # Supervisor: registry, lifecycle and call routing for worker processes.
//!
//! The [`Supervisor`] owns the [`Registry`], the transport, the shared output
//! buffers and the metrics/failure channels. Every public operation resolves a
//! handle, takes that handle's lock and delegates to the lifecycle
//! [`Context`](super::lifecycle::Context).
//!
//! ## High-level architecture
//! ```text
//! register(specs) ──► validate ──► allocate/claim address ──► Registry[category][name]
//!
//! start(c, n) ──► Context::launch ──► child + drain task + supervision task
//!                                          │                   │
//!                              OutputBuffers ◄┘        crash ──► restart
//!
//! call("c:n:f", args)
//!   ├─► parse URN ───────────── InvalidUrn
//!   ├─► Registry lookup ─────── ServiceNotFound
//!   ├─► RpcClient::call(f, params) ── RemoteCall
//!   └─► MetricsEvent { urn, call_duration, error }   (always exactly one)
//!
//! Event flow:
//!   Supervisor / watch / drain ── publish(Event) ──► Bus ──► listener ──► SubscriberSet
//! ```
//!
//! ## Example
//! ```no_run
//! use procvisor::{Config, ProcessSpec, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sup = Supervisor::builder(Config::default()).build().await?;
//!     sup.register([ProcessSpec::new("calc", "add1", "./calc-worker")]).await?;
//!     sup.start("calc", "add1").await?;
//!
//!     let sum: i64 = sup.call("calc:add1:Add", (2, 3)).await?;
//!     assert_eq!(sum, 5);
//!
//!     sup.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use futures::future::join_all;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::builder::SupervisorBuilder;
use super::config::Config;
use super::lifecycle::Context;
use super::metrics::{MetricsEvent, ProcessFailure};
use super::output::OutputBuffers;
use super::registry::Registry;
use super::router::{Urn, to_params};
use crate::error::{RpcError, SupervisorError};
use crate::events::{Event, EventKind};
use crate::process::{ProcessHandle, ProcessSpec, ProcessStatus};
use crate::transport::Address;

/// Coordinates worker processes, their RPC clients and their output.
pub struct Supervisor {
    ctx: Arc<Context>,
    registry: Registry,
    runtime_token: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
    /// Creates a builder for constructing a Supervisor.
    pub fn builder(cfg: Config) -> SupervisorBuilder {
        SupervisorBuilder::new(cfg)
    }

    pub(crate) fn new_internal(
        ctx: Arc<Context>,
        runtime_token: CancellationToken,
        background: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            ctx,
            registry: Registry::new(),
            runtime_token,
            background: Mutex::new(background),
        }
    }

    /// Stores specs as not-running handles.
    ///
    /// Every spec is validated before anything is stored. A spec without an
    /// address gets one from the transport. An existing registration under the
    /// same key is replaced unless it is running.
    pub async fn register(
        &self,
        specs: impl IntoIterator<Item = ProcessSpec>,
    ) -> Result<(), SupervisorError> {
        let specs: Vec<ProcessSpec> = specs.into_iter().collect();
        for spec in &specs {
            spec.validate()?;
        }
        for spec in specs {
            self.register_one(spec).await?;
        }
        Ok(())
    }

    async fn register_one(&self, spec: ProcessSpec) -> Result<(), SupervisorError> {
        let old = self.registry.get(spec.category(), spec.name()).await;
        let old_address = match &old {
            Some(old) => {
                let st = old.lock().await;
                if st.running {
                    return Err(SupervisorError::already_running(spec.category(), spec.name()));
                }
                Some(st.address.clone())
            }
            None => None,
        };

        // The new lease is taken before the old one is given up.
        let (address, allocated) = match spec.transport_address() {
            Some(fixed) => {
                let owned = old_address.as_ref() == Some(fixed);
                if !owned && !self.ctx.transport.claim(fixed) {
                    return Err(SupervisorError::Validation {
                        reason: format!("address {fixed} is already owned by another process"),
                    });
                }
                (fixed.clone(), false)
            }
            None => (self.ctx.transport.allocate().await?, true),
        };

        if let Some(old) = &old {
            if let Err(e) = self.retire(old, Some(&address)).await {
                if old_address.as_ref() != Some(&address) {
                    self.ctx.transport.release(&address);
                }
                return Err(e);
            }
        }

        self.ctx.bus.publish(
            Event::new(EventKind::ProcessRegistered)
                .with_process(spec.category(), spec.name())
                .with_address(address.to_string()),
        );
        tracing::debug!(key = %spec.key(), %address, "process registered");
        self.registry
            .insert(Arc::new(ProcessHandle::new(spec, address, allocated)))
            .await;
        Ok(())
    }

    /// Cleans up a not-running handle and releases its address lease unless
    /// it is `keep`.
    async fn retire(&self, handle: &ProcessHandle, keep: Option<&Address>) -> Result<(), SupervisorError> {
        let spec = handle.spec();
        let mut st = handle.lock().await;
        if st.running {
            return Err(SupervisorError::already_running(spec.category(), spec.name()));
        }
        if let Err(e) = self.ctx.stop(spec, &mut st).await {
            tracing::warn!(key = %spec.key(), error = %e, "cleanup of replaced handle failed");
        }
        if keep != Some(&st.address) {
            self.ctx.transport.release(&st.address);
        }
        Ok(())
    }

    /// Removes a not-running handle and releases its address.
    pub async fn unregister(&self, category: &str, name: &str) -> Result<(), SupervisorError> {
        let handle = self.handle(category, name).await?;
        self.retire(&handle, None).await?;
        self.registry.remove(category, name).await;
        self.ctx
            .bus
            .publish(Event::new(EventKind::ProcessUnregistered).with_process(category, name));
        Ok(())
    }

    /// Status of every registered process, sorted by key.
    pub async fn list(&self) -> Vec<ProcessStatus> {
        let mut out = Vec::new();
        for handle in self.registry.snapshot().await {
            let st = handle.lock().await;
            out.push(ProcessStatus {
                category: handle.spec().category().to_string(),
                name: handle.spec().name().to_string(),
                address: st.address.clone(),
                running: st.running,
                pid: st.pid,
                restarts: st.restarts,
            });
        }
        out
    }

    /// Launches one registered process and waits until it answers `ping`.
    pub async fn start(&self, category: &str, name: &str) -> Result<(), SupervisorError> {
        let handle = self.handle(category, name).await?;
        let mut st = handle.lock().await;
        self.ctx.launch(&handle, &mut st).await
    }

    /// Starts every registered process concurrently; returns all failures.
    ///
    /// Processes that are already running are reported as `AlreadyRunning`.
    pub async fn start_all(&self) -> Vec<SupervisorError> {
        let handles = self.registry.snapshot().await;
        let results = join_all(handles.iter().map(|handle| async move {
            let mut st = handle.lock().await;
            self.ctx.launch(handle, &mut st).await
        }))
        .await;
        results.into_iter().filter_map(Result::err).collect()
    }

    /// Stops one process: terminate, reap, join its tasks, reclaim its endpoint.
    ///
    /// The handle is left not running even when an error is returned.
    pub async fn stop(&self, category: &str, name: &str) -> Result<(), SupervisorError> {
        let handle = self.handle(category, name).await?;
        let mut st = handle.lock().await;
        self.ctx.stop(handle.spec(), &mut st).await
    }

    /// Stops every process concurrently; returns all failures.
    pub async fn stop_all(&self) -> Vec<SupervisorError> {
        let handles = self.registry.snapshot().await;
        let results = join_all(handles.iter().map(|handle| async move {
            let mut st = handle.lock().await;
            self.ctx.stop(handle.spec(), &mut st).await
        }))
        .await;
        results.into_iter().filter_map(Result::err).collect()
    }

    /// `stop` then `start`; auto-allocated loopback ports are renewed.
    pub async fn restart(&self, category: &str, name: &str) -> Result<(), SupervisorError> {
        let handle = self.handle(category, name).await?;
        let mut st = handle.lock().await;
        self.ctx.stop(handle.spec(), &mut st).await?;
        self.ctx.launch(&handle, &mut st).await
    }

    /// Calls `function` on the worker named by `urn` (`category:name:function`).
    ///
    /// `args` become positional parameters (a tuple spreads, `()` sends none).
    /// Exactly one [`MetricsEvent`] is emitted, whatever the outcome.
    pub async fn call<A, R>(&self, urn: &str, args: A) -> Result<R, SupervisorError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let started = Instant::now();
        let result = self.route(urn, &args).await;
        self.ctx
            .metrics
            .push(MetricsEvent {
                urn: urn.to_string(),
                call_duration: started.elapsed(),
                error: result.is_err(),
            })
            .await;
        result
    }

    async fn route<A, R>(&self, urn: &str, args: &A) -> Result<R, SupervisorError>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let target: Urn = urn.parse()?;
        let not_found = || SupervisorError::service_not_found(&target.category, &target.name);

        let handle = self
            .registry
            .get(&target.category, &target.name)
            .await
            .ok_or_else(not_found)?;
        let client = {
            let st = handle.lock().await;
            match (&st.client, st.running) {
                (Some(client), true) => client.clone(),
                _ => return Err(not_found()),
            }
        };

        let remote = |source: RpcError| SupervisorError::RemoteCall {
            urn: urn.to_string(),
            source,
        };
        let params = to_params(args).map_err(remote)?;
        let value = client.call(&target.function, params).await.map_err(remote)?;
        serde_json::from_value(value).map_err(|e| remote(RpcError::Encoding(e)))
    }

    /// Stops every worker, then the supervisor's own endpoint and event delivery.
    ///
    /// Returns the failures of the individual stops.
    pub async fn shutdown(&self) -> Vec<SupervisorError> {
        let errors = self.stop_all().await;
        self.ctx.bus.publish(Event::new(EventKind::SupervisorStopped));
        self.runtime_token.cancel();

        let background = std::mem::take(
            &mut *self.background.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task in background {
            let _ = task.await;
        }

        if let Some(address) = &self.ctx.supervisor_address {
            if let Err(e) = self.ctx.transport.reclaim(address).await {
                tracing::warn!(%address, error = %e, "reclaim of supervisor endpoint failed");
            }
            self.ctx.transport.release(address);
        }
        errors
    }

    /// Captured stdout/stderr of all workers.
    pub fn output(&self) -> OutputBuffers {
        self.ctx.output.clone()
    }

    /// Receiver of call metrics; `None` once taken.
    pub fn take_metrics(&self) -> Option<mpsc::Receiver<MetricsEvent>> {
        self.ctx.metrics.take_receiver()
    }

    /// Receiver of supervision failures; `None` once taken.
    pub fn take_failures(&self) -> Option<mpsc::Receiver<ProcessFailure>> {
        self.ctx.failures.take_receiver()
    }

    /// Metrics dropped because the channel was full.
    pub fn dropped_metrics(&self) -> u64 {
        self.ctx.metrics.dropped()
    }

    /// Address of the supervisor's own RPC endpoint.
    pub fn address(&self) -> Option<&Address> {
        self.ctx.supervisor_address.as_ref()
    }

    /// Receiver for raw runtime events published after this call.
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.ctx.bus.subscribe()
    }

    pub fn config(&self) -> &Config {
        &self.ctx.cfg
    }

    async fn handle(&self, category: &str, name: &str) -> Result<Arc<ProcessHandle>, SupervisorError> {
        self.registry
            .get(category, name)
            .await
            .ok_or_else(|| SupervisorError::not_found(category, name))
    }
}
