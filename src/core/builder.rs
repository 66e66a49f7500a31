use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::lifecycle::Context;
use super::metrics::Sink;
use super::output::OutputBuffers;
use super::supervisor::Supervisor;
use crate::core::Config;
use crate::error::{ProcedureError, SupervisorError};
use crate::events::Bus;
use crate::rpc::{ProcedureRef, Procedures, RpcServer};
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::transport;

/// Builder for constructing a [`Supervisor`].
pub struct SupervisorBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
    procedures: Procedures,
}

impl SupervisorBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            procedures: Procedures::new(),
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (registration, start/stop, crashes,
    /// restarts) through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Adds a procedure workers may call back on the supervisor's own endpoint.
    pub fn with_procedure(
        mut self,
        name: impl Into<String>,
        procedure: ProcedureRef,
    ) -> Result<Self, ProcedureError> {
        self.procedures.register(name, procedure)?;
        Ok(self)
    }

    /// Replaces the supervisor's procedure table (`ping` is always kept).
    pub fn with_procedures(mut self, procedures: Procedures) -> Self {
        self.procedures = procedures;
        self
    }

    /// Builds the Supervisor.
    ///
    /// Must run inside a tokio runtime. Initializes:
    /// - the event bus and subscriber workers,
    /// - the transport and the supervisor's own RPC endpoint,
    /// - the metrics and failure channels.
    pub async fn build(self) -> Result<Arc<Supervisor>, SupervisorError> {
        let cfg = self.cfg;
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let runtime_token = CancellationToken::new();

        let subs = SubscriberSet::new(self.subscribers, bus.clone());
        let listener = spawn_event_listener(bus.clone(), subs, runtime_token.clone());

        let transport = transport::from_kind(&cfg.transport);
        let own = transport.allocate().await?;
        let bound = match own.bind().await {
            Ok(bound) => bound,
            Err(e) => {
                transport.release(&own);
                runtime_token.cancel();
                let _ = listener.await;
                return Err(e.into());
            }
        };
        let supervisor_address = bound.address().clone();
        let server = tokio::spawn(
            RpcServer::new(self.procedures).serve(bound, runtime_token.child_token()),
        );

        let ctx = Arc::new(Context {
            metrics: Sink::new("metrics", cfg.metrics_capacity_clamped(), cfg.overflow, bus.clone()),
            failures: Sink::new("failures", cfg.errors_capacity_clamped(), cfg.overflow, bus.clone()),
            output: OutputBuffers::new(),
            transport,
            bus,
            supervisor_address: Some(supervisor_address),
            cfg,
        });

        Ok(Arc::new(Supervisor::new_internal(
            ctx,
            runtime_token,
            vec![server, listener],
        )))
    }
}

/// Forwards bus events to the subscriber set until `token` fires, then flushes it.
fn spawn_event_listener(bus: Bus, subs: SubscriberSet, token: CancellationToken) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                msg = rx.recv() => match msg {
                    Ok(ev) => subs.emit(&ev),
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "event listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = token.cancelled() => break,
            }
        }
        subs.shutdown().await;
    })
}
